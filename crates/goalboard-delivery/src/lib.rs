//! Outbound report delivery.
//!
//! Transports send one message to one chat destination and classify failures
//! into structured errors. Rate-limit failures carry the provider's advised
//! wait so [`deliver_with_retry`] can honor it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use goalboard_types::ReportTarget;

mod telegram;

pub use telegram::TelegramTransport;

pub const REASON_RATE_LIMITED: &str = "delivery_rate_limited";
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `DeliveryMode` values.
pub enum DeliveryMode {
    DryRun,
    Telegram,
}

impl DeliveryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DryRun => "dry_run",
            Self::Telegram => "telegram",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub mode: DeliveryMode,
    pub http_timeout_ms: u64,
    pub telegram_api_base: String,
    pub telegram_bot_token: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::DryRun,
            http_timeout_ms: 10_000,
            telegram_api_base: "https://api.telegram.org".to_string(),
            telegram_bot_token: None,
        }
    }
}

/// Text flavor of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    Plain,
    Markdown,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeliveryReceipt {
    pub transport: String,
    pub status: String,
    pub target: String,
    pub endpoint: String,
    pub request_body: Value,
    pub http_status: Option<u16>,
    pub provider_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryError {
    pub reason_code: String,
    pub detail: String,
    pub retryable: bool,
    /// Provider-advised wait before retrying, when rate limited.
    pub retry_after: Option<Duration>,
    pub endpoint: String,
    pub http_status: Option<u16>,
}

impl DeliveryError {
    pub fn is_rate_limited(&self) -> bool {
        self.reason_code == REASON_RATE_LIMITED
    }
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "reason_code={} retryable={} endpoint={} detail={}",
            self.reason_code, self.retryable, self.endpoint, self.detail
        )
    }
}

impl std::error::Error for DeliveryError {}

#[async_trait]
/// Sends one message to one destination.
pub trait ReportTransport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(
        &self,
        target: &ReportTarget,
        text: &str,
        format: MessageFormat,
    ) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Logs messages instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunTransport;

#[async_trait]
impl ReportTransport for DryRunTransport {
    fn name(&self) -> &'static str {
        DeliveryMode::DryRun.as_str()
    }

    async fn send(
        &self,
        target: &ReportTarget,
        text: &str,
        format: MessageFormat,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        info!(
            target = %target.label(),
            chars = text.chars().count(),
            ?format,
            "dry-run delivery\n{text}"
        );
        Ok(DeliveryReceipt {
            transport: self.name().to_string(),
            status: "dry_run".to_string(),
            target: target.label(),
            endpoint: String::new(),
            request_body: serde_json::json!({ "text": text }),
            http_status: None,
            provider_message_id: None,
        })
    }
}

/// Builds the transport selected by `config.mode`.
pub fn build_transport(config: &DeliveryConfig) -> Result<Arc<dyn ReportTransport>> {
    match config.mode {
        DeliveryMode::DryRun => Ok(Arc::new(DryRunTransport)),
        DeliveryMode::Telegram => Ok(Arc::new(TelegramTransport::new(config)?)),
    }
}

/// Retries a rate-limited send after the advised wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Upper bound on a single advised wait.
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            max_wait: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, max_wait: Duration) -> Result<Self> {
        if max_attempts == 0 {
            bail!("retry policy requires at least one attempt");
        }
        Ok(Self {
            max_attempts,
            max_wait,
        })
    }

    fn wait_for(&self, error: &DeliveryError) -> Duration {
        error
            .retry_after
            .unwrap_or(DEFAULT_RATE_LIMIT_WAIT)
            .min(self.max_wait)
    }
}

/// Sends through `transport`, retrying only rate-limit failures.
pub async fn deliver_with_retry(
    transport: &dyn ReportTransport,
    policy: &RetryPolicy,
    target: &ReportTarget,
    text: &str,
    format: MessageFormat,
) -> Result<DeliveryReceipt, DeliveryError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match transport.send(target, text, format).await {
            Ok(receipt) => return Ok(receipt),
            Err(error) if error.is_rate_limited() && attempt < max_attempts => {
                let wait = policy.wait_for(&error);
                warn!(
                    target = %target.label(),
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    "delivery rate limited, retrying"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

pub(crate) fn truncate_detail(raw: &str) -> String {
    const LIMIT: usize = 512;
    let trimmed = raw.trim();
    if trimmed.chars().count() <= LIMIT {
        return trimmed.to_string();
    }
    let mut output = trimmed.chars().take(LIMIT).collect::<String>();
    output.push_str("...");
    output
}
