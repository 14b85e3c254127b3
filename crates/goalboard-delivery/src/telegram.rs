use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, redirect::Policy, StatusCode};
use serde_json::{json, Map, Value};

use goalboard_types::ReportTarget;

use crate::{
    truncate_detail, DeliveryConfig, DeliveryError, DeliveryMode, DeliveryReceipt, MessageFormat,
    ReportTransport, REASON_RATE_LIMITED,
};

/// Telegram Bot API `sendMessage` transport.
#[derive(Debug, Clone)]
pub struct TelegramTransport {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl TelegramTransport {
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let bot_token = config
            .telegram_bot_token
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .context("telegram delivery requires TELEGRAM_BOT_TOKEN")?;
        if config.http_timeout_ms == 0 {
            bail!("telegram delivery requires http timeout > 0");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .redirect(Policy::none())
            .build()
            .context("failed to build telegram http client")?;
        Ok(Self {
            client,
            api_base: config.telegram_api_base.trim_end_matches('/').to_string(),
            bot_token,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    // Token-free endpoint for logs and errors.
    fn redacted_endpoint(&self) -> String {
        format!("{}/bot<redacted>/sendMessage", self.api_base)
    }
}

pub(crate) fn send_message_body(target: &ReportTarget, text: &str, format: MessageFormat) -> Value {
    let mut body = Map::new();
    body.insert("chat_id".to_string(), json!(target.channel_id.trim()));
    body.insert("text".to_string(), json!(text));
    body.insert("disable_web_page_preview".to_string(), json!(true));
    if let Some(thread_id) = target.thread_id {
        body.insert("message_thread_id".to_string(), json!(thread_id));
    }
    if format == MessageFormat::Markdown {
        body.insert("parse_mode".to_string(), json!("Markdown"));
    }
    Value::Object(body)
}

#[async_trait]
impl ReportTransport for TelegramTransport {
    fn name(&self) -> &'static str {
        DeliveryMode::Telegram.as_str()
    }

    async fn send(
        &self,
        target: &ReportTarget,
        text: &str,
        format: MessageFormat,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let body = send_message_body(target, text, format);
        let endpoint = self.redacted_endpoint();
        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|error| DeliveryError {
                reason_code: "delivery_transport_error".to_string(),
                detail: error.without_url().to_string(),
                retryable: true,
                retry_after: None,
                endpoint: endpoint.clone(),
                http_status: None,
            })?;

        let status = response.status();
        let header_retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body_raw = response.text().await.unwrap_or_default();
        let body_json = serde_json::from_str::<Value>(&body_raw).unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(DeliveryReceipt {
                transport: self.name().to_string(),
                status: "sent".to_string(),
                target: target.label(),
                endpoint,
                request_body: body,
                http_status: Some(status.as_u16()),
                provider_message_id: body_json
                    .get("result")
                    .and_then(|value| value.get("message_id"))
                    .and_then(Value::as_i64)
                    .map(|value| value.to_string()),
            });
        }

        let (reason_code, retryable) = classify_provider_status(status);
        let retry_after = if reason_code == REASON_RATE_LIMITED {
            body_json
                .get("parameters")
                .and_then(|value| value.get("retry_after"))
                .and_then(Value::as_u64)
                .map(Duration::from_secs)
                .or(header_retry_after)
        } else {
            None
        };
        Err(DeliveryError {
            reason_code: reason_code.to_string(),
            detail: truncate_detail(&body_raw),
            retryable,
            retry_after,
            endpoint,
            http_status: Some(status.as_u16()),
        })
    }
}

fn classify_provider_status(status: StatusCode) -> (&'static str, bool) {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return (REASON_RATE_LIMITED, true);
    }
    if status.is_server_error() {
        return ("delivery_provider_unavailable", true);
    }
    if status.is_client_error() {
        return ("delivery_request_rejected", false);
    }
    ("delivery_unknown_http_failure", true)
}
