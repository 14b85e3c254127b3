//! Fixed-time report scheduling for goalboard.
//!
//! A cron expression evaluated in the desk's time zone decides when a report
//! run is due. The last run instant is persisted in a small JSON state file so
//! restarts neither repeat a run nor backfill stale ones.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::TimeZone;
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use goalboard_core::{
    current_unix_timestamp_ms, is_older_than_ms, read_json_state, utc_from_unix_ms,
    write_json_state,
};

mod fanout;

pub use fanout::{FanoutMode, FanoutSummary, ReportFanout};

#[cfg(test)]
mod tests;

/// Every two hours from 08:00 to 22:00 local time.
pub const DEFAULT_REPORT_CRON: &str = "0 0 8,10,12,14,16,18,20,22 * * *";

const SCHEDULER_STATE_SCHEMA_VERSION: u32 = 1;
const FIRST_POLL_LOOKBACK_MS: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct ReportSchedulerConfig {
    pub cron: String,
    pub timezone: Tz,
    pub state_path: PathBuf,
    pub poll_interval: Duration,
    /// Due instants older than this are skipped. Zero disables the check.
    pub stale_after: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchedulerState {
    schema_version: u32,
    #[serde(default)]
    last_run_unix_ms: Option<u64>,
    #[serde(default)]
    last_summary: Option<FanoutSummary>,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            schema_version: SCHEDULER_STATE_SCHEMA_VERSION,
            last_run_unix_ms: None,
            last_summary: None,
        }
    }
}

/// Outcome of one scheduler poll.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollReport {
    /// The due instant this poll acted on, if any.
    pub due_unix_ms: Option<u64>,
    pub ran: Option<FanoutSummary>,
    pub stale_skipped: usize,
    pub run_failed: bool,
}

pub struct ReportScheduler {
    config: ReportSchedulerConfig,
    schedule: Schedule,
    fanout: ReportFanout,
    state: SchedulerState,
}

impl ReportScheduler {
    pub fn new(config: ReportSchedulerConfig, fanout: ReportFanout) -> Result<Self> {
        let schedule = parse_schedule(&config.cron)?;
        let state = load_scheduler_state(&config.state_path)?;
        Ok(Self {
            config,
            schedule,
            fanout,
            state,
        })
    }

    pub fn last_run_unix_ms(&self) -> Option<u64> {
        self.state.last_run_unix_ms
    }

    /// Next scheduled instant strictly after `from_unix_ms`.
    pub fn next_due_unix_ms(&self, from_unix_ms: u64) -> Result<u64> {
        next_due_unix_ms(&self.schedule, self.config.timezone, from_unix_ms)
    }

    /// Polls until ctrl-c. Poll errors are logged and never stop the loop.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            cron = %self.config.cron,
            timezone = %self.config.timezone,
            state_path = %self.config.state_path.display(),
            "report scheduler started"
        );
        loop {
            match self.poll_once(current_unix_timestamp_ms()).await {
                Ok(report) => {
                    if report.ran.is_some() || report.stale_skipped > 0 || report.run_failed {
                        info!(
                            due_unix_ms = ?report.due_unix_ms,
                            ran = report.ran.is_some(),
                            stale_skipped = report.stale_skipped,
                            run_failed = report.run_failed,
                            "report scheduler poll"
                        );
                    }
                }
                Err(error) => {
                    warn!(%error, "report scheduler poll error");
                }
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("report scheduler shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Runs the latest due instant in `(last run, now]` unless it is stale.
    ///
    /// Earlier due instants in the same gap are superseded and counted as
    /// skipped. The last run marker advances even when the run fails so a
    /// broken store cannot cause a retry storm.
    pub async fn poll_once(&mut self, now_unix_ms: u64) -> Result<PollReport> {
        let mut report = PollReport::default();
        let from = self
            .state
            .last_run_unix_ms
            .unwrap_or_else(|| now_unix_ms.saturating_sub(FIRST_POLL_LOOKBACK_MS));
        let Some((due_unix_ms, superseded)) =
            latest_due_between(&self.schedule, self.config.timezone, from, now_unix_ms)?
        else {
            return Ok(report);
        };
        report.due_unix_ms = Some(due_unix_ms);
        report.stale_skipped = superseded;

        let stale_after_ms = u64::try_from(self.config.stale_after.as_millis()).unwrap_or(u64::MAX);
        if is_older_than_ms(due_unix_ms, now_unix_ms, stale_after_ms) {
            report.stale_skipped = report.stale_skipped.saturating_add(1);
            warn!(due_unix_ms, now_unix_ms, "skipping stale report instant");
        } else {
            let now = utc_from_unix_ms(now_unix_ms)
                .ok_or_else(|| anyhow!("poll instant {now_unix_ms} is out of range"))?;
            match self.fanout.run_report(now).await {
                Ok(summary) => {
                    self.state.last_summary = Some(summary.clone());
                    report.ran = Some(summary);
                }
                Err(error) => {
                    report.run_failed = true;
                    warn!(%error, "report run failed");
                }
            }
        }

        self.state.last_run_unix_ms = Some(now_unix_ms);
        save_scheduler_state(&self.config.state_path, &self.state)?;
        Ok(report)
    }
}

fn parse_schedule(cron: &str) -> Result<Schedule> {
    Schedule::from_str(cron).with_context(|| format!("invalid cron expression '{}'", cron))
}

fn next_due_unix_ms(schedule: &Schedule, timezone: Tz, from_unix_ms: u64) -> Result<u64> {
    let from = timezone
        .timestamp_millis_opt(i64::try_from(from_unix_ms).unwrap_or(i64::MAX))
        .single()
        .ok_or_else(|| anyhow!("invalid from timestamp for report schedule"))?;
    let next = schedule
        .after(&from)
        .next()
        .ok_or_else(|| anyhow!("report schedule has no future occurrence"))?;
    Ok(u64::try_from(next.timestamp_millis()).unwrap_or(u64::MAX))
}

/// Latest scheduled instant in `(from, until]` and how many earlier ones it supersedes.
fn latest_due_between(
    schedule: &Schedule,
    timezone: Tz,
    from_unix_ms: u64,
    until_unix_ms: u64,
) -> Result<Option<(u64, usize)>> {
    let mut cursor = from_unix_ms;
    let mut latest = None;
    let mut seen = 0_usize;
    loop {
        let next = next_due_unix_ms(schedule, timezone, cursor)?;
        if next > until_unix_ms {
            break;
        }
        latest = Some(next);
        seen = seen.saturating_add(1);
        cursor = next;
    }
    Ok(latest.map(|due| (due, seen.saturating_sub(1))))
}

fn load_scheduler_state(path: &Path) -> Result<SchedulerState> {
    let Some(state) = read_json_state::<SchedulerState>(path)? else {
        return Ok(SchedulerState::default());
    };
    if state.schema_version != SCHEDULER_STATE_SCHEMA_VERSION {
        bail!(
            "unsupported report scheduler state schema: expected {}, found {}",
            SCHEDULER_STATE_SCHEMA_VERSION,
            state.schema_version
        );
    }
    Ok(state)
}

fn save_scheduler_state(path: &Path, state: &SchedulerState) -> Result<()> {
    write_json_state(path, state)
}
