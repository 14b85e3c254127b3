use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use goalboard_delivery::{deliver_with_retry, MessageFormat, ReportTransport, RetryPolicy};
use goalboard_engine::SalesDesk;
use goalboard_types::TeamDestination;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Which destination set a run delivered to.
pub enum FanoutMode {
    /// One global destination received every registered team's report.
    Global,
    PerTeam,
}

/// Counters for one fan-out run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutSummary {
    pub mode: FanoutMode,
    pub destinations: usize,
    pub teams_reported: usize,
    pub teams_failed: usize,
    pub chunks_sent: usize,
    pub chunks_failed: usize,
}

impl FanoutSummary {
    fn new(mode: FanoutMode, destinations: usize) -> Self {
        Self {
            mode,
            destinations,
            teams_reported: 0,
            teams_failed: 0,
            chunks_sent: 0,
            chunks_failed: 0,
        }
    }
}

/// Builds each team's current shift report and delivers it chunk by chunk.
#[derive(Clone)]
pub struct ReportFanout {
    desk: Arc<SalesDesk>,
    transport: Arc<dyn ReportTransport>,
    retry: RetryPolicy,
}

impl ReportFanout {
    pub fn new(
        desk: Arc<SalesDesk>,
        transport: Arc<dyn ReportTransport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            desk,
            transport,
            retry,
        }
    }

    /// Resolves who gets a report this run.
    ///
    /// A configured global destination replaces every per-team destination.
    pub async fn plan(&self) -> Result<(FanoutMode, Vec<TeamDestination>)> {
        let global = self
            .desk
            .global_destination()
            .await
            .context("failed to load global destination")?;
        if let Some(target) = global {
            let teams = self
                .desk
                .list_teams()
                .await
                .context("failed to list registered teams")?;
            let plan = teams
                .into_iter()
                .map(|team| TeamDestination {
                    team,
                    target: target.clone(),
                })
                .collect();
            return Ok((FanoutMode::Global, plan));
        }
        let plan = self
            .desk
            .team_destinations()
            .await
            .context("failed to load team destinations")?;
        Ok((FanoutMode::PerTeam, plan))
    }

    /// Runs one report cycle at `now`. Destinations are processed in order and
    /// a failing team or chunk never stops the rest of the run.
    pub async fn run_report(&self, now: DateTime<Utc>) -> Result<FanoutSummary> {
        let (mode, plan) = self.plan().await?;
        let mut summary = FanoutSummary::new(mode, plan.len());
        for destination in &plan {
            let chunks = match self.desk.goalboard(&destination.team, now).await {
                Ok(chunks) => chunks,
                Err(error) => {
                    summary.teams_failed = summary.teams_failed.saturating_add(1);
                    warn!(
                        team = %destination.team,
                        target = %destination.target.label(),
                        %error,
                        "skipping team report"
                    );
                    continue;
                }
            };
            summary.teams_reported = summary.teams_reported.saturating_add(1);
            for chunk in &chunks {
                let format = if chunk.fenced {
                    MessageFormat::Markdown
                } else {
                    MessageFormat::Plain
                };
                match deliver_with_retry(
                    self.transport.as_ref(),
                    &self.retry,
                    &destination.target,
                    &chunk.text,
                    format,
                )
                .await
                {
                    Ok(receipt) => {
                        summary.chunks_sent = summary.chunks_sent.saturating_add(1);
                        debug!(
                            team = %destination.team,
                            part = chunk.part,
                            parts = chunk.parts,
                            status = %receipt.status,
                            "report chunk delivered"
                        );
                    }
                    Err(error) => {
                        summary.chunks_failed = summary.chunks_failed.saturating_add(1);
                        warn!(
                            team = %destination.team,
                            part = chunk.part,
                            parts = chunk.parts,
                            reason_code = %error.reason_code,
                            %error,
                            "report chunk delivery failed"
                        );
                    }
                }
            }
        }
        info!(
            transport = self.transport.name(),
            mode = ?summary.mode,
            destinations = summary.destinations,
            teams_reported = summary.teams_reported,
            teams_failed = summary.teams_failed,
            chunks_sent = summary.chunks_sent,
            chunks_failed = summary.chunks_failed,
            "report fan-out finished"
        );
        Ok(summary)
    }
}
