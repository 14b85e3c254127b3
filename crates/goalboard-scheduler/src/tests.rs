use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use goalboard_core::unix_ms_from_utc;
use goalboard_delivery::{
    DeliveryError, DeliveryReceipt, MessageFormat, ReportTransport, RetryPolicy,
    REASON_RATE_LIMITED,
};
use goalboard_engine::{ChunkLimits, PageCatalog, SalesDesk, WindowCalculator};
use goalboard_store::{
    BoardStore, CycleKind, GoalKey, GoalStore, InMemoryBoardStore, PageName, ReportTarget,
    SaleEvent, SalesLedger, StoreError, StoreResult, TeamDestination, TeamDirectory, TimeWindow,
};

use super::{
    latest_due_between, parse_schedule, FanoutMode, ReportFanout, ReportScheduler,
    ReportSchedulerConfig, DEFAULT_REPORT_CRON,
};

const CATALOG: &str = r##"
[[page]]
name = "Autumn Paid"
aliases = ["#autumnpaid"]
"##;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SentMessage {
    target: String,
    text: String,
    format: MessageFormat,
}

/// Records every send; channels listed in `failing` return a provider error
/// and `rate_limited_once` channels return one 429 before succeeding.
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    failing: Vec<String>,
    rate_limited_once: Mutex<Vec<String>>,
    attempts: Mutex<usize>,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().expect("sent").clone()
    }

    fn attempts(&self) -> usize {
        *self.attempts.lock().expect("attempts")
    }
}

#[async_trait]
impl ReportTransport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(
        &self,
        target: &ReportTarget,
        text: &str,
        format: MessageFormat,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        *self.attempts.lock().expect("attempts") += 1;
        let failure = |reason_code: &str, retry_after| DeliveryError {
            reason_code: reason_code.to_string(),
            detail: "scripted".to_string(),
            retryable: true,
            retry_after,
            endpoint: String::new(),
            http_status: None,
        };
        if self.failing.contains(&target.channel_id) {
            return Err(failure("delivery_provider_unavailable", None));
        }
        {
            let mut limited = self.rate_limited_once.lock().expect("limited");
            if let Some(index) = limited.iter().position(|id| id == &target.channel_id) {
                limited.remove(index);
                return Err(failure(REASON_RATE_LIMITED, Some(Duration::ZERO)));
            }
        }
        self.sent.lock().expect("sent").push(SentMessage {
            target: target.label(),
            text: text.to_string(),
            format,
        });
        Ok(DeliveryReceipt {
            transport: self.name().to_string(),
            status: "sent".to_string(),
            target: target.label(),
            endpoint: String::new(),
            request_body: serde_json::Value::Null,
            http_status: Some(200),
            provider_message_id: None,
        })
    }
}

/// Delegates to an in-memory store but fails ledger reads for one team.
struct FlakyStore {
    inner: InMemoryBoardStore,
    broken_team: String,
}

impl FlakyStore {
    fn check(&self, team: &str) -> StoreResult<()> {
        if team == self.broken_team {
            return Err(StoreError::Io(std::io::Error::other("ledger offline")));
        }
        Ok(())
    }
}

#[async_trait]
impl SalesLedger for FlakyStore {
    async fn append(&self, event: SaleEvent) -> StoreResult<()> {
        self.inner.append(event).await
    }

    async fn sum_by_page(
        &self,
        team: &str,
        window: &TimeWindow,
    ) -> StoreResult<BTreeMap<PageName, Decimal>> {
        self.check(team)?;
        self.inner.sum_by_page(team, window).await
    }

    async fn distinct_pages(&self, team: &str) -> StoreResult<BTreeSet<PageName>> {
        self.check(team)?;
        self.inner.distinct_pages(team).await
    }

    async fn delete_range(
        &self,
        team: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.inner.delete_range(team, since, until).await
    }
}

#[async_trait]
impl GoalStore for FlakyStore {
    async fn load_goals(&self) -> StoreResult<BTreeMap<GoalKey, Decimal>> {
        self.inner.load_goals().await
    }

    async fn upsert_goal(&self, key: &GoalKey, amount: Decimal) -> StoreResult<()> {
        self.inner.upsert_goal(key, amount).await
    }

    async fn clear_goals(&self, cycle: CycleKind) -> StoreResult<usize> {
        self.inner.clear_goals(cycle).await
    }

    async fn load_overrides(&self) -> StoreResult<BTreeMap<GoalKey, Decimal>> {
        self.inner.load_overrides().await
    }

    async fn upsert_override(&self, key: &GoalKey, amount: Decimal) -> StoreResult<()> {
        self.inner.upsert_override(key, amount).await
    }

    async fn clear_override(&self, key: &GoalKey) -> StoreResult<bool> {
        self.inner.clear_override(key).await
    }
}

#[async_trait]
impl TeamDirectory for FlakyStore {
    async fn register_team(&self, team: &str) -> StoreResult<()> {
        self.inner.register_team(team).await
    }

    async fn remove_team(&self, team: &str) -> StoreResult<bool> {
        self.inner.remove_team(team).await
    }

    async fn list_teams(&self) -> StoreResult<Vec<String>> {
        self.inner.list_teams().await
    }

    async fn add_team_page(&self, team: &str, page: &PageName) -> StoreResult<()> {
        self.inner.add_team_page(team, page).await
    }

    async fn team_pages(&self, team: &str) -> StoreResult<BTreeSet<PageName>> {
        self.inner.team_pages(team).await
    }

    async fn set_team_destination(&self, team: &str, target: &ReportTarget) -> StoreResult<()> {
        self.inner.set_team_destination(team, target).await
    }

    async fn team_destinations(&self) -> StoreResult<Vec<TeamDestination>> {
        self.inner.team_destinations().await
    }

    async fn set_global_destination(&self, target: &ReportTarget) -> StoreResult<()> {
        self.inner.set_global_destination(target).await
    }

    async fn clear_global_destination(&self) -> StoreResult<bool> {
        self.inner.clear_global_destination().await
    }

    async fn global_destination(&self) -> StoreResult<Option<ReportTarget>> {
        self.inner.global_destination().await
    }
}

fn manila(d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    chrono_tz::Asia::Manila
        .with_ymd_and_hms(2025, 6, d, h, mi, 0)
        .single()
        .expect("local time")
        .with_timezone(&Utc)
}

async fn open_desk<S: BoardStore + 'static>(store: Arc<S>) -> Arc<SalesDesk> {
    Arc::new(
        SalesDesk::open(
            store,
            PageCatalog::from_toml_str(CATALOG).expect("catalog"),
            WindowCalculator::default(),
            ChunkLimits::default(),
        )
        .await
        .expect("desk"),
    )
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(5)).expect("policy")
}

fn scheduler_config(state_path: &Path, stale_after: Duration) -> ReportSchedulerConfig {
    ReportSchedulerConfig {
        cron: DEFAULT_REPORT_CRON.to_string(),
        timezone: chrono_tz::Asia::Manila,
        state_path: state_path.to_path_buf(),
        poll_interval: Duration::from_millis(10),
        stale_after,
    }
}

#[tokio::test]
async fn functional_global_destination_replaces_team_destinations() {
    let store = Arc::new(InMemoryBoardStore::new());
    let desk = open_desk(store).await;
    desk.register_team("1").await.expect("team 1");
    desk.register_team("2").await.expect("team 2");
    desk.set_team_destination("1", &ReportTarget::new("-1", None))
        .await
        .expect("team destination");
    desk.set_global_destination(&ReportTarget::new("-9", Some(3)))
        .await
        .expect("global destination");
    desk.record_sale("1", "#autumnpaid", "150", manila(2, 9, 0))
        .await
        .expect("sale");

    let transport = Arc::new(RecordingTransport::default());
    let fanout = ReportFanout::new(desk, transport.clone(), fast_retry());
    let summary = fanout.run_report(manila(2, 10, 0)).await.expect("run");

    assert_eq!(summary.mode, FanoutMode::Global);
    assert_eq!(summary.destinations, 2);
    assert_eq!(summary.teams_reported, 2);
    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|message| message.target == "-9#3"));
    assert!(sent[0].text.contains("Team 1"));
    assert!(sent[0].text.contains("Autumn Paid"));
    assert_eq!(sent[0].format, MessageFormat::Markdown);
}

#[tokio::test]
async fn functional_per_team_run_isolates_delivery_failures() {
    let store = Arc::new(InMemoryBoardStore::new());
    let desk = open_desk(store).await;
    desk.set_team_destination("1", &ReportTarget::new("-1", None))
        .await
        .expect("team 1 destination");
    desk.set_team_destination("2", &ReportTarget::new("-2", None))
        .await
        .expect("team 2 destination");

    let transport = Arc::new(RecordingTransport {
        failing: vec!["-1".to_string()],
        ..RecordingTransport::default()
    });
    let fanout = ReportFanout::new(desk, transport.clone(), fast_retry());
    let summary = fanout.run_report(manila(2, 12, 0)).await.expect("run");

    assert_eq!(summary.mode, FanoutMode::PerTeam);
    assert_eq!(summary.teams_reported, 2);
    assert_eq!(summary.chunks_failed, 1);
    assert_eq!(summary.chunks_sent, 1);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].target, "-2");
    assert_eq!(transport.attempts(), 2);
}

#[tokio::test]
async fn functional_rate_limited_chunk_is_retried_once() {
    let store = Arc::new(InMemoryBoardStore::new());
    let desk = open_desk(store).await;
    desk.set_team_destination("1", &ReportTarget::new("-1", None))
        .await
        .expect("destination");

    let transport = Arc::new(RecordingTransport {
        rate_limited_once: Mutex::new(vec!["-1".to_string()]),
        ..RecordingTransport::default()
    });
    let fanout = ReportFanout::new(desk, transport.clone(), fast_retry());
    let summary = fanout.run_report(manila(2, 12, 0)).await.expect("run");

    assert_eq!(summary.chunks_sent, 1);
    assert_eq!(summary.chunks_failed, 0);
    assert_eq!(transport.attempts(), 2);
}

#[tokio::test]
async fn regression_storage_failure_skips_only_that_team() {
    let store = Arc::new(FlakyStore {
        inner: InMemoryBoardStore::new(),
        broken_team: "Team 1".to_string(),
    });
    let desk = open_desk(store).await;
    desk.set_team_destination("1", &ReportTarget::new("-1", None))
        .await
        .expect("team 1 destination");
    desk.set_team_destination("2", &ReportTarget::new("-2", None))
        .await
        .expect("team 2 destination");

    let transport = Arc::new(RecordingTransport::default());
    let fanout = ReportFanout::new(desk, transport.clone(), fast_retry());
    let summary = fanout.run_report(manila(2, 14, 0)).await.expect("run");

    assert_eq!(summary.teams_failed, 1);
    assert_eq!(summary.teams_reported, 1);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].target, "-2");
}

#[tokio::test]
async fn regression_overflowing_team_totals_skip_only_that_team() {
    let store = Arc::new(InMemoryBoardStore::new());
    for _ in 0..2 {
        store
            .append(
                SaleEvent::new("Team 1", "Autumn Paid", Decimal::MAX, manila(2, 9, 0))
                    .expect("event"),
            )
            .await
            .expect("append");
    }
    let desk = open_desk(store).await;
    desk.set_team_destination("1", &ReportTarget::new("-1", None))
        .await
        .expect("team 1 destination");
    desk.set_team_destination("2", &ReportTarget::new("-2", None))
        .await
        .expect("team 2 destination");
    desk.record_sale("2", "#autumnpaid", "75", manila(2, 9, 30))
        .await
        .expect("team 2 sale");

    let transport = Arc::new(RecordingTransport::default());
    let fanout = ReportFanout::new(desk, transport.clone(), fast_retry());
    let summary = fanout.run_report(manila(2, 10, 0)).await.expect("run");

    assert_eq!(summary.teams_failed, 1);
    assert_eq!(summary.teams_reported, 1);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].target, "-2");
    assert!(sent[0].text.contains("$75.00"));
}

#[test]
fn unit_latest_due_between_counts_superseded_instants() {
    let schedule = parse_schedule(DEFAULT_REPORT_CRON).expect("schedule");
    let from = unix_ms_from_utc(manila(2, 8, 0));
    let until = unix_ms_from_utc(manila(2, 14, 30));
    let (due, superseded) = latest_due_between(&schedule, chrono_tz::Asia::Manila, from, until)
        .expect("due")
        .expect("some due instant");
    assert_eq!(due, unix_ms_from_utc(manila(2, 14, 0)));
    assert_eq!(superseded, 2);

    let quiet = latest_due_between(
        &schedule,
        chrono_tz::Asia::Manila,
        unix_ms_from_utc(manila(2, 22, 0)),
        unix_ms_from_utc(manila(2, 23, 59)),
    )
    .expect("due");
    assert!(quiet.is_none());
}

#[test]
fn regression_invalid_cron_is_rejected() {
    let error = parse_schedule("every two hours").expect_err("invalid cron");
    assert!(error.to_string().contains("invalid cron expression"));
}

#[tokio::test]
async fn integration_scheduler_runs_due_instant_once_and_persists_state() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let state_path = tempdir.path().join("state/scheduler.json");
    let desk = open_desk(Arc::new(InMemoryBoardStore::new())).await;
    desk.set_team_destination("1", &ReportTarget::new("-1", None))
        .await
        .expect("destination");
    let transport = Arc::new(RecordingTransport::default());
    let fanout = ReportFanout::new(desk, transport.clone(), fast_retry());
    let mut scheduler = ReportScheduler::new(
        scheduler_config(&state_path, Duration::from_secs(600)),
        fanout.clone(),
    )
    .expect("scheduler");

    let early = scheduler
        .poll_once(unix_ms_from_utc(manila(2, 9, 59)))
        .await
        .expect("early poll");
    assert!(early.ran.is_none());
    assert!(early.due_unix_ms.is_none());

    let due = scheduler
        .poll_once(unix_ms_from_utc(manila(2, 10, 0)) + 30_000)
        .await
        .expect("due poll");
    assert_eq!(due.due_unix_ms, Some(unix_ms_from_utc(manila(2, 10, 0))));
    assert_eq!(due.ran.as_ref().map(|summary| summary.chunks_sent), Some(1));

    let again = scheduler
        .poll_once(unix_ms_from_utc(manila(2, 10, 1)))
        .await
        .expect("repeat poll");
    assert!(again.ran.is_none());
    assert_eq!(transport.sent().len(), 1);

    let raw = std::fs::read_to_string(&state_path).expect("state file");
    let state: serde_json::Value = serde_json::from_str(&raw).expect("state json");
    assert_eq!(state["schema_version"], 1);
    assert_eq!(state["last_summary"]["mode"], "per_team");

    let reopened = ReportScheduler::new(
        scheduler_config(&state_path, Duration::from_secs(600)),
        fanout,
    )
    .expect("reopen");
    assert_eq!(
        reopened.last_run_unix_ms(),
        Some(unix_ms_from_utc(manila(2, 10, 0)) + 30_000)
    );
}

#[tokio::test]
async fn regression_restart_skips_stale_instants_without_backfill() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let state_path = tempdir.path().join("scheduler.json");
    std::fs::write(
        &state_path,
        format!(
            "{{\"schema_version\":1,\"last_run_unix_ms\":{}}}",
            unix_ms_from_utc(manila(2, 8, 0))
        ),
    )
    .expect("seed state");

    let desk = open_desk(Arc::new(InMemoryBoardStore::new())).await;
    desk.set_team_destination("1", &ReportTarget::new("-1", None))
        .await
        .expect("destination");
    let transport = Arc::new(RecordingTransport::default());
    let fanout = ReportFanout::new(desk, transport.clone(), fast_retry());

    let mut strict = ReportScheduler::new(
        scheduler_config(&state_path, Duration::from_secs(600)),
        fanout.clone(),
    )
    .expect("scheduler");
    let skipped = strict
        .poll_once(unix_ms_from_utc(manila(2, 14, 30)))
        .await
        .expect("poll");
    assert!(skipped.ran.is_none());
    assert_eq!(skipped.stale_skipped, 3);
    assert!(transport.sent().is_empty());

    let next = strict
        .poll_once(unix_ms_from_utc(manila(2, 14, 31)))
        .await
        .expect("next poll");
    assert!(next.ran.is_none());
    assert_eq!(next.stale_skipped, 0);
}

#[tokio::test]
async fn functional_recent_instant_within_staleness_bound_still_runs() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let state_path = tempdir.path().join("scheduler.json");
    std::fs::write(
        &state_path,
        format!(
            "{{\"schema_version\":1,\"last_run_unix_ms\":{}}}",
            unix_ms_from_utc(manila(2, 8, 0))
        ),
    )
    .expect("seed state");

    let desk = open_desk(Arc::new(InMemoryBoardStore::new())).await;
    desk.set_team_destination("1", &ReportTarget::new("-1", None))
        .await
        .expect("destination");
    let transport = Arc::new(RecordingTransport::default());
    let fanout = ReportFanout::new(desk, transport.clone(), fast_retry());
    let mut scheduler = ReportScheduler::new(
        scheduler_config(&state_path, Duration::from_secs(3_600)),
        fanout,
    )
    .expect("scheduler");

    let report = scheduler
        .poll_once(unix_ms_from_utc(manila(2, 14, 30)))
        .await
        .expect("poll");
    assert_eq!(report.due_unix_ms, Some(unix_ms_from_utc(manila(2, 14, 0))));
    assert_eq!(report.stale_skipped, 2);
    assert!(report.ran.is_some());
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn regression_unknown_state_schema_is_rejected() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let state_path = tempdir.path().join("scheduler.json");
    std::fs::write(&state_path, "{\"schema_version\":99}").expect("seed state");

    let desk = open_desk(Arc::new(InMemoryBoardStore::new())).await;
    let fanout = ReportFanout::new(desk, Arc::new(RecordingTransport::default()), fast_retry());
    let error = match ReportScheduler::new(
        scheduler_config(&state_path, Duration::from_secs(600)),
        fanout,
    ) {
        Ok(_) => panic!("schema 99 should be rejected"),
        Err(error) => error,
    };
    assert!(error.to_string().contains("unsupported report scheduler state schema"));
}
