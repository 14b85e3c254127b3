use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use httpmock::prelude::*;
use rust_decimal::Decimal;
use serde_json::json;

use goalboard_delivery::{
    build_transport, DeliveryConfig, DeliveryMode, RetryPolicy, TelegramTransport,
};
use goalboard_engine::{ChunkLimits, PageCatalog, SalesDesk, Tier, WindowCalculator};
use goalboard_scheduler::{FanoutMode, ReportFanout};
use goalboard_store::SqliteBoardStore;
use goalboard_types::{CycleKind, ReportTarget};

fn manila(d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    chrono_tz::Asia::Manila
        .with_ymd_and_hms(2025, 6, d, h, mi, 0)
        .single()
        .expect("local time")
        .with_timezone(&Utc)
}

async fn open_desk(db_path: &std::path::Path, limits: ChunkLimits) -> Arc<SalesDesk> {
    let store = SqliteBoardStore::new(db_path).expect("sqlite store");
    Arc::new(
        SalesDesk::open(
            Arc::new(store),
            PageCatalog::builtin().expect("builtin catalog"),
            WindowCalculator::default(),
            limits,
        )
        .await
        .expect("desk"),
    )
}

#[tokio::test]
async fn integration_shift_sales_roll_up_against_shift_goal() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let desk = open_desk(&tempdir.path().join("board.sqlite3"), ChunkLimits::default()).await;

    desk.record_sale("1", "#autumnpaid", "150", manila(2, 9, 0))
        .await
        .expect("first sale");
    desk.record_sale("Team 1", "#autumnpaid nice one", "$50", manila(2, 15, 0))
        .await
        .expect("second sale");
    let outcome = desk
        .set_goals("1", CycleKind::Shift, "Autumn Paid 500")
        .await
        .expect("goal");
    assert_eq!(outcome.applied.len(), 1);
    assert!(outcome.rejected.is_empty());

    let report = desk
        .shift_report("1", manila(2, 15, 30))
        .await
        .expect("shift report");
    assert_eq!(report.rows.len(), 1);
    assert!(report.rows[0].contains("Autumn Paid"));
    assert!(report.rows[0].contains("$200.00"));
    assert!(report.rows[0].contains("40.0%"));
    assert!(report.rows[0].starts_with(Tier::Mid.marker()));

    let red = desk.red_pages("1", manila(2, 15, 30)).await.expect("red pages");
    assert!(red.pages.is_empty());

    // A 16:00 report belongs to the next shift and starts from zero.
    let closing = desk
        .shift_report("1", manila(2, 16, 0))
        .await
        .expect("closing report");
    assert!(closing.rows[0].contains("$0.00"));
    let red = desk.red_pages("1", manila(2, 16, 0)).await.expect("red pages");
    assert_eq!(red.pages.len(), 1);
    assert_eq!(red.pages[0].total, Decimal::ZERO);
}

#[tokio::test]
async fn integration_global_destination_fans_out_every_team_over_telegram() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let desk = open_desk(&tempdir.path().join("board.sqlite3"), ChunkLimits::default()).await;
    desk.register_team("1").await.expect("team 1");
    desk.register_team("2").await.expect("team 2");
    desk.set_team_destination("1", &ReportTarget::new("-1001", None))
        .await
        .expect("team destination");
    desk.set_global_destination(&ReportTarget::new("-1009", Some(5)))
        .await
        .expect("global destination");
    desk.record_sale("1", "#autumnpaid", "150", manila(2, 9, 0))
        .await
        .expect("sale");

    let server = MockServer::start();
    let global = server.mock(|when, then| {
        when.method(POST)
            .path("/bottoken/sendMessage")
            .json_body_includes(json!({"chat_id": "-1009", "message_thread_id": 5}).to_string());
        then.status(200)
            .json_body(json!({"ok": true, "result": {"message_id": 11}}));
    });
    let per_team = server.mock(|when, then| {
        when.method(POST)
            .path("/bottoken/sendMessage")
            .json_body_includes(json!({"chat_id": "-1001"}).to_string());
        then.status(200)
            .json_body(json!({"ok": true, "result": {"message_id": 12}}));
    });

    let transport = build_transport(&DeliveryConfig {
        mode: DeliveryMode::Telegram,
        http_timeout_ms: 2_000,
        telegram_api_base: server.base_url(),
        telegram_bot_token: Some("token".to_string()),
    })
    .expect("transport");
    let fanout = ReportFanout::new(desk, transport, RetryPolicy::default());
    let summary = fanout.run_report(manila(2, 10, 0)).await.expect("run");

    assert_eq!(summary.mode, FanoutMode::Global);
    assert_eq!(summary.chunks_sent, 2);
    assert_eq!(summary.chunks_failed, 0);
    global.assert_calls(2);
    per_team.assert_calls(0);
}

#[tokio::test]
async fn integration_rate_limited_report_is_sent_after_advised_wait() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let desk = open_desk(&tempdir.path().join("board.sqlite3"), ChunkLimits::default()).await;
    desk.set_team_destination("1", &ReportTarget::new("-1001", None))
        .await
        .expect("destination");

    let server = MockServer::start();
    let mut limited = server.mock(|when, then| {
        when.method(POST).path("/bottoken/sendMessage");
        then.status(429)
            .json_body(json!({"ok": false, "parameters": {"retry_after": 0}}));
    });

    let transport = Arc::new(
        TelegramTransport::new(&DeliveryConfig {
            mode: DeliveryMode::Telegram,
            http_timeout_ms: 2_000,
            telegram_api_base: server.base_url(),
            telegram_bot_token: Some("token".to_string()),
        })
        .expect("transport"),
    );
    let fanout = ReportFanout::new(
        desk,
        transport,
        RetryPolicy::new(2, Duration::from_millis(10)).expect("policy"),
    );
    let summary = fanout.run_report(manila(2, 10, 0)).await.expect("run");
    limited.assert_calls(2);
    assert_eq!(summary.chunks_failed, 1);
    limited.delete();

    let sent = server.mock(|when, then| {
        when.method(POST).path("/bottoken/sendMessage");
        then.status(200)
            .json_body(json!({"ok": true, "result": {"message_id": 3}}));
    });
    let summary = fanout.run_report(manila(2, 12, 0)).await.expect("second run");
    sent.assert_calls(1);
    assert_eq!(summary.chunks_sent, 1);
}

#[tokio::test]
async fn integration_large_report_is_split_without_breaking_rows() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let limits = ChunkLimits {
        ceiling: 700,
        safety_margin: 600,
    };
    let desk = open_desk(&tempdir.path().join("board.sqlite3"), limits).await;
    let entries = (1..=24)
        .map(|index| format!("Page {index:02} {}", index * 100))
        .collect::<Vec<_>>()
        .join("\n");
    let outcome = desk
        .set_goals("1", CycleKind::Shift, &entries)
        .await
        .expect("goals");
    assert_eq!(outcome.applied.len(), 24);

    let now = manila(2, 10, 0);
    let report = desk.shift_report("1", now).await.expect("report");
    let pages = desk.goalboard("1", now).await.expect("pages");

    assert!(pages.len() > 1);
    assert!(pages
        .iter()
        .all(|page| page.text.chars().count() <= limits.ceiling));
    assert!(pages[0].text.contains("GOALBOARD"));
    assert!(pages[1].text.contains(&format!("(Part 2/{})", pages.len())));
    let rows = pages
        .iter()
        .flat_map(|page| page.rows.iter().cloned())
        .collect::<Vec<_>>();
    assert_eq!(rows, report.rows);
}
