use std::path::PathBuf;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand, ValueEnum};

use goalboard_delivery::DeliveryMode;
use goalboard_engine::{OverrideScope, DEFAULT_SAFETY_MARGIN, TELEGRAM_MAX_CHARS};
use goalboard_scheduler::DEFAULT_REPORT_CRON;
use goalboard_types::CycleKind;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u32(value: &str) -> Result<u32, String> {
    let parsed = value
        .parse::<u32>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_timezone(value: &str) -> Result<Tz, String> {
    value
        .trim()
        .parse::<Tz>()
        .map_err(|error| format!("invalid IANA time zone '{value}': {error}"))
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|error| format!("expected an RFC 3339 timestamp: {error}"))
}

#[derive(Debug, Parser)]
#[command(
    name = "goalboard",
    about = "Sales ledger goal tracking with scheduled chat reports",
    version
)]
pub struct Cli {
    #[arg(
        long = "db-path",
        env = "GOALBOARD_DB_PATH",
        default_value = ".goalboard/goalboard.sqlite3",
        help = "SQLite database holding sales, goals, teams and destinations"
    )]
    pub db_path: PathBuf,

    #[arg(
        long,
        env = "GOALBOARD_TIMEZONE",
        default_value = "Asia/Manila",
        value_parser = parse_timezone,
        help = "IANA time zone for shift boundaries, civil days and the report schedule"
    )]
    pub timezone: Tz,

    #[arg(
        long,
        env = "GOALBOARD_CATALOG",
        help = "Optional TOML page catalog replacing the built-in one"
    )]
    pub catalog: Option<PathBuf>,

    #[arg(
        long = "chunk-ceiling",
        env = "GOALBOARD_CHUNK_CEILING",
        default_value_t = TELEGRAM_MAX_CHARS,
        value_parser = parse_positive_usize,
        help = "Hard per-message character ceiling for delivered reports"
    )]
    pub chunk_ceiling: usize,

    #[arg(
        long = "chunk-safety-margin",
        env = "GOALBOARD_CHUNK_SAFETY_MARGIN",
        default_value_t = DEFAULT_SAFETY_MARGIN,
        value_parser = parse_positive_usize,
        help = "Greedy row packing stops before a message reaches this many characters"
    )]
    pub chunk_safety_margin: usize,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliDeliveryMode {
    DryRun,
    Telegram,
}

impl From<CliDeliveryMode> for DeliveryMode {
    fn from(value: CliDeliveryMode) -> Self {
        match value {
            CliDeliveryMode::DryRun => DeliveryMode::DryRun,
            CliDeliveryMode::Telegram => DeliveryMode::Telegram,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliCycle {
    Shift,
    Period,
}

impl From<CliCycle> for CycleKind {
    fn from(value: CliCycle) -> Self {
        match value {
            CliCycle::Shift => CycleKind::Shift,
            CliCycle::Period => CycleKind::Period,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliOverrideScope {
    Shift,
    Period,
    Both,
}

impl From<CliOverrideScope> for OverrideScope {
    fn from(value: CliOverrideScope) -> Self {
        match value {
            CliOverrideScope::Shift => OverrideScope::Shift,
            CliOverrideScope::Period => OverrideScope::Period,
            CliOverrideScope::Both => OverrideScope::Both,
        }
    }
}

/// Transport selection and retry flags shared by `serve` and `run-once`.
#[derive(Debug, Args)]
pub struct CliDeliveryFlags {
    #[arg(
        long = "delivery-mode",
        env = "GOALBOARD_DELIVERY_MODE",
        value_enum,
        default_value = "dry-run",
        help = "dry-run logs reports; telegram posts them through the Bot API"
    )]
    pub delivery_mode: CliDeliveryMode,

    #[arg(
        long = "telegram-api-base",
        env = "GOALBOARD_TELEGRAM_API_BASE",
        default_value = "https://api.telegram.org",
        help = "Base URL for the Telegram Bot API"
    )]
    pub telegram_api_base: String,

    #[arg(
        long = "telegram-bot-token",
        env = "TELEGRAM_BOT_TOKEN",
        hide_env_values = true,
        help = "Bot token used when --delivery-mode=telegram"
    )]
    pub telegram_bot_token: Option<String>,

    #[arg(
        long = "http-timeout-ms",
        env = "GOALBOARD_HTTP_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Per-request timeout for outbound delivery"
    )]
    pub http_timeout_ms: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "GOALBOARD_RETRY_MAX_ATTEMPTS",
        default_value_t = 2,
        value_parser = parse_positive_u32,
        help = "Send attempts per chunk, counting the first; only rate-limited sends are retried"
    )]
    pub retry_max_attempts: u32,

    #[arg(
        long = "retry-max-wait-seconds",
        env = "GOALBOARD_RETRY_MAX_WAIT_SECONDS",
        default_value_t = 60,
        help = "Upper bound on a provider-advised rate-limit wait"
    )]
    pub retry_max_wait_seconds: u64,
}

#[derive(Debug, Args)]
pub struct CliScheduleFlags {
    #[arg(
        long,
        env = "GOALBOARD_CRON",
        default_value = DEFAULT_REPORT_CRON,
        help = "Six-field cron expression (sec min hour dom month dow) in --timezone"
    )]
    pub cron: String,

    #[arg(
        long = "state-path",
        env = "GOALBOARD_STATE_PATH",
        default_value = ".goalboard/scheduler-state.json",
        help = "Scheduler state file recording the last report run"
    )]
    pub state_path: PathBuf,

    #[arg(
        long = "poll-interval-ms",
        env = "GOALBOARD_POLL_INTERVAL_MS",
        default_value_t = 15_000,
        value_parser = parse_positive_u64,
        help = "Scheduler poll interval"
    )]
    pub poll_interval_ms: u64,

    #[arg(
        long = "stale-after-seconds",
        env = "GOALBOARD_STALE_AFTER_SECONDS",
        default_value_t = 900,
        help = "Skip a due report older than this; 0 disables the check"
    )]
    pub stale_after_seconds: u64,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the fixed-time report scheduler until ctrl-c.
    Serve {
        #[command(flatten)]
        delivery: CliDeliveryFlags,
        #[command(flatten)]
        schedule: CliScheduleFlags,
    },
    /// Deliver one report run immediately.
    RunOnce {
        #[command(flatten)]
        delivery: CliDeliveryFlags,
    },
    /// Record a sale for a team.
    Record {
        team: String,
        page: String,
        amount: String,
        #[arg(long, value_parser = parse_instant, help = "Sale instant (RFC 3339); defaults to now")]
        at: Option<DateTime<Utc>>,
    },
    /// Print the current shift report.
    Goalboard { team: String },
    /// Print the rolling 15 or 30 day quota report.
    Quota {
        team: String,
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Print the rolling period summary as JSON.
    Summary {
        team: String,
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Print lifetime totals ranked by amount.
    Leaderboard { team: String },
    /// Print current-shift pages below 31 percent of goal.
    RedPages { team: String },
    /// Set goals from `PAGE AMOUNT` entries.
    SetGoals {
        team: String,
        #[arg(long, value_enum, default_value = "shift")]
        cycle: CliCycle,
        #[arg(required = true, num_args = 1.., help = "Entries such as \"#autumnpaid 500\"")]
        entries: Vec<String>,
    },
    Goals {
        #[arg(long, value_enum, default_value = "shift")]
        cycle: CliCycle,
    },
    ClearGoals {
        #[arg(long, value_enum)]
        cycle: CliCycle,
    },
    /// Replace a page's computed total with a manual value; 0 removes it.
    SetOverride {
        team: String,
        page: String,
        amount: String,
        #[arg(long, value_enum, default_value = "both")]
        scope: CliOverrideScope,
    },
    ClearOverride {
        page: String,
        #[arg(long, value_enum)]
        cycle: CliCycle,
    },
    /// Delete the team's sales for the current civil day.
    ResetDaily { team: String },
    RegisterTeam { team: String },
    /// Remove a team with its destination and known pages. Sales are kept.
    RemoveTeam { team: String },
    ListTeams,
    SetDestination {
        team: String,
        channel_id: String,
        #[arg(long = "thread-id")]
        thread_id: Option<i64>,
    },
    Destinations,
    /// Send every team's report to one chat instead of per-team chats.
    SetGlobalDestination {
        channel_id: String,
        #[arg(long = "thread-id")]
        thread_id: Option<i64>,
    },
    ClearGlobalDestination,
    /// List catalog tags and their pages.
    Pages,
}
