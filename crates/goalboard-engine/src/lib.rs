//! Sales aggregation, goal evaluation and report building for goalboard.
//!
//! Resolves raw page tokens against a catalog, computes shift and rolling
//! windows, layers overrides on ledger totals, classifies progress against
//! goals and renders size-bounded report parts.

pub mod aggregate;
pub mod catalog;
pub mod desk;
pub mod evaluate;
pub mod goal_book;
pub mod paginate;
pub mod render;
pub mod window;

pub use aggregate::{apply_overrides, rank, Aggregator};
pub use catalog::{clean, CatalogError, PageCatalog, ResolveMode};
pub use desk::{
    canonical_team_name, parse_amount, AppliedGoal, BulkGoalOutcome, DeskError, DeskResult,
    OverrideScope, PeriodSummary, RecordedSale, RedPages, RejectedEntry, SalesDesk, SummaryRow,
    MAX_AMOUNT,
};
pub use evaluate::{
    checked_total, evaluate, percent_of, PageEvaluation, Tier, TotalOverflow, NO_GOAL_MARKER,
    RED_PAGE_THRESHOLD,
};
pub use goal_book::GoalBook;
pub use paginate::{
    paginate, ChunkLimits, ReportPage, DEFAULT_SAFETY_MARGIN, EMPTY_REPORT_NOTICE,
    TELEGRAM_MAX_CHARS,
};
pub use render::{format_amount, format_percent, render_report, RenderedReport, ReportKind};
pub use window::{
    QuotaPeriod, Shift, ShiftWindow, WindowCalculator, WindowError, DEFAULT_TIMEZONE,
};
