//! Report header and fixed-width table rendering.

use rust_decimal::Decimal;

use goalboard_types::TimeWindow;

use crate::evaluate::{checked_total, round_display, PageEvaluation, TotalOverflow};
use crate::window::{QuotaPeriod, Shift, WindowCalculator};

pub const PAGE_WIDTH: usize = 26;
pub const SALES_WIDTH: usize = 10;
pub const GOAL_WIDTH: usize = 10;
pub const PERCENT_WIDTH: usize = 7;
const MARKER_COLUMN: usize = 3;
const ELLIPSIS: char = '…';

/// What a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Shift(Shift),
    Quota(QuotaPeriod),
}

impl ReportKind {
    fn title(self, team: &str) -> String {
        match self {
            Self::Shift(_) => format!("🎯 GOALBOARD — {team}"),
            Self::Quota(period) => format!("📊 {} — {team}", period.title()),
        }
    }
}

/// A rendered report before pagination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    /// First header line, reused by continuation parts.
    pub title: String,
    /// Full header block, without a trailing newline.
    pub header: String,
    /// Column titles and the dash separator.
    pub table_head: [String; 2],
    pub rows: Vec<String>,
}

/// Renders `evaluations` in the given order.
pub fn render_report(
    team: &str,
    kind: ReportKind,
    window: &TimeWindow,
    evaluations: &[PageEvaluation],
    calculator: &WindowCalculator,
) -> Result<RenderedReport, TotalOverflow> {
    let title = kind.title(team);
    let total = checked_total(evaluations.iter().map(|evaluation| evaluation.total))?;

    let header = match kind {
        ReportKind::Shift(shift) => [
            title.clone(),
            format!("🕒 Shift: {}", shift.label()),
            format!("✅ Shift started: {}", calculator.format_local(window.start)),
            format!("📌 Updated: {}", calculator.format_local(window.end)),
            format!("💰 Shift Total: {}", format_amount(total)),
        ]
        .join("\n"),
        ReportKind::Quota(_) => [
            title.clone(),
            format!("🗓️ From: {}", calculator.format_local(window.start)),
            format!("🗓️ To:   {}", calculator.format_local(window.end)),
            format!("💰 Period Total: {}", format_amount(total)),
        ]
        .join("\n"),
    };

    Ok(RenderedReport {
        title,
        header,
        table_head: table_head(),
        rows: evaluations.iter().map(render_row).collect(),
    })
}

pub fn table_head() -> [String; 2] {
    let titles = format!(
        "{}{:<page$} {:>sales$} {:>goal$} {:>pct$}",
        " ".repeat(MARKER_COLUMN),
        "PAGE",
        "SALES",
        "GOAL",
        "%",
        page = PAGE_WIDTH,
        sales = SALES_WIDTH,
        goal = GOAL_WIDTH,
        pct = PERCENT_WIDTH,
    );
    let separator =
        "-".repeat(MARKER_COLUMN + PAGE_WIDTH + 1 + SALES_WIDTH + 1 + GOAL_WIDTH + 1 + PERCENT_WIDTH);
    [titles, separator]
}

pub fn render_row(evaluation: &PageEvaluation) -> String {
    let goal = evaluation
        .goal
        .map(format_amount)
        .unwrap_or_default();
    let percent = evaluation
        .percent
        .map(format_percent)
        .unwrap_or_default();
    format!(
        "{} {} {:>sales$} {:>goal_w$} {:>pct$}",
        evaluation.marker(),
        fit_column(evaluation.page.as_str(), PAGE_WIDTH),
        format_amount(evaluation.total),
        goal,
        percent,
        sales = SALES_WIDTH,
        goal_w = GOAL_WIDTH,
        pct = PERCENT_WIDTH,
    )
}

/// `$1234.50`
pub fn format_amount(amount: Decimal) -> String {
    format!("${:.2}", round_display(amount, 2))
}

/// `40.0%`
pub fn format_percent(percent: Decimal) -> String {
    format!("{:.1}%", round_display(percent, 1))
}

/// Pads to `width` chars, or cuts to `width - 1` chars plus an ellipsis.
pub fn fit_column(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return format!("{value:<width$}");
    }
    let mut fitted = value
        .chars()
        .take(width.saturating_sub(1))
        .collect::<String>();
    fitted.push(ELLIPSIS);
    fitted
}
