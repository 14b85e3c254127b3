//! Sales desk: the operation surface used by chat commands and the CLI.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use goalboard_store::{
    BoardStore, GoalStore, SalesLedger, StoreError, StoreResult, TeamDestination,
};
use goalboard_types::{
    CycleKind, GoalKey, PageName, ReportTarget, SaleEvent, SaleEventError, TimeWindow,
};

use crate::aggregate::{compare_ranked, rank, Aggregator};
use crate::catalog::{clean, PageCatalog, ResolveMode};
use crate::evaluate::{
    checked_total, evaluate, percent_of, round_display, PageEvaluation, TotalOverflow,
};
use crate::goal_book::GoalBook;
use crate::paginate::{paginate, ChunkLimits, ReportPage};
use crate::render::{render_report, RenderedReport, ReportKind};
use crate::window::{QuotaPeriod, ShiftWindow, WindowCalculator, WindowError};


#[derive(Debug, Error)]
pub enum DeskError {
    #[error("unknown page '{0}'")]
    UnknownPage(String),
    #[error("invalid amount '{0}'")]
    InvalidAmount(String),
    #[error("expected 'PAGE AMOUNT', got '{0}'")]
    MalformedEntry(String),
    #[error("team name must be non-empty")]
    EmptyTeam,
    #[error("team '{0}' is not registered")]
    UnknownTeam(String),
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    InvalidSale(#[from] SaleEventError),
    #[error(transparent)]
    Overflow(#[from] TotalOverflow),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub type DeskResult<T> = Result<T, DeskError>;

/// Which override cycles a manual edit touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideScope {
    Shift,
    Period,
    /// Goalboard edits set the shift and the period override together.
    Both,
}

impl OverrideScope {
    pub fn cycles(self) -> &'static [CycleKind] {
        match self {
            Self::Shift => &[CycleKind::Shift],
            Self::Period => &[CycleKind::Period],
            Self::Both => &CycleKind::ALL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedSale {
    pub team: String,
    pub page: PageName,
    pub amount: Decimal,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedGoal {
    pub page: PageName,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedEntry {
    pub entry: String,
    pub reason: String,
}

/// Partial-success result of a bulk goal command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkGoalOutcome {
    pub applied: Vec<AppliedGoal>,
    pub rejected: Vec<RejectedEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedPages {
    pub shift: ShiftWindow,
    pub pages: Vec<PageEvaluation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub page: PageName,
    #[serde(with = "rust_decimal::serde::float")]
    pub sales: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub goal: Decimal,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub pct: Option<Decimal>,
}

/// Rolling-period summary for machine consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub team: String,
    pub days: u32,
    pub from: String,
    pub to: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_sales: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_goal: Decimal,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub overall_pct: Option<Decimal>,
    pub rows: Vec<SummaryRow>,
}

pub struct SalesDesk {
    store: Arc<dyn BoardStore>,
    catalog: Arc<PageCatalog>,
    book: Arc<GoalBook>,
    aggregator: Aggregator,
    windows: WindowCalculator,
    limits: ChunkLimits,
}

impl SalesDesk {
    /// Opens a desk over `store`, loading goals and overrides into memory.
    pub async fn open<S>(
        store: Arc<S>,
        catalog: PageCatalog,
        windows: WindowCalculator,
        limits: ChunkLimits,
    ) -> StoreResult<Self>
    where
        S: BoardStore + 'static,
    {
        let goal_store: Arc<dyn GoalStore> = store.clone();
        let ledger: Arc<dyn SalesLedger> = store.clone();
        let book = Arc::new(GoalBook::load(goal_store).await?);
        Ok(Self {
            store,
            catalog: Arc::new(catalog),
            aggregator: Aggregator::new(ledger, book.clone()),
            book,
            windows,
            limits,
        })
    }

    pub fn windows(&self) -> &WindowCalculator {
        &self.windows
    }

    pub fn catalog(&self) -> &PageCatalog {
        &self.catalog
    }

    pub async fn record_sale(
        &self,
        team: &str,
        raw_page: &str,
        raw_amount: &str,
        at: DateTime<Utc>,
    ) -> DeskResult<RecordedSale> {
        let page = self
            .catalog
            .resolve(raw_page, ResolveMode::Strict)
            .ok_or_else(|| DeskError::UnknownPage(first_token(raw_page)))?;
        let amount = parse_amount(raw_amount)?;
        let event = SaleEvent::new(canonical_team_name(team)?, page.clone(), amount, at)?;
        let team = event.team().to_string();

        self.store.append(event).await?;
        // Ledger pages still reach reports through distinct_pages.
        if let Err(error) = self.store.add_team_page(&team, &page).await {
            warn!(team = %team, page = %page, error = %error, "failed to index team page");
        }
        info!(team = %team, page = %page, amount = %amount, "sale recorded");
        Ok(RecordedSale {
            team,
            page,
            amount,
            at,
        })
    }

    /// Applies `PAGE AMOUNT` entries separated by commas or newlines.
    ///
    /// Malformed entries are collected as rejections; a storage failure
    /// aborts the command.
    pub async fn set_goals(
        &self,
        team: &str,
        cycle: CycleKind,
        raw_entries: &str,
    ) -> DeskResult<BulkGoalOutcome> {
        let team = canonical_team_name(team)?;
        let mut outcome = BulkGoalOutcome::default();
        for entry in raw_entries
            .split([',', '\n'])
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
        {
            match self.parse_goal_entry(entry) {
                Ok((page, amount)) => {
                    self.book
                        .set_goal(GoalKey::new(page.clone(), cycle), amount)
                        .await?;
                    self.store.add_team_page(&team, &page).await?;
                    outcome.applied.push(AppliedGoal { page, amount });
                }
                Err(error) => outcome.rejected.push(RejectedEntry {
                    entry: entry.to_string(),
                    reason: error.to_string(),
                }),
            }
        }
        info!(
            team = %team,
            cycle = %cycle,
            applied = outcome.applied.len(),
            rejected = outcome.rejected.len(),
            "goals updated"
        );
        Ok(outcome)
    }

    fn parse_goal_entry(&self, entry: &str) -> DeskResult<(PageName, Decimal)> {
        let (raw_page, raw_amount) = split_page_amount(entry)?;
        let amount = parse_amount(raw_amount)?;
        let page = self
            .catalog
            .resolve(&raw_page, ResolveMode::Lenient)
            .ok_or(DeskError::UnknownPage(raw_page))?;
        Ok((page, amount))
    }

    pub async fn goals(&self, cycle: CycleKind) -> BTreeMap<PageName, Decimal> {
        self.book.goals_for(cycle).await
    }

    pub async fn clear_goals(&self, cycle: CycleKind) -> DeskResult<usize> {
        let removed = self.book.clear_goals(cycle).await?;
        info!(cycle = %cycle, removed, "goals cleared");
        Ok(removed)
    }

    pub async fn set_override(
        &self,
        team: &str,
        raw_page: &str,
        raw_amount: &str,
        scope: OverrideScope,
    ) -> DeskResult<AppliedGoal> {
        let team = canonical_team_name(team)?;
        let page = self
            .catalog
            .resolve(raw_page, ResolveMode::Lenient)
            .ok_or_else(|| DeskError::UnknownPage(first_token(raw_page)))?;
        let amount = parse_amount(raw_amount)?;
        for cycle in scope.cycles() {
            self.book
                .set_override(GoalKey::new(page.clone(), *cycle), amount)
                .await?;
        }
        self.store.add_team_page(&team, &page).await?;
        info!(team = %team, page = %page, amount = %amount, ?scope, "override set");
        Ok(AppliedGoal { page, amount })
    }

    /// Returns the resolved page and whether an override existed.
    pub async fn clear_override(
        &self,
        raw_page: &str,
        cycle: CycleKind,
    ) -> DeskResult<(PageName, bool)> {
        let page = self
            .catalog
            .resolve(raw_page, ResolveMode::Lenient)
            .ok_or_else(|| DeskError::UnknownPage(first_token(raw_page)))?;
        let removed = self
            .book
            .clear_override(&GoalKey::new(page.clone(), cycle))
            .await?;
        info!(page = %page, cycle = %cycle, removed, "override cleared");
        Ok((page, removed))
    }

    /// Deletes the team's sales from local midnight up to `now`.
    pub async fn reset_daily(&self, team: &str, now: DateTime<Utc>) -> DeskResult<usize> {
        let team = canonical_team_name(team)?;
        let window = self.windows.civil_day_window(now);
        let removed = self
            .store
            .delete_range(&team, window.start, window.end)
            .await?;
        info!(team = %team, removed, "daily sales reset");
        Ok(removed)
    }

    /// Lifetime per-page totals, ranked. Overrides do not apply.
    pub async fn leaderboard(
        &self,
        team: &str,
        now: DateTime<Utc>,
    ) -> DeskResult<Vec<(PageName, Decimal)>> {
        let team = canonical_team_name(team)?;
        let totals = self
            .store
            .sum_by_page(&team, &TimeWindow::until(now))
            .await?;
        Ok(rank(&totals))
    }

    /// Shift pages with a goal and less than 31 percent progress, by name.
    pub async fn red_pages(&self, team: &str, now: DateTime<Utc>) -> DeskResult<RedPages> {
        let team = canonical_team_name(team)?;
        let shift = self.windows.shift_window(now);
        let mut pages = self
            .evaluate_team(&team, &shift.window, CycleKind::Shift)
            .await?
            .into_iter()
            .filter(PageEvaluation::is_red)
            .collect::<Vec<_>>();
        pages.sort_by(|left, right| left.page.cmp(&right.page));
        Ok(RedPages { shift, pages })
    }

    pub async fn shift_report(&self, team: &str, now: DateTime<Utc>) -> DeskResult<RenderedReport> {
        let team = canonical_team_name(team)?;
        let shift = self.windows.shift_window(now);
        let evaluations = self
            .evaluate_team(&team, &shift.window, CycleKind::Shift)
            .await?;
        debug!(team = %team, shift = %shift.shift, rows = evaluations.len(), "shift report built");
        Ok(render_report(
            &team,
            ReportKind::Shift(shift.shift),
            &shift.window,
            &evaluations,
            &self.windows,
        )?)
    }

    /// Current shift report split into transport-safe parts.
    pub async fn goalboard(&self, team: &str, now: DateTime<Utc>) -> DeskResult<Vec<ReportPage>> {
        let report = self.shift_report(team, now).await?;
        Ok(paginate(&report, self.limits))
    }

    /// Rolling 15 or 30 day report against period goals and overrides.
    pub async fn quota(
        &self,
        team: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> DeskResult<Vec<ReportPage>> {
        let period = QuotaPeriod::from_days(days)?;
        let team = canonical_team_name(team)?;
        let window = self.windows.rolling_window(now, period);
        let evaluations = self
            .evaluate_team(&team, &window, CycleKind::Period)
            .await?;
        let report = render_report(
            &team,
            ReportKind::Quota(period),
            &window,
            &evaluations,
            &self.windows,
        )?;
        Ok(paginate(&report, self.limits))
    }

    pub async fn summary(
        &self,
        team: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> DeskResult<PeriodSummary> {
        let period = QuotaPeriod::from_days(days)?;
        let team = canonical_team_name(team)?;
        let window = self.windows.rolling_window(now, period);
        let evaluations = self
            .evaluate_team(&team, &window, CycleKind::Period)
            .await?;

        let total_sales = checked_total(evaluations.iter().map(|row| row.total))?;
        let total_goal =
            checked_total(evaluations.iter().map(|row| row.goal.unwrap_or_default()))?;
        let rows = evaluations
            .into_iter()
            .map(|row| SummaryRow {
                page: row.page,
                sales: round_display(row.total, 2),
                goal: round_display(row.goal.unwrap_or_default(), 2),
                pct: row.percent.map(|pct| round_display(pct, 1)),
            })
            .collect();

        let timezone = self.windows.timezone();
        Ok(PeriodSummary {
            team,
            days: period.days(),
            from: window.start.with_timezone(&timezone).to_rfc3339(),
            to: window.end.with_timezone(&timezone).to_rfc3339(),
            total_sales: round_display(total_sales, 2),
            total_goal: round_display(total_goal, 2),
            overall_pct: percent_of(total_sales, total_goal).map(|pct| round_display(pct, 1)),
            rows,
        })
    }

    /// Rows for `team`: its known pages, pages active in the window and
    /// pages carrying a goal for `cycle`, ranked.
    async fn evaluate_team(
        &self,
        team: &str,
        window: &TimeWindow,
        cycle: CycleKind,
    ) -> DeskResult<Vec<PageEvaluation>> {
        let totals = self.aggregator.aggregate(team, window, cycle).await?;
        let goals = self.book.goals_for(cycle).await;

        let mut pages: BTreeSet<PageName> = self.store.team_pages(team).await?;
        pages.extend(self.store.distinct_pages(team).await?);
        pages.extend(totals.keys().cloned());
        pages.extend(goals.keys().cloned());

        let mut evaluations = pages
            .into_iter()
            .map(|page| {
                let total = totals.get(&page).copied().unwrap_or_default();
                let goal = goals.get(&page).copied();
                evaluate(page, total, goal)
            })
            .collect::<Vec<_>>();
        evaluations.sort_by(|left, right| {
            compare_ranked(left.total, &left.page, right.total, &right.page)
        });
        Ok(evaluations)
    }

    pub async fn register_team(&self, raw_team: &str) -> DeskResult<String> {
        let team = canonical_team_name(raw_team)?;
        self.store.register_team(&team).await?;
        info!(team = %team, "team registered");
        Ok(team)
    }

    /// Removes a registered team matched case-insensitively. Sales are kept.
    pub async fn remove_team(&self, raw_team: &str) -> DeskResult<String> {
        let wanted = canonical_team_name(raw_team)?;
        let team = self
            .store
            .list_teams()
            .await?
            .into_iter()
            .find(|name| name.eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| DeskError::UnknownTeam(wanted.clone()))?;
        self.store.remove_team(&team).await?;
        info!(team = %team, "team removed");
        Ok(team)
    }

    pub async fn list_teams(&self) -> DeskResult<Vec<String>> {
        Ok(self.store.list_teams().await?)
    }

    pub async fn set_team_destination(
        &self,
        raw_team: &str,
        target: &ReportTarget,
    ) -> DeskResult<String> {
        let team = canonical_team_name(raw_team)?;
        self.store.set_team_destination(&team, target).await?;
        info!(team = %team, target = %target.label(), "team destination set");
        Ok(team)
    }

    pub async fn team_destinations(&self) -> DeskResult<Vec<TeamDestination>> {
        Ok(self.store.team_destinations().await?)
    }

    pub async fn set_global_destination(&self, target: &ReportTarget) -> DeskResult<()> {
        self.store.set_global_destination(target).await?;
        info!(target = %target.label(), "global destination set");
        Ok(())
    }

    pub async fn clear_global_destination(&self) -> DeskResult<bool> {
        Ok(self.store.clear_global_destination().await?)
    }

    pub async fn global_destination(&self) -> DeskResult<Option<ReportTarget>> {
        Ok(self.store.global_destination().await?)
    }

    /// Catalog tags with their canonical page, ordered by tag.
    pub fn pages(&self) -> Vec<(String, PageName)> {
        self.catalog.aliases()
    }
}

/// Cleans a team name; a bare number `N` means `Team N`.
pub fn canonical_team_name(raw: &str) -> DeskResult<String> {
    let cleaned = clean(raw);
    if cleaned.is_empty() {
        return Err(DeskError::EmptyTeam);
    }
    if cleaned.chars().all(|ch| ch.is_ascii_digit()) {
        return Ok(format!("Team {cleaned}"));
    }
    Ok(cleaned)
}

/// Largest amount a single sale, goal or override may carry.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// Parses a non-negative amount up to [`MAX_AMOUNT`] with an optional leading `$`.
pub fn parse_amount(raw: &str) -> DeskResult<Decimal> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('$').unwrap_or(trimmed);
    match Decimal::from_str(digits) {
        Ok(amount)
            if (!amount.is_sign_negative() || amount.is_zero()) && amount <= MAX_AMOUNT =>
        {
            Ok(amount.normalize())
        }
        _ => Err(DeskError::InvalidAmount(trimmed.to_string())),
    }
}

fn split_page_amount(entry: &str) -> DeskResult<(String, &str)> {
    let parts = entry.split_whitespace().collect::<Vec<_>>();
    match parts.split_last() {
        Some((amount, page)) if !page.is_empty() => Ok((page.join(" "), amount)),
        _ => Err(DeskError::MalformedEntry(entry.to_string())),
    }
}

fn first_token(raw: &str) -> String {
    raw.split_whitespace().next().unwrap_or_default().to_string()
}
