//! Ledger, goal and team-directory store abstractions with in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;

pub use goalboard_types::{
    CycleKind, GoalKey, PageName, ReportTarget, SaleEvent, SaleEventError, TeamDestination,
    TimeWindow,
};
pub use sqlite::SqliteBoardStore;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error("team name must be non-empty")]
    EmptyTeam,
    #[error("sales total for page '{page}' overflowed")]
    TotalOverflow { page: String },
    #[error(transparent)]
    InvalidEvent(#[from] SaleEventError),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Adds `amount` to the page's running total, failing instead of overflowing.
pub(crate) fn accumulate_total(
    totals: &mut BTreeMap<PageName, Decimal>,
    page: PageName,
    amount: Decimal,
) -> StoreResult<()> {
    let current = totals.get(&page).copied().unwrap_or(Decimal::ZERO);
    let Some(total) = current.checked_add(amount) else {
        return Err(StoreError::TotalOverflow {
            page: page.as_str().to_string(),
        });
    };
    totals.insert(page, total);
    Ok(())
}

/// Append-only sale ledger.
///
/// Appends are pure inserts; no implementation buffers a failed write.
#[async_trait]
pub trait SalesLedger: Send + Sync {
    async fn append(&self, event: SaleEvent) -> StoreResult<()>;
    async fn sum_by_page(
        &self,
        team: &str,
        window: &TimeWindow,
    ) -> StoreResult<BTreeMap<PageName, Decimal>>;
    async fn distinct_pages(&self, team: &str) -> StoreResult<BTreeSet<PageName>>;
    /// Removes the team's events in `[since, until)` and returns how many were removed.
    async fn delete_range(
        &self,
        team: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<usize>;
}

/// Persistent goals and overrides, keyed per page and cycle.
#[async_trait]
pub trait GoalStore: Send + Sync {
    async fn load_goals(&self) -> StoreResult<BTreeMap<GoalKey, Decimal>>;
    async fn upsert_goal(&self, key: &GoalKey, amount: Decimal) -> StoreResult<()>;
    async fn clear_goals(&self, cycle: CycleKind) -> StoreResult<usize>;
    async fn load_overrides(&self) -> StoreResult<BTreeMap<GoalKey, Decimal>>;
    /// Stores an override; a zero amount removes it.
    async fn upsert_override(&self, key: &GoalKey, amount: Decimal) -> StoreResult<()>;
    async fn clear_override(&self, key: &GoalKey) -> StoreResult<bool>;
}

/// Registered teams, their known pages, and report destinations.
#[async_trait]
pub trait TeamDirectory: Send + Sync {
    async fn register_team(&self, team: &str) -> StoreResult<()>;
    /// Drops the team with its destination and known pages. Sales are kept.
    async fn remove_team(&self, team: &str) -> StoreResult<bool>;
    async fn list_teams(&self) -> StoreResult<Vec<String>>;
    async fn add_team_page(&self, team: &str, page: &PageName) -> StoreResult<()>;
    async fn team_pages(&self, team: &str) -> StoreResult<BTreeSet<PageName>>;
    async fn set_team_destination(&self, team: &str, target: &ReportTarget) -> StoreResult<()>;
    async fn team_destinations(&self) -> StoreResult<Vec<TeamDestination>>;
    async fn set_global_destination(&self, target: &ReportTarget) -> StoreResult<()>;
    async fn clear_global_destination(&self) -> StoreResult<bool>;
    async fn global_destination(&self) -> StoreResult<Option<ReportTarget>>;
}

/// Everything the engine needs from persistence, in one object.
pub trait BoardStore: SalesLedger + GoalStore + TeamDirectory {}

impl<T> BoardStore for T where T: SalesLedger + GoalStore + TeamDirectory {}

pub(crate) fn normalize_team(team: &str) -> StoreResult<String> {
    let trimmed = team.trim();
    if trimmed.is_empty() {
        return Err(StoreError::EmptyTeam);
    }
    Ok(trimmed.to_string())
}

/// In-memory implementation for tests and local experimentation.
#[derive(Debug, Default)]
pub struct InMemoryBoardStore {
    inner: RwLock<BoardInner>,
}

#[derive(Debug, Default)]
struct BoardInner {
    sales: Vec<SaleEvent>,
    goals: BTreeMap<GoalKey, Decimal>,
    overrides: BTreeMap<GoalKey, Decimal>,
    teams: BTreeSet<String>,
    team_pages: BTreeMap<String, BTreeSet<PageName>>,
    destinations: BTreeMap<String, ReportTarget>,
    global_destination: Option<ReportTarget>,
}

impl InMemoryBoardStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SalesLedger for InMemoryBoardStore {
    async fn append(&self, event: SaleEvent) -> StoreResult<()> {
        self.inner.write().await.sales.push(event);
        Ok(())
    }

    async fn sum_by_page(
        &self,
        team: &str,
        window: &TimeWindow,
    ) -> StoreResult<BTreeMap<PageName, Decimal>> {
        let inner = self.inner.read().await;
        let mut totals = BTreeMap::new();
        for event in inner
            .sales
            .iter()
            .filter(|event| event.team() == team && window.contains(event.timestamp()))
        {
            accumulate_total(&mut totals, event.page().clone(), event.amount())?;
        }
        Ok(totals)
    }

    async fn distinct_pages(&self, team: &str) -> StoreResult<BTreeSet<PageName>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sales
            .iter()
            .filter(|event| event.team() == team)
            .map(|event| event.page().clone())
            .collect())
    }

    async fn delete_range(
        &self,
        team: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.sales.len();
        inner.sales.retain(|event| {
            !(event.team() == team && event.timestamp() >= since && event.timestamp() < until)
        });
        Ok(before - inner.sales.len())
    }
}

#[async_trait]
impl GoalStore for InMemoryBoardStore {
    async fn load_goals(&self) -> StoreResult<BTreeMap<GoalKey, Decimal>> {
        Ok(self.inner.read().await.goals.clone())
    }

    async fn upsert_goal(&self, key: &GoalKey, amount: Decimal) -> StoreResult<()> {
        self.inner.write().await.goals.insert(key.clone(), amount);
        Ok(())
    }

    async fn clear_goals(&self, cycle: CycleKind) -> StoreResult<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.goals.len();
        inner.goals.retain(|key, _| key.cycle != cycle);
        Ok(before - inner.goals.len())
    }

    async fn load_overrides(&self) -> StoreResult<BTreeMap<GoalKey, Decimal>> {
        Ok(self.inner.read().await.overrides.clone())
    }

    async fn upsert_override(&self, key: &GoalKey, amount: Decimal) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if amount.is_zero() {
            inner.overrides.remove(key);
        } else {
            inner.overrides.insert(key.clone(), amount);
        }
        Ok(())
    }

    async fn clear_override(&self, key: &GoalKey) -> StoreResult<bool> {
        Ok(self.inner.write().await.overrides.remove(key).is_some())
    }
}

#[async_trait]
impl TeamDirectory for InMemoryBoardStore {
    async fn register_team(&self, team: &str) -> StoreResult<()> {
        let team = normalize_team(team)?;
        self.inner.write().await.teams.insert(team);
        Ok(())
    }

    async fn remove_team(&self, team: &str) -> StoreResult<bool> {
        let team = normalize_team(team)?;
        let mut inner = self.inner.write().await;
        let removed = inner.teams.remove(&team);
        inner.team_pages.remove(&team);
        inner.destinations.remove(&team);
        Ok(removed)
    }

    async fn list_teams(&self) -> StoreResult<Vec<String>> {
        Ok(self.inner.read().await.teams.iter().cloned().collect())
    }

    async fn add_team_page(&self, team: &str, page: &PageName) -> StoreResult<()> {
        let team = normalize_team(team)?;
        self.inner
            .write()
            .await
            .team_pages
            .entry(team)
            .or_default()
            .insert(page.clone());
        Ok(())
    }

    async fn team_pages(&self, team: &str) -> StoreResult<BTreeSet<PageName>> {
        Ok(self
            .inner
            .read()
            .await
            .team_pages
            .get(team.trim())
            .cloned()
            .unwrap_or_default())
    }

    async fn set_team_destination(&self, team: &str, target: &ReportTarget) -> StoreResult<()> {
        let team = normalize_team(team)?;
        self.inner
            .write()
            .await
            .destinations
            .insert(team, target.clone());
        Ok(())
    }

    async fn team_destinations(&self) -> StoreResult<Vec<TeamDestination>> {
        Ok(self
            .inner
            .read()
            .await
            .destinations
            .iter()
            .map(|(team, target)| TeamDestination {
                team: team.clone(),
                target: target.clone(),
            })
            .collect())
    }

    async fn set_global_destination(&self, target: &ReportTarget) -> StoreResult<()> {
        self.inner.write().await.global_destination = Some(target.clone());
        Ok(())
    }

    async fn clear_global_destination(&self) -> StoreResult<bool> {
        Ok(self.inner.write().await.global_destination.take().is_some())
    }

    async fn global_destination(&self) -> StoreResult<Option<ReportTarget>> {
        Ok(self.inner.read().await.global_destination.clone())
    }
}
