//! Cached goals and overrides in front of a [`GoalStore`].

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::debug;

use goalboard_store::{GoalStore, StoreResult};
use goalboard_types::{CycleKind, GoalKey, PageName};

#[derive(Debug, Default)]
struct GoalCache {
    goals: BTreeMap<GoalKey, Decimal>,
    overrides: BTreeMap<GoalKey, Decimal>,
}

/// Owned goal/override repository.
///
/// Writes hit the store first and then the cache, so a failed store write
/// leaves the cache untouched. Reads never touch the store.
pub struct GoalBook {
    store: Arc<dyn GoalStore>,
    cache: RwLock<GoalCache>,
}

impl GoalBook {
    /// Builds a book and fills its cache from `store`.
    pub async fn load(store: Arc<dyn GoalStore>) -> StoreResult<Self> {
        let book = Self {
            store,
            cache: RwLock::new(GoalCache::default()),
        };
        book.refresh().await?;
        Ok(book)
    }

    pub async fn refresh(&self) -> StoreResult<()> {
        let goals = self.store.load_goals().await?;
        let overrides = self.store.load_overrides().await?;
        debug!(
            goals = goals.len(),
            overrides = overrides.len(),
            "goal book refreshed"
        );
        let mut cache = self.cache.write().await;
        cache.goals = goals;
        cache.overrides = overrides;
        Ok(())
    }

    pub async fn goal(&self, key: &GoalKey) -> Option<Decimal> {
        self.cache.read().await.goals.get(key).copied()
    }

    /// Goals of one cycle, keyed by page.
    pub async fn goals_for(&self, cycle: CycleKind) -> BTreeMap<PageName, Decimal> {
        select_cycle(&self.cache.read().await.goals, cycle)
    }

    /// Nonzero overrides of one cycle, keyed by page.
    pub async fn overrides_for(&self, cycle: CycleKind) -> BTreeMap<PageName, Decimal> {
        let cache = self.cache.read().await;
        let mut overrides = select_cycle(&cache.overrides, cycle);
        overrides.retain(|_, amount| !amount.is_zero());
        overrides
    }

    pub async fn set_goal(&self, key: GoalKey, amount: Decimal) -> StoreResult<()> {
        self.store.upsert_goal(&key, amount).await?;
        self.cache.write().await.goals.insert(key, amount);
        Ok(())
    }

    pub async fn clear_goals(&self, cycle: CycleKind) -> StoreResult<usize> {
        let removed = self.store.clear_goals(cycle).await?;
        self.cache
            .write()
            .await
            .goals
            .retain(|key, _| key.cycle != cycle);
        Ok(removed)
    }

    /// Sets an override. Zero clears it.
    pub async fn set_override(&self, key: GoalKey, amount: Decimal) -> StoreResult<()> {
        self.store.upsert_override(&key, amount).await?;
        let mut cache = self.cache.write().await;
        if amount.is_zero() {
            cache.overrides.remove(&key);
        } else {
            cache.overrides.insert(key, amount);
        }
        Ok(())
    }

    pub async fn clear_override(&self, key: &GoalKey) -> StoreResult<bool> {
        let removed = self.store.clear_override(key).await?;
        let cached = self.cache.write().await.overrides.remove(key).is_some();
        Ok(removed || cached)
    }
}

fn select_cycle(values: &BTreeMap<GoalKey, Decimal>, cycle: CycleKind) -> BTreeMap<PageName, Decimal> {
    values
        .iter()
        .filter(|(key, _)| key.cycle == cycle)
        .map(|(key, amount)| (key.page.clone(), *amount))
        .collect()
}
