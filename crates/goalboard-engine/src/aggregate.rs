//! Window totals with override replacement.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;

use goalboard_store::{SalesLedger, StoreResult};
use goalboard_types::{CycleKind, PageName, TimeWindow};

use crate::goal_book::GoalBook;

/// Sums ledger entries per page and lays overrides on top.
#[derive(Clone)]
pub struct Aggregator {
    ledger: Arc<dyn SalesLedger>,
    book: Arc<GoalBook>,
}

impl Aggregator {
    pub fn new(ledger: Arc<dyn SalesLedger>, book: Arc<GoalBook>) -> Self {
        Self { ledger, book }
    }

    /// Per-page totals for `team` in `window`.
    ///
    /// Every page with a nonzero override for `cycle` reports the override
    /// instead of its computed sum. Overrides are page-scoped, so they show up
    /// for every team.
    pub async fn aggregate(
        &self,
        team: &str,
        window: &TimeWindow,
        cycle: CycleKind,
    ) -> StoreResult<BTreeMap<PageName, Decimal>> {
        let totals = self.ledger.sum_by_page(team, window).await?;
        let overrides = self.book.overrides_for(cycle).await;
        Ok(apply_overrides(totals, &overrides))
    }
}

pub fn apply_overrides(
    mut totals: BTreeMap<PageName, Decimal>,
    overrides: &BTreeMap<PageName, Decimal>,
) -> BTreeMap<PageName, Decimal> {
    for (page, amount) in overrides {
        if !amount.is_zero() {
            totals.insert(page.clone(), *amount);
        }
    }
    totals
}

/// Descending by amount, ties by page name ascending.
pub fn rank(totals: &BTreeMap<PageName, Decimal>) -> Vec<(PageName, Decimal)> {
    let mut ranked = totals
        .iter()
        .map(|(page, amount)| (page.clone(), *amount))
        .collect::<Vec<_>>();
    ranked.sort_by(|left, right| compare_ranked(left.1, &left.0, right.1, &right.0));
    ranked
}

pub(crate) fn compare_ranked(
    left_amount: Decimal,
    left_page: &PageName,
    right_amount: Decimal,
    right_page: &PageName,
) -> Ordering {
    right_amount
        .cmp(&left_amount)
        .then_with(|| left_page.cmp(right_page))
}
