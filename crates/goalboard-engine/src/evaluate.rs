//! Goal percent and tier classification.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use thiserror::Error;

use goalboard_types::PageName;

/// Marker used for pages without a positive goal.
pub const NO_GOAL_MARKER: &str = "⚪";

/// Percent below which a page is reported as red.
pub const RED_PAGE_THRESHOLD: Decimal = Decimal::from_parts(31, 0, 0, false, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
/// Progress tier, highest matching lower bound wins.
pub enum Tier {
    Complete,
    High,
    MidHigh,
    Mid,
    Low,
    Critical,
}

impl Tier {
    pub fn from_percent(percent: Decimal) -> Self {
        if percent >= Decimal::ONE_HUNDRED {
            Self::Complete
        } else if percent >= Decimal::from(90) {
            Self::High
        } else if percent >= Decimal::from(61) {
            Self::MidHigh
        } else if percent >= RED_PAGE_THRESHOLD {
            Self::Mid
        } else if percent >= Decimal::from(11) {
            Self::Low
        } else {
            Self::Critical
        }
    }

    pub fn marker(self) -> &'static str {
        match self {
            Self::Complete => "💚",
            Self::High => "🟢",
            Self::MidHigh => "🔵",
            Self::Mid => "🟡",
            Self::Low => "🟠",
            Self::Critical => "🔴",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::High => "high",
            Self::MidHigh => "mid_high",
            Self::Mid => "mid",
            Self::Low => "low",
            Self::Critical => "critical",
        }
    }
}

/// One page joined with its goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageEvaluation {
    pub page: PageName,
    pub total: Decimal,
    pub goal: Option<Decimal>,
    pub percent: Option<Decimal>,
    pub tier: Option<Tier>,
}

impl PageEvaluation {
    pub fn marker(&self) -> &'static str {
        self.tier.map(Tier::marker).unwrap_or(NO_GOAL_MARKER)
    }

    /// Has a goal and sits below [`RED_PAGE_THRESHOLD`].
    pub fn is_red(&self) -> bool {
        self.percent
            .is_some_and(|percent| percent < RED_PAGE_THRESHOLD)
    }
}

/// `total / goal * 100`, undefined for a missing or non-positive goal.
pub fn percent_of(total: Decimal, goal: Decimal) -> Option<Decimal> {
    if goal <= Decimal::ZERO {
        return None;
    }
    total.checked_div(goal)?.checked_mul(Decimal::ONE_HUNDRED)
}

/// Raised when summed amounts exceed the decimal range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("amount total overflowed")]
pub struct TotalOverflow;

/// Sums `amounts`, failing instead of overflowing.
pub fn checked_total<I>(amounts: I) -> Result<Decimal, TotalOverflow>
where
    I: IntoIterator<Item = Decimal>,
{
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |sum, amount| sum.checked_add(amount))
        .ok_or(TotalOverflow)
}

pub fn evaluate(page: PageName, total: Decimal, goal: Option<Decimal>) -> PageEvaluation {
    let goal = goal.filter(|goal| *goal > Decimal::ZERO);
    let percent = goal.and_then(|goal| percent_of(total, goal));
    PageEvaluation {
        page,
        total,
        goal,
        percent,
        tier: percent.map(Tier::from_percent),
    }
}

/// Rounds half away from zero, matching how amounts are displayed.
pub fn round_display(value: Decimal, places: u32) -> Decimal {
    value.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero)
}
