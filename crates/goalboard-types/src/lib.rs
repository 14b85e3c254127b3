//! Shared domain records for goalboard crates.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a sale event fails boundary validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaleEventError {
    #[error("sale team must be non-empty")]
    EmptyTeam,
    #[error("sale page must be non-empty")]
    EmptyPage,
    #[error("sale amount must be non-negative, got {0}")]
    NegativeAmount(Decimal),
}

/// Canonical page identity as displayed in reports.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageName(String);

impl PageName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for PageName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PageName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for PageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Goal/override cycle a value applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    /// The current fixed eight-hour shift.
    Shift,
    /// The rolling 15/30 day quota period.
    Period,
}

impl CycleKind {
    pub const ALL: [CycleKind; 2] = [CycleKind::Shift, CycleKind::Period];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shift => "shift",
            Self::Period => "period",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "shift" => Some(Self::Shift),
            "period" | "page" => Some(Self::Period),
            _ => None,
        }
    }
}

impl fmt::Display for CycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key for goals and overrides.
///
/// Carries no team: two teams selling the same page share one goal and one
/// override.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GoalKey {
    pub page: PageName,
    pub cycle: CycleKind,
}

impl GoalKey {
    pub fn new(page: impl Into<PageName>, cycle: CycleKind) -> Self {
        Self {
            page: page.into(),
            cycle,
        }
    }
}

/// Immutable, validated sale record accepted by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleEvent {
    team: String,
    page: PageName,
    amount: Decimal,
    timestamp: DateTime<Utc>,
}

impl SaleEvent {
    /// Builds a sale event, rejecting blank identities and negative amounts.
    pub fn new(
        team: impl Into<String>,
        page: impl Into<PageName>,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, SaleEventError> {
        let team = team.into().trim().to_string();
        if team.is_empty() {
            return Err(SaleEventError::EmptyTeam);
        }
        let page = page.into();
        if page.as_str().trim().is_empty() {
            return Err(SaleEventError::EmptyPage);
        }
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(SaleEventError::NegativeAmount(amount));
        }
        Ok(Self {
            team,
            page,
            amount,
            timestamp,
        })
    }

    pub fn team(&self) -> &str {
        &self.team
    }

    pub fn page(&self) -> &PageName {
        &self.page
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Returns `None` when `end` precedes `start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Window from the Unix epoch up to (excluding) `end`.
    pub fn until(end: DateTime<Utc>) -> Self {
        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap_or(end);
        Self {
            start: epoch.min(end),
            end,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Chat destination for delivered reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportTarget {
    pub channel_id: String,
    #[serde(default)]
    pub thread_id: Option<i64>,
}

impl ReportTarget {
    pub fn new(channel_id: impl Into<String>, thread_id: Option<i64>) -> Self {
        Self {
            channel_id: channel_id.into(),
            thread_id,
        }
    }

    /// Short human label, e.g. `-100123` or `-100123#7`.
    pub fn label(&self) -> String {
        match self.thread_id {
            Some(thread_id) => format!("{}#{}", self.channel_id, thread_id),
            None => self.channel_id.clone(),
        }
    }
}

/// Per-team report destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamDestination {
    pub team: String,
    pub target: ReportTarget,
}

#[cfg(test)]
mod tests {
    use super::{CycleKind, GoalKey, PageName, ReportTarget, SaleEvent, SaleEventError, TimeWindow};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    #[test]
    fn unit_sale_event_rejects_blank_team_and_page() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 1, 0, 0).unwrap();
        assert_eq!(
            SaleEvent::new("  ", "Autumn Paid", Decimal::ONE, at),
            Err(SaleEventError::EmptyTeam)
        );
        assert_eq!(
            SaleEvent::new("Team 1", " ", Decimal::ONE, at),
            Err(SaleEventError::EmptyPage)
        );
    }

    #[test]
    fn unit_sale_event_rejects_negative_amount_but_allows_zero() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 1, 0, 0).unwrap();
        let negative = Decimal::new(-5, 0);
        assert_eq!(
            SaleEvent::new("Team 1", "Autumn Paid", negative, at),
            Err(SaleEventError::NegativeAmount(negative))
        );
        let zero = SaleEvent::new("Team 1", "Autumn Paid", Decimal::ZERO, at).expect("zero");
        assert_eq!(zero.amount(), Decimal::ZERO);
        assert_eq!(zero.team(), "Team 1");
    }

    #[test]
    fn unit_time_window_is_half_open() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let end = start + Duration::hours(8);
        let window = TimeWindow::new(start, end).expect("window");
        assert!(window.contains(start));
        assert!(window.contains(end - Duration::milliseconds(1)));
        assert!(!window.contains(end));
        assert!(TimeWindow::new(end, start).is_none());
    }

    #[test]
    fn regression_cycle_kind_parses_legacy_page_alias() {
        assert_eq!(CycleKind::parse("Shift"), Some(CycleKind::Shift));
        assert_eq!(CycleKind::parse("page"), Some(CycleKind::Period));
        assert_eq!(CycleKind::parse("month"), None);
    }

    #[test]
    fn unit_goal_key_serializes_page_transparently() {
        let key = GoalKey::new("Bri Paid", CycleKind::Period);
        let value = serde_json::to_value(&key).expect("serialize");
        assert_eq!(value["page"], "Bri Paid");
        assert_eq!(value["cycle"], "period");
        assert_eq!(key.page, PageName::from("Bri Paid"));
    }

    #[test]
    fn unit_report_target_label_includes_thread() {
        assert_eq!(ReportTarget::new("-100", Some(7)).label(), "-100#7");
        assert_eq!(ReportTarget::new("-100", None).label(), "-100");
    }
}
