//! Deterministic shift, rolling and civil-day windows in a fixed local zone.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use thiserror::Error;

use goalboard_types::TimeWindow;

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Manila;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("rolling windows support 15 or 30 days, got {0}")]
    UnsupportedRollingDays(u32),
}

/// One of the three fixed eight-hour shifts of a local day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Shift {
    /// `[08:00, 16:00)`
    Prime,
    /// `[16:00, 24:00)`
    Midshift,
    /// `[00:00, 08:00)`
    Closing,
}

impl Shift {
    pub fn containing_hour(hour: u32) -> Self {
        match hour {
            8..=15 => Self::Prime,
            16..=23 => Self::Midshift,
            _ => Self::Closing,
        }
    }

    pub fn start_hour(self) -> u32 {
        match self {
            Self::Prime => 8,
            Self::Midshift => 16,
            Self::Closing => 0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Prime => "Prime (8AM-4PM)",
            Self::Midshift => "Midshift (4PM-12AM)",
            Self::Closing => "Closing (12AM-8AM)",
        }
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Rolling quota period lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaPeriod {
    HalfMonth,
    Month,
}

impl QuotaPeriod {
    pub fn from_days(days: u32) -> Result<Self, WindowError> {
        match days {
            15 => Ok(Self::HalfMonth),
            30 => Ok(Self::Month),
            other => Err(WindowError::UnsupportedRollingDays(other)),
        }
    }

    pub fn days(self) -> u32 {
        match self {
            Self::HalfMonth => 15,
            Self::Month => 30,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::HalfMonth => "QUOTA HALF (15 DAYS)",
            Self::Month => "QUOTA MONTH (30 DAYS)",
        }
    }
}

/// Current shift window paired with the shift it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftWindow {
    pub shift: Shift,
    pub window: TimeWindow,
}

/// Pure window computations anchored on one local time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCalculator {
    timezone: Tz,
}

impl Default for WindowCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEZONE)
    }
}

impl WindowCalculator {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// `[start of the shift containing now, now)`.
    pub fn shift_window(&self, now: DateTime<Utc>) -> ShiftWindow {
        let local = now.with_timezone(&self.timezone);
        let shift = Shift::containing_hour(local.hour());
        let start = self.local_boundary(local.date_naive(), shift.start_hour(), now);
        ShiftWindow {
            shift,
            window: TimeWindow {
                start: start.min(now),
                end: now,
            },
        }
    }

    /// `[now - days, now)`, sliding and not aligned to civil days.
    pub fn rolling_window(&self, now: DateTime<Utc>, period: QuotaPeriod) -> TimeWindow {
        TimeWindow {
            start: now - Duration::days(i64::from(period.days())),
            end: now,
        }
    }

    /// `[local midnight of the reference day, now)`.
    pub fn civil_day_window(&self, now: DateTime<Utc>) -> TimeWindow {
        let local = now.with_timezone(&self.timezone);
        let start = self.local_boundary(local.date_naive(), 0, now);
        TimeWindow {
            start: start.min(now),
            end: now,
        }
    }

    /// Formats an instant in the local zone, e.g. `Jun 02, 2025 08:00 AM (Asia/Manila)`.
    pub fn format_local(&self, instant: DateTime<Utc>) -> String {
        format!(
            "{} ({})",
            instant
                .with_timezone(&self.timezone)
                .format("%b %d, %Y %I:%M %p"),
            self.timezone.name()
        )
    }

    fn local_boundary(&self, date: NaiveDate, hour: u32, fallback: DateTime<Utc>) -> DateTime<Utc> {
        let Some(naive) = date.and_hms_opt(hour, 0, 0) else {
            return fallback;
        };
        resolve_local(self.timezone, naive).unwrap_or(fallback)
    }
}

// Gaps resolve to the first valid instant after them.
fn resolve_local(timezone: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    for minutes in [0_i64, 30, 60, 120] {
        let candidate = naive + Duration::minutes(minutes);
        if let Some(local) = timezone.from_local_datetime(&candidate).earliest() {
            return Some(local.with_timezone(&Utc));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{QuotaPeriod, Shift, WindowCalculator, WindowError};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use chrono_tz::Tz;

    fn manila(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        chrono_tz::Asia::Manila
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .single()
            .expect("valid local time")
            .with_timezone(&Utc)
    }

    #[test]
    fn functional_shift_start_table() {
        let calculator = WindowCalculator::default();
        let cases = [
            (manila(2025, 6, 2, 7, 59), manila(2025, 6, 2, 0, 0), Shift::Closing),
            (manila(2025, 6, 2, 8, 0), manila(2025, 6, 2, 8, 0), Shift::Prime),
            (manila(2025, 6, 2, 15, 59), manila(2025, 6, 2, 8, 0), Shift::Prime),
            (manila(2025, 6, 2, 16, 0), manila(2025, 6, 2, 16, 0), Shift::Midshift),
            (manila(2025, 6, 2, 23, 59), manila(2025, 6, 2, 16, 0), Shift::Midshift),
            (manila(2025, 6, 3, 0, 0), manila(2025, 6, 3, 0, 0), Shift::Closing),
        ];
        for (now, expected_start, expected_shift) in cases {
            let shift = calculator.shift_window(now);
            assert_eq!(shift.window.start, expected_start, "now={now}");
            assert_eq!(shift.window.end, now);
            assert_eq!(shift.shift, expected_shift);
        }
    }

    #[test]
    fn unit_shift_window_is_deterministic() {
        let calculator = WindowCalculator::default();
        let now = manila(2025, 6, 2, 12, 34);
        assert_eq!(calculator.shift_window(now), calculator.shift_window(now));
    }

    #[test]
    fn functional_rolling_window_is_sliding_and_half_open() {
        let calculator = WindowCalculator::default();
        let now = manila(2025, 6, 30, 13, 17);
        let window = calculator.rolling_window(now, QuotaPeriod::Month);
        assert_eq!(window.start, now - Duration::days(30));
        assert!(window.contains(now - Duration::days(30)));
        assert!(window.contains(now - Duration::seconds(1)));
        assert!(!window.contains(now));
        assert!(!window.contains(now - Duration::days(30) - Duration::seconds(1)));
    }

    #[test]
    fn unit_quota_period_accepts_only_fifteen_or_thirty_days() {
        assert_eq!(QuotaPeriod::from_days(15), Ok(QuotaPeriod::HalfMonth));
        assert_eq!(QuotaPeriod::from_days(30), Ok(QuotaPeriod::Month));
        assert_eq!(
            QuotaPeriod::from_days(7),
            Err(WindowError::UnsupportedRollingDays(7))
        );
    }

    #[test]
    fn functional_civil_day_starts_at_local_midnight() {
        let calculator = WindowCalculator::default();
        let now = manila(2025, 6, 2, 3, 10);
        let window = calculator.civil_day_window(now);
        assert_eq!(window.start, manila(2025, 6, 2, 0, 0));
        assert_eq!(window.end, now);
    }

    #[test]
    fn regression_dst_gap_boundary_moves_past_the_gap() {
        // Santiago skips 00:00-01:00 local on 2024-09-08.
        let timezone: Tz = "America/Santiago".parse().expect("tz");
        let calculator = WindowCalculator::new(timezone);
        let now = Utc.with_ymd_and_hms(2024, 9, 8, 12, 0, 0).unwrap();
        let window = calculator.civil_day_window(now);
        let local_start = window.start.with_timezone(&timezone);
        assert_eq!(local_start.format("%Y-%m-%d %H:%M").to_string(), "2024-09-08 01:00");
    }

    #[test]
    fn unit_format_local_names_zone() {
        let calculator = WindowCalculator::default();
        assert_eq!(
            calculator.format_local(manila(2025, 6, 2, 8, 0)),
            "Jun 02, 2025 08:00 AM (Asia/Manila)"
        );
    }
}
