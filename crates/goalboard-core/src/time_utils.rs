use chrono::{DateTime, TimeZone, Utc};

/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Converts Unix milliseconds to a UTC instant, `None` when out of chrono's range.
pub fn utc_from_unix_ms(unix_ms: u64) -> Option<DateTime<Utc>> {
    let millis = i64::try_from(unix_ms).ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Converts a UTC instant to Unix milliseconds, clamping pre-epoch instants to zero.
pub fn unix_ms_from_utc(instant: DateTime<Utc>) -> u64 {
    u64::try_from(instant.timestamp_millis()).unwrap_or(0)
}

/// Returns true when `instant_ms` lies more than `max_age_ms` before `now_ms`.
/// A zero `max_age_ms` disables the check.
pub fn is_older_than_ms(instant_ms: u64, now_ms: u64, max_age_ms: u64) -> bool {
    max_age_ms > 0 && now_ms.saturating_sub(instant_ms) > max_age_ms
}
