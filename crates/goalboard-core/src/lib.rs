//! Low-level helpers shared across goalboard crates.
//!
//! JSON state files for the scheduler and the millisecond clock conversions
//! used wherever instants cross a persistence boundary.

pub mod state_file;
pub mod time_utils;

pub use state_file::{read_json_state, write_json_state};
pub use time_utils::{
    current_unix_timestamp_ms, is_older_than_ms, unix_ms_from_utc, utc_from_unix_ms,
};
