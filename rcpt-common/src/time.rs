//! Timestamp utilities
//!
//! Row timestamps are stored as UTC text in `YYYY-MM-DD HH:MM:SS` form so they
//! sort lexically and match the shape the extraction adapter produces for
//! `purchased_at`.

use chrono::{DateTime, Utc};

/// Storage format for all timestamp columns
pub const DB_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current UTC time formatted for a timestamp column
pub fn db_timestamp() -> String {
    now().format(DB_TIMESTAMP_FORMAT).to_string()
}
