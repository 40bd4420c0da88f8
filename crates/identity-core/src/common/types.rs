//! # Common Record Types
//!
//! Identifier and timestamp conventions shared by every table the identity
//! service owns.
//!
//! - Primary keys are ULIDs (via [`ferroid::ULID`]) stored as their 26
//!   character Crockford Base32 encoding. They are generated in the service
//!   rather than by the database so the same schema works on every backend.
//! - Timestamps are stored as milliseconds since the Unix epoch (UTC).

use chrono::{DateTime, Utc};
use ferroid::id::ULID;
use std::time::SystemTime;

/// Textual primary key of a permission, role or user row.
pub type RecordId = String;

/// Layout used to render timestamps in RPC responses.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Generates a new, time-ordered record identifier.
#[must_use]
pub fn new_record_id() -> RecordId {
    ULID::from_datetime(SystemTime::now()).to_string()
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Formats a stored millisecond timestamp using [`TIMESTAMP_FORMAT`].
///
/// Out-of-range values render as an empty string.
#[must_use]
pub fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}
