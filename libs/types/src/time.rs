//! Instants, nanosecond positions and query windows
//!
//! Venues report time as a millisecond epoch timestamp plus an optional
//! nanosecond offset. The two combine into a single `i64` position:
//! `millis * 1_000_000 + nanos_offset`. Arithmetic is checked; a position
//! that would overflow is treated as underivable.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::TimeError;

/// Nanoseconds per millisecond.
pub const NANOS_PER_MILLI: i64 = 1_000_000;

/// Combine a millisecond timestamp and a nanosecond offset into one position.
pub fn combine_nanos(millis: i64, nanos_offset: i64) -> Option<i64> {
    millis.checked_mul(NANOS_PER_MILLI)?.checked_add(nanos_offset)
}

/// Convert milliseconds since the epoch into a UTC instant.
pub fn millis_to_utc(millis: i64) -> Result<DateTime<Utc>, TimeError> {
    DateTime::from_timestamp_millis(millis).ok_or(TimeError::OutOfRange { millis })
}

/// Convert a combined nanosecond position back into a UTC instant.
pub fn nanos_to_utc(position: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(position)
}

/// Inclusive UTC time window for market-data queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window, rejecting `start > end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TimeError> {
        if start > end {
            return Err(TimeError::InvertedWindow {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    /// Window covering everything up to and including `end`.
    pub fn until(end: DateTime<Utc>) -> Self {
        Self {
            start: DateTime::<Utc>::MIN_UTC,
            end,
        }
    }

    /// Window with no bounds at all.
    pub fn unbounded() -> Self {
        Self {
            start: DateTime::<Utc>::MIN_UTC,
            end: DateTime::<Utc>::MAX_UTC,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}
