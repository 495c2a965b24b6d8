//! Validation errors for book primitives
//!
//! Error taxonomy using thiserror

use thiserror::Error;

/// Numeric validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NumericError {
    #[error("Negative value not allowed: {0}")]
    Negative(String),

    #[error("Invalid decimal: {0}")]
    Invalid(String),
}

/// Time conversion and window errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimeError {
    #[error("Timestamp out of range: {millis} ms")]
    OutOfRange { millis: i64 },

    #[error("Invalid time window: start {start} is after end {end}")]
    InvertedWindow { start: String, end: String },
}

/// Side parsing errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SideError {
    #[error("Unknown book side: {0}")]
    Unknown(String),
}
