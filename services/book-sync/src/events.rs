//! Incremental update events
//!
//! An `UpdateEvent` mirrors one row of the venue's event feed: sequencing
//! fields plus ordered per-side change lists. Fields are kept optional as
//! delivered; the merge engine validates a whole batch before touching the
//! book.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::numeric::RawDecimal;
use types::side::Side;
use types::time::combine_nanos;

/// One `(price, volume)` entry of a change list.
///
/// Volume zero deletes the level; any other volume upserts it. Values stay
/// unparsed until the merge engine validates the batch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LevelChange {
    #[serde(default)]
    pub price: Option<RawDecimal>,
    #[serde(default)]
    pub volume: Option<RawDecimal>,
}

impl LevelChange {
    pub fn new(price: impl Into<Decimal>, volume: impl Into<Decimal>) -> Self {
        Self {
            price: Some(RawDecimal::from_decimal(price)),
            volume: Some(RawDecimal::from_decimal(volume)),
        }
    }
}

/// One incremental change to the book, as fetched from the venue.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateEvent {
    #[serde(default)]
    pub sequence: Option<u64>,
    /// Milliseconds since the epoch.
    #[serde(default, rename = "timestamp")]
    pub timestamp_millis: Option<i64>,
    /// Sub-millisecond offset.
    #[serde(default, rename = "timestampNanoseconds")]
    pub timestamp_nanos: Option<i64>,
    #[serde(default, rename = "bid")]
    pub bid_changes: Vec<LevelChange>,
    #[serde(default, rename = "ask")]
    pub ask_changes: Vec<LevelChange>,
}

impl UpdateEvent {
    /// Event positioned by sequence number only.
    pub fn sequenced(sequence: u64) -> Self {
        Self {
            sequence: Some(sequence),
            ..Self::default()
        }
    }

    /// Event positioned by timestamp only.
    pub fn timestamped(millis: i64, nanos: i64) -> Self {
        Self {
            timestamp_millis: Some(millis),
            timestamp_nanos: Some(nanos),
            ..Self::default()
        }
    }

    pub fn with_timestamp(mut self, millis: i64, nanos: i64) -> Self {
        self.timestamp_millis = Some(millis);
        self.timestamp_nanos = Some(nanos);
        self
    }

    /// Append a bid change.
    pub fn bid(mut self, price: impl Into<Decimal>, volume: impl Into<Decimal>) -> Self {
        self.bid_changes.push(LevelChange::new(price, volume));
        self
    }

    /// Append an ask change.
    pub fn ask(mut self, price: impl Into<Decimal>, volume: impl Into<Decimal>) -> Self {
        self.ask_changes.push(LevelChange::new(price, volume));
        self
    }

    pub fn changes(&self, side: Side) -> &[LevelChange] {
        match side {
            Side::Bid => &self.bid_changes,
            Side::Ask => &self.ask_changes,
        }
    }

    /// Combined nanosecond position; a missing offset counts as zero.
    pub fn timestamp_position(&self) -> Option<i64> {
        combine_nanos(self.timestamp_millis?, self.timestamp_nanos.unwrap_or(0))
    }

    /// Total number of level changes across both sides.
    pub fn change_count(&self) -> usize {
        self.bid_changes.len() + self.ask_changes.len()
    }
}
