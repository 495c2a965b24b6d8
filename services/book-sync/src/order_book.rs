//! Canonical in-memory order book
//!
//! Levels are keyed by `(side, price)` in an `IndexMap`, giving O(1) lookup
//! while keeping insertion order. Sorting by price is only done on demand
//! for the depth view.
//!
//! Besides its levels the book records a high-water mark: the greatest
//! sequence and combined timestamp of any event applied to it. In-place
//! volume updates leave a level's provenance untouched, so the levels alone
//! would under-report how far the book has advanced.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use types::numeric::{Price, Volume};
use types::side::Side;
use types::time::{combine_nanos, nanos_to_utc};

/// Key of a level within the book.
pub type LevelKey = (Side, Price);

/// A single row of the order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub side: Side,
    pub price: Price,
    pub volume: Volume,
    /// Venue sequence number of the row or of the event that created it.
    pub sequence: Option<u64>,
    /// Millisecond-precision UTC instant.
    pub timestamp: Option<DateTime<Utc>>,
    /// Sub-millisecond offset in nanoseconds.
    pub timestamp_nanos: Option<i64>,
    /// Venue-specific fields carried through untouched.
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PriceLevel {
    /// Create a level with no provenance.
    pub fn new(side: Side, price: Price, volume: Volume) -> Self {
        Self {
            side,
            price,
            volume,
            sequence: None,
            timestamp: None,
            timestamp_nanos: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>, nanos: Option<i64>) -> Self {
        self.timestamp = Some(timestamp);
        self.timestamp_nanos = nanos;
        self
    }

    pub fn key(&self) -> LevelKey {
        (self.side, self.price)
    }

    /// Combined nanosecond position; a missing offset counts as zero.
    pub fn timestamp_position(&self) -> Option<i64> {
        let millis = self.timestamp?.timestamp_millis();
        combine_nanos(millis, self.timestamp_nanos.unwrap_or(0))
    }
}

/// Greatest positions of the events applied to a book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighWaterMark {
    pub sequence: Option<u64>,
    pub timestamp_nanos: Option<i64>,
}

impl HighWaterMark {
    /// Raise the mark; never lowers either component.
    pub fn advance(&mut self, sequence: Option<u64>, timestamp_nanos: Option<i64>) {
        self.sequence = max_opt(self.sequence, sequence);
        self.timestamp_nanos = max_opt(self.timestamp_nanos, timestamp_nanos);
    }
}

/// Current reconstructed book for one instrument on one venue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderBook {
    levels: IndexMap<LevelKey, PriceLevel>,
    high_water: HighWaterMark,
}

impl OrderBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the level at `(side, price)`.
    pub fn get(&self, side: Side, price: Price) -> Option<&PriceLevel> {
        self.levels.get(&(side, price))
    }

    /// All levels in insertion order.
    pub fn levels(&self) -> impl Iterator<Item = &PriceLevel> {
        self.levels.values()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Number of bid levels.
    pub fn bid_depth(&self) -> usize {
        self.levels.keys().filter(|(side, _)| *side == Side::Bid).count()
    }

    /// Number of ask levels.
    pub fn ask_depth(&self) -> usize {
        self.levels.keys().filter(|(side, _)| *side == Side::Ask).count()
    }

    pub fn high_water(&self) -> HighWaterMark {
        self.high_water
    }

    /// Insert a level, replacing any level already at its key in place.
    ///
    /// Returns the replaced level, if any.
    pub(crate) fn upsert(&mut self, level: PriceLevel) -> Option<PriceLevel> {
        self.levels.insert(level.key(), level)
    }

    pub(crate) fn get_mut(&mut self, side: Side, price: Price) -> Option<&mut PriceLevel> {
        self.levels.get_mut(&(side, price))
    }

    /// Remove a level while keeping the relative order of the rest.
    pub(crate) fn remove(&mut self, side: Side, price: Price) -> Option<PriceLevel> {
        self.levels.shift_remove(&(side, price))
    }

    pub(crate) fn advance_high_water(&mut self, sequence: Option<u64>, timestamp_nanos: Option<i64>) {
        self.high_water.advance(sequence, timestamp_nanos);
    }

    /// Whether any level or applied event carried a sequence number.
    pub fn has_sequence(&self) -> bool {
        self.sequence_position().is_some()
    }

    /// Highest sequence across levels and applied events.
    pub fn sequence_position(&self) -> Option<u64> {
        let from_levels = self.levels.values().filter_map(|l| l.sequence).max();
        max_opt(from_levels, self.high_water.sequence)
    }

    /// Highest combined nanosecond timestamp across levels and applied events.
    pub fn timestamp_position(&self) -> Option<i64> {
        let from_levels = self
            .levels
            .values()
            .filter_map(PriceLevel::timestamp_position)
            .max();
        max_opt(from_levels, self.high_water.timestamp_nanos)
    }

    /// Latest instant the book is known to reflect.
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp_position().map(nanos_to_utc)
    }

    /// Best bid level (highest price).
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.side_levels(Side::Bid).max_by_key(|l| l.price)
    }

    /// Best ask level (lowest price).
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.side_levels(Side::Ask).min_by_key(|l| l.price)
    }

    /// Get the spread between best ask and best bid.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price.as_decimal() - bid.price.as_decimal()),
            _ => None,
        }
    }

    /// Get the mid-market price (average of best bid and best ask).
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => {
                Some((bid.price.as_decimal() + ask.price.as_decimal()) / Decimal::from(2))
            }
            _ => None,
        }
    }

    /// Build a sorted depth view with at most `max_levels` per side.
    ///
    /// Bids are returned in descending price order (best first).
    /// Asks are returned in ascending price order (best first).
    pub fn depth_view(&self, max_levels: usize) -> DepthView {
        let mut bids: Vec<DepthEntry> = self.side_levels(Side::Bid).map(DepthEntry::from).collect();
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        bids.truncate(max_levels);

        let mut asks: Vec<DepthEntry> = self.side_levels(Side::Ask).map(DepthEntry::from).collect();
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        asks.truncate(max_levels);

        DepthView {
            bids,
            asks,
            sequence: self.sequence_position(),
            latest_timestamp: self.latest_timestamp(),
            spread: self.spread(),
            mid_price: self.mid_price(),
        }
    }

    /// SHA-256 over the level contents and position marks.
    ///
    /// Independent of insertion order and of decimal scale, so two books
    /// holding the same levels hash identically.
    pub fn checksum(&self) -> String {
        let mut entries: Vec<(Side, Decimal, Decimal)> = self
            .levels
            .values()
            .map(|l| (l.side, l.price.as_decimal().normalize(), l.volume.as_decimal().normalize()))
            .collect();
        entries.sort();

        let mut hasher = Sha256::new();
        for (side, price, volume) in &entries {
            hasher.update(side.as_str().as_bytes());
            hasher.update(b":");
            hasher.update(price.to_string().as_bytes());
            hasher.update(b":");
            hasher.update(volume.to_string().as_bytes());
            hasher.update(b"|");
        }
        hasher.update(b"---");
        if let Some(seq) = self.sequence_position() {
            hasher.update(seq.to_le_bytes());
        }
        hasher.update(b"---");
        if let Some(ts) = self.timestamp_position() {
            hasher.update(ts.to_le_bytes());
        }

        format!("{:x}", hasher.finalize())
    }

    fn side_levels(&self, side: Side) -> impl Iterator<Item = &PriceLevel> {
        self.levels.values().filter(move |l| l.side == side)
    }
}

/// One row of the depth view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthEntry {
    pub price: Price,
    pub volume: Volume,
}

impl From<&PriceLevel> for DepthEntry {
    fn from(level: &PriceLevel) -> Self {
        Self {
            price: level.price,
            volume: level.volume,
        }
    }
}

/// Sorted, display-ready view of the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthView {
    /// Bids in descending price order (best first).
    pub bids: Vec<DepthEntry>,
    /// Asks in ascending price order (best first).
    pub asks: Vec<DepthEntry>,
    pub sequence: Option<u64>,
    pub latest_timestamp: Option<DateTime<Utc>>,
    pub spread: Option<Decimal>,
    pub mid_price: Option<Decimal>,
}

fn max_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
