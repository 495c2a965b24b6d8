//! Snapshot loader
//!
//! Normalizes raw snapshot rows from the retrieval service into an
//! `OrderBook`. Venues disagree on field naming: some report the row time
//! under `exchangeTimestamp` instead of `timestamp`. The loader renames the
//! alternate field when the canonical one is absent, converts the
//! millisecond timestamp into a UTC instant and carries every other field
//! through unchanged.
//!
//! The loader does not compute the book's position; the merge engine
//! derives it from the levels when events are applied.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use types::numeric::{Price, RawDecimal, Volume};
use types::side::Side;
use types::time::millis_to_utc;

use crate::order_book::{OrderBook, PriceLevel};

/// Alternate name some venues use for the row timestamp.
pub const ALTERNATE_TIMESTAMP_FIELD: &str = "exchangeTimestamp";

/// Errors produced while normalizing a snapshot.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot is empty: no rows in the requested window")]
    EmptySnapshot,

    #[error("malformed snapshot row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },

    #[error("snapshot is not a JSON array of rows: {0}")]
    InvalidFormat(String),
}

/// One raw snapshot row as delivered by the venue.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawSnapshotRow {
    pub side: Option<String>,
    pub price: Option<RawDecimal>,
    pub volume: Option<RawDecimal>,
    pub sequence: Option<u64>,
    /// Milliseconds since the epoch.
    pub timestamp: Option<i64>,
    #[serde(rename = "exchangeTimestamp")]
    pub exchange_timestamp: Option<i64>,
    #[serde(rename = "timestampNanoseconds")]
    pub timestamp_nanos: Option<i64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RawSnapshotRow {
    pub fn new(side: &str, price: impl Into<Decimal>, volume: impl Into<Decimal>) -> Self {
        Self {
            side: Some(side.to_string()),
            price: Some(RawDecimal::from_decimal(price)),
            volume: Some(RawDecimal::from_decimal(volume)),
            ..Self::default()
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_timestamp(mut self, millis: i64, nanos: i64) -> Self {
        self.timestamp = Some(millis);
        self.timestamp_nanos = Some(nanos);
        self
    }

    /// Row time in milliseconds under either field name, canonical first.
    pub fn effective_timestamp(&self) -> Option<i64> {
        self.timestamp.or(self.exchange_timestamp)
    }
}

/// Parse a JSON array of snapshot rows and normalize it.
pub fn normalize_json(json: &str) -> Result<OrderBook, SnapshotError> {
    let rows: Vec<RawSnapshotRow> =
        serde_json::from_str(json).map_err(|e| SnapshotError::InvalidFormat(e.to_string()))?;
    normalize(rows)
}

/// Normalize raw snapshot rows into a book.
///
/// An empty input is `EmptySnapshot`, never a zero-level book. A later row
/// for an already-seen `(side, price)` replaces the earlier one in place.
pub fn normalize(rows: Vec<RawSnapshotRow>) -> Result<OrderBook, SnapshotError> {
    if rows.is_empty() {
        return Err(SnapshotError::EmptySnapshot);
    }

    let row_count = rows.len();
    let mut book = OrderBook::new();
    let mut duplicates = 0usize;

    for (index, row) in rows.into_iter().enumerate() {
        let level = normalize_row(index, row)?;
        if let Some(previous) = book.upsert(level) {
            duplicates += 1;
            warn!(
                row = index,
                side = %previous.side,
                price = %previous.price,
                "Duplicate snapshot level; later row wins"
            );
        }
    }

    info!(
        rows = row_count,
        levels = book.len(),
        bids = book.bid_depth(),
        asks = book.ask_depth(),
        duplicates,
        "Snapshot normalized"
    );

    Ok(book)
}

fn normalize_row(index: usize, row: RawSnapshotRow) -> Result<PriceLevel, SnapshotError> {
    let malformed = |reason: String| SnapshotError::MalformedRow { row: index, reason };

    let side: Side = row
        .side
        .as_deref()
        .ok_or_else(|| malformed("missing side".to_string()))?
        .parse()
        .map_err(|e: types::errors::SideError| malformed(e.to_string()))?;
    let price = row
        .price
        .as_ref()
        .ok_or_else(|| malformed("missing price".to_string()))?
        .parse()
        .map(Price::new)
        .map_err(|e| malformed(format!("price: {}", e)))?;
    let volume = row
        .volume
        .as_ref()
        .ok_or_else(|| malformed("missing volume".to_string()))?
        .parse()
        .and_then(Volume::try_new)
        .map_err(|e| malformed(format!("volume: {}", e)))?;

    let mut extra = row.extra;
    let millis = match (row.timestamp, row.exchange_timestamp) {
        (Some(canonical), alternate) => {
            // Canonical field wins; the alternate one stays as an ordinary field.
            if let Some(alt) = alternate {
                extra.insert(ALTERNATE_TIMESTAMP_FIELD.to_string(), alt.into());
            }
            Some(canonical)
        }
        (None, alternate) => alternate,
    };
    let timestamp = millis
        .map(millis_to_utc)
        .transpose()
        .map_err(|e| malformed(e.to_string()))?;

    Ok(PriceLevel {
        side,
        price,
        volume,
        sequence: row.sequence,
        timestamp,
        timestamp_nanos: row.timestamp_nanos,
        extra,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot_rejected() {
        assert_eq!(normalize(Vec::new()), Err(SnapshotError::EmptySnapshot));
        assert_eq!(normalize_json("[]"), Err(SnapshotError::EmptySnapshot));
    }

    #[test]
    fn test_basic_normalization() {
        let rows = vec![
            RawSnapshotRow::new("bid", 100, 5).with_sequence(10),
            RawSnapshotRow::new("ask", 101, 2).with_sequence(9),
        ];
        let book = normalize(rows).unwrap();

        assert_eq!(book.len(), 2);
        assert_eq!(book.bid_depth(), 1);
        let bid = book.get(Side::Bid, Price::from_u64(100)).unwrap();
        assert_eq!(bid.volume, Volume::from_u64(5));
        assert_eq!(bid.sequence, Some(10));
        // Position not tracked by the loader beyond the raw level fields
        assert_eq!(book.high_water().sequence, None);
    }

    #[test]
    fn test_timestamp_converted_to_utc() {
        let rows = vec![RawSnapshotRow::new("bid", 100, 5).with_timestamp(1_708_123_456_789, 5)];
        let book = normalize(rows).unwrap();
        let level = book.levels().next().unwrap();

        let ts = level.timestamp.unwrap();
        assert_eq!(ts.timestamp_millis(), 1_708_123_456_789);
        assert_eq!(ts.to_rfc3339(), "2024-02-16T22:44:16.789+00:00");
        assert_eq!(level.timestamp_nanos, Some(5));
    }

    #[test]
    fn test_alternate_timestamp_renamed() {
        let json = r#"[{"side": "ask", "price": 101, "volume": 1, "exchangeTimestamp": 1000}]"#;
        let book = normalize_json(json).unwrap();
        let level = book.levels().next().unwrap();

        assert_eq!(level.timestamp.unwrap().timestamp_millis(), 1000);
        assert!(!level.extra.contains_key(ALTERNATE_TIMESTAMP_FIELD));
    }

    #[test]
    fn test_canonical_timestamp_wins_over_alternate() {
        let json = r#"[{"side": "bid", "price": 100, "volume": 1,
                        "timestamp": 2000, "exchangeTimestamp": 1000}]"#;
        let book = normalize_json(json).unwrap();
        let level = book.levels().next().unwrap();

        assert_eq!(level.timestamp.unwrap().timestamp_millis(), 2000);
        assert_eq!(level.extra[ALTERNATE_TIMESTAMP_FIELD], 1000);
    }

    #[test]
    fn test_other_fields_carried_through() {
        let json = r#"[{"side": "bid", "price": 100, "volume": 1,
                        "exchange": "binance", "instrument": "BTCUSDT"}]"#;
        let book = normalize_json(json).unwrap();
        let level = book.levels().next().unwrap();

        assert_eq!(level.extra["exchange"], "binance");
        assert_eq!(level.extra["instrument"], "BTCUSDT");
        assert!(level.timestamp.is_none());
    }

    #[test]
    fn test_duplicate_level_later_row_wins() {
        let rows = vec![
            RawSnapshotRow::new("bid", 100, 5).with_sequence(1),
            RawSnapshotRow::new("ask", 101, 5).with_sequence(2),
            RawSnapshotRow::new("bid", 100, 8).with_sequence(3),
        ];
        let book = normalize(rows).unwrap();

        assert_eq!(book.len(), 2);
        let first = book.levels().next().unwrap();
        assert_eq!(first.price, Price::from_u64(100));
        assert_eq!(first.volume, Volume::from_u64(8));
        assert_eq!(first.sequence, Some(3));
    }

    #[test]
    fn test_malformed_rows() {
        let missing_side = RawSnapshotRow {
            side: None,
            ..RawSnapshotRow::new("bid", 100, 1)
        };
        assert!(matches!(
            normalize(vec![missing_side]),
            Err(SnapshotError::MalformedRow { row: 0, .. })
        ));

        let unknown_side = RawSnapshotRow::new("mid", 100, 1);
        assert!(normalize(vec![unknown_side]).is_err());

        let negative = RawSnapshotRow::new("ask", 100, -1);
        let good = RawSnapshotRow::new("bid", 99, 1);
        assert!(matches!(
            normalize(vec![good, negative]),
            Err(SnapshotError::MalformedRow { row: 1, .. })
        ));

        let missing_volume = RawSnapshotRow {
            volume: None,
            ..RawSnapshotRow::new("bid", 100, 1)
        };
        assert!(normalize(vec![missing_volume]).is_err());
    }

    #[test]
    fn test_non_numeric_values_are_malformed_rows() {
        let json = r#"[{"side": "bid", "price": 100, "volume": 1},
                       {"side": "ask", "price": "abc", "volume": 1}]"#;
        match normalize_json(json) {
            Err(SnapshotError::MalformedRow { row, reason }) => {
                assert_eq!(row, 1);
                assert!(reason.starts_with("price"));
            }
            other => panic!("Expected MalformedRow, got {:?}", other),
        }

        let json = r#"[{"side": "bid", "price": "100.5", "volume": null}]"#;
        assert!(matches!(
            normalize_json(json),
            Err(SnapshotError::MalformedRow { row: 0, .. })
        ));

        let json = r#"[{"side": "bid", "price": "100.5", "volume": [1]}]"#;
        assert!(matches!(
            normalize_json(json),
            Err(SnapshotError::MalformedRow { row: 0, .. })
        ));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            normalize_json("not json"),
            Err(SnapshotError::InvalidFormat(_))
        ));
    }
}
