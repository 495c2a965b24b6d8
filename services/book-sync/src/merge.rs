//! Order book merge engine
//!
//! Applies a batch of `UpdateEvent`s to a book. The batch is processed in
//! four steps:
//!
//! 1. Pick the filtering mode once for the whole call: `Sequence` when both
//!    the book and every event carry sequence numbers, otherwise
//!    `Timestamp` on combined nanosecond positions.
//! 2. Compute the book's current position in that mode.
//! 3. Keep only events strictly after that position. Replaying an
//!    overlapping fetch window is therefore idempotent.
//! 4. Apply the kept events in input order, bids before asks, each change
//!    list in order.
//!
//! Every event is validated and the mode is settled before the book is
//! copied, so a rejected batch never leaves a half-applied book behind.
//! The input book is never modified; callers replace their copy with the
//! returned one.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use types::numeric::{Price, Volume};
use types::side::Side;
use types::time::millis_to_utc;

use crate::events::UpdateEvent;
use crate::order_book::{OrderBook, PriceLevel};

/// Errors that reject a whole batch. The book is untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("unorderable input: {reason}")]
    UnorderableInput { reason: String },

    #[error("malformed event at index {index}: {reason}")]
    MalformedEvent { index: usize, reason: String },

    #[error("batch too large: {size} events exceeds limit {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("out-of-order batch: event {index} is positioned before its predecessor")]
    OutOfOrderBatch { index: usize },
}

/// Which field family orders the book against the events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Sequence,
    Timestamp,
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterMode::Sequence => f.write_str("sequence"),
            FilterMode::Timestamp => f.write_str("timestamp"),
        }
    }
}

/// A position marker, tagged with the mode it was measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "lowercase")]
pub enum Position {
    Sequence(u64),
    /// Combined nanoseconds: `millis * 1_000_000 + nanos_offset`.
    Timestamp(i64),
}

impl Position {
    pub fn mode(&self) -> FilterMode {
        match self {
            Position::Sequence(_) => FilterMode::Sequence,
            Position::Timestamp(_) => FilterMode::Timestamp,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Sequence(seq) => write!(f, "seq:{}", seq),
            Position::Timestamp(ns) => write!(f, "ts:{}", ns),
        }
    }
}

impl OrderBook {
    /// The book's position marker: highest sequence if the book carries
    /// any, otherwise highest combined timestamp.
    pub fn position_marker(&self) -> Option<Position> {
        self.sequence_position()
            .map(Position::Sequence)
            .or_else(|| self.timestamp_position().map(Position::Timestamp))
    }

    /// The book's position measured in the given mode.
    pub fn position_in(&self, mode: FilterMode) -> Option<Position> {
        match mode {
            FilterMode::Sequence => self.sequence_position().map(Position::Sequence),
            FilterMode::Timestamp => self.timestamp_position().map(Position::Timestamp),
        }
    }
}

/// How a batch whose events are not in non-decreasing position order is
/// handled. Events are never re-sorted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderCheck {
    /// Log a warning and apply in input order.
    Warn,
    /// Reject the batch with `OutOfOrderBatch`.
    Reject,
}

/// Configuration for the merge engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Maximum number of events accepted in one batch.
    pub max_batch_events: usize,
    /// Handling of batches that are not ordered by position.
    pub order_check: OrderCheck,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_batch_events: 1_000_000,
            order_check: OrderCheck::Warn,
        }
    }
}

/// Counters describing one successful merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub mode: FilterMode,
    /// Book position before the merge.
    pub previous_position: Position,
    /// Book position after the merge.
    pub position: Position,
    pub events_applied: usize,
    pub events_discarded: usize,
    pub levels_inserted: usize,
    pub levels_updated: usize,
    pub levels_removed: usize,
    /// Deletions of levels that were not in the book.
    pub deletes_ignored: usize,
}

/// A successful merge: the new book and what happened to it.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub book: OrderBook,
    pub stats: MergeStats,
}

/// Result of applying a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// At least one event was new; the report holds the updated book.
    Applied(MergeReport),
    /// Every event was at or before the book's position. Informational:
    /// the caller keeps its book unchanged.
    NoNewEvents {
        position: Option<Position>,
        events_discarded: usize,
    },
}

impl MergeOutcome {
    /// The updated book, if any event applied.
    pub fn into_book(self) -> Option<OrderBook> {
        match self {
            MergeOutcome::Applied(report) => Some(report.book),
            MergeOutcome::NoNewEvents { .. } => None,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, MergeOutcome::Applied(_))
    }
}

/// An event that passed validation, ready to apply.
#[derive(Debug, Clone)]
struct ValidatedEvent {
    sequence: Option<u64>,
    timestamp: Option<DateTime<Utc>>,
    timestamp_nanos: Option<i64>,
    timestamp_position: Option<i64>,
    /// Changes in application order: all bids, then all asks.
    changes: Vec<(Side, Price, Volume)>,
}

impl ValidatedEvent {
    fn position(&self, mode: FilterMode) -> Option<Position> {
        match mode {
            FilterMode::Sequence => self.sequence.map(Position::Sequence),
            FilterMode::Timestamp => self.timestamp_position.map(Position::Timestamp),
        }
    }
}

/// Applies event batches to order books.
#[derive(Debug, Clone, Default)]
pub struct MergeEngine {
    config: MergeConfig,
}

impl MergeEngine {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// Create an engine with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(MergeConfig::default())
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Decide the filtering mode for a batch.
    ///
    /// `Sequence` requires a sequence on the book and on every event.
    /// Otherwise `Timestamp`, which requires a timestamp on the book and on
    /// every event; failing that the input is unorderable.
    pub fn filter_mode(book: &OrderBook, events: &[UpdateEvent]) -> Result<FilterMode, MergeError> {
        if book.has_sequence() && events.iter().all(|e| e.sequence.is_some()) {
            return Ok(FilterMode::Sequence);
        }

        if book.timestamp_position().is_none() {
            return Err(MergeError::UnorderableInput {
                reason: "book carries neither sequence nor timestamp".to_string(),
            });
        }
        if let Some(index) = events.iter().position(|e| e.timestamp_position().is_none()) {
            return Err(MergeError::UnorderableInput {
                reason: format!("event {} carries no usable sequence or timestamp", index),
            });
        }

        Ok(FilterMode::Timestamp)
    }

    /// Apply a batch of events to a copy of `book`.
    pub fn apply_events(
        &self,
        book: &OrderBook,
        events: &[UpdateEvent],
    ) -> Result<MergeOutcome, MergeError> {
        if events.len() > self.config.max_batch_events {
            error!(
                size = events.len(),
                limit = self.config.max_batch_events,
                "Rejecting oversized event batch"
            );
            return Err(MergeError::BatchTooLarge {
                size: events.len(),
                limit: self.config.max_batch_events,
            });
        }

        if events.is_empty() {
            debug!("Empty event batch");
            return Ok(MergeOutcome::NoNewEvents {
                position: book.position_marker(),
                events_discarded: 0,
            });
        }

        let validated = events
            .iter()
            .enumerate()
            .map(|(index, event)| validate_event(index, event))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                error!(error = %e, "Rejecting event batch");
                e
            })?;

        let mode = Self::filter_mode(book, events).map_err(|e| {
            error!(error = %e, "Rejecting event batch");
            e
        })?;
        let current = book
            .position_in(mode)
            .ok_or_else(|| MergeError::UnorderableInput {
                reason: format!("book has no {} position", mode),
            })?;

        self.check_order(&validated, mode)?;

        let (fresh, stale): (Vec<ValidatedEvent>, Vec<ValidatedEvent>) = validated
            .into_iter()
            .partition(|e| e.position(mode).is_some_and(|p| p > current));

        for event in &stale {
            debug!(
                position = ?event.position(mode),
                book_position = %current,
                "Discarding stale event"
            );
        }

        if fresh.is_empty() {
            info!(
                mode = %mode,
                position = %current,
                discarded = stale.len(),
                "No new events"
            );
            return Ok(MergeOutcome::NoNewEvents {
                position: Some(current),
                events_discarded: stale.len(),
            });
        }

        let mut updated = book.clone();
        let mut stats = MergeStats {
            mode,
            previous_position: current,
            position: current,
            events_applied: 0,
            events_discarded: stale.len(),
            levels_inserted: 0,
            levels_updated: 0,
            levels_removed: 0,
            deletes_ignored: 0,
        };

        for event in &fresh {
            debug!(
                position = ?event.position(mode),
                changes = event.changes.len(),
                "Applying event"
            );
            apply_event(&mut updated, event, &mut stats);
            updated.advance_high_water(event.sequence, event.timestamp_position);
            stats.events_applied += 1;
        }

        // Cannot be None: every applied event had a position in this mode.
        stats.position = updated.position_in(mode).unwrap_or(current);

        info!(
            mode = %mode,
            from = %stats.previous_position,
            to = %stats.position,
            applied = stats.events_applied,
            discarded = stats.events_discarded,
            inserted = stats.levels_inserted,
            updated = stats.levels_updated,
            removed = stats.levels_removed,
            "Event batch applied"
        );

        Ok(MergeOutcome::Applied(MergeReport {
            book: updated,
            stats,
        }))
    }

    fn check_order(&self, events: &[ValidatedEvent], mode: FilterMode) -> Result<(), MergeError> {
        let positions: Vec<Option<Position>> = events.iter().map(|e| e.position(mode)).collect();
        let violation = positions
            .windows(2)
            .position(|pair| pair[1] < pair[0])
            .map(|i| i + 1);

        match (violation, self.config.order_check) {
            (None, _) => Ok(()),
            (Some(index), OrderCheck::Warn) => {
                warn!(
                    index,
                    mode = %mode,
                    "Event batch not ordered by position; applying in input order"
                );
                Ok(())
            }
            (Some(index), OrderCheck::Reject) => {
                error!(index, mode = %mode, "Rejecting out-of-order event batch");
                Err(MergeError::OutOfOrderBatch { index })
            }
        }
    }
}

/// Apply a batch with the default engine.
pub fn apply_events(book: &OrderBook, events: &[UpdateEvent]) -> Result<MergeOutcome, MergeError> {
    MergeEngine::with_defaults().apply_events(book, events)
}

fn validate_event(index: usize, event: &UpdateEvent) -> Result<ValidatedEvent, MergeError> {
    let malformed = |reason: String| MergeError::MalformedEvent { index, reason };

    let timestamp = event
        .timestamp_millis
        .map(millis_to_utc)
        .transpose()
        .map_err(|e| malformed(e.to_string()))?;
    let timestamp_position = event.timestamp_position();
    if event.timestamp_millis.is_some() && timestamp_position.is_none() {
        return Err(malformed("timestamp overflows nanosecond range".to_string()));
    }

    let mut changes = Vec::with_capacity(event.change_count());
    for side in Side::ALL {
        for (slot, change) in event.changes(side).iter().enumerate() {
            let price = change
                .price
                .as_ref()
                .ok_or_else(|| malformed(format!("{} change {} missing price", side, slot)))?
                .parse()
                .map_err(|e| malformed(format!("{} change {} price: {}", side, slot, e)))?;
            let volume = change
                .volume
                .as_ref()
                .ok_or_else(|| malformed(format!("{} change {} missing volume", side, slot)))?
                .parse()
                .and_then(Volume::try_new)
                .map_err(|e| malformed(format!("{} change {} volume: {}", side, slot, e)))?;
            changes.push((side, Price::new(price), volume));
        }
    }

    Ok(ValidatedEvent {
        sequence: event.sequence,
        timestamp,
        timestamp_nanos: event.timestamp_nanos,
        timestamp_position,
        changes,
    })
}

fn apply_event(book: &mut OrderBook, event: &ValidatedEvent, stats: &mut MergeStats) {
    for &(side, price, volume) in &event.changes {
        if volume.is_zero() {
            if book.remove(side, price).is_some() {
                stats.levels_removed += 1;
            } else {
                stats.deletes_ignored += 1;
            }
        } else if let Some(level) = book.get_mut(side, price) {
            level.volume = volume;
            stats.levels_updated += 1;
        } else {
            // New levels carry the provenance of the event that created them.
            book.upsert(PriceLevel {
                side,
                price,
                volume,
                sequence: event.sequence,
                timestamp: event.timestamp,
                timestamp_nanos: event.timestamp_nanos,
                extra: Default::default(),
            });
            stats.levels_inserted += 1;
        }
    }
}
