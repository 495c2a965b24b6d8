//! Book session workflow
//!
//! A `BookSession` exclusively owns the current book for one user session
//! and drives the two actions a presentation layer exposes:
//!
//! - **load snapshot**: fetch rows for an instrument/venue/window, normalize
//!   them and replace the held book.
//! - **apply new events**: fetch events from the book's latest timestamp up
//!   to a caller-supplied bound and merge them.
//!
//! The held book is replaced only after a step fully succeeds.

use chrono::{DateTime, Utc};
use tracing::{info, info_span, warn};
use types::ids::SessionId;
use types::time::{millis_to_utc, NANOS_PER_MILLI};

use crate::merge::{MergeConfig, MergeEngine, MergeError, MergeOutcome, MergeStats};
use crate::order_book::{DepthView, OrderBook};
use crate::snapshot::{normalize, SnapshotError};
use crate::source::{window_between, MarketDataSource, Query, SourceError};

/// Errors and informational states surfaced by a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("market data retrieval failed: {0}")]
    Source(#[from] SourceError),

    #[error("no order book loaded: load a snapshot first")]
    NoBook,

    #[error("order book has no timestamp to start the event window from")]
    NoTimeBound,

    #[error("no new events since the book's last position")]
    NoNewEvents,
}

impl SessionError {
    /// States that are reported to the user but are not faults.
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            SessionError::Snapshot(SnapshotError::EmptySnapshot) | SessionError::NoNewEvents
        )
    }

    /// Short label for display and logging.
    pub fn label(&self) -> &'static str {
        match self {
            SessionError::Snapshot(SnapshotError::EmptySnapshot) => "EmptySnapshot",
            SessionError::Snapshot(_) => "MalformedSnapshot",
            SessionError::Merge(MergeError::UnorderableInput { .. }) => "UnorderableInput",
            SessionError::Merge(MergeError::MalformedEvent { .. }) => "MalformedEvent",
            SessionError::Merge(MergeError::BatchTooLarge { .. }) => "BatchTooLarge",
            SessionError::Merge(MergeError::OutOfOrderBatch { .. }) => "OutOfOrderBatch",
            SessionError::Source(_) => "RetrievalFailed",
            SessionError::NoBook => "NoBook",
            SessionError::NoTimeBound => "NoTimeBound",
            SessionError::NoNewEvents => "NoNewEvents",
        }
    }
}

/// Per-session owner of the current book.
pub struct BookSession<S: MarketDataSource> {
    id: SessionId,
    source: S,
    engine: MergeEngine,
    query: Option<Query>,
    book: Option<OrderBook>,
    /// Latest combined timestamp the held book has been known to reflect.
    /// Survives events that carry no timestamp and empty the book.
    time_bound: Option<i64>,
}

impl<S: MarketDataSource> BookSession<S> {
    /// Create a session with the default merge configuration.
    pub fn new(source: S) -> Self {
        Self::with_config(source, MergeConfig::default())
    }

    pub fn with_config(source: S, config: MergeConfig) -> Self {
        let id = SessionId::new();
        info!(session_id = %id, "Book session created");
        Self {
            id,
            source,
            engine: MergeEngine::new(config),
            query: None,
            book: None,
            time_bound: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current book, if a snapshot has been loaded.
    pub fn book(&self) -> Option<&OrderBook> {
        self.book.as_ref()
    }

    /// Query the current book was loaded with.
    pub fn query(&self) -> Option<&Query> {
        self.query.as_ref()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Sorted depth view of the current book.
    pub fn depth(&self, max_levels: usize) -> Option<DepthView> {
        self.book.as_ref().map(|b| b.depth_view(max_levels))
    }

    /// Fetch and normalize a snapshot, replacing the held book.
    ///
    /// On any failure, including an empty snapshot, the previous book and
    /// query are kept.
    pub fn load_snapshot(&mut self, query: Query) -> Result<&OrderBook, SessionError> {
        let span = info_span!("load_snapshot", session_id = %self.id, instrument = %query.instrument, venue = %query.venue);
        let _guard = span.enter();

        let rows = self.source.fetch_snapshot(&query)?;
        let book = normalize(rows).map_err(|e| {
            warn!(error = %e, "Snapshot not loaded");
            e
        })?;

        info!(
            levels = book.len(),
            position = ?book.position_marker(),
            "Snapshot loaded"
        );
        self.query = Some(query);
        self.time_bound = book.timestamp_position();
        Ok(self.book.insert(book))
    }

    /// Fetch events from the book's latest timestamp up to `until` and merge
    /// them.
    pub fn apply_new_events(&mut self, until: DateTime<Utc>) -> Result<MergeStats, SessionError> {
        let span = info_span!("apply_new_events", session_id = %self.id, until = %until);
        let _guard = span.enter();

        let (book, query) = match (&self.book, &self.query) {
            (Some(book), Some(query)) => (book, query),
            _ => return Err(SessionError::NoBook),
        };

        // Window starts on the millisecond of the latest position; anything
        // already applied inside it is filtered by the engine.
        let bound = book.timestamp_position().max(self.time_bound);
        let start = bound
            .map(|ns| ns.div_euclid(NANOS_PER_MILLI))
            .and_then(|ms| millis_to_utc(ms).ok())
            .ok_or(SessionError::NoTimeBound)?;

        let events = self
            .source
            .fetch_events(&query.with_window(window_between(start, until)))?;
        if events.is_empty() {
            info!(from = %start, "No events fetched");
            return Err(SessionError::NoNewEvents);
        }

        match self.engine.apply_events(book, &events)? {
            MergeOutcome::Applied(report) => {
                self.time_bound = report.book.timestamp_position().max(bound);
                self.book = Some(report.book);
                Ok(report.stats)
            }
            MergeOutcome::NoNewEvents { .. } => Err(SessionError::NoNewEvents),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::UpdateEvent;
    use crate::merge::Position;
    use crate::snapshot::RawSnapshotRow;
    use crate::source::InMemorySource;
    use types::numeric::{Price, Volume};
    use types::side::Side;
    use types::time::TimeWindow;

    fn ms(millis: i64) -> DateTime<Utc> {
        millis_to_utc(millis).unwrap()
    }

    fn query() -> Query {
        Query::new("BTCUSDT", "binance", TimeWindow::unbounded())
    }

    fn snapshot_rows() -> Vec<RawSnapshotRow> {
        vec![
            RawSnapshotRow::new("bid", 100, 5)
                .with_sequence(10)
                .with_timestamp(1_000, 0),
            RawSnapshotRow::new("ask", 101, 2)
                .with_sequence(10)
                .with_timestamp(1_000, 0),
        ]
    }

    #[test]
    fn test_apply_before_load_is_no_book() {
        let mut session = BookSession::new(InMemorySource::default());
        let err = session.apply_new_events(ms(10_000)).unwrap_err();
        assert!(matches!(err, SessionError::NoBook));
        assert!(!err.is_informational());
    }

    #[test]
    fn test_empty_snapshot_keeps_previous_book() {
        let mut session = BookSession::new(InMemorySource::new(snapshot_rows(), Vec::new()));
        session.load_snapshot(query()).unwrap();
        let checksum = session.book().unwrap().checksum();

        session.source_mut().set_snapshot(Vec::new());
        let err = session.load_snapshot(query()).unwrap_err();

        assert!(err.is_informational());
        assert_eq!(err.label(), "EmptySnapshot");
        assert_eq!(session.book().unwrap().checksum(), checksum);
    }

    #[test]
    fn test_load_then_apply() {
        let mut session = BookSession::new(InMemorySource::new(
            snapshot_rows(),
            vec![
                UpdateEvent::sequenced(9).with_timestamp(900, 0).bid(100, 0),
                UpdateEvent::sequenced(11).with_timestamp(1_100, 0).bid(100, 3),
            ],
        ));
        session.load_snapshot(query()).unwrap();

        let stats = session.apply_new_events(ms(5_000)).unwrap();

        assert_eq!(stats.position, Position::Sequence(11));
        assert_eq!(stats.events_applied, 1);
        let book = session.book().unwrap();
        assert_eq!(
            book.get(Side::Bid, Price::from_u64(100)).unwrap().volume,
            Volume::from_u64(3)
        );
    }

    #[test]
    fn test_window_excludes_events_before_book() {
        let mut session = BookSession::new(InMemorySource::new(
            snapshot_rows(),
            vec![UpdateEvent::sequenced(9).with_timestamp(900, 0).bid(100, 0)],
        ));
        session.load_snapshot(query()).unwrap();

        let err = session.apply_new_events(ms(5_000)).unwrap_err();
        assert!(matches!(err, SessionError::NoNewEvents));
        assert!(err.is_informational());
    }

    #[test]
    fn test_repeated_apply_is_idempotent() {
        let mut session = BookSession::new(InMemorySource::new(
            snapshot_rows(),
            vec![UpdateEvent::sequenced(11).with_timestamp(1_100, 0).ask(102, 1)],
        ));
        session.load_snapshot(query()).unwrap();
        session.apply_new_events(ms(5_000)).unwrap();
        let checksum = session.book().unwrap().checksum();

        // Same window fetched again: event at 1_100 is re-delivered but stale
        let err = session.apply_new_events(ms(5_000)).unwrap_err();
        assert_eq!(err.label(), "NoNewEvents");
        assert_eq!(session.book().unwrap().checksum(), checksum);
    }

    #[test]
    fn test_untimed_book_has_no_time_bound() {
        let mut session = BookSession::new(InMemorySource::new(
            vec![RawSnapshotRow::new("bid", 100, 5).with_sequence(10)],
            Vec::new(),
        ));
        session.load_snapshot(query()).unwrap();

        assert!(matches!(
            session.apply_new_events(ms(5_000)),
            Err(SessionError::NoTimeBound)
        ));
    }

    #[test]
    fn test_refresh_after_untimed_events_empty_book() {
        let mut session = BookSession::new(InMemorySource::new(
            vec![RawSnapshotRow::new("bid", 100, 5)
                .with_sequence(10)
                .with_timestamp(1_000, 0)],
            vec![UpdateEvent::sequenced(11).bid(100, 0)],
        ));
        session.load_snapshot(query()).unwrap();

        session.apply_new_events(ms(5_000)).unwrap();
        assert!(session.book().unwrap().is_empty());
        assert_eq!(session.book().unwrap().timestamp_position(), None);

        session
            .source_mut()
            .push_events(vec![UpdateEvent::sequenced(12).bid(100, 7)]);
        let stats = session.apply_new_events(ms(5_000)).unwrap();

        assert_eq!(stats.position, Position::Sequence(12));
        assert_eq!(stats.events_discarded, 1);
        assert_eq!(
            session.book().unwrap().get(Side::Bid, Price::from_u64(100)).unwrap().volume,
            Volume::from_u64(7)
        );
    }

    #[test]
    fn test_rejected_batch_keeps_book() {
        let mut session = BookSession::new(InMemorySource::new(
            snapshot_rows(),
            vec![
                UpdateEvent::sequenced(11).with_timestamp(1_100, 0).bid(100, 3),
                UpdateEvent::sequenced(12).with_timestamp(1_200, 0).bid(99, -1),
            ],
        ));
        session.load_snapshot(query()).unwrap();
        let before = session.book().unwrap().clone();

        let err = session.apply_new_events(ms(5_000)).unwrap_err();
        assert_eq!(err.label(), "MalformedEvent");
        assert!(!err.is_informational());
        assert_eq!(session.book().unwrap(), &before);
    }

    #[test]
    fn test_depth_view() {
        let mut session = BookSession::new(InMemorySource::new(snapshot_rows(), Vec::new()));
        assert!(session.depth(10).is_none());

        session.load_snapshot(query()).unwrap();
        let depth = session.depth(10).unwrap();
        assert_eq!(depth.bids.len(), 1);
        assert_eq!(depth.asks.len(), 1);
        assert_eq!(depth.sequence, Some(10));
    }
}
