//! Market-data retrieval seam
//!
//! The merge engine never fetches anything itself. A `MarketDataSource`
//! supplies raw snapshot rows and raw events for an instrument, venue and
//! time window; failures are passed up without interpretation.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use types::ids::{InstrumentId, VenueId};
use types::time::{millis_to_utc, TimeWindow};

use crate::events::UpdateEvent;
use crate::snapshot::RawSnapshotRow;

/// Retrieval failures, surfaced opaquely to the caller.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("market data unavailable: {0}")]
    Unavailable(String),
}

/// What to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub instrument: InstrumentId,
    pub venue: VenueId,
    pub window: TimeWindow,
}

impl Query {
    pub fn new(instrument: impl Into<String>, venue: impl Into<String>, window: TimeWindow) -> Self {
        Self {
            instrument: InstrumentId::new(instrument),
            venue: VenueId::new(venue),
            window,
        }
    }

    /// Same instrument and venue over a different window.
    pub fn with_window(&self, window: TimeWindow) -> Self {
        Self {
            window,
            ..self.clone()
        }
    }
}

/// Supplier of snapshots and events.
pub trait MarketDataSource {
    fn fetch_snapshot(&self, query: &Query) -> Result<Vec<RawSnapshotRow>, SourceError>;

    fn fetch_events(&self, query: &Query) -> Result<Vec<UpdateEvent>, SourceError>;
}

/// Rows without a timestamp cannot be placed in a window and are kept;
/// ordering them is the merge engine's job.
fn in_window(window: &TimeWindow, millis: Option<i64>) -> bool {
    match millis.map(millis_to_utc) {
        Some(Ok(instant)) => window.contains(instant),
        Some(Err(_)) | None => true,
    }
}

fn filter_snapshot(rows: &[RawSnapshotRow], window: &TimeWindow) -> Vec<RawSnapshotRow> {
    rows.iter()
        .filter(|row| in_window(window, row.effective_timestamp()))
        .cloned()
        .collect()
}

fn filter_events(events: &[UpdateEvent], window: &TimeWindow) -> Vec<UpdateEvent> {
    events
        .iter()
        .filter(|event| in_window(window, event.timestamp_millis))
        .cloned()
        .collect()
}

/// Source backed by rows held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    snapshot: Vec<RawSnapshotRow>,
    events: Vec<UpdateEvent>,
}

impl InMemorySource {
    pub fn new(snapshot: Vec<RawSnapshotRow>, events: Vec<UpdateEvent>) -> Self {
        Self { snapshot, events }
    }

    /// Replace the snapshot rows.
    pub fn set_snapshot(&mut self, rows: Vec<RawSnapshotRow>) {
        self.snapshot = rows;
    }

    /// Append events to the feed, as a venue would over time.
    pub fn push_events(&mut self, events: impl IntoIterator<Item = UpdateEvent>) {
        self.events.extend(events);
    }
}

impl MarketDataSource for InMemorySource {
    fn fetch_snapshot(&self, query: &Query) -> Result<Vec<RawSnapshotRow>, SourceError> {
        Ok(filter_snapshot(&self.snapshot, &query.window))
    }

    fn fetch_events(&self, query: &Query) -> Result<Vec<UpdateEvent>, SourceError> {
        Ok(filter_events(&self.events, &query.window))
    }
}

/// Source reading JSON arrays from disk on every fetch.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    snapshot_path: PathBuf,
    events_path: PathBuf,
}

impl JsonFileSource {
    pub fn new(snapshot_path: impl Into<PathBuf>, events_path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
            events_path: events_path.into(),
        }
    }

    fn read<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, SourceError> {
        let path_str = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path_str.clone(),
            source,
        })?;
        let rows: Vec<T> = serde_json::from_str(&text).map_err(|source| SourceError::Parse {
            path: path_str.clone(),
            source,
        })?;
        debug!(path = %path_str, rows = rows.len(), "Read market data file");
        Ok(rows)
    }
}

impl MarketDataSource for JsonFileSource {
    fn fetch_snapshot(&self, query: &Query) -> Result<Vec<RawSnapshotRow>, SourceError> {
        let rows: Vec<RawSnapshotRow> = Self::read(&self.snapshot_path)?;
        Ok(filter_snapshot(&rows, &query.window))
    }

    fn fetch_events(&self, query: &Query) -> Result<Vec<UpdateEvent>, SourceError> {
        let events: Vec<UpdateEvent> = Self::read(&self.events_path)?;
        Ok(filter_events(&events, &query.window))
    }
}

/// Window from `start` to `end`, clamping an inverted pair to a point.
pub fn window_between(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeWindow {
    TimeWindow::new(start, end).unwrap_or(TimeWindow { start, end: start })
}
