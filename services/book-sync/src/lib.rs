//! Order Book Reconstruction
//!
//! Rebuilds a current view of an order book from two independently fetched
//! datasets:
//! - A point-in-time snapshot of all price levels
//! - A batch of incremental update events fetched afterwards
//!
//! The merge point between them is the book's position marker: the highest
//! sequence number seen, or the highest nanosecond timestamp when the venue
//! does not sequence its data. Only events strictly after the marker are
//! applied, so fetching overlapping windows again and again never applies
//! an event twice.
//!
//! # Architecture
//!
//! ```text
//!   MarketDataSource
//!     │          │
//! snapshot     events
//!     │          │
//! ┌───▼────┐     │
//! │Snapshot│     │
//! │ Loader │     │
//! └───┬────┘     │
//!     │ OrderBook│
//! ┌───▼──────────▼──┐
//! │  Merge Engine   │  ← mode, filter, ordered apply
//! └───────┬─────────┘
//!         │ OrderBook'
//! ┌───────▼─────────┐
//! │  Book Session   │  ← owns the current book
//! └─────────────────┘
//! ```

pub mod events;
pub mod merge;
pub mod order_book;
pub mod session;
pub mod snapshot;
pub mod source;

pub use events::{LevelChange, UpdateEvent};
pub use merge::{
    apply_events, FilterMode, MergeConfig, MergeEngine, MergeError, MergeOutcome, MergeReport,
    MergeStats, OrderCheck, Position,
};
pub use order_book::{DepthView, OrderBook, PriceLevel};
pub use session::{BookSession, SessionError};
pub use snapshot::{normalize, RawSnapshotRow, SnapshotError};
pub use source::{InMemorySource, JsonFileSource, MarketDataSource, Query, SourceError};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
