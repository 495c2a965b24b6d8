//! Types library for order book reconstruction
//!
//! Provides the primitives shared by the snapshot loader, the merge engine
//! and the session workflow, keeping arithmetic decimal-exact and instants
//! explicit about their units.
//!
//! # Modules
//! - `ids`: Identifiers (InstrumentId, VenueId, SessionId)
//! - `numeric`: Decimal newtypes (Price, Volume)
//! - `side`: Book side (Bid, Ask)
//! - `time`: UTC instants, nanosecond positions and time windows
//! - `errors`: Validation error taxonomy

pub mod ids;
pub mod numeric;
pub mod side;
pub mod time;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::side::*;
    pub use crate::time::*;
    pub use crate::errors::*;
}
