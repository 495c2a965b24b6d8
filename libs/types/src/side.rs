//! Book side

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::SideError;

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Resting buy interest
    Bid,
    /// Resting sell interest
    Ask,
}

impl Side {
    /// Sides in the order change lists are applied: bids first, then asks.
    pub const ALL: [Side; 2] = [Side::Bid, Side::Ask];

    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = SideError;

    /// Venues spell sides in several ways; accept the common ones.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bid" | "bids" | "buy" | "b" => Ok(Side::Bid),
            "ask" | "asks" | "sell" | "a" | "s" => Ok(Side::Ask),
            _ => Err(SideError::Unknown(s.to_string())),
        }
    }
}
