//! Tick — last-known quote for a symbol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quote snapshot. During replay, ticks are synthesized from bar closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub broker: String,
    pub timestamp: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub volume: f64,
}

impl Tick {
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    /// Quote midpoint.
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}
