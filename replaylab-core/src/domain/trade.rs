//! TradeRecord — one completed round trip, derived from a closed position.
//!
//! Trade records are produced once at run end and never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::OrderSide;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub symbol: String,
    pub strategy_id: String,
    pub side: OrderSide,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub pnl_net: f64,
    pub commission: f64,
    pub slippage: f64,
    pub bars_held: u32,
    pub exit_reason: String,
    /// Net P&L as a multiple of dollar risk. `None` when the stop distance
    /// or requested quantity is zero — never NaN or infinity.
    pub r_multiple: Option<f64>,
    pub regime_at_entry: String,
    pub volatility_at_entry: String,
    pub signal_confidence: f64,
}

impl TradeRecord {
    pub fn is_winner(&self) -> bool {
        self.pnl_net > 0.0
    }

    pub fn is_loser(&self) -> bool {
        self.pnl_net < 0.0
    }

    /// Entry month key, e.g. "2024-03".
    pub fn entry_month(&self) -> String {
        self.entry_time.format("%Y-%m").to_string()
    }
}
