//! Positions and accounts — owned by the order-management collaborator.
//!
//! The orchestrator only ever reads these. Mutation happens behind the
//! `OrderManager` contract; there is deliberately no way to close or
//! re-price a position from outside that contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Timeframe;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for long exposure, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Structured metadata recorded at entry/exit time.
///
/// Absent values stay `None`; trade derivation substitutes documented
/// defaults instead of guessing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionMetadata {
    pub timeframe: Option<Timeframe>,
    pub bars_held: Option<u32>,
    pub requested_quantity: Option<f64>,
    pub exit_reason: Option<String>,
    pub regime_trend: Option<String>,
    pub regime_volatility: Option<String>,
    pub signal_confidence: Option<f64>,
    pub slippage: f64,
}

/// One position in the order manager's book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: String,
    pub symbol: String,
    pub broker: String,
    pub strategy_id: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub close_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_pnl: f64,
    pub commission_total: f64,
    pub status: PositionStatus,
    pub metadata: PositionMetadata,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Mark-to-market P&L against a given price.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.side.sign() * self.quantity
    }
}

/// Account snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub balance: f64,
    pub equity: f64,
    pub unrealized_pnl: f64,
    pub margin_used: f64,
    pub currency: String,
}

impl Account {
    pub fn with_capital(initial_capital: f64) -> Self {
        Self {
            balance: initial_capital,
            equity: initial_capital,
            unrealized_pnl: 0.0,
            margin_used: 0.0,
            currency: "USD".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::parse_utc;

    #[test]
    fn unrealized_pnl_respects_side() {
        let position = Position {
            position_id: "p-1".into(),
            symbol: "EURUSD".into(),
            broker: "paper".into(),
            strategy_id: "s".into(),
            side: OrderSide::Sell,
            quantity: 2.0,
            entry_price: 100.0,
            current_price: 100.0,
            close_price: None,
            stop_loss: None,
            opened_at: parse_utc("2024-01-02T10:00:00Z").unwrap(),
            closed_at: None,
            realized_pnl: 0.0,
            commission_total: 0.0,
            status: PositionStatus::Open,
            metadata: PositionMetadata::default(),
        };
        assert_eq!(position.unrealized_pnl(95.0), 10.0);
        assert_eq!(position.unrealized_pnl(105.0), -10.0);
    }
}
