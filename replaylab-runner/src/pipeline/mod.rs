//! Collaborator contracts consumed by the orchestrator.
//!
//! The orchestrator never reaches into a collaborator's state: everything
//! it needs — including the full between-runs reset — is part of these
//! traits, so any production implementation can be swapped in behind
//! them.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use replaylab_core::domain::{Account, Position, Timeframe};
use replaylab_core::events::{BarClosePayload, SignalDirection, SignalPayload};

mod paper;

pub use paper::{MaCrossoverSignals, NaiveRiskManager, PaperOrderManager};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown position '{0}'")]
    UnknownPosition(String),
    #[error("no market price available for '{0}'")]
    NoMarketPrice(String),
}

/// Fully resolved strategy signal handed to risk evaluation.
#[derive(Debug, Clone)]
pub struct Signal {
    pub signal_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub broker: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub direction: SignalDirection,
    pub confidence: f64,
    /// Last traded price at signal time, when a quote was seen.
    pub entry_price: Option<f64>,
    pub atr: f64,
}

/// Risk evaluation outcome for one signal.
#[derive(Debug, Clone)]
pub struct RiskCheck {
    pub approved: bool,
    pub quantity: f64,
    pub stop_loss: Option<f64>,
    /// Set when rejected.
    pub reason: Option<String>,
}

impl RiskCheck {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            quantity: 0.0,
            stop_loss: None,
            reason: Some(reason.into()),
        }
    }
}

/// Action requested by the risk monitor for an open position.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionAction {
    Close {
        position_id: String,
        reason: String,
    },
    UpdateTrailing {
        position_id: String,
        new_stop: f64,
    },
}

/// Strategy logic: bar in, optional signal out.
#[async_trait]
pub trait SignalEngine: Send + Sync {
    /// Evaluate a completed bar. `None` means no actionable opinion.
    async fn on_bar_close(&self, bar: &BarClosePayload) -> Option<SignalPayload>;
}

/// Position sizing, stop placement, and open-position supervision.
#[async_trait]
pub trait RiskManager: Send + Sync {
    async fn evaluate(
        &self,
        signal: &Signal,
        account: &Account,
        open_positions: &[Position],
        current_atr: f64,
    ) -> RiskCheck;

    async fn monitor_open_positions(
        &self,
        open_positions: &[Position],
        current_prices: &HashMap<String, f64>,
        current_atrs: &HashMap<String, f64>,
    ) -> Vec<PositionAction>;
}

/// Order/position bookkeeping.
///
/// `reset` must return the implementation to a state indistinguishable
/// from freshly constructed; multi-run modes depend on it.
#[async_trait]
pub trait OrderManager: Send + Sync {
    async fn submit_from_signal(
        &self,
        signal: &Signal,
        risk_check: &RiskCheck,
    ) -> Result<String, PipelineError>;

    fn get_open_positions(&self) -> Vec<Position>;
    fn get_positions(&self, include_closed: bool) -> Vec<Position>;

    async fn close_position(&self, position_id: &str, reason: &str) -> Result<(), PipelineError>;

    /// Move a stop. Returns false for unknown or closed positions.
    fn update_stop_loss(&self, position_id: &str, new_stop: f64) -> bool;

    fn get_account(&self) -> Account;

    /// Record the latest traded price for a symbol at a replay timestamp.
    /// Drives mark-to-market equity and exit pricing.
    fn mark_price(&self, symbol: &str, price: f64, at: DateTime<Utc>);

    fn reset(&self, initial_capital: f64);
}
