//! Serializable backtest configuration.
//!
//! Configs are loaded from TOML, validated before any run state is
//! touched, and hashed into a deterministic run id so identical runs can
//! be recognized by downstream tooling. Date fields are RFC 3339 strings
//! in the file; naive timestamps fail deserialization.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use replaylab_core::domain::Timeframe;
use replaylab_core::time::DateRange;

/// Unique identifier for a backtest run (content-addressable hash).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config field '{0}' must be non-empty")]
    EmptySet(&'static str),
    #[error("end_date must be after start_date")]
    InvalidDates,
    #[error("initial_capital must be > 0, got {0}")]
    InvalidCapital(f64),
    #[error("oos_pct must be in (0, 1), got {0}")]
    InvalidOosPct(f64),
}

/// Supported backtest execution modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacktestMode {
    Simple,
    WalkForward,
    OutOfSample,
}

/// Complete runtime configuration for one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub strategy_ids: Vec<String>,
    pub symbols: Vec<String>,
    pub brokers: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default = "default_mode")]
    pub mode: BacktestMode,
    /// Walk-forward window sizes, in bars of the first timeframe.
    #[serde(default = "default_wf_train")]
    pub wf_train_periods: usize,
    #[serde(default = "default_wf_test")]
    pub wf_test_periods: usize,
    #[serde(default = "default_wf_step")]
    pub wf_step_periods: usize,
    /// Fraction of the period reserved for out-of-sample validation.
    #[serde(default = "default_oos_pct")]
    pub oos_pct: f64,
    /// Purge/embargo width around the IS/OOS boundary, in bars.
    #[serde(default = "default_purge_bars")]
    pub purge_bars: usize,
    #[serde(default = "default_capital")]
    pub initial_capital: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Bars replayed to prime indicators before any event is emitted.
    #[serde(default = "default_warmup")]
    pub warmup_bars: usize,
}

fn default_mode() -> BacktestMode {
    BacktestMode::Simple
}
fn default_wf_train() -> usize {
    12
}
fn default_wf_test() -> usize {
    3
}
fn default_wf_step() -> usize {
    3
}
fn default_oos_pct() -> f64 {
    0.20
}
fn default_purge_bars() -> usize {
    10
}
fn default_capital() -> f64 {
    10_000.0
}
fn default_currency() -> String {
    "USD".to_string()
}
fn default_warmup() -> usize {
    200
}

impl BacktestConfig {
    pub fn from_toml_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject incomplete configs before any run state is mutated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.strategy_ids.is_empty() {
            return Err(ConfigError::EmptySet("strategy_ids"));
        }
        if self.symbols.is_empty() {
            return Err(ConfigError::EmptySet("symbols"));
        }
        if self.brokers.is_empty() {
            return Err(ConfigError::EmptySet("brokers"));
        }
        if self.timeframes.is_empty() {
            return Err(ConfigError::EmptySet("timeframes"));
        }
        if self.end_date <= self.start_date {
            return Err(ConfigError::InvalidDates);
        }
        if self.initial_capital <= 0.0 {
            return Err(ConfigError::InvalidCapital(self.initial_capital));
        }
        if !(self.oos_pct > 0.0 && self.oos_pct < 1.0) {
            return Err(ConfigError::InvalidOosPct(self.oos_pct));
        }
        Ok(())
    }

    pub fn date_range(&self) -> DateRange {
        DateRange::new(self.start_date, self.end_date)
    }

    /// Computes a deterministic hash ID for this configuration.
    ///
    /// Two runs with identical configs share the same RunId, so results
    /// can be matched up without comparing full configs.
    pub fn run_id(&self) -> RunId {
        let json = serde_json::to_string(self).expect("BacktestConfig serialization failed");
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}
