//! ReplayLab Runner — backtest orchestration on top of `replaylab-core`.
//!
//! This crate builds on the core event bus and windowed data layer to
//! provide:
//! - Collaborator contracts (signal engine, risk manager, order manager)
//!   plus paper implementations for end-to-end runs
//! - The `Backtester` orchestrator (single pass, walk-forward,
//!   out-of-sample)
//! - Trade metrics and grouped performance breakdowns
//! - TOML-backed run configuration with content-hash run ids

pub mod config;
pub mod engine;
pub mod grouping;
pub mod metrics;
pub mod out_of_sample;
pub mod pipeline;
pub mod result;
pub mod walk_forward;

pub use config::{BacktestConfig, BacktestMode, ConfigError};
pub use engine::{Backtester, BacktestError};
pub use metrics::BacktestMetrics;
pub use result::{BacktestResult, CurvePoint};
