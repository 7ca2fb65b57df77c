//! Backtest output types consumed by CLIs and reports.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use replaylab_core::domain::TradeRecord;

use crate::config::BacktestConfig;
use crate::metrics::BacktestMetrics;
use crate::out_of_sample::OosReport;
use crate::walk_forward::{WalkForwardSummary, WalkForwardWindow};

/// One point on an equity or drawdown curve, stamped with replay time so
/// curves are reproducible across runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Normalized result for every backtest mode.
///
/// Walk-forward runs carry windows and a summary instead of trades and
/// curves; out-of-sample runs carry both metric sets with OOS primary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub config: BacktestConfig,
    pub metrics: BacktestMetrics,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<CurvePoint>,
    pub drawdown_curve: Vec<CurvePoint>,
    pub metrics_by_strategy: BTreeMap<String, BacktestMetrics>,
    pub metrics_by_regime: BTreeMap<String, BacktestMetrics>,
    pub metrics_by_session: BTreeMap<String, BacktestMetrics>,
    pub metrics_by_month: BTreeMap<String, BacktestMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wf_windows: Option<Vec<WalkForwardWindow>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wf_summary: Option<WalkForwardSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_metrics: Option<BacktestMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oos_metrics: Option<BacktestMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oos_report: Option<OosReport>,
    pub computed_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl BacktestResult {
    /// Skeleton result with everything optional left empty.
    pub fn bare(config: BacktestConfig, metrics: BacktestMetrics) -> Self {
        Self {
            config,
            metrics,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            drawdown_curve: Vec::new(),
            metrics_by_strategy: BTreeMap::new(),
            metrics_by_regime: BTreeMap::new(),
            metrics_by_session: BTreeMap::new(),
            metrics_by_month: BTreeMap::new(),
            wf_windows: None,
            wf_summary: None,
            is_metrics: None,
            oos_metrics: None,
            oos_report: None,
            computed_at: Utc::now(),
            duration_seconds: 0.0,
        }
    }
}
