//! Out-of-sample split and validation verdict.
//!
//! The period is split into an in-sample (IS) span and a trailing
//! out-of-sample (OOS) span, with a purge before the boundary and an
//! equal embargo after it, both in bar units, so information cannot bleed
//! across the cut.

use serde::{Deserialize, Serialize};

use replaylab_core::domain::Timeframe;
use replaylab_core::time::DateRange;

use crate::metrics::BacktestMetrics;
use crate::walk_forward::RobustnessVerdict;

/// IS/OOS spans after purge and embargo are applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitPeriods {
    pub in_sample: DateRange,
    pub out_of_sample: DateRange,
}

/// Split `range` so the trailing `oos_pct` fraction is out-of-sample.
pub fn split_period(
    range: &DateRange,
    oos_pct: f64,
    purge_bars: usize,
    timeframe: Timeframe,
) -> SplitPeriods {
    let total = range.end - range.start;
    let oos_fraction = oos_pct.clamp(0.0, 1.0);
    let oos_span = chrono::Duration::seconds((total.num_seconds() as f64 * oos_fraction) as i64);
    let boundary = range.end - oos_span;
    let gap = chrono::Duration::seconds(timeframe.duration().as_secs() as i64) * purge_bars as i32;
    SplitPeriods {
        in_sample: DateRange::new(range.start, boundary - gap),
        out_of_sample: DateRange::new(boundary + gap, range.end),
    }
}

/// Compact OOS validation report with actionable recommendations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OosReport {
    pub is_vs_oos_sharpe_ratio: f64,
    pub is_vs_oos_profit_factor: f64,
    pub verdict: RobustnessVerdict,
    pub recommendations: Vec<String>,
}

/// Compare IS and OOS metric sets.
pub fn oos_report(is_metrics: &BacktestMetrics, oos_metrics: &BacktestMetrics) -> OosReport {
    let sharpe_ratio = if is_metrics.sharpe_ratio.abs() > 1e-12 {
        oos_metrics.sharpe_ratio / is_metrics.sharpe_ratio
    } else {
        0.0
    };
    let profit_factor_ratio = if is_metrics.profit_factor > 1e-12 {
        oos_metrics.profit_factor / is_metrics.profit_factor
    } else {
        0.0
    };
    let win_rate_delta = (oos_metrics.win_rate - is_metrics.win_rate).abs();

    let verdict = if sharpe_ratio >= 0.8 && oos_metrics.profit_factor >= 1.0 && win_rate_delta <= 0.15
    {
        RobustnessVerdict::Robust
    } else if sharpe_ratio >= 0.5 && oos_metrics.profit_factor >= 0.9 {
        RobustnessVerdict::Marginal
    } else {
        RobustnessVerdict::Overfit
    };

    let mut recommendations = Vec::new();
    if verdict == RobustnessVerdict::Overfit {
        recommendations.push("reduce strategy parameter complexity".to_string());
        recommendations.push("expand training period and retest".to_string());
    }
    if oos_metrics.profit_factor < 1.0 {
        recommendations.push("improve risk/reward profile before live usage".to_string());
    }
    if win_rate_delta > 0.15 {
        recommendations.push("investigate distribution drift between IS and OOS".to_string());
    }
    OosReport {
        is_vs_oos_sharpe_ratio: sharpe_ratio,
        is_vs_oos_profit_factor: profit_factor_ratio,
        verdict,
        recommendations,
    }
}
