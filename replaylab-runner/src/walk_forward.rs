//! Walk-forward window planning and summary statistics.
//!
//! Windows are planned in bar units of the driving timeframe: a train
//! span, an adjacent test span, and a step between window starts. The
//! orchestrator runs one fully reset pass per span; this module only does
//! the calendar arithmetic and the robustness verdict.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use replaylab_core::domain::Timeframe;
use replaylab_core::time::DateRange;

use crate::metrics::BacktestMetrics;

#[derive(Debug, Error)]
pub enum WalkForwardError {
    #[error("period fits only {0} walk-forward windows, need at least 3")]
    PeriodTooShort(usize),
}

/// One planned train/test span pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowPlan {
    pub window_id: usize,
    pub train: DateRange,
    pub test: DateRange,
}

/// One evaluated walk-forward window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardWindow {
    pub window_id: usize,
    pub train: DateRange,
    pub test: DateRange,
    pub train_metrics: BacktestMetrics,
    pub test_metrics: BacktestMetrics,
    /// Test Sharpe over train Sharpe; 0 when the train Sharpe is ~zero.
    pub degradation_score: f64,
}

impl WalkForwardWindow {
    pub fn new(
        plan: WindowPlan,
        train_metrics: BacktestMetrics,
        test_metrics: BacktestMetrics,
    ) -> Self {
        let degradation_score = if train_metrics.sharpe_ratio.abs() < 1e-12 {
            0.0
        } else {
            test_metrics.sharpe_ratio / train_metrics.sharpe_ratio
        };
        Self {
            window_id: plan.window_id,
            train: plan.train,
            test: plan.test,
            train_metrics,
            test_metrics,
            degradation_score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobustnessVerdict {
    Robust,
    Marginal,
    Overfit,
}

/// Statistical summary across all walk-forward windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardSummary {
    pub avg_degradation_score: f64,
    pub pct_windows_profitable: f64,
    pub sharpe_stability: f64,
    pub overall_verdict: RobustnessVerdict,
}

/// Generate rolling train/test windows over `range`.
///
/// Fails when fewer than 3 windows fit, which would make any robustness
/// statement meaningless.
pub fn plan_windows(
    range: &DateRange,
    train_periods: usize,
    test_periods: usize,
    step_periods: usize,
    timeframe: Timeframe,
) -> Result<Vec<WindowPlan>, WalkForwardError> {
    let bar = chrono::Duration::seconds(timeframe.duration().as_secs() as i64);
    let train_delta = bar * train_periods.max(1) as i32;
    let test_delta = bar * test_periods.max(1) as i32;
    let step_delta = bar * step_periods.max(1) as i32;

    let mut windows = Vec::new();
    let mut cursor = range.start;
    loop {
        let train_end = cursor + train_delta;
        let test_end = train_end + test_delta;
        if test_end > range.end {
            break;
        }
        windows.push(WindowPlan {
            window_id: windows.len(),
            train: DateRange::new(cursor, train_end),
            test: DateRange::new(train_end, test_end),
        });
        cursor += step_delta;
    }
    if windows.len() < 3 {
        return Err(WalkForwardError::PeriodTooShort(windows.len()));
    }
    Ok(windows)
}

/// Summarize evaluated windows into a single robustness verdict.
pub fn summarize(windows: &[WalkForwardWindow]) -> WalkForwardSummary {
    if windows.is_empty() {
        return WalkForwardSummary {
            avg_degradation_score: 0.0,
            pct_windows_profitable: 0.0,
            sharpe_stability: 0.0,
            overall_verdict: RobustnessVerdict::Overfit,
        };
    }
    let n = windows.len() as f64;
    let avg_degradation = windows.iter().map(|w| w.degradation_score).sum::<f64>() / n;
    let pct_profitable = windows
        .iter()
        .filter(|w| w.test_metrics.sharpe_ratio > 0.0)
        .count() as f64
        / n;
    let test_sharpes: Vec<f64> = windows.iter().map(|w| w.test_metrics.sharpe_ratio).collect();
    let mean = test_sharpes.iter().sum::<f64>() / n;
    let stability =
        (test_sharpes.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n).sqrt();

    let overall_verdict = if avg_degradation >= 0.8 && pct_profitable >= 0.7 {
        RobustnessVerdict::Robust
    } else if avg_degradation >= 0.5 && pct_profitable >= 0.5 {
        RobustnessVerdict::Marginal
    } else {
        RobustnessVerdict::Overfit
    };
    WalkForwardSummary {
        avg_degradation_score: avg_degradation,
        pct_windows_profitable: pct_profitable,
        sharpe_stability: stability,
        overall_verdict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaylab_core::time::parse_utc;

    fn range(days: i64) -> DateRange {
        let start = parse_utc("2024-01-01T00:00:00Z").unwrap();
        DateRange::new(start, start + chrono::Duration::days(days))
    }

    fn window(train_sharpe: f64, test_sharpe: f64) -> WalkForwardWindow {
        let plan = WindowPlan {
            window_id: 0,
            train: range(10),
            test: range(3),
        };
        let train = BacktestMetrics {
            sharpe_ratio: train_sharpe,
            ..Default::default()
        };
        let test = BacktestMetrics {
            sharpe_ratio: test_sharpe,
            ..Default::default()
        };
        WalkForwardWindow::new(plan, train, test)
    }

    #[test]
    fn plans_rolling_windows_in_bar_units() {
        // 30 days of H1 bars: train 240 bars (10d), test 72 bars (3d), step 72.
        let windows = plan_windows(&range(30), 240, 72, 72, Timeframe::H1).unwrap();
        assert!(windows.len() >= 3);
        let first = &windows[0];
        assert_eq!(first.train.end, first.test.start);
        assert_eq!(
            first.train.end - first.train.start,
            chrono::Duration::hours(240)
        );
        // Step moves the train start, not the test end.
        assert_eq!(
            windows[1].train.start - windows[0].train.start,
            chrono::Duration::hours(72)
        );
        for w in &windows {
            assert!(w.test.end <= range(30).end);
        }
    }

    #[test]
    fn too_short_period_is_rejected() {
        let err = plan_windows(&range(5), 240, 72, 72, Timeframe::H1).unwrap_err();
        assert!(matches!(err, WalkForwardError::PeriodTooShort(_)));
    }

    #[test]
    fn degradation_guards_zero_train_sharpe() {
        assert_eq!(window(0.0, 1.5).degradation_score, 0.0);
        assert!((window(2.0, 1.0).degradation_score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn summary_verdicts_follow_thresholds() {
        let robust = summarize(&[window(1.0, 0.9), window(1.0, 0.85), window(1.0, 0.95)]);
        assert_eq!(robust.overall_verdict, RobustnessVerdict::Robust);

        let marginal = summarize(&[window(1.0, 0.75), window(1.0, 0.7), window(1.0, 0.2)]);
        assert_eq!(marginal.overall_verdict, RobustnessVerdict::Marginal);

        let overfit = summarize(&[window(1.0, -0.5), window(1.0, -0.2), window(1.0, 0.1)]);
        assert_eq!(overfit.overall_verdict, RobustnessVerdict::Overfit);
        assert_eq!(summarize(&[]).overall_verdict, RobustnessVerdict::Overfit);
    }
}
