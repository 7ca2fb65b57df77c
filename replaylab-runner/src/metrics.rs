//! Performance metrics — pure functions that compute backtest statistics.
//!
//! Every metric is a pure function: equity values and/or trade list in,
//! scalar out. Ratios carry explicit zero-denominator guards; nothing
//! here returns NaN or infinity.

use serde::{Deserialize, Serialize};

use replaylab_core::domain::TradeRecord;

/// Aggregate performance metrics for a single backtest run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub breakeven_trades: usize,
    pub win_rate: f64,
    pub total_pnl_net: f64,
    pub total_commission: f64,
    pub total_slippage: f64,
    pub avg_pnl_per_trade: f64,
    pub avg_pnl_winners: f64,
    pub avg_pnl_losers: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub payoff_ratio: f64,
    pub avg_r_multiple: f64,
    pub max_drawdown_pct: f64,
    pub max_drawdown_duration_bars: usize,
    pub avg_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub longest_winning_streak: usize,
    pub longest_losing_streak: usize,
    pub avg_bars_in_trade: f64,
    pub trades_per_month: f64,
}

impl BacktestMetrics {
    /// Compute all metrics from a trade list and equity values.
    pub fn compute(trades: &[TradeRecord], equity: &[f64]) -> Self {
        let winners: Vec<f64> = trades
            .iter()
            .filter(|t| t.is_winner())
            .map(|t| t.pnl_net)
            .collect();
        let losers: Vec<f64> = trades
            .iter()
            .filter(|t| t.is_loser())
            .map(|t| t.pnl_net)
            .collect();
        let total = trades.len();
        let avg_winners = mean(&winners);
        let avg_losers = mean(&losers);
        let (max_dd, dd_duration) = max_drawdown(equity);
        let (win_streak, loss_streak) = streaks(trades);
        let r_multiples: Vec<f64> = trades.iter().filter_map(|t| t.r_multiple).collect();
        let bars: Vec<f64> = trades.iter().map(|t| f64::from(t.bars_held)).collect();

        Self {
            total_trades: total,
            winning_trades: winners.len(),
            losing_trades: losers.len(),
            breakeven_trades: total - winners.len() - losers.len(),
            win_rate: if total > 0 {
                winners.len() as f64 / total as f64
            } else {
                0.0
            },
            total_pnl_net: trades.iter().map(|t| t.pnl_net).sum(),
            total_commission: trades.iter().map(|t| t.commission).sum(),
            total_slippage: trades.iter().map(|t| t.slippage).sum(),
            avg_pnl_per_trade: if total > 0 {
                trades.iter().map(|t| t.pnl_net).sum::<f64>() / total as f64
            } else {
                0.0
            },
            avg_pnl_winners: avg_winners,
            avg_pnl_losers: avg_losers,
            profit_factor: profit_factor(trades),
            expectancy: expectancy(trades),
            payoff_ratio: if avg_losers < 0.0 {
                (avg_winners / avg_losers).abs()
            } else {
                0.0
            },
            avg_r_multiple: mean(&r_multiples),
            max_drawdown_pct: max_dd,
            max_drawdown_duration_bars: dd_duration,
            avg_drawdown_pct: avg_drawdown(equity),
            sharpe_ratio: sharpe_ratio(equity, 0.02),
            sortino_ratio: sortino_ratio(equity, 0.02),
            longest_winning_streak: win_streak,
            longest_losing_streak: loss_streak,
            avg_bars_in_trade: mean(&bars),
            trades_per_month: trades_per_month(trades),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Gross profit divided by absolute gross loss, capped at 100.
///
/// An all-winning run would otherwise be infinite, which poisons
/// averaging and JSON output.
pub fn profit_factor(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let gross_profit: f64 = trades
        .iter()
        .filter(|t| t.pnl_net > 0.0)
        .map(|t| t.pnl_net)
        .sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.pnl_net < 0.0)
        .map(|t| t.pnl_net.abs())
        .sum();
    if gross_loss < 1e-10 {
        return if gross_profit > 0.0 { 100.0 } else { 0.0 };
    }
    (gross_profit / gross_loss).min(100.0)
}

/// Monetary expectancy per trade: win_rate * avg_win - loss_rate * avg_loss.
pub fn expectancy(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let winners: Vec<f64> = trades
        .iter()
        .filter(|t| t.is_winner())
        .map(|t| t.pnl_net)
        .collect();
    let losers: Vec<f64> = trades
        .iter()
        .filter(|t| t.is_loser())
        .map(|t| t.pnl_net.abs())
        .collect();
    let n = trades.len() as f64;
    let win_rate = winners.len() as f64 / n;
    let loss_rate = losers.len() as f64 / n;
    win_rate * mean(&winners) - loss_rate * mean(&losers)
}

/// Max drawdown percent and its duration in curve points.
///
/// Duration counts consecutive points below the running peak at the
/// moment the deepest trough was reached.
pub fn max_drawdown(equity: &[f64]) -> (f64, usize) {
    if equity.is_empty() {
        return (0.0, 0);
    }
    let mut peak = equity[0];
    let mut max_dd = 0.0_f64;
    let mut max_duration = 0;
    let mut duration = 0;
    for &value in equity {
        if value >= peak {
            peak = value;
            duration = 0;
        } else {
            duration += 1;
            let dd = if peak > 0.0 {
                (peak - value) / peak * 100.0
            } else {
                0.0
            };
            if dd > max_dd {
                max_dd = dd;
                max_duration = duration;
            }
        }
    }
    (max_dd, max_duration)
}

/// Mean of the running drawdown-percent series.
pub fn avg_drawdown(equity: &[f64]) -> f64 {
    if equity.is_empty() {
        return 0.0;
    }
    let mut peak = f64::MIN;
    let drawdowns: Vec<f64> = equity
        .iter()
        .map(|&value| {
            peak = peak.max(value);
            if peak.abs() > 1e-10 {
                (peak - value) / peak * 100.0
            } else {
                0.0
            }
        })
        .collect();
    mean(&drawdowns)
}

/// Annualized Sharpe ratio from per-point returns.
///
/// Returns 0.0 for fewer than 2 points or zero variance.
pub fn sharpe_ratio(equity: &[f64], risk_free_rate: f64) -> f64 {
    let returns = point_returns(equity);
    if returns.is_empty() {
        return 0.0;
    }
    let rf_per_period = risk_free_rate / 252.0;
    let excess: Vec<f64> = returns.iter().map(|r| r - rf_per_period).collect();
    let std = std_dev(&excess);
    if std < 1e-12 {
        return 0.0;
    }
    (mean(&excess) / std) * 252.0_f64.sqrt()
}

/// Annualized Sortino ratio using downside deviation only.
pub fn sortino_ratio(equity: &[f64], risk_free_rate: f64) -> f64 {
    let returns = point_returns(equity);
    if returns.is_empty() {
        return 0.0;
    }
    let rf_per_period = risk_free_rate / 252.0;
    let excess: Vec<f64> = returns.iter().map(|r| r - rf_per_period).collect();
    let downside_var = excess
        .iter()
        .map(|r| r.min(0.0).powi(2))
        .sum::<f64>()
        / excess.len() as f64;
    let downside_std = downside_var.sqrt();
    if downside_std < 1e-12 {
        return 0.0;
    }
    (mean(&excess) / downside_std) * 252.0_f64.sqrt()
}

/// Longest winning and losing streaks over the trade sequence.
/// A breakeven trade resets both.
pub fn streaks(trades: &[TradeRecord]) -> (usize, usize) {
    let mut max_win = 0;
    let mut max_loss = 0;
    let mut current_win = 0;
    let mut current_loss = 0;
    for trade in trades {
        if trade.is_winner() {
            current_win += 1;
            current_loss = 0;
        } else if trade.is_loser() {
            current_loss += 1;
            current_win = 0;
        } else {
            current_win = 0;
            current_loss = 0;
        }
        max_win = max_win.max(current_win);
        max_loss = max_loss.max(current_loss);
    }
    (max_win, max_loss)
}

/// Trades divided by the number of distinct entry months.
pub fn trades_per_month(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let months: std::collections::HashSet<String> =
        trades.iter().map(TradeRecord::entry_month).collect();
    trades.len() as f64 / months.len() as f64
}

/// Arithmetic mean of metric sets for walk-forward composition.
///
/// Count fields are re-rounded to the nearest integer; grouped
/// breakdowns do not exist at this level.
pub fn average(values: &[BacktestMetrics]) -> BacktestMetrics {
    if values.is_empty() {
        return BacktestMetrics::default();
    }
    let n = values.len() as f64;
    let mean_of = |get: fn(&BacktestMetrics) -> f64| values.iter().map(get).sum::<f64>() / n;
    let count_of = |get: fn(&BacktestMetrics) -> usize| {
        (values.iter().map(|m| get(m) as f64).sum::<f64>() / n).round() as usize
    };
    BacktestMetrics {
        total_trades: count_of(|m| m.total_trades),
        winning_trades: count_of(|m| m.winning_trades),
        losing_trades: count_of(|m| m.losing_trades),
        breakeven_trades: count_of(|m| m.breakeven_trades),
        win_rate: mean_of(|m| m.win_rate),
        total_pnl_net: mean_of(|m| m.total_pnl_net),
        total_commission: mean_of(|m| m.total_commission),
        total_slippage: mean_of(|m| m.total_slippage),
        avg_pnl_per_trade: mean_of(|m| m.avg_pnl_per_trade),
        avg_pnl_winners: mean_of(|m| m.avg_pnl_winners),
        avg_pnl_losers: mean_of(|m| m.avg_pnl_losers),
        profit_factor: mean_of(|m| m.profit_factor),
        expectancy: mean_of(|m| m.expectancy),
        payoff_ratio: mean_of(|m| m.payoff_ratio),
        avg_r_multiple: mean_of(|m| m.avg_r_multiple),
        max_drawdown_pct: mean_of(|m| m.max_drawdown_pct),
        max_drawdown_duration_bars: count_of(|m| m.max_drawdown_duration_bars),
        avg_drawdown_pct: mean_of(|m| m.avg_drawdown_pct),
        sharpe_ratio: mean_of(|m| m.sharpe_ratio),
        sortino_ratio: mean_of(|m| m.sortino_ratio),
        longest_winning_streak: count_of(|m| m.longest_winning_streak),
        longest_losing_streak: count_of(|m| m.longest_losing_streak),
        avg_bars_in_trade: mean_of(|m| m.avg_bars_in_trade),
        trades_per_month: mean_of(|m| m.trades_per_month),
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn point_returns(equity: &[f64]) -> Vec<f64> {
    if equity.len() < 2 {
        return Vec::new();
    }
    equity
        .windows(2)
        .map(|pair| {
            let prev = if pair[0].abs() < 1e-12 { 1e-12 } else { pair[0] };
            (pair[1] - pair[0]) / prev
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
