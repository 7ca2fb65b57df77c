//! Grouped performance breakdowns over a trade list.
//!
//! Each grouping partitions the trades, rebuilds a per-group equity curve
//! from exit-ordered net P&L, and computes full metrics per group. Every
//! trade lands in exactly one group per dimension, so group trade counts
//! always sum to the overall count.

use std::collections::BTreeMap;

use chrono::{Datelike, Timelike};

use replaylab_core::domain::TradeRecord;

use crate::metrics::BacktestMetrics;

/// Partition trades by `key_fn` and compute metrics per group.
pub fn metrics_by_key<F>(
    trades: &[TradeRecord],
    initial_capital: f64,
    key_fn: F,
) -> BTreeMap<String, BacktestMetrics>
where
    F: Fn(&TradeRecord) -> String,
{
    let mut grouped: BTreeMap<String, Vec<TradeRecord>> = BTreeMap::new();
    for trade in trades {
        grouped
            .entry(key_fn(trade))
            .or_default()
            .push(trade.clone());
    }
    grouped
        .into_iter()
        .map(|(key, mut group)| {
            group.sort_by_key(|t| t.exit_time);
            let mut equity = initial_capital;
            let curve: Vec<f64> = group
                .iter()
                .map(|trade| {
                    equity += trade.pnl_net;
                    equity
                })
                .collect();
            (key, BacktestMetrics::compute(&group, &curve))
        })
        .collect()
}

/// Trading session label for a UTC entry hour.
pub fn session_for_hour(hour: u32) -> &'static str {
    match hour {
        0..=6 => "asia",
        7..=11 => "london",
        12..=15 => "overlap",
        16..=20 => "newyork",
        _ => "byma",
    }
}

/// Confidence bucket label for grouping by signal conviction.
///
/// Library surface for downstream report tooling; the orchestrator's
/// built-in breakdowns use strategy/regime/session/month keys.
pub fn confidence_bucket(confidence: f64) -> &'static str {
    if confidence < 0.40 {
        "0-40%"
    } else if confidence < 0.60 {
        "40-60%"
    } else if confidence < 0.80 {
        "60-80%"
    } else {
        "80-100%"
    }
}

/// Weekday-by-hour average net P&L matrix (Monday = row 0).
///
/// Library surface for downstream report tooling, same as
/// [`confidence_bucket`].
pub fn weekday_hour_pnl(trades: &[TradeRecord]) -> [[f64; 24]; 7] {
    let mut sums = [[0.0_f64; 24]; 7];
    let mut counts = [[0u32; 24]; 7];
    for trade in trades {
        let day = trade.entry_time.weekday().num_days_from_monday() as usize;
        let hour = trade.entry_time.hour() as usize;
        sums[day][hour] += trade.pnl_net;
        counts[day][hour] += 1;
    }
    let mut result = [[0.0_f64; 24]; 7];
    for day in 0..7 {
        for hour in 0..24 {
            if counts[day][hour] > 0 {
                result[day][hour] = sums[day][hour] / f64::from(counts[day][hour]);
            }
        }
    }
    result
}
