//! End-to-end orchestrator tests over synthetic bar data.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use replaylab_core::bus::EventBus;
use replaylab_core::data::{MemoryBarStore, SeriesKey, WindowedRepository};
use replaylab_core::domain::{Account, Bar, Position, Timeframe};
use replaylab_core::time::parse_utc;
use replaylab_runner::config::{BacktestConfig, BacktestMode};
use replaylab_runner::engine::Backtester;
use replaylab_runner::pipeline::{
    MaCrossoverSignals, NaiveRiskManager, OrderManager, PaperOrderManager, PipelineError,
    RiskCheck, Signal,
};

/// Hourly bars riding a slow price wave, so a short/long SMA pair
/// crosses several times over a few hundred bars.
fn wave_bars(start: DateTime<Utc>, count: usize) -> Vec<Bar> {
    (0..count)
        .map(|i| {
            let open = start + chrono::Duration::hours(i as i64);
            let price = 100.0 + 10.0 * ((i as f64) / 12.0).sin();
            Bar {
                symbol: "EURUSD".into(),
                broker: "paper".into(),
                timeframe: Timeframe::H1,
                timestamp_open: open,
                timestamp_close: open + chrono::Duration::hours(1),
                open: price,
                high: price + 0.5,
                low: price - 0.5,
                close: price,
                volume: 1_000.0,
                spread: Some(0.0002),
            }
        })
        .collect()
}

fn config(hours: i64, mode: BacktestMode) -> BacktestConfig {
    let start = parse_utc("2024-01-01T00:00:00Z").unwrap();
    BacktestConfig {
        strategy_ids: vec!["ma_cross".into()],
        symbols: vec!["EURUSD".into()],
        brokers: vec!["paper".into()],
        timeframes: vec![Timeframe::H1],
        start_date: start,
        end_date: start + chrono::Duration::hours(hours),
        mode,
        wf_train_periods: 240,
        wf_test_periods: 72,
        wf_step_periods: 144,
        oos_pct: 0.25,
        purge_bars: 12,
        initial_capital: 10_000.0,
        currency: "USD".into(),
        warmup_bars: 12,
    }
}

fn harness(config: BacktestConfig, bar_count: usize) -> (Arc<EventBus>, Backtester) {
    let store = Arc::new(MemoryBarStore::new());
    let key = SeriesKey::new("EURUSD", "paper", Timeframe::H1);
    store.insert(key, wave_bars(config.start_date, bar_count));
    let repository = Arc::new(WindowedRepository::new(store));
    let bus = Arc::new(EventBus::new());
    let backtester = Backtester::new(
        config,
        Arc::clone(&bus),
        repository,
        Arc::new(MaCrossoverSignals::new("ma_cross", 3, 8)),
        Arc::new(NaiveRiskManager::default()),
        Arc::new(PaperOrderManager::new(10_000.0).with_commission_rate(0.0)),
    );
    (bus, backtester)
}

#[tokio::test]
async fn wave_data_produces_trades_and_curves() {
    let (bus, mut backtester) = harness(config(240, BacktestMode::Simple), 241);
    let result = backtester.run().await.unwrap();

    assert!(result.metrics.total_trades > 0);
    assert_eq!(result.trades.len(), result.metrics.total_trades);
    assert_eq!(result.equity_curve.len(), result.drawdown_curve.len());
    assert!(!result.equity_curve.is_empty());

    // Net P&L is the sum over trades.
    let pnl: f64 = result.trades.iter().map(|t| t.pnl_net).sum();
    assert!((pnl - result.metrics.total_pnl_net).abs() < 1e-9);

    // Warm-up bars never reach the curves.
    let first = result.equity_curve[0].timestamp;
    assert!(first >= result.config.start_date + chrono::Duration::hours(13));

    // Every trade lands in exactly one strategy bucket.
    assert!(result.metrics_by_strategy.contains_key("ma_cross"));
    let grouped: usize = result
        .metrics_by_strategy
        .values()
        .map(|m| m.total_trades)
        .sum();
    assert_eq!(grouped, result.metrics.total_trades);

    bus.stop().await;
}

#[tokio::test]
async fn identical_runs_are_reproducible() {
    let (bus_a, mut first) = harness(config(240, BacktestMode::Simple), 241);
    let (bus_b, mut second) = harness(config(240, BacktestMode::Simple), 241);

    let result_a = first.run().await.unwrap();
    let result_b = second.run().await.unwrap();

    assert_eq!(result_a.trades, result_b.trades);
    assert_eq!(result_a.equity_curve, result_b.equity_curve);
    assert_eq!(result_a.metrics, result_b.metrics);

    bus_a.stop().await;
    bus_b.stop().await;
}

#[tokio::test]
async fn missing_series_is_a_valid_zero_trade_run() {
    let store = Arc::new(MemoryBarStore::new());
    let repository = Arc::new(WindowedRepository::new(store));
    let bus = Arc::new(EventBus::new());
    let mut backtester = Backtester::new(
        config(240, BacktestMode::Simple),
        Arc::clone(&bus),
        repository,
        Arc::new(MaCrossoverSignals::default()),
        Arc::new(NaiveRiskManager::default()),
        Arc::new(PaperOrderManager::new(10_000.0)),
    );

    let result = backtester.run().await.unwrap();
    assert_eq!(result.metrics.total_trades, 0);
    assert!(result.trades.is_empty());
    assert!(result.equity_curve.is_empty());
    bus.stop().await;
}

/// Order manager that fails every submission; the run must still finish.
struct RejectingOrderManager {
    account: Mutex<Account>,
}

#[async_trait]
impl OrderManager for RejectingOrderManager {
    async fn submit_from_signal(
        &self,
        signal: &Signal,
        _risk_check: &RiskCheck,
    ) -> Result<String, PipelineError> {
        Err(PipelineError::NoMarketPrice(signal.symbol.clone()))
    }

    fn get_open_positions(&self) -> Vec<Position> {
        Vec::new()
    }

    fn get_positions(&self, _include_closed: bool) -> Vec<Position> {
        Vec::new()
    }

    async fn close_position(&self, position_id: &str, _reason: &str) -> Result<(), PipelineError> {
        Err(PipelineError::UnknownPosition(position_id.to_string()))
    }

    fn update_stop_loss(&self, _position_id: &str, _new_stop: f64) -> bool {
        false
    }

    fn get_account(&self) -> Account {
        self.account
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn mark_price(&self, _symbol: &str, _price: f64, _at: DateTime<Utc>) {}

    fn reset(&self, initial_capital: f64) {
        *self.account.lock().unwrap_or_else(PoisonError::into_inner) =
            Account::with_capital(initial_capital);
    }
}

#[tokio::test]
async fn failing_submissions_do_not_abort_the_run() {
    let store = Arc::new(MemoryBarStore::new());
    let key = SeriesKey::new("EURUSD", "paper", Timeframe::H1);
    let cfg = config(240, BacktestMode::Simple);
    store.insert(key, wave_bars(cfg.start_date, 241));
    let repository = Arc::new(WindowedRepository::new(store));
    let bus = Arc::new(EventBus::new());
    let mut backtester = Backtester::new(
        cfg,
        Arc::clone(&bus),
        repository,
        Arc::new(MaCrossoverSignals::new("ma_cross", 3, 8)),
        Arc::new(NaiveRiskManager::default()),
        Arc::new(RejectingOrderManager {
            account: Mutex::new(Account::with_capital(10_000.0)),
        }),
    );

    let result = backtester.run().await.unwrap();
    assert_eq!(result.metrics.total_trades, 0);
    // The failures were observed, not swallowed silently.
    assert!(bus.metrics().handler_errors > 0);
    bus.stop().await;
}

#[tokio::test]
async fn walk_forward_runs_every_window_and_restores_config() {
    // 720 H1 bars: train 240 / test 72 / step 144 fits exactly 3 windows.
    let original = config(720, BacktestMode::WalkForward);
    let (bus, mut backtester) = harness(original.clone(), 721);

    let result = backtester.run().await.unwrap();
    let windows = result.wf_windows.as_ref().unwrap();
    assert_eq!(windows.len(), 3);
    assert!(result.wf_summary.is_some());
    for window in windows {
        assert!(window.train.end == window.test.start);
    }
    assert_eq!(backtester.config(), &original);
    bus.stop().await;
}

#[tokio::test]
async fn out_of_sample_reports_both_metric_sets() {
    let original = config(720, BacktestMode::OutOfSample);
    let (bus, mut backtester) = harness(original.clone(), 721);

    let result = backtester.run().await.unwrap();
    assert!(result.is_metrics.is_some());
    assert!(result.oos_metrics.is_some());
    let report = result.oos_report.as_ref().unwrap();
    assert!(report.is_vs_oos_sharpe_ratio.is_finite());
    assert_eq!(backtester.config(), &original);
    bus.stop().await;
}
