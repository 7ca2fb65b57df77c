//! The backtest orchestrator.
//!
//! `Backtester` owns no pipeline logic of its own: it wires collaborator
//! traits to the event bus, drives the injector, drains to quiescence
//! after every bar, and turns the order manager's closed book into trade
//! records and metrics. Multi-run modes (walk-forward, out-of-sample)
//! compose fully reset single passes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use replaylab_core::bus::{
    BusError, EventBus, EventHandler, EventSelector, HandlerError, SubscriptionToken,
};
use replaylab_core::data::{DataInjector, InjectError, SeriesKey, WindowedRepository};
use replaylab_core::domain::{OrderSide, Position, PositionStatus, Timeframe, TradeRecord};
use replaylab_core::events::{
    Event, EventKind, EventPayload, OrderPayload, SignalDirection, TickPayload,
};
use replaylab_core::time::DateRange;

use crate::config::{BacktestConfig, BacktestMode, ConfigError};
use crate::grouping::{metrics_by_key, session_for_hour};
use crate::metrics::{self, BacktestMetrics};
use crate::out_of_sample::{oos_report, split_period};
use crate::pipeline::{OrderManager, PipelineError, PositionAction, RiskManager, Signal, SignalEngine};
use crate::result::{BacktestResult, CurvePoint};
use crate::walk_forward::{plan_windows, summarize, WalkForwardError, WalkForwardWindow};

const SIGNAL_SOURCE: &str = "replay.signal_engine";
const ORDER_SOURCE: &str = "replay.order_manager";

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Inject(#[from] InjectError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    WalkForward(#[from] WalkForwardError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("bus failed to drain within {0:?}; run state is unknown")]
    DrainTimeout(Duration),
}

// ─── Runtime handlers ───────────────────────────────────────────────

/// Latest tick per symbol, used for entry pricing.
#[derive(Default)]
struct TickCache {
    inner: Mutex<HashMap<String, TickPayload>>,
}

impl TickCache {
    fn put(&self, tick: TickPayload) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tick.symbol.clone(), tick);
    }

    fn last(&self, symbol: &str) -> Option<TickPayload> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .cloned()
    }

    fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// TICK: cache the quote and mark the book to market at replay time.
struct TickHandler {
    cache: Arc<TickCache>,
    order_manager: Arc<dyn OrderManager>,
}

#[async_trait]
impl EventHandler for TickHandler {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        if let Some(tick) = event.as_tick() {
            self.order_manager
                .mark_price(&tick.symbol, tick.last, event.timestamp);
            self.cache.put(tick.clone());
        }
        Ok(())
    }
}

/// BAR_CLOSE: run the strategy, then let the risk monitor act on every
/// open position at the new price.
struct BarCloseHandler {
    bus: Arc<EventBus>,
    signal_engine: Arc<dyn SignalEngine>,
    risk_manager: Arc<dyn RiskManager>,
    order_manager: Arc<dyn OrderManager>,
}

#[async_trait]
impl EventHandler for BarCloseHandler {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let Some(bar) = event.as_bar_close() else {
            return Ok(());
        };
        if let Some(payload) = self.signal_engine.on_bar_close(bar).await {
            self.bus.publish_nowait(Event::new(
                SIGNAL_SOURCE,
                &event.run_id,
                event.timestamp,
                EventPayload::Signal(payload),
            ))?;
        }

        let open_positions = self.order_manager.get_open_positions();
        if open_positions.is_empty() {
            return Ok(());
        }
        let mut prices = HashMap::new();
        prices.insert(bar.symbol.clone(), bar.close);
        let mut atrs = HashMap::new();
        atrs.insert(bar.symbol.clone(), (bar.close.abs() * 0.001).max(1e-9));
        let actions = self
            .risk_manager
            .monitor_open_positions(&open_positions, &prices, &atrs)
            .await;
        for action in actions {
            match action {
                PositionAction::Close {
                    position_id,
                    reason,
                } => {
                    self.order_manager
                        .close_position(&position_id, &reason)
                        .await?;
                }
                PositionAction::UpdateTrailing {
                    position_id,
                    new_stop,
                } => {
                    if !self.order_manager.update_stop_loss(&position_id, new_stop) {
                        warn!(%position_id, "trailing update for unknown position");
                    }
                }
            }
        }
        Ok(())
    }
}

/// SIGNAL: resolve entry price, evaluate risk, submit, and echo the
/// order lifecycle back onto the bus.
struct SignalHandler {
    bus: Arc<EventBus>,
    cache: Arc<TickCache>,
    risk_manager: Arc<dyn RiskManager>,
    order_manager: Arc<dyn OrderManager>,
    allowed_strategies: Vec<String>,
}

#[async_trait]
impl EventHandler for SignalHandler {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let Some(payload) = event.as_signal() else {
            return Ok(());
        };
        if !payload.direction.is_actionable() {
            return Ok(());
        }
        if !self.allowed_strategies.contains(&payload.strategy_id) {
            return Ok(());
        }
        let entry_price = self.cache.last(&payload.symbol).map(|tick| tick.last);
        let atr = entry_price.map_or(1e-9, |p| (p.abs() * 0.001).max(1e-9));
        let signal = Signal {
            signal_id: event.id.to_string(),
            strategy_id: payload.strategy_id.clone(),
            symbol: payload.symbol.clone(),
            broker: payload.broker.clone(),
            timeframe: payload.timeframe,
            timestamp: event.timestamp,
            run_id: event.run_id.clone(),
            direction: payload.direction,
            confidence: payload.confidence,
            entry_price,
            atr,
        };
        let account = self.order_manager.get_account();
        let open_positions = self.order_manager.get_open_positions();
        let check = self
            .risk_manager
            .evaluate(&signal, &account, &open_positions, atr)
            .await;
        if !check.approved {
            debug!(
                symbol = %signal.symbol,
                reason = check.reason.as_deref().unwrap_or("unspecified"),
                "signal rejected by risk"
            );
            return Ok(());
        }
        let position_id = self
            .order_manager
            .submit_from_signal(&signal, &check)
            .await?;

        let side = match signal.direction {
            SignalDirection::Sell => OrderSide::Sell,
            _ => OrderSide::Buy,
        };
        let order = OrderPayload {
            order_id: position_id,
            symbol: signal.symbol.clone(),
            broker: signal.broker.clone(),
            direction: side,
            quantity: check.quantity,
            price: signal.entry_price,
            stop_loss: check.stop_loss,
            fill_price: None,
        };
        self.bus.publish_nowait(Event::new(
            ORDER_SOURCE,
            &event.run_id,
            event.timestamp,
            EventPayload::OrderSubmit(order.clone()),
        ))?;
        // Paper fills are immediate at the entry mark.
        let fill = OrderPayload {
            fill_price: signal.entry_price,
            ..order
        };
        self.bus.publish_nowait(Event::new(
            ORDER_SOURCE,
            &event.run_id,
            event.timestamp,
            EventPayload::OrderFill(fill),
        ))?;
        Ok(())
    }
}

// ─── Orchestrator ───────────────────────────────────────────────────

struct RunCurves {
    equity: Vec<CurvePoint>,
    drawdown: Vec<CurvePoint>,
    peak: f64,
}

impl RunCurves {
    fn new(initial_capital: f64) -> Self {
        Self {
            equity: Vec::new(),
            drawdown: Vec::new(),
            peak: initial_capital,
        }
    }

    fn push(&mut self, timestamp: DateTime<Utc>, equity: f64) {
        self.peak = self.peak.max(equity);
        let drawdown = if self.peak > 0.0 {
            (self.peak - equity) / self.peak * 100.0
        } else {
            0.0
        };
        self.equity.push(CurvePoint {
            timestamp,
            value: equity,
        });
        self.drawdown.push(CurvePoint {
            timestamp,
            value: drawdown,
        });
    }
}

/// Event-driven backtester reusing one pipeline for every mode.
///
/// The bus is started on first use and left running between passes;
/// stopping it is the composition root's job.
pub struct Backtester {
    config: BacktestConfig,
    bus: Arc<EventBus>,
    repository: Arc<WindowedRepository>,
    signal_engine: Arc<dyn SignalEngine>,
    risk_manager: Arc<dyn RiskManager>,
    order_manager: Arc<dyn OrderManager>,
    tick_cache: Arc<TickCache>,
    drain_timeout: Duration,
}

impl Backtester {
    pub fn new(
        config: BacktestConfig,
        bus: Arc<EventBus>,
        repository: Arc<WindowedRepository>,
        signal_engine: Arc<dyn SignalEngine>,
        risk_manager: Arc<dyn RiskManager>,
        order_manager: Arc<dyn OrderManager>,
    ) -> Self {
        Self {
            config,
            bus,
            repository,
            signal_engine,
            risk_manager,
            order_manager,
            tick_cache: Arc::new(TickCache::default()),
            drain_timeout: Duration::from_secs(5),
        }
    }

    /// Per-bar quiescence deadline. Exceeding it aborts the run rather
    /// than continuing with unknown state.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Execute the configured mode and return a normalized result.
    pub async fn run(&mut self) -> Result<BacktestResult, BacktestError> {
        self.config.validate()?;
        match self.config.mode {
            BacktestMode::Simple => self.run_simple().await,
            BacktestMode::WalkForward => self.run_walk_forward().await,
            BacktestMode::OutOfSample => self.run_out_of_sample().await,
        }
    }

    /// Lightweight narrowed run used by multi-run modes: one strategy,
    /// one date span, metrics only. The surrounding config is restored
    /// even when the pass fails.
    pub async fn run_single_strategy(
        &mut self,
        strategy_id: &str,
        range: DateRange,
    ) -> Result<BacktestMetrics, BacktestError> {
        let original = self.config.clone();
        self.config.strategy_ids = vec![strategy_id.to_string()];
        self.config.start_date = range.start;
        self.config.end_date = range.end;
        self.config.mode = BacktestMode::Simple;
        let outcome = self.run_simple().await;
        self.config = original;
        outcome.map(|result| result.metrics)
    }

    async fn run_simple(&mut self) -> Result<BacktestResult, BacktestError> {
        let started = Instant::now();
        self.config.validate()?;
        let run_id = self.config.run_id();
        info!(run_id = %run_id, "starting backtest pass");

        // Full reset before any event flows.
        self.order_manager.reset(self.config.initial_capital);
        self.tick_cache.clear();
        self.repository.clear();
        let curves = Arc::new(Mutex::new(RunCurves::new(self.config.initial_capital)));

        self.bus.start().await?;
        let tokens = self.attach_handlers();
        let body = self.drive(&run_id, Arc::clone(&curves)).await;
        // Handlers detach even when the pass fails.
        for token in tokens {
            self.bus.unsubscribe(token);
        }
        body?;

        let trades = self.collect_trades();
        let curves = match Arc::try_unwrap(curves) {
            Ok(lock) => lock.into_inner().unwrap_or_else(PoisonError::into_inner),
            Err(shared) => {
                // Checkpoint futures are all complete; clone as fallback.
                let guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
                RunCurves {
                    equity: guard.equity.clone(),
                    drawdown: guard.drawdown.clone(),
                    peak: guard.peak,
                }
            }
        };
        let equity_values: Vec<f64> = curves.equity.iter().map(|p| p.value).collect();
        let overall = BacktestMetrics::compute(&trades, &equity_values);
        let capital = self.config.initial_capital;
        info!(
            trades = trades.len(),
            pnl_net = overall.total_pnl_net,
            "backtest pass complete"
        );

        let mut result = BacktestResult::bare(self.config.clone(), overall);
        result.metrics_by_strategy = metrics_by_key(&trades, capital, |t| t.strategy_id.clone());
        result.metrics_by_regime = metrics_by_key(&trades, capital, |t| t.regime_at_entry.clone());
        result.metrics_by_month = metrics_by_key(&trades, capital, |t| t.entry_month());
        result.metrics_by_session = metrics_by_key(&trades, capital, |t| {
            session_for_hour(t.entry_time.hour()).to_string()
        });
        result.trades = trades;
        result.equity_curve = curves.equity;
        result.drawdown_curve = curves.drawdown;
        result.duration_seconds = started.elapsed().as_secs_f64();
        Ok(result)
    }

    async fn run_walk_forward(&mut self) -> Result<BacktestResult, BacktestError> {
        let started = Instant::now();
        let original = self.config.clone();
        let strategy_id = original.strategy_ids[0].clone();
        let plans = plan_windows(
            &original.date_range(),
            original.wf_train_periods,
            original.wf_test_periods,
            original.wf_step_periods,
            original.timeframes[0],
        )?;
        info!(windows = plans.len(), "walk-forward plan ready");

        let mut windows = Vec::with_capacity(plans.len());
        for plan in plans {
            let train_metrics = self.run_single_strategy(&strategy_id, plan.train).await?;
            let test_metrics = self.run_single_strategy(&strategy_id, plan.test).await?;
            windows.push(WalkForwardWindow::new(plan, train_metrics, test_metrics));
        }

        let test_sets: Vec<BacktestMetrics> =
            windows.iter().map(|w| w.test_metrics.clone()).collect();
        let mut result = BacktestResult::bare(original, metrics::average(&test_sets));
        result.wf_summary = Some(summarize(&windows));
        result.wf_windows = Some(windows);
        result.duration_seconds = started.elapsed().as_secs_f64();
        Ok(result)
    }

    async fn run_out_of_sample(&mut self) -> Result<BacktestResult, BacktestError> {
        let started = Instant::now();
        let original = self.config.clone();
        let split = split_period(
            &original.date_range(),
            original.oos_pct,
            original.purge_bars,
            original.timeframes[0],
        );

        let is_outcome = self.run_pass(split.in_sample).await;
        let is_result = match is_outcome {
            Ok(result) => result,
            Err(err) => {
                self.config = original;
                return Err(err);
            }
        };
        let oos_outcome = self.run_pass(split.out_of_sample).await;
        self.config = original;
        let mut result = oos_outcome?;

        result.oos_report = Some(oos_report(&is_result.metrics, &result.metrics));
        result.is_metrics = Some(is_result.metrics);
        result.oos_metrics = Some(result.metrics.clone());
        result.duration_seconds = started.elapsed().as_secs_f64();
        Ok(result)
    }

    async fn run_pass(&mut self, range: DateRange) -> Result<BacktestResult, BacktestError> {
        self.config.start_date = range.start;
        self.config.end_date = range.end;
        self.config.mode = BacktestMode::Simple;
        self.run_simple().await
    }

    /// Drive the injector over symbols x brokers x timeframes, draining
    /// the bus to quiescence after every yielded bar.
    async fn drive(
        &self,
        run_id: &str,
        curves: Arc<Mutex<RunCurves>>,
    ) -> Result<(), BacktestError> {
        let injector = Arc::new(
            DataInjector::new(Arc::clone(&self.bus), Arc::clone(&self.repository))
                .with_run_id(run_id),
        );
        let range = self.config.date_range();
        let drained = Arc::new(AtomicBool::new(true));

        for symbol in &self.config.symbols {
            for broker in &self.config.brokers {
                for timeframe in &self.config.timeframes {
                    let key = SeriesKey::new(symbol, broker, *timeframe);
                    let checkpoint = |event: Event| {
                        let bus = Arc::clone(&self.bus);
                        let order_manager = Arc::clone(&self.order_manager);
                        let curves = Arc::clone(&curves);
                        let drained = Arc::clone(&drained);
                        let injector = Arc::clone(&injector);
                        let timeout = self.drain_timeout;
                        async move {
                            if !bus.drain(timeout).await {
                                drained.store(false, Ordering::SeqCst);
                                injector.stop();
                                return;
                            }
                            let account = order_manager.get_account();
                            curves
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(event.timestamp, account.equity);
                        }
                    };
                    injector
                        .inject_bars(&key, &range, self.config.warmup_bars, checkpoint)
                        .await?;
                    if !drained.load(Ordering::SeqCst) {
                        return Err(BacktestError::DrainTimeout(self.drain_timeout));
                    }
                }
            }
        }

        if !self.bus.drain(self.drain_timeout).await {
            return Err(BacktestError::DrainTimeout(self.drain_timeout));
        }
        for position in self.order_manager.get_open_positions() {
            self.order_manager
                .close_position(&position.position_id, "backtest_end")
                .await?;
        }
        if !self.bus.drain(self.drain_timeout).await {
            return Err(BacktestError::DrainTimeout(self.drain_timeout));
        }
        Ok(())
    }

    fn attach_handlers(&self) -> Vec<SubscriptionToken> {
        vec![
            self.bus.subscribe(
                EventSelector::Only(EventKind::Tick),
                Arc::new(TickHandler {
                    cache: Arc::clone(&self.tick_cache),
                    order_manager: Arc::clone(&self.order_manager),
                }),
                None,
            ),
            self.bus.subscribe(
                EventSelector::Only(EventKind::BarClose),
                Arc::new(BarCloseHandler {
                    bus: Arc::clone(&self.bus),
                    signal_engine: Arc::clone(&self.signal_engine),
                    risk_manager: Arc::clone(&self.risk_manager),
                    order_manager: Arc::clone(&self.order_manager),
                }),
                None,
            ),
            self.bus.subscribe(
                EventSelector::Only(EventKind::Signal),
                Arc::new(SignalHandler {
                    bus: Arc::clone(&self.bus),
                    cache: Arc::clone(&self.tick_cache),
                    risk_manager: Arc::clone(&self.risk_manager),
                    order_manager: Arc::clone(&self.order_manager),
                    allowed_strategies: self.config.strategy_ids.clone(),
                }),
                None,
            ),
        ]
    }

    fn collect_trades(&self) -> Vec<TradeRecord> {
        let mut trades: Vec<TradeRecord> = self
            .order_manager
            .get_positions(true)
            .into_iter()
            .filter(|position| position.status == PositionStatus::Closed)
            .map(|position| self.trade_from(position))
            .collect();
        trades.sort_by_key(|trade| trade.entry_time);
        trades
    }

    fn trade_from(&self, position: Position) -> TradeRecord {
        let exit_time = position.closed_at.unwrap_or(position.opened_at);
        let timeframe = position
            .metadata
            .timeframe
            .or_else(|| self.config.timeframes.first().copied())
            .unwrap_or(Timeframe::H1);
        let bar_seconds = (timeframe.duration().as_secs() as i64).max(1);
        let wall_clock_bars =
            ((exit_time - position.opened_at).num_seconds().max(0) / bar_seconds) as u32;
        let bars_held = position
            .metadata
            .bars_held
            .unwrap_or(0)
            .max(wall_clock_bars);

        let quantity = position
            .metadata
            .requested_quantity
            .unwrap_or(position.quantity);
        let risk_per_unit =
            (position.entry_price - position.stop_loss.unwrap_or(position.entry_price)).abs();
        let r_multiple = if risk_per_unit > 0.0 && quantity > 0.0 {
            Some(position.realized_pnl / (risk_per_unit * quantity))
        } else {
            None
        };

        TradeRecord {
            trade_id: position.position_id,
            symbol: position.symbol,
            strategy_id: position.strategy_id,
            side: position.side,
            entry_time: position.opened_at,
            exit_time,
            entry_price: position.entry_price,
            exit_price: position.close_price.unwrap_or(position.current_price),
            quantity,
            pnl_net: position.realized_pnl,
            commission: position.commission_total,
            slippage: position.metadata.slippage,
            bars_held,
            exit_reason: position
                .metadata
                .exit_reason
                .unwrap_or_else(|| "unknown".to_string()),
            r_multiple,
            regime_at_entry: position
                .metadata
                .regime_trend
                .unwrap_or_else(|| "unknown".to_string()),
            volatility_at_entry: position
                .metadata
                .regime_volatility
                .unwrap_or_else(|| "unknown".to_string()),
            signal_confidence: position.metadata.signal_confidence.unwrap_or(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{MaCrossoverSignals, NaiveRiskManager, PaperOrderManager};
    use replaylab_core::data::MemoryBarStore;
    use replaylab_core::domain::PositionMetadata;
    use replaylab_core::time::parse_utc;

    fn backtester() -> Backtester {
        let config = BacktestConfig {
            strategy_ids: vec!["ma_cross".into()],
            symbols: vec!["EURUSD".into()],
            brokers: vec!["paper".into()],
            timeframes: vec![Timeframe::H1],
            start_date: parse_utc("2024-01-01T00:00:00Z").unwrap(),
            end_date: parse_utc("2024-03-01T00:00:00Z").unwrap(),
            mode: BacktestMode::Simple,
            wf_train_periods: 12,
            wf_test_periods: 3,
            wf_step_periods: 3,
            oos_pct: 0.2,
            purge_bars: 10,
            initial_capital: 10_000.0,
            currency: "USD".into(),
            warmup_bars: 5,
        };
        let store = Arc::new(MemoryBarStore::new());
        Backtester::new(
            config,
            Arc::new(EventBus::new()),
            Arc::new(WindowedRepository::new(store)),
            Arc::new(MaCrossoverSignals::default()),
            Arc::new(NaiveRiskManager::default()),
            Arc::new(PaperOrderManager::new(10_000.0)),
        )
    }

    fn closed_position(entry: f64, stop: Option<f64>, quantity: f64) -> Position {
        let opened = parse_utc("2024-01-02T10:00:00Z").unwrap();
        Position {
            position_id: "pos-1".into(),
            symbol: "EURUSD".into(),
            broker: "paper".into(),
            strategy_id: "ma_cross".into(),
            side: OrderSide::Buy,
            quantity,
            entry_price: entry,
            current_price: entry + 0.02,
            close_price: Some(entry + 0.02),
            stop_loss: stop,
            opened_at: opened,
            closed_at: Some(opened + chrono::Duration::hours(3)),
            realized_pnl: 25.0,
            commission_total: 0.5,
            status: PositionStatus::Closed,
            metadata: PositionMetadata {
                timeframe: Some(Timeframe::H1),
                requested_quantity: Some(quantity),
                ..Default::default()
            },
        }
    }

    #[test]
    fn r_multiple_is_undefined_when_stop_equals_entry() {
        let backtester = backtester();
        let trade = backtester.trade_from(closed_position(1.10, Some(1.10), 100.0));
        assert_eq!(trade.r_multiple, None);
        // No stop at all is the same degenerate case.
        let trade = backtester.trade_from(closed_position(1.10, None, 100.0));
        assert_eq!(trade.r_multiple, None);
    }

    #[test]
    fn r_multiple_is_undefined_for_zero_requested_quantity() {
        let backtester = backtester();
        let trade = backtester.trade_from(closed_position(1.10, Some(1.08), 0.0));
        assert_eq!(trade.r_multiple, None);
    }

    #[test]
    fn r_multiple_scales_pnl_by_dollar_risk() {
        let backtester = backtester();
        let trade = backtester.trade_from(closed_position(1.10, Some(1.08), 100.0));
        // 25.0 net over 0.02 * 100 risked.
        assert!((trade.r_multiple.unwrap() - 12.5).abs() < 1e-9);
        assert_eq!(trade.bars_held, 3);
    }
}
