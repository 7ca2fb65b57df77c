//! Bar injector — drives one series onto the bus in close-timestamp order.
//!
//! The anti-look-ahead invariant lives here: for every bar, the series
//! watermark advances to the bar's close timestamp strictly before any
//! event derived from that bar is published. Warm-up bars advance the
//! watermark without producing events, priming stateful handlers without
//! generating tradeable output.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use super::window::{WindowError, WindowedRepository};
use super::SeriesKey;
use crate::bus::{BusError, EventBus};
use crate::domain::Bar;
use crate::events::{BarClosePayload, Event, EventPayload, TickPayload};
use crate::time::DateRange;

const SOURCE: &str = "replay.injector";

#[derive(Debug, Error)]
pub enum InjectError {
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

#[derive(Debug, Clone, Copy, Default)]
struct ControlState {
    paused: bool,
    stopped: bool,
}

/// Replays preloaded bars through the bus with pacing and cooperative
/// pause/resume/stop. Control always takes effect between bars, never
/// mid-bar.
pub struct DataInjector {
    bus: Arc<EventBus>,
    repository: Arc<WindowedRepository>,
    speed_multiplier: f64,
    run_id: String,
    control: watch::Sender<ControlState>,
    processed: AtomicUsize,
    total: AtomicUsize,
}

impl DataInjector {
    pub fn new(bus: Arc<EventBus>, repository: Arc<WindowedRepository>) -> Self {
        let (control, _) = watch::channel(ControlState::default());
        Self {
            bus,
            repository,
            speed_multiplier: f64::INFINITY,
            run_id: "backtest".to_string(),
            control,
            processed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }

    /// Real-time pacing divisor. Infinite (the default) disables pacing.
    pub fn with_speed(mut self, speed_multiplier: f64) -> Self {
        self.speed_multiplier = speed_multiplier;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Suspend the loop before the next bar.
    pub fn pause(&self) {
        self.control.send_modify(|state| state.paused = true);
    }

    pub fn resume(&self) {
        self.control.send_modify(|state| state.paused = false);
    }

    /// Stop before the next bar. The bar in progress always completes.
    pub fn stop(&self) {
        self.control.send_modify(|state| state.stopped = true);
    }

    /// (processed, total) bars for the active injection.
    pub fn progress(&self) -> (usize, usize) {
        (
            self.processed.load(Ordering::Acquire),
            self.total.load(Ordering::Acquire),
        )
    }

    /// Replay one series in ascending close-timestamp order.
    ///
    /// Per bar: watermark first, then TICK, then BAR_CLOSE, then the
    /// caller's checkpoint — the orchestrator uses the checkpoint to
    /// drain the bus to quiescence before the next bar. Returns the
    /// number of yielded (post-warm-up) bars.
    pub async fn inject_bars<F, Fut>(
        &self,
        key: &SeriesKey,
        range: &DateRange,
        warmup_bars: usize,
        mut checkpoint: F,
    ) -> Result<usize, InjectError>
    where
        F: FnMut(Event) -> Fut,
        Fut: Future<Output = ()>,
    {
        let bars = self.repository.preload(key, range).await?;
        self.total.store(bars.len(), Ordering::Release);
        self.processed.store(0, Ordering::Release);
        // A previous stop() must not leak into this injection.
        self.control.send_modify(|state| state.stopped = false);

        let mut yielded = 0usize;
        for (index, bar) in bars.iter().enumerate() {
            if !self.wait_runnable().await {
                info!(series = %key, processed = index, "injection stopped");
                break;
            }

            // Watermark first, events second. Unconditionally.
            self.repository
                .set_visible_until(key, bar.timestamp_close)?;
            self.processed.store(index + 1, Ordering::Release);

            if index < warmup_bars {
                continue;
            }

            self.bus.publish(self.tick_from(bar)).await?;
            let bar_close = self.bar_close_from(bar);
            self.bus.publish(bar_close.clone()).await?;
            checkpoint(bar_close).await;
            yielded += 1;

            self.pace(index, &bars).await;
        }
        debug!(series = %key, yielded, total = bars.len(), "injection finished");
        Ok(yielded)
    }

    /// Wait while paused; false means stopped.
    async fn wait_runnable(&self) -> bool {
        let mut rx = self.control.subscribe();
        loop {
            let state = *rx.borrow();
            if state.stopped {
                return false;
            }
            if !state.paused {
                return true;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }

    fn tick_from(&self, bar: &Bar) -> Event {
        Event::new(
            SOURCE,
            &self.run_id,
            bar.timestamp_close,
            EventPayload::Tick(TickPayload {
                symbol: bar.symbol.clone(),
                broker: bar.broker.clone(),
                bid: bar.close,
                ask: bar.close + bar.spread.unwrap_or(0.0),
                last: bar.close,
                volume: bar.volume,
            }),
        )
    }

    fn bar_close_from(&self, bar: &Bar) -> Event {
        Event::new(
            SOURCE,
            &self.run_id,
            bar.timestamp_close,
            EventPayload::BarClose(BarClosePayload {
                symbol: bar.symbol.clone(),
                broker: bar.broker.clone(),
                timeframe: bar.timeframe,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
                timestamp_open: bar.timestamp_open,
                timestamp_close: bar.timestamp_close,
            }),
        )
    }

    async fn pace(&self, index: usize, bars: &[Bar]) {
        if self.speed_multiplier.is_infinite() {
            return;
        }
        let Some(next) = bars.get(index + 1) else {
            return;
        };
        let delta = (next.timestamp_close - bars[index].timestamp_close)
            .to_std()
            .unwrap_or_default();
        if delta.is_zero() {
            return;
        }
        tokio::time::sleep(delta.div_f64(self.speed_multiplier.max(1e-9))).await;
    }
}
