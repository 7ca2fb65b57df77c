//! Paper collaborators — minimal but complete pipeline implementations.
//!
//! These exist so the orchestrator can be driven end to end without an
//! external strategy stack: an SMA-crossover signal engine, a
//! fixed-fraction risk manager with ATR stops, and an immediate-fill
//! order manager marking to the latest replayed price.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use replaylab_core::domain::{
    Account, OrderSide, Position, PositionMetadata, PositionStatus,
};
use replaylab_core::events::{BarClosePayload, SignalDirection, SignalPayload};

use super::{OrderManager, PipelineError, PositionAction, RiskCheck, RiskManager, Signal, SignalEngine};

// ─── Signal engine ──────────────────────────────────────────────────

/// SMA crossover: emits BUY when the fast average crosses above the slow
/// one, SELL on the opposite cross, nothing otherwise.
pub struct MaCrossoverSignals {
    strategy_id: String,
    fast: usize,
    slow: usize,
    closes: Mutex<HashMap<String, Vec<f64>>>,
}

impl MaCrossoverSignals {
    pub fn new(strategy_id: impl Into<String>, fast: usize, slow: usize) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            fast: fast.max(1),
            slow: slow.max(2),
            closes: Mutex::new(HashMap::new()),
        }
    }

    fn sma(values: &[f64], period: usize) -> f64 {
        let tail = &values[values.len() - period..];
        tail.iter().sum::<f64>() / period as f64
    }
}

impl Default for MaCrossoverSignals {
    fn default() -> Self {
        Self::new("ma_cross", 5, 20)
    }
}

#[async_trait]
impl SignalEngine for MaCrossoverSignals {
    async fn on_bar_close(&self, bar: &BarClosePayload) -> Option<SignalPayload> {
        let series = format!("{}/{}/{}", bar.symbol, bar.broker, bar.timeframe);
        let mut closes = self.closes.lock().unwrap_or_else(PoisonError::into_inner);
        let history = closes.entry(series).or_default();
        history.push(bar.close);
        if history.len() > self.slow + 1 {
            history.remove(0);
        }
        if history.len() < self.slow + 1 {
            return None;
        }

        let prev = &history[..history.len() - 1];
        let prev_fast = Self::sma(prev, self.fast);
        let prev_slow = Self::sma(prev, self.slow);
        let fast_now = Self::sma(history, self.fast);
        let slow_now = Self::sma(history, self.slow);

        let direction = if prev_fast <= prev_slow && fast_now > slow_now {
            SignalDirection::Buy
        } else if prev_fast >= prev_slow && fast_now < slow_now {
            SignalDirection::Sell
        } else {
            return None;
        };

        let separation = (fast_now - slow_now).abs() / slow_now.abs().max(1e-12);
        let confidence = (separation * 200.0).clamp(0.05, 1.0);
        let reason = match direction {
            SignalDirection::Buy => "fast ma crossed above slow ma",
            _ => "fast ma crossed below slow ma",
        };
        SignalPayload::new(
            &bar.symbol,
            &bar.broker,
            &self.strategy_id,
            direction,
            confidence,
            vec![reason.to_string()],
            bar.timeframe,
            "1d",
        )
        .ok()
    }
}

// ─── Risk manager ───────────────────────────────────────────────────

/// Fixed-fraction sizing with ATR stops and a trailing-stop monitor.
pub struct NaiveRiskManager {
    pub risk_fraction: f64,
    pub atr_stop_multiple: f64,
    pub max_open_positions: usize,
}

impl Default for NaiveRiskManager {
    fn default() -> Self {
        Self {
            risk_fraction: 0.01,
            atr_stop_multiple: 2.0,
            max_open_positions: 5,
        }
    }
}

#[async_trait]
impl RiskManager for NaiveRiskManager {
    async fn evaluate(
        &self,
        signal: &Signal,
        account: &Account,
        open_positions: &[Position],
        current_atr: f64,
    ) -> RiskCheck {
        if !signal.direction.is_actionable() {
            return RiskCheck::rejected("direction is not actionable");
        }
        if open_positions.len() >= self.max_open_positions {
            return RiskCheck::rejected("max open positions reached");
        }
        if open_positions.iter().any(|p| p.symbol == signal.symbol) {
            return RiskCheck::rejected("position already open for symbol");
        }
        let Some(entry) = signal.entry_price else {
            return RiskCheck::rejected("no entry price available");
        };
        let stop_distance = current_atr.max(1e-9) * self.atr_stop_multiple;
        let stop = match signal.direction {
            SignalDirection::Buy => entry - stop_distance,
            _ => entry + stop_distance,
        };
        let quantity = (account.equity * self.risk_fraction) / stop_distance;
        if quantity <= 0.0 || !quantity.is_finite() {
            return RiskCheck::rejected("non-positive position size");
        }
        RiskCheck {
            approved: true,
            quantity,
            stop_loss: Some(stop),
            reason: None,
        }
    }

    async fn monitor_open_positions(
        &self,
        open_positions: &[Position],
        current_prices: &HashMap<String, f64>,
        current_atrs: &HashMap<String, f64>,
    ) -> Vec<PositionAction> {
        let mut actions = Vec::new();
        for position in open_positions {
            let Some(&price) = current_prices.get(&position.symbol) else {
                continue;
            };
            let atr = current_atrs
                .get(&position.symbol)
                .copied()
                .unwrap_or(price.abs() * 0.001)
                .max(1e-9);
            let Some(stop) = position.stop_loss else {
                continue;
            };
            let stop_hit = match position.side {
                OrderSide::Buy => price <= stop,
                OrderSide::Sell => price >= stop,
            };
            if stop_hit {
                actions.push(PositionAction::Close {
                    position_id: position.position_id.clone(),
                    reason: "stop_loss".to_string(),
                });
                continue;
            }
            // Ratchet the stop in the trade's favor, never against it.
            let candidate = match position.side {
                OrderSide::Buy => price - atr * self.atr_stop_multiple,
                OrderSide::Sell => price + atr * self.atr_stop_multiple,
            };
            let improves = match position.side {
                OrderSide::Buy => candidate > stop,
                OrderSide::Sell => candidate < stop,
            };
            if improves {
                actions.push(PositionAction::UpdateTrailing {
                    position_id: position.position_id.clone(),
                    new_stop: candidate,
                });
            }
        }
        actions
    }
}

// ─── Order manager ──────────────────────────────────────────────────

#[derive(Clone, Copy)]
struct Mark {
    price: f64,
    at: DateTime<Utc>,
}

struct PaperBook {
    open: HashMap<String, Position>,
    closed: Vec<Position>,
    account: Account,
    marks: HashMap<String, Mark>,
    next_position_id: u64,
}

impl PaperBook {
    fn fresh(initial_capital: f64) -> Self {
        Self {
            open: HashMap::new(),
            closed: Vec::new(),
            account: Account::with_capital(initial_capital),
            marks: HashMap::new(),
            next_position_id: 0,
        }
    }

    fn refresh_equity(&mut self) {
        let unrealized: f64 = self
            .open
            .values()
            .map(|p| p.unrealized_pnl(p.current_price))
            .sum();
        self.account.unrealized_pnl = unrealized;
        self.account.equity = self.account.balance + unrealized;
    }
}

/// Immediate-fill paper book: every approved order fills at the latest
/// mark, positions close at the latest mark for their symbol.
pub struct PaperOrderManager {
    commission_rate: f64,
    book: Mutex<PaperBook>,
}

impl PaperOrderManager {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            commission_rate: 2e-5,
            book: Mutex::new(PaperBook::fresh(initial_capital)),
        }
    }

    /// Commission per unit of traded notional, charged on each side.
    pub fn with_commission_rate(mut self, rate: f64) -> Self {
        self.commission_rate = rate;
        self
    }
}

#[async_trait]
impl OrderManager for PaperOrderManager {
    async fn submit_from_signal(
        &self,
        signal: &Signal,
        risk_check: &RiskCheck,
    ) -> Result<String, PipelineError> {
        let mut book = self.book.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = match signal.entry_price {
            Some(price) => price,
            None => {
                book.marks
                    .get(&signal.symbol)
                    .ok_or_else(|| PipelineError::NoMarketPrice(signal.symbol.clone()))?
                    .price
            }
        };
        let side = match signal.direction {
            SignalDirection::Sell => OrderSide::Sell,
            _ => OrderSide::Buy,
        };
        book.next_position_id += 1;
        let position_id = format!("pos-{}", book.next_position_id);
        let commission = entry.abs() * risk_check.quantity * self.commission_rate;
        let position = Position {
            position_id: position_id.clone(),
            symbol: signal.symbol.clone(),
            broker: signal.broker.clone(),
            strategy_id: signal.strategy_id.clone(),
            side,
            quantity: risk_check.quantity,
            entry_price: entry,
            current_price: entry,
            close_price: None,
            stop_loss: risk_check.stop_loss,
            opened_at: signal.timestamp,
            closed_at: None,
            realized_pnl: 0.0,
            commission_total: commission,
            status: PositionStatus::Open,
            metadata: PositionMetadata {
                timeframe: Some(signal.timeframe),
                bars_held: None,
                requested_quantity: Some(risk_check.quantity),
                exit_reason: None,
                regime_trend: None,
                regime_volatility: None,
                signal_confidence: Some(signal.confidence),
                slippage: 0.0,
            },
        };
        book.account.balance -= commission;
        book.open.insert(position_id.clone(), position);
        book.refresh_equity();
        Ok(position_id)
    }

    fn get_open_positions(&self) -> Vec<Position> {
        let book = self.book.lock().unwrap_or_else(PoisonError::into_inner);
        let mut positions: Vec<Position> = book.open.values().cloned().collect();
        positions.sort_by(|a, b| a.position_id.cmp(&b.position_id));
        positions
    }

    fn get_positions(&self, include_closed: bool) -> Vec<Position> {
        let book = self.book.lock().unwrap_or_else(PoisonError::into_inner);
        let mut positions: Vec<Position> = book.open.values().cloned().collect();
        if include_closed {
            positions.extend(book.closed.iter().cloned());
        }
        positions.sort_by(|a, b| a.position_id.cmp(&b.position_id));
        positions
    }

    async fn close_position(&self, position_id: &str, reason: &str) -> Result<(), PipelineError> {
        let mut book = self.book.lock().unwrap_or_else(PoisonError::into_inner);
        let mut position = book
            .open
            .remove(position_id)
            .ok_or_else(|| PipelineError::UnknownPosition(position_id.to_string()))?;
        let mark = book.marks.get(&position.symbol).copied();
        let exit_price = mark.map_or(position.current_price, |m| m.price);
        let exit_at = mark.map_or(position.opened_at, |m| m.at);
        let gross = (exit_price - position.entry_price) * position.side.sign() * position.quantity;
        let exit_commission = exit_price.abs() * position.quantity * self.commission_rate;

        position.commission_total += exit_commission;
        position.realized_pnl = gross - position.commission_total;
        position.close_price = Some(exit_price);
        position.current_price = exit_price;
        position.closed_at = Some(exit_at.max(position.opened_at));
        position.status = PositionStatus::Closed;
        position.metadata.exit_reason = Some(reason.to_string());

        book.account.balance += gross - exit_commission;
        book.closed.push(position);
        book.refresh_equity();
        Ok(())
    }

    fn update_stop_loss(&self, position_id: &str, new_stop: f64) -> bool {
        let mut book = self.book.lock().unwrap_or_else(PoisonError::into_inner);
        match book.open.get_mut(position_id) {
            Some(position) => {
                position.stop_loss = Some(new_stop);
                true
            }
            None => false,
        }
    }

    fn get_account(&self) -> Account {
        self.book
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .account
            .clone()
    }

    fn mark_price(&self, symbol: &str, price: f64, at: DateTime<Utc>) {
        let mut book = self.book.lock().unwrap_or_else(PoisonError::into_inner);
        book.marks.insert(symbol.to_string(), Mark { price, at });
        for position in book.open.values_mut() {
            if position.symbol == symbol {
                position.current_price = price;
            }
        }
        book.refresh_equity();
    }

    fn reset(&self, initial_capital: f64) {
        let mut book = self.book.lock().unwrap_or_else(PoisonError::into_inner);
        *book = PaperBook::fresh(initial_capital);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaylab_core::domain::Timeframe;
    use replaylab_core::time::parse_utc;

    fn signal(direction: SignalDirection, entry: Option<f64>) -> Signal {
        Signal {
            signal_id: "sig-1".into(),
            strategy_id: "ma_cross".into(),
            symbol: "EURUSD".into(),
            broker: "paper".into(),
            timeframe: Timeframe::H1,
            timestamp: parse_utc("2024-01-02T10:00:00Z").unwrap(),
            run_id: "run-1".into(),
            direction,
            confidence: 0.7,
            entry_price: entry,
            atr: 0.001,
        }
    }

    fn approved(quantity: f64, stop: f64) -> RiskCheck {
        RiskCheck {
            approved: true,
            quantity,
            stop_loss: Some(stop),
            reason: None,
        }
    }

    #[tokio::test]
    async fn submit_and_close_realizes_pnl() {
        let oms = PaperOrderManager::new(10_000.0).with_commission_rate(0.0);
        oms.mark_price("EURUSD", 1.10, parse_utc("2024-01-02T10:00:00Z").unwrap());
        let id = oms
            .submit_from_signal(&signal(SignalDirection::Buy, Some(1.10)), &approved(1_000.0, 1.08))
            .await
            .unwrap();
        assert_eq!(oms.get_open_positions().len(), 1);

        oms.mark_price("EURUSD", 1.12, parse_utc("2024-01-02T14:00:00Z").unwrap());
        assert!((oms.get_account().equity - 10_020.0).abs() < 1e-9);

        oms.close_position(&id, "take_profit").await.unwrap();
        assert!(oms.get_open_positions().is_empty());
        let closed = oms.get_positions(true);
        assert_eq!(closed.len(), 1);
        assert!((closed[0].realized_pnl - 20.0).abs() < 1e-9);
        assert_eq!(
            closed[0].closed_at,
            Some(parse_utc("2024-01-02T14:00:00Z").unwrap())
        );
        assert!((oms.get_account().balance - 10_020.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn close_unknown_position_is_an_error() {
        let oms = PaperOrderManager::new(10_000.0);
        assert!(matches!(
            oms.close_position("pos-404", "stop_loss").await,
            Err(PipelineError::UnknownPosition(_))
        ));
    }

    #[tokio::test]
    async fn reset_restores_a_fresh_book() {
        let oms = PaperOrderManager::new(10_000.0).with_commission_rate(0.0);
        oms.mark_price("EURUSD", 1.10, parse_utc("2024-01-02T10:00:00Z").unwrap());
        oms.submit_from_signal(&signal(SignalDirection::Buy, Some(1.10)), &approved(100.0, 1.05))
            .await
            .unwrap();
        oms.reset(5_000.0);
        assert!(oms.get_positions(true).is_empty());
        assert_eq!(oms.get_account().balance, 5_000.0);
        assert_eq!(oms.get_account().equity, 5_000.0);
    }

    #[tokio::test]
    async fn risk_manager_sizes_by_fixed_fraction() {
        let risk = NaiveRiskManager::default();
        let account = Account::with_capital(10_000.0);
        let check = risk
            .evaluate(&signal(SignalDirection::Buy, Some(1.10)), &account, &[], 0.002)
            .await;
        assert!(check.approved);
        // 1% of 10k at a 2 * 0.002 stop distance.
        assert!((check.quantity - 100.0 / 0.004).abs() < 1e-9);
        assert!((check.stop_loss.unwrap() - 1.096).abs() < 1e-12);
    }

    #[tokio::test]
    async fn risk_manager_rejects_duplicate_symbol_exposure() {
        let risk = NaiveRiskManager::default();
        let account = Account::with_capital(10_000.0);
        let oms = PaperOrderManager::new(10_000.0);
        oms.mark_price("EURUSD", 1.10, parse_utc("2024-01-02T10:00:00Z").unwrap());
        oms.submit_from_signal(&signal(SignalDirection::Buy, Some(1.10)), &approved(10.0, 1.05))
            .await
            .unwrap();
        let check = risk
            .evaluate(
                &signal(SignalDirection::Buy, Some(1.10)),
                &account,
                &oms.get_open_positions(),
                0.002,
            )
            .await;
        assert!(!check.approved);
        assert_eq!(check.reason.as_deref(), Some("position already open for symbol"));
    }

    #[tokio::test]
    async fn monitor_closes_on_stop_and_trails_otherwise() {
        let risk = NaiveRiskManager::default();
        let oms = PaperOrderManager::new(10_000.0);
        oms.mark_price("EURUSD", 1.10, parse_utc("2024-01-02T10:00:00Z").unwrap());
        let id = oms
            .submit_from_signal(&signal(SignalDirection::Buy, Some(1.10)), &approved(100.0, 1.08))
            .await
            .unwrap();

        let mut prices = HashMap::new();
        let mut atrs = HashMap::new();
        prices.insert("EURUSD".to_string(), 1.15);
        atrs.insert("EURUSD".to_string(), 0.002);
        let actions = risk
            .monitor_open_positions(&oms.get_open_positions(), &prices, &atrs)
            .await;
        assert_eq!(
            actions,
            vec![PositionAction::UpdateTrailing {
                position_id: id.clone(),
                new_stop: 1.15 - 0.004,
            }]
        );

        prices.insert("EURUSD".to_string(), 1.07);
        let actions = risk
            .monitor_open_positions(&oms.get_open_positions(), &prices, &atrs)
            .await;
        assert_eq!(
            actions,
            vec![PositionAction::Close {
                position_id: id,
                reason: "stop_loss".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn ma_crossover_emits_buy_on_upward_cross() {
        let signals = MaCrossoverSignals::new("ma_cross", 2, 4);
        let base = parse_utc("2024-01-02T00:00:00Z").unwrap();
        // Flat then sharply rising closes force the fast average above the slow one.
        let closes = [100.0, 100.0, 100.0, 100.0, 100.0, 104.0, 109.0];
        let mut emitted = Vec::new();
        for (i, close) in closes.iter().enumerate() {
            let open = base + chrono::Duration::hours(i as i64);
            let bar = BarClosePayload {
                symbol: "EURUSD".into(),
                broker: "paper".into(),
                timeframe: Timeframe::H1,
                open: *close,
                high: *close,
                low: *close,
                close: *close,
                volume: 1.0,
                timestamp_open: open,
                timestamp_close: open + chrono::Duration::hours(1),
            };
            if let Some(payload) = signals.on_bar_close(&bar).await {
                emitted.push(payload);
            }
        }
        assert!(!emitted.is_empty());
        assert_eq!(emitted[0].direction, SignalDirection::Buy);
        assert!((0.0..=1.0).contains(&emitted[0].confidence));
    }
}
