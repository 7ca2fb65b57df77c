//! Typed events — the only currency the bus accepts.
//!
//! Every event carries a uuid, a UTC timestamp, a source tag, and the run
//! id it belongs to. Events are created at publish time and discarded
//! after dispatch; nothing here persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{OrderSide, Timeframe};

/// Event discriminant used for subscription matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Tick,
    BarClose,
    Signal,
    OrderSubmit,
    OrderFill,
    Error,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::Tick => "TICK",
            EventKind::BarClose => "BAR_CLOSE",
            EventKind::Signal => "SIGNAL",
            EventKind::OrderSubmit => "ORDER_SUBMIT",
            EventKind::OrderFill => "ORDER_FILL",
            EventKind::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Errors raised while constructing event payloads.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("signal confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalDirection {
    Buy,
    Sell,
    Wait,
    NoTrade,
}

impl SignalDirection {
    /// WAIT and NO_TRADE never reach risk evaluation or order submission.
    pub fn is_actionable(&self) -> bool {
        matches!(self, SignalDirection::Buy | SignalDirection::Sell)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalDirection::Buy => "BUY",
            SignalDirection::Sell => "SELL",
            SignalDirection::Wait => "WAIT",
            SignalDirection::NoTrade => "NO_TRADE",
        }
    }
}

/// Quote update synthesized from a bar close during replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickPayload {
    pub symbol: String,
    pub broker: String,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub volume: f64,
}

/// Completed OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarClosePayload {
    pub symbol: String,
    pub broker: String,
    pub timeframe: Timeframe,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub timestamp_open: DateTime<Utc>,
    pub timestamp_close: DateTime<Utc>,
}

/// Strategy output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub symbol: String,
    pub broker: String,
    pub strategy_id: String,
    pub direction: SignalDirection,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub timeframe: Timeframe,
    pub horizon: String,
}

impl SignalPayload {
    /// Confidence outside [0, 1] is a construction error, not a clamp.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        broker: impl Into<String>,
        strategy_id: impl Into<String>,
        direction: SignalDirection,
        confidence: f64,
        reasons: Vec<String>,
        timeframe: Timeframe,
        horizon: impl Into<String>,
    ) -> Result<Self, EventError> {
        if !(0.0..=1.0).contains(&confidence) || confidence.is_nan() {
            return Err(EventError::ConfidenceOutOfRange(confidence));
        }
        Ok(Self {
            symbol: symbol.into(),
            broker: broker.into(),
            strategy_id: strategy_id.into(),
            direction,
            confidence,
            reasons,
            timeframe,
            horizon: horizon.into(),
        })
    }
}

/// Order lifecycle payloads (submit / fill).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPayload {
    pub order_id: String,
    pub symbol: String,
    pub broker: String,
    pub direction: OrderSide,
    pub quantity: f64,
    pub price: Option<f64>,
    pub stop_loss: Option<f64>,
    /// Set on fills only.
    pub fill_price: Option<f64>,
}

/// Error raised by a pipeline stage, published for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub module: String,
    pub message: String,
    pub severity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    Tick(TickPayload),
    BarClose(BarClosePayload),
    Signal(SignalPayload),
    OrderSubmit(OrderPayload),
    OrderFill(OrderPayload),
    Error(ErrorPayload),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Tick(_) => EventKind::Tick,
            EventPayload::BarClose(_) => EventKind::BarClose,
            EventPayload::Signal(_) => EventKind::Signal,
            EventPayload::OrderSubmit(_) => EventKind::OrderSubmit,
            EventPayload::OrderFill(_) => EventKind::OrderFill,
            EventPayload::Error(_) => EventKind::Error,
        }
    }
}

/// Envelope dispatched by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub run_id: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(
        source: impl Into<String>,
        run_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: EventPayload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            source: source.into(),
            run_id: run_id.into(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn as_bar_close(&self) -> Option<&BarClosePayload> {
        match &self.payload {
            EventPayload::BarClose(bar) => Some(bar),
            _ => None,
        }
    }

    pub fn as_tick(&self) -> Option<&TickPayload> {
        match &self.payload {
            EventPayload::Tick(tick) => Some(tick),
            _ => None,
        }
    }

    pub fn as_signal(&self) -> Option<&SignalPayload> {
        match &self.payload {
            EventPayload::Signal(signal) => Some(signal),
            _ => None,
        }
    }

    /// Named-field access used by field-equality subscription filters.
    ///
    /// Unknown names return `None`, which a field filter treats as a
    /// non-match rather than an error.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => return Some(Value::String(self.id.to_string())),
            "kind" => return Some(Value::String(self.kind().to_string())),
            "source" => return Some(Value::String(self.source.clone())),
            "run_id" => return Some(Value::String(self.run_id.clone())),
            "timestamp" => return Some(Value::String(self.timestamp.to_rfc3339())),
            _ => {}
        }
        match (&self.payload, name) {
            (EventPayload::Tick(p), "symbol") => Some(Value::String(p.symbol.clone())),
            (EventPayload::Tick(p), "broker") => Some(Value::String(p.broker.clone())),
            (EventPayload::BarClose(p), "symbol") => Some(Value::String(p.symbol.clone())),
            (EventPayload::BarClose(p), "broker") => Some(Value::String(p.broker.clone())),
            (EventPayload::BarClose(p), "timeframe") => {
                Some(Value::String(p.timeframe.to_string()))
            }
            (EventPayload::Signal(p), "symbol") => Some(Value::String(p.symbol.clone())),
            (EventPayload::Signal(p), "broker") => Some(Value::String(p.broker.clone())),
            (EventPayload::Signal(p), "strategy_id") => Some(Value::String(p.strategy_id.clone())),
            (EventPayload::Signal(p), "direction") => {
                Some(Value::String(p.direction.as_str().to_string()))
            }
            (EventPayload::Signal(p), "timeframe") => Some(Value::String(p.timeframe.to_string())),
            (EventPayload::OrderSubmit(p) | EventPayload::OrderFill(p), "symbol") => {
                Some(Value::String(p.symbol.clone()))
            }
            (EventPayload::OrderSubmit(p) | EventPayload::OrderFill(p), "broker") => {
                Some(Value::String(p.broker.clone()))
            }
            (EventPayload::OrderSubmit(p) | EventPayload::OrderFill(p), "order_id") => {
                Some(Value::String(p.order_id.clone()))
            }
            (EventPayload::Error(p), "module") => Some(Value::String(p.module.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::parse_utc;

    fn sample_signal() -> SignalPayload {
        SignalPayload::new(
            "EURUSD",
            "paper",
            "ma_cross",
            SignalDirection::Buy,
            0.8,
            vec!["fast above slow".into()],
            Timeframe::H1,
            "1d",
        )
        .unwrap()
    }

    #[test]
    fn signal_confidence_is_validated() {
        let err = SignalPayload::new(
            "EURUSD",
            "paper",
            "ma_cross",
            SignalDirection::Buy,
            1.2,
            vec![],
            Timeframe::H1,
            "1d",
        )
        .unwrap_err();
        assert!(matches!(err, EventError::ConfidenceOutOfRange(_)));
    }

    #[test]
    fn direction_actionability() {
        assert!(SignalDirection::Buy.is_actionable());
        assert!(SignalDirection::Sell.is_actionable());
        assert!(!SignalDirection::Wait.is_actionable());
        assert!(!SignalDirection::NoTrade.is_actionable());
    }

    #[test]
    fn field_accessor_covers_payload_fields() {
        let ts = parse_utc("2024-01-02T10:00:00Z").unwrap();
        let event = Event::new("test", "run-1", ts, EventPayload::Signal(sample_signal()));
        assert_eq!(event.field("symbol"), Some(Value::String("EURUSD".into())));
        assert_eq!(
            event.field("strategy_id"),
            Some(Value::String("ma_cross".into()))
        );
        assert_eq!(event.field("direction"), Some(Value::String("BUY".into())));
        assert_eq!(event.field("run_id"), Some(Value::String("run-1".into())));
        assert_eq!(event.field("no_such_field"), None);
    }

    #[test]
    fn kind_matches_payload() {
        let ts = parse_utc("2024-01-02T10:00:00Z").unwrap();
        let event = Event::new("test", "run-1", ts, EventPayload::Signal(sample_signal()));
        assert_eq!(event.kind(), EventKind::Signal);
        assert!(event.as_signal().is_some());
        assert!(event.as_bar_close().is_none());
    }
}
