//! Subscription filters — field-equality maps and predicates.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::events::Event;

/// Optional per-subscription filter applied after kind matching.
#[derive(Clone)]
pub enum EventFilter {
    /// Every named field must exist on the event and equal the given value.
    /// A missing field is a non-match, not an error.
    Fields(HashMap<String, Value>),
    /// Arbitrary predicate over the whole event.
    Predicate(Arc<dyn Fn(&Event) -> bool + Send + Sync>),
}

impl EventFilter {
    /// Single field-equality filter.
    pub fn field(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = HashMap::new();
        map.insert(name.into(), value.into());
        EventFilter::Fields(map)
    }

    pub fn predicate(f: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        EventFilter::Predicate(Arc::new(f))
    }

    pub fn matches(&self, event: &Event) -> bool {
        match self {
            EventFilter::Fields(expected) => expected
                .iter()
                .all(|(name, want)| event.field(name).as_ref() == Some(want)),
            EventFilter::Predicate(f) => f(event),
        }
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventFilter::Fields(map) => f.debug_tuple("Fields").field(map).finish(),
            EventFilter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Timeframe;
    use crate::events::{EventPayload, SignalDirection, SignalPayload};
    use crate::time::parse_utc;

    fn signal_event(symbol: &str) -> Event {
        let payload = SignalPayload::new(
            symbol,
            "paper",
            "ma_cross",
            SignalDirection::Buy,
            0.7,
            vec![],
            Timeframe::H1,
            "1d",
        )
        .unwrap();
        Event::new(
            "test",
            "run-1",
            parse_utc("2024-01-02T10:00:00Z").unwrap(),
            EventPayload::Signal(payload),
        )
    }

    #[test]
    fn field_filter_matches_on_equality() {
        let filter = EventFilter::field("symbol", "EURUSD");
        assert!(filter.matches(&signal_event("EURUSD")));
        assert!(!filter.matches(&signal_event("GBPUSD")));
    }

    #[test]
    fn missing_field_is_a_non_match() {
        let filter = EventFilter::field("order_id", "x");
        assert!(!filter.matches(&signal_event("EURUSD")));
    }

    #[test]
    fn predicate_filter_sees_whole_event() {
        let filter = EventFilter::predicate(|event| {
            event.as_signal().is_some_and(|s| s.confidence > 0.5)
        });
        assert!(filter.matches(&signal_event("EURUSD")));
    }
}
