//! Bar — the fundamental market data unit.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed bar interval. Names follow broker convention (M = minute,
/// H = hour, D/W = day/week, MN = month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
    MN1,
}

impl Timeframe {
    /// Nominal wall-clock length of one bar.
    pub fn duration(&self) -> Duration {
        let secs = match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1_800,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
            Timeframe::W1 => 604_800,
            Timeframe::MN1 => 2_592_000,
        };
        Duration::from_secs(secs)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
            Timeframe::W1 => "W1",
            Timeframe::MN1 => "MN1",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "M1" => Ok(Timeframe::M1),
            "M5" => Ok(Timeframe::M5),
            "M15" => Ok(Timeframe::M15),
            "M30" => Ok(Timeframe::M30),
            "H1" => Ok(Timeframe::H1),
            "H4" => Ok(Timeframe::H4),
            "D1" => Ok(Timeframe::D1),
            "W1" => Ok(Timeframe::W1),
            "MN1" => Ok(Timeframe::MN1),
            other => Err(format!("unknown timeframe '{other}'")),
        }
    }
}

/// OHLCV bar for one symbol on one broker feed.
///
/// The ordering key throughout the system is `timestamp_close`: a bar
/// becomes knowable the instant it closes, never before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub broker: String,
    pub timeframe: Timeframe,
    pub timestamp_open: DateTime<Utc>,
    pub timestamp_close: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Bid/ask spread at close, when the feed provides it.
    pub spread: Option<f64>,
}

impl Bar {
    /// Basic OHLC sanity check: high >= low, extremes bracket open/close.
    pub fn is_sane(&self) -> bool {
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
            && self.timestamp_close >= self.timestamp_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::parse_utc;

    fn sample_bar() -> Bar {
        Bar {
            symbol: "EURUSD".into(),
            broker: "paper".into(),
            timeframe: Timeframe::H1,
            timestamp_open: parse_utc("2024-01-02T09:00:00Z").unwrap(),
            timestamp_close: parse_utc("2024-01-02T10:00:00Z").unwrap(),
            open: 1.1000,
            high: 1.1050,
            low: 1.0980,
            close: 1.1030,
            volume: 5_000.0,
            spread: Some(0.0001),
        }
    }

    #[test]
    fn bar_is_sane() {
        assert!(sample_bar().is_sane());
    }

    #[test]
    fn bar_detects_inverted_high_low() {
        let mut bar = sample_bar();
        bar.high = bar.low - 0.01;
        assert!(!bar.is_sane());
    }

    #[test]
    fn timeframe_roundtrip_and_duration() {
        for tf in [
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
            Timeframe::W1,
            Timeframe::MN1,
        ] {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert_eq!(Timeframe::H1.duration().as_secs(), 3_600);
        assert_eq!("h4".parse::<Timeframe>().unwrap(), Timeframe::H4);
        assert!("X9".parse::<Timeframe>().is_err());
    }
}
