//! Bar store contract and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use super::SeriesKey;
use crate::domain::Bar;
use crate::time::{DateRange, TimeError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error reading bar data: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed bar data: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Time(#[from] TimeError),
}

/// Read access to a historical bar archive. Implementations return bars
/// whose close timestamp falls inside the requested range, in any order;
/// the windowed facade sorts once on preload.
#[async_trait]
pub trait BarStore: Send + Sync {
    async fn fetch(&self, key: &SeriesKey, range: &DateRange) -> Result<Vec<Bar>, StoreError>;
}

/// In-memory store used by tests, fixtures, and synthetic replays.
#[derive(Default)]
pub struct MemoryBarStore {
    series: RwLock<HashMap<SeriesKey, Vec<Bar>>>,
}

impl MemoryBarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: SeriesKey, bars: Vec<Bar>) {
        self.series
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, bars);
    }
}

#[async_trait]
impl BarStore for MemoryBarStore {
    async fn fetch(&self, key: &SeriesKey, range: &DateRange) -> Result<Vec<Bar>, StoreError> {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        Ok(series
            .get(key)
            .map(|bars| {
                bars.iter()
                    .filter(|bar| range.contains(bar.timestamp_close))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Timeframe;
    use crate::time::parse_utc;

    fn bar_at(hour: u32) -> Bar {
        let open = parse_utc(&format!("2024-01-02T{hour:02}:00:00Z")).unwrap();
        Bar {
            symbol: "EURUSD".into(),
            broker: "paper".into(),
            timeframe: Timeframe::H1,
            timestamp_open: open,
            timestamp_close: open + chrono::Duration::hours(1),
            open: 1.0,
            high: 1.1,
            low: 0.9,
            close: 1.05,
            volume: 100.0,
            spread: None,
        }
    }

    #[tokio::test]
    async fn fetch_filters_by_close_timestamp() {
        let store = MemoryBarStore::new();
        let key = SeriesKey::new("EURUSD", "paper", Timeframe::H1);
        store.insert(key.clone(), (0..5).map(bar_at).collect());

        let range = DateRange::new(
            parse_utc("2024-01-02T02:00:00Z").unwrap(),
            parse_utc("2024-01-02T04:00:00Z").unwrap(),
        );
        let bars = store.fetch(&key, &range).await.unwrap();
        assert_eq!(bars.len(), 3); // closes at 02, 03, 04
    }

    #[tokio::test]
    async fn unknown_series_is_a_data_gap_not_an_error() {
        let store = MemoryBarStore::new();
        let key = SeriesKey::new("XAUUSD", "paper", Timeframe::H1);
        let range = DateRange::new(
            parse_utc("2024-01-01T00:00:00Z").unwrap(),
            parse_utc("2024-02-01T00:00:00Z").unwrap(),
        );
        assert!(store.fetch(&key, &range).await.unwrap().is_empty());
    }
}
