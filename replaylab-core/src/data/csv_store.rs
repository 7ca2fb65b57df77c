//! CSV-backed bar store.
//!
//! One file per series, named `{symbol}_{broker}_{timeframe}.csv`, with a
//! header row:
//!
//! ```text
//! timestamp_open,timestamp_close,open,high,low,close,volume,spread
//! ```
//!
//! Timestamps must carry an explicit UTC offset; naive values are
//! rejected at parse time. A missing file is treated as a data gap
//! (empty series) so sweeps over sparse symbol sets keep running.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use super::store::{BarStore, StoreError};
use super::SeriesKey;
use crate::domain::Bar;
use crate::time::{parse_utc, DateRange};

pub struct CsvBarStore {
    root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CsvBarRow {
    timestamp_open: String,
    timestamp_close: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    spread: Option<f64>,
}

impl CsvBarStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &SeriesKey) -> PathBuf {
        self.root
            .join(format!("{}_{}_{}.csv", key.symbol, key.broker, key.timeframe))
    }

    fn read_file(path: &Path, key: &SeriesKey) -> Result<Vec<Bar>, StoreError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut bars = Vec::new();
        for row in reader.deserialize() {
            let row: CsvBarRow = row?;
            bars.push(Bar {
                symbol: key.symbol.clone(),
                broker: key.broker.clone(),
                timeframe: key.timeframe,
                timestamp_open: parse_utc(&row.timestamp_open)?,
                timestamp_close: parse_utc(&row.timestamp_close)?,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
                spread: row.spread,
            });
        }
        Ok(bars)
    }
}

#[async_trait]
impl BarStore for CsvBarStore {
    async fn fetch(&self, key: &SeriesKey, range: &DateRange) -> Result<Vec<Bar>, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            warn!(series = %key, path = %path.display(), "bar file missing, treating as data gap");
            return Ok(Vec::new());
        }
        let key = key.clone();
        let range = *range;
        let bars = tokio::task::spawn_blocking(move || Self::read_file(&path, &key))
            .await
            .map_err(|join_err| StoreError::Io(std::io::Error::other(join_err)))??;
        Ok(bars
            .into_iter()
            .filter(|bar| range.contains(bar.timestamp_close))
            .collect())
    }
}
