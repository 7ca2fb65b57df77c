//! Time-gated read facade over a bar store.
//!
//! Each series carries a visibility watermark: the latest bar-close
//! timestamp a reader is permitted to see. Watermarks only move forward
//! within a run; a backward move would silently reopen a look-ahead hole,
//! so it is rejected instead of accepted.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use super::store::{BarStore, StoreError};
use super::SeriesKey;
use crate::domain::Bar;
use crate::time::DateRange;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("watermark for {key} would move backward: {current} -> {requested}")]
    WatermarkRegression {
        key: SeriesKey,
        current: DateTime<Utc>,
        requested: DateTime<Utc>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Windowed repository. All pipeline reads go through here during replay.
pub struct WindowedRepository {
    store: Arc<dyn BarStore>,
    series: RwLock<HashMap<SeriesKey, Arc<Vec<Bar>>>>,
    visible_until: RwLock<HashMap<SeriesKey, DateTime<Utc>>>,
}

impl WindowedRepository {
    pub fn new(store: Arc<dyn BarStore>) -> Self {
        Self {
            store,
            series: RwLock::new(HashMap::new()),
            visible_until: RwLock::new(HashMap::new()),
        }
    }

    /// Load and time-sort a series once per key.
    ///
    /// Memoized: a repeated call with the same key returns the cached set
    /// unchanged even if the requested range differs. One key is used
    /// once per run; the orchestrator's reset clears the cache between
    /// runs.
    pub async fn preload(
        &self,
        key: &SeriesKey,
        range: &DateRange,
    ) -> Result<Arc<Vec<Bar>>, WindowError> {
        if let Some(bars) = self
            .series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Ok(Arc::clone(bars));
        }
        let mut bars = self.store.fetch(key, range).await?;
        bars.sort_by_key(|bar| bar.timestamp_close);
        debug!(series = %key, bars = bars.len(), "series preloaded");
        let bars = Arc::new(bars);
        let mut series = self
            .series
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // A concurrent preload may have won the race; keep the first.
        Ok(Arc::clone(
            series.entry(key.clone()).or_insert_with(|| bars),
        ))
    }

    /// Advance the visibility watermark for one series. Forward-only:
    /// equal timestamps are accepted, earlier ones are an error.
    pub fn set_visible_until(
        &self,
        key: &SeriesKey,
        timestamp: DateTime<Utc>,
    ) -> Result<(), WindowError> {
        let mut visible = self
            .visible_until
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = visible.get(key) {
            if timestamp < *current {
                return Err(WindowError::WatermarkRegression {
                    key: key.clone(),
                    current: *current,
                    requested: timestamp,
                });
            }
        }
        visible.insert(key.clone(), timestamp);
        Ok(())
    }

    /// Bars within `range` whose close timestamp is at or before the
    /// watermark. Empty until a watermark is set for the key.
    pub fn get_visible(&self, key: &SeriesKey, range: &DateRange) -> Vec<Bar> {
        let Some(watermark) = self.watermark(key) else {
            return Vec::new();
        };
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        series
            .get(key)
            .map(|bars| {
                bars.iter()
                    .filter(|bar| {
                        range.contains(bar.timestamp_close) && bar.timestamp_close <= watermark
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn watermark(&self, key: &SeriesKey) -> Option<DateTime<Utc>> {
        self.visible_until
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    /// Currently visible bar count for one series. Diagnostics and tests.
    pub fn visible_count(&self, key: &SeriesKey) -> usize {
        let Some(watermark) = self.watermark(key) else {
            return 0;
        };
        self.series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|bars| {
                bars.iter()
                    .filter(|bar| bar.timestamp_close <= watermark)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Drop all cached series and watermarks. Part of the orchestrator's
    /// between-runs reset.
    pub fn clear(&self) {
        self.series
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.visible_until
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
