//! Historical data access: bar stores, the time-gated facade, and the
//! bar-by-bar injector.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::Timeframe;

mod csv_store;
mod injector;
mod store;
mod window;

pub use csv_store::CsvBarStore;
pub use injector::{DataInjector, InjectError};
pub use store::{BarStore, MemoryBarStore, StoreError};
pub use window::{WindowError, WindowedRepository};

/// Identity of one bar series: (symbol, broker, timeframe).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: String,
    pub broker: String,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new(
        symbol: impl Into<String>,
        broker: impl Into<String>,
        timeframe: Timeframe,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            broker: broker.into(),
            timeframe,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.symbol, self.broker, self.timeframe)
    }
}
