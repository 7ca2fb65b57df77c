//! Domain types shared by the replay pipeline.

mod bar;
mod position;
mod tick;
mod trade;

pub use bar::{Bar, Timeframe};
pub use position::{Account, OrderSide, Position, PositionMetadata, PositionStatus};
pub use tick::Tick;
pub use trade::TradeRecord;
