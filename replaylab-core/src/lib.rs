//! ReplayLab Core — the substrate that market replay runs on.
//!
//! This crate contains the pieces every pipeline stage shares:
//! - Domain types (bars, ticks, positions, accounts, trade records)
//! - Typed events with UTC-normalized timestamps
//! - Async publish/subscribe event bus with strict cross-event FIFO
//! - Time-gated data facade (visibility watermarks per series)
//! - Bar-by-bar injector with warm-up, pacing, and pause/resume/stop

pub mod bus;
pub mod data;
pub mod domain;
pub mod events;
pub mod time;
