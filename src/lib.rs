//! Node telemetry tracker
//!
//! Subscribes to a telemetry feed over a websocket, keeps rolling
//! per-node statistics in memory and periodically appends a history
//! snapshot of every tracked node to a durable store.

pub mod config;
pub mod feed;
pub mod logging;
pub mod scheduler;
pub mod store;
pub mod tracker;
