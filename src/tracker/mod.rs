//! Node statistics tracking
//!
//! ```text
//! FeedSession ──► NodeTracker (ingest) ──► NodeStatsRegistry (in-memory)
//!                      │                        ▲
//!                      ▼                        │ take_snapshot()
//!                  NodeStore ◄──────── snapshot scheduler
//! ```

pub mod accumulator;
pub mod ingest;
pub mod registry;
pub mod retry;

pub use accumulator::AvgAccumulator;
pub use ingest::{LocationOutcome, LocationUpdate, NodeTracker};
pub use registry::{
    lock_registry, AddTicket, NodeStatsRegistry, NodeTrackingStats, PendingHistory, SharedRegistry,
};
pub use retry::{PostponedLocation, RetryPolicy};
