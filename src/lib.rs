//! pollsync - offline-resilient client core for the Pollsync survey service
//!
//! Three cooperating components sit between the UI and the network:
//!
//! - [`gateway::Gateway`] issues every remote call with caching, in-flight
//!   de-duplication, retry with backoff and error normalization.
//! - [`telemetry::TelemetryQueue`] buffers analytics events and delivers them
//!   in order, surviving failed flushes and restarts.
//! - [`sync::SyncEngine`] replays work recorded while offline and reconciles
//!   local state once connectivity returns.
//!
//! [`context::Resilience`] wires them together around one persistent store.

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod host;
pub mod store;
pub mod sync;
pub mod telemetry;

pub use context::{BackgroundTasks, Resilience};
pub use error::{ApiError, Error, Result};
