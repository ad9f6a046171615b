//! Event telemetry
//!
//! Analytics events are buffered, persisted and delivered in batches.

pub mod event;
pub mod queue;
pub mod session;

pub use event::{QueuedEvent, kinds};
pub use queue::{FlushOutcome, TelemetryQueue};
pub use session::{Session, SessionManager};
