//! Offline synchronization
//!
//! Mutations recorded while offline and responses awaiting confirmation live
//! in the persistent store; [`SyncEngine`] reconciles them when online.

pub mod engine;
pub mod mutation;
pub mod pending;

pub use engine::{Submission, SyncEngine, SyncReport, SyncRun, SyncStatus};
pub use mutation::{MutationKind, MutationQueue, OfflineMutation};
pub use pending::{PendingResponse, PendingResponses};
