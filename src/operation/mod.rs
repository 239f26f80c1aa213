//! Operation data model.
//!
//! - `state` — status enum and the legal-transition table
//! - `record` — the durable operation record
//! - `snapshot` — what callers get back from execute/get/cancel

pub mod record;
pub mod snapshot;
pub mod state;

pub use record::OperationRecord;
pub use snapshot::{Snapshot, SnapshotStatus};
pub use state::OperationStatus;
