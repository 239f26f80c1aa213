//! Execution engine — runs executors and persists their outcomes.
//!
//! Core components:
//! - `executor` — the executor capability (progress reporter, cancellation signal)
//! - `registry` — live operations keyed by `log_id`, with join-on-settlement
//! - `engine` — execute / cancel / join and the background continuation
//! - `retention` — age-based eviction of old operation records

pub mod engine;
pub mod executor;
pub mod registry;
pub mod retention;

pub use engine::Engine;
pub use executor::{Executor, ExecutorError, ProgressReporter};
pub use registry::{Settlement, TaskRegistry};
pub use retention::spawn_retention_sweep;
pub use tokio_util::sync::CancellationToken;
