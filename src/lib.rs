//! async-ops — run work that may outlive the caller's patience.
//!
//! `execute` answers with the final result or a `timeout` snapshot and a
//! `logId`; a background continuation records the real outcome, which
//! callers read back through [`ResultQuery`].

pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod logs;
pub mod operation;
pub mod query;
pub mod shell;
pub mod store;

pub use config::EngineConfig;
pub use engine::{CancellationToken, Engine, Executor, ExecutorError, ProgressReporter};
pub use error::{Error, Result};
pub use logs::LogStore;
pub use operation::{OperationRecord, OperationStatus, Snapshot, SnapshotStatus};
pub use query::ResultQuery;
pub use shell::ShellCommand;
pub use store::{LibSqlBackend, LogEntry, MemoryStore, Store};
