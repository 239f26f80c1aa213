//! Error types for async-ops.
//!
//! Only infrastructure failures are errors. Work-level outcomes (executor
//! failures, cancellations, timeouts, unknown ids) are reported as
//! [`Snapshot`](crate::operation::Snapshot)s.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),

    #[error("Log error: {0}")]
    Log(#[from] LogError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Storage adapter failures.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DatabaseError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Operation state machine errors.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("Operation {id} already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: String,
        state: String,
        target: String,
    },
}

/// Named-log errors.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Invalid log name: {0}")]
    InvalidName(String),
}

/// Result type alias for async-ops.
pub type Result<T> = std::result::Result<T, Error>;
