//! `Store` trait — the storage adapter contract.
//!
//! Two namespaces live behind one adapter: operation records keyed by
//! `log_id`, and named logs keyed by `log_name`. They never share keys.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DatabaseError;
use crate::operation::OperationRecord;

/// One appended entry of a named log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// System-assigned id, stable once appended.
    pub id: String,
    pub log_name: String,
    /// Store-wide append sequence; orders entries within a log.
    pub seq: i64,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Per-log summary for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSummary {
    pub log_name: String,
    pub entries: usize,
    pub last_append: DateTime<Utc>,
}

/// Backend-agnostic storage for operation records and named logs.
///
/// Implementations must make every write atomic per key: a reader never
/// observes a partially written record.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create or upgrade the backing schema.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Operations ──────────────────────────────────────────────────

    /// Insert or replace an operation record.
    ///
    /// A record that is already complete is never replaced: the write is
    /// dropped and `false` is returned.
    async fn store_result(&self, record: &OperationRecord) -> Result<bool, DatabaseError>;

    /// Write the terminal state of a record that is still running.
    ///
    /// Only updates an existing running row; a missing (evicted) or already
    /// complete record is left as it is and `false` is returned.
    async fn complete_result(&self, record: &OperationRecord) -> Result<bool, DatabaseError>;

    /// Get an operation record by id.
    async fn get_result(&self, log_id: &str) -> Result<Option<OperationRecord>, DatabaseError>;

    /// All operation records, most recently started first.
    async fn list_operations(&self) -> Result<Vec<OperationRecord>, DatabaseError>;

    /// Replace the `partial_result` of a running record.
    /// Returns `false` if the record is missing or already complete.
    async fn update_partial_result(
        &self,
        log_id: &str,
        partial: &Value,
    ) -> Result<bool, DatabaseError>;

    /// Delete operation records started before `older_than`, whatever their status.
    /// Returns the number of records deleted.
    async fn prune_operations(&self, older_than: DateTime<Utc>) -> Result<usize, DatabaseError>;

    // ── Named logs ──────────────────────────────────────────────────

    /// Append an entry to a log, creating the log on first append.
    /// Returns the new entry id.
    async fn store_log_entry(&self, log_name: &str, data: &Value) -> Result<String, DatabaseError>;

    /// The most recent `limit` entries of a log, oldest first.
    /// An unknown log yields an empty list.
    async fn get_logs_by_name(
        &self,
        log_name: &str,
        limit: usize,
    ) -> Result<Vec<LogEntry>, DatabaseError>;

    /// Get a single log entry by id.
    async fn get_log_entry(&self, entry_id: &str) -> Result<Option<LogEntry>, DatabaseError>;

    /// Delete a whole log. Returns the number of entries removed.
    async fn delete_log(&self, log_name: &str) -> Result<usize, DatabaseError>;

    /// All logs with their entry counts, by name.
    async fn list_logs(&self) -> Result<Vec<LogSummary>, DatabaseError>;
}
