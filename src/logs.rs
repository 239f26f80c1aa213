//! Named logs — caller-named, append-only entry sequences.
//!
//! Independent of operation records: a log is addressed by the name the
//! caller chose, created on first append and removed only by `delete`.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{LogError, Result};
use crate::store::{LogEntry, LogSummary, Store};

/// Longest accepted log name, in bytes.
pub const MAX_LOG_NAME_LEN: usize = 256;

/// Named-log facility over a [`Store`].
#[derive(Clone)]
pub struct LogStore {
    store: Arc<dyn Store>,
    default_limit: usize,
}

impl LogStore {
    pub fn new(store: Arc<dyn Store>, default_limit: usize) -> Self {
        Self {
            store,
            default_limit,
        }
    }

    /// Append `data` to `log_name`. Returns the new entry id.
    pub async fn append(&self, log_name: &str, data: &Value) -> Result<String> {
        validate_name(log_name)?;
        let id = self.store.store_log_entry(log_name, data).await?;
        debug!(log_name, entry_id = %id, "Log entry appended");
        Ok(id)
    }

    /// The most recent `limit` entries of a log, oldest first.
    ///
    /// `limit == 0` uses the configured default. An unknown log is empty.
    pub async fn get_by_name(&self, log_name: &str, limit: usize) -> Result<Vec<LogEntry>> {
        validate_name(log_name)?;
        let limit = if limit == 0 { self.default_limit } else { limit };
        Ok(self.store.get_logs_by_name(log_name, limit).await?)
    }

    pub async fn get_entry(&self, entry_id: &str) -> Result<Option<LogEntry>> {
        Ok(self.store.get_log_entry(entry_id).await?)
    }

    /// Delete a whole log. Returns how many entries went with it.
    pub async fn delete(&self, log_name: &str) -> Result<usize> {
        validate_name(log_name)?;
        let removed = self.store.delete_log(log_name).await?;
        if removed > 0 {
            info!(log_name, removed, "Log deleted");
        }
        Ok(removed)
    }

    pub async fn list_names(&self) -> Result<Vec<LogSummary>> {
        Ok(self.store.list_logs().await?)
    }
}

fn validate_name(log_name: &str) -> std::result::Result<(), LogError> {
    if log_name.trim().is_empty() {
        return Err(LogError::InvalidName("log name is empty".to_string()));
    }
    if log_name.len() > MAX_LOG_NAME_LEN {
        return Err(LogError::InvalidName(format!(
            "log name is {} bytes, max is {MAX_LOG_NAME_LEN}",
            log_name.len()
        )));
    }
    Ok(())
}
