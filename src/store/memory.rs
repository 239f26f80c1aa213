//! In-memory store — volatile `Store` implementation for tests and short-lived processes.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::operation::OperationRecord;
use crate::store::traits::{LogEntry, LogSummary, Store};

/// Map-backed store. Each collection sits behind its own lock, so every
/// write is atomic with respect to readers.
pub struct MemoryStore {
    operations: RwLock<HashMap<String, OperationRecord>>,
    logs: RwLock<BTreeMap<String, Vec<LogEntry>>>,
    next_seq: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            logs: RwLock::new(BTreeMap::new()),
            next_seq: AtomicI64::new(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    // ── Operations ──────────────────────────────────────────────────

    async fn store_result(&self, record: &OperationRecord) -> Result<bool, DatabaseError> {
        let mut operations = self.operations.write().await;

        if let Some(existing) = operations.get(&record.log_id) {
            if existing.is_complete {
                debug!(log_id = %record.log_id, status = %existing.status, "Write to completed operation dropped");
                return Ok(false);
            }
        }

        operations.insert(record.log_id.clone(), record.clone());
        Ok(true)
    }

    async fn complete_result(&self, record: &OperationRecord) -> Result<bool, DatabaseError> {
        let mut operations = self.operations.write().await;
        match operations.get_mut(&record.log_id) {
            Some(existing) if !existing.is_complete => {
                *existing = record.clone();
                Ok(true)
            }
            Some(_) => {
                debug!(log_id = %record.log_id, "Terminal write to completed operation dropped");
                Ok(false)
            }
            None => {
                debug!(log_id = %record.log_id, "Terminal write to evicted operation dropped");
                Ok(false)
            }
        }
    }

    async fn get_result(&self, log_id: &str) -> Result<Option<OperationRecord>, DatabaseError> {
        Ok(self.operations.read().await.get(log_id).cloned())
    }

    async fn list_operations(&self) -> Result<Vec<OperationRecord>, DatabaseError> {
        let mut records: Vec<OperationRecord> =
            self.operations.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(records)
    }

    async fn update_partial_result(
        &self,
        log_id: &str,
        partial: &Value,
    ) -> Result<bool, DatabaseError> {
        let mut operations = self.operations.write().await;
        match operations.get_mut(log_id) {
            Some(record) if !record.is_complete => {
                record.partial_result = Some(partial.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn prune_operations(&self, older_than: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let mut operations = self.operations.write().await;
        let before = operations.len();
        operations.retain(|_, record| record.start_time >= older_than);
        let count = before - operations.len();

        if count > 0 {
            info!(count, "Pruned old operations from memory");
        }
        Ok(count)
    }

    // ── Named logs ──────────────────────────────────────────────────

    async fn store_log_entry(&self, log_name: &str, data: &Value) -> Result<String, DatabaseError> {
        let mut logs = self.logs.write().await;
        // Taken under the lock so seq order matches append order.
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = Uuid::new_v4().to_string();
        logs.entry(log_name.to_string()).or_default().push(LogEntry {
            id: id.clone(),
            log_name: log_name.to_string(),
            seq,
            data: data.clone(),
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    async fn get_logs_by_name(
        &self,
        log_name: &str,
        limit: usize,
    ) -> Result<Vec<LogEntry>, DatabaseError> {
        let logs = self.logs.read().await;
        Ok(logs
            .get(log_name)
            .map(|entries| {
                let skip = entries.len().saturating_sub(limit);
                entries[skip..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn get_log_entry(&self, entry_id: &str) -> Result<Option<LogEntry>, DatabaseError> {
        let logs = self.logs.read().await;
        Ok(logs
            .values()
            .flat_map(|entries| entries.iter())
            .find(|e| e.id == entry_id)
            .cloned())
    }

    async fn delete_log(&self, log_name: &str) -> Result<usize, DatabaseError> {
        Ok(self
            .logs
            .write()
            .await
            .remove(log_name)
            .map(|entries| entries.len())
            .unwrap_or(0))
    }

    async fn list_logs(&self) -> Result<Vec<LogSummary>, DatabaseError> {
        let logs = self.logs.read().await;
        Ok(logs
            .iter()
            .filter_map(|(name, entries)| {
                entries.last().map(|last| LogSummary {
                    log_name: name.clone(),
                    entries: entries.len(),
                    last_append: last.timestamp,
                })
            })
            .collect())
    }
}
