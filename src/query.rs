//! Read path over the store: results by id, listings, named logs.

use std::sync::Arc;

use crate::error::Result;
use crate::logs::LogStore;
use crate::operation::Snapshot;
use crate::store::{LogEntry, Store};

/// Read-only facade for transports.
///
/// Always reports durable state. A running record reads as `running`, never
/// `timeout`; an unknown id reads as `not_found`.
#[derive(Clone)]
pub struct ResultQuery {
    store: Arc<dyn Store>,
    logs: LogStore,
}

impl ResultQuery {
    pub fn new(store: Arc<dyn Store>, default_log_limit: usize) -> Self {
        Self {
            logs: LogStore::new(Arc::clone(&store), default_log_limit),
            store,
        }
    }

    pub async fn get_result(&self, log_id: &str) -> Result<Snapshot> {
        Ok(match self.store.get_result(log_id).await? {
            Some(record) => Snapshot::from_record(&record),
            None => Snapshot::not_found(log_id),
        })
    }

    /// Every stored operation, most recently started first.
    pub async fn list_operations(&self) -> Result<Vec<Snapshot>> {
        let records = self.store.list_operations().await?;
        Ok(records.iter().map(Snapshot::from_record).collect())
    }

    pub async fn get_logs_by_name(&self, log_name: &str, limit: usize) -> Result<Vec<LogEntry>> {
        self.logs.get_by_name(log_name, limit).await
    }
}
