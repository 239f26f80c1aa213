//! Task registry — live operations owned by this process, keyed by `log_id`.
//!
//! An entry exists from just before the running record is stored until the
//! background continuation has made its terminal write. It carries the
//! operation's cancellation token and a settlement channel that callers use
//! to join on the terminal write.

use std::collections::HashMap;

use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;

/// Progress of the terminal write for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Executor still running (or terminal write in flight).
    Pending,
    /// Terminal write done, skipped as a late write, or skipped because the record was evicted.
    Settled,
    /// The store failed while writing the terminal record.
    StorageFailed(String),
}

impl Settlement {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Handle to a tracked operation.
#[derive(Debug, Clone)]
pub struct TrackedOperation {
    pub cancel: CancellationToken,
    pub settled: watch::Receiver<Settlement>,
}

impl TrackedOperation {
    /// Wait until the terminal write has happened.
    ///
    /// A dropped sender means the continuation ended without reporting, which
    /// only happens if it panicked; the store is then the only source of truth.
    pub async fn wait_settled(mut self) -> Settlement {
        match self.settled.wait_for(|s| !s.is_pending()).await {
            Ok(settlement) => settlement.clone(),
            Err(_) => Settlement::Settled,
        }
    }
}

/// Live operations of this process.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TrackedOperation>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new operation. The returned sender reports its settlement.
    pub async fn register(
        &self,
        log_id: &str,
        cancel: CancellationToken,
    ) -> (watch::Sender<Settlement>, TrackedOperation) {
        let (tx, rx) = watch::channel(Settlement::Pending);
        let tracked = TrackedOperation {
            cancel,
            settled: rx,
        };
        self.tasks
            .write()
            .await
            .insert(log_id.to_string(), tracked.clone());
        (tx, tracked)
    }

    pub async fn get(&self, log_id: &str) -> Option<TrackedOperation> {
        self.tasks.read().await.get(log_id).cloned()
    }

    pub async fn remove(&self, log_id: &str) -> Option<TrackedOperation> {
        self.tasks.write().await.remove(log_id)
    }

    pub async fn contains(&self, log_id: &str) -> bool {
        self.tasks.read().await.contains_key(log_id)
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.tasks.read().await.keys().cloned().collect()
    }

    /// Snapshot of every tracked operation.
    pub async fn all(&self) -> Vec<(String, TrackedOperation)> {
        self.tasks
            .read()
            .await
            .iter()
            .map(|(id, op)| (id.clone(), op.clone()))
            .collect()
    }
}
