//! Async execution engine.
//!
//! `execute` stores a running record, hands the executor to a background
//! continuation and waits for whichever comes first: the continuation's
//! terminal write, or the caller's timeout. On timeout the caller gets a
//! `timeout` snapshot while the continuation keeps going; the durable record
//! stays `running` until the executor settles.
//!
//! An executor that never settles leaves its record `running` until the
//! retention sweep evicts it. That is accepted, not a leak to fix here.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::executor::{Executor, ExecutorError, ProgressReporter};
use crate::engine::registry::{Settlement, TaskRegistry};
use crate::error::{DatabaseError, Error, OperationError, Result};
use crate::operation::{OperationRecord, Snapshot};
use crate::store::Store;

/// Extra wait on top of the cancel grace so the grace-expiry write can land.
const SETTLE_SLACK: Duration = Duration::from_millis(250);

/// How an executor's continuation ended.
enum Outcome {
    Finished(std::result::Result<Value, ExecutorError>),
    Panicked(JoinError),
    /// Cancellation was requested and the executor did not settle within the grace period.
    GraceExpired(Duration),
}

/// Runs executors and owns the background continuations that persist their outcomes.
pub struct Engine {
    store: Arc<dyn Store>,
    config: EngineConfig,
    registry: Arc<TaskRegistry>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            registry: Arc::new(TaskRegistry::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start an operation and wait up to `timeout` (or the configured default) for it.
    ///
    /// Executor failures and timeouts come back as snapshots; only storage
    /// failures are errors.
    pub async fn execute<E: Executor>(
        &self,
        executor: E,
        timeout: Option<Duration>,
    ) -> Result<Snapshot> {
        let wait = timeout.unwrap_or(self.config.default_timeout);
        let log_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();

        // Register before the record exists so a concurrent cancel never
        // mistakes a starting operation for an orphan.
        let (settled_tx, tracked) = self.registry.register(&log_id, cancel.clone()).await;

        let record = OperationRecord::running(&log_id);
        if let Err(e) = self.store.store_result(&record).await {
            self.registry.remove(&log_id).await;
            return Err(e.into());
        }
        info!(log_id = %log_id, timeout_ms = wait.as_millis() as u64, "Operation started");

        let (reporter, progress) = ProgressReporter::channel();
        spawn_progress_writer(Arc::clone(&self.store), log_id.clone(), progress.clone());

        let executor: Box<dyn Executor> = Box::new(executor);
        let work = tokio::spawn(executor.run(reporter, cancel.clone()));

        tokio::spawn(run_continuation(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            log_id.clone(),
            work,
            cancel,
            self.config.cancel_grace,
            progress.clone(),
            settled_tx,
        ));

        match tokio::time::timeout(wait, tracked.wait_settled()).await {
            Ok(settlement) => {
                settlement_result(settlement)?;
                self.snapshot(&log_id).await
            }
            Err(_) => {
                info!(log_id = %log_id, "Caller wait elapsed; operation continues in background");
                let partial = progress.borrow().clone();
                Ok(Snapshot::timeout(&log_id, wait, partial, record.start_time))
            }
        }
    }

    /// Request cooperative cancellation of an operation.
    ///
    /// A completed operation is returned unchanged. A live one is signalled and
    /// given the configured grace period to settle; the resulting durable state
    /// is returned. A running record with no live executor in this process is
    /// marked cancelled directly.
    pub async fn cancel(&self, log_id: &str) -> Result<Snapshot> {
        let Some(mut record) = self.store.get_result(log_id).await? else {
            return Ok(Snapshot::not_found(log_id));
        };
        if record.is_complete {
            debug!(log_id = %log_id, status = %record.status, "Cancel of completed operation ignored");
            return Ok(Snapshot::from_record(&record));
        }

        match self.registry.get(log_id).await {
            Some(tracked) => {
                info!(log_id = %log_id, "Cancellation requested");
                tracked.cancel.cancel();
                let wait = self.config.cancel_grace + SETTLE_SLACK;
                if let Ok(settlement) = tokio::time::timeout(wait, tracked.wait_settled()).await {
                    settlement_result(settlement)?;
                }
            }
            None => {
                record.cancel("Operation cancelled; it had no live executor in this process")?;
                if self.store.complete_result(&record).await? {
                    info!(log_id = %log_id, "Orphaned operation cancelled");
                }
            }
        }

        self.snapshot(log_id).await
    }

    /// Wait up to `wait` for an operation's terminal write, then return its durable state.
    pub async fn join(&self, log_id: &str, wait: Duration) -> Result<Snapshot> {
        if let Some(tracked) = self.registry.get(log_id).await {
            if let Ok(settlement) = tokio::time::timeout(wait, tracked.wait_settled()).await {
                settlement_result(settlement)?;
            }
        }
        self.snapshot(log_id).await
    }

    /// Mark every durable `running` record that this process is not executing as failed.
    ///
    /// Meant for startup against a durable store, where such records were left
    /// behind by a previous process.
    pub async fn reconcile_orphans(&self) -> Result<usize> {
        let mut reconciled = 0;
        for mut record in self.store.list_operations().await? {
            if record.is_complete || self.registry.contains(&record.log_id).await {
                continue;
            }
            record.fail("interrupted: process restarted before the operation settled")?;
            if self.store.complete_result(&record).await? {
                reconciled += 1;
            }
        }

        if reconciled > 0 {
            warn!(count = reconciled, "Reconciled orphaned operations");
        }
        Ok(reconciled)
    }

    /// Cancel every live operation and wait up to `wait` for their terminal writes.
    /// Returns how many were still unsettled when the wait ran out.
    pub async fn shutdown(&self, wait: Duration) -> usize {
        let tracked = self.registry.all().await;
        if tracked.is_empty() {
            return 0;
        }
        info!(count = tracked.len(), "Shutting down: cancelling live operations");

        for (_, op) in &tracked {
            op.cancel.cancel();
        }
        let all_settled = futures::future::join_all(tracked.into_iter().map(|(_, op)| op.wait_settled()));
        if tokio::time::timeout(wait, all_settled).await.is_err() {
            let left = self.registry.len().await;
            warn!(count = left, "Shutdown wait elapsed with operations still running");
            return left;
        }
        0
    }

    /// Number of operations this process is still executing.
    pub async fn running_count(&self) -> usize {
        self.registry.len().await
    }

    /// Ids of operations this process is still executing.
    pub async fn running_ids(&self) -> Vec<String> {
        self.registry.ids().await
    }

    async fn snapshot(&self, log_id: &str) -> Result<Snapshot> {
        Ok(match self.store.get_result(log_id).await? {
            Some(record) => Snapshot::from_record(&record),
            None => Snapshot::not_found(log_id),
        })
    }
}

fn settlement_result(settlement: Settlement) -> Result<()> {
    match settlement {
        Settlement::StorageFailed(reason) => Err(Error::Database(DatabaseError::Query(reason))),
        _ => Ok(()),
    }
}

/// Persist each reported partial result, in order, until the reporter is dropped
/// or the record stops accepting progress.
fn spawn_progress_writer(
    store: Arc<dyn Store>,
    log_id: String,
    mut progress: watch::Receiver<Option<Value>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let latest = progress.borrow_and_update().clone();
            let Some(partial) = latest else {
                continue;
            };
            match store.update_partial_result(&log_id, &partial).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => warn!(log_id = %log_id, error = %e, "Failed to persist partial result"),
            }
        }
    })
}

/// Await the executor (or the end of the cancel grace), make the single
/// terminal write, then release the operation from the registry.
#[allow(clippy::too_many_arguments)]
async fn run_continuation(
    store: Arc<dyn Store>,
    registry: Arc<TaskRegistry>,
    log_id: String,
    mut work: JoinHandle<std::result::Result<Value, ExecutorError>>,
    cancel: CancellationToken,
    grace: Duration,
    progress: watch::Receiver<Option<Value>>,
    settled_tx: watch::Sender<Settlement>,
) {
    let grace_expired = async {
        cancel.cancelled().await;
        tokio::time::sleep(grace).await;
    };

    let outcome = tokio::select! {
        joined = &mut work => match joined {
            Ok(result) => Outcome::Finished(result),
            Err(e) => Outcome::Panicked(e),
        },
        _ = grace_expired => Outcome::GraceExpired(grace),
    };
    let abandoned = matches!(outcome, Outcome::GraceExpired(_));

    let latest_partial = progress.borrow().clone();
    let settlement = match write_terminal(
        store.as_ref(),
        &log_id,
        outcome,
        cancel.is_cancelled(),
        latest_partial,
    )
    .await
    {
        Ok(()) => Settlement::Settled,
        Err(e) => {
            error!(log_id = %log_id, error = %e, "Failed to persist operation outcome");
            Settlement::StorageFailed(e.to_string())
        }
    };

    registry.remove(&log_id).await;
    settled_tx.send_replace(settlement);

    if abandoned {
        // The record already says cancelled; whatever the executor does now is ignored.
        match work.await {
            Ok(Ok(_)) => debug!(log_id = %log_id, "Executor finished after it was recorded cancelled"),
            Ok(Err(e)) => debug!(log_id = %log_id, error = %e, "Executor failed after it was recorded cancelled"),
            Err(e) => debug!(log_id = %log_id, error = %e, "Executor panicked after it was recorded cancelled"),
        }
    }
}

/// Apply the outcome to the stored record and write it once.
///
/// A failed cancel-requested run is recorded as cancelled, not as an error.
/// A record that is already terminal or has been evicted is left alone.
async fn write_terminal(
    store: &dyn Store,
    log_id: &str,
    outcome: Outcome,
    cancel_requested: bool,
    latest_partial: Option<Value>,
) -> std::result::Result<(), DatabaseError> {
    let Some(mut record) = store.get_result(log_id).await? else {
        warn!(log_id = %log_id, "Operation evicted before it settled; outcome dropped");
        return Ok(());
    };
    if latest_partial.is_some() {
        record.partial_result = latest_partial;
    }

    let transition: std::result::Result<(), OperationError> = match outcome {
        Outcome::Finished(Ok(value)) => record.succeed(value),
        Outcome::Finished(Err(ExecutorError::Cancelled)) => {
            record.cancel("Operation cancelled")
        }
        Outcome::Finished(Err(ExecutorError::Failed(message))) if cancel_requested => {
            record.cancel(format!("Operation cancelled: {message}"))
        }
        Outcome::Finished(Err(ExecutorError::Failed(message))) => record.fail(message),
        Outcome::Panicked(e) if cancel_requested => {
            record.cancel(format!("Operation cancelled: executor panicked: {e}"))
        }
        Outcome::Panicked(e) => record.fail(format!("executor panicked: {e}")),
        Outcome::GraceExpired(grace) => record.cancel(format!(
            "Operation cancelled; executor did not stop within {}ms",
            grace.as_millis()
        )),
    };

    if let Err(e) = transition {
        debug!(log_id = %log_id, error = %e, "Terminal write ignored");
        return Ok(());
    }

    if store.complete_result(&record).await? {
        info!(log_id = %log_id, status = %record.status, "Operation settled");
    } else {
        debug!(log_id = %log_id, "Operation already settled; late terminal write dropped");
    }
    Ok(())
}
