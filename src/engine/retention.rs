//! Retention sweep — evicts operation records by age.
//!
//! Eviction ignores status, which is how records of executors that never
//! settle eventually go away. Named logs are never swept.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::DatabaseError;
use crate::store::Store;

/// Delete records started more than `retention` ago. Returns the number deleted.
pub async fn sweep_once(store: &dyn Store, retention: Duration) -> Result<usize, DatabaseError> {
    let cutoff = cutoff(Utc::now(), retention);
    store.prune_operations(cutoff).await
}

fn cutoff(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Spawn a background task that periodically evicts old operation records.
pub fn spawn_retention_sweep(
    store: Arc<dyn Store>,
    retention: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match sweep_once(store.as_ref(), retention).await {
                Ok(0) => {}
                Ok(count) => info!(count, "Retention sweep evicted operations"),
                Err(e) => warn!(error = %e, "Retention sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationRecord;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn sweep_evicts_old_records_of_any_status() {
        let store = MemoryStore::new();

        let mut stuck = OperationRecord::running("stuck");
        stuck.start_time = Utc::now() - chrono::Duration::hours(48);
        store.store_result(&stuck).await.unwrap();

        let mut done = OperationRecord::running("done-long-ago");
        done.start_time = Utc::now() - chrono::Duration::hours(48);
        done.succeed(serde_json::json!(1)).unwrap();
        store.store_result(&done).await.unwrap();

        store.store_result(&OperationRecord::running("fresh")).await.unwrap();

        let evicted = sweep_once(&store, Duration::from_secs(86_400)).await.unwrap();
        assert_eq!(evicted, 2);
        assert!(store.get_result("fresh").await.unwrap().is_some());
    }

    #[test]
    fn huge_retention_does_not_overflow() {
        let cut = cutoff(Utc::now(), Duration::from_secs(u64::MAX));
        assert_eq!(cut, DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_task_runs_on_interval() {
        let store = Arc::new(MemoryStore::new());
        let mut old = OperationRecord::running("old");
        old.start_time = Utc::now() - chrono::Duration::hours(2);
        store.store_result(&old).await.unwrap();

        let handle = spawn_retention_sweep(
            store.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        );
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert!(store.get_result("old").await.unwrap().is_none());
        handle.abort();
    }
}
