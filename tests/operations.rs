//! End-to-end tests for the operation engine and named logs.
//!
//! Every scenario runs against both the in-memory store and an on-disk
//! libSQL database.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::timeout;

use async_ops::{
    CancellationToken, Engine, EngineConfig, ExecutorError, LibSqlBackend, LogStore, MemoryStore,
    OperationRecord, OperationStatus, ProgressReporter, ResultQuery, ShellCommand, SnapshotStatus,
    Store,
};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

struct Harness {
    engine: Engine,
    query: ResultQuery,
    logs: LogStore,
    // Keeps the database file alive for the duration of the test.
    _dir: Option<tempfile::TempDir>,
}

fn config() -> EngineConfig {
    EngineConfig {
        cancel_grace: Duration::from_millis(300),
        ..Default::default()
    }
}

fn harness_with(store: Arc<dyn Store>, dir: Option<tempfile::TempDir>) -> Harness {
    Harness {
        query: ResultQuery::new(Arc::clone(&store), 100),
        logs: LogStore::new(Arc::clone(&store), 100),
        engine: Engine::new(store, config()),
        _dir: dir,
    }
}

async fn harnesses() -> Vec<Harness> {
    let dir = tempfile::tempdir().unwrap();
    let libsql = LibSqlBackend::new_local(&dir.path().join("ops.db"))
        .await
        .unwrap();
    vec![
        harness_with(Arc::new(MemoryStore::new()), None),
        harness_with(Arc::new(libsql), Some(dir)),
    ]
}

fn resolve_after(ms: u64, value: Value) -> impl async_ops::Executor {
    move |_reporter: ProgressReporter, _cancel: CancellationToken| async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok::<_, ExecutorError>(value)
    }
}

#[tokio::test]
async fn fast_path_matches_later_lookup() {
    timeout(TEST_TIMEOUT, async {
        for h in harnesses().await {
            let snap = h
                .engine
                .execute(resolve_after(10, json!(42)), Some(Duration::from_secs(1)))
                .await
                .unwrap();
            assert_eq!(snap.status, SnapshotStatus::Success);
            assert_eq!(snap.result, Some(json!(42)));
            assert!(snap.is_complete);

            assert_eq!(h.query.get_result(&snap.log_id).await.unwrap(), snap);
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn timeout_then_background_success() {
    timeout(TEST_TIMEOUT, async {
        for h in harnesses().await {
            let snap = h
                .engine
                .execute(resolve_after(400, json!("done")), Some(Duration::from_millis(100)))
                .await
                .unwrap();
            assert_eq!(snap.status, SnapshotStatus::Timeout);
            assert!(!snap.is_complete);

            let polled = h.query.get_result(&snap.log_id).await.unwrap();
            assert_eq!(polled.status, SnapshotStatus::Running);

            tokio::time::sleep(Duration::from_millis(500)).await;
            let settled = h.query.get_result(&snap.log_id).await.unwrap();
            assert_eq!(settled.status, SnapshotStatus::Success);
            assert_eq!(settled.result, Some(json!("done")));
            assert!(settled.is_complete);
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn executor_failure_is_error_snapshot() {
    timeout(TEST_TIMEOUT, async {
        for h in harnesses().await {
            let exec = |_r: ProgressReporter, _c: CancellationToken| async move {
                Err::<Value, _>(ExecutorError::failed("boom"))
            };
            let snap = h
                .engine
                .execute(exec, Some(Duration::from_secs(1)))
                .await
                .unwrap();
            assert_eq!(snap.status, SnapshotStatus::Error);
            assert_eq!(snap.error.as_deref(), Some("boom"));
            assert!(snap.is_complete);
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn cancel_running_shell_command() {
    timeout(TEST_TIMEOUT, async {
        for h in harnesses().await {
            let snap = h
                .engine
                .execute(ShellCommand::new("echo started; sleep 30"), Some(Duration::from_millis(100)))
                .await
                .unwrap();
            assert_eq!(snap.status, SnapshotStatus::Timeout);

            let cancelled = h.engine.cancel(&snap.log_id).await.unwrap();
            assert_eq!(cancelled.status, SnapshotStatus::Cancelled);
            assert!(cancelled.is_complete);

            let polled = h.query.get_result(&snap.log_id).await.unwrap();
            assert_eq!(polled.status, SnapshotStatus::Cancelled);
            assert_eq!(polled.partial_result, Some(json!("started")));

            // Cancelling again is a no-op.
            assert_eq!(h.engine.cancel(&snap.log_id).await.unwrap(), polled);
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn success_after_cancel_request_stays_success() {
    timeout(TEST_TIMEOUT, async {
        for h in harnesses().await {
            let snap = h
                .engine
                .execute(resolve_after(100, json!("finished anyway")), Some(Duration::from_millis(10)))
                .await
                .unwrap();

            let after = h.engine.cancel(&snap.log_id).await.unwrap();
            assert_eq!(after.status, SnapshotStatus::Success);
            assert_eq!(after.result, Some(json!("finished anyway")));
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    for h in harnesses().await {
        let snap = h.query.get_result("bad-id").await.unwrap();
        assert_eq!(snap.status, SnapshotStatus::NotFound);
    }
}

#[tokio::test]
async fn named_log_ordering() {
    for h in harnesses().await {
        let first = h.logs.append("build", &json!({"step": 1})).await.unwrap();
        let second = h.logs.append("build", &json!({"step": 2})).await.unwrap();

        let entries = h.query.get_logs_by_name("build", 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, first);
        assert_eq!(entries[0].data, json!({"step": 1}));
        assert_eq!(entries[1].id, second);
        assert_eq!(entries[1].data, json!({"step": 2}));

        // Same name in the operation namespace stays unrelated.
        assert!(h.query.get_result("build").await.unwrap().is_not_found());
    }
}

#[tokio::test]
async fn restart_reconciles_interrupted_operations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ops.db");

    {
        let store = LibSqlBackend::new_local(&path).await.unwrap();
        store
            .store_result(&OperationRecord::running("left-behind"))
            .await
            .unwrap();
    }

    let store: Arc<dyn Store> = Arc::new(LibSqlBackend::new_local(&path).await.unwrap());
    let engine = Engine::new(Arc::clone(&store), config());
    assert_eq!(engine.reconcile_orphans().await.unwrap(), 1);

    let record = store.get_result("left-behind").await.unwrap().unwrap();
    assert_eq!(record.status, OperationStatus::Error);
    assert!(record.is_complete);
    assert!(record.end_time.is_some());

    // Nothing left to reconcile the second time.
    assert_eq!(engine.reconcile_orphans().await.unwrap(), 0);
}
