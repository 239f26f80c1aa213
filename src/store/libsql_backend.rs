//! libSQL backend — durable `Store` implementation.
//!
//! Supports local file and in-memory databases. Operation and log rows are
//! written with single statements, so each write is atomic per key.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::operation::{OperationRecord, OperationStatus};
use crate::store::migrations;
use crate::store::traits::{LogEntry, LogSummary, Store};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format. Fixed width, so stored values compare as text.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert an optional JSON value to a nullable TEXT column.
fn opt_json(value: &Option<Value>) -> Result<libsql::Value, DatabaseError> {
    match value {
        Some(v) => Ok(libsql::Value::Text(serde_json::to_string(v)?)),
        None => Ok(libsql::Value::Null),
    }
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn parse_opt_json(s: Option<String>) -> Result<Option<Value>, DatabaseError> {
    s.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
}

fn query_err(op: &str) -> impl Fn(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Query(format!("{op}: {e}"))
}

/// Map a libsql Row to an OperationRecord.
///
/// Column order matches OPERATION_COLUMNS:
/// 0:log_id, 1:status, 2:result, 3:partial_result, 4:error, 5:message,
/// 6:is_complete, 7:start_time, 8:end_time
fn row_to_operation(row: &libsql::Row) -> Result<OperationRecord, DatabaseError> {
    let read = query_err("read operation row");
    let status_str: String = row.get(1).map_err(&read)?;
    let status: OperationStatus = status_str.parse().map_err(DatabaseError::Serialization)?;
    let start_str: String = row.get(7).map_err(&read)?;
    let end_str: Option<String> = row.get::<String>(8).ok();

    Ok(OperationRecord {
        log_id: row.get(0).map_err(&read)?,
        status,
        result: parse_opt_json(row.get::<String>(2).ok())?,
        partial_result: parse_opt_json(row.get::<String>(3).ok())?,
        error: row.get::<String>(4).ok(),
        message: row.get(5).map_err(&read)?,
        is_complete: row.get::<i64>(6).map_err(&read)? != 0,
        start_time: parse_datetime(&start_str),
        end_time: end_str.as_deref().map(parse_datetime),
    })
}

/// Map a libsql Row to a LogEntry.
///
/// Column order matches LOG_COLUMNS: 0:seq, 1:id, 2:log_name, 3:data, 4:timestamp
fn row_to_log_entry(row: &libsql::Row) -> Result<LogEntry, DatabaseError> {
    let read = query_err("read log row");
    let data_str: String = row.get(3).map_err(&read)?;
    let ts_str: String = row.get(4).map_err(&read)?;

    Ok(LogEntry {
        seq: row.get(0).map_err(&read)?,
        id: row.get(1).map_err(&read)?,
        log_name: row.get(2).map_err(&read)?,
        data: serde_json::from_str(&data_str)?,
        timestamp: parse_datetime(&ts_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const OPERATION_COLUMNS: &str =
    "log_id, status, result, partial_result, error, message, is_complete, start_time, end_time";

const LOG_COLUMNS: &str = "seq, id, log_name, data, timestamp";

#[async_trait]
impl Store for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Operations ──────────────────────────────────────────────────

    async fn store_result(&self, record: &OperationRecord) -> Result<bool, DatabaseError> {
        let conn = self.conn();

        // The conflict branch only fires while the stored row is still running.
        let changed = conn
            .execute(
                &format!(
                    "INSERT INTO operations ({OPERATION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT (log_id) DO UPDATE SET
                        status = excluded.status,
                        result = excluded.result,
                        partial_result = excluded.partial_result,
                        error = excluded.error,
                        message = excluded.message,
                        is_complete = excluded.is_complete,
                        start_time = excluded.start_time,
                        end_time = excluded.end_time
                     WHERE operations.is_complete = 0"
                ),
                params![
                    record.log_id.clone(),
                    record.status.as_str(),
                    opt_json(&record.result)?,
                    opt_json(&record.partial_result)?,
                    opt_text_owned(record.error.clone()),
                    record.message.clone(),
                    record.is_complete as i64,
                    format_datetime(&record.start_time),
                    opt_text_owned(record.end_time.as_ref().map(format_datetime)),
                ],
            )
            .await
            .map_err(query_err("store_result"))?;

        if changed == 0 {
            debug!(log_id = %record.log_id, "Write to completed operation dropped");
        }
        Ok(changed > 0)
    }

    async fn complete_result(&self, record: &OperationRecord) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE operations SET
                    status = ?2,
                    result = ?3,
                    partial_result = ?4,
                    error = ?5,
                    message = ?6,
                    is_complete = ?7,
                    end_time = ?8
                 WHERE log_id = ?1 AND is_complete = 0",
                params![
                    record.log_id.clone(),
                    record.status.as_str(),
                    opt_json(&record.result)?,
                    opt_json(&record.partial_result)?,
                    opt_text_owned(record.error.clone()),
                    record.message.clone(),
                    record.is_complete as i64,
                    opt_text_owned(record.end_time.as_ref().map(format_datetime)),
                ],
            )
            .await
            .map_err(query_err("complete_result"))?;

        if changed == 0 {
            debug!(log_id = %record.log_id, "Terminal write to completed or evicted operation dropped");
        }
        Ok(changed > 0)
    }

    async fn get_result(&self, log_id: &str) -> Result<Option<OperationRecord>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {OPERATION_COLUMNS} FROM operations WHERE log_id = ?1"),
                params![log_id],
            )
            .await
            .map_err(query_err("get_result"))?;

        match rows.next().await.map_err(query_err("get_result"))? {
            Some(row) => Ok(Some(row_to_operation(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_operations(&self) -> Result<Vec<OperationRecord>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {OPERATION_COLUMNS} FROM operations ORDER BY start_time DESC"),
                (),
            )
            .await
            .map_err(query_err("list_operations"))?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_operations"))? {
            match row_to_operation(&row) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping operation row: {e}"),
            }
        }
        Ok(records)
    }

    async fn update_partial_result(
        &self,
        log_id: &str,
        partial: &Value,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE operations SET partial_result = ?2 WHERE log_id = ?1 AND is_complete = 0",
                params![log_id, serde_json::to_string(partial)?],
            )
            .await
            .map_err(query_err("update_partial_result"))?;
        Ok(changed > 0)
    }

    async fn prune_operations(&self, older_than: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let conn = self.conn();
        let count = conn
            .execute(
                "DELETE FROM operations WHERE start_time < ?1",
                params![format_datetime(&older_than)],
            )
            .await
            .map_err(query_err("prune_operations"))?;

        if count > 0 {
            info!(count, "Pruned old operations from DB");
        }
        Ok(count as usize)
    }

    // ── Named logs ──────────────────────────────────────────────────

    async fn store_log_entry(&self, log_name: &str, data: &Value) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO logs (id, log_name, data, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![
                id.clone(),
                log_name,
                serde_json::to_string(data)?,
                format_datetime(&Utc::now()),
            ],
        )
        .await
        .map_err(query_err("store_log_entry"))?;

        debug!(id = %id, log_name = log_name, "Log entry appended");
        Ok(id)
    }

    async fn get_logs_by_name(
        &self,
        log_name: &str,
        limit: usize,
    ) -> Result<Vec<LogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM (
                        SELECT {LOG_COLUMNS} FROM logs WHERE log_name = ?1 ORDER BY seq DESC LIMIT ?2
                     ) ORDER BY seq ASC"
                ),
                params![log_name, limit as i64],
            )
            .await
            .map_err(query_err("get_logs_by_name"))?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("get_logs_by_name"))? {
            entries.push(row_to_log_entry(&row)?);
        }
        Ok(entries)
    }

    async fn get_log_entry(&self, entry_id: &str) -> Result<Option<LogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {LOG_COLUMNS} FROM logs WHERE id = ?1"),
                params![entry_id],
            )
            .await
            .map_err(query_err("get_log_entry"))?;

        match rows.next().await.map_err(query_err("get_log_entry"))? {
            Some(row) => Ok(Some(row_to_log_entry(&row)?)),
            None => Ok(None),
        }
    }

    async fn delete_log(&self, log_name: &str) -> Result<usize, DatabaseError> {
        let conn = self.conn();
        let count = conn
            .execute("DELETE FROM logs WHERE log_name = ?1", params![log_name])
            .await
            .map_err(query_err("delete_log"))?;

        if count > 0 {
            info!(count, log_name = log_name, "Deleted log");
        }
        Ok(count as usize)
    }

    async fn list_logs(&self) -> Result<Vec<LogSummary>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT log_name, COUNT(*), MAX(timestamp) FROM logs GROUP BY log_name ORDER BY log_name",
                (),
            )
            .await
            .map_err(query_err("list_logs"))?;

        let read = query_err("list_logs");
        let mut logs = Vec::new();
        while let Some(row) = rows.next().await.map_err(&read)? {
            let last: String = row.get(2).map_err(&read)?;
            logs.push(LogSummary {
                log_name: row.get(0).map_err(&read)?,
                entries: row.get::<i64>(1).map_err(&read)? as usize,
                last_append: parse_datetime(&last),
            });
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    // ── Operation tests ─────────────────────────────────────────────

    #[tokio::test]
    async fn store_and_get_by_id() {
        let db = test_db().await;
        let record = OperationRecord::running("op-1");
        assert!(db.store_result(&record).await.unwrap());

        let fetched = db.get_result("op-1").await.unwrap().unwrap();
        assert_eq!(fetched.log_id, "op-1");
        assert_eq!(fetched.status, OperationStatus::Running);
        assert!(!fetched.is_complete);
        assert!(fetched.end_time.is_none());
        assert!(fetched.result.is_none());
    }

    #[tokio::test]
    async fn get_by_id_not_found() {
        let db = test_db().await;
        assert!(db.get_result("does-not-exist").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminal_record_roundtrips_payloads() {
        let db = test_db().await;
        let mut record = OperationRecord::running("op-1");
        record.partial_result = Some(json!({"lines": ["a"]}));
        record.succeed(json!({"answer": 42})).unwrap();
        db.store_result(&record).await.unwrap();

        let fetched = db.get_result("op-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, OperationStatus::Success);
        assert!(fetched.is_complete);
        assert_eq!(fetched.result, Some(json!({"answer": 42})));
        assert_eq!(fetched.partial_result, Some(json!({"lines": ["a"]})));
        assert!(fetched.end_time.is_some());
    }

    #[tokio::test]
    async fn complete_result_only_updates_running_rows() {
        let db = test_db().await;
        let mut evicted = OperationRecord::running("gone");
        evicted.succeed(json!(1)).unwrap();
        assert!(!db.complete_result(&evicted).await.unwrap());
        assert!(db.get_result("gone").await.unwrap().is_none());

        let mut record = OperationRecord::running("op-1");
        db.store_result(&record).await.unwrap();
        record.fail("boom").unwrap();
        assert!(db.complete_result(&record).await.unwrap());

        let mut late = OperationRecord::running("op-1");
        late.succeed(json!(2)).unwrap();
        assert!(!db.complete_result(&late).await.unwrap());
        let stored = db.get_result("op-1").await.unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("boom"));
        assert!(stored.end_time.is_some());
    }

    #[tokio::test]
    async fn completed_record_is_never_replaced() {
        let db = test_db().await;
        let mut record = OperationRecord::running("op-1");
        db.store_result(&record).await.unwrap();
        record.fail("boom").unwrap();
        assert!(db.store_result(&record).await.unwrap());

        let mut late = OperationRecord::running("op-1");
        late.succeed(json!("late")).unwrap();
        assert!(!db.store_result(&late).await.unwrap());
        assert!(!db.store_result(&OperationRecord::running("op-1")).await.unwrap());

        let fetched = db.get_result("op-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, OperationStatus::Error);
        assert_eq!(fetched.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn partial_result_only_while_running() {
        let db = test_db().await;
        let mut record = OperationRecord::running("op-1");
        db.store_result(&record).await.unwrap();

        assert!(db.update_partial_result("op-1", &json!(1)).await.unwrap());
        let fetched = db.get_result("op-1").await.unwrap().unwrap();
        assert_eq!(fetched.partial_result, Some(json!(1)));

        record.cancel("stopped").unwrap();
        db.store_result(&record).await.unwrap();
        assert!(!db.update_partial_result("op-1", &json!(2)).await.unwrap());
    }

    #[tokio::test]
    async fn list_newest_first() {
        let db = test_db().await;
        let mut older = OperationRecord::running("old");
        older.start_time = Utc::now() - chrono::Duration::seconds(10);
        db.store_result(&older).await.unwrap();
        db.store_result(&OperationRecord::running("new")).await.unwrap();

        let ids: Vec<String> = db
            .list_operations()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.log_id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn prune_by_start_time() {
        let db = test_db().await;
        let mut stale = OperationRecord::running("stale");
        stale.start_time = Utc::now() - chrono::Duration::days(2);
        db.store_result(&stale).await.unwrap();
        db.store_result(&OperationRecord::running("fresh")).await.unwrap();

        let pruned = db
            .prune_operations(Utc::now() - chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(pruned, 1);
        assert!(db.get_result("stale").await.unwrap().is_none());
        assert!(db.get_result("fresh").await.unwrap().is_some());
    }

    // ── Log tests ───────────────────────────────────────────────────

    #[tokio::test]
    async fn log_entries_in_order_and_by_id() {
        let db = test_db().await;
        let a = db.store_log_entry("build", &json!({"step": 1})).await.unwrap();
        let b = db.store_log_entry("build", &json!({"step": 2})).await.unwrap();
        db.store_log_entry("deploy", &json!({"step": 9})).await.unwrap();

        let entries = db.get_logs_by_name("build", 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, a);
        assert_eq!(entries[1].id, b);
        assert_eq!(entries[0].data["step"], 1);

        let fetched = db.get_log_entry(&b).await.unwrap().unwrap();
        assert_eq!(fetched.data, json!({"step": 2}));
        assert_eq!(fetched.log_name, "build");
    }

    #[tokio::test]
    async fn log_limit_keeps_most_recent() {
        let db = test_db().await;
        for step in 1..=4 {
            db.store_log_entry("L", &json!(step)).await.unwrap();
        }
        let tail = db.get_logs_by_name("L", 2).await.unwrap();
        assert_eq!(tail.iter().map(|e| e.data.clone()).collect::<Vec<_>>(), vec![json!(3), json!(4)]);
    }

    #[tokio::test]
    async fn delete_and_list_logs() {
        let db = test_db().await;
        db.store_log_entry("a", &json!(1)).await.unwrap();
        db.store_log_entry("a", &json!(2)).await.unwrap();
        db.store_log_entry("b", &json!(3)).await.unwrap();

        let logs = db.list_logs().await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].log_name, "a");
        assert_eq!(logs[0].entries, 2);

        assert_eq!(db.delete_log("a").await.unwrap(), 2);
        assert!(db.get_logs_by_name("a", 10).await.unwrap().is_empty());
        assert_eq!(db.list_logs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_backed_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("ops.db");

        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            let mut record = OperationRecord::running("persisted");
            record.succeed(json!("kept")).unwrap();
            db.store_result(&record).await.unwrap();
            db.store_log_entry("L", &json!("entry")).await.unwrap();
        }

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let fetched = db.get_result("persisted").await.unwrap().unwrap();
        assert_eq!(fetched.result, Some(json!("kept")));
        assert_eq!(db.get_logs_by_name("L", 10).await.unwrap().len(), 1);
    }
}
