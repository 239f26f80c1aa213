//! Caller-facing view of an operation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::OperationRecord;
use super::state::OperationStatus;

/// Status reported to callers.
///
/// Superset of [`OperationStatus`]: `Timeout` is only ever handed back by the
/// `execute` call whose wait ran out, and `NotFound` answers lookups of
/// unknown ids. Neither is ever stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Running,
    Success,
    Error,
    Timeout,
    Cancelled,
    NotFound,
}

impl From<OperationStatus> for SnapshotStatus {
    fn from(status: OperationStatus) -> Self {
        match status {
            OperationStatus::Running => Self::Running,
            OperationStatus::Success => Self::Success,
            OperationStatus::Error => Self::Error,
            OperationStatus::Cancelled => Self::Cancelled,
        }
    }
}

/// Snapshot of an operation at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub status: SnapshotStatus,
    pub log_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub is_complete: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Reflect the durable record as-is.
    pub fn from_record(record: &OperationRecord) -> Self {
        Self {
            status: record.status.into(),
            log_id: record.log_id.clone(),
            result: record.result.clone(),
            partial_result: record.partial_result.clone(),
            error: record.error.clone(),
            is_complete: record.is_complete,
            message: record.message.clone(),
            start_time: Some(record.start_time),
            end_time: record.end_time,
        }
    }

    /// Answer for a caller whose wait expired while the work is still running.
    pub fn timeout(
        log_id: impl Into<String>,
        waited: Duration,
        partial_result: Option<Value>,
        start_time: DateTime<Utc>,
    ) -> Self {
        let log_id = log_id.into();
        Self {
            status: SnapshotStatus::Timeout,
            message: format!(
                "Operation still running after {}ms. Retrieve the result later with logId {log_id}.",
                waited.as_millis()
            ),
            log_id,
            result: None,
            partial_result,
            error: None,
            is_complete: false,
            start_time: Some(start_time),
            end_time: None,
        }
    }

    /// Answer for a lookup of an id the store has never seen (or has evicted).
    pub fn not_found(log_id: impl Into<String>) -> Self {
        let log_id = log_id.into();
        Self {
            status: SnapshotStatus::NotFound,
            message: format!("No operation found with logId {log_id}"),
            log_id,
            result: None,
            partial_result: None,
            error: None,
            is_complete: false,
            start_time: None,
            end_time: None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == SnapshotStatus::NotFound
    }
}
