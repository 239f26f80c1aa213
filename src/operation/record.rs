//! The durable operation record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::OperationStatus;
use crate::error::OperationError;

/// A tracked unit of work as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    /// Opaque id assigned by the engine.
    pub log_id: String,
    /// Current status.
    pub status: OperationStatus,
    /// Final payload; only set on success.
    pub result: Option<Value>,
    /// Latest progress reported by the executor.
    pub partial_result: Option<Value>,
    /// Failure text; only set on error.
    pub error: Option<String>,
    /// Status narration.
    pub message: String,
    /// True iff `status` is terminal.
    pub is_complete: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl OperationRecord {
    /// Create a fresh running record.
    pub fn running(log_id: impl Into<String>) -> Self {
        Self {
            log_id: log_id.into(),
            status: OperationStatus::Running,
            result: None,
            partial_result: None,
            error: None,
            message: "Operation is running".to_string(),
            is_complete: false,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Record a successful result.
    pub fn succeed(&mut self, result: Value) -> Result<(), OperationError> {
        self.transition_to(OperationStatus::Success)?;
        self.result = Some(result);
        self.message = "Operation completed successfully".to_string();
        Ok(())
    }

    /// Record an executor failure.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), OperationError> {
        let error = error.into();
        self.transition_to(OperationStatus::Error)?;
        self.message = format!("Operation failed: {error}");
        self.error = Some(error);
        Ok(())
    }

    /// Record a cancellation.
    pub fn cancel(&mut self, message: impl Into<String>) -> Result<(), OperationError> {
        self.transition_to(OperationStatus::Cancelled)?;
        self.message = message.into();
        Ok(())
    }

    /// Move to a terminal state, stamping `end_time`.
    fn transition_to(&mut self, target: OperationStatus) -> Result<(), OperationError> {
        if !self.status.can_transition_to(target) {
            return Err(OperationError::InvalidTransition {
                id: self.log_id.clone(),
                state: self.status.to_string(),
                target: target.to_string(),
            });
        }

        self.status = target;
        self.is_complete = target.is_terminal();
        self.end_time = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_record_is_running() {
        let record = OperationRecord::running("op-1");
        assert_eq!(record.status, OperationStatus::Running);
        assert!(!record.is_complete);
        assert!(record.end_time.is_none());
    }

    #[test]
    fn succeed_sets_result_and_end_time() {
        let mut record = OperationRecord::running("op-1");
        record.succeed(json!(42)).unwrap();
        assert_eq!(record.status, OperationStatus::Success);
        assert_eq!(record.result, Some(json!(42)));
        assert!(record.is_complete);
        assert!(record.end_time.is_some());
        assert!(record.error.is_none());
    }

    #[test]
    fn fail_keeps_partial_result() {
        let mut record = OperationRecord::running("op-1");
        record.partial_result = Some(json!({"pct": 50}));
        record.fail("boom").unwrap();
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert!(record.result.is_none());
        assert_eq!(record.partial_result, Some(json!({"pct": 50})));
    }

    #[test]
    fn second_terminal_write_rejected() {
        let mut record = OperationRecord::running("op-1");
        record.succeed(json!("done")).unwrap();

        let err = record.fail("late").unwrap_err();
        assert!(err.to_string().contains("success"));
        assert_eq!(record.status, OperationStatus::Success);
        assert_eq!(record.result, Some(json!("done")));
        assert!(record.cancel("late").is_err());
    }

    #[test]
    fn serializes_camel_case() {
        let record = OperationRecord::running("op-1");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["logId"], "op-1");
        assert_eq!(json["isComplete"], false);
        assert_eq!(json["status"], "running");
    }
}
