//! Operation state machine.

use serde::{Deserialize, Serialize};

/// Durable status of an operation.
///
/// `RUNNING` is the only non-terminal state. The caller-facing `timeout`
/// value is not a status at all; see [`SnapshotStatus`](super::SnapshotStatus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Executor has not settled yet.
    Running,
    /// Executor resolved with a result.
    Success,
    /// Executor failed.
    Error,
    /// Executor stopped on request.
    Cancelled,
}

impl OperationStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: OperationStatus) -> bool {
        use OperationStatus::*;

        matches!(
            (self, target),
            (Running, Success) | (Running, Error) | (Running, Cancelled)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown operation status: {other}")),
        }
    }
}
