//! Executor capability — the work an operation runs.
//!
//! An executor receives a [`ProgressReporter`] and a [`CancellationToken`].
//! It may report any number of partial results and should return promptly
//! (usually with [`ExecutorError::Cancelled`]) once the token fires.
//! Cancellation is cooperative: nothing forces the executor to stop.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Failure returned by an executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// The work failed. The message is stored verbatim as the operation error.
    #[error("{0}")]
    Failed(String),

    /// The work observed the cancellation signal and stopped.
    #[error("cancelled")]
    Cancelled,
}

impl ExecutorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Fire-and-forget progress sink handed to an executor.
///
/// Each call replaces the operation's partial result. Reports are coalesced:
/// a burst of reports may persist only the latest one.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<Option<Value>>>,
}

impl ProgressReporter {
    /// Create a reporter and the receiver observing its latest report.
    pub fn channel() -> (Self, watch::Receiver<Option<Value>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Report a partial result.
    pub fn report(&self, partial: Value) {
        self.tx.send_replace(Some(partial));
    }
}

/// The work behind an operation.
///
/// Implemented for any `FnOnce(ProgressReporter, CancellationToken) -> Future`,
/// so closures and async blocks can be passed straight to the engine.
#[async_trait]
pub trait Executor: Send + 'static {
    async fn run(
        self: Box<Self>,
        reporter: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<Value, ExecutorError>;
}

#[async_trait]
impl<F, Fut> Executor for F
where
    F: FnOnce(ProgressReporter, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Value, ExecutorError>> + Send + 'static,
{
    async fn run(
        self: Box<Self>,
        reporter: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<Value, ExecutorError> {
        (*self)(reporter, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn closure_is_an_executor() {
        let exec = |reporter: ProgressReporter, _cancel: CancellationToken| async move {
            reporter.report(json!("half"));
            Ok::<_, ExecutorError>(json!("done"))
        };
        let (reporter, rx) = ProgressReporter::channel();
        let result = Box::new(exec).run(reporter, CancellationToken::new()).await;
        assert_eq!(result, Ok(json!("done")));
        assert_eq!(*rx.borrow(), Some(json!("half")));
    }

    #[test]
    fn reporter_keeps_latest() {
        let (reporter, rx) = ProgressReporter::channel();
        let clone = reporter.clone();
        reporter.report(json!(1));
        clone.report(json!(2));
        assert_eq!(*rx.borrow(), Some(json!(2)));
    }

    #[test]
    fn failed_message_is_verbatim() {
        assert_eq!(ExecutorError::failed("boom").to_string(), "boom");
    }
}
