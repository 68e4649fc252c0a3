use crate::task::types::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Caller-supplied unit of work executed for every task
///
/// `execute` runs on a pool worker. Its return value is the single terminal
/// report: `Ok(())` completes the task, `Err` moves it to Error. Progress may be
/// reported any number of times before returning. When the task is cancelled or
/// the pool is paused the future is dropped at its next await point; long
/// synchronous sections should poll [`TaskContext::is_cancelled`].
#[async_trait::async_trait]
pub trait TaskWork<P: Payload>: Send + Sync {
    async fn execute(&self, task: Task<P>, ctx: TaskContext) -> Result<(), TaskError>;
}

/// Handle given to a work function for the duration of one attempt
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    is_retry: bool,
    cancellation: CancellationToken,
    progress_tx: mpsc::UnboundedSender<u8>,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: TaskId,
        is_retry: bool,
        cancellation: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<u8>) {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let ctx = Self {
            task_id,
            is_retry,
            cancellation,
            progress_tx,
        };
        (ctx, progress_rx)
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Whether this attempt resumes earlier work
    pub fn is_retry(&self) -> bool {
        self.is_retry
    }

    /// Report progress as a percentage; never blocks
    pub fn report_progress(&self, progress: u8) {
        if self.cancellation.is_cancelled() {
            return;
        }
        if self.progress_tx.send(progress).is_err() {
            debug!("Progress for task {} dropped, attempt is over", self.task_id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the attempt has been interrupted
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}
