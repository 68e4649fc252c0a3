use crate::store::StoreError;

/// Errors returned to callers of the task engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The task id is empty
    #[error("Task id must not be empty")]
    InvalidTaskId,

    /// A task with the same id is already tracked
    #[error("Task {0} already exists")]
    DuplicateTask(String),

    /// The durable store rejected the change; nothing was committed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
