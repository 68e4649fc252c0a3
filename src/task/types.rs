use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for tasks
pub type TaskId = String;

/// Bounds required of a task payload so it can be persisted and shared across workers
pub trait Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// A unit of caller-defined work tracked through the task lifecycle
///
/// The payload `P` carries the caller's business data (a file to upload, a
/// transcode profile, ...). Everything except `is_retry` is persisted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Task<P> {
    pub id: TaskId,
    pub state: TaskState,
    pub progress: u8,
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub attempts: u32,
    /// Set when the current attempt resumes earlier work rather than starting fresh
    #[serde(skip)]
    pub is_retry: bool,
    pub payload: P,
}

/// Lifecycle state of a task
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Eligible to run, either new or returned here after a reload or pause
    Ready,
    /// Assigned to a worker and executing
    Running,
    /// Suspended by a pool-wide pause; never written to the store
    Paused,
    /// Finished successfully, never dispatched again
    Completed,
    /// Failed, waits for an explicit retry
    Error,
    /// Cancelled by the caller; the record is deleted rather than stored in this state
    Cancelled,
}

/// Identifies one execution attempt of one task record
///
/// A record re-added under the same id gets a new creation time, and every
/// dispatch bumps `attempts`, so a worker can tell whether the record it
/// started is still the one in the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attempt {
    created_at: DateTime<Utc>,
    number: u32,
}

/// Structured failure reported by a work function
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct TaskError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl<P> Task<P> {
    /// Create a task with a caller-supplied identifier
    pub fn new(id: impl Into<TaskId>, payload: P) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            state: TaskState::Ready,
            progress: 0,
            error: None,
            created_at: now,
            updated_at: now,
            attempts: 0,
            is_retry: false,
            payload,
        }
    }

    /// Create a task with a generated UUID identifier
    pub fn with_generated_id(payload: P) -> Self {
        Self::new(Uuid::new_v4().to_string(), payload)
    }

    pub fn is_ready(&self) -> bool {
        self.state == TaskState::Ready
    }

    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }

    pub fn is_complete(&self) -> bool {
        self.state == TaskState::Completed
    }

    pub fn is_error(&self) -> bool {
        self.state == TaskState::Error
    }

    /// Check if the task still needs a worker.
    ///
    /// A `Running` record counts because a record can only be Running without a
    /// live worker after a crash or an interrupted pause; the engine decides on
    /// registry membership separately.
    pub fn should_run(&self) -> bool {
        matches!(self.state, TaskState::Ready | TaskState::Running)
    }

    /// Move a freshly dispatched task into Running
    pub fn mark_running(&mut self) {
        self.state = TaskState::Running;
        self.error = None;
        self.attempts += 1;
        self.touch();
    }

    /// The attempt this record is currently on
    pub fn attempt(&self) -> Attempt {
        Attempt {
            created_at: self.created_at,
            number: self.attempts,
        }
    }

    /// Whether this record is Running the given attempt
    pub fn is_running_attempt(&self, attempt: Attempt) -> bool {
        self.is_running() && self.attempt() == attempt
    }

    /// Record progress; values above 100 are clamped and decreases are ignored
    ///
    /// Returns whether the stored progress changed.
    pub fn record_progress(&mut self, progress: u8) -> bool {
        let progress = progress.min(100);
        if self.state != TaskState::Running || progress <= self.progress {
            return false;
        }
        self.progress = progress;
        self.touch();
        true
    }

    pub fn mark_completed(&mut self) {
        self.state = TaskState::Completed;
        self.progress = 100;
        self.error = None;
        self.touch();
    }

    pub fn mark_failed(&mut self, error: TaskError) {
        self.state = TaskState::Error;
        self.error = Some(error);
        self.touch();
    }

    /// Move an errored task back to Ready for another attempt
    pub fn prepare_retry(&mut self) {
        self.state = TaskState::Ready;
        self.error = None;
        self.is_retry = true;
        self.touch();
    }

    /// Return an orphaned Running record to Ready
    ///
    /// Returns whether anything changed.
    pub fn reset_to_ready(&mut self) -> bool {
        if self.state != TaskState::Running {
            return false;
        }
        self.state = TaskState::Ready;
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl TaskError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Mark the failure as one a retry will not fix
    pub fn permanent(mut self) -> Self {
        self.retryable = false;
        self
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Paused => "paused",
            TaskState::Completed => "completed",
            TaskState::Error => "error",
            TaskState::Cancelled => "cancelled",
        };
        f.pad(name)
    }
}
