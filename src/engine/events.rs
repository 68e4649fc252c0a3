use crate::task::{TaskError, TaskId};
use anyhow::Result;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lifecycle events emitted by the engine
///
/// Events for one task are emitted in order from the context that caused them;
/// there is no ordering guarantee across different tasks.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    TaskAdded { task_id: TaskId },
    TaskStarted { task_id: TaskId, is_retry: bool },
    TaskProgress { task_id: TaskId, progress: u8 },
    TaskSucceeded { task_id: TaskId },
    TaskFailed { task_id: TaskId, error: TaskError },
    TaskCancelled { task_id: TaskId },
    TaskRetrying { task_id: TaskId },
    /// The user paused the pool
    PoolPaused,
    /// The user resumed the pool
    PoolResumed,
    ConditionsLost,
    ConditionsRegained,
    /// Work could not be dispatched right now; pending tasks stay Ready
    Suspended { reason: SuspendReason },
    /// Nothing is left to run and nothing is in flight
    Idle { completed: bool },
}

/// Why the pool refused to dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    UserPaused,
    ConditionsUnmet,
}

/// Receiver of engine events
///
/// Called synchronously from the emitting context (often a pool worker), so
/// implementations should hand work off rather than block. Errors are logged
/// and otherwise ignored.
pub trait EventSink: Send + Sync {
    fn handle_event(&self, event: &EngineEvent) -> Result<()>;
}

impl EngineEvent {
    pub fn task_id(&self) -> Option<&str> {
        match self {
            EngineEvent::TaskAdded { task_id }
            | EngineEvent::TaskStarted { task_id, .. }
            | EngineEvent::TaskProgress { task_id, .. }
            | EngineEvent::TaskSucceeded { task_id }
            | EngineEvent::TaskFailed { task_id, .. }
            | EngineEvent::TaskCancelled { task_id }
            | EngineEvent::TaskRetrying { task_id } => Some(task_id),
            _ => None,
        }
    }
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuspendReason::UserPaused => f.write_str("paused by user"),
            SuspendReason::ConditionsUnmet => f.write_str("conditions not met"),
        }
    }
}

/// Simple event sink that logs events
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn handle_event(&self, event: &EngineEvent) -> Result<()> {
        match event {
            EngineEvent::TaskAdded { task_id } => info!("Task added: {}", task_id),
            EngineEvent::TaskStarted { task_id, is_retry } => {
                info!("Task started: {} (retry: {})", task_id, is_retry)
            }
            EngineEvent::TaskProgress { task_id, progress } => {
                debug!("Task {} progress: {}%", task_id, progress)
            }
            EngineEvent::TaskSucceeded { task_id } => info!("Task succeeded: {}", task_id),
            EngineEvent::TaskFailed { task_id, error } => {
                warn!("Task failed: {} - {}", task_id, error)
            }
            EngineEvent::TaskCancelled { task_id } => info!("Task cancelled: {}", task_id),
            EngineEvent::TaskRetrying { task_id } => info!("Task retrying: {}", task_id),
            EngineEvent::PoolPaused => info!("All tasks paused"),
            EngineEvent::PoolResumed => info!("All tasks resumed"),
            EngineEvent::ConditionsLost => warn!("Run conditions lost"),
            EngineEvent::ConditionsRegained => info!("Run conditions regained"),
            EngineEvent::Suspended { reason } => debug!("Dispatch suspended: {}", reason),
            EngineEvent::Idle { completed } => {
                info!("Engine idle (all tasks finished: {})", completed)
            }
        }
        Ok(())
    }
}

/// Event sink that forwards every event into an unbounded channel
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn handle_event(&self, event: &EngineEvent) -> Result<()> {
        self.sender
            .send(event.clone())
            .map_err(|_| anyhow::anyhow!("event receiver dropped"))
    }
}
