//! # Tollgate
//!
//! A persistent, concurrency-bounded task queue. Tasks survive process
//! restarts, run on a bounded pool of workers, and can be paused and resumed
//! as a whole, either by the user or by an external run condition such as
//! network availability.
//!
//! ## Architecture Overview
//!
//! - **[`task`]**: The task record, its lifecycle state machine and the work function contract
//! - **[`store`]**: Durable task stores and the write-through cache in front of them
//! - **[`engine`]**: The execution pool, dispatch policy, condition gating and lifecycle events
//! - **[`cli`]**: Argument parsing, configuration discovery and the demonstration binary
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tollgate::{
//!     EngineConfig, FileTaskStore, LoggingEventSink, Task, TaskContext, TaskEngine, TaskError,
//!     TaskWork,
//! };
//!
//! struct Upload;
//!
//! #[async_trait::async_trait]
//! impl TaskWork<String> for Upload {
//!     async fn execute(&self, task: Task<String>, ctx: TaskContext) -> Result<(), TaskError> {
//!         println!("uploading {}", task.payload);
//!         ctx.report_progress(100);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EngineConfig::new("uploads");
//!     let store = Arc::new(FileTaskStore::new(&config.storage_root, &config.name)?);
//!
//!     let engine = TaskEngine::<String>::builder(config, store, Arc::new(Upload))
//!         .with_event_sink(Arc::new(LoggingEventSink))
//!         .start()
//!         .await?;
//!
//!     engine.add_task(Task::new("holiday.mp4", "/videos/holiday.mp4".to_string())).await?;
//!     Ok(())
//! }
//! ```

/// Task records and the lifecycle state machine.
pub mod task;

/// Task persistence.
///
/// The [`store::TaskStore`] trait with file-backed and in-memory
/// implementations, and the write-through [`store::TaskCache`].
pub mod store;

/// Task execution engine.
///
/// Bounded execution pool, pause/resume policy, condition gating and
/// lifecycle events.
pub mod engine;

/// Environment constants and path utilities.
///
/// Centralizes the directory and file names used on disk.
pub mod env;

// CLI module for the tollgate binary
pub mod cli;

// Re-export main task types
pub use task::{Attempt, Payload, Task, TaskContext, TaskError, TaskId, TaskState, TaskWork};

// Re-export store types
pub use store::{FileTaskStore, MemoryTaskStore, Preferences, StoreError, TaskCache, TaskStore};

// Re-export engine types
pub use engine::{
    AlwaysSatisfied, ChannelEventSink, ConditionGate, EngineConfig, EngineError, EngineEvent,
    EventSink, LoggingEventSink, ManualGate, SuspendReason, TaskEngine, TaskEngineBuilder,
};
