//! Durable persistence of task records and the write-through cache in front of it.

pub mod cache;
pub mod file;
pub mod memory;


pub use cache::*;
pub use file::*;
pub use memory::*;

use crate::task::{Payload, Task};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Durable key-value persistence of task records
///
/// Every method must be complete (and durable) when it returns `Ok`. Removing
/// an id that is not stored is not an error.
#[async_trait::async_trait]
pub trait TaskStore<P: Payload>: Send + Sync {
    async fn load_all(&self) -> Result<Vec<Task<P>>, StoreError>;
    async fn upsert(&self, task: &Task<P>) -> Result<(), StoreError>;
    async fn remove(&self, id: &str) -> Result<(), StoreError>;
    async fn remove_all(&self) -> Result<(), StoreError>;
    async fn load_preferences(&self) -> Result<Preferences, StoreError>;
    async fn save_preferences(&self, preferences: &Preferences) -> Result<(), StoreError>;
}

/// Engine-wide settings that survive restarts
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Preferences {
    /// The pool was paused by the user and stays paused until resumed by the user
    pub paused: bool,
    /// Only run while the condition gate reports an unmetered link
    pub unmetered_only: bool,
}

/// Errors raised by task stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem operation failed
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend refused the write
    #[error("Write rejected: {0}")]
    WriteRejected(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
