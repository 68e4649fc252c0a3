use crate::env;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for a task engine
///
/// Every field has a documented default, so a partial TOML file only needs to
/// name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Unique engine name; also names the engine's directory under `storage_root`.
    /// Default: `"default"`
    pub name: String,
    /// Maximum number of tasks executing at once; excess tasks queue.
    /// Default: 3
    pub max_active_tasks: usize,
    /// Root directory of file-backed stores.
    /// Default: `./.tollgate/stores`
    pub storage_root: PathBuf,
    /// Start user-paused even if the persisted preference says otherwise.
    /// Default: false
    pub start_paused: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: env::DEFAULT_ENGINE_NAME.to_string(),
            max_active_tasks: env::DEFAULT_MAX_ACTIVE_TASKS,
            storage_root: env::default_storage_root(),
            start_paused: false,
        }
    }
}

impl EngineConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_active_tasks(mut self, max_active_tasks: usize) -> Self {
        self.max_active_tasks = max_active_tasks;
        self
    }

    pub fn with_storage_root(mut self, storage_root: impl Into<PathBuf>) -> Self {
        self.storage_root = storage_root.into();
        self
    }

    pub fn with_start_paused(mut self, start_paused: bool) -> Self {
        self.start_paused = start_paused;
        self
    }

    /// Concurrency actually used by the pool; a zero limit would never run anything
    pub fn effective_concurrency(&self) -> usize {
        self.max_active_tasks.max(1)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&content)?)
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}
