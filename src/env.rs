//! Environment constants and path utilities for tollgate.
//!
//! This module centralizes the directory and file names used by the file-backed
//! store and the configuration discovery, so the on-disk layout is defined in one place.

use std::path::{Path, PathBuf};

/// Main application directory name (hidden directory like .git)
pub const TOLLGATE_DIR_NAME: &str = ".tollgate";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "tollgate.toml";

/// Default engine name, also the per-engine storage directory name
pub const DEFAULT_ENGINE_NAME: &str = "default";

/// Default number of tasks allowed to execute at the same time
pub const DEFAULT_MAX_ACTIVE_TASKS: usize = 3;

/// Store-related directory and file names
pub mod store {
    /// Directory holding one JSON record per task
    pub const TASKS_DIR_NAME: &str = "tasks";

    /// Directory used for in-progress atomic writes
    pub const TEMP_DIR_NAME: &str = "temp";

    /// Engine preference file name
    pub const PREFERENCES_FILE_NAME: &str = "preferences.json";

    /// Extension of task record files
    pub const RECORD_EXTENSION: &str = "json";
}

/// Build the main .tollgate directory path from a base directory
pub fn tollgate_dir_path(base: &Path) -> PathBuf {
    base.join(TOLLGATE_DIR_NAME)
}

/// Build the storage directory for one named engine
pub fn engine_dir_path(storage_root: &Path, engine_name: &str) -> PathBuf {
    storage_root.join(engine_name)
}

/// Build the task records directory for one named engine
pub fn tasks_dir_path(storage_root: &Path, engine_name: &str) -> PathBuf {
    engine_dir_path(storage_root, engine_name).join(store::TASKS_DIR_NAME)
}

/// Build the temp directory for one named engine
pub fn temp_dir_path(storage_root: &Path, engine_name: &str) -> PathBuf {
    engine_dir_path(storage_root, engine_name).join(store::TEMP_DIR_NAME)
}

/// Build the preferences file path for one named engine
pub fn preferences_file_path(storage_root: &Path, engine_name: &str) -> PathBuf {
    engine_dir_path(storage_root, engine_name).join(store::PREFERENCES_FILE_NAME)
}

/// Build the local config file path (./.tollgate/config.toml)
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    tollgate_dir_path(current_dir).join(CONFIG_FILE_NAME)
}

/// Build the user config directory path (~/.tollgate)
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    tollgate_dir_path(home_dir)
}

/// Build the user config file path (~/.tollgate/config.toml)
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Default storage root used when no configuration overrides it
pub fn default_storage_root() -> PathBuf {
    let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    tollgate_dir_path(&base).join("stores")
}
