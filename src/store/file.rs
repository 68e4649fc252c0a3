use crate::env;
use crate::store::{Preferences, StoreError, TaskStore};
use crate::task::{Payload, Task};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// File-backed task store with one JSON record per task
///
/// Layout under `<storage_root>/<engine_name>/`:
/// - `tasks/<hex id>.json`: one record per task
/// - `temp/`: staging area for atomic writes
/// - `preferences.json`: engine preferences
///
/// Every write is staged in `temp/`, synced and then renamed over the target,
/// so a crash leaves either the old or the new record on disk.
#[derive(Debug, Clone)]
pub struct FileTaskStore {
    tasks_dir: PathBuf,
    temp_dir: PathBuf,
    preferences_path: PathBuf,
}

impl FileTaskStore {
    /// Open (creating if needed) the store for one named engine
    pub fn new(storage_root: &Path, engine_name: &str) -> Result<Self, StoreError> {
        let tasks_dir = env::tasks_dir_path(storage_root, engine_name);
        let temp_dir = env::temp_dir_path(storage_root, engine_name);

        for dir in [&tasks_dir, &temp_dir] {
            std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }

        let store = Self {
            tasks_dir,
            temp_dir,
            preferences_path: env::preferences_file_path(storage_root, engine_name),
        };
        store.discard_stale_writes();

        debug!("Opened task store at {}", store.tasks_dir.display());
        Ok(store)
    }

    pub fn tasks_dir(&self) -> &Path {
        &self.tasks_dir
    }

    /// Path of the record file for a task id
    ///
    /// Ids are caller-supplied strings, so they are hex encoded to stay valid file names.
    pub fn record_path(&self, id: &str) -> PathBuf {
        let encoded: String = id.bytes().map(|b| format!("{:02x}", b)).collect();
        self.tasks_dir
            .join(format!("{}.{}", encoded, env::store::RECORD_EXTENSION))
    }

    /// Remove staging files left behind by an interrupted write
    fn discard_stale_writes(&self) {
        let Ok(entries) = std::fs::read_dir(&self.temp_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to remove stale write {}: {}", path.display(), e);
            } else {
                debug!("Removed stale write {}", path.display());
            }
        }
    }

    async fn write_json<T: Serialize + ?Sized>(
        &self,
        value: &T,
        target: &Path,
    ) -> Result<(), StoreError> {
        let serialized = serde_json::to_vec_pretty(value)?;
        let temp_file = self
            .temp_dir
            .join(format!("{}.tmp", uuid::Uuid::new_v4()));

        let result = self.write_and_rename(&serialized, &temp_file, target).await;
        if result.is_err() && async_fs::try_exists(&temp_file).await.unwrap_or(false) {
            let _ = async_fs::remove_file(&temp_file).await;
        }
        result
    }

    async fn write_and_rename(
        &self,
        data: &[u8],
        temp_file: &Path,
        target: &Path,
    ) -> Result<(), StoreError> {
        let mut file = async_fs::File::create(temp_file)
            .await
            .map_err(|e| StoreError::io(temp_file, e))?;
        file.write_all(data)
            .await
            .map_err(|e| StoreError::io(temp_file, e))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::io(temp_file, e))?;
        drop(file);

        async_fs::rename(temp_file, target)
            .await
            .map_err(|e| StoreError::io(target, e))
    }

    async fn record_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        let mut entries = async_fs::read_dir(&self.tasks_dir)
            .await
            .map_err(|e| StoreError::io(&self.tasks_dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.tasks_dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(env::store::RECORD_EXTENSION)
            {
                files.push(path);
            }
        }

        Ok(files)
    }
}

#[async_trait::async_trait]
impl<P: Payload> TaskStore<P> for FileTaskStore {
    async fn load_all(&self) -> Result<Vec<Task<P>>, StoreError> {
        let mut tasks = Vec::new();

        for path in self.record_files().await? {
            let content = match async_fs::read(&path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("Skipping unreadable task record {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_slice::<Task<P>>(&content) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!("Skipping corrupt task record {}: {}", path.display(), e),
            }
        }

        info!(
            "Loaded {} task records from {}",
            tasks.len(),
            self.tasks_dir.display()
        );
        Ok(tasks)
    }

    async fn upsert(&self, task: &Task<P>) -> Result<(), StoreError> {
        let target = self.record_path(&task.id);
        self.write_json(task, &target).await?;
        debug!("Persisted task {} ({})", task.id, task.state);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let path = self.record_path(id);
        match async_fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed task record {}", id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn remove_all(&self) -> Result<(), StoreError> {
        let files = self.record_files().await?;
        let count = files.len();

        for path in files {
            match async_fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }

        info!("Removed {} task records", count);
        Ok(())
    }

    async fn load_preferences(&self) -> Result<Preferences, StoreError> {
        match async_fs::read(&self.preferences_path).await {
            Ok(content) => Ok(serde_json::from_slice(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Preferences::default()),
            Err(e) => Err(StoreError::io(&self.preferences_path, e)),
        }
    }

    async fn save_preferences(&self, preferences: &Preferences) -> Result<(), StoreError> {
        self.write_json(preferences, &self.preferences_path).await?;
        debug!("Saved preferences: {:?}", preferences);
        Ok(())
    }
}
