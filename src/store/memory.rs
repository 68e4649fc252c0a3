use crate::store::{Preferences, StoreError, TaskStore};
use crate::task::{Payload, Task, TaskId};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-memory task store
///
/// Not durable across processes, but it honours the store contract and can be
/// told to reject writes, which makes it the store of choice for tests and for
/// embedders that only need the scheduling behaviour.
#[derive(Debug)]
pub struct MemoryTaskStore<P> {
    records: Mutex<HashMap<TaskId, Task<P>>>,
    preferences: Mutex<Preferences>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl<P: Payload> MemoryTaskStore<P> {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            preferences: Mutex::new(Preferences::default()),
            fail_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    /// Create a store pre-populated with records, as if written by an earlier process
    pub fn with_tasks(tasks: Vec<Task<P>>) -> Self {
        let store = Self::new();
        {
            let mut records = store.lock_records();
            for task in tasks {
                records.insert(task.id.clone(), task);
            }
        }
        store
    }

    /// Make every following write fail with [`StoreError::WriteRejected`]
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes (upserts, removals and preference saves)
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Copy of a stored record
    pub fn record(&self, id: &str) -> Option<Task<P>> {
        self.lock_records().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_records().is_empty()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected(
                "memory store is rejecting writes".to_string(),
            ));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, Task<P>>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<P: Payload> Default for MemoryTaskStore<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<P: Payload> TaskStore<P> for MemoryTaskStore<P> {
    async fn load_all(&self) -> Result<Vec<Task<P>>, StoreError> {
        Ok(self.lock_records().values().cloned().collect())
    }

    async fn upsert(&self, task: &Task<P>) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock_records().insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock_records().remove(id);
        Ok(())
    }

    async fn remove_all(&self) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock_records().clear();
        Ok(())
    }

    async fn load_preferences(&self) -> Result<Preferences, StoreError> {
        let preferences = self
            .preferences
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(preferences.clone())
    }

    async fn save_preferences(&self, preferences: &Preferences) -> Result<(), StoreError> {
        self.check_writable()?;
        *self
            .preferences
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = preferences.clone();
        Ok(())
    }
}
