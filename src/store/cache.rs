use crate::store::{StoreError, TaskStore};
use crate::task::{Payload, Task, TaskId};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Write-through in-memory mirror of a [`TaskStore`]
///
/// Reads are served from memory and never wait on a writer. Writers are
/// serialized by a single gate held across the durable write and the map
/// update, so a mutation becomes visible only after the store accepted it and
/// readers always observe a whole record, either before or after the change.
pub struct TaskCache<P: Payload> {
    store: Arc<dyn TaskStore<P>>,
    tasks: DashMap<TaskId, Task<P>>,
    write_gate: Mutex<()>,
}

/// Result of a conditional update
#[derive(Debug, Clone)]
pub enum CacheUpdate<P> {
    /// No task with that id is cached; nothing was written
    Missing,
    /// The closure left the task as it was; nothing was written
    Unchanged(Task<P>),
    /// The change was persisted and published
    Updated(Task<P>),
}

impl<P: Payload> TaskCache<P> {
    /// Load every persisted record into memory
    ///
    /// This is the startup barrier: the engine makes no dispatch decision before it returns.
    pub async fn load(store: Arc<dyn TaskStore<P>>) -> Result<Self, StoreError> {
        let records = store.load_all().await?;
        let tasks = DashMap::with_capacity(records.len());
        for task in records {
            tasks.insert(task.id.clone(), task);
        }

        info!("Task cache loaded with {} tasks", tasks.len());
        Ok(Self {
            store,
            tasks,
            write_gate: Mutex::new(()),
        })
    }

    pub fn get(&self, id: &str) -> Option<Task<P>> {
        self.tasks.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Snapshot of every cached task keyed by id
    pub fn get_all(&self) -> HashMap<TaskId, Task<P>> {
        self.tasks
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Tasks that still need a worker, oldest first
    pub fn tasks_to_run(&self) -> Vec<Task<P>> {
        let mut tasks: Vec<Task<P>> = self
            .tasks
            .iter()
            .filter(|entry| entry.value().should_run())
            .map(|entry| entry.value().clone())
            .collect();
        sort_by_date(&mut tasks);
        tasks
    }

    /// Every cached task ordered by creation time
    pub fn date_ordered(&self) -> Vec<Task<P>> {
        let mut tasks: Vec<Task<P>> = self
            .tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sort_by_date(&mut tasks);
        tasks
    }

    /// Persist and publish a new task
    ///
    /// Returns `Ok(false)` without writing when the id is already cached.
    pub async fn insert(&self, task: Task<P>) -> Result<bool, StoreError> {
        let _gate = self.write_gate.lock().await;
        if self.tasks.contains_key(&task.id) {
            return Ok(false);
        }

        self.store.upsert(&task).await?;
        debug!("Inserted task {}", task.id);
        self.tasks.insert(task.id.clone(), task);
        Ok(true)
    }

    /// Persist and publish the full record, inserting it if absent
    pub async fn upsert(&self, task: Task<P>) -> Result<(), StoreError> {
        let _gate = self.write_gate.lock().await;
        self.store.upsert(&task).await?;
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Apply a change to an existing task only
    ///
    /// `change` returns whether it modified the task. A task that is not cached is
    /// never recreated, so a late write from a worker cannot revive a removed task.
    pub async fn update<F>(&self, id: &str, change: F) -> Result<CacheUpdate<P>, StoreError>
    where
        F: FnOnce(&mut Task<P>) -> bool + Send,
    {
        let _gate = self.write_gate.lock().await;
        let Some(mut task) = self.get(id) else {
            return Ok(CacheUpdate::Missing);
        };

        if !change(&mut task) {
            return Ok(CacheUpdate::Unchanged(task));
        }

        self.store.upsert(&task).await?;
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(CacheUpdate::Updated(task))
    }

    /// Delete a task from the store and from memory; absent ids are a no-op
    pub async fn remove(&self, id: &str) -> Result<Option<Task<P>>, StoreError> {
        let _gate = self.write_gate.lock().await;
        self.store.remove(id).await?;
        Ok(self.tasks.remove(id).map(|(_, task)| task))
    }

    /// Delete every task, returning how many were cached
    pub async fn remove_all(&self) -> Result<usize, StoreError> {
        let _gate = self.write_gate.lock().await;
        self.store.remove_all().await?;
        let count = self.tasks.len();
        self.tasks.clear();
        Ok(count)
    }
}

fn sort_by_date<P>(tasks: &mut [Task<P>]) {
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
