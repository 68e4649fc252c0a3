use crate::task::TaskId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Bounded set of live task executions, keyed by task id
///
/// The registry holds one entry per id from submission until the worker
/// releases it or the entry is cancelled. Concurrency is bounded by a
/// semaphore: every submission gets a worker immediately, but only `N` of them
/// hold a permit and run at once.
pub struct ExecutionPool {
    registry: Mutex<HashMap<TaskId, PoolEntry>>,
    permits: Arc<Semaphore>,
    max_active: usize,
    next_generation: AtomicU64,
}

struct PoolEntry {
    generation: u64,
    token: CancellationToken,
    started: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Everything a worker needs to know about its own submission
pub struct WorkerTicket {
    pub task_id: TaskId,
    pub generation: u64,
    pub token: CancellationToken,
    started: Arc<AtomicBool>,
    permits: Arc<Semaphore>,
}

impl WorkerTicket {
    /// Wait for a concurrency permit
    ///
    /// Returns `None` if the submission is cancelled first.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        let permit = tokio::select! {
            biased;
            _ = self.token.cancelled() => return None,
            permit = self.permits.clone().acquire_owned() => permit.ok()?,
        };
        self.started.store(true, Ordering::SeqCst);
        Some(permit)
    }
}

impl ExecutionPool {
    pub fn new(max_active: usize) -> Self {
        let max_active = max_active.max(1);
        Self {
            registry: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_active)),
            max_active,
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// Spawn a worker for `task_id` unless one is already registered
    ///
    /// The check and the insert happen under the registry lock, so two racing
    /// submissions for the same id produce exactly one worker.
    pub fn submit<F, Fut>(&self, task_id: &str, make_worker: F) -> bool
    where
        F: FnOnce(WorkerTicket) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut registry = self.lock();
        if registry.contains_key(task_id) {
            debug!("Task {} already in pool, skipping submission", task_id);
            return false;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        let started = Arc::new(AtomicBool::new(false));
        let ticket = WorkerTicket {
            task_id: task_id.to_string(),
            generation,
            token: token.clone(),
            started: started.clone(),
            permits: self.permits.clone(),
        };

        let handle = tokio::spawn(make_worker(ticket));
        registry.insert(
            task_id.to_string(),
            PoolEntry {
                generation,
                token,
                started,
                handle,
            },
        );
        debug!("Submitted task {} (generation {})", task_id, generation);
        true
    }

    /// Remove the entry for `task_id` if it still belongs to `generation`
    pub fn release(&self, task_id: &str, generation: u64) -> bool {
        let mut registry = self.lock();
        match registry.get(task_id) {
            Some(entry) if entry.generation == generation => {
                registry.remove(task_id);
                true
            }
            _ => false,
        }
    }

    /// Interrupt and unregister one execution
    pub fn cancel(&self, task_id: &str) -> bool {
        let entry = self.lock().remove(task_id);
        match entry {
            Some(entry) => {
                entry.token.cancel();
                debug!("Cancelled execution of task {}", task_id);
                true
            }
            None => false,
        }
    }

    /// Interrupt every execution and clear the registry, returning the drained ids
    pub fn cancel_all(&self) -> Vec<TaskId> {
        let mut registry = self.lock();
        let drained: Vec<TaskId> = registry
            .drain()
            .map(|(task_id, entry)| {
                entry.token.cancel();
                task_id
            })
            .collect();
        if !drained.is_empty() {
            debug!("Drained {} executions from pool", drained.len());
        }
        drained
    }

    /// Abort every worker without letting it record an outcome
    pub fn abort_all(&self) -> usize {
        let mut registry = self.lock();
        let count = registry.len();
        for (_, entry) in registry.drain() {
            entry.token.cancel();
            entry.handle.abort();
        }
        count
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.lock().contains_key(task_id)
    }

    /// Whether the id is registered but its worker still waits for a permit
    pub fn is_queued(&self, task_id: &str) -> bool {
        self.lock()
            .get(task_id)
            .is_some_and(|entry| !entry.started.load(Ordering::SeqCst))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, PoolEntry>> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
