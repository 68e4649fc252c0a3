use crate::engine::condition::*;
use crate::engine::config::EngineConfig;
use crate::engine::error::EngineError;
use crate::engine::events::*;
use crate::engine::pool::*;
use crate::store::{CacheUpdate, Preferences, TaskCache, TaskStore};
use crate::task::*;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Persistent, concurrency-bounded task queue
///
/// Cloning is cheap; every clone drives the same engine. Tasks are persisted
/// through the configured [`TaskStore`] before any change becomes visible,
/// executed by the shared [`TaskWork`] on a bounded pool, and suspended as a
/// whole when the user pauses the engine or the [`ConditionGate`] reports
/// that work cannot proceed.
pub struct TaskEngine<P: Payload> {
    inner: Arc<EngineInner<P>>,
}

impl<P: Payload> Clone for TaskEngine<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Builder for [`TaskEngine`]
pub struct TaskEngineBuilder<P: Payload> {
    config: EngineConfig,
    store: Arc<dyn TaskStore<P>>,
    work: Arc<dyn TaskWork<P>>,
    gate: Arc<dyn ConditionGate>,
    sinks: Vec<Arc<dyn EventSink>>,
}

struct EngineInner<P: Payload> {
    config: EngineConfig,
    store: Arc<dyn TaskStore<P>>,
    cache: TaskCache<P>,
    pool: ExecutionPool,
    work: Arc<dyn TaskWork<P>>,
    gate: Arc<dyn ConditionGate>,
    sinks: Vec<Arc<dyn EventSink>>,
    user_paused: AtomicBool,
    unmetered_only: AtomicBool,
    resuming: AtomicBool,
    shutdown: CancellationToken,
}

enum Outcome {
    Succeeded,
    Failed(TaskError),
    Interrupted,
}

impl<P: Payload> TaskEngineBuilder<P> {
    pub fn with_condition_gate(mut self, gate: Arc<dyn ConditionGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Load persisted state and start the engine
    ///
    /// No task is dispatched before the cache has been fully loaded. Records
    /// left Running by a previous process are returned to Ready, and pending
    /// work is resumed unless the engine is paused or conditions are unmet.
    pub async fn start(self) -> Result<TaskEngine<P>, EngineError> {
        let cache = TaskCache::load(self.store.clone()).await?;

        for task in cache.tasks_to_run().into_iter().filter(|t| t.is_running()) {
            cache.update(&task.id, |task| task.reset_to_ready()).await?;
            debug!("Task {} was interrupted, returned to ready", task.id);
        }

        let preferences = self.store.load_preferences().await?;
        let paused = preferences.paused || self.config.start_paused;

        let inner = Arc::new(EngineInner {
            pool: ExecutionPool::new(self.config.effective_concurrency()),
            config: self.config,
            store: self.store,
            cache,
            work: self.work,
            gate: self.gate,
            sinks: self.sinks,
            user_paused: AtomicBool::new(paused),
            unmetered_only: AtomicBool::new(preferences.unmetered_only),
            resuming: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        inner.gate.set_unmetered_only(preferences.unmetered_only);
        spawn_condition_watcher(&inner);

        info!(
            "Started engine {} with {} tasks (paused: {}, max active: {})",
            inner.config.name,
            inner.cache.len(),
            paused,
            inner.pool.max_active()
        );

        let engine = TaskEngine { inner };
        if engine.tasks_remaining() > 0 {
            engine.resume_if_necessary();
        }
        Ok(engine)
    }
}

impl<P: Payload> TaskEngine<P> {
    /// Start configuring an engine; the default gate is [`AlwaysSatisfied`]
    pub fn builder(
        config: EngineConfig,
        store: Arc<dyn TaskStore<P>>,
        work: Arc<dyn TaskWork<P>>,
    ) -> TaskEngineBuilder<P> {
        TaskEngineBuilder {
            config,
            store,
            work,
            gate: Arc::new(AlwaysSatisfied::new()),
            sinks: Vec::new(),
        }
    }

    /// Persist a new task and dispatch it when possible
    ///
    /// Empty and duplicate ids are rejected without any state change. When the
    /// engine is suspended the task stays Ready and a `Suspended` event tells
    /// the caller why it did not start.
    pub async fn add_task(&self, task: Task<P>) -> Result<(), EngineError> {
        let inner = &self.inner;
        if task.id.is_empty() {
            warn!("Rejected task with empty id");
            return Err(EngineError::InvalidTaskId);
        }

        let task_id = task.id.clone();
        let runnable = task.should_run();
        let is_retry = task.is_retry;
        if !inner.cache.insert(task).await? {
            warn!("Task {} already exists, ignoring", task_id);
            return Err(EngineError::DuplicateTask(task_id));
        }

        info!("Created task {}", task_id);
        inner.emit(EngineEvent::TaskAdded {
            task_id: task_id.clone(),
        });

        if !runnable {
            return Ok(());
        }
        match inner.suspension() {
            Some(reason) => inner.emit(EngineEvent::Suspended { reason }),
            None => {
                inner.dispatch(&task_id, is_retry);
            }
        }
        Ok(())
    }

    /// Make a task eligible again and dispatch it
    ///
    /// Does nothing while the task is in the pool. Completed tasks are not
    /// revived.
    pub async fn retry(&self, task_id: &str) -> Result<(), EngineError> {
        let inner = &self.inner;
        if inner.pool.contains(task_id) {
            debug!("Task {} is already in the pool, not retrying", task_id);
            return Ok(());
        }

        let update = inner
            .cache
            .update(task_id, |task| {
                if task.is_complete() {
                    return false;
                }
                task.prepare_retry();
                true
            })
            .await?;

        match update {
            CacheUpdate::Missing => {
                warn!("Cannot retry unknown task {}", task_id);
            }
            CacheUpdate::Unchanged(_) => {
                debug!("Task {} already completed, not retrying", task_id);
            }
            CacheUpdate::Updated(_) => {
                info!("Retrying task {}", task_id);
                inner.emit(EngineEvent::TaskRetrying {
                    task_id: task_id.to_string(),
                });
                inner.cleanup(false);
            }
        }
        Ok(())
    }

    /// Interrupt a task and delete it
    pub async fn cancel(&self, task_id: &str) -> Result<(), EngineError> {
        let inner = &self.inner;
        let interrupted = inner.pool.cancel(task_id);
        let removed = inner.cache.remove(task_id).await?;

        if interrupted || removed.is_some() {
            info!("Cancelled task {}", task_id);
            inner.emit(EngineEvent::TaskCancelled {
                task_id: task_id.to_string(),
            });
        } else {
            warn!("Cannot cancel unknown task {}", task_id);
        }

        inner.cleanup(false);
        Ok(())
    }

    /// Interrupt and delete every task
    pub async fn cancel_all(&self) -> Result<(), EngineError> {
        let inner = &self.inner;
        let interrupted = inner.pool.cancel_all();
        let removed = inner.cache.remove_all().await?;

        info!(
            "Cancelled all tasks ({} removed, {} interrupted)",
            removed,
            interrupted.len()
        );
        inner.cleanup(false);
        Ok(())
    }

    /// Retry every task currently in the Error state
    pub async fn retry_all_failed(&self) -> Result<(), EngineError> {
        let failed: Vec<TaskId> = self
            .inner
            .cache
            .date_ordered()
            .into_iter()
            .filter(|task| task.is_error())
            .map(|task| task.id)
            .collect();

        debug!("Retrying {} failed tasks", failed.len());
        for task_id in failed {
            self.retry(&task_id).await?;
        }
        Ok(())
    }

    /// Pause the whole engine until [`TaskEngine::resume_all`]; survives restarts
    pub async fn pause_all(&self) -> Result<(), EngineError> {
        let inner = &self.inner;
        inner
            .update_preferences(|preferences| preferences.paused = true)
            .await?;
        inner.user_paused.store(true, Ordering::SeqCst);
        inner.pause_pool().await;

        info!("Paused all tasks");
        inner.emit(EngineEvent::PoolPaused);
        Ok(())
    }

    /// Lift a user pause; a no-op when the engine is not paused
    ///
    /// Work restarts only if conditions are also satisfied; otherwise the pause
    /// flag is cleared and a `Suspended` event is emitted instead of `PoolResumed`.
    pub async fn resume_all(&self) -> Result<(), EngineError> {
        let inner = &self.inner;
        if !inner.user_paused.load(Ordering::SeqCst) {
            debug!("Engine {} is not paused", inner.config.name);
            return Ok(());
        }

        inner
            .update_preferences(|preferences| preferences.paused = false)
            .await?;
        inner.user_paused.store(false, Ordering::SeqCst);

        if inner.resume_pool() {
            info!("Resumed all tasks");
            inner.emit(EngineEvent::PoolResumed);
        }
        Ok(())
    }

    /// Restrict work to unmetered links; survives restarts
    ///
    /// The condition gate is told about the change. Lifting the restriction
    /// resumes pending work if nothing is executing.
    pub async fn set_unmetered_only(&self, unmetered_only: bool) -> Result<(), EngineError> {
        let inner = &self.inner;
        inner
            .update_preferences(|preferences| preferences.unmetered_only = unmetered_only)
            .await?;
        inner.unmetered_only.store(unmetered_only, Ordering::SeqCst);
        inner.gate.set_unmetered_only(unmetered_only);

        info!("Engine {} unmetered only: {}", inner.config.name, unmetered_only);
        if !unmetered_only {
            self.resume_if_necessary();
        }
        Ok(())
    }

    pub fn unmetered_only(&self) -> bool {
        self.inner.unmetered_only.load(Ordering::SeqCst)
    }

    /// Resume pending work if nothing is executing
    pub fn resume_if_necessary(&self) -> bool {
        if !self.inner.pool.is_empty() {
            return false;
        }
        self.inner.resume_pool()
    }

    /// Stop the engine without touching persisted state
    ///
    /// In-flight executions are aborted before they can record an outcome, as
    /// if the process had exited.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        let aborted = inner.pool.abort_all();
        info!(
            "Engine {} shut down ({} executions aborted)",
            inner.config.name, aborted
        );
    }

    pub fn get_task(&self, task_id: &str) -> Option<Task<P>> {
        self.inner.cache.get(task_id)
    }

    pub fn tasks(&self) -> HashMap<TaskId, Task<P>> {
        self.inner.cache.get_all()
    }

    pub fn tasks_to_run(&self) -> Vec<Task<P>> {
        self.inner.cache.tasks_to_run()
    }

    pub fn date_ordered_tasks(&self) -> Vec<Task<P>> {
        self.inner.cache.date_ordered()
    }

    /// Number of tasks that still need a worker
    pub fn tasks_remaining(&self) -> usize {
        self.inner.cache.tasks_to_run().len()
    }

    /// Whether the task's record is currently Running
    pub fn is_executing(&self, task_id: &str) -> bool {
        self.inner
            .cache
            .get(task_id)
            .is_some_and(|task| task.is_running())
    }

    /// Whether any execution holds or waits for a pool slot
    pub fn has_work_in_flight(&self) -> bool {
        !self.inner.pool.is_empty()
    }

    pub fn is_in_pool(&self, task_id: &str) -> bool {
        self.inner.pool.contains(task_id)
    }

    /// Whether the task holds a pool slot but is still waiting for a permit
    pub fn is_queued(&self, task_id: &str) -> bool {
        self.inner.pool.is_queued(task_id)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.user_paused.load(Ordering::SeqCst)
    }

    pub fn conditions_satisfied(&self) -> bool {
        self.inner.gate.is_satisfied()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

impl<P: Payload> EngineInner<P> {
    /// Read-modify-write of the persisted preferences
    ///
    /// Starts from what is stored rather than the in-memory flags, so a
    /// `start_paused` override is never written back.
    async fn update_preferences<F>(&self, change: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut Preferences),
    {
        let mut preferences = self.store.load_preferences().await?;
        change(&mut preferences);
        self.store.save_preferences(&preferences).await?;
        Ok(())
    }

    /// User pause wins over unmet conditions
    fn suspension(&self) -> Option<SuspendReason> {
        if self.user_paused.load(Ordering::SeqCst) {
            Some(SuspendReason::UserPaused)
        } else if !self.gate.is_satisfied() {
            Some(SuspendReason::ConditionsUnmet)
        } else {
            None
        }
    }

    fn emit(&self, event: EngineEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.handle_event(&event) {
                error!("Event sink error: {}", e);
            }
        }
    }

    fn dispatch(self: &Arc<Self>, task_id: &str, is_retry: bool) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        let inner = self.clone();
        self.pool
            .submit(task_id, move |ticket| inner.run_worker(ticket, is_retry))
    }

    /// Submit every eligible task that has no worker, or report idleness
    fn cleanup(self: &Arc<Self>, completed: bool) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let pending = self.cache.tasks_to_run();
        if pending.is_empty() {
            if self.pool.is_empty() {
                info!("No tasks remaining in engine {}", self.config.name);
                self.emit(EngineEvent::Idle { completed });
            }
            return;
        }

        for task in pending {
            if self.pool.contains(&task.id) {
                continue;
            }
            if let Some(reason) = self.suspension() {
                self.emit(EngineEvent::Suspended { reason });
                return;
            }
            self.dispatch(&task.id, task.is_retry);
        }
    }

    /// Re-dispatch every eligible task as a retry
    ///
    /// Refused while suspended. Concurrent resumes collapse into one.
    fn resume_pool(self: &Arc<Self>) -> bool {
        if let Some(reason) = self.suspension() {
            debug!("Not resuming engine {}: {}", self.config.name, reason);
            self.emit(EngineEvent::Suspended { reason });
            return false;
        }
        if self
            .resuming
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Resume of engine {} already in progress", self.config.name);
            return false;
        }

        let stale = self.pool.cancel_all();
        if !stale.is_empty() {
            debug!("Dropped {} stale executions before resuming", stale.len());
        }

        let pending = self.cache.tasks_to_run();
        for task in &pending {
            self.dispatch(&task.id, true);
        }
        info!(
            "Resumed engine {} with {} pending tasks",
            self.config.name,
            pending.len()
        );

        self.resuming.store(false, Ordering::SeqCst);
        true
    }

    /// Interrupt every execution and return interrupted tasks to Ready
    async fn pause_pool(&self) {
        let drained = self.pool.cancel_all();
        for task_id in drained {
            let result = self
                .cache
                .update(&task_id, |task| {
                    !self.pool.contains(&task_id) && task.reset_to_ready()
                })
                .await;
            if let Err(e) = result {
                error!("Failed to return task {} to ready: {}", task_id, e);
            }
        }
    }

    async fn on_conditions_changed(self: &Arc<Self>, satisfied: bool) {
        if satisfied {
            info!("Run conditions satisfied for engine {}", self.config.name);
            if self.resume_pool() {
                self.emit(EngineEvent::ConditionsRegained);
            }
        } else {
            warn!("Run conditions lost for engine {}", self.config.name);
            self.emit(EngineEvent::ConditionsLost);
            self.pause_pool().await;
        }
    }

    fn run_worker(self: Arc<Self>, ticket: WorkerTicket, is_retry: bool) -> BoxFuture<'static, ()> {
        async move {
            let Some(permit) = ticket.acquire().await else {
                debug!("Task {} interrupted before it started", ticket.task_id);
                return;
            };
            let task_id = ticket.task_id.clone();

            let token = &ticket.token;
            let started = self
                .cache
                .update(&task_id, |task| {
                    if token.is_cancelled() || !task.should_run() {
                        return false;
                    }
                    task.mark_running();
                    true
                })
                .await;

            let task = match started {
                Ok(CacheUpdate::Updated(task)) => task,
                Ok(_) => {
                    debug!("Task {} is no longer runnable", task_id);
                    drop(permit);
                    if self.pool.release(&task_id, ticket.generation) {
                        self.cleanup(false);
                    }
                    return;
                }
                Err(e) => {
                    error!("Failed to persist start of task {}: {}", task_id, e);
                    drop(permit);
                    self.pool.release(&task_id, ticket.generation);
                    return;
                }
            };

            let attempt = task.attempt();
            info!("Started task {} (attempt {})", task_id, task.attempts);
            self.emit(EngineEvent::TaskStarted {
                task_id: task_id.clone(),
                is_retry,
            });

            let outcome = self.execute(task, is_retry, token).await;

            match outcome {
                Outcome::Interrupted => {
                    debug!("Task {} interrupted", task_id);
                    self.pool.release(&task_id, ticket.generation);
                }
                Outcome::Succeeded => self.finish(&ticket, attempt, None).await,
                Outcome::Failed(error) => self.finish(&ticket, attempt, Some(error)).await,
            }
            drop(permit);
        }
        .boxed()
    }

    async fn execute(
        &self,
        mut task: Task<P>,
        is_retry: bool,
        token: &CancellationToken,
    ) -> Outcome {
        task.is_retry = is_retry;
        let task_id = task.id.clone();
        let attempt = task.attempt();
        let (ctx, mut progress_rx) = TaskContext::new(task_id.clone(), is_retry, token.clone());

        let work = AssertUnwindSafe(self.work.execute(task, ctx)).catch_unwind();
        tokio::pin!(work);

        let result = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Outcome::Interrupted,
                Some(progress) = progress_rx.recv() => {
                    self.apply_progress(&task_id, attempt, progress).await;
                }
                result = &mut work => break result,
            }
        };

        while let Ok(progress) = progress_rx.try_recv() {
            self.apply_progress(&task_id, attempt, progress).await;
        }

        match result {
            Ok(Ok(())) => Outcome::Succeeded,
            Ok(Err(error)) => Outcome::Failed(error),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Work for task {} panicked: {}", task_id, message);
                Outcome::Failed(TaskError::new("panic", message).permanent())
            }
        }
    }

    /// Persist progress of `attempt`; dropped once the record has moved on
    async fn apply_progress(&self, task_id: &str, attempt: Attempt, progress: u8) {
        match self
            .cache
            .update(task_id, |task| {
                task.is_running_attempt(attempt) && task.record_progress(progress)
            })
            .await
        {
            Ok(CacheUpdate::Updated(task)) => self.emit(EngineEvent::TaskProgress {
                task_id: task_id.to_string(),
                progress: task.progress,
            }),
            Ok(_) => {}
            Err(e) => warn!("Failed to persist progress of task {}: {}", task_id, e),
        }
    }

    /// Record the terminal outcome, free the slot and move on to the next task
    ///
    /// The outcome only lands on the record this worker started. A task that
    /// was cancelled, re-added or re-dispatched meanwhile keeps its own state.
    async fn finish(
        self: &Arc<Self>,
        ticket: &WorkerTicket,
        attempt: Attempt,
        error: Option<TaskError>,
    ) {
        let task_id = &ticket.task_id;
        let update = self
            .cache
            .update(task_id, |task| {
                if !task.is_running_attempt(attempt) {
                    return false;
                }
                match &error {
                    Some(error) => task.mark_failed(error.clone()),
                    None => task.mark_completed(),
                }
                true
            })
            .await;
        self.pool.release(task_id, ticket.generation);

        match update {
            Ok(CacheUpdate::Updated(_)) => match error {
                None => {
                    info!("Task {} completed", task_id);
                    self.emit(EngineEvent::TaskSucceeded {
                        task_id: task_id.clone(),
                    });
                    self.cleanup(true);
                }
                Some(error) => {
                    warn!("Task {} failed: {}", task_id, error);
                    self.emit(EngineEvent::TaskFailed {
                        task_id: task_id.clone(),
                        error,
                    });
                    self.cleanup(false);
                }
            },
            Ok(_) => debug!("Task {} moved on, dropping stale outcome", task_id),
            Err(e) => error!("Failed to persist outcome of task {}: {}", task_id, e),
        }
    }
}

fn spawn_condition_watcher<P: Payload>(inner: &Arc<EngineInner<P>>) {
    let engine = Arc::downgrade(inner);
    let mut conditions = inner.gate.subscribe();
    let shutdown = inner.shutdown.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = conditions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let satisfied = *conditions.borrow_and_update();
                    let Some(inner) = engine.upgrade() else {
                        break;
                    };
                    inner.on_conditions_changed(satisfied).await;
                }
            }
        }
        debug!("Condition watcher stopped");
    });
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "work function panicked".to_string()
    }
}
