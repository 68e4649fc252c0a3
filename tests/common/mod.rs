#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tollgate::{
    ChannelEventSink, EngineConfig, EngineEvent, ManualGate, Task, TaskContext, TaskEngine,
    TaskError, TaskStore, TaskWork,
};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub steps: u8,
    pub step_ms: u64,
    /// The job fails while its attempt count is at most this value
    pub fail_attempts: u32,
}

impl Job {
    pub fn quick() -> Self {
        Self {
            steps: 3,
            step_ms: 5,
            fail_attempts: 0,
        }
    }

    pub fn slow() -> Self {
        Self {
            steps: 20,
            step_ms: 25,
            fail_attempts: 0,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_attempts: u32::MAX,
            ..Self::quick()
        }
    }

    pub fn failing_once() -> Self {
        Self {
            fail_attempts: 1,
            ..Self::quick()
        }
    }
}

pub fn job(id: &str, job: Job) -> Task<Job> {
    Task::new(id, job)
}

/// Work function recording every execution
#[derive(Default)]
pub struct TestWork {
    runs: Mutex<HashMap<String, usize>>,
    retries: Mutex<HashMap<String, usize>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    hold: AtomicBool,
    panic: AtomicBool,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TestWork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every execution blocks until it is interrupted
    pub fn holding() -> Arc<Self> {
        let work = Self::default();
        work.hold.store(true, Ordering::SeqCst);
        Arc::new(work)
    }

    pub fn panicking() -> Arc<Self> {
        let work = Self::default();
        work.panic.store(true, Ordering::SeqCst);
        Arc::new(work)
    }

    pub fn runs(&self, id: &str) -> usize {
        self.runs.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn retries(&self, id: &str) -> usize {
        self.retries.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn total_runs(&self) -> usize {
        self.runs.lock().unwrap().values().sum()
    }

    pub fn peak_active(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TaskWork<Job> for TestWork {
    async fn execute(&self, task: Task<Job>, ctx: TaskContext) -> Result<(), TaskError> {
        *self.runs.lock().unwrap().entry(task.id.clone()).or_default() += 1;
        if ctx.is_retry() {
            *self.retries.lock().unwrap().entry(task.id.clone()).or_default() += 1;
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if self.panic.load(Ordering::SeqCst) {
            panic!("work exploded");
        }

        let steps = task.payload.steps.max(1);
        for step in 1..=steps {
            tokio::time::sleep(Duration::from_millis(task.payload.step_ms)).await;
            ctx.report_progress((u32::from(step) * 100 / u32::from(steps)) as u8);
        }

        if self.hold.load(Ordering::SeqCst) {
            ctx.cancelled().await;
        }

        if task.attempts <= task.payload.fail_attempts {
            return Err(TaskError::new("boom", format!("{} failed", task.id)));
        }
        Ok(())
    }
}

/// Receiving end of a [`ChannelEventSink`] with timeouts
pub struct Events {
    rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl Events {
    /// Next event, panicking if none arrives in time
    pub async fn next(&mut self) -> EngineEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for engine event")
            .expect("event channel closed")
    }

    /// Collect events up to and including the first one matching `pred`
    pub async fn until<F>(&mut self, pred: F) -> Vec<EngineEvent>
    where
        F: Fn(&EngineEvent) -> bool,
    {
        let mut seen = Vec::new();
        loop {
            let event = self.next().await;
            let done = pred(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    /// Events emitted within `window`
    pub async fn collect_for(&mut self, window: Duration) -> Vec<EngineEvent> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.rx.recv()).await {
            seen.push(event);
        }
        seen
    }

    pub fn drain(&mut self) -> Vec<EngineEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            seen.push(event);
        }
        seen
    }
}

pub fn is_idle(event: &EngineEvent) -> bool {
    matches!(event, EngineEvent::Idle { .. })
}

pub fn is_started(id: &str) -> impl Fn(&EngineEvent) -> bool + '_ {
    move |event| matches!(event, EngineEvent::TaskStarted { task_id, .. } if task_id == id)
}

pub fn is_succeeded(id: &str) -> impl Fn(&EngineEvent) -> bool + '_ {
    move |event| matches!(event, EngineEvent::TaskSucceeded { task_id } if task_id == id)
}

pub fn is_failed(id: &str) -> impl Fn(&EngineEvent) -> bool + '_ {
    move |event| matches!(event, EngineEvent::TaskFailed { task_id, .. } if task_id == id)
}

pub fn count(events: &[EngineEvent], pred: impl Fn(&EngineEvent) -> bool) -> usize {
    events.iter().filter(|event| pred(event)).count()
}

pub struct Harness {
    pub engine: TaskEngine<Job>,
    pub events: Events,
}

pub async fn start_engine(
    config: EngineConfig,
    store: Arc<dyn TaskStore<Job>>,
    work: Arc<TestWork>,
    gate: Option<Arc<ManualGate>>,
) -> Harness {
    start_engine_with(config, store, work, gate).await
}

/// Like [`start_engine`], for work functions other than [`TestWork`]
pub async fn start_engine_with(
    config: EngineConfig,
    store: Arc<dyn TaskStore<Job>>,
    work: Arc<dyn TaskWork<Job>>,
    gate: Option<Arc<ManualGate>>,
) -> Harness {
    let (sink, rx) = ChannelEventSink::new();
    let mut builder =
        TaskEngine::<Job>::builder(config, store, work).with_event_sink(Arc::new(sink));
    if let Some(gate) = gate {
        builder = builder.with_condition_gate(gate);
    }

    let engine = builder.start().await.expect("engine should start");
    Harness {
        engine,
        events: Events { rx },
    }
}

pub fn config(max_active_tasks: usize) -> EngineConfig {
    EngineConfig::new("test").with_max_active_tasks(max_active_tasks)
}
