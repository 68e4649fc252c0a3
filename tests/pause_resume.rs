mod common;

use common::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tollgate::{
    EngineEvent, ManualGate, MemoryTaskStore, Preferences, StoreError, SuspendReason, Task,
    TaskContext, TaskError, TaskState, TaskStore, TaskWork,
};

fn memory_store() -> Arc<MemoryTaskStore<Job>> {
    Arc::new(MemoryTaskStore::<Job>::new())
}

#[tokio::test]
async fn test_pause_interrupts_and_resume_reruns() {
    let store = memory_store();
    let work = TestWork::new();
    let mut h = start_engine(config(2), store.clone(), work.clone(), None).await;

    h.engine.add_task(job("a", Job::slow())).await.unwrap();
    h.events.until(is_started("a")).await;

    h.engine.pause_all().await.unwrap();
    h.events
        .until(|event| *event == EngineEvent::PoolPaused)
        .await;

    assert!(h.engine.is_paused());
    assert!(!h.engine.has_work_in_flight());
    let task = h.engine.get_task("a").unwrap();
    assert_eq!(task.state, TaskState::Ready);
    assert!(task.progress < 100);
    assert!(
        TaskStore::<Job>::load_preferences(store.as_ref())
            .await
            .unwrap()
            .paused
    );

    // Nothing completes while paused
    let quiet = h.events.collect_for(Duration::from_millis(150)).await;
    assert_eq!(count(&quiet, is_succeeded("a")), 0);

    h.engine.resume_all().await.unwrap();
    let events = h.events.until(is_idle).await;

    assert_eq!(events[0], EngineEvent::PoolResumed);
    assert!(events.contains(&EngineEvent::TaskStarted {
        task_id: "a".to_string(),
        is_retry: true
    }));
    assert_eq!(count(&events, is_succeeded("a")), 1);
    assert_eq!(work.runs("a"), 2);
    assert!(!h.engine.is_paused());
    assert!(
        !TaskStore::<Job>::load_preferences(store.as_ref())
            .await
            .unwrap()
            .paused
    );
}

#[tokio::test]
async fn test_resume_with_nothing_pending_emits_once() {
    let mut h = start_engine(config(1), memory_store(), TestWork::new(), None).await;

    h.engine.pause_all().await.unwrap();
    h.engine.resume_all().await.unwrap();
    h.engine.resume_all().await.unwrap();

    let events = h.events.collect_for(Duration::from_millis(50)).await;
    assert_eq!(
        events,
        vec![EngineEvent::PoolPaused, EngineEvent::PoolResumed]
    );
}

#[tokio::test]
async fn test_add_while_paused_is_suspended() {
    let work = TestWork::new();
    let mut h = start_engine(config(1), memory_store(), work.clone(), None).await;
    h.engine.pause_all().await.unwrap();
    h.events.drain();

    h.engine.add_task(job("a", Job::quick())).await.unwrap();

    let events = h.events.collect_for(Duration::from_millis(100)).await;
    assert_eq!(
        events,
        vec![
            EngineEvent::TaskAdded {
                task_id: "a".to_string()
            },
            EngineEvent::Suspended {
                reason: SuspendReason::UserPaused
            }
        ]
    );
    assert_eq!(work.total_runs(), 0);
    assert_eq!(h.engine.tasks_remaining(), 1);
}

#[tokio::test]
async fn test_user_pause_wins_over_conditions() {
    let gate = Arc::new(ManualGate::new(true));
    let work = TestWork::new();
    let mut h = start_engine(config(1), memory_store(), work.clone(), Some(gate.clone())).await;

    h.engine.pause_all().await.unwrap();
    h.engine.add_task(job("a", Job::quick())).await.unwrap();
    h.events.drain();

    gate.set(false);
    h.events
        .until(|event| *event == EngineEvent::ConditionsLost)
        .await;

    gate.set(true);
    let events = h.events.collect_for(Duration::from_millis(150)).await;

    assert_eq!(
        events,
        vec![EngineEvent::Suspended {
            reason: SuspendReason::UserPaused
        }]
    );
    assert_eq!(work.total_runs(), 0);

    h.engine.resume_all().await.unwrap();
    let events = h.events.until(is_idle).await;
    assert_eq!(events[0], EngineEvent::PoolResumed);
    assert_eq!(work.runs("a"), 1);
}

#[tokio::test]
async fn test_resume_refused_while_conditions_unmet() {
    let gate = Arc::new(ManualGate::new(true));
    let work = TestWork::new();
    let mut h = start_engine(config(1), memory_store(), work.clone(), Some(gate.clone())).await;

    h.engine.pause_all().await.unwrap();
    h.engine.add_task(job("a", Job::quick())).await.unwrap();
    gate.set(false);
    h.events
        .until(|event| *event == EngineEvent::ConditionsLost)
        .await;

    h.engine.resume_all().await.unwrap();
    assert!(!h.engine.is_paused());
    assert_eq!(
        h.events.next().await,
        EngineEvent::Suspended {
            reason: SuspendReason::ConditionsUnmet
        }
    );

    gate.set(true);
    let events = h.events.until(is_idle).await;
    assert!(events.contains(&EngineEvent::ConditionsRegained));
    assert_eq!(count(&events, |e| *e == EngineEvent::PoolResumed), 0);
    assert_eq!(work.runs("a"), 1);
}

#[tokio::test]
async fn test_condition_loss_interrupts_running_work() {
    let gate = Arc::new(ManualGate::new(true));
    let work = TestWork::new();
    let mut h = start_engine(config(1), memory_store(), work.clone(), Some(gate.clone())).await;

    h.engine.add_task(job("a", Job::slow())).await.unwrap();
    h.events.until(is_started("a")).await;

    gate.set(false);
    h.events
        .until(|event| *event == EngineEvent::ConditionsLost)
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!h.engine.conditions_satisfied());
    assert!(!h.engine.is_in_pool("a"));
    assert_eq!(h.engine.get_task("a").unwrap().state, TaskState::Ready);
    assert!(!h.engine.is_paused());

    gate.set(true);
    let events = h.events.until(is_idle).await;
    assert!(events.contains(&EngineEvent::ConditionsRegained));
    assert_eq!(count(&events, is_succeeded("a")), 1);
    assert_eq!(work.runs("a"), 2);
    assert_eq!(work.retries("a"), 1);
}

#[tokio::test]
async fn test_cancel_is_destructive() {
    let store = memory_store();
    let work = TestWork::holding();
    let mut h = start_engine(config(1), store.clone(), work.clone(), None).await;

    h.engine.add_task(job("a", Job::quick())).await.unwrap();
    h.events.until(is_started("a")).await;

    h.engine.cancel("a").await.unwrap();
    let events = h.events.until(is_idle).await;

    assert!(events.contains(&EngineEvent::TaskCancelled {
        task_id: "a".to_string()
    }));
    assert_eq!(events.last(), Some(&EngineEvent::Idle { completed: false }));
    assert!(h.engine.get_task("a").is_none());
    assert!(store.record("a").is_none());
    assert!(!h.engine.is_in_pool("a"));

    h.engine.retry_all_failed().await.unwrap();
    h.engine.retry("a").await.unwrap();
    let later = h.events.collect_for(Duration::from_millis(100)).await;
    assert!(later.is_empty());
    assert_eq!(work.runs("a"), 1);
}

#[tokio::test]
async fn test_cancel_unknown_task_emits_nothing() {
    let mut h = start_engine(config(1), memory_store(), TestWork::new(), None).await;

    h.engine.cancel("missing").await.unwrap();

    let events = h.events.collect_for(Duration::from_millis(50)).await;
    assert_eq!(count(&events, |e| matches!(e, EngineEvent::TaskCancelled { .. })), 0);
}

#[tokio::test]
async fn test_cancel_all_clears_everything() {
    let store = memory_store();
    let work = TestWork::holding();
    let mut h = start_engine(config(1), store.clone(), work.clone(), None).await;

    for id in ["a", "b", "c"] {
        h.engine.add_task(job(id, Job::quick())).await.unwrap();
    }
    h.events.until(is_started("a")).await;

    h.engine.cancel_all().await.unwrap();
    let events = h.events.until(is_idle).await;

    assert_eq!(events.last(), Some(&EngineEvent::Idle { completed: false }));
    assert!(h.engine.tasks().is_empty());
    assert!(store.is_empty());
    assert!(!h.engine.has_work_in_flight());
}

/// Memory store whose progress writes are slow
struct SlowProgressStore {
    inner: MemoryTaskStore<Job>,
}

#[async_trait::async_trait]
impl TaskStore<Job> for SlowProgressStore {
    async fn load_all(&self) -> Result<Vec<Task<Job>>, StoreError> {
        self.inner.load_all().await
    }

    async fn upsert(&self, task: &Task<Job>) -> Result<(), StoreError> {
        if task.is_running() && task.progress > 0 {
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        self.inner.upsert(task).await
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.inner.remove(id).await
    }

    async fn remove_all(&self) -> Result<(), StoreError> {
        self.inner.remove_all().await
    }

    async fn load_preferences(&self) -> Result<Preferences, StoreError> {
        self.inner.load_preferences().await
    }

    async fn save_preferences(&self, preferences: &Preferences) -> Result<(), StoreError> {
        self.inner.save_preferences(preferences).await
    }
}

/// Jobs with steps report all their progress at once and succeed; jobs without
/// steps block until interrupted
#[derive(Default)]
struct BurstWork {
    held_finished: AtomicUsize,
}

#[async_trait::async_trait]
impl TaskWork<Job> for BurstWork {
    async fn execute(&self, task: Task<Job>, ctx: TaskContext) -> Result<(), TaskError> {
        if task.payload.steps == 0 {
            ctx.cancelled().await;
            self.held_finished.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        for step in 1..=task.payload.steps {
            ctx.report_progress(step * 10);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_stale_outcome_does_not_touch_readded_task() {
    let burst = Job {
        steps: 9,
        step_ms: 0,
        fail_attempts: 0,
    };
    let hold = Job {
        steps: 0,
        step_ms: 0,
        fail_attempts: 0,
    };
    let store = Arc::new(SlowProgressStore {
        inner: MemoryTaskStore::new(),
    });
    let work = Arc::new(BurstWork::default());
    let mut h = start_engine_with(config(2), store, work.clone(), None).await;

    // The first worker's work has returned and it is still writing progress
    h.engine.add_task(job("x", burst)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(15)).await;
    h.engine.cancel("x").await.unwrap();
    h.engine.add_task(job("x", hold.clone())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    let events = h.events.drain();
    let readded = events
        .iter()
        .rposition(|event| matches!(event, EngineEvent::TaskAdded { .. }))
        .unwrap();
    let after = &events[readded..];
    assert_eq!(count(after, is_started("x")), 1);
    assert_eq!(count(after, is_succeeded("x")), 0);
    assert_eq!(count(after, |e| matches!(e, EngineEvent::TaskProgress { .. })), 0);

    let task = h.engine.get_task("x").unwrap();
    assert_eq!(task.state, TaskState::Running);
    assert_eq!(task.payload, hold);
    assert_eq!(task.progress, 0);
    assert!(h.engine.is_executing("x"));
    assert_eq!(work.held_finished.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_lifting_unmetered_only_resumes_pending_work() {
    let store = memory_store();
    let gate = Arc::new(ManualGate::new(false));
    let mut h = start_engine(config(1), store.clone(), TestWork::new(), Some(gate.clone())).await;

    h.engine.add_task(job("a", Job::quick())).await.unwrap();
    h.events.drain();

    h.engine.set_unmetered_only(true).await.unwrap();
    assert!(h.engine.unmetered_only());
    assert!(gate.unmetered_only());
    assert!(h.events.drain().is_empty());

    h.engine.set_unmetered_only(false).await.unwrap();
    assert!(!gate.unmetered_only());
    assert_eq!(
        h.events.next().await,
        EngineEvent::Suspended {
            reason: SuspendReason::ConditionsUnmet
        }
    );
    assert!(
        !TaskStore::<Job>::load_preferences(store.as_ref())
            .await
            .unwrap()
            .unmetered_only
    );

    gate.set(true);
    h.events.until(is_idle).await;
    assert_eq!(h.engine.get_task("a").unwrap().state, TaskState::Completed);
}
