use crate::engine::*;
use crate::task::TaskError;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

#[tokio::test]
async fn test_pool_rejects_duplicate_submission() {
    let pool = ExecutionPool::new(2);
    let runs = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let runs = runs.clone();
        pool.submit("a", move |ticket| async move {
            if ticket.acquire().await.is_some() {
                runs.fetch_add(1, Ordering::SeqCst);
                ticket.token.cancelled().await;
            }
        });
    }

    assert_eq!(pool.len(), 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    assert!(pool.cancel("a"));
    assert!(pool.is_empty());
}

#[tokio::test]
async fn test_pool_release_checks_generation() {
    let pool = ExecutionPool::new(1);
    let (tx, rx) = oneshot::channel();

    pool.submit("a", move |ticket| async move {
        let _ = tx.send(ticket.generation);
        ticket.token.cancelled().await;
    });
    let first_generation = rx.await.unwrap();

    // A newer submission for the same id replaces the cancelled one
    assert!(pool.cancel("a"));
    assert!(pool.submit("a", |ticket| async move {
        ticket.token.cancelled().await;
    }));

    assert!(!pool.release("a", first_generation));
    assert!(pool.contains("a"));

    pool.cancel_all();
    assert!(pool.is_empty());
}

#[tokio::test]
async fn test_pool_queues_beyond_limit() {
    let pool = ExecutionPool::new(1);

    for id in ["first", "second"] {
        pool.submit(id, |ticket| async move {
            if let Some(_permit) = ticket.acquire().await {
                ticket.token.cancelled().await;
            }
        });
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(pool.len(), 2);
    let queued: Vec<bool> = ["first", "second"]
        .iter()
        .map(|id| pool.is_queued(id))
        .collect();
    assert_eq!(queued.iter().filter(|q| **q).count(), 1);

    // Cancelling the running one frees its permit for the queued one
    let running = if queued[0] { "second" } else { "first" };
    let waiting = if queued[0] { "first" } else { "second" };
    pool.cancel(running);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!pool.is_queued(waiting));
    assert!(pool.contains(waiting));

    assert_eq!(pool.cancel_all(), vec![waiting.to_string()]);
}

#[tokio::test]
async fn test_pool_zero_limit_still_runs() {
    let pool = ExecutionPool::new(0);
    assert_eq!(pool.max_active(), 1);
}

#[tokio::test]
async fn test_manual_gate_notifies_on_change_only() {
    let gate = ManualGate::new(false);
    let mut rx = gate.subscribe();
    assert!(!gate.is_satisfied());

    gate.set(false);
    assert!(!rx.has_changed().unwrap());

    gate.set(true);
    assert!(rx.has_changed().unwrap());
    assert!(*rx.borrow_and_update());
    assert!(gate.is_satisfied());
}

#[test]
fn test_always_satisfied_gate() {
    let gate = AlwaysSatisfied::default();
    assert!(gate.is_satisfied());
    assert!(*gate.subscribe().borrow());
}

#[test]
fn test_config_defaults() {
    let config = EngineConfig::default();
    assert_eq!(config.name, "default");
    assert_eq!(config.max_active_tasks, 3);
    assert!(!config.start_paused);
    assert!(config.storage_root.ends_with(".tollgate/stores"));
}

#[test]
fn test_config_partial_toml_uses_defaults() {
    let config = EngineConfig::from_toml_str("name = \"uploads\"\nmax_active_tasks = 1\n").unwrap();
    assert_eq!(config.name, "uploads");
    assert_eq!(config.max_active_tasks, 1);
    assert!(!config.start_paused);

    let zero = EngineConfig::new("x").with_max_active_tasks(0);
    assert_eq!(zero.effective_concurrency(), 1);
}

#[test]
fn test_config_toml_file_round_trip() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("config.toml");
    let config = EngineConfig::new("transcodes")
        .with_max_active_tasks(5)
        .with_storage_root(temp_dir.path())
        .with_start_paused(true);

    config.to_toml_file(&path).unwrap();
    let loaded = EngineConfig::from_toml_file(&path).unwrap();

    assert_eq!(loaded, config);
}

#[test]
fn test_channel_sink_forwards_events() {
    let (sink, mut rx) = ChannelEventSink::new();
    sink.handle_event(&EngineEvent::TaskAdded {
        task_id: "a".to_string(),
    })
    .unwrap();

    let event = rx.try_recv().unwrap();
    assert_eq!(event.task_id(), Some("a"));

    drop(rx);
    assert!(sink.handle_event(&EngineEvent::PoolPaused).is_err());
}

#[test]
fn test_logging_sink_accepts_every_event() {
    let sink = LoggingEventSink;
    let events = vec![
        EngineEvent::TaskFailed {
            task_id: "a".to_string(),
            error: TaskError::new("io", "disk full"),
        },
        EngineEvent::Suspended {
            reason: SuspendReason::ConditionsUnmet,
        },
        EngineEvent::Idle { completed: true },
    ];
    for event in &events {
        assert!(sink.handle_event(event).is_ok());
    }
    assert_eq!(events[1].task_id(), None);
}

#[test]
fn test_engine_error_messages() {
    assert_eq!(
        EngineError::DuplicateTask("a".to_string()).to_string(),
        "Task a already exists"
    );
    assert_eq!(
        EngineError::InvalidTaskId.to_string(),
        "Task id must not be empty"
    );
}
