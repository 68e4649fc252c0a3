use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tollgate::cli::demo::{drain_events, simulated_jobs, wait_until_settled};
use tollgate::cli::{
    Args, ConfigDiscovery, ExecutionMode, RunConfig, SimulatedJob, SimulatedWork, WaitOutcome,
};
use tollgate::{
    ChannelEventSink, EngineConfig, EngineEvent, FileTaskStore, LoggingEventSink, TaskEngine,
    TaskState, TaskStore,
};
use tracing::{error, info};

/// Step used by commands that only resume existing jobs
const DEFAULT_STEP: Duration = Duration::from_millis(200);

type Events = mpsc::UnboundedReceiver<EngineEvent>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(if args.verbose {
            "tollgate=debug"
        } else {
            "tollgate=info"
        })
        .init();

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let ExecutionMode::ShowConfig = mode {
        ConfigDiscovery::show_discovery_info();
        return Ok(());
    }

    let mut config = ConfigDiscovery::load(args.config.as_deref())?;
    if let Some(name) = &args.name {
        config.name = name.clone();
    }
    info!("Using engine {} at {:?}", config.name, config.storage_root);

    let result = match mode {
        ExecutionMode::Run(run_config) => run_jobs(config, run_config, args.verbose).await,
        ExecutionMode::List => list_tasks(&config).await,
        ExecutionMode::RetryFailed => retry_failed(config, args.verbose).await,
        ExecutionMode::Clear => clear_tasks(config).await,
        ExecutionMode::Pause => pause_engine(config).await,
        ExecutionMode::Resume => resume_engine(config, args.verbose).await,
        ExecutionMode::ShowConfig => Ok(()),
    };

    if let Err(e) = &result {
        error!("Command failed: {}", e);
    }
    result
}

async fn open_engine(
    config: EngineConfig,
    step: Duration,
) -> Result<(TaskEngine<SimulatedJob>, Events)> {
    let store = Arc::new(FileTaskStore::new(&config.storage_root, &config.name)?);
    let work = Arc::new(SimulatedWork::new(step));
    let (sink, events) = ChannelEventSink::new();

    let engine = TaskEngine::<SimulatedJob>::builder(config, store, work)
        .with_event_sink(Arc::new(LoggingEventSink))
        .with_event_sink(Arc::new(sink))
        .start()
        .await?;
    Ok((engine, events))
}

async fn run_jobs(config: EngineConfig, run_config: RunConfig, verbose: bool) -> Result<()> {
    let (engine, mut events) = open_engine(config, run_config.step).await?;
    drain_events(&mut events);

    for task in simulated_jobs(run_config.count, run_config.fail_every) {
        engine.add_task(task).await?;
    }
    println!("Enqueued {} jobs", run_config.count);

    settle(&engine, &mut events, verbose).await;
    Ok(())
}

async fn list_tasks(config: &EngineConfig) -> Result<()> {
    let store = FileTaskStore::new(&config.storage_root, &config.name)?;
    let mut tasks = TaskStore::<SimulatedJob>::load_all(&store).await?;
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    let preferences = TaskStore::<SimulatedJob>::load_preferences(&store).await?;

    println!(
        "Engine {} ({} tasks{})",
        config.name,
        tasks.len(),
        if preferences.paused { ", paused" } else { "" }
    );
    for task in tasks {
        let error = task
            .error
            .as_ref()
            .map(|e| format!(" - {}", e))
            .unwrap_or_default();
        println!(
            "  #{:<4} {:<10} {:>3}%  attempts: {}  {}{}",
            task.payload.index, task.state, task.progress, task.attempts, task.id, error
        );
    }
    Ok(())
}

async fn retry_failed(config: EngineConfig, verbose: bool) -> Result<()> {
    let (engine, mut events) = open_engine(config, DEFAULT_STEP).await?;
    drain_events(&mut events);

    engine.retry_all_failed().await?;
    settle(&engine, &mut events, verbose).await;
    Ok(())
}

async fn clear_tasks(config: EngineConfig) -> Result<()> {
    let (engine, _events) = open_engine(config.with_start_paused(true), DEFAULT_STEP).await?;
    let count = engine.tasks().len();
    engine.cancel_all().await?;
    engine.shutdown();

    println!("Removed {} tasks", count);
    Ok(())
}

async fn pause_engine(config: EngineConfig) -> Result<()> {
    let (engine, _events) = open_engine(config.with_start_paused(true), DEFAULT_STEP).await?;
    engine.pause_all().await?;
    engine.shutdown();

    println!("Engine paused; {} tasks pending", engine.tasks_remaining());
    Ok(())
}

async fn resume_engine(config: EngineConfig, verbose: bool) -> Result<()> {
    let (engine, mut events) = open_engine(config, DEFAULT_STEP).await?;
    drain_events(&mut events);

    engine.resume_all().await?;
    settle(&engine, &mut events, verbose).await;
    Ok(())
}

async fn settle(engine: &TaskEngine<SimulatedJob>, events: &mut Events, verbose: bool) {
    let outcome = wait_until_settled(engine, events).await;
    engine.shutdown();

    match outcome {
        WaitOutcome::Idle => println!("All tasks processed"),
        WaitOutcome::Nothing => println!("Nothing to run"),
        WaitOutcome::Suspended => println!("Pending tasks will run once the engine is resumed"),
        WaitOutcome::Interrupted => println!("Stopped before all tasks finished"),
    }

    let tasks = engine.date_ordered_tasks();
    let count = |state: TaskState| tasks.iter().filter(|t| t.state == state).count();
    println!(
        "Completed: {}  Failed: {}  Pending: {}",
        count(TaskState::Completed),
        count(TaskState::Error),
        engine.tasks_remaining()
    );

    if verbose {
        for task in &tasks {
            println!("  #{:<4} {:<10} {:>3}%", task.payload.index, task.state, task.progress);
        }
    }
}
