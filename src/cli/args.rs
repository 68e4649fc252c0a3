//! Command line argument parsing
//!
//! This module handles CLI argument parsing with subcommands:
//! - `run`: Enqueue simulated jobs and run them until the engine is idle
//! - `list`: Print persisted tasks in creation order
//! - `retry-failed`: Retry every failed task and run until idle
//! - `clear`: Cancel and delete every task
//! - `pause` / `resume`: Toggle the persisted user pause
//! - `show-config`: Show configuration discovery information

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug)]
pub enum ExecutionMode {
    Run(RunConfig),
    List,
    RetryFailed,
    Clear,
    Pause,
    Resume,
    ShowConfig,
}

#[derive(Debug)]
pub struct RunConfig {
    pub count: usize,
    pub fail_every: Option<usize>,
    pub step: Duration,
}

#[derive(Debug, Parser)]
#[command(name = "tollgate")]
#[command(author = "Tollgate Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A persistent, concurrency-bounded task queue with pause and resume")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path (skips discovery)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Engine name override
    #[arg(short = 'n', long = "name", global = true)]
    pub name: Option<String>,
    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Enqueue simulated jobs and run until every task has finished
    Run {
        /// Number of jobs to enqueue
        #[arg(long = "count", default_value_t = 5)]
        count: usize,
        /// Make every K-th job fail on its first attempt
        #[arg(long = "fail-every", value_name = "K")]
        fail_every: Option<usize>,
        /// Duration of one simulated work step in milliseconds
        #[arg(long = "step-ms", default_value_t = 200)]
        step_ms: u64,
    },
    /// List persisted tasks in creation order
    List,
    /// Retry every failed task and run until idle
    RetryFailed,
    /// Cancel and delete every task
    Clear,
    /// Pause the engine; the pause survives restarts
    Pause,
    /// Lift a pause and run pending tasks until idle
    Resume,
    /// Show configuration discovery information
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Run {
                count,
                fail_every,
                step_ms,
            }) => {
                if *count == 0 {
                    return Err("--count must be at least 1".to_string());
                }
                Ok(ExecutionMode::Run(RunConfig {
                    count: *count,
                    fail_every: (*fail_every).filter(|k| *k > 0),
                    step: Duration::from_millis(*step_ms),
                }))
            }
            Some(Commands::List) => Ok(ExecutionMode::List),
            Some(Commands::RetryFailed) => Ok(ExecutionMode::RetryFailed),
            Some(Commands::Clear) => Ok(ExecutionMode::Clear),
            Some(Commands::Pause) => Ok(ExecutionMode::Pause),
            Some(Commands::Resume) => Ok(ExecutionMode::Resume),
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            None => Err(
                "No command specified. Use 'tollgate --help' to see available commands."
                    .to_string(),
            ),
        }
    }
}
