//! Simulated jobs driven by the `tollgate` binary

use crate::engine::{EngineEvent, TaskEngine};
use crate::task::{Task, TaskContext, TaskError, TaskWork};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Number of progress steps a simulated job goes through
pub const JOB_STEPS: u8 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulatedJob {
    pub index: usize,
    /// Fail the first attempt; a retry succeeds
    pub fail_first_attempt: bool,
}

/// Work function that sleeps through a fixed number of steps
pub struct SimulatedWork {
    step: Duration,
}

impl SimulatedWork {
    pub fn new(step: Duration) -> Self {
        Self { step }
    }
}

#[async_trait::async_trait]
impl TaskWork<SimulatedJob> for SimulatedWork {
    async fn execute(&self, task: Task<SimulatedJob>, ctx: TaskContext) -> Result<(), TaskError> {
        // A resumed job picks up where its persisted progress left off
        let first_step = if ctx.is_retry() {
            task.progress / (100 / JOB_STEPS)
        } else {
            0
        };

        for step in first_step..JOB_STEPS {
            tokio::time::sleep(self.step).await;
            ctx.report_progress((step + 1) * (100 / JOB_STEPS));

            if task.payload.fail_first_attempt && task.attempts == 1 && step == JOB_STEPS / 2 {
                return Err(TaskError::new(
                    "simulated",
                    format!("job {} failed halfway", task.payload.index),
                ));
            }
        }
        Ok(())
    }
}

/// Build `count` jobs, marking every `fail_every`-th one to fail its first attempt
pub fn simulated_jobs(count: usize, fail_every: Option<usize>) -> Vec<Task<SimulatedJob>> {
    (1..=count)
        .map(|index| {
            let fail_first_attempt = fail_every.is_some_and(|k| k > 0 && index % k == 0);
            Task::new(
                format!("job-{}", uuid::Uuid::new_v4()),
                SimulatedJob {
                    index,
                    fail_first_attempt,
                },
            )
        })
        .collect()
}

/// How a wait for the engine ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Idle,
    Suspended,
    Interrupted,
    Nothing,
}

/// Discard events emitted before the next operation
pub fn drain_events(events: &mut mpsc::UnboundedReceiver<EngineEvent>) {
    while events.try_recv().is_ok() {}
}

/// Block until the engine reports idle or suspended, or until Ctrl-C
pub async fn wait_until_settled(
    engine: &TaskEngine<SimulatedJob>,
    events: &mut mpsc::UnboundedReceiver<EngineEvent>,
) -> WaitOutcome {
    if !engine.has_work_in_flight() && engine.tasks_remaining() == 0 {
        return WaitOutcome::Nothing;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(EngineEvent::Idle { .. }) => return WaitOutcome::Idle,
                Some(EngineEvent::Suspended { reason }) => {
                    println!("Engine suspended: {}", reason);
                    return WaitOutcome::Suspended;
                }
                Some(EngineEvent::TaskProgress { task_id, progress }) => {
                    debug!("{}: {}%", task_id, progress);
                }
                Some(_) => {}
                None => return WaitOutcome::Interrupted,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, leaving pending tasks for the next run");
                return WaitOutcome::Interrupted;
            }
        }
    }
}
