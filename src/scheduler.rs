//! Delayed-task dispatch for background job steps
//!
//! Each job transition is a short unit of work scheduled fire-and-forget;
//! retries are durable re-invocations after a delay, not blocked threads.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::model::JobId;
use crate::orchestrator::Orchestrator;

/// A scheduled invocation of the orchestrator's advance step
#[derive(Debug, Clone, Copy)]
pub struct ScheduledRun {
    pub job_id: JobId,
    pub attempt: u32,
    pub delay: Duration,
}

/// Schedules a job step to run after a delay. The orchestrator only sees
/// this trait; tests substitute a recording implementation and drive the
/// state machine manually.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, job_id: JobId, attempt: u32, delay: Duration);
}

/// Production dispatcher backed by an unbounded channel and a worker task
pub struct JobDispatcher {
    tx: mpsc::UnboundedSender<ScheduledRun>,
}

impl JobDispatcher {
    /// Create the dispatcher and its receiving end. The receiver must be
    /// handed to [`JobDispatcher::run`] once the orchestrator exists.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ScheduledRun>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Start the worker loop: each scheduled run sleeps out its delay on its
    /// own task, then advances the job. Failures are logged, never
    /// propagated — the job record carries its own error state.
    pub fn run(mut rx: mpsc::UnboundedReceiver<ScheduledRun>, orchestrator: Arc<Orchestrator>) {
        tokio::spawn(async move {
            while let Some(run) = rx.recv().await {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    if !run.delay.is_zero() {
                        tokio::time::sleep(run.delay).await;
                    }
                    debug!(job_id = %run.job_id, attempt = run.attempt, "Advancing job");
                    if let Err(e) = orchestrator.advance(run.job_id, run.attempt).await {
                        error!(job_id = %run.job_id, attempt = run.attempt, error = %e, "Job step failed");
                    }
                });
            }
        });
    }
}

impl Dispatch for JobDispatcher {
    fn dispatch(&self, job_id: JobId, attempt: u32, delay: Duration) {
        let run = ScheduledRun {
            job_id,
            attempt,
            delay,
        };
        if self.tx.send(run).is_err() {
            error!(job_id = %job_id, "Dispatcher worker is gone, dropping scheduled run");
        }
    }
}
