use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info};

use crate::error::WorkerError;
use crate::worker::JobOutcome;

use super::Orchestrator;

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Feeds worker outcomes to the orchestrator on a background thread.
pub struct PipelineDriver {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl PipelineDriver {
    /// Starts consuming `outcomes`. Each outcome is forwarded to `observer`
    /// after the orchestrator has handled it.
    pub fn spawn(
        orchestrator: Arc<Orchestrator>,
        outcomes: Receiver<JobOutcome>,
        observer: Option<Sender<JobOutcome>>,
    ) -> Result<Self, WorkerError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("coursegen-driver".to_string())
            .spawn(move || run_driver(orchestrator, outcomes, observer, flag))
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        Ok(Self { handle, shutdown })
    }

    /// Stops after the outcome currently being handled, if any.
    pub fn stop(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.join();
    }

    /// Handles every outcome still buffered and returns once all senders
    /// are gone. Call after the worker pool has stopped.
    pub fn drain(self) {
        self.join();
    }

    fn join(self) {
        if let Err(e) = self.handle.join() {
            error!("Pipeline driver panicked: {:?}", e);
        }
    }
}

fn run_driver(
    orchestrator: Arc<Orchestrator>,
    outcomes: Receiver<JobOutcome>,
    observer: Option<Sender<JobOutcome>>,
    shutdown: Arc<AtomicBool>,
) {
    info!("Pipeline driver started");

    while !shutdown.load(Ordering::Relaxed) {
        let outcome = match outcomes.recv_timeout(RECV_TIMEOUT) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Outcome channel closed");
                break;
            }
        };

        match orchestrator.handle_outcome(&outcome) {
            Ok(Some(next_job)) => debug!(job_id = %outcome.job_id, next_job = %next_job, "Pipeline advanced"),
            Ok(None) => {}
            Err(e) => error!(job_id = %outcome.job_id, course_id = %outcome.course_id, "Failed to advance pipeline: {}", e),
        }

        if let Some(tx) = &observer {
            let _ = tx.send(outcome);
        }
    }

    info!("Pipeline driver stopped");
}
