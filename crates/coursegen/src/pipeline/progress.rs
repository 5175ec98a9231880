use crate::broadcast::job_progress::{JobPhase, JobProgressBroadcaster, JobProgressTracker};
use crate::worker::job::Job;

/// Events emitted by job handlers and the worker around them.
pub enum ProgressEvent {
    Phase { phase: JobPhase, message: String },
    Step { message: String, percentage: u8 },
    Failed { error: String },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests and pools without subscribers.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges handler events to the broadcast channel.
pub struct BroadcastProgress {
    tracker: JobProgressTracker,
}

impl BroadcastProgress {
    pub fn new(job: &Job, broadcaster: &JobProgressBroadcaster) -> Self {
        Self {
            tracker: broadcaster.track(job),
        }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Phase { phase, message } => {
                self.tracker.update_phase(phase, &message);
            }
            ProgressEvent::Step {
                message,
                percentage,
            } => {
                self.tracker.step(&message, percentage);
            }
            ProgressEvent::Failed { error } => {
                self.tracker.failed(&error);
            }
        }
    }
}
