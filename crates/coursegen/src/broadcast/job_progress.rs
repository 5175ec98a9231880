//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::worker::job::{Job, JobType};

/// Phase of job processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Processing,
    Retrying,
    Completed,
    Failed,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::Processing => write!(f, "Processing"),
            JobPhase::Retrying => write!(f, "Retrying"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub job_type: JobType,
    pub course_id: String,
    pub phase: JobPhase,
    /// Human-readable message describing current activity.
    pub message: String,
    /// Course percentage, when the handler reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u8>,
    pub timestamp: DateTime<Utc>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    pub fn new(
        job_id: &str,
        job_type: JobType,
        course_id: &str,
        phase: JobPhase,
        message: &str,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            job_type,
            course_id: course_id.to_string(),
            phase,
            message: message.to_string(),
            percentage: None,
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Creates a failure event.
    pub fn failed(job_id: &str, job_type: JobType, course_id: &str, error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(job_id, job_type, course_id, JobPhase::Failed, "Job failed")
        }
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker bound to one claimed job.
    pub fn track(&self, job: &Job) -> JobProgressTracker {
        JobProgressTracker::new(job, Arc::clone(&self.sender))
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Tracks progress for a single job.
pub struct JobProgressTracker {
    job_id: String,
    job_type: JobType,
    course_id: String,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn new(job: &Job, sender: Arc<broadcast::Sender<JobProgressEvent>>) -> Self {
        Self {
            job_id: job.id.clone(),
            job_type: job.job_type(),
            course_id: job.course_id(),
            sender,
        }
    }

    pub fn update_phase(&self, phase: JobPhase, message: &str) {
        let event =
            JobProgressEvent::new(&self.job_id, self.job_type, &self.course_id, phase, message);
        let _ = self.sender.send(event);
    }

    /// Reports a handler step with the course percentage it reached.
    pub fn step(&self, message: &str, percentage: u8) {
        let mut event = JobProgressEvent::new(
            &self.job_id,
            self.job_type,
            &self.course_id,
            JobPhase::Processing,
            message,
        );
        event.percentage = Some(percentage);
        let _ = self.sender.send(event);
    }

    pub fn failed(&self, error: &str) {
        let event = JobProgressEvent::failed(&self.job_id, self.job_type, &self.course_id, error);
        let _ = self.sender.send(event);
    }
}
