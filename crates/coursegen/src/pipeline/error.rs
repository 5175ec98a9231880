use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::{DocumentError, ValidationError};
use crate::store::StoreError;
use crate::worker::job::JobType;

/// Why a job handler did not finish.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Invalid job: {0}")]
    Validation(#[from] ValidationError),

    #[error("Upstream call failed: {0}")]
    Upstream(String),

    #[error("Course {course_id} was cancelled")]
    Cancelled { course_id: String },

    #[error("Intentional test failure: {0}")]
    Intentional(String),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("No handler registered for job type {0}")]
    MissingHandler(JobType),

    #[error("Job handler panicked: {0}")]
    Panicked(String),
}

impl JobError {
    /// Upstream failures and storage hiccups are worth another attempt;
    /// everything else fails the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Upstream(_) | JobError::Database(_) => true,
            JobError::Store(StoreError::Database(_)) => true,
            _ => false,
        }
    }
}

impl From<crate::pipeline::capabilities::CapabilityError> for JobError {
    fn from(e: crate::pipeline::capabilities::CapabilityError) -> Self {
        JobError::Upstream(e.to_string())
    }
}
