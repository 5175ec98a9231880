//! Domain stores over the database: job lifecycle status, course generation
//! state and content, and generation traces.

pub mod course;
pub mod job_status;
pub mod trace;

use thiserror::Error;

use crate::db::DatabaseError;

pub use course::{CourseRecord, CourseStore, NewCourse};
pub use job_status::{JobListResponse, JobQueryParams, JobStatus, JobStatusRecord, JobStatusStore};
pub use trace::{TraceEvent, TraceStore};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("Job {job_id} is already {status}; terminal records are immutable")]
    TerminalState { job_id: String, status: JobStatus },

    #[error("Course {course_id} not found")]
    CourseNotFound { course_id: String },

    #[error("Course {course_id} already exists")]
    CourseExists { course_id: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid stored JSON: {0}")]
    Json(#[from] serde_json::Error),
}
