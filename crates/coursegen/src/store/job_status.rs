//! Job status store with persistent database storage.
//!
//! The durable record of every job's lifecycle and the only place callers
//! read job state from. The queue's own rows are dispatch bookkeeping and may
//! be cleared without losing any of this history.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::db::job_repo::{self, JobStatusFilter, JobStatusRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::worker::job::JobType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn parse(s: &str, job_id: &str) -> JobStatus {
        match s {
            "queued" => JobStatus::Queued,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            other => {
                log::warn!(
                    "Unknown job status '{}' for job {}, defaulting to Processing",
                    other,
                    job_id
                );
                JobStatus::Processing
            }
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job's lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusRecord {
    pub job_id: String,
    pub job_type: String,
    pub course_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Deliveries so far.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobStatusRecord {
    fn from_row(row: &JobStatusRow) -> Self {
        Self {
            job_id: row.job_id.clone(),
            job_type: row.job_type.clone(),
            course_id: row.course_id.clone(),
            status: JobStatus::parse(&row.status, &row.job_id),
            error_message: row.error_message.clone(),
            attempts: row.attempts,
            created_at: parse_timestamp(&row.created_at),
            started_at: row.started_at.as_deref().map(parse_timestamp),
            finished_at: row.finished_at.as_deref().map(parse_timestamp),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Query parameters for job listing.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobQueryParams {
    pub status: Option<JobStatus>,
    pub course_id: Option<String>,
    pub job_type: Option<JobType>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Response for job listing with pagination.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListResponse {
    pub jobs: Vec<JobStatusRecord>,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

/// Persistent job status store backed by rusqlite.
#[derive(Clone)]
pub struct JobStatusStore {
    db: Database,
}

impl JobStatusStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Writes the initial `queued` row on an already-open transaction, so it
    /// commits together with the queue row.
    pub fn record_queued(
        conn: &Connection,
        job_id: &str,
        job_type: JobType,
        course_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        job_repo::insert_on(
            conn,
            &JobStatusRow {
                job_id: job_id.to_string(),
                job_type: job_type.as_str().to_string(),
                course_id: course_id.to_string(),
                status: JobStatus::Queued.as_str().to_string(),
                error_message: None,
                attempts: 0,
                created_at: format_timestamp(created_at),
                started_at: None,
                finished_at: None,
            },
        )
    }

    pub fn get(&self, job_id: &str) -> Result<Option<JobStatusRecord>, StoreError> {
        Ok(job_repo::find_by_id(&self.db, job_id)?
            .as_ref()
            .map(JobStatusRecord::from_row))
    }

    /// Loads a row that may still change.
    fn load_mutable(&self, job_id: &str) -> Result<JobStatusRow, StoreError> {
        let row = job_repo::find_by_id(&self.db, job_id)?.ok_or_else(|| {
            StoreError::JobNotFound {
                job_id: job_id.to_string(),
            }
        })?;
        let status = JobStatus::parse(&row.status, &row.job_id);
        if status.is_terminal() {
            return Err(StoreError::TerminalState {
                job_id: job_id.to_string(),
                status,
            });
        }
        Ok(row)
    }

    pub fn mark_processing(&self, job_id: &str, attempt: u32) -> Result<(), StoreError> {
        let mut row = self.load_mutable(job_id)?;
        row.status = JobStatus::Processing.as_str().to_string();
        row.attempts = attempt;
        row.started_at = Some(format_timestamp(Utc::now()));
        job_repo::update(&self.db, &row)?;
        Ok(())
    }

    pub fn mark_completed(&self, job_id: &str) -> Result<(), StoreError> {
        let mut row = self.load_mutable(job_id)?;
        row.status = JobStatus::Completed.as_str().to_string();
        row.error_message = None;
        row.finished_at = Some(format_timestamp(Utc::now()));
        job_repo::update(&self.db, &row)?;
        Ok(())
    }

    pub fn mark_failed(&self, job_id: &str, error_message: &str) -> Result<(), StoreError> {
        let mut row = self.load_mutable(job_id)?;
        row.status = JobStatus::Failed.as_str().to_string();
        row.error_message = Some(error_message.to_string());
        row.finished_at = Some(format_timestamp(Utc::now()));
        job_repo::update(&self.db, &row)?;
        Ok(())
    }

    /// Puts a job back to `queued` after a retryable failure, keeping the
    /// error for visibility.
    pub fn mark_retrying(&self, job_id: &str, error_message: &str) -> Result<(), StoreError> {
        let mut row = self.load_mutable(job_id)?;
        row.status = JobStatus::Queued.as_str().to_string();
        row.error_message = Some(error_message.to_string());
        job_repo::update(&self.db, &row)?;
        Ok(())
    }

    pub fn list(&self, params: &JobQueryParams) -> Result<JobListResponse, StoreError> {
        let filter = JobStatusFilter {
            status: params.status.map(|s| s.as_str().to_string()),
            course_id: params.course_id.clone(),
            job_type: params.job_type.map(|t| t.as_str().to_string()),
            limit: params.limit,
            offset: params.offset,
        };
        let (rows, total) = job_repo::query(&self.db, &filter)?;
        Ok(JobListResponse {
            jobs: rows.iter().map(JobStatusRecord::from_row).collect(),
            total,
            limit: params.limit,
            offset: params.offset,
        })
    }

    /// True when a job of `job_type` for the course is queued or running.
    pub fn has_open_job(&self, course_id: &str, job_type: JobType) -> Result<bool, StoreError> {
        Ok(job_repo::count_open(&self.db, course_id, job_type.as_str())? > 0)
    }

    /// The newest job of `job_type` for the course, in any state.
    pub fn latest_for(
        &self,
        course_id: &str,
        job_type: JobType,
    ) -> Result<Option<JobStatusRecord>, StoreError> {
        Ok(job_repo::find_latest(&self.db, course_id, job_type.as_str())?
            .as_ref()
            .map(JobStatusRecord::from_row))
    }

    /// Polls until the job is terminal. Returns `None` on timeout.
    pub fn wait_for_terminal(
        &self,
        job_id: &str,
        timeout: Duration,
        poll: Duration,
    ) -> Result<Option<JobStatusRecord>, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            let record = self.get(job_id)?.ok_or_else(|| StoreError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
            if record.is_terminal() {
                return Ok(Some(record));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(poll);
        }
    }
}
