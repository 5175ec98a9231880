use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::regeneration::ContextTier;

/// Longest sleep a test job may request.
pub const MAX_TEST_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    #[serde(rename = "TEST_JOB", alias = "TEST")]
    Test,
    Initialize,
    ProcessDocuments,
    Classify,
    Analyze,
    GenerateStructure,
    GenerateContent,
    RegenerateSection,
}

impl JobType {
    pub const ALL: [JobType; 8] = [
        JobType::Test,
        JobType::Initialize,
        JobType::ProcessDocuments,
        JobType::Classify,
        JobType::Analyze,
        JobType::GenerateStructure,
        JobType::GenerateContent,
        JobType::RegenerateSection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Test => "TEST_JOB",
            JobType::Initialize => "INITIALIZE",
            JobType::ProcessDocuments => "PROCESS_DOCUMENTS",
            JobType::Classify => "CLASSIFY",
            JobType::Analyze => "ANALYZE",
            JobType::GenerateStructure => "GENERATE_STRUCTURE",
            JobType::GenerateContent => "GENERATE_CONTENT",
            JobType::RegenerateSection => "REGENERATE_SECTION",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        if upper == "TEST" {
            return Ok(JobType::Test);
        }
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| ValidationError::UnknownJobType(s.to_string()))
    }
}

/// Wire payload of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub job_type: JobType,
    pub organization_id: Uuid,
    pub course_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Test-only: fail deliberately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_fail: Option<bool>,
    /// Test-only: sleep before finishing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

impl JobPayload {
    pub fn new(job_type: JobType, organization_id: Uuid, course_id: Uuid, user_id: Uuid) -> Self {
        Self {
            job_type,
            organization_id,
            course_id,
            user_id,
            created_at: Utc::now(),
            metadata: None,
            message: None,
            should_fail: None,
            delay_ms: None,
        }
    }

    /// A `TEST_JOB` payload with random ids.
    pub fn test_job(should_fail: bool, delay_ms: Option<u64>) -> Self {
        let mut payload = Self::new(JobType::Test, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        payload.should_fail = Some(should_fail);
        payload.delay_ms = delay_ms;
        payload
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Checks the payload before it is queued.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.job_type != JobType::Test {
            if self.should_fail.is_some() {
                return Err(ValidationError::TestOnlyField {
                    field: "shouldFail",
                });
            }
            if self.delay_ms.is_some() {
                return Err(ValidationError::TestOnlyField { field: "delayMs" });
            }
        }

        if let Some(delay) = self.delay_ms {
            if delay > MAX_TEST_DELAY_MS {
                return Err(ValidationError::InvalidField {
                    field: "delayMs",
                    reason: format!("must be at most {} ms", MAX_TEST_DELAY_MS),
                });
            }
        }

        if self.job_type == JobType::RegenerateSection {
            self.regeneration()?;
        }

        Ok(())
    }

    /// Decodes the metadata of a `REGENERATE_SECTION` job.
    pub fn regeneration(&self) -> Result<RegenerationMetadata, ValidationError> {
        let metadata = self
            .metadata
            .clone()
            .ok_or(ValidationError::MissingField("metadata"))?;
        let parsed: RegenerationMetadata =
            serde_json::from_value(metadata).map_err(|e| ValidationError::InvalidField {
                field: "metadata",
                reason: e.to_string(),
            })?;
        if parsed.lesson_id.trim().is_empty() {
            return Err(ValidationError::MissingField("metadata.lessonId"));
        }
        Ok(parsed)
    }
}

/// What a `REGENERATE_SECTION` job should rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerationMetadata {
    pub lesson_id: String,
    pub instruction: String,
    /// `None` regenerates the whole lesson.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    pub tier: ContextTier,
}

/// A job claimed from the queue.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    /// 1-based delivery count.
    pub attempt: u32,
    pub payload: JobPayload,
}

impl Job {
    pub fn job_type(&self) -> JobType {
        self.payload.job_type
    }

    pub fn course_id(&self) -> String {
        self.payload.course_id.to_string()
    }
}

/// How one delivery of a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Completed,
    Failed,
    /// Put back on the queue with a backoff.
    Retrying,
    /// Acknowledged without effect because the course was cancelled.
    Cancelled,
    /// Redelivered job whose status was already terminal.
    Skipped,
}

/// Published by a worker after the status store has been updated.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: String,
    pub job_type: JobType,
    pub course_id: String,
    pub attempt: u32,
    pub kind: OutcomeKind,
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn new(job: &Job, kind: OutcomeKind, error: Option<String>) -> Self {
        Self {
            job_id: job.id.clone(),
            job_type: job.job_type(),
            course_id: job.course_id(),
            attempt: job.attempt,
            kind,
            error,
        }
    }
}
