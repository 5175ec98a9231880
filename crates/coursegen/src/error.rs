use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoursegenError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Invalid job: {0}")]
    Validation(#[from] ValidationError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] crate::orchestrator::OrchestratorError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// A job payload rejected before it reaches the queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Field '{field}' is only accepted on TEST_JOB payloads")]
    TestOnlyField { field: &'static str },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Unknown job type '{0}'")]
    UnknownJobType(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Job rejected: {0}")]
    Rejected(#[from] ValidationError),

    #[error("Queue storage failed: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Corrupt payload for job {job_id}: {source}")]
    CorruptPayload {
        job_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures of the section parser/merger. All of them are caller errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Section '{section_id}' not found in document")]
    SectionNotFound { section_id: String },

    #[error("Lesson '{lesson_id}' not found")]
    LessonNotFound { lesson_id: String },

    #[error("Lesson '{lesson_id}' is about {tokens} tokens, over the {limit} a whole-lesson edit can see; edit it section by section")]
    LessonTooLarge {
        lesson_id: String,
        tokens: usize,
        limit: usize,
    },
}

pub type Result<T> = std::result::Result<T, CoursegenError>;
