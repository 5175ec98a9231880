//! Append-only generation traces. Read for observability only, never for
//! control flow.

use std::time::Duration;

use chrono::Utc;

use super::StoreError;
use crate::db::trace_repo::{self, TraceRow};
use crate::db::{format_timestamp, Database};

/// Longest stored input/output excerpt, in characters.
const MAX_EXCERPT_CHARS: usize = 4_000;

/// One pipeline step to record.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub course_id: String,
    pub job_id: Option<String>,
    pub stage: u8,
    pub phase: String,
    pub step_name: String,
    pub input_data: Option<String>,
    pub output_data: Option<String>,
    pub tokens_used: u32,
    pub duration: Duration,
}

impl TraceEvent {
    pub fn new(course_id: &str, stage: u8, phase: &str, step_name: &str) -> Self {
        Self {
            course_id: course_id.to_string(),
            job_id: None,
            stage,
            phase: phase.to_string(),
            step_name: step_name.to_string(),
            input_data: None,
            output_data: None,
            tokens_used: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn job(mut self, job_id: &str) -> Self {
        self.job_id = Some(job_id.to_string());
        self
    }

    pub fn input(mut self, input: &str) -> Self {
        self.input_data = Some(excerpt(input));
        self
    }

    pub fn output(mut self, output: &str) -> Self {
        self.output_data = Some(excerpt(output));
        self
    }

    pub fn tokens(mut self, tokens_used: u32) -> Self {
        self.tokens_used = tokens_used;
        self
    }

    pub fn took(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(MAX_EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

#[derive(Clone)]
pub struct TraceStore {
    db: Database,
}

impl TraceStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Records an event, stamped with the current time.
    pub fn append(&self, event: TraceEvent) -> Result<i64, StoreError> {
        let row = TraceRow {
            id: 0,
            course_id: event.course_id,
            job_id: event.job_id,
            stage: event.stage,
            phase: event.phase,
            step_name: event.step_name,
            input_data: event.input_data,
            output_data: event.output_data,
            tokens_used: event.tokens_used,
            duration_ms: i64::try_from(event.duration.as_millis()).unwrap_or(i64::MAX),
            created_at: format_timestamp(Utc::now()),
        };
        Ok(trace_repo::append(&self.db, &row)?)
    }

    pub fn list_for_course(&self, course_id: &str) -> Result<Vec<TraceRow>, StoreError> {
        Ok(trace_repo::list_for_course(&self.db, course_id)?)
    }

    pub fn total_tokens(&self, course_id: &str, stage: Option<u8>) -> Result<u64, StoreError> {
        Ok(trace_repo::total_tokens(&self.db, course_id, stage)?)
    }
}
