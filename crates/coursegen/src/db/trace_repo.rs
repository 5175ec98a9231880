//! Generation trace repository: append-only observability log.
//!
//! Only `append` and reads are exposed; the table also carries a trigger
//! that aborts any UPDATE.

use rusqlite::{params, Row};
use serde::Serialize;

use super::{Database, DatabaseError};

/// One recorded pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRow {
    /// Assigned by the database; ignored on append.
    pub id: i64,
    pub course_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub stage: u8,
    pub phase: String,
    pub step_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_data: Option<String>,
    pub tokens_used: u32,
    pub duration_ms: i64,
    pub created_at: String,
}

impl TraceRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            course_id: row.get("course_id")?,
            job_id: row.get("job_id")?,
            stage: row.get("stage")?,
            phase: row.get("phase")?,
            step_name: row.get("step_name")?,
            input_data: row.get("input_data")?,
            output_data: row.get("output_data")?,
            tokens_used: row.get("tokens_used")?,
            duration_ms: row.get("duration_ms")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Appends a trace and returns its assigned id.
pub fn append(db: &Database, trace: &TraceRow) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO generation_traces (course_id, job_id, stage, phase, step_name,
             input_data, output_data, tokens_used, duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                trace.course_id,
                trace.job_id,
                trace.stage,
                trace.phase,
                trace.step_name,
                trace.input_data,
                trace.output_data,
                trace.tokens_used,
                trace.duration_ms,
                trace.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Lists a course's traces in insertion order.
pub fn list_for_course(db: &Database, course_id: &str) -> Result<Vec<TraceRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM generation_traces WHERE course_id = ?1 ORDER BY id ASC")?;
        let rows = stmt
            .query_map(params![course_id], TraceRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Sums tokens spent on a course, optionally restricted to one stage.
pub fn total_tokens(
    db: &Database,
    course_id: &str,
    stage: Option<u8>,
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let total: u64 = match stage {
            Some(stage) => conn.query_row(
                "SELECT COALESCE(SUM(tokens_used), 0) FROM generation_traces
                 WHERE course_id = ?1 AND stage = ?2",
                params![course_id, stage],
                |r| r.get(0),
            )?,
            None => conn.query_row(
                "SELECT COALESCE(SUM(tokens_used), 0) FROM generation_traces WHERE course_id = ?1",
                params![course_id],
                |r| r.get(0),
            )?,
        };
        Ok(total)
    })
}
