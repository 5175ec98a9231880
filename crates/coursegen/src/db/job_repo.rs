//! Job status repository: CRUD operations for the `job_status` table.
//!
//! This table is the durable history of job lifecycles. It is independent of
//! `job_queue`: clearing the queue never touches these rows.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job status row from the database.
#[derive(Debug, Clone)]
pub struct JobStatusRow {
    pub job_id: String,
    pub job_type: String,
    pub course_id: String,
    pub status: String,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl JobStatusRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            job_type: row.get("job_type")?,
            course_id: row.get("course_id")?,
            status: row.get("status")?,
            error_message: row.get("error_message")?,
            attempts: row.get("attempts")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

/// Query filter parameters for job status listing.
#[derive(Debug, Default, Clone)]
pub struct JobStatusFilter {
    pub status: Option<String>,
    pub course_id: Option<String>,
    pub job_type: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new status row on an already-locked connection, so callers can
/// group it with the queue insert in one transaction.
pub fn insert_on(conn: &Connection, row: &JobStatusRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO job_status (job_id, job_type, course_id, status, error_message,
         attempts, created_at, started_at, finished_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            row.job_id,
            row.job_type,
            row.course_id,
            row.status,
            row.error_message,
            row.attempts,
            row.created_at,
            row.started_at,
            row.finished_at,
        ],
    )?;
    Ok(())
}

/// Inserts a new status row.
pub fn insert(db: &Database, row: &JobStatusRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| insert_on(conn, row))
}

/// Overwrites the mutable lifecycle columns of a row.
pub fn update(db: &Database, row: &JobStatusRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE job_status SET status=?2, error_message=?3, attempts=?4,
             started_at=?5, finished_at=?6
             WHERE job_id=?1",
            params![
                row.job_id,
                row.status,
                row.error_message,
                row.attempts,
                row.started_at,
                row.finished_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a status row by job ID.
pub fn find_by_id(db: &Database, job_id: &str) -> Result<Option<JobStatusRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM job_status WHERE job_id = ?1",
                params![job_id],
                JobStatusRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Queries status rows with filters, returning (rows, total_count).
pub fn query(
    db: &Database,
    filter: &JobStatusFilter,
) -> Result<(Vec<JobStatusRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref course_id) = filter.course_id {
            conditions.push(format!("course_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(course_id.clone()));
        }
        if let Some(ref job_type) = filter.job_type {
            conditions.push(format!("job_type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(job_type.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM job_status {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM job_status {} ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobStatusRow> = stmt
            .query_map(params_ref.as_slice(), JobStatusRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts queued or processing rows of `job_type` for a course.
pub fn count_open(db: &Database, course_id: &str, job_type: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM job_status
             WHERE course_id = ?1 AND job_type = ?2 AND status IN ('queued', 'processing')",
            params![course_id, job_type],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Most recently created row of `job_type` for a course.
pub fn find_latest(
    db: &Database,
    course_id: &str,
    job_type: &str,
) -> Result<Option<JobStatusRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM job_status WHERE course_id = ?1 AND job_type = ?2
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![course_id, job_type],
                JobStatusRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}
