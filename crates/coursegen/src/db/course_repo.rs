//! Course repository: generation state rows in the `courses` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw course row from the database.
#[derive(Debug, Clone)]
pub struct CourseRow {
    pub id: String,
    pub organization_id: String,
    pub user_id: String,
    pub generation_status: String,
    /// JSON-encoded generation progress.
    pub generation_progress: Option<String>,
    pub failed_at_stage: Option<u8>,
    pub has_documents: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl CourseRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            organization_id: row.get("organization_id")?,
            user_id: row.get("user_id")?,
            generation_status: row.get("generation_status")?,
            generation_progress: row.get("generation_progress")?,
            failed_at_stage: row.get("failed_at_stage")?,
            has_documents: row.get("has_documents")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new course row.
pub fn insert(db: &Database, course: &CourseRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO courses (id, organization_id, user_id, generation_status,
             generation_progress, failed_at_stage, has_documents, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                course.id,
                course.organization_id,
                course.user_id,
                course.generation_status,
                course.generation_progress,
                course.failed_at_stage,
                course.has_documents,
                course.created_at,
                course.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites the generation state of an existing course.
pub fn update(db: &Database, course: &CourseRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| update_on(conn, course))
}

/// Same as [`update`] on an already-locked connection.
pub fn update_on(conn: &Connection, course: &CourseRow) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE courses SET generation_status=?2, generation_progress=?3,
         failed_at_stage=?4, has_documents=?5, updated_at=?6
         WHERE id=?1",
        params![
            course.id,
            course.generation_status,
            course.generation_progress,
            course.failed_at_stage,
            course.has_documents,
            course.updated_at,
        ],
    )?;
    Ok(())
}

/// Finds a course by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<CourseRow>, DatabaseError> {
    db.with_conn(|conn| find_by_id_on(conn, id))
}

pub fn find_by_id_on(conn: &Connection, id: &str) -> Result<Option<CourseRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM courses WHERE id = ?1",
            params![id],
            CourseRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Reads only the status column. Cheap enough for cancellation checkpoints.
pub fn find_status(db: &Database, id: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let status = conn
            .query_row(
                "SELECT generation_status FROM courses WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(status)
    })
}

/// Updates only the status and updated_at of a course.
pub fn update_status(
    db: &Database,
    id: &str,
    status: &str,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE courses SET generation_status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status, updated_at],
        )?;
        Ok(affected > 0)
    })
}

/// Lists courses whose status is not terminal, oldest first.
pub fn list_non_terminal(db: &Database) -> Result<Vec<CourseRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM courses
             WHERE generation_status NOT IN ('completed', 'failed', 'cancelled')
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map([], CourseRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
