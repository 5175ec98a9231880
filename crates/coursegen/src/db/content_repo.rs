//! Course content repository: source documents, per-stage outputs and the
//! generated lesson documents that scoped regeneration edits.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A source document attached to a course before generation starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRow {
    pub course_id: String,
    pub name: String,
    pub content: String,
}

/// A generated lesson document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonRow {
    pub course_id: String,
    pub lesson_id: String,
    pub position: u32,
    pub title: String,
    pub content: String,
    pub updated_at: String,
    /// Regeneration job that last rewrote the content.
    pub last_job_id: Option<String>,
}

impl LessonRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            course_id: row.get("course_id")?,
            lesson_id: row.get("lesson_id")?,
            position: row.get("position")?,
            title: row.get("title")?,
            content: row.get("content")?,
            updated_at: row.get("updated_at")?,
            last_job_id: row.get("last_job_id")?,
        })
    }
}

/// Inserts or replaces a source document.
pub fn upsert_document(db: &Database, doc: &DocumentRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO course_documents (course_id, name, content) VALUES (?1, ?2, ?3)
             ON CONFLICT(course_id, name) DO UPDATE SET content = excluded.content",
            params![doc.course_id, doc.name, doc.content],
        )?;
        Ok(())
    })
}

/// Lists a course's source documents in name order.
pub fn list_documents(db: &Database, course_id: &str) -> Result<Vec<DocumentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT course_id, name, content FROM course_documents
             WHERE course_id = ?1 ORDER BY name ASC",
        )?;
        let rows = stmt
            .query_map(params![course_id], |r| {
                Ok(DocumentRow {
                    course_id: r.get(0)?,
                    name: r.get(1)?,
                    content: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Stores the text a stage produced, replacing any earlier run's output.
pub fn upsert_stage_output(
    db: &Database,
    course_id: &str,
    stage: u8,
    output: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO stage_outputs (course_id, stage, output, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(course_id, stage) DO UPDATE SET
               output = excluded.output, updated_at = excluded.updated_at",
            params![course_id, stage, output, updated_at],
        )?;
        Ok(())
    })
}

/// Reads a stage's stored output.
pub fn find_stage_output(
    db: &Database,
    course_id: &str,
    stage: u8,
) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let output = conn
            .query_row(
                "SELECT output FROM stage_outputs WHERE course_id = ?1 AND stage = ?2",
                params![course_id, stage],
                |r| r.get(0),
            )
            .optional()?;
        Ok(output)
    })
}

/// Inserts or replaces a lesson document.
pub fn upsert_lesson(db: &Database, lesson: &LessonRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO lessons
               (course_id, lesson_id, position, title, content, updated_at, last_job_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(course_id, lesson_id) DO UPDATE SET
               position = excluded.position, title = excluded.title,
               content = excluded.content, updated_at = excluded.updated_at,
               last_job_id = excluded.last_job_id",
            params![
                lesson.course_id,
                lesson.lesson_id,
                lesson.position,
                lesson.title,
                lesson.content,
                lesson.updated_at,
                lesson.last_job_id,
            ],
        )?;
        Ok(())
    })
}

/// Replaces the content of an existing lesson on behalf of `job_id`.
pub fn update_lesson_content(
    db: &Database,
    course_id: &str,
    lesson_id: &str,
    content: &str,
    job_id: &str,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE lessons SET content = ?3, last_job_id = ?4, updated_at = ?5
             WHERE course_id = ?1 AND lesson_id = ?2",
            params![course_id, lesson_id, content, job_id, updated_at],
        )?;
        Ok(affected > 0)
    })
}

/// Finds one lesson.
pub fn find_lesson(
    db: &Database,
    course_id: &str,
    lesson_id: &str,
) -> Result<Option<LessonRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM lessons WHERE course_id = ?1 AND lesson_id = ?2",
                params![course_id, lesson_id],
                LessonRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists a course's lessons in position order.
pub fn list_lessons(db: &Database, course_id: &str) -> Result<Vec<LessonRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM lessons WHERE course_id = ?1 ORDER BY position ASC")?;
        let rows = stmt
            .query_map(params![course_id], LessonRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
