//! Course generation state, source documents, stage outputs and lessons.
//!
//! Every state change is a read-modify-write inside one transaction, so a
//! cancellation cannot be lost between a handler's read and its write.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::StoreError;
use crate::db::content_repo::{self, DocumentRow, LessonRow};
use crate::db::course_repo::{self, CourseRow};
use crate::db::{format_timestamp, parse_timestamp, Database};
use crate::stage::{
    calculate_progress, CourseStatus, GenerationProgress, Stage, STATUS_CANCELLED,
    STATUS_COMPLETED, STATUS_FAILED, STATUS_PENDING,
};

/// A course about to be created, with its source documents.
#[derive(Debug, Clone)]
pub struct NewCourse {
    pub course_id: String,
    pub organization_id: String,
    pub user_id: String,
    /// `(name, raw content)` pairs.
    pub documents: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRecord {
    pub id: String,
    pub organization_id: String,
    pub user_id: String,
    pub generation_status: String,
    /// Raw stored progress JSON. Kept unparsed so recovery can tell
    /// malformed data from missing data.
    #[serde(skip)]
    pub progress_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at_stage: Option<u8>,
    pub has_documents: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CourseRecord {
    fn from_row(row: CourseRow) -> Self {
        Self {
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
            id: row.id,
            organization_id: row.organization_id,
            user_id: row.user_id,
            generation_status: row.generation_status,
            progress_json: row.generation_progress,
            failed_at_stage: row.failed_at_stage,
            has_documents: row.has_documents,
        }
    }

    pub fn status(&self) -> CourseStatus {
        CourseStatus::parse(&self.generation_status)
    }

    /// Parsed progress. Missing or malformed JSON reads as empty.
    pub fn progress(&self) -> GenerationProgress {
        decode_progress(&self.id, self.progress_json.as_deref())
    }
}

fn decode_progress(course_id: &str, json: Option<&str>) -> GenerationProgress {
    match json {
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
            log::warn!(
                "Course {} has unreadable generation_progress, treating as empty: {}",
                course_id,
                e
            );
            GenerationProgress::default()
        }),
        None => GenerationProgress::default(),
    }
}

/// Mutable view handed to a course update closure.
pub struct CourseUpdate<'a> {
    pub status: &'a mut String,
    pub progress: &'a mut GenerationProgress,
    pub failed_at_stage: &'a mut Option<u8>,
    pub has_documents: bool,
}

#[derive(Clone)]
pub struct CourseStore {
    db: Database,
}

impl CourseStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Creates a `pending` course and attaches its documents.
    pub fn create(&self, course: &NewCourse) -> Result<CourseRecord, StoreError> {
        if course_repo::find_by_id(&self.db, &course.course_id)?.is_some() {
            return Err(StoreError::CourseExists {
                course_id: course.course_id.clone(),
            });
        }

        let now = format_timestamp(Utc::now());
        let progress = GenerationProgress {
            percentage: 0,
            message: "Queued for generation".to_string(),
            steps: Vec::new(),
        };
        let row = CourseRow {
            id: course.course_id.clone(),
            organization_id: course.organization_id.clone(),
            user_id: course.user_id.clone(),
            generation_status: STATUS_PENDING.to_string(),
            generation_progress: Some(serde_json::to_string(&progress)?),
            failed_at_stage: None,
            has_documents: !course.documents.is_empty(),
            created_at: now.clone(),
            updated_at: now,
        };
        course_repo::insert(&self.db, &row)?;

        for (name, content) in &course.documents {
            content_repo::upsert_document(
                &self.db,
                &DocumentRow {
                    course_id: course.course_id.clone(),
                    name: name.clone(),
                    content: content.clone(),
                },
            )?;
        }

        log::info!(
            "Created course {} ({} document(s))",
            course.course_id,
            course.documents.len()
        );
        Ok(CourseRecord::from_row(row))
    }

    pub fn get(&self, course_id: &str) -> Result<Option<CourseRecord>, StoreError> {
        Ok(course_repo::find_by_id(&self.db, course_id)?.map(CourseRecord::from_row))
    }

    pub fn require(&self, course_id: &str) -> Result<CourseRecord, StoreError> {
        self.get(course_id)?.ok_or_else(|| StoreError::CourseNotFound {
            course_id: course_id.to_string(),
        })
    }

    pub fn status(&self, course_id: &str) -> Result<CourseStatus, StoreError> {
        course_repo::find_status(&self.db, course_id)?
            .map(|s| CourseStatus::parse(&s))
            .ok_or_else(|| StoreError::CourseNotFound {
                course_id: course_id.to_string(),
            })
    }

    /// Cancellation checkpoint for handlers. A missing course counts as
    /// cancelled since there is nothing left to generate for.
    pub fn is_cancelled(&self, course_id: &str) -> Result<bool, StoreError> {
        Ok(match course_repo::find_status(&self.db, course_id)? {
            Some(status) => CourseStatus::parse(&status) == CourseStatus::Cancelled,
            None => true,
        })
    }

    /// Applies `f` to the course state and persists the result atomically.
    /// Returns whatever `f` returns; `Ok(None)` from `f` leaves the row as is.
    pub fn update<T, F>(&self, course_id: &str, f: F) -> Result<Option<T>, StoreError>
    where
        F: FnOnce(CourseUpdate<'_>) -> Option<T>,
    {
        let result = self.db.with_transaction(|conn| {
            let Some(mut row) = course_repo::find_by_id_on(conn, course_id)? else {
                return Ok(Err(StoreError::CourseNotFound {
                    course_id: course_id.to_string(),
                }));
            };

            let mut progress = decode_progress(course_id, row.generation_progress.as_deref());
            let outcome = f(CourseUpdate {
                status: &mut row.generation_status,
                progress: &mut progress,
                failed_at_stage: &mut row.failed_at_stage,
                has_documents: row.has_documents,
            });

            if outcome.is_some() {
                row.generation_progress = Some(serde_json::to_string(&progress)?);
                row.updated_at = format_timestamp(Utc::now());
                course_repo::update_on(conn, &row)?;
            }
            Ok(Ok(outcome))
        })?;
        result
    }

    /// Sets the status and returns the previous one. The stored percentage
    /// follows the new status unless it is a failure or cancellation.
    pub fn set_status(&self, course_id: &str, status: &str) -> Result<String, StoreError> {
        let previous = self.update(course_id, |course| {
            let previous = std::mem::replace(course.status, status.to_string());
            match CourseStatus::parse(status) {
                CourseStatus::Failed | CourseStatus::Cancelled => {}
                _ => {
                    course.progress.percentage = calculate_progress(status, course.has_documents)
                }
            }
            Some(previous)
        })?;
        previous.ok_or_else(|| StoreError::CourseNotFound {
            course_id: course_id.to_string(),
        })
    }

    pub fn update_progress<F>(&self, course_id: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut GenerationProgress),
    {
        self.update(course_id, |course| {
            f(course.progress);
            Some(())
        })?;
        Ok(())
    }

    /// Moves the course into `stage`'s running status. Returns `false` and
    /// writes nothing when the course has already reached a terminal status.
    pub fn begin_stage(&self, course_id: &str, stage: Stage) -> Result<bool, StoreError> {
        let applied = self.update(course_id, |course| {
            if CourseStatus::parse(course.status).is_terminal() {
                return None;
            }
            let status = stage.running_status();
            *course.status = status.to_string();
            course.progress.start_step(stage.step_name(), Utc::now());
            course.progress.percentage = calculate_progress(status, course.has_documents);
            course.progress.message = stage.label().to_string();
            Some(())
        })?;
        Ok(applied.is_some())
    }

    /// Marks `stage` finished. Same terminal-status rule as [`begin_stage`].
    ///
    /// [`begin_stage`]: CourseStore::begin_stage
    pub fn complete_stage(&self, course_id: &str, stage: Stage) -> Result<bool, StoreError> {
        let applied = self.update(course_id, |course| {
            if CourseStatus::parse(course.status).is_terminal() {
                return None;
            }
            let status = stage.complete_status();
            course.progress.complete_step(stage.step_name(), Utc::now());
            course.progress.percentage = calculate_progress(&status, course.has_documents);
            course.progress.message = format!("{} complete", stage.label());
            *course.status = status;
            Some(())
        })?;
        Ok(applied.is_some())
    }

    /// Final transition after the last stage.
    pub fn mark_completed(&self, course_id: &str) -> Result<bool, StoreError> {
        let applied = self.update(course_id, |course| {
            if CourseStatus::parse(course.status).is_terminal() {
                return None;
            }
            *course.status = STATUS_COMPLETED.to_string();
            course.progress.percentage = 100;
            course.progress.message = "Course generation complete".to_string();
            Some(())
        })?;
        Ok(applied.is_some())
    }

    /// Recovery path: completes the course and backfills every step.
    pub fn force_completed(&self, course_id: &str) -> Result<String, StoreError> {
        let previous = self.update(course_id, |course| {
            let previous = std::mem::replace(course.status, STATUS_COMPLETED.to_string());
            course.progress.force_complete(Utc::now());
            course.progress.message = "Course generation complete".to_string();
            Some(previous)
        })?;
        previous.ok_or_else(|| StoreError::CourseNotFound {
            course_id: course_id.to_string(),
        })
    }

    /// Fails the course, recording the stage that failed when known.
    /// Returns the previous status.
    pub fn mark_failed(
        &self,
        course_id: &str,
        failed_at_stage: Option<u8>,
        message: &str,
    ) -> Result<String, StoreError> {
        let previous = self.update(course_id, |course| {
            let previous = std::mem::replace(course.status, STATUS_FAILED.to_string());
            if failed_at_stage.is_some() {
                *course.failed_at_stage = failed_at_stage;
            }
            course.progress.fail_running_steps();
            course.progress.message = message.to_string();
            Some(previous)
        })?;
        previous.ok_or_else(|| StoreError::CourseNotFound {
            course_id: course_id.to_string(),
        })
    }

    /// Cancels a course that is not already terminal. Returns the previous
    /// status, or `None` when the course was already terminal.
    pub fn cancel(&self, course_id: &str) -> Result<Option<String>, StoreError> {
        self.update(course_id, |course| {
            if CourseStatus::parse(course.status).is_terminal() {
                return None;
            }
            let previous = std::mem::replace(course.status, STATUS_CANCELLED.to_string());
            course.progress.fail_running_steps();
            course.progress.message = "Generation cancelled".to_string();
            Some(previous)
        })
    }

    /// Courses that are not terminal, oldest first.
    pub fn list_generating(&self) -> Result<Vec<CourseRecord>, StoreError> {
        Ok(course_repo::list_non_terminal(&self.db)?
            .into_iter()
            .map(CourseRecord::from_row)
            .collect())
    }

    pub fn documents(&self, course_id: &str) -> Result<Vec<DocumentRow>, StoreError> {
        Ok(content_repo::list_documents(&self.db, course_id)?)
    }

    pub fn save_stage_output(
        &self,
        course_id: &str,
        stage: Stage,
        output: &str,
    ) -> Result<(), StoreError> {
        content_repo::upsert_stage_output(
            &self.db,
            course_id,
            stage.number(),
            output,
            &format_timestamp(Utc::now()),
        )?;
        Ok(())
    }

    pub fn stage_output(&self, course_id: &str, stage: Stage) -> Result<Option<String>, StoreError> {
        Ok(content_repo::find_stage_output(
            &self.db,
            course_id,
            stage.number(),
        )?)
    }

    pub fn save_lesson(
        &self,
        course_id: &str,
        lesson_id: &str,
        position: u32,
        title: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        content_repo::upsert_lesson(
            &self.db,
            &LessonRow {
                course_id: course_id.to_string(),
                lesson_id: lesson_id.to_string(),
                position,
                title: title.to_string(),
                content: content.to_string(),
                updated_at: format_timestamp(Utc::now()),
                last_job_id: None,
            },
        )?;
        Ok(())
    }

    pub fn lesson(&self, course_id: &str, lesson_id: &str) -> Result<Option<LessonRow>, StoreError> {
        Ok(content_repo::find_lesson(&self.db, course_id, lesson_id)?)
    }

    pub fn lessons(&self, course_id: &str) -> Result<Vec<LessonRow>, StoreError> {
        Ok(content_repo::list_lessons(&self.db, course_id)?)
    }

    /// Overwrites a lesson's content and marks it as written by `job_id`.
    /// Returns `false` if the lesson does not exist.
    pub fn replace_lesson_content(
        &self,
        course_id: &str,
        lesson_id: &str,
        content: &str,
        job_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(content_repo::update_lesson_content(
            &self.db,
            course_id,
            lesson_id,
            content,
            job_id,
            &format_timestamp(Utc::now()),
        )?)
    }
}
