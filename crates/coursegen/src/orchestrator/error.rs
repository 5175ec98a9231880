use thiserror::Error;

use crate::error::{DocumentError, WorkerError};
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Course {course_id} not found")]
    CourseNotFound { course_id: String },

    #[error("Lesson {lesson_id} not found in course {course_id}")]
    LessonNotFound { course_id: String, lesson_id: String },

    #[error("Course {course_id} is not awaiting approval (status: {status})")]
    NotAwaitingApproval { course_id: String, status: String },

    #[error("Course {course_id} is already {status}")]
    AlreadyTerminal { course_id: String, status: String },

    #[error("Course {course_id} is not stuck (status: {status}); pass a forced status to override")]
    NotStuck { course_id: String, status: String },

    #[error("Invalid {field} '{value}': expected a UUID")]
    InvalidId { field: &'static str, value: String },

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for OrchestratorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::CourseNotFound { course_id } => OrchestratorError::CourseNotFound { course_id },
            other => OrchestratorError::Store(other),
        }
    }
}

impl OrchestratorError {
    /// Errors caused by the request rather than the system.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, OrchestratorError::Worker(WorkerError::Database(_)) | OrchestratorError::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_course_not_found_is_lifted() {
        let err: OrchestratorError = StoreError::CourseNotFound {
            course_id: "c1".to_string(),
        }
        .into();
        assert!(matches!(err, OrchestratorError::CourseNotFound { .. }));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_section_not_found_is_client_error() {
        let err: OrchestratorError = DocumentError::SectionNotFound {
            section_id: "section_9".to_string(),
        }
        .into();
        assert!(err.is_client_error());
        assert_eq!(
            err.to_string(),
            "Document error: Section 'section_9' not found in document"
        );
    }
}
