//! Job handlers: the six generation stages, scoped regeneration and the
//! test job, plus the capabilities and progress plumbing they share.

pub mod capabilities;
pub mod error;
pub mod progress;
pub mod regenerate;
pub mod stage_handler;
pub mod test_job;

pub use capabilities::{
    Capabilities, CapabilityError, Classification, ContentGenerator, DocumentClassifier,
    DocumentConverter, Generated, KeywordClassifier, PassthroughConverter,
};
pub use error::JobError;
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use regenerate::RegenerateHandler;
pub use stage_handler::{parse_lesson_titles, StageHandler};
pub use test_job::TestJobHandler;
