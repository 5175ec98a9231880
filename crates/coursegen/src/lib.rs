pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod regeneration;
pub mod stage;
pub mod store;
pub mod worker;

pub use broadcast::{JobPhase, JobProgressBroadcaster, JobProgressEvent, JobProgressTracker};
pub use config::{load_config, load_config_from_str, Config};
pub use db::{Database, DatabaseError};
pub use error::{
    ConfigError, CoursegenError, DocumentError, Result, ValidationError, WorkerError,
};
pub use logging::init_logging;
pub use orchestrator::{
    GenerationRequest, Orchestrator, OrchestratorError, OrchestratorSettings, PipelineDriver,
    SectionEditRequest,
};
pub use pipeline::{Capabilities, ContentGenerator, JobError};
pub use stage::{CourseStatus, Stage};
pub use store::{CourseStore, JobStatus, JobStatusRecord, JobStatusStore, StoreError, TraceStore};
pub use worker::{HandlerRegistry, JobPayload, JobQueue, JobType, PoolConfig, WorkerPool};
