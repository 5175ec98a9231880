use std::collections::HashMap;
use std::sync::Arc;

use crate::pipeline::error::JobError;
use crate::pipeline::progress::{ProgressEvent, ProgressReporter};
use crate::worker::job::{Job, JobType};

/// What a handler gets besides the job itself.
pub struct JobContext<'a> {
    pub worker_id: usize,
    /// 1-based delivery count.
    pub attempt: u32,
    pub progress: &'a dyn ProgressReporter,
}

impl JobContext<'_> {
    pub fn step(&self, message: impl Into<String>, percentage: u8) {
        self.progress.report(ProgressEvent::Step {
            message: message.into(),
            percentage,
        });
    }
}

/// Executes one job type. Handlers may be called again for the same job after
/// a crash, so side effects with external cost must be guarded.
pub trait JobHandler: Send + Sync {
    fn handle(&self, job: &Job, ctx: &JobContext<'_>) -> Result<(), JobError>;
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `job_type`, replacing any previous one.
    pub fn register(&mut self, job_type: JobType, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(job_type, handler);
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    pub fn contains(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Always;

    impl JobHandler for Always {
        fn handle(&self, _job: &Job, _ctx: &JobContext<'_>) -> Result<(), JobError> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        registry.register(JobType::Test, Arc::new(Always));

        assert!(registry.contains(JobType::Test));
        assert!(!registry.contains(JobType::Analyze));
        assert!(registry.get(JobType::Test).is_some());
        assert!(registry.get(JobType::Analyze).is_none());
    }
}
