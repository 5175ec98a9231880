pub mod handler;
pub mod job;
pub mod pool;
pub mod queue;
pub mod retry;

pub use handler::{HandlerRegistry, JobContext, JobHandler};
pub use job::{Job, JobOutcome, JobPayload, JobType, OutcomeKind, RegenerationMetadata};
pub use pool::{PoolConfig, WorkerPool};
pub use queue::JobQueue;
pub use retry::{RetryConfig, RetryPolicy};

// Re-export crossbeam_channel for binaries consuming pool outcomes
pub use crossbeam_channel;
