use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::worker::handler::{JobContext, JobHandler};
use crate::worker::job::Job;

use super::error::JobError;

/// `TEST_JOB`: optional delay, then success or a deliberate failure.
pub struct TestJobHandler;

impl JobHandler for TestJobHandler {
    fn handle(&self, job: &Job, ctx: &JobContext<'_>) -> Result<(), JobError> {
        if let Some(delay) = job.payload.delay_ms.filter(|d| *d > 0) {
            debug!(delay_ms = delay, "Test job sleeping");
            thread::sleep(Duration::from_millis(delay));
        }

        if job.payload.should_fail.unwrap_or(false) {
            let reason = job
                .payload
                .message
                .clone()
                .unwrap_or_else(|| "shouldFail flag set".to_string());
            return Err(JobError::Intentional(reason));
        }

        ctx.step("Test job done", 100);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::progress::NoopProgress;
    use crate::worker::job::JobPayload;

    fn run(payload: JobPayload) -> Result<(), JobError> {
        let job = Job {
            id: "t".to_string(),
            attempt: 1,
            payload,
        };
        let ctx = JobContext {
            worker_id: 0,
            attempt: 1,
            progress: &NoopProgress,
        };
        TestJobHandler.handle(&job, &ctx)
    }

    #[test]
    fn test_success() {
        assert!(run(JobPayload::test_job(false, Some(1))).is_ok());
    }

    #[test]
    fn test_intentional_failure_message() {
        let err = run(JobPayload::test_job(true, None)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Intentional test failure: shouldFail flag set"
        );

        let err = run(JobPayload::test_job(true, None).with_message("custom")).unwrap_err();
        assert!(err.to_string().contains("custom"));
    }
}
