//! Test harness for isolated end-to-end runs.
//!
//! Each harness owns a temp directory with its own SQLite database, an
//! orchestrator over it and, once started, a worker pool plus pipeline driver
//! wired to a `ScriptedGenerator`. Pool progress goes to a broadcaster tests
//! can subscribe to.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use uuid::Uuid;

use coursegen::db::format_timestamp;
use coursegen::orchestrator::{GenerationTicket, OrchestratorSettings};
use coursegen::pipeline::Capabilities;
use coursegen::store::{CourseRecord, JobStatusRecord};
use coursegen::worker::crossbeam_channel::{unbounded, Receiver};
use coursegen::worker::{JobOutcome, PoolConfig, RetryConfig, RetryPolicy};
use coursegen::{
    CourseStatus, Database, GenerationRequest, JobProgressBroadcaster, JobProgressEvent, JobType,
    Orchestrator, PipelineDriver, WorkerPool,
};

use super::ScriptedGenerator;

pub const WAIT: Duration = Duration::from_secs(10);
const POLL: Duration = Duration::from_millis(20);

pub struct TestHarness {
    temp_dir: TempDir,
    pub db: Database,
    pub orchestrator: Arc<Orchestrator>,
    pub generator: Arc<ScriptedGenerator>,
    pub progress: JobProgressBroadcaster,
    pool: Option<WorkerPool>,
    driver: Option<PipelineDriver>,
    observed: Option<Receiver<JobOutcome>>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(OrchestratorSettings::default())
    }

    pub fn with_settings(settings: OrchestratorSettings) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("coursegen.db"))
            .expect("Failed to open database");
        let orchestrator = Arc::new(Orchestrator::new(db.clone(), settings));

        Self {
            temp_dir,
            db,
            orchestrator,
            generator: Arc::new(ScriptedGenerator::new()),
            progress: JobProgressBroadcaster::new(256),
            pool: None,
            driver: None,
            observed: None,
        }
    }

    /// Retries quickly so retry paths finish within a test.
    pub fn fast_retry() -> RetryConfig {
        RetryConfig {
            default: RetryPolicy {
                max_retries: 2,
                base_delay_ms: 10,
                max_delay_ms: 40,
            },
            overrides: HashMap::from([
                (JobType::Test, RetryPolicy::none()),
                (JobType::Initialize, RetryPolicy::none()),
            ]),
        }
    }

    /// Resumes pipelines left by earlier runs, then starts two workers and
    /// the pipeline driver.
    pub fn start(&mut self) -> &mut Self {
        self.orchestrator
            .resume_pipelines()
            .expect("Failed to resume pipelines");

        let registry = self
            .orchestrator
            .registry(Capabilities::with_generator(self.generator.clone()));
        let pool = WorkerPool::start(
            self.orchestrator.queue().clone(),
            self.orchestrator.statuses().clone(),
            registry,
            PoolConfig {
                worker_count: 2,
                poll_interval: POLL,
                retry: Self::fast_retry(),
                claim_lease: Duration::from_secs(30),
                progress: Some(self.progress.clone()),
            },
        )
        .expect("Failed to start worker pool");

        let (tx, rx) = unbounded();
        let driver = PipelineDriver::spawn(Arc::clone(&self.orchestrator), pool.outcomes(), Some(tx))
            .expect("Failed to start pipeline driver");

        self.pool = Some(pool);
        self.driver = Some(driver);
        self.observed = Some(rx);
        self
    }

    /// Stops workers and lets the driver handle every outcome already sent.
    pub fn stop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.stop();
        }
        if let Some(driver) = self.driver.take() {
            driver.drain();
        }
    }

    /// Receives progress events sent after this call.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<JobProgressEvent> {
        self.progress.subscribe()
    }

    /// Outcomes the driver has already handled.
    pub fn handled_outcomes(&self) -> Vec<JobOutcome> {
        self.observed
            .as_ref()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default()
    }

    pub fn request_course(&self, documents: &[(&str, &str)]) -> GenerationTicket {
        self.orchestrator
            .request_generation(GenerationRequest {
                course_id: Uuid::new_v4(),
                organization_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                documents: documents
                    .iter()
                    .map(|(name, content)| (name.to_string(), content.to_string()))
                    .collect(),
                brief: Some("An introductory course".to_string()),
            })
            .expect("Failed to request generation")
    }

    pub fn course(&self, course_id: &str) -> CourseRecord {
        self.orchestrator
            .courses()
            .require(course_id)
            .expect("Course should exist")
    }

    /// Polls until `done` holds for the course, panicking after `WAIT`.
    pub fn wait_for_course<F>(&self, course_id: &str, done: F) -> CourseRecord
    where
        F: Fn(&CourseRecord) -> bool,
    {
        let deadline = Instant::now() + WAIT;
        loop {
            let course = self.course(course_id);
            if done(&course) {
                return course;
            }
            if Instant::now() >= deadline {
                panic!(
                    "Course {} did not settle in time, status is {}",
                    course_id, course.generation_status
                );
            }
            std::thread::sleep(POLL);
        }
    }

    /// Waits for a terminal status or an approval gate.
    pub fn wait_until_settled(&self, course_id: &str) -> CourseRecord {
        self.wait_for_course(course_id, |c| {
            let status = c.status();
            status.is_terminal() || matches!(status, CourseStatus::AwaitingApproval(_))
        })
    }

    pub fn wait_for_job(&self, job_id: &str) -> JobStatusRecord {
        self.orchestrator
            .statuses()
            .wait_for_terminal(job_id, WAIT, POLL)
            .expect("Status store read failed")
            .unwrap_or_else(|| panic!("Job {} did not finish in time", job_id))
    }

    /// Moves a course's creation time into the past.
    pub fn backdate_course(&self, course_id: &str, minutes: i64) {
        let created_at = format_timestamp(chrono::Utc::now() - chrono::Duration::minutes(minutes));
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE courses SET created_at = ?1 WHERE id = ?2",
                    rusqlite::params![created_at, course_id],
                )?;
                Ok(())
            })
            .expect("Failed to backdate course");
    }

    pub fn temp_path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.stop();
    }
}
