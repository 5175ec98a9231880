use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::broadcast::job_progress::{JobPhase, JobProgressBroadcaster};
use crate::error::WorkerError;
use crate::pipeline::error::JobError;
use crate::pipeline::progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
use crate::store::{JobStatusStore, StoreError};
use crate::worker::handler::{HandlerRegistry, JobContext};
use crate::worker::job::{Job, JobOutcome, OutcomeKind};
use crate::worker::queue::JobQueue;
use crate::worker::retry::RetryConfig;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
pub const DEFAULT_CLAIM_LEASE_SECS: u64 = 120;

/// Default pool size: small, since each job mostly waits on external calls.
pub fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, 2)
}

#[derive(Clone)]
pub struct PoolConfig {
    pub worker_count: usize,
    /// How long an idle worker waits before polling the queue again.
    pub poll_interval: Duration,
    pub retry: RetryConfig,
    /// A claim not renewed for this long is considered abandoned and the job
    /// is redelivered. Running jobs are renewed every third of it.
    pub claim_lease: Duration,
    pub progress: Option<JobProgressBroadcaster>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            retry: RetryConfig::default(),
            claim_lease: Duration::from_secs(DEFAULT_CLAIM_LEASE_SECS),
            progress: None,
        }
    }
}

/// State shared by all workers of a pool.
struct Shared {
    queue: JobQueue,
    statuses: JobStatusStore,
    registry: HandlerRegistry,
    retry: RetryConfig,
    progress: Option<JobProgressBroadcaster>,
    poll_interval: Duration,
    claim_lease: Duration,
    /// Prefix of every claim label this pool writes; unique per pool so
    /// pools in different processes never renew each other's claims.
    claimant: String,
    shutdown: AtomicBool,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    lease_keeper: JoinHandle<()>,
    outcome_receiver: Receiver<JobOutcome>,
}

impl WorkerPool {
    /// Releases expired claims and starts `config.worker_count` threads plus
    /// one thread that keeps this pool's claims leased.
    pub fn start(
        queue: JobQueue,
        statuses: JobStatusStore,
        registry: HandlerRegistry,
        config: PoolConfig,
    ) -> Result<Self, WorkerError> {
        if config.worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be at least 1".to_string(),
            ));
        }

        if config.claim_lease.is_zero() {
            return Err(WorkerError::SpawnFailed(
                "claim lease must be positive".to_string(),
            ));
        }

        queue.requeue_abandoned(config.claim_lease)?;

        let (outcome_tx, outcome_receiver) = unbounded::<JobOutcome>();
        let shared = Arc::new(Shared {
            queue,
            statuses,
            registry,
            retry: config.retry,
            progress: config.progress,
            poll_interval: config.poll_interval,
            claim_lease: config.claim_lease,
            claimant: format!("{}/", Uuid::new_v4()),
            shutdown: AtomicBool::new(false),
        });

        let keeper_shared = Arc::clone(&shared);
        let lease_keeper = thread::Builder::new()
            .name("coursegen-lease".to_string())
            .spawn(move || run_lease_keeper(keeper_shared))
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let worker_shared = Arc::clone(&shared);
            let tx = outcome_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("coursegen-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, worker_shared, tx));

            match handle {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shared.shutdown.store(true, Ordering::Relaxed);
                    for started in workers {
                        let _ = started.join();
                    }
                    let _ = lease_keeper.join();
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!(
            claimant = %shared.claimant,
            "Started {} workers",
            config.worker_count
        );

        Ok(Self {
            shared,
            workers,
            lease_keeper,
            outcome_receiver,
        })
    }

    /// Outcomes of finished deliveries, in completion order.
    pub fn outcomes(&self) -> Receiver<JobOutcome> {
        self.outcome_receiver.clone()
    }

    pub fn recv_outcome_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        self.outcome_receiver.recv_timeout(timeout).ok()
    }

    /// Signals shutdown and waits for in-flight jobs to finish.
    pub fn stop(self) {
        info!("Shutting down worker pool...");
        self.shared.shutdown.store(true, Ordering::Relaxed);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
        if let Err(e) = self.lease_keeper.join() {
            error!("Lease keeper panicked: {:?}", e);
        }

        info!("All workers have stopped");
    }
}

/// Renews this pool's claims and releases claims other pools let lapse.
fn run_lease_keeper(shared: Arc<Shared>) {
    let renew_every = shared.claim_lease / 3;
    let tick = shared.poll_interval.min(renew_every);
    let mut since_renewal = Duration::ZERO;

    while !shared.shutdown.load(Ordering::Relaxed) {
        thread::sleep(tick);
        since_renewal += tick;
        if since_renewal < renew_every {
            continue;
        }
        since_renewal = Duration::ZERO;

        match shared.queue.renew_leases(&shared.claimant) {
            Ok(renewed) if renewed > 0 => debug!("Renewed {} claim(s)", renewed),
            Ok(_) => {}
            Err(e) => error!("Failed to renew claims: {}", e),
        }
        if let Err(e) = shared.queue.requeue_abandoned(shared.claim_lease) {
            error!("Failed to requeue abandoned jobs: {}", e);
        }
    }
}

fn run_worker(worker_id: usize, shared: Arc<Shared>, outcome_sender: Sender<JobOutcome>) {
    let label = format!("{}worker-{}", shared.claimant, worker_id);
    let wake = shared.queue.wake_receiver();
    debug!("{} started", label);

    while !shared.shutdown.load(Ordering::Relaxed) {
        match shared.queue.claim_next(&label) {
            Ok(Some(job)) => {
                let outcome = process_job(worker_id, &job, &shared);
                if outcome_sender.send(outcome).is_err() {
                    debug!("{}: outcome receiver dropped", label);
                }
            }
            Ok(None) => match wake.recv_timeout(shared.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => thread::sleep(shared.poll_interval),
            },
            Err(e) => {
                error!("{} failed to claim a job: {}", label, e);
                thread::sleep(shared.poll_interval);
            }
        }
    }

    debug!("{} stopped", label);
}

/// Runs one delivery of `job`. Every path records the job's status before it
/// is acknowledged; a failed status write leaves the row claimed so the job
/// is redelivered after a restart.
fn process_job(worker_id: usize, job: &Job, shared: &Shared) -> JobOutcome {
    let span = info_span!(
        "job",
        job_id = %job.id,
        job_type = %job.job_type(),
        course_id = %job.course_id(),
        attempt = job.attempt
    );
    let _enter = span.enter();

    match shared.statuses.get(&job.id) {
        Ok(Some(record)) if record.is_terminal() => {
            info!("Job already {}, acknowledging redelivery", record.status);
            ack(shared, job);
            return JobOutcome::new(job, OutcomeKind::Skipped, None);
        }
        Ok(Some(_)) => {}
        Ok(None) => {
            warn!("Job has no status record, dropping");
            ack(shared, job);
            return JobOutcome::new(job, OutcomeKind::Skipped, None);
        }
        Err(e) => return release_after_store_error(shared, job, e),
    }

    if let Err(e) = shared.statuses.mark_processing(&job.id, job.attempt) {
        return release_after_store_error(shared, job, e);
    }

    let reporter: Box<dyn ProgressReporter> = match &shared.progress {
        Some(broadcaster) => Box::new(BroadcastProgress::new(job, broadcaster)),
        None => Box::new(NoopProgress),
    };
    reporter.report(ProgressEvent::Phase {
        phase: JobPhase::Processing,
        message: format!("Processing {} (attempt {})", job.job_type(), job.attempt),
    });

    let result = run_handler(worker_id, job, shared, reporter.as_ref());

    match result {
        Ok(()) => {
            if let Err(e) = shared.statuses.mark_completed(&job.id) {
                error!("Failed to record completion: {}", e);
                return JobOutcome::new(job, OutcomeKind::Failed, Some(e.to_string()));
            }
            ack(shared, job);
            reporter.report(ProgressEvent::Phase {
                phase: JobPhase::Completed,
                message: "Job completed".to_string(),
            });
            info!("Job completed");
            JobOutcome::new(job, OutcomeKind::Completed, None)
        }
        Err(JobError::Cancelled { course_id }) => {
            let message = JobError::Cancelled { course_id }.to_string();
            if let Err(e) = shared.statuses.mark_failed(&job.id, &message) {
                error!("Failed to record cancellation: {}", e);
                return JobOutcome::new(job, OutcomeKind::Failed, Some(e.to_string()));
            }
            ack(shared, job);
            reporter.report(ProgressEvent::Failed {
                error: message.clone(),
            });
            info!("Job stopped: {}", message);
            JobOutcome::new(job, OutcomeKind::Cancelled, Some(message))
        }
        Err(err) => {
            let message = err.to_string();
            let policy = shared.retry.policy_for(job.job_type());

            if err.is_retryable() && policy.allows_retry(job.attempt) {
                let delay = policy.delay_for(job.attempt);
                if let Err(e) = shared.statuses.mark_retrying(&job.id, &message) {
                    error!("Failed to record retry: {}", e);
                    return JobOutcome::new(job, OutcomeKind::Failed, Some(e.to_string()));
                }
                if let Err(e) = shared.queue.reschedule(&job.id, delay) {
                    error!("Failed to reschedule job: {}", e);
                }
                reporter.report(ProgressEvent::Phase {
                    phase: JobPhase::Retrying,
                    message: format!("Retrying in {} ms: {}", delay.as_millis(), message),
                });
                warn!(
                    "Job failed, retrying in {} ms ({}/{}): {}",
                    delay.as_millis(),
                    job.attempt,
                    policy.max_retries,
                    message
                );
                return JobOutcome::new(job, OutcomeKind::Retrying, Some(message));
            }

            if let Err(e) = shared.statuses.mark_failed(&job.id, &message) {
                error!("Failed to record failure: {}", e);
                return JobOutcome::new(job, OutcomeKind::Failed, Some(e.to_string()));
            }
            ack(shared, job);
            reporter.report(ProgressEvent::Failed {
                error: message.clone(),
            });
            error!("Job failed: {}", message);
            JobOutcome::new(job, OutcomeKind::Failed, Some(message))
        }
    }
}

fn run_handler(
    worker_id: usize,
    job: &Job,
    shared: &Shared,
    reporter: &dyn ProgressReporter,
) -> Result<(), JobError> {
    let Some(handler) = shared.registry.get(job.job_type()) else {
        return Err(JobError::MissingHandler(job.job_type()));
    };

    let ctx = JobContext {
        worker_id,
        attempt: job.attempt,
        progress: reporter,
    };

    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(job, &ctx))) {
        Ok(result) => result,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(JobError::Panicked(reason))
        }
    }
}

fn ack(shared: &Shared, job: &Job) {
    if let Err(e) = shared.queue.ack(&job.id) {
        error!("Failed to acknowledge job: {}", e);
    }
}

/// The status store could not be read or written before the handler ran.
/// Terminal rows are acknowledged; anything else goes back on the queue.
fn release_after_store_error(shared: &Shared, job: &Job, err: StoreError) -> JobOutcome {
    if let StoreError::TerminalState { .. } = err {
        ack(shared, job);
        return JobOutcome::new(job, OutcomeKind::Skipped, None);
    }
    error!("Status store unavailable: {}", err);
    if let Err(e) = shared.queue.reschedule(&job.id, shared.poll_interval) {
        error!("Failed to release job: {}", e);
    }
    JobOutcome::new(job, OutcomeKind::Retrying, Some(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::JobStatus;
    use crate::worker::handler::JobHandler;
    use crate::worker::job::{JobPayload, JobType};
    use crate::worker::retry::RetryPolicy;
    use std::sync::atomic::AtomicU32;

    struct Flaky {
        failures_left: AtomicU32,
    }

    impl JobHandler for Flaky {
        fn handle(&self, _job: &Job, _ctx: &JobContext<'_>) -> Result<(), JobError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(JobError::Upstream("503 from provider".to_string()));
            }
            Ok(())
        }
    }

    /// Counts deliveries and holds each one for a while.
    struct Slow {
        runs: AtomicU32,
        hold: Duration,
    }

    impl JobHandler for Slow {
        fn handle(&self, _job: &Job, _ctx: &JobContext<'_>) -> Result<(), JobError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.hold);
            Ok(())
        }
    }

    fn slow_registry(handler: &Arc<Slow>) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register(JobType::Test, Arc::clone(handler) as Arc<dyn JobHandler>);
        registry
    }

    struct Panics;

    impl JobHandler for Panics {
        fn handle(&self, _job: &Job, _ctx: &JobContext<'_>) -> Result<(), JobError> {
            panic!("handler exploded");
        }
    }

    fn fast_config(retry: RetryConfig) -> PoolConfig {
        PoolConfig {
            worker_count: 2,
            poll_interval: Duration::from_millis(10),
            retry,
            claim_lease: Duration::from_secs(30),
            progress: None,
        }
    }

    fn setup() -> (JobQueue, JobStatusStore) {
        let db = Database::open_in_memory().expect("Failed to create test database");
        let queue = JobQueue::new(db);
        let statuses = queue.statuses().clone();
        (queue, statuses)
    }

    #[test]
    fn test_zero_workers_rejected() {
        let (queue, statuses) = setup();
        let config = PoolConfig {
            worker_count: 0,
            ..fast_config(RetryConfig::default())
        };
        assert!(matches!(
            WorkerPool::start(queue, statuses, HandlerRegistry::new(), config),
            Err(WorkerError::SpawnFailed(_))
        ));
    }

    #[test]
    fn test_retry_then_complete() {
        let (queue, statuses) = setup();
        let mut registry = HandlerRegistry::new();
        registry.register(
            JobType::Test,
            Arc::new(Flaky {
                failures_left: AtomicU32::new(1),
            }),
        );
        let retry = RetryConfig {
            default: RetryPolicy::default(),
            overrides: [(
                JobType::Test,
                RetryPolicy {
                    max_retries: 2,
                    base_delay_ms: 5,
                    max_delay_ms: 20,
                },
            )]
            .into_iter()
            .collect(),
        };

        let pool =
            WorkerPool::start(queue.clone(), statuses.clone(), registry, fast_config(retry)).unwrap();
        let job_id = queue.enqueue(JobPayload::test_job(false, None)).unwrap();

        let first = pool.recv_outcome_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.kind, OutcomeKind::Retrying);
        let second = pool.recv_outcome_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(second.kind, OutcomeKind::Completed);
        assert_eq!(second.attempt, 2);

        let record = statuses.get(&job_id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.attempts, 2);
        assert_eq!(queue.depth().unwrap(), 0);
        pool.stop();
    }

    #[test]
    fn test_non_retryable_type_fails_once() {
        let (queue, statuses) = setup();
        let mut registry = HandlerRegistry::new();
        registry.register(
            JobType::Test,
            Arc::new(Flaky {
                failures_left: AtomicU32::new(5),
            }),
        );

        let pool = WorkerPool::start(
            queue.clone(),
            statuses.clone(),
            registry,
            fast_config(RetryConfig::default()),
        )
        .unwrap();
        let job_id = queue.enqueue(JobPayload::test_job(false, None)).unwrap();

        let outcome = pool.recv_outcome_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Failed);
        let record = statuses.get(&job_id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error_message.unwrap().contains("503"));
        pool.stop();
    }

    #[test]
    fn test_panic_is_recorded_as_failure() {
        let (queue, statuses) = setup();
        let mut registry = HandlerRegistry::new();
        registry.register(JobType::Test, Arc::new(Panics));

        let pool = WorkerPool::start(
            queue.clone(),
            statuses.clone(),
            registry,
            fast_config(RetryConfig::default()),
        )
        .unwrap();
        let job_id = queue.enqueue(JobPayload::test_job(false, None)).unwrap();

        let outcome = pool.recv_outcome_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Failed);
        let record = statuses.get(&job_id).unwrap().unwrap();
        assert_eq!(
            record.error_message.as_deref(),
            Some("Job handler panicked: handler exploded")
        );
        pool.stop();
    }

    #[test]
    fn test_missing_handler_fails_job() {
        let (queue, statuses) = setup();
        let pool = WorkerPool::start(
            queue.clone(),
            statuses.clone(),
            HandlerRegistry::new(),
            fast_config(RetryConfig::default()),
        )
        .unwrap();
        let job_id = queue.enqueue(JobPayload::test_job(false, None)).unwrap();

        let outcome = pool.recv_outcome_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Failed);
        assert!(statuses
            .get(&job_id)
            .unwrap()
            .unwrap()
            .error_message
            .unwrap()
            .contains("No handler registered"));
        pool.stop();
    }

    #[test]
    fn test_redelivered_terminal_job_is_skipped() {
        let (queue, statuses) = setup();
        let job_id = queue.enqueue(JobPayload::test_job(false, None)).unwrap();
        statuses.mark_processing(&job_id, 1).unwrap();
        statuses.mark_completed(&job_id).unwrap();

        let mut registry = HandlerRegistry::new();
        registry.register(JobType::Test, Arc::new(Panics));
        let pool = WorkerPool::start(
            queue.clone(),
            statuses.clone(),
            registry,
            fast_config(RetryConfig::default()),
        )
        .unwrap();

        let outcome = pool.recv_outcome_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Skipped);
        assert_eq!(
            statuses.get(&job_id).unwrap().unwrap().status,
            JobStatus::Completed
        );
        assert_eq!(queue.depth().unwrap(), 0);
        pool.stop();
    }

    #[test]
    fn test_second_pool_leaves_running_job_alone() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("shared.db");
        let handler = Arc::new(Slow {
            runs: AtomicU32::new(0),
            hold: Duration::from_millis(600),
        });

        let queue_a = JobQueue::new(Database::open(&path).unwrap());
        let statuses_a = queue_a.statuses().clone();
        let pool_a = WorkerPool::start(
            queue_a.clone(),
            statuses_a.clone(),
            slow_registry(&handler),
            fast_config(RetryConfig::default()),
        )
        .unwrap();
        let job_id = queue_a.enqueue(JobPayload::test_job(false, None)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while statuses_a.get(&job_id).unwrap().unwrap().status != JobStatus::Processing {
            assert!(std::time::Instant::now() < deadline, "job never started");
            thread::sleep(Duration::from_millis(5));
        }

        // Another process starting up on the same database.
        let queue_b = JobQueue::new(Database::open(&path).unwrap());
        let pool_b = WorkerPool::start(
            queue_b.clone(),
            queue_b.statuses().clone(),
            slow_registry(&handler),
            fast_config(RetryConfig::default()),
        )
        .unwrap();

        let outcome = pool_a.recv_outcome_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Completed);
        assert!(pool_b
            .recv_outcome_timeout(Duration::from_millis(200))
            .is_none());

        let record = statuses_a.get(&job_id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.attempts, 1);
        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);

        pool_b.stop();
        pool_a.stop();
    }

    #[test]
    fn test_lapsed_claim_is_taken_over() {
        let (queue, statuses) = setup();
        let job_id = queue.enqueue(JobPayload::test_job(false, None)).unwrap();
        // Claimed by a pool that died before running it.
        queue.claim_next("dead-pool/worker-0").unwrap().unwrap();

        let handler = Arc::new(Slow {
            runs: AtomicU32::new(0),
            hold: Duration::ZERO,
        });
        let pool = WorkerPool::start(
            queue.clone(),
            statuses.clone(),
            slow_registry(&handler),
            PoolConfig {
                claim_lease: Duration::from_millis(150),
                ..fast_config(RetryConfig::default())
            },
        )
        .unwrap();

        let outcome = pool.recv_outcome_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Completed);
        assert_eq!(outcome.attempt, 2);
        assert_eq!(statuses.get(&job_id).unwrap().unwrap().attempts, 2);
        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
        pool.stop();
    }
}
