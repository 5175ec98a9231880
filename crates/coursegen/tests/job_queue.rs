//! Queue, worker pool and status store behaviour seen from outside.

mod common;

use std::time::{Duration, Instant};

use common::TestHarness;
use coursegen::store::{JobQueryParams, JobStatus};
use coursegen::worker::OutcomeKind;
use coursegen::{
    JobPayload, JobPhase, JobProgressEvent, JobType, OrchestratorError, ValidationError,
    WorkerError,
};
use tokio::sync::broadcast::Receiver;
use uuid::Uuid;

/// Events for `job_id` up to and including its terminal phase.
fn progress_of(events: &mut Receiver<JobProgressEvent>, job_id: &str) -> Vec<JobProgressEvent> {
    let deadline = Instant::now() + common::harness::WAIT;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        match events.try_recv() {
            Ok(event) if event.job_id == job_id => {
                let done = matches!(event.phase, JobPhase::Completed | JobPhase::Failed);
                seen.push(event);
                if done {
                    return seen;
                }
            }
            Ok(_) => {}
            Err(_) => std::thread::sleep(Duration::from_millis(10)),
        }
    }
    panic!("No terminal progress event for {}: {:?}", job_id, seen);
}

#[test]
fn intentional_failure_is_recognizable() {
    let mut harness = TestHarness::new();
    harness.start();

    let job_id = harness.orchestrator.enqueue_test_job(true, None).unwrap();
    let record = harness.wait_for_job(&job_id);

    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.attempts, 1);
    assert!(record.finished_at.is_some());
    let message = record.error_message.unwrap();
    assert!(message.to_lowercase().contains("intentional"), "{}", message);
}

#[test]
fn delayed_test_job_completes() {
    let mut harness = TestHarness::new();
    harness.start();

    let started = Instant::now();
    let job_id = harness.orchestrator.enqueue_test_job(false, Some(50)).unwrap();
    let record = harness.wait_for_job(&job_id);

    assert_eq!(record.status, JobStatus::Completed);
    assert!(record.error_message.is_none());
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[test]
fn progress_events_follow_a_job() {
    let mut harness = TestHarness::new();
    let mut events = harness.subscribe();
    harness.start();

    let job_id = harness.orchestrator.enqueue_test_job(false, None).unwrap();
    let seen = progress_of(&mut events, &job_id);

    let phases: Vec<JobPhase> = seen.iter().map(|e| e.phase).collect();
    assert_eq!(
        phases,
        vec![JobPhase::Processing, JobPhase::Processing, JobPhase::Completed]
    );
    assert!(seen[0].message.contains("attempt 1"), "{}", seen[0].message);
    assert_eq!(seen[1].message, "Test job done");
    assert_eq!(seen[1].percentage, Some(100));
    assert!(seen.iter().all(|e| e.job_type == JobType::Test));
}

#[test]
fn failed_job_reports_its_error() {
    let mut harness = TestHarness::new();
    let mut events = harness.subscribe();
    harness.start();

    let job_id = harness.orchestrator.enqueue_test_job(true, None).unwrap();
    let seen = progress_of(&mut events, &job_id);

    let last = seen.last().unwrap();
    assert_eq!(last.phase, JobPhase::Failed);
    let error = last.error.as_deref().unwrap();
    assert!(error.to_lowercase().contains("intentional"), "{}", error);
    assert!(seen.iter().all(|e| e.phase != JobPhase::Completed));
}

#[test]
fn queued_job_waits_for_workers() {
    let mut harness = TestHarness::new();

    let job_id = harness.orchestrator.enqueue_test_job(false, None).unwrap();
    let record = harness.orchestrator.job_status(&job_id).unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Queued);
    assert_eq!(record.attempts, 0);
    assert_eq!(harness.orchestrator.queue().depth().unwrap(), 1);

    harness.start();
    assert_eq!(harness.wait_for_job(&job_id).status, JobStatus::Completed);
    assert_eq!(harness.orchestrator.queue().depth().unwrap(), 0);
}

#[test]
fn invalid_payload_is_never_queued() {
    let harness = TestHarness::new();

    let mut payload = JobPayload::new(
        JobType::Analyze,
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
    );
    payload.should_fail = Some(true);

    let err = harness.orchestrator.queue().enqueue(payload).unwrap_err();
    assert!(matches!(
        err,
        WorkerError::Rejected(ValidationError::TestOnlyField { .. })
    ));

    let regenerate = JobPayload::new(
        JobType::RegenerateSection,
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
    );
    assert!(harness.orchestrator.queue().enqueue(regenerate).is_err());

    assert_eq!(harness.orchestrator.queue().depth().unwrap(), 0);
    let listed = harness
        .orchestrator
        .statuses()
        .list(&JobQueryParams::default())
        .unwrap();
    assert_eq!(listed.total, 0);
}

#[test]
fn outcomes_follow_status_writes() {
    let mut harness = TestHarness::new();
    harness.start();

    let ok = harness.orchestrator.enqueue_test_job(false, None).unwrap();
    let failing = harness.orchestrator.enqueue_test_job(true, None).unwrap();
    harness.wait_for_job(&ok);
    harness.wait_for_job(&failing);
    harness.stop();

    let outcomes = harness.handled_outcomes();
    let kind_of = |id: &str| {
        outcomes
            .iter()
            .find(|o| o.job_id == id)
            .map(|o| o.kind)
            .unwrap()
    };
    assert_eq!(kind_of(&ok), OutcomeKind::Completed);
    assert_eq!(kind_of(&failing), OutcomeKind::Failed);
    assert!(outcomes.iter().all(|o| o.job_type == JobType::Test));
}

#[test]
fn clearing_the_queue_keeps_history() {
    let mut harness = TestHarness::new();
    harness.start();
    let done = harness.orchestrator.enqueue_test_job(false, None).unwrap();
    harness.wait_for_job(&done);
    harness.stop();

    let pending = harness.orchestrator.enqueue_test_job(false, None).unwrap();
    assert_eq!(harness.orchestrator.queue().clear().unwrap(), 1);
    assert_eq!(harness.orchestrator.queue().depth().unwrap(), 0);

    let history = harness.orchestrator.job_status(&done).unwrap().unwrap();
    assert_eq!(history.status, JobStatus::Completed);
    assert!(harness.orchestrator.job_status(&pending).unwrap().is_some());
}

#[test]
fn unknown_job_has_no_status() {
    let harness = TestHarness::new();
    assert!(harness.orchestrator.job_status("missing").unwrap().is_none());

    let err = harness.orchestrator.course_status("missing").unwrap_err();
    assert!(matches!(err, OrchestratorError::CourseNotFound { .. }));
    assert!(err.is_client_error());
}
