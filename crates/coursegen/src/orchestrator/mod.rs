//! Course-level control: starting generation, advancing stages as jobs
//! complete, approval gates, cancellation, status diagnostics, stuck-course
//! recovery and scoped edits.
//!
//! The next stage is only enqueued after the status store shows the current
//! one `completed`; queue order is never relied on.

pub mod driver;
pub mod error;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::regeneration::{
    check_lesson_size, location_to_section_id, parse_document, ContextTier, TierClassifier,
    TokenBudget,
};
use crate::stage::recovery::{timeout_message, DEFAULT_STUCK_THRESHOLD_MINUTES};
use crate::stage::{
    assess_course, calculate_progress, stage_nodes, CourseStatus, ProgressStep, Stage, StageNode,
    SuggestedStatus,
};
use crate::store::{
    CourseRecord, CourseStore, JobStatus, JobStatusRecord, JobStatusStore, NewCourse, TraceStore,
};
use crate::pipeline::{Capabilities, RegenerateHandler, StageHandler, TestJobHandler};
use crate::worker::{
    HandlerRegistry, JobOutcome, JobPayload, JobQueue, JobType, OutcomeKind, RegenerationMetadata,
};

pub use driver::PipelineDriver;
pub use error::OrchestratorError;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Stage numbers after which the pipeline waits for approval.
    pub approval_gates: BTreeSet<u8>,
    pub stuck_threshold: chrono::Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            approval_gates: BTreeSet::new(),
            stuck_threshold: chrono::Duration::minutes(DEFAULT_STUCK_THRESHOLD_MINUTES),
        }
    }
}

/// Input for a full course generation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub course_id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    /// `(name, raw content)` pairs; none skips stages 2 and 3.
    pub documents: Vec<(String, String)>,
    /// Free-text instructions for the course.
    pub brief: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationTicket {
    pub course_id: String,
    pub job_id: String,
}

#[derive(Debug, Clone)]
pub struct SectionEditRequest {
    pub course_id: String,
    pub lesson_id: String,
    pub instruction: String,
    /// Free-text hint such as "intro" or "sec_2"; absent or unrecognized
    /// means the whole lesson.
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionEditTicket {
    pub job_id: String,
    pub tier: ContextTier,
    pub budget: TokenBudget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
}

/// Read-only diagnostic for one course.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStatusReport {
    pub course_id: String,
    pub status: String,
    pub progress: u8,
    pub message: String,
    pub is_stuck: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_status: Option<SuggestedStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at_stage: Option<u8>,
    pub age_minutes: i64,
    pub steps: Vec<ProgressStep>,
    pub stage_nodes: Vec<StageNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOutcome {
    pub course_id: String,
    pub previous_status: String,
    pub new_status: String,
    pub forced: bool,
}

pub struct Orchestrator {
    queue: JobQueue,
    statuses: JobStatusStore,
    courses: CourseStore,
    traces: TraceStore,
    classifier: TierClassifier,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(db: Database, settings: OrchestratorSettings) -> Self {
        let queue = JobQueue::new(db.clone());
        Self {
            statuses: queue.statuses().clone(),
            courses: CourseStore::new(db.clone()),
            traces: TraceStore::new(db),
            classifier: TierClassifier::new(),
            queue,
            settings,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn statuses(&self) -> &JobStatusStore {
        &self.statuses
    }

    pub fn courses(&self) -> &CourseStore {
        &self.courses
    }

    pub fn traces(&self) -> &TraceStore {
        &self.traces
    }

    /// Handlers for every job type, wired to `capabilities`.
    pub fn registry(&self, capabilities: Capabilities) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register(JobType::Test, Arc::new(TestJobHandler));
        for stage in Stage::ALL {
            registry.register(
                stage.job_type(),
                Arc::new(StageHandler::new(
                    stage,
                    self.courses.clone(),
                    self.traces.clone(),
                    capabilities.clone(),
                )),
            );
        }
        registry.register(
            JobType::RegenerateSection,
            Arc::new(RegenerateHandler::new(
                self.courses.clone(),
                self.traces.clone(),
                Arc::clone(&capabilities.generator),
            )),
        );
        registry
    }

    /// Creates the course and enqueues its first stage.
    pub fn request_generation(&self, request: GenerationRequest) -> Result<GenerationTicket> {
        let course = self.courses.create(&NewCourse {
            course_id: request.course_id.to_string(),
            organization_id: request.organization_id.to_string(),
            user_id: request.user_id.to_string(),
            documents: request.documents,
        })?;

        let mut payload = self.payload_for(&course, Stage::first().job_type())?;
        payload.message = request.brief;
        let job_id = self.queue.enqueue(payload)?;

        info!(course_id = %course.id, job_id = %job_id, "Course generation requested");
        Ok(GenerationTicket {
            course_id: course.id,
            job_id,
        })
    }

    pub fn enqueue_test_job(&self, should_fail: bool, delay_ms: Option<u64>) -> Result<String> {
        Ok(self.queue.enqueue(JobPayload::test_job(should_fail, delay_ms))?)
    }

    pub fn job_status(&self, job_id: &str) -> Result<Option<JobStatusRecord>> {
        Ok(self.statuses.get(job_id)?)
    }

    fn payload_for(&self, course: &CourseRecord, job_type: JobType) -> Result<JobPayload> {
        Ok(JobPayload::new(
            job_type,
            parse_uuid("organizationId", &course.organization_id)?,
            parse_uuid("courseId", &course.id)?,
            parse_uuid("userId", &course.user_id)?,
        ))
    }

    /// Enqueues `stage` unless a job for it is already open.
    fn enqueue_stage(&self, course: &CourseRecord, stage: Stage) -> Result<Option<String>> {
        if self.statuses.has_open_job(&course.id, stage.job_type())? {
            debug!(course_id = %course.id, %stage, "Stage job already open, not enqueuing");
            return Ok(None);
        }
        let job_id = self.queue.enqueue(self.payload_for(course, stage.job_type())?)?;
        info!(course_id = %course.id, job_id = %job_id, %stage, "Enqueued next stage");
        Ok(Some(job_id))
    }

    /// Advances the pipeline after a job delivery ends. Returns the id of a
    /// newly enqueued stage job, if any.
    pub fn handle_outcome(&self, outcome: &JobOutcome) -> Result<Option<String>> {
        if !matches!(outcome.kind, OutcomeKind::Completed | OutcomeKind::Failed) {
            return Ok(None);
        }
        let Some(stage) = Stage::from_job_type(outcome.job_type) else {
            return Ok(None);
        };

        // The outcome is only a hint; the status store decides.
        let Some(record) = self.statuses.get(&outcome.job_id)? else {
            warn!(job_id = %outcome.job_id, "Outcome for unknown job");
            return Ok(None);
        };

        let course = self.courses.require(&outcome.course_id)?;
        if course.status().is_terminal() {
            debug!(course_id = %course.id, status = %course.generation_status, "Course is terminal, not advancing");
            return Ok(None);
        }

        match record.status {
            JobStatus::Completed => self.advance(&course, stage),
            JobStatus::Failed => {
                self.fail_course(&course, stage, record)?;
                Ok(None)
            }
            JobStatus::Queued | JobStatus::Processing => Ok(None),
        }
    }

    fn fail_course(&self, course: &CourseRecord, stage: Stage, record: JobStatusRecord) -> Result<()> {
        let message = record
            .error_message
            .unwrap_or_else(|| format!("{} failed", stage));
        let previous = self
            .courses
            .mark_failed(&course.id, Some(stage.number()), &message)?;
        info!(
            course_id = %course.id,
            old_status = %previous,
            new_status = "failed",
            failed_at_stage = stage.number(),
            "Course generation failed"
        );
        Ok(())
    }

    /// Picks up every non-terminal course from the stores alone, for outcomes
    /// a previous process finished but never handled. Completed stages are
    /// advanced, failed stage jobs fail the course, and a course whose
    /// current stage has no job at all gets one. Returns the enqueued job ids.
    ///
    /// Run it before the pipeline driver starts.
    pub fn resume_pipelines(&self) -> Result<Vec<String>> {
        let mut enqueued = Vec::new();
        for course in self.courses.list_generating()? {
            match self.resume_course(&course) {
                Ok(Some(job_id)) => enqueued.push(job_id),
                Ok(None) => {}
                Err(e) => warn!(course_id = %course.id, "Failed to resume course: {}", e),
            }
        }
        if !enqueued.is_empty() {
            info!("Resumed {} course pipeline(s)", enqueued.len());
        }
        Ok(enqueued)
    }

    fn resume_course(&self, course: &CourseRecord) -> Result<Option<String>> {
        match course.status() {
            CourseStatus::StageComplete(stage) => self.advance(course, stage),
            CourseStatus::Running(stage) => {
                match self.statuses.latest_for(&course.id, stage.job_type())? {
                    None => self.enqueue_stage(course, stage),
                    Some(record) if record.status == JobStatus::Failed => {
                        self.fail_course(course, stage, record)?;
                        Ok(None)
                    }
                    Some(_) => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    fn advance(&self, course: &CourseRecord, stage: Stage) -> Result<Option<String>> {
        if course.status() != CourseStatus::StageComplete(stage) {
            debug!(
                course_id = %course.id,
                status = %course.generation_status,
                %stage,
                "Course is not at this stage's completion, not advancing"
            );
            return Ok(None);
        }

        match stage.next(course.has_documents) {
            Some(next) if self.settings.approval_gates.contains(&stage.number()) => {
                self.courses
                    .set_status(&course.id, &stage.awaiting_approval_status())?;
                info!(course_id = %course.id, %stage, next = %next, "Waiting for approval");
                Ok(None)
            }
            Some(next) => self.enqueue_stage(course, next),
            None => {
                self.courses.mark_completed(&course.id)?;
                info!(course_id = %course.id, "Course generation completed");
                Ok(None)
            }
        }
    }

    /// Resumes a course paused at a gate. Returns the enqueued job id.
    pub fn approve_stage(&self, course_id: &str) -> Result<Option<String>> {
        let course = self.courses.require(course_id)?;
        let CourseStatus::AwaitingApproval(stage) = course.status() else {
            return Err(OrchestratorError::NotAwaitingApproval {
                course_id: course_id.to_string(),
                status: course.generation_status,
            });
        };

        let previous = self.courses.set_status(course_id, &stage.complete_status())?;
        info!(course_id, old_status = %previous, %stage, "Stage approved");

        match stage.next(course.has_documents) {
            Some(next) => self.enqueue_stage(&course, next),
            None => {
                self.courses.mark_completed(course_id)?;
                Ok(None)
            }
        }
    }

    /// Cancels generation. Running handlers stop at their next checkpoint.
    pub fn cancel_course(&self, course_id: &str) -> Result<String> {
        match self.courses.cancel(course_id)? {
            Some(previous) => {
                info!(course_id, old_status = %previous, new_status = "cancelled", "Course cancelled");
                Ok(previous)
            }
            None => {
                let status = self.courses.require(course_id)?.generation_status;
                Err(OrchestratorError::AlreadyTerminal {
                    course_id: course_id.to_string(),
                    status,
                })
            }
        }
    }

    /// Status, percentage, stuck diagnosis and per-stage nodes. Never writes.
    pub fn course_status(&self, course_id: &str) -> Result<CourseStatusReport> {
        let course = self.courses.require(course_id)?;
        let progress = course.progress();
        let assessment = assess_course(
            &course.generation_status,
            course.created_at,
            course.progress_json.as_deref(),
            Utc::now(),
            self.settings.stuck_threshold,
        );
        let nodes = stage_nodes(
            &course.generation_status,
            course.failed_at_stage,
            course.has_documents,
            Some(&progress),
        );

        Ok(CourseStatusReport {
            progress: calculate_progress(&course.generation_status, course.has_documents),
            is_stuck: assessment.is_stuck,
            suggested_status: assessment.suggested_status,
            age_minutes: assessment.age_minutes,
            failed_at_stage: course.failed_at_stage,
            message: progress.message,
            steps: progress.steps,
            stage_nodes: nodes,
            course_id: course.id,
            status: course.generation_status,
        })
    }

    /// Resolves a stuck course. Without `force` the course must be stuck and
    /// the suggested status is applied.
    pub fn recover_course(
        &self,
        course_id: &str,
        force: Option<SuggestedStatus>,
    ) -> Result<RecoveryOutcome> {
        let course = self.courses.require(course_id)?;
        let assessment = assess_course(
            &course.generation_status,
            course.created_at,
            course.progress_json.as_deref(),
            Utc::now(),
            self.settings.stuck_threshold,
        );

        let target = match force {
            Some(target) => target,
            None if assessment.is_stuck => assessment
                .suggested_status
                .unwrap_or(SuggestedStatus::Failed),
            None => {
                return Err(OrchestratorError::NotStuck {
                    course_id: course_id.to_string(),
                    status: course.generation_status,
                })
            }
        };

        let previous = match target {
            SuggestedStatus::Completed => self.courses.force_completed(course_id)?,
            SuggestedStatus::Failed => {
                let failed_at = course
                    .status()
                    .stage()
                    .map(Stage::number)
                    .or(course.failed_at_stage);
                let message = if assessment.is_stuck {
                    timeout_message(self.settings.stuck_threshold)
                } else {
                    "Marked failed by operator".to_string()
                };
                self.courses.mark_failed(course_id, failed_at, &message)?
            }
        };

        info!(
            course_id,
            old_status = %previous,
            new_status = %target,
            forced = force.is_some(),
            evidence = ?assessment.evidence,
            "Course status recovered"
        );

        Ok(RecoveryOutcome {
            course_id: course_id.to_string(),
            previous_status: previous,
            new_status: target.as_str().to_string(),
            forced: force.is_some(),
        })
    }

    /// Validates a scoped edit and enqueues `REGENERATE_SECTION`.
    pub fn request_section_edit(&self, request: SectionEditRequest) -> Result<SectionEditTicket> {
        let course = self.courses.require(&request.course_id)?;
        let tier = self.classifier.detect_tier(&request.instruction);
        let section_id = request.location.as_deref().and_then(location_to_section_id);

        let lesson = self
            .courses
            .lesson(&course.id, &request.lesson_id)?
            .ok_or_else(|| OrchestratorError::LessonNotFound {
                course_id: course.id.clone(),
                lesson_id: request.lesson_id.clone(),
            })?;

        match &section_id {
            Some(id) => {
                if parse_document(&lesson.content).section(id).is_none() {
                    return Err(crate::error::DocumentError::SectionNotFound {
                        section_id: id.clone(),
                    }
                    .into());
                }
            }
            None => check_lesson_size(&lesson.lesson_id, &lesson.content, tier.budget().total)?,
        }

        let metadata = RegenerationMetadata {
            lesson_id: request.lesson_id,
            instruction: request.instruction,
            section_id: section_id.clone(),
            tier,
        };
        let payload = self
            .payload_for(&course, JobType::RegenerateSection)?
            .with_metadata(serde_json::to_value(&metadata).map_err(|e| {
                OrchestratorError::Store(crate::store::StoreError::Json(e))
            })?);
        let job_id = self.queue.enqueue(payload)?;

        info!(
            course_id = %course.id,
            job_id = %job_id,
            lesson_id = %metadata.lesson_id,
            section = section_id.as_deref().unwrap_or("document"),
            %tier,
            "Section edit requested"
        );
        Ok(SectionEditTicket {
            job_id,
            tier,
            budget: tier.budget(),
            section_id,
        })
    }
}

fn parse_uuid(field: &'static str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|_| OrchestratorError::InvalidId {
        field,
        value: value.to_string(),
    })
}
