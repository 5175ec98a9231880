use std::time::Instant;

use tracing::{debug, info, info_span, warn};

use crate::regeneration::document::CHARS_PER_TOKEN;
use crate::regeneration::{token_budget, ContextTier, TokenBudget};
use crate::stage::{calculate_progress, CourseStatus, Stage};
use crate::store::{CourseStore, TraceEvent, TraceStore};
use crate::worker::handler::{JobContext, JobHandler};
use crate::worker::job::Job;

use super::capabilities::Capabilities;
use super::error::JobError;

/// Runs one pipeline stage for a course.
pub struct StageHandler {
    stage: Stage,
    courses: CourseStore,
    traces: TraceStore,
    capabilities: Capabilities,
}

/// Per-run state passed between the helpers.
struct StageRun<'a> {
    job: &'a Job,
    ctx: &'a JobContext<'a>,
    course_id: String,
    has_documents: bool,
}

impl StageHandler {
    pub fn new(
        stage: Stage,
        courses: CourseStore,
        traces: TraceStore,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            stage,
            courses,
            traces,
            capabilities,
        }
    }

    /// Budget for full-generation calls.
    fn budget(&self) -> TokenBudget {
        token_budget(ContextTier::Global)
    }

    fn ensure_active(&self, course_id: &str) -> Result<(), JobError> {
        if self.courses.is_cancelled(course_id)? {
            return Err(JobError::Cancelled {
                course_id: course_id.to_string(),
            });
        }
        Ok(())
    }

    /// True when a previous delivery already finished this stage.
    fn already_done(&self, status: CourseStatus) -> bool {
        match status {
            CourseStatus::Completed => true,
            CourseStatus::StageComplete(s) | CourseStatus::AwaitingApproval(s) => s >= self.stage,
            CourseStatus::Running(s) => s > self.stage,
            _ => false,
        }
    }

    fn run_stage(&self, run: &StageRun<'_>) -> Result<String, JobError> {
        match self.stage {
            Stage::Initialize => self.initialize(run),
            Stage::ProcessDocuments => self.process_documents(run),
            Stage::Classify => self.classify(run),
            Stage::Analyze => self.analyze(run),
            Stage::GenerateStructure => self.generate_structure(run),
            Stage::GenerateContent => self.generate_content(run),
        }
    }

    fn initialize(&self, run: &StageRun<'_>) -> Result<String, JobError> {
        let brief = run
            .job
            .payload
            .message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "Create a course from the provided material.".to_string());
        Ok(brief)
    }

    fn process_documents(&self, run: &StageRun<'_>) -> Result<String, JobError> {
        let documents = self.courses.documents(&run.course_id)?;
        let mut combined = String::new();

        for doc in &documents {
            let started = Instant::now();
            let text = self.capabilities.converter.convert(&doc.name, &doc.content)?;
            debug!(document = %doc.name, chars = text.len(), "Converted document");
            self.trace(
                run,
                TraceEvent::new(&run.course_id, self.stage.number(), self.stage.step_name(), "convert_document")
                    .input(&doc.name)
                    .output(&text)
                    .took(started.elapsed()),
            );
            combined.push_str(&format!("## {}\n\n{}\n\n", doc.name, text));
        }

        Ok(combined)
    }

    fn classify(&self, run: &StageRun<'_>) -> Result<String, JobError> {
        let text = self
            .courses
            .stage_output(&run.course_id, Stage::ProcessDocuments)?
            .unwrap_or_default();
        let started = Instant::now();
        let classification = self.capabilities.classifier.classify(&text)?;
        let output = serde_json::to_string(&classification)
            .map_err(|e| JobError::Upstream(format!("unserializable classification: {}", e)))?;
        self.trace(
            run,
            TraceEvent::new(&run.course_id, self.stage.number(), self.stage.step_name(), "classify_sources")
                .output(&output)
                .took(started.elapsed()),
        );
        Ok(output)
    }

    fn analyze(&self, run: &StageRun<'_>) -> Result<String, JobError> {
        let brief = self
            .courses
            .stage_output(&run.course_id, Stage::Initialize)?
            .unwrap_or_default();
        let sources = self
            .courses
            .stage_output(&run.course_id, Stage::ProcessDocuments)?
            .unwrap_or_default();
        let classification = self
            .courses
            .stage_output(&run.course_id, Stage::Classify)?
            .unwrap_or_default();

        let budget = self.budget();
        let prompt = format!(
            "Analyze the material for a new course.\n\nBrief:\n{}\n\nClassification:\n{}\n\nSources:\n{}\n",
            brief,
            classification,
            head_within(&sources, budget.context)
        );
        self.generate(run, "analyze_sources", &prompt)
    }

    fn generate_structure(&self, run: &StageRun<'_>) -> Result<String, JobError> {
        let analysis = self
            .courses
            .stage_output(&run.course_id, Stage::Analyze)?
            .unwrap_or_default();
        let prompt = format!(
            "Propose the lesson outline for this course as a list, one lesson title per line.\n\nAnalysis:\n{}\n",
            head_within(&analysis, self.budget().context)
        );
        let response = self.generate(run, "generate_outline", &prompt)?;

        let titles = parse_lesson_titles(&response);
        if titles.is_empty() {
            return Err(JobError::Upstream(
                "course structure response contained no lesson titles".to_string(),
            ));
        }
        info!(lessons = titles.len(), "Course structure generated");
        Ok(titles
            .iter()
            .map(|t| format!("- {}", t))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn generate_content(&self, run: &StageRun<'_>) -> Result<String, JobError> {
        let outline = self
            .courses
            .stage_output(&run.course_id, Stage::GenerateStructure)?
            .unwrap_or_default();
        let titles = parse_lesson_titles(&outline);
        if titles.is_empty() {
            return Err(JobError::Upstream(format!(
                "no course structure recorded for course {}",
                run.course_id
            )));
        }

        let from = calculate_progress(self.stage.running_status(), run.has_documents);
        let to = calculate_progress(&self.stage.complete_status(), run.has_documents);
        let analysis = self
            .courses
            .stage_output(&run.course_id, Stage::Analyze)?
            .unwrap_or_default();

        for (i, title) in titles.iter().enumerate() {
            let position = i as u32 + 1;
            let lesson_id = format!("lesson_{}", position);

            if self.courses.lesson(&run.course_id, &lesson_id)?.is_some() {
                debug!(lesson_id = %lesson_id, "Lesson already generated, skipping");
                continue;
            }

            let prompt = format!(
                "Write lesson {} of the course: \"{}\".\nUse one '# ' title line, then '## ' sections: \
                 an introduction, the body sections and a summary.\n\nCourse outline:\n{}\n\nAnalysis:\n{}\n",
                position,
                title,
                outline,
                head_within(&analysis, self.budget().context)
            );
            let text = self.generate(run, &format!("generate_lesson:{}", lesson_id), &prompt)?;
            let content = with_title(title, &text);
            self.courses
                .save_lesson(&run.course_id, &lesson_id, position, title, &content)?;

            let percentage = interpolate(from, to, position as usize, titles.len());
            let message = format!("Generated lesson {} of {}", position, titles.len());
            self.courses.update_progress(&run.course_id, |p| {
                p.percentage = percentage;
                p.message = message.clone();
            })?;
            run.ctx.step(message, percentage);
        }

        Ok(format!("{} lesson(s) generated", titles.len()))
    }

    /// One generation call behind a cancellation checkpoint, traced.
    fn generate(&self, run: &StageRun<'_>, step_name: &str, prompt: &str) -> Result<String, JobError> {
        self.ensure_active(&run.course_id)?;

        let started = Instant::now();
        let generated = self.capabilities.generator.generate(prompt, self.budget())?;
        self.trace(
            run,
            TraceEvent::new(&run.course_id, self.stage.number(), self.stage.step_name(), step_name)
                .input(prompt)
                .output(&generated.text)
                .tokens(generated.tokens_used)
                .took(started.elapsed()),
        );
        Ok(generated.text)
    }

    /// Traces are observability only; a failed write never fails the stage.
    fn trace(&self, run: &StageRun<'_>, event: TraceEvent) {
        if let Err(e) = self.traces.append(event.job(&run.job.id)) {
            warn!("Failed to record trace: {}", e);
        }
    }
}

impl JobHandler for StageHandler {
    fn handle(&self, job: &Job, ctx: &JobContext<'_>) -> Result<(), JobError> {
        let course_id = job.course_id();
        let _span = info_span!(
            "stage",
            stage = self.stage.number(),
            course_id = %course_id
        )
        .entered();

        let course = self.courses.require(&course_id)?;
        match course.status() {
            CourseStatus::Cancelled => {
                return Err(JobError::Cancelled { course_id });
            }
            CourseStatus::Failed => {
                info!("Course already failed, nothing to do");
                return Ok(());
            }
            status if self.already_done(status) => {
                info!(status = %course.generation_status, "Stage already finished, skipping");
                return Ok(());
            }
            _ => {}
        }

        if !self.courses.begin_stage(&course_id, self.stage)? {
            return Err(JobError::Cancelled { course_id });
        }
        ctx.step(
            self.stage.label(),
            calculate_progress(self.stage.running_status(), course.has_documents),
        );

        let run = StageRun {
            job,
            ctx,
            course_id: course_id.clone(),
            has_documents: course.has_documents,
        };
        let started = Instant::now();
        let output = self.run_stage(&run)?;

        self.courses.save_stage_output(&course_id, self.stage, &output)?;
        self.trace(
            &run,
            TraceEvent::new(&course_id, self.stage.number(), self.stage.step_name(), "stage_complete")
                .output(&output)
                .took(started.elapsed()),
        );

        if !self.courses.complete_stage(&course_id, self.stage)? {
            return Err(JobError::Cancelled { course_id });
        }
        ctx.step(
            format!("{} complete", self.stage.label()),
            calculate_progress(&self.stage.complete_status(), course.has_documents),
        );
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "Stage complete");
        Ok(())
    }
}

/// Reads lesson titles from a list: `- x`, `* x`, `1. x`, `1) x` or `## x`.
pub fn parse_lesson_titles(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = if let Some(rest) = line.strip_prefix("## ") {
                rest
            } else if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
                rest
            } else {
                let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
                if digits == 0 {
                    return None;
                }
                line[digits..]
                    .strip_prefix(". ")
                    .or_else(|| line[digits..].strip_prefix(") "))?
            };
            let title = rest.trim();
            (!title.is_empty()).then(|| title.to_string())
        })
        .collect()
}

/// Ensures a lesson starts with its `# ` title line.
fn with_title(title: &str, text: &str) -> String {
    let body = text.trim_start_matches(|c| c == '\n' || c == '\r');
    if body.starts_with("# ") {
        let mut content = body.to_string();
        if !content.ends_with('\n') {
            content.push('\n');
        }
        content
    } else {
        format!("# {}\n\n{}\n", title, body.trim_end())
    }
}

/// First `tokens` worth of `text`.
fn head_within(text: &str, tokens: u32) -> &str {
    let max_chars = tokens as usize * CHARS_PER_TOKEN;
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

fn interpolate(from: u8, to: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return to;
    }
    let span = f64::from(to.saturating_sub(from));
    let value = f64::from(from) + span * done as f64 / total as f64;
    value.round().min(f64::from(to)) as u8
}
