//! `REGENERATE_SECTION`: rewrites one section of a generated lesson, or the
//! whole lesson for document-scope edits, without rerunning the pipeline.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, info_span, warn};

use crate::error::DocumentError;
use crate::regeneration::{check_lesson_size, parse_document, token_budget, TokenBudget};
use crate::stage::Stage;
use crate::store::{CourseStore, TraceEvent, TraceStore};
use crate::worker::handler::{JobContext, JobHandler};
use crate::worker::job::{Job, RegenerationMetadata};

use super::capabilities::ContentGenerator;
use super::error::JobError;

pub const REGENERATION_PHASE: &str = "regeneration";

pub struct RegenerateHandler {
    courses: CourseStore,
    traces: TraceStore,
    generator: Arc<dyn ContentGenerator>,
}

impl RegenerateHandler {
    pub fn new(courses: CourseStore, traces: TraceStore, generator: Arc<dyn ContentGenerator>) -> Self {
        Self {
            courses,
            traces,
            generator,
        }
    }

    /// Returns the merged lesson, the prompt sent and the tokens spent.
    fn regenerate_section(
        &self,
        lesson: &str,
        section_id: &str,
        meta: &RegenerationMetadata,
        budget: TokenBudget,
    ) -> Result<(String, String, u32), JobError> {
        let doc = parse_document(lesson);
        let section = doc
            .section(section_id)
            .ok_or_else(|| DocumentError::SectionNotFound {
                section_id: section_id.to_string(),
            })?;
        let context = doc.context_within(section_id, budget.context)?;

        let prompt = format!(
            "Rewrite the section \"{}\" of the lesson \"{}\".\nInstruction: {}\n\
             Return only the new section body, without its heading.\n\n\
             Preceding content:\n{}\n\nCurrent section:\n{}\n",
            section.title, doc.lesson_title, meta.instruction, context, section.content
        );
        let generated = self.generator.generate(&prompt, budget)?;
        let merged = doc.merge(section_id, &generated.text)?;
        Ok((merged, prompt, generated.tokens_used))
    }

    fn regenerate_lesson(
        &self,
        lesson: &str,
        meta: &RegenerationMetadata,
        budget: TokenBudget,
    ) -> Result<(String, String, u32), JobError> {
        check_lesson_size(&meta.lesson_id, lesson, budget.total)?;
        let prompt = format!(
            "Revise the following lesson.\nInstruction: {}\n\
             Return the complete lesson, keeping its '# ' title line.\n\n{}\n",
            meta.instruction, lesson
        );
        let generated = self.generator.generate(&prompt, budget)?;

        let title_line = lesson.lines().next().unwrap_or_default();
        let body = generated.text.trim_start();
        let revised = if body.starts_with("# ") || title_line.is_empty() {
            format!("{}\n", body.trim_end())
        } else {
            format!("{}\n\n{}\n", title_line, body.trim_end())
        };
        Ok((revised, prompt, generated.tokens_used))
    }
}

impl JobHandler for RegenerateHandler {
    fn handle(&self, job: &Job, ctx: &JobContext<'_>) -> Result<(), JobError> {
        let meta = job.payload.regeneration()?;
        let course_id = job.course_id();
        let scope = meta.section_id.as_deref().unwrap_or("document");
        let _span = info_span!(
            "regenerate_section",
            course_id = %course_id,
            lesson_id = %meta.lesson_id,
            section = %scope,
            tier = %meta.tier
        )
        .entered();

        if self.courses.is_cancelled(&course_id)? {
            return Err(JobError::Cancelled { course_id });
        }

        let lesson = self
            .courses
            .lesson(&course_id, &meta.lesson_id)?
            .ok_or_else(|| DocumentError::LessonNotFound {
                lesson_id: meta.lesson_id.clone(),
            })?;

        // A redelivery after the rewrite was saved must not call the model again.
        if lesson.last_job_id.as_deref() == Some(job.id.as_str()) {
            info!("Edit already applied to the lesson, skipping");
            ctx.step(format!("Regenerated {} of {}", scope, meta.lesson_id), 100);
            return Ok(());
        }

        let budget = token_budget(meta.tier);
        ctx.step(format!("Regenerating {} of {}", scope, meta.lesson_id), 50);

        let started = Instant::now();
        let (content, prompt, tokens) = match meta.section_id.as_deref() {
            Some(section_id) => self.regenerate_section(&lesson.content, section_id, &meta, budget)?,
            None => self.regenerate_lesson(&lesson.content, &meta, budget)?,
        };

        if !self
            .courses
            .replace_lesson_content(&course_id, &meta.lesson_id, &content, &job.id)?
        {
            return Err(DocumentError::LessonNotFound {
                lesson_id: meta.lesson_id.clone(),
            }
            .into());
        }

        let event = TraceEvent::new(
            &course_id,
            Stage::GenerateContent.number(),
            REGENERATION_PHASE,
            &format!("regenerate:{}:{}", meta.lesson_id, scope),
        )
        .job(&job.id)
        .input(&prompt)
        .output(&content)
        .tokens(tokens)
        .took(started.elapsed());
        if let Err(e) = self.traces.append(event) {
            warn!("Failed to record trace: {}", e);
        }

        ctx.step(format!("Regenerated {} of {}", scope, meta.lesson_id), 100);
        info!(tokens, "Regeneration complete");
        Ok(())
    }
}
