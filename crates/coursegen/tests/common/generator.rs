//! Deterministic stand-in for the external generation capability.
//!
//! Responses are picked from the shape of the prompt, so the full pipeline
//! can run without a model: outlines come back as numbered lists, lessons as
//! sectioned markdown, section rewrites as a fixed body.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use coursegen::pipeline::{CapabilityError, ContentGenerator, Generated};
use coursegen::regeneration::TokenBudget;

pub const OUTLINE: &str = "1. Foundations\n2. Practice\n";
pub const REWRITTEN_SECTION: &str = "Rewritten section body.";
pub const REVISED_LESSON_BODY: &str = "## Introduction\n\nRevised introduction.\n\n## Summary\n\nRevised summary.\n";
pub const ANALYSIS: &str = "The material covers core concepts and hands-on practice.";

#[derive(Default)]
pub struct ScriptedGenerator {
    prompts: Mutex<Vec<(String, TokenBudget)>>,
    failures_remaining: AtomicU32,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls fail with an upstream error.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn prompts(&self) -> Vec<(String, TokenBudget)> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn respond(prompt: &str) -> String {
        if prompt.starts_with("Propose the lesson outline") {
            return OUTLINE.to_string();
        }
        if prompt.starts_with("Write lesson") {
            let title = prompt
                .split_once(": \"")
                .and_then(|(_, rest)| rest.split_once('"'))
                .map(|(title, _)| title)
                .unwrap_or("Untitled");
            return lesson_markdown(title);
        }
        if prompt.starts_with("Rewrite the section") {
            return REWRITTEN_SECTION.to_string();
        }
        if prompt.starts_with("Revise the following lesson") {
            return REVISED_LESSON_BODY.to_string();
        }
        ANALYSIS.to_string()
    }
}

/// Lesson as the generator writes it: title, introduction, one body
/// section, summary.
pub fn lesson_markdown(title: &str) -> String {
    format!(
        "# {title}\n\n## Introduction\n\nWhy {title} matters.\n\n## Core ideas\n\nThe main points of {title}.\n\n## Summary\n\nWhat {title} covered.\n"
    )
}

impl ContentGenerator for ScriptedGenerator {
    fn generate(&self, prompt: &str, budget: TokenBudget) -> Result<Generated, CapabilityError> {
        self.prompts
            .lock()
            .unwrap()
            .push((prompt.to_string(), budget));

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CapabilityError::Generation(
                "scripted upstream outage".to_string(),
            ));
        }

        let text = Self::respond(prompt);
        Ok(Generated {
            tokens_used: (prompt.len() + text.len()) as u32 / 4,
            text,
        })
    }
}
