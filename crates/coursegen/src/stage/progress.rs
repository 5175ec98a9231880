//! Course progress: the stored step list and the percentage model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CourseStatus, Stage};

/// Breakpoints that stretch the no-documents pipeline back over 0..=100.
/// Stage 2 and 3 weights (10..=35) collapse onto stage 1's end.
const NO_DOCUMENT_BREAKPOINTS: [(f64, f64); 6] = [
    (0.0, 0.0),
    (10.0, 15.0),
    (35.0, 15.0),
    (50.0, 45.0),
    (70.0, 70.0),
    (100.0, 100.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressStep {
    pub name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// The `generation_progress` document stored on a course.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationProgress {
    #[serde(default)]
    pub percentage: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub steps: Vec<ProgressStep>,
}

impl GenerationProgress {
    fn step_mut(&mut self, name: &str) -> &mut ProgressStep {
        let idx = match self.steps.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                self.steps.push(ProgressStep {
                    name: name.to_string(),
                    status: StepStatus::Pending,
                    started_at: None,
                    completed_at: None,
                });
                self.steps.len() - 1
            }
        };
        &mut self.steps[idx]
    }

    pub fn start_step(&mut self, name: &str, now: DateTime<Utc>) {
        let step = self.step_mut(name);
        step.status = StepStatus::InProgress;
        step.started_at = Some(now);
        step.completed_at = None;
    }

    pub fn complete_step(&mut self, name: &str, now: DateTime<Utc>) {
        let step = self.step_mut(name);
        step.status = StepStatus::Completed;
        if step.started_at.is_none() {
            step.started_at = Some(now);
        }
        step.completed_at = Some(now);
    }

    /// Marks every in-progress step failed.
    pub fn fail_running_steps(&mut self) {
        for step in &mut self.steps {
            if step.status == StepStatus::InProgress {
                step.status = StepStatus::Failed;
            }
        }
    }

    /// Forces a finished state: 100% and every step completed, with missing
    /// completion times filled in.
    pub fn force_complete(&mut self, now: DateTime<Utc>) {
        self.percentage = 100;
        for step in &mut self.steps {
            step.status = StepStatus::Completed;
            if step.completed_at.is_none() {
                step.completed_at = Some(now);
            }
        }
    }

    pub fn all_steps_completed(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.status == StepStatus::Completed)
    }
}

/// Percentage shown for a status string.
///
/// `completed` is always 100; `failed`, `cancelled` and unrecognized strings
/// are 0. Without documents the stage weights are remapped so the bar still
/// spans 0 to 100.
pub fn calculate_progress(status: &str, has_documents: bool) -> u8 {
    let raw = match CourseStatus::parse(status) {
        CourseStatus::Completed => return 100,
        CourseStatus::Failed | CourseStatus::Cancelled | CourseStatus::Unknown => return 0,
        CourseStatus::Running(stage) => stage.active_weight(),
        CourseStatus::StageComplete(stage) | CourseStatus::AwaitingApproval(stage) => {
            stage.completed_weight()
        }
    };

    if has_documents {
        raw
    } else {
        remap_without_documents(raw)
    }
}

fn remap_without_documents(raw: u8) -> u8 {
    let x = f64::from(raw);
    for pair in NO_DOCUMENT_BREAKPOINTS.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x <= x1 {
            let y = y0 + (x - x0) * (y1 - y0) / (x1 - x0);
            return y.round().clamp(0.0, 100.0) as u8;
        }
    }
    100
}

/// Highest percentage a stage can show when the course has no documents.
pub fn remapped_ceiling(stage: Stage) -> u8 {
    remap_without_documents(stage.completed_weight())
}
