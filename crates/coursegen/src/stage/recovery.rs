//! Stuck-generation detection.
//!
//! A course is stuck when its status has stayed in the generating class for
//! longer than the threshold. The suggested resolution leans toward failure:
//! only clean progress evidence (every step completed, or 100% with no steps
//! recorded) suggests `completed`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::progress::{GenerationProgress, StepStatus};
use super::CourseStatus;

pub const DEFAULT_STUCK_THRESHOLD_MINUTES: i64 = 15;

/// What the stored progress says about a stuck course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEvidence {
    /// Everything reports completed.
    Clean,
    /// Consistent, but not finished.
    Incomplete,
    /// Present but contradictory or unreadable.
    Ambiguous,
    /// Nothing stored.
    Missing,
}

impl ProgressEvidence {
    pub fn from_stored(progress: Option<&str>) -> Self {
        let Some(raw) = progress.filter(|p| !p.trim().is_empty()) else {
            return ProgressEvidence::Missing;
        };
        match serde_json::from_str::<GenerationProgress>(raw) {
            Ok(progress) => Self::from_progress(&progress),
            Err(e) => {
                log::warn!("Unreadable generation progress: {}", e);
                ProgressEvidence::Ambiguous
            }
        }
    }

    pub fn from_progress(progress: &GenerationProgress) -> Self {
        if progress.all_steps_completed() {
            return ProgressEvidence::Clean;
        }
        if progress.percentage >= 100 {
            return if progress.steps.is_empty() {
                ProgressEvidence::Clean
            } else {
                ProgressEvidence::Ambiguous
            };
        }
        let any_failed = progress.steps.iter().any(|s| s.status == StepStatus::Failed);
        if any_failed {
            ProgressEvidence::Ambiguous
        } else {
            ProgressEvidence::Incomplete
        }
    }

    pub fn suggested_status(self) -> SuggestedStatus {
        match self {
            ProgressEvidence::Clean => SuggestedStatus::Completed,
            _ => SuggestedStatus::Failed,
        }
    }
}

/// Terminal status a stuck course can be moved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestedStatus {
    Completed,
    Failed,
}

impl SuggestedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestedStatus::Completed => "completed",
            SuggestedStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SuggestedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SuggestedStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "completed" => Ok(SuggestedStatus::Completed),
            "failed" => Ok(SuggestedStatus::Failed),
            other => Err(format!(
                "'{}' is not a recovery status (expected completed or failed)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckAssessment {
    pub is_stuck: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_status: Option<SuggestedStatus>,
    pub evidence: ProgressEvidence,
    pub age_minutes: i64,
}

/// Decides whether a course is stuck. Age is measured from `created_at`.
pub fn assess_course(
    status: &str,
    created_at: DateTime<Utc>,
    progress: Option<&str>,
    now: DateTime<Utc>,
    threshold: Duration,
) -> StuckAssessment {
    let evidence = ProgressEvidence::from_stored(progress);
    let age = now.signed_duration_since(created_at);
    let is_stuck = CourseStatus::parse(status).is_generating() && age > threshold;

    StuckAssessment {
        is_stuck,
        suggested_status: is_stuck.then(|| evidence.suggested_status()),
        evidence,
        age_minutes: age.num_minutes(),
    }
}

/// Message stored on a course that recovery moved to `failed`.
pub fn timeout_message(threshold: Duration) -> String {
    format!(
        "Generation timed out: no terminal status after {} minutes",
        threshold.num_minutes()
    )
}
