//! The six-stage generation pipeline and its status strings.
//!
//! Course status strings look like `stage_<N>_<phase>`. Three legacy values
//! (`initializing`, `pending`, `queued`) are read as stage 1. A status ending
//! in `_awaiting_approval` is a gate; one containing `_complete` means the
//! stage finished.

pub mod attribution;
pub mod progress;
pub mod recovery;

use serde::{Deserialize, Serialize};

use crate::worker::job::JobType;

pub use attribution::{stage_nodes, NodeState, StageNode};
pub use progress::{calculate_progress, GenerationProgress, ProgressStep, StepStatus};
pub use recovery::{assess_course, ProgressEvidence, StuckAssessment, SuggestedStatus};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initialize,
    ProcessDocuments,
    Classify,
    Analyze,
    GenerateStructure,
    GenerateContent,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Initialize,
        Stage::ProcessDocuments,
        Stage::Classify,
        Stage::Analyze,
        Stage::GenerateStructure,
        Stage::GenerateContent,
    ];

    pub fn number(self) -> u8 {
        match self {
            Stage::Initialize => 1,
            Stage::ProcessDocuments => 2,
            Stage::Classify => 3,
            Stage::Analyze => 4,
            Stage::GenerateStructure => 5,
            Stage::GenerateContent => 6,
        }
    }

    pub fn from_number(n: u8) -> Option<Stage> {
        Stage::ALL.get((n as usize).checked_sub(1)?).copied()
    }

    pub fn job_type(self) -> JobType {
        match self {
            Stage::Initialize => JobType::Initialize,
            Stage::ProcessDocuments => JobType::ProcessDocuments,
            Stage::Classify => JobType::Classify,
            Stage::Analyze => JobType::Analyze,
            Stage::GenerateStructure => JobType::GenerateStructure,
            Stage::GenerateContent => JobType::GenerateContent,
        }
    }

    pub fn from_job_type(job_type: JobType) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.job_type() == job_type)
    }

    /// Status written while the stage runs.
    pub fn running_status(self) -> &'static str {
        match self {
            Stage::Initialize => "stage_1_init",
            Stage::ProcessDocuments => "stage_2_processing",
            Stage::Classify => "stage_3_classifying",
            Stage::Analyze => "stage_4_analyzing",
            Stage::GenerateStructure => "stage_5_structuring",
            Stage::GenerateContent => "stage_6_generating",
        }
    }

    pub fn complete_status(self) -> String {
        format!("stage_{}_complete", self.number())
    }

    pub fn awaiting_approval_status(self) -> String {
        format!("stage_{}_awaiting_approval", self.number())
    }

    /// Progress step name recorded for this stage.
    pub fn step_name(self) -> &'static str {
        match self {
            Stage::Initialize => "initialize",
            Stage::ProcessDocuments => "process_documents",
            Stage::Classify => "classify",
            Stage::Analyze => "analyze",
            Stage::GenerateStructure => "generate_structure",
            Stage::GenerateContent => "generate_content",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Initialize => "Initializing course",
            Stage::ProcessDocuments => "Processing documents",
            Stage::Classify => "Classifying documents",
            Stage::Analyze => "Analyzing sources",
            Stage::GenerateStructure => "Generating course structure",
            Stage::GenerateContent => "Generating lesson content",
        }
    }

    /// Stages 2 and 3 only run when the course has source documents.
    pub fn requires_documents(self) -> bool {
        matches!(self, Stage::ProcessDocuments | Stage::Classify)
    }

    pub fn active_weight(self) -> u8 {
        match self {
            Stage::Initialize => 5,
            Stage::ProcessDocuments => 15,
            Stage::Classify => 25,
            Stage::Analyze => 40,
            Stage::GenerateStructure => 60,
            Stage::GenerateContent => 85,
        }
    }

    pub fn completed_weight(self) -> u8 {
        match self {
            Stage::Initialize => 10,
            Stage::ProcessDocuments => 20,
            Stage::Classify => 35,
            Stage::Analyze => 50,
            Stage::GenerateStructure => 70,
            Stage::GenerateContent => 100,
        }
    }

    /// The stage that runs after this one, skipping document stages when
    /// the course has no documents.
    pub fn next(self, has_documents: bool) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|s| *s > self)
            .find(|s| has_documents || !s.requires_documents())
    }

    pub fn first() -> Stage {
        Stage::Initialize
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage {}", self.number())
    }
}

/// Interpretation of a course status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseStatus {
    Running(Stage),
    StageComplete(Stage),
    AwaitingApproval(Stage),
    Completed,
    Failed,
    Cancelled,
    Unknown,
}

impl CourseStatus {
    pub fn parse(status: &str) -> CourseStatus {
        let status = status.trim().to_ascii_lowercase();
        match status.as_str() {
            STATUS_COMPLETED => return CourseStatus::Completed,
            STATUS_FAILED => return CourseStatus::Failed,
            STATUS_CANCELLED | "canceled" => return CourseStatus::Cancelled,
            "initializing" | STATUS_PENDING | "queued" => {
                return CourseStatus::Running(Stage::Initialize)
            }
            _ => {}
        }

        let Some(stage) = parse_stage_prefix(&status) else {
            return CourseStatus::Unknown;
        };

        if status.ends_with("_awaiting_approval") {
            CourseStatus::AwaitingApproval(stage)
        } else if status.contains("_complete") {
            CourseStatus::StageComplete(stage)
        } else {
            CourseStatus::Running(stage)
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            CourseStatus::Running(s)
            | CourseStatus::StageComplete(s)
            | CourseStatus::AwaitingApproval(s) => Some(*s),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CourseStatus::Completed | CourseStatus::Failed | CourseStatus::Cancelled
        )
    }

    /// True while the pipeline should be making progress on its own. Gates
    /// wait on a person and are excluded.
    pub fn is_generating(&self) -> bool {
        matches!(
            self,
            CourseStatus::Running(_) | CourseStatus::StageComplete(_)
        )
    }
}

/// Reads `N` out of `stage_<N>...`.
fn parse_stage_prefix(status: &str) -> Option<Stage> {
    let rest = status.strip_prefix("stage_")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    Stage::from_number(digits.parse().ok()?)
}

/// Stage number a status string refers to, if any.
pub fn stage_of(status: &str) -> Option<Stage> {
    CourseStatus::parse(status).stage()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_running_and_complete() {
        assert_eq!(
            CourseStatus::parse("stage_4_analyzing"),
            CourseStatus::Running(Stage::Analyze)
        );
        assert_eq!(
            CourseStatus::parse("stage_2_complete"),
            CourseStatus::StageComplete(Stage::ProcessDocuments)
        );
        assert_eq!(
            CourseStatus::parse("stage_5_awaiting_approval"),
            CourseStatus::AwaitingApproval(Stage::GenerateStructure)
        );
    }

    #[test]
    fn test_legacy_aliases_are_stage_one() {
        for status in ["initializing", "pending", "queued"] {
            assert_eq!(stage_of(status), Some(Stage::Initialize));
        }
    }

    #[test]
    fn test_terminal_and_unknown() {
        assert!(CourseStatus::parse("completed").is_terminal());
        assert!(CourseStatus::parse("failed").is_terminal());
        assert!(CourseStatus::parse("cancelled").is_terminal());
        assert_eq!(CourseStatus::parse("stage_9_init"), CourseStatus::Unknown);
        assert_eq!(CourseStatus::parse("garbage"), CourseStatus::Unknown);
    }

    #[test]
    fn test_gates_are_not_generating() {
        assert!(CourseStatus::parse("stage_3_classifying").is_generating());
        assert!(CourseStatus::parse("pending").is_generating());
        assert!(!CourseStatus::parse("stage_3_awaiting_approval").is_generating());
        assert!(!CourseStatus::parse("completed").is_generating());
    }

    #[test]
    fn test_next_skips_document_stages() {
        assert_eq!(Stage::Initialize.next(true), Some(Stage::ProcessDocuments));
        assert_eq!(Stage::Initialize.next(false), Some(Stage::Analyze));
        assert_eq!(Stage::GenerateContent.next(true), None);
    }

    #[test]
    fn test_job_type_mapping() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_job_type(stage.job_type()), Some(stage));
            assert_eq!(Stage::from_number(stage.number()), Some(stage));
            assert_eq!(stage_of(stage.running_status()), Some(stage));
        }
        assert_eq!(Stage::from_job_type(JobType::Test), None);
        assert_eq!(Stage::from_number(0), None);
    }

    #[test]
    fn test_weights_increase() {
        let mut last = 0;
        for stage in Stage::ALL {
            assert!(stage.active_weight() > last);
            assert!(stage.completed_weight() > stage.active_weight());
            last = stage.completed_weight();
        }
        assert_eq!(last, 100);
    }
}
