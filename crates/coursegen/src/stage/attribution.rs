//! Per-stage node states for rendering a course's pipeline.

use serde::Serialize;

use super::progress::{GenerationProgress, StepStatus};
use super::{CourseStatus, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Active,
    AwaitingApproval,
    Completed,
    Skipped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageNode {
    pub stage: u8,
    pub label: &'static str,
    pub state: NodeState,
}

/// Builds one node per stage.
///
/// For a failed course the errored node is `failed_at_stage`; stages before
/// it are completed and later ones pending. When that is unknown, the last
/// stage that was running according to `progress` is marked instead, which
/// is less precise.
pub fn stage_nodes(
    status: &str,
    failed_at_stage: Option<u8>,
    has_documents: bool,
    progress: Option<&GenerationProgress>,
) -> Vec<StageNode> {
    let parsed = CourseStatus::parse(status);

    let error_stage = match parsed {
        CourseStatus::Failed => failed_at_stage
            .and_then(Stage::from_number)
            .or_else(|| progress.and_then(last_active_stage)),
        _ => None,
    };

    Stage::ALL
        .into_iter()
        .map(|stage| {
            let state = match (parsed, error_stage) {
                (CourseStatus::Failed, Some(failed)) => relative_state(stage, failed, NodeState::Error),
                (CourseStatus::Failed, None) => NodeState::Pending,
                (CourseStatus::Completed, _) => NodeState::Completed,
                (CourseStatus::Running(current), _) => {
                    relative_state(stage, current, NodeState::Active)
                }
                (CourseStatus::StageComplete(current), _) => {
                    if stage <= current {
                        NodeState::Completed
                    } else {
                        NodeState::Pending
                    }
                }
                (CourseStatus::AwaitingApproval(current), _) => {
                    relative_state(stage, current, NodeState::AwaitingApproval)
                }
                (CourseStatus::Cancelled, _) | (CourseStatus::Unknown, _) => NodeState::Pending,
            };

            let state = if stage.requires_documents() && !has_documents && state != NodeState::Error {
                NodeState::Skipped
            } else {
                state
            };

            StageNode {
                stage: stage.number(),
                label: stage.label(),
                state,
            }
        })
        .collect()
}

fn relative_state(stage: Stage, pivot: Stage, at_pivot: NodeState) -> NodeState {
    match stage.cmp(&pivot) {
        std::cmp::Ordering::Less => NodeState::Completed,
        std::cmp::Ordering::Equal => at_pivot,
        std::cmp::Ordering::Greater => NodeState::Pending,
    }
}

/// The latest stage whose step was started but never completed.
fn last_active_stage(progress: &GenerationProgress) -> Option<Stage> {
    progress
        .steps
        .iter()
        .rev()
        .filter(|s| matches!(s.status, StepStatus::InProgress | StepStatus::Failed))
        .find_map(|s| Stage::ALL.into_iter().find(|stage| stage.step_name() == s.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn states(nodes: &[StageNode]) -> Vec<NodeState> {
        nodes.iter().map(|n| n.state).collect()
    }

    #[test]
    fn test_failed_at_stage_attribution() {
        use NodeState::*;
        let nodes = stage_nodes("failed", Some(4), true, None);
        assert_eq!(
            states(&nodes),
            vec![Completed, Completed, Completed, Error, Pending, Pending]
        );
    }

    #[test]
    fn test_failed_fallback_uses_last_running_step() {
        use NodeState::*;
        let now = Utc::now();
        let mut progress = GenerationProgress::default();
        progress.complete_step("initialize", now);
        progress.start_step("analyze", now);

        let nodes = stage_nodes("failed", None, false, Some(&progress));
        assert_eq!(
            states(&nodes),
            vec![Completed, Skipped, Skipped, Error, Pending, Pending]
        );
    }

    #[test]
    fn test_failed_without_any_evidence() {
        let nodes = stage_nodes("failed", None, true, None);
        assert!(nodes.iter().all(|n| n.state == NodeState::Pending));
    }

    #[test]
    fn test_running_and_gate() {
        use NodeState::*;
        assert_eq!(
            states(&stage_nodes("stage_3_classifying", None, true, None)),
            vec![Completed, Completed, Active, Pending, Pending, Pending]
        );
        assert_eq!(
            states(&stage_nodes("stage_5_awaiting_approval", None, false, None)),
            vec![Completed, Skipped, Skipped, Completed, AwaitingApproval, Pending]
        );
    }

    #[test]
    fn test_completed() {
        let nodes = stage_nodes("completed", None, true, None);
        assert!(nodes.iter().all(|n| n.state == NodeState::Completed));
        assert_eq!(nodes[5].stage, 6);
    }
}
