//! Step and job execution results.

use serde::{Deserialize, Serialize};

/// Why a step did not execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// An inclusion filter was configured and the step matched nothing.
    FilteredOut,
    /// The step was in the user's skip set.
    ExplicitlySkipped,
    /// A job allow-list was configured and the enclosing job is absent.
    JobNotSelected,
    /// The job's condition evaluated to false.
    ConditionalSkip,
    /// A job-level dependency previously failed.
    DependencyFailed,
}

/// Terminal status of a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed {
        exit_code: Option<i32>,
        message: String,
    },
    Skipped {
        reason: SkipReason,
        detail: String,
    },
}

/// Result of one step. Captured output is already masked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub name: String,
    #[serde(flatten)]
    pub status: StepStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn skipped(step_id: impl Into<String>, name: impl Into<String>, reason: SkipReason, detail: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            name: name.into(),
            status: StepStatus::Skipped {
                reason,
                detail: detail.into(),
            },
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
        }
    }

    pub fn success(&self) -> bool {
        !matches!(self.status, StepStatus::Failed { .. })
    }

    pub fn executed(&self) -> bool {
        !matches!(self.status, StepStatus::Skipped { .. })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match &self.status {
            StepStatus::Succeeded => Some(0),
            StepStatus::Failed { exit_code, .. } => *exit_code,
            StepStatus::Skipped { .. } => None,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match &self.status {
            StepStatus::Skipped { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Result of one job: its ordered step results plus overall success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub name: String,
    pub success: bool,
    pub steps: Vec<StepResult>,
    pub duration_ms: u64,
    /// Job-level failure detail for faults that happen outside any step
    /// (image pull, container create, dependency ordering).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobResult {
    pub fn executed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.executed()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_step_fields() {
        let result = StepResult::skipped("deploy", "Deploy", SkipReason::ExplicitlySkipped, "in skip list");
        assert!(result.success());
        assert!(!result.executed());
        assert_eq!(result.skip_reason(), Some(SkipReason::ExplicitlySkipped));
        assert_eq!(result.exit_code(), None);
    }

    #[test]
    fn test_failed_step_exit_code() {
        let result = StepResult {
            step_id: "t".to_string(),
            name: "t".to_string(),
            status: StepStatus::Failed {
                exit_code: Some(2),
                message: "exit 2".to_string(),
            },
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 5,
        };
        assert!(!result.success());
        assert!(result.executed());
        assert_eq!(result.exit_code(), Some(2));
    }

    #[test]
    fn test_json_shape_is_machine_readable() {
        let result = StepResult::skipped("deploy", "Deploy", SkipReason::FilteredOut, "no match");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "filtered_out");
    }
}
