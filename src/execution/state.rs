//! Execution State
//!
//! Snapshots of a run's progress. Every transition returns a new
//! [`ExecutionState`]; the executor swaps the stored value and readers get
//! clones, so a snapshot never changes after it is handed out.
//!
//! Also holds [`StepExecutionRecord`], the per-step entry of a run's
//! result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle of an executor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// True for `Completed`, `Failed` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Snapshot of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub status: ExecutionStatus,
    pub current_step: Option<String>,
    pub completed_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    /// Percentage of top-level steps completed, 0 to 100
    pub progress: f64,
    pub total_steps: usize,
    pub execution_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
}

impl ExecutionState {
    /// The state of an executor that has not run yet.
    pub fn idle() -> Self {
        Self::default()
    }

    /// A fresh running state.
    pub fn started(execution_id: &str, total_steps: usize) -> Self {
        Self {
            status: ExecutionStatus::Running,
            total_steps,
            execution_id: Some(execution_id.to_string()),
            start_time: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Marks `step_id` as the step in progress.
    pub fn running_step(&self, step_id: &str) -> Self {
        Self {
            current_step: Some(step_id.to_string()),
            ..self.clone()
        }
    }

    pub fn step_completed(&self, step_id: &str) -> Self {
        let mut completed_steps = self.completed_steps.clone();
        completed_steps.push(step_id.to_string());
        let progress = percentage(completed_steps.len(), self.total_steps);
        Self {
            current_step: None,
            completed_steps,
            progress,
            ..self.clone()
        }
    }

    pub fn step_failed(&self, step_id: &str) -> Self {
        let mut failed_steps = self.failed_steps.clone();
        failed_steps.push(step_id.to_string());
        Self {
            current_step: None,
            failed_steps,
            ..self.clone()
        }
    }

    /// Moves to a terminal status.
    pub fn finished(&self, status: ExecutionStatus) -> Self {
        Self {
            status,
            current_step: None,
            ..self.clone()
        }
    }
}

/// `done / total * 100`; an empty run counts as complete.
pub fn percentage(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}

/// Timing and mode of one step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub execution_id: String,
    pub dry_run: bool,
}

/// Why a step failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub code: String,
}

/// Result of one top-level step in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecutionRecord {
    pub step_id: String,
    pub step_type: String,
    pub success: bool,
    pub skipped: bool,
    pub outputs: Map<String, Value>,
    pub metadata: RecordMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_state() {
        let state = ExecutionState::idle();
        assert_eq!(state.status, ExecutionStatus::Idle);
        assert!(state.execution_id.is_none());
        assert!(!state.status.is_terminal());
    }

    #[test]
    fn test_transitions_build_new_values() {
        let started = ExecutionState::started("exec-1", 4);
        let running = started.running_step("a");
        let done = running.step_completed("a");

        assert!(started.current_step.is_none());
        assert_eq!(running.current_step.as_deref(), Some("a"));
        assert!(running.completed_steps.is_empty());
        assert_eq!(done.completed_steps, vec!["a"]);
        assert_eq!(done.progress, 25.0);
        assert!(done.current_step.is_none());
    }

    #[test]
    fn test_failed_and_finished() {
        let state = ExecutionState::started("exec-2", 2)
            .running_step("a")
            .step_failed("a")
            .finished(ExecutionStatus::Failed);
        assert_eq!(state.failed_steps, vec!["a"]);
        assert_eq!(state.progress, 0.0);
        assert!(state.status.is_terminal());
        assert_eq!(state.execution_id.as_deref(), Some("exec-2"));
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 0), 100.0);
        assert_eq!(percentage(1, 3) as u32, 33);
        assert_eq!(percentage(3, 3), 100.0);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ExecutionStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
