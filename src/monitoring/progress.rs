//! Progress Events
//!
//! Events emitted by the executor while a workflow runs, and the
//! [`ProgressReporter`] trait that receives them. Events are delivered
//! synchronously and in execution order.
//!
//! Any `Fn(&ProgressEvent) + Send + Sync` closure is a reporter.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventKind {
    WorkflowStarted,
    StepStarted,
    StepCompleted,
    StepFailed,
    WorkflowCompleted,
    WorkflowFailed,
}

impl ProgressEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowStarted => "workflow_started",
            Self::StepStarted => "step_started",
            Self::StepCompleted => "step_completed",
            Self::StepFailed => "step_failed",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowFailed => "workflow_failed",
        }
    }
}

/// A single progress update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub kind: ProgressEventKind,
    pub timestamp: DateTime<Utc>,
    /// Percentage of top-level steps completed, 0 to 100
    pub progress: f64,
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_type: Option<String>,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(kind: ProgressEventKind, execution_id: &str, progress: f64, message: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            progress: progress.clamp(0.0, 100.0),
            execution_id: execution_id.to_string(),
            step_id: None,
            step_type: None,
            message: message.into(),
        }
    }

    pub fn for_step(mut self, step_id: &str, step_type: &str) -> Self {
        self.step_id = Some(step_id.to_string());
        self.step_type = Some(step_type.to_string());
        self
    }
}

/// Receives progress events.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

impl<F> ProgressReporter for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn report(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Keeps every event it receives.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the events received so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Kinds of the events received so far, in order.
    pub fn kinds(&self) -> Vec<ProgressEventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }
}

impl ProgressReporter for CollectingReporter {
    fn report(&self, event: &ProgressEvent) {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        events.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_event_builder() {
        let event = ProgressEvent::new(ProgressEventKind::StepStarted, "exec", 150.0, "go")
            .for_step("a", "log");
        assert_eq!(event.progress, 100.0);
        assert_eq!(event.step_id.as_deref(), Some("a"));
        assert_eq!(event.step_type.as_deref(), Some("log"));
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&ProgressEventKind::WorkflowCompleted).unwrap();
        assert_eq!(json, "\"workflow_completed\"");
        assert_eq!(ProgressEventKind::StepFailed.as_str(), "step_failed");
    }

    #[test]
    fn test_closure_reporter() {
        let count = AtomicUsize::new(0);
        let reporter = |_: &ProgressEvent| {
            count.fetch_add(1, Ordering::SeqCst);
        };
        reporter.report(&ProgressEvent::new(ProgressEventKind::WorkflowStarted, "e", 0.0, ""));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::new();
        reporter.report(&ProgressEvent::new(ProgressEventKind::WorkflowStarted, "e", 0.0, "start"));
        reporter.report(&ProgressEvent::new(ProgressEventKind::WorkflowCompleted, "e", 100.0, "done"));
        assert_eq!(
            reporter.kinds(),
            vec![ProgressEventKind::WorkflowStarted, ProgressEventKind::WorkflowCompleted]
        );
    }
}
