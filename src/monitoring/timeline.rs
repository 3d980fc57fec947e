//! Execution Timeline
//!
//! Tracks step start/end times for generating execution
//! reports and Gantt charts. A timeline can be fed directly or used as a
//! [`ProgressReporter`].

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::progress::{ProgressEvent, ProgressEventKind, ProgressReporter};

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Step started executing
    Started,
    /// Step completed successfully
    Completed,
    /// Step failed
    Failed,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub step_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
}

/// Tracks the execution timeline of a workflow.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(start_time: DateTime<Utc>) -> Self {
        Self {
            events: Vec::new(),
            start_time,
            end_time: None,
        }
    }

    /// Builds a timeline from executor progress events.
    pub fn from_events(events: &[ProgressEvent]) -> Self {
        let start = events.first().map(|e| e.timestamp).unwrap_or_else(Utc::now);
        let mut timeline = Self::starting_at(start);
        for event in events {
            timeline.record(event);
        }
        timeline
    }

    /// Records an event for a step, timestamped now.
    pub fn add_event(&mut self, step_id: impl Into<String>, event_type: EventType) {
        self.add_event_at(step_id, event_type, Utc::now());
    }

    pub fn add_event_at(&mut self, step_id: impl Into<String>, event_type: EventType, timestamp: DateTime<Utc>) {
        self.events.push(TimelineEvent {
            step_id: step_id.into(),
            event_type,
            timestamp,
        });
    }

    /// Applies one progress event.
    pub fn record(&mut self, event: &ProgressEvent) {
        let event_type = match event.kind {
            ProgressEventKind::StepStarted => EventType::Started,
            ProgressEventKind::StepCompleted => EventType::Completed,
            ProgressEventKind::StepFailed => EventType::Failed,
            ProgressEventKind::WorkflowStarted => {
                self.start_time = event.timestamp;
                return;
            }
            ProgressEventKind::WorkflowCompleted | ProgressEventKind::WorkflowFailed => {
                self.end_time = Some(event.timestamp);
                return;
            }
        };
        if let Some(step_id) = &event.step_id {
            self.add_event_at(step_id.clone(), event_type, event.timestamp);
        }
    }

    /// Returns all recorded events.
    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Total time covered, in milliseconds: up to the workflow's end if
    /// known, otherwise up to the last event.
    pub fn total_ms(&self) -> u64 {
        let end = self
            .end_time
            .or_else(|| self.events.last().map(|e| e.timestamp))
            .unwrap_or(self.start_time);
        millis_between(self.start_time, end)
    }

    /// Generates an ASCII Gantt chart representation.
    ///
    /// Each step is shown as a bar indicating when it ran
    /// relative to the total execution time.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.total_ms();
        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        for (step_id, start, end) in self.spans() {
            let start_pos = (start as f64 * scale) as usize;
            let width = (((end - start) as f64) * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"#".repeat(width));

            output.push_str(&format!(
                "{:12} |{:50}| ({} ms)\n",
                truncate(&step_id, 12),
                bar,
                end - start
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Returns step durations in milliseconds.
    pub fn get_durations(&self) -> HashMap<String, u64> {
        self.spans()
            .into_iter()
            .map(|(id, start, end)| (id, end - start))
            .collect()
    }

    /// (step, start offset, end offset) for finished steps, by start time.
    fn spans(&self) -> Vec<(String, u64, u64)> {
        let mut starts: HashMap<&str, u64> = HashMap::new();
        let mut spans = Vec::new();

        for event in &self.events {
            let offset = millis_between(self.start_time, event.timestamp);
            match event.event_type {
                EventType::Started => {
                    starts.insert(event.step_id.as_str(), offset);
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(start) = starts.remove(event.step_id.as_str()) {
                        spans.push((event.step_id.clone(), start, offset.max(start)));
                    }
                }
            }
        }

        spans.sort_by_key(|(_, start, _)| *start);
        spans
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// A timeline that records progress events as they arrive.
#[derive(Debug, Default)]
pub struct TimelineRecorder {
    timeline: Mutex<Option<ExecutionTimeline>>,
}

impl TimelineRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the timeline recorded so far.
    pub fn timeline(&self) -> ExecutionTimeline {
        let guard = self
            .timeline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.clone().unwrap_or_default()
    }
}

impl ProgressReporter for TimelineRecorder {
    fn report(&self, event: &ProgressEvent) {
        let mut guard = self
            .timeline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .get_or_insert_with(|| ExecutionTimeline::starting_at(event.timestamp))
            .record(event);
    }
}

fn millis_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
}

/// Pads or truncates a string to a fixed width.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
