//! Monitoring Module
//!
//! Progress reporting and execution timelines for workflow runs.
//!
//! # Components
//!
//! - [`ProgressReporter`]: Receives executor progress events
//! - [`ExecutionTimeline`]: Step start/end timing for Gantt charts

pub mod progress;
pub mod timeline;

pub use progress::{CollectingReporter, ProgressEvent, ProgressEventKind, ProgressReporter};
pub use timeline::{EventType, ExecutionTimeline, TimelineEvent, TimelineRecorder};
