//! Workflow Execution Module
//!
//! Provides the executor that runs workflow steps, the step contract
//! implemented by every step type, and the registry that maps type names
//! to implementations.
//!
//! # Architecture
//!
//! - [`engine`]: Workflow executor orchestrating runs
//! - [`step`]: Step trait, context and results
//! - [`registry`]: Type-keyed step constructors
//! - [`state`]: Execution state snapshots and step records

pub mod engine;
pub mod registry;
pub mod state;
pub mod step;

pub use engine::{
    CancelHandle, ExecutionError, ExecutionMetadata, ExecutionOptions, WorkflowExecutionResult,
    WorkflowExecutor, WorkflowValidation,
};
pub use registry::{RegisterOptions, RegistrationInfo, RegistryError, StepInstanceConfig, StepRegistry};
pub use state::{ExecutionState, ExecutionStatus, StepExecutionRecord};
pub use step::{ConfigValidation, Step, StepContext, StepError, StepLogger, StepResult};
