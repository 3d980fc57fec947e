//! FlowRunner - YAML Workflow Engine
//!
//! A library for defining, validating and executing workflows described in
//! YAML. Workflows are lists of typed steps with dependencies, `${...}`
//! parameter substitution and nested conditional or parallel branches.
//!
//! # Architecture
//!
//! The library is organized into five main modules:
//!
//! - [`workflow`]: Data model, parsing, validation and substitution
//! - [`execution`]: Step contract, registry and workflow executor
//! - [`steps`]: Built-in step types
//! - [`monitoring`]: Progress events and execution timeline
//! - [`error`]: Library error type
//!
//! # Example
//!
//! ```rust,no_run
//! use flowrunner::execution::{ExecutionOptions, WorkflowExecutor};
//! use flowrunner::workflow::{FlowParser, ParseOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Parse and validate a workflow from YAML
//!     let parsed = FlowParser::new().parse_from_file("pipeline.yaml", &ParseOptions::new());
//!     let workflow = parsed.into_result()?;
//!
//!     // Execute it with the built-in step types
//!     let executor = WorkflowExecutor::with_builtins();
//!     let result = executor
//!         .execute_workflow(&workflow, ExecutionOptions::new().with_input("name", "world"))
//!         .await;
//!
//!     println!("success: {}", result.success);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod execution;
pub mod monitoring;
pub mod steps;
pub mod workflow;

// Re-export commonly used types
pub use error::{FlowError, Result};
pub use execution::{ExecutionOptions, StepRegistry, WorkflowExecutionResult, WorkflowExecutor};
pub use workflow::model::{StepDefinition, WorkflowDefinition};
pub use workflow::parser::{load_workflow, FlowParser};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "FlowRunner";
