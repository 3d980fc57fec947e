//! Workflow Definition Module
//!
//! Provides data structures and utilities for defining, parsing,
//! validating and parameterizing workflows.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (WorkflowDefinition, StepDefinition)
//! - [`parser`]: Parsing pipeline and workflow metadata
//! - [`validator`]: Schema and semantic validation
//! - [`schema`]: Structural schema of workflow documents
//! - [`substitution`]: `${...}` parameter substitution
//! - [`dependencies`]: Dependency-ordered execution planning
//! - [`diagnostics`]: Error and warning reporting

pub mod dependencies;
pub mod diagnostics;
pub mod model;
pub mod parser;
pub mod schema;
pub mod substitution;
pub mod validator;

pub use dependencies::{resolve_execution_order, DependencyResolution};
pub use diagnostics::{Diagnostic, DiagnosticCode, ValidationReport, ValidationResult};
pub use model::{
    walk_steps, Branch, InputDefinition, OutputDefinition, StepDefinition, WorkflowDefinition,
    WorkflowMetadata,
};
pub use parser::{
    load_workflow, save_workflow, ComplexityLevel, FlowParser, ParseOptions, ParsedWorkflow,
    WorkflowInfo,
};
pub use substitution::{ParameterSubstitution, SubstitutionContext, SubstitutionOutcome};
pub use validator::{parse_and_validate, validate_definition, ParseResult};
