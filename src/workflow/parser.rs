//! Workflow Parser
//!
//! Turns workflow text or files into validated [`WorkflowDefinition`]s.
//!
//! Pipeline:
//! 1. Parse and validate (schema, then semantics)
//! 2. Substitute parameters, when a context is supplied
//! 3. Re-validate the substituted document
//! 4. Check for circular dependencies across all nesting levels
//! 5. Compute [`WorkflowInfo`] metadata

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;

use super::dependencies::resolve_all_steps;
use super::diagnostics::{Diagnostic, DiagnosticCode};
use super::model::WorkflowDefinition;
use super::substitution::{extract_expressions, validate_expressions, ParameterSubstitution, SubstitutionContext};
use super::validator::{parse_document, validate_document};
use crate::error::{FlowError, Result};

/// Options controlling [`FlowParser`].
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Values to substitute; without a context no substitution happens
    pub context: Option<SubstitutionContext>,
    /// Report unresolved expressions as errors
    pub strict: bool,
}

impl ParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, context: SubstitutionContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Complexity bucket of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComplexityLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ComplexityLevel {
    /// Buckets a score: low (<=10), medium (<=25), high (<=50), very-high.
    pub fn from_score(score: usize) -> Self {
        match score {
            0..=10 => Self::Low,
            11..=25 => Self::Medium,
            26..=50 => Self::High,
            _ => Self::VeryHigh,
        }
    }
}

impl fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very-high",
        };
        f.write_str(name)
    }
}

/// Summary metadata about a workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInfo {
    pub name_space: String,
    pub name: String,
    pub version: String,
    /// Steps at every nesting level
    pub step_count: usize,
    /// Distinct step types, sorted
    pub step_types: Vec<String>,
    /// Step id to its `dependsOn` list
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub has_inputs: bool,
    pub has_outputs: bool,
    pub has_variables: bool,
    pub has_substitutions: bool,
    /// Distinct `${...}` expressions
    pub expression_count: usize,
    pub complexity_score: usize,
    pub complexity: ComplexityLevel,
}

/// Outcome of [`FlowParser::parse_from_string`] and
/// [`FlowParser::parse_from_file`].
#[derive(Debug, Clone, Default)]
pub struct ParsedWorkflow {
    pub success: bool,
    /// The (substituted) definition
    pub workflow: Option<WorkflowDefinition>,
    /// Metadata computed on the definition before substitution
    pub info: Option<WorkflowInfo>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    /// Source file, for file-based parsing
    pub file: Option<String>,
}

impl ParsedWorkflow {
    fn failed(errors: Vec<Diagnostic>, warnings: Vec<Diagnostic>) -> Self {
        Self {
            success: false,
            errors,
            warnings,
            ..Self::default()
        }
    }

    fn attach_file(mut self, file: &str) -> Self {
        self.errors = self.errors.into_iter().map(|d| d.in_file(file)).collect();
        self.warnings = self.warnings.into_iter().map(|d| d.in_file(file)).collect();
        self.file = Some(file.to_string());
        self
    }

    /// Converts a failed parse into an error listing every diagnostic.
    pub fn into_result(self) -> Result<WorkflowDefinition> {
        match self.workflow {
            Some(workflow) if self.success => Ok(workflow),
            _ => Err(FlowError::Validation(
                self.errors.iter().map(|d| d.to_string()).collect(),
            )),
        }
    }
}

/// Parses workflow documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowParser;

impl FlowParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses workflow text.
    ///
    /// # Example
    ///
    /// ```
    /// use flowrunner::workflow::{FlowParser, ParseOptions, SubstitutionContext};
    ///
    /// let yaml = r#"
    /// nameSpace: acme
    /// name: hello
    /// version: 1.0.0
    /// steps:
    ///   - id: greet
    ///     type: log
    ///     config:
    ///       message: "hello ${input.who}"
    /// "#;
    ///
    /// let options = ParseOptions::new()
    ///     .with_context(SubstitutionContext::new().with_input("who", "world"));
    /// let parsed = FlowParser::new().parse_from_string(yaml, &options);
    /// assert!(parsed.success);
    ///
    /// let workflow = parsed.workflow.unwrap();
    /// assert_eq!(workflow.steps[0].config["message"], "hello world");
    /// ```
    pub fn parse_from_string(&self, text: &str, options: &ParseOptions) -> ParsedWorkflow {
        let document = match parse_document(text) {
            Ok(document) => document,
            Err(diagnostic) => return ParsedWorkflow::failed(vec![diagnostic], Vec::new()),
        };

        let (report, workflow) = validate_document(&document);
        let Some(original) = workflow.filter(|_| report.is_valid()) else {
            return ParsedWorkflow::failed(report.errors, report.warnings);
        };

        let mut errors = report.errors;
        let warnings = report.warnings;

        let workflow = match &options.context {
            Some(context) => {
                match self.substitute(&document, &original, context, options.strict, &mut errors) {
                    Some(substituted) => substituted,
                    None => return ParsedWorkflow::failed(errors, warnings),
                }
            }
            None => original.clone(),
        };

        let resolution = resolve_all_steps(&workflow);
        errors.extend(
            resolution
                .errors
                .into_iter()
                .filter(|e| e.code == DiagnosticCode::CircularDependency),
        );

        let info = self.get_workflow_info(&original);
        let success = errors.is_empty();
        if success {
            info!(
                "Parsed workflow '{}.{}' v{} ({} steps, complexity {})",
                workflow.name_space, workflow.name, workflow.version, info.step_count, info.complexity
            );
        } else {
            warn!("Workflow '{}' has {} error(s)", workflow.name, errors.len());
        }

        ParsedWorkflow {
            success,
            workflow: Some(workflow),
            info: Some(info),
            errors,
            warnings,
            file: None,
        }
    }

    /// Substitutes `context` into a validated document and re-validates
    /// the result. Returns `None` if the substituted document no longer
    /// describes a workflow.
    fn substitute(
        &self,
        document: &Value,
        original: &WorkflowDefinition,
        context: &SubstitutionContext,
        strict: bool,
        errors: &mut Vec<Diagnostic>,
    ) -> Option<WorkflowDefinition> {
        let (merged, missing) = context.merged_with_defaults(original);
        errors.extend(missing);
        errors.extend(
            validate_expressions(document, &merged)
                .into_iter()
                .filter(|d| d.code == DiagnosticCode::InvalidExpression),
        );

        let outcome = ParameterSubstitution::new(&merged)
            .strict(strict)
            .defer_runtime(true)
            .substitute(document);
        errors.extend(outcome.errors);
        debug!("Substitution produced {} error(s)", errors.len());

        // Warnings come from the unsubstituted document; only new errors count here.
        let (revalidated, workflow) = validate_document(&outcome.result);
        errors.extend(revalidated.errors);
        workflow
    }

    /// Reads and parses a workflow file. Every diagnostic carries the path.
    pub fn parse_from_file(&self, path: impl AsRef<Path>, options: &ParseOptions) -> ParsedWorkflow {
        let path = path.as_ref();
        let display = path.display().to_string();
        info!("Loading workflow from: {}", display);

        let parsed = match fs::read_to_string(path) {
            Ok(text) => {
                debug!("Workflow content loaded ({} bytes)", text.len());
                self.parse_from_string(&text, options)
            }
            Err(err) => ParsedWorkflow::failed(
                vec![Diagnostic::new(
                    DiagnosticCode::FileReadError,
                    format!("failed to read workflow file: {}", err),
                    "",
                )],
                Vec::new(),
            ),
        };
        parsed.attach_file(&display)
    }

    /// Computes summary metadata and the complexity score.
    ///
    /// score = steps + 2 * distinct types + 3 * dependency edges
    ///       + distinct expressions + inputs + outputs
    pub fn get_workflow_info(&self, workflow: &WorkflowDefinition) -> WorkflowInfo {
        let step_count = workflow.all_steps().len();
        let step_types = workflow.step_types();
        let dependencies = workflow.dependency_map();
        let edges = workflow.dependency_edge_count();
        let expressions = serde_json::to_value(workflow)
            .map(|doc| extract_expressions(&doc))
            .unwrap_or_default();

        let complexity_score = step_count
            + step_types.len() * 2
            + edges * 3
            + expressions.len()
            + workflow.inputs.len()
            + workflow.outputs.len();

        WorkflowInfo {
            name_space: workflow.name_space.clone(),
            name: workflow.name.clone(),
            version: workflow.version.clone(),
            step_count,
            step_types,
            dependencies,
            has_inputs: !workflow.inputs.is_empty(),
            has_outputs: !workflow.outputs.is_empty(),
            has_variables: !workflow.variables.is_empty(),
            has_substitutions: !expressions.is_empty(),
            expression_count: expressions.len(),
            complexity_score,
            complexity: ComplexityLevel::from_score(complexity_score),
        }
    }

    /// Returns true if the `dependsOn` relation, across every nesting
    /// level, contains a cycle.
    pub fn has_circular_dependencies(&self, workflow: &WorkflowDefinition) -> bool {
        resolve_all_steps(workflow).has_cycle()
    }

    /// Returns every step id, at every nesting level.
    pub fn extract_step_ids(&self, workflow: &WorkflowDefinition) -> Vec<String> {
        workflow.step_ids()
    }
}

/// Loads and validates a workflow file without substitution.
pub fn load_workflow(path: impl AsRef<Path>) -> Result<WorkflowDefinition> {
    FlowParser::new()
        .parse_from_file(path, &ParseOptions::default())
        .into_result()
}

/// Saves a workflow to a YAML file.
pub fn save_workflow(workflow: &WorkflowDefinition, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let yaml_content = serde_yaml::to_string(workflow)?;
    fs::write(path, yaml_content).map_err(|e| FlowError::io(path.display().to_string(), e))?;
    info!("Workflow saved to: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::StepDefinition;
    use serde_json::json;
    use tempfile::tempdir;

    const PIPELINE: &str = r#"
nameSpace: acme
name: report
version: 2.1.0
inputs:
  region:
    type: string
    required: true
  limit:
    default: 5
variables:
  greeting: hello
steps:
  - id: announce
    type: log
    config:
      message: "${variables.greeting} ${input.region}"
  - id: wait
    type: delay
    dependsOn: announce
    config:
      ms: "${input.limit}"
  - id: summary
    type: log
    dependsOn: [wait]
    config:
      message: "waited after ${outputs.announce.message}"
outputs:
  region:
    source: input.region
"#;

    fn context() -> SubstitutionContext {
        SubstitutionContext::new().with_input("region", "eu")
    }

    #[test]
    fn test_parse_without_context_keeps_expressions() {
        let parsed = FlowParser::new().parse_from_string(PIPELINE, &ParseOptions::new());
        assert!(parsed.success, "{:?}", parsed.errors);
        let workflow = parsed.workflow.unwrap();
        assert_eq!(workflow.steps[1].config["ms"], json!("${input.limit}"));
    }

    #[test]
    fn test_parse_with_context_substitutes() {
        let options = ParseOptions::new().with_context(context()).strict(true);
        let parsed = FlowParser::new().parse_from_string(PIPELINE, &options);
        assert!(parsed.success, "{:?}", parsed.errors);

        let workflow = parsed.workflow.unwrap();
        assert_eq!(workflow.steps[0].config["message"], json!("hello eu"));
        assert_eq!(workflow.steps[1].config["ms"], json!(5));
        assert_eq!(
            workflow.steps[2].config["message"],
            json!("waited after ${outputs.announce.message}")
        );
    }

    #[test]
    fn test_missing_required_input_fails() {
        let options = ParseOptions::new().with_context(SubstitutionContext::new());
        let parsed = FlowParser::new().parse_from_string(PIPELINE, &options);
        assert!(!parsed.success);
        assert!(parsed
            .errors
            .iter()
            .any(|e| e.code == DiagnosticCode::MissingRequiredInput));
    }

    #[test]
    fn test_strict_unresolved_expression() {
        let yaml = PIPELINE.replace("${variables.greeting}", "${variables.nope}");
        let strict = ParseOptions::new().with_context(context()).strict(true);
        let parsed = FlowParser::new().parse_from_string(&yaml, &strict);
        assert!(!parsed.success);
        assert!(parsed
            .errors
            .iter()
            .any(|e| e.code == DiagnosticCode::UnresolvedExpression));

        let lenient = ParseOptions::new().with_context(context());
        let parsed = FlowParser::new().parse_from_string(&yaml, &lenient);
        assert!(parsed.success, "{:?}", parsed.errors);
        assert_eq!(
            parsed.workflow.unwrap().steps[0].config["message"],
            json!("${variables.nope} eu")
        );
    }

    #[test]
    fn test_substituted_value_is_revalidated() {
        let options = ParseOptions::new()
            .with_context(context().with_input("limit", "soon"))
            .strict(true);
        let parsed = FlowParser::new().parse_from_string(PIPELINE, &options);
        assert!(!parsed.success);
        assert!(parsed.errors.iter().any(|e| e.code == DiagnosticCode::SchemaType));
    }

    #[test]
    fn test_circular_dependency_detected() {
        let yaml = r#"
nameSpace: acme
name: loop
version: 1.0.0
steps:
  - id: a
    type: log
    dependsOn: b
  - id: b
    type: log
    dependsOn: a
"#;
        let parsed = FlowParser::new().parse_from_string(yaml, &ParseOptions::new());
        assert!(!parsed.success);
        assert!(parsed
            .errors
            .iter()
            .any(|e| e.code == DiagnosticCode::CircularDependency));
    }

    #[test]
    fn test_workflow_info_and_complexity() {
        let parsed = FlowParser::new().parse_from_string(PIPELINE, &ParseOptions::new());
        let info = parsed.info.unwrap();
        assert_eq!(info.step_count, 3);
        assert_eq!(info.step_types, vec!["delay", "log"]);
        assert_eq!(info.dependencies.len(), 2);
        assert!(info.has_inputs && info.has_outputs && info.has_variables && info.has_substitutions);
        assert_eq!(info.expression_count, 4);
        // 3 steps + 2*2 types + 3*2 edges + 4 expressions + 2 inputs + 1 output
        assert_eq!(info.complexity_score, 20);
        assert_eq!(info.complexity, ComplexityLevel::Medium);
    }

    #[test]
    fn test_complexity_buckets() {
        assert_eq!(ComplexityLevel::from_score(0), ComplexityLevel::Low);
        assert_eq!(ComplexityLevel::from_score(10), ComplexityLevel::Low);
        assert_eq!(ComplexityLevel::from_score(11), ComplexityLevel::Medium);
        assert_eq!(ComplexityLevel::from_score(25), ComplexityLevel::Medium);
        assert_eq!(ComplexityLevel::from_score(50), ComplexityLevel::High);
        assert_eq!(ComplexityLevel::from_score(51), ComplexityLevel::VeryHigh);
        assert_eq!(ComplexityLevel::VeryHigh.to_string(), "very-high");
    }

    #[test]
    fn test_extract_step_ids_and_cycles_on_definitions() {
        let parser = FlowParser::new();
        let workflow = WorkflowDefinition::new("acme", "ids", "1.0.0").with_step(
            StepDefinition::new("outer", "conditional")
                .with_then_steps(vec![StepDefinition::new("inner", "log")]),
        );
        assert_eq!(parser.extract_step_ids(&workflow), vec!["outer", "inner"]);
        assert!(!parser.has_circular_dependencies(&workflow));
    }

    #[test]
    fn test_parse_from_file_attaches_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "nameSpace: acme\nname: x\n").unwrap();

        let parsed = FlowParser::new().parse_from_file(&path, &ParseOptions::new());
        assert!(!parsed.success);
        let file = path.display().to_string();
        assert_eq!(parsed.file.as_deref(), Some(file.as_str()));
        assert!(parsed.errors.iter().all(|e| e.file.as_deref() == Some(file.as_str())));
    }

    #[test]
    fn test_parse_from_missing_file() {
        let parsed = FlowParser::new().parse_from_file("/nonexistent/flow.yaml", &ParseOptions::new());
        assert!(!parsed.success);
        assert_eq!(parsed.errors[0].code, DiagnosticCode::FileReadError);
    }

    #[test]
    fn test_save_and_load_workflow() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saved.yaml");
        let workflow = WorkflowDefinition::new("acme", "saved", "1.0.0")
            .with_step(StepDefinition::new("hello", "log").with_config("message", "hi"));

        save_workflow(&workflow, &path).unwrap();
        let loaded = load_workflow(&path).unwrap();
        assert_eq!(loaded, workflow);
    }

    #[test]
    fn test_load_workflow_reports_validation_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("invalid.yaml");
        std::fs::write(&path, "this is not valid yaml: [[[").unwrap();

        let err = load_workflow(&path).unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
    }
}
