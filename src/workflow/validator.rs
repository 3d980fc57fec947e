//! Workflow Validation
//!
//! Validates workflow documents in two passes:
//! - Structural validation against the schema in [`super::schema`]
//! - Semantic validation of the typed definition (ids, references,
//!   timeouts, versions, conditions, outputs and inputs)
//!
//! All problems are collected so a single run reports every issue.

use std::collections::HashSet;

use log::{debug, info};
use serde_json::Value;

use super::diagnostics::{Diagnostic, DiagnosticCode, ValidationReport, ValidationResult};
use super::model::{walk_steps, WorkflowDefinition};
use super::schema::{is_semver, validate_schema};
use super::substitution::{validate_expressions, SubstitutionContext};

/// Smallest accepted workflow timeout, in milliseconds.
pub const MIN_WORKFLOW_TIMEOUT_MS: u64 = 1000;

/// Smallest accepted step timeout, in milliseconds.
pub const MIN_STEP_TIMEOUT_MS: u64 = 100;

/// Prefixes an output `source` may start with.
pub const OUTPUT_SOURCE_PREFIXES: [&str; 4] = ["step.", "variables.", "input.", "workflow."];

/// Outcome of parsing and validating a document.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    /// True when no errors were found
    pub success: bool,
    /// Typed definition, when the document has a workflow shape
    pub workflow: Option<WorkflowDefinition>,
    /// The document as parsed, before any substitution
    pub document: Option<Value>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl ParseResult {
    fn from_report(
        report: ValidationReport,
        workflow: Option<WorkflowDefinition>,
        document: Option<Value>,
    ) -> Self {
        Self {
            success: report.is_valid(),
            workflow,
            document,
            errors: report.errors,
            warnings: report.warnings,
        }
    }
}

/// Parses YAML (or JSON) text into a generic document.
///
/// Syntax errors carry the 1-based line and column reported by the YAML
/// parser.
pub fn parse_document(text: &str) -> Result<Value, Diagnostic> {
    serde_yaml::from_str::<Value>(text).map_err(|err| {
        let diagnostic = Diagnostic::new(
            DiagnosticCode::ParseError,
            format!("failed to parse workflow document: {}", err),
            "",
        );
        match err.location() {
            Some(location) => diagnostic.at(location.line(), location.column()),
            None => diagnostic,
        }
    })
}

/// Returns true for namespaces such as `acme`, `acme.billing` or `data_ops`.
fn is_conventional_namespace(name_space: &str) -> bool {
    let mut chars = name_space.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.'))
}

/// Characters a conditional expression may contain.
fn is_condition_char(c: char) -> bool {
    c.is_alphanumeric()
        || c.is_whitespace()
        || matches!(
            c,
            '_' | '.' | '(' | ')' | '\'' | '"' | '=' | '!' | '<' | '>' | '&' | '|' | '+' | '-'
                | '*' | '/' | '%' | ',' | ':' | '?' | '[' | ']'
        )
}

/// Runs the semantic checks on a typed definition.
///
/// `document` is the serialized form of the same workflow and is used for
/// the textual input-usage check.
pub fn validate_semantics(workflow: &WorkflowDefinition, document: &Value) -> ValidationReport {
    let mut report = ValidationReport::new();

    if !is_conventional_namespace(&workflow.name_space) {
        report.warning(
            DiagnosticCode::InvalidNamespace,
            format!(
                "namespace '{}' should start with a lowercase letter and contain only lowercase letters, digits, '_', '-' or '.'",
                workflow.name_space
            ),
            "nameSpace",
        );
    }

    if !is_semver(&workflow.version) {
        report.error(
            DiagnosticCode::InvalidVersion,
            format!("version '{}' must have the form MAJOR.MINOR.PATCH", workflow.version),
            "version",
        );
    }

    if let Some(timeout) = workflow.timeout() {
        if timeout < MIN_WORKFLOW_TIMEOUT_MS {
            report.error(
                DiagnosticCode::InvalidTimeout,
                format!(
                    "workflow timeout {}ms is below the minimum of {}ms",
                    timeout, MIN_WORKFLOW_TIMEOUT_MS
                ),
                "metadata.timeout",
            );
        }
    }

    if workflow.steps.is_empty() {
        report.warning(DiagnosticCode::EmptyWorkflow, "workflow has no steps", "steps");
    }

    let ids: HashSet<String> = workflow.step_ids().into_iter().collect();
    let mut seen: HashSet<&str> = HashSet::new();

    walk_steps(&workflow.steps, "steps", &mut |step, path| {
        if !seen.insert(step.id.as_str()) {
            report.error(
                DiagnosticCode::DuplicateStepId,
                format!("duplicate step id '{}'", step.id),
                format!("{}.id", path),
            );
        }

        for (j, dep) in step.depends_on.iter().enumerate() {
            if !ids.contains(dep) {
                report.error(
                    DiagnosticCode::MissingDependency,
                    format!("step '{}' depends on unknown step '{}'", step.id, dep),
                    format!("{}.dependsOn[{}]", path, j),
                );
            }
        }

        if let Some(timeout) = step.timeout {
            if timeout < MIN_STEP_TIMEOUT_MS {
                report.error(
                    DiagnosticCode::InvalidTimeout,
                    format!(
                        "step '{}' timeout {}ms is below the minimum of {}ms",
                        step.id, timeout, MIN_STEP_TIMEOUT_MS
                    ),
                    format!("{}.timeout", path),
                );
            }
        }

        if step.step_type == "conditional" {
            if let Some(Value::String(condition)) = step.config.get("condition") {
                if condition.trim().is_empty() {
                    report.error(
                        DiagnosticCode::InvalidConditionExpression,
                        format!("step '{}' has an empty condition", step.id),
                        format!("{}.config.condition", path),
                    );
                } else if let Some(bad) = condition.chars().find(|c| !is_condition_char(*c)) {
                    report.error(
                        DiagnosticCode::InvalidConditionExpression,
                        format!(
                            "step '{}' condition contains invalid character '{}'",
                            step.id, bad
                        ),
                        format!("{}.config.condition", path),
                    );
                }
            }
        }
    });

    for (name, output) in &workflow.outputs {
        if !OUTPUT_SOURCE_PREFIXES
            .iter()
            .any(|prefix| output.source.starts_with(prefix))
        {
            report.error(
                DiagnosticCode::InvalidOutputSource,
                format!(
                    "output '{}' source '{}' must start with one of {}",
                    name,
                    output.source,
                    OUTPUT_SOURCE_PREFIXES.join(", ")
                ),
                format!("outputs.{}.source", name),
            );
        }
    }

    let text = document.to_string();
    for (name, input) in &workflow.inputs {
        if input.required && !text.contains(&format!("${{input.{}}}", name)) {
            report.warning(
                DiagnosticCode::UnusedRequiredInput,
                format!("required input '{}' is never referenced", name),
                format!("inputs.{}", name),
            );
        }
    }

    debug!(
        "Semantic validation of '{}': {} error(s), {} warning(s)",
        workflow.name,
        report.errors.len(),
        report.warnings.len()
    );
    report
}

/// Validates a parsed document: schema first, then (if the document has a
/// valid shape) semantics.
///
/// Returns the report together with the typed definition when one could be
/// built.
pub fn validate_document(document: &Value) -> (ValidationReport, Option<WorkflowDefinition>) {
    let mut report = validate_schema(document);
    if !report.is_valid() {
        return (report, None);
    }

    let workflow = match serde_json::from_value::<WorkflowDefinition>(document.clone()) {
        Ok(workflow) => workflow,
        Err(err) => {
            report.error(
                DiagnosticCode::ParseError,
                format!("document does not describe a workflow: {}", err),
                "",
            );
            return (report, None);
        }
    };

    report.merge(validate_semantics(&workflow, document));
    (report, Some(workflow))
}

/// Validates an in-memory definition.
pub fn validate_definition(workflow: &WorkflowDefinition) -> ValidationResult {
    match serde_json::to_value(workflow) {
        Ok(document) => validate_document(&document).0.into(),
        Err(err) => {
            let mut report = ValidationReport::new();
            report.error(
                DiagnosticCode::ParseError,
                format!("workflow could not be serialized: {}", err),
                "",
            );
            report.into()
        }
    }
}

/// Parses and validates workflow text.
///
/// Pipeline: parse, schema validation, semantic validation and, when a
/// context is supplied, expression validation against that context merged
/// with the document's own defaults. Success means zero errors; warnings
/// never affect it.
pub fn parse_and_validate(text: &str, context: Option<&SubstitutionContext>) -> ParseResult {
    let document = match parse_document(text) {
        Ok(document) => document,
        Err(diagnostic) => {
            let mut report = ValidationReport::new();
            report.errors.push(diagnostic);
            return ParseResult::from_report(report, None, None);
        }
    };

    let (mut report, workflow) = validate_document(&document);

    if let (Some(context), Some(definition)) = (context, workflow.as_ref()) {
        let (merged, missing) = context.merged_with_defaults(definition);
        report.errors.extend(missing);
        report.errors.extend(validate_expressions(&document, &merged));
    }

    info!(
        "Validated workflow document: {} error(s), {} warning(s)",
        report.errors.len(),
        report.warnings.len()
    );
    ParseResult::from_report(report, workflow, Some(document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{InputDefinition, StepDefinition};

    const VALID: &str = r#"
nameSpace: acme
name: greet
version: 1.0.0
inputs:
  who:
    type: string
    required: true
steps:
  - id: hello
    type: log
    config:
      message: "hello ${input.who}"
  - id: pause
    type: delay
    dependsOn: hello
    config:
      ms: 10
outputs:
  greeted:
    source: input.who
"#;

    #[test]
    fn test_valid_document() {
        let result = parse_and_validate(VALID, None);
        assert!(result.success, "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
        assert_eq!(result.workflow.unwrap().steps.len(), 2);
    }

    #[test]
    fn test_parse_error_has_position() {
        let result = parse_and_validate("nameSpace: acme\nsteps: [\n  - id: x", None);
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        let error = &result.errors[0];
        assert_eq!(error.code, DiagnosticCode::ParseError);
        assert!(error.line.is_some());
        assert!(error.column.is_some());
        assert!(result.workflow.is_none());
    }

    #[test]
    fn test_schema_errors_skip_semantics() {
        let result = parse_and_validate("nameSpace: acme\nname: x\nversion: bad\n", None);
        assert!(!result.success);
        assert!(result.errors.iter().all(|e| e.code == DiagnosticCode::SchemaRequired));
        assert!(result.workflow.is_none());
    }

    #[test]
    fn test_duplicate_ids_at_any_depth() {
        let workflow = WorkflowDefinition::new("acme", "dup", "1.0.0")
            .with_step(StepDefinition::new("a", "log"))
            .with_step(
                StepDefinition::new("fan", "parallel")
                    .with_branch(None, vec![StepDefinition::new("a", "log")]),
            );
        let result = validate_definition(&workflow);
        assert!(!result.valid);
        let dup: Vec<&Diagnostic> = result
            .errors
            .iter()
            .filter(|e| e.code == DiagnosticCode::DuplicateStepId)
            .collect();
        assert_eq!(dup.len(), 1);
        assert_eq!(dup[0].path, "steps[1].branches[0].steps[0].id");
    }

    #[test]
    fn test_dependency_on_nested_step_is_not_dangling() {
        let workflow = WorkflowDefinition::new("acme", "deps", "1.0.0")
            .with_step(
                StepDefinition::new("check", "conditional")
                    .with_config("condition", "true")
                    .with_then_steps(vec![StepDefinition::new("inner", "log")]),
            )
            .with_step(StepDefinition::new("after", "log").depends_on("inner"))
            .with_step(StepDefinition::new("lost", "log").depends_on("ghost"));
        let result = validate_definition(&workflow);
        let missing: Vec<&str> = result
            .errors
            .iter()
            .filter(|e| e.code == DiagnosticCode::MissingDependency)
            .map(|e| e.path.as_str())
            .collect();
        assert_eq!(missing, vec!["steps[2].dependsOn[0]"]);
    }

    #[test]
    fn test_timeouts() {
        let mut workflow = WorkflowDefinition::new("acme", "slow", "1.0.0")
            .with_step(StepDefinition::new("quick", "log").with_timeout(50))
            .with_step(StepDefinition::new("ok", "log").with_timeout(100));
        workflow.metadata = Some(crate::workflow::model::WorkflowMetadata {
            timeout: Some(999),
            ..Default::default()
        });
        let result = validate_definition(&workflow);
        let paths: Vec<&str> = result
            .errors
            .iter()
            .filter(|e| e.code == DiagnosticCode::InvalidTimeout)
            .map(|e| e.path.as_str())
            .collect();
        assert_eq!(paths, vec!["metadata.timeout", "steps[0].timeout"]);
    }

    #[test]
    fn test_version_is_error_and_pattern_warning() {
        let workflow = WorkflowDefinition::new("acme", "v", "1.0")
            .with_step(StepDefinition::new("a", "log"));
        let result = validate_definition(&workflow);
        assert!(result.errors.iter().any(|e| e.code == DiagnosticCode::InvalidVersion));
        assert!(result.warnings.iter().any(|e| e.code == DiagnosticCode::SchemaPattern));
    }

    #[test]
    fn test_namespace_convention_is_warning() {
        let workflow = WorkflowDefinition::new("Acme Corp", "ns", "1.0.0")
            .with_step(StepDefinition::new("a", "log"));
        let result = validate_definition(&workflow);
        assert!(result.valid);
        assert!(result.warnings.iter().any(|w| w.code == DiagnosticCode::InvalidNamespace));
    }

    #[test]
    fn test_condition_character_class() {
        let workflow = WorkflowDefinition::new("acme", "cond", "1.0.0")
            .with_step(
                StepDefinition::new("good", "conditional")
                    .with_config("condition", "input.count >= 3 && (variables.flag == 'x' ? true : false)"),
            )
            .with_step(StepDefinition::new("bad", "conditional").with_config("condition", "rm -rf; `x`"))
            .with_step(StepDefinition::new("interpolated", "conditional").with_config("condition", "${input.count} > 3"));
        let result = validate_definition(&workflow);
        let paths: Vec<&str> = result
            .errors
            .iter()
            .filter(|e| e.code == DiagnosticCode::InvalidConditionExpression)
            .map(|e| e.path.as_str())
            .collect();
        assert_eq!(paths, vec!["steps[1].config.condition", "steps[2].config.condition"]);
    }

    #[test]
    fn test_output_source_prefix() {
        let workflow = WorkflowDefinition::new("acme", "out", "1.0.0")
            .with_step(StepDefinition::new("a", "log"))
            .with_output("good", "step.a.message")
            .with_output("bad", "a.message");
        let result = validate_definition(&workflow);
        let bad: Vec<&str> = result
            .errors
            .iter()
            .filter(|e| e.code == DiagnosticCode::InvalidOutputSource)
            .map(|e| e.path.as_str())
            .collect();
        assert_eq!(bad, vec!["outputs.bad.source"]);
    }

    #[test]
    fn test_unused_required_input_warning() {
        let workflow = WorkflowDefinition::new("acme", "inputs", "1.0.0")
            .with_step(StepDefinition::new("a", "log").with_config("message", "${input.used}"))
            .with_input(
                "used",
                InputDefinition {
                    required: true,
                    ..Default::default()
                },
            )
            .with_input(
                "unused",
                InputDefinition {
                    required: true,
                    ..Default::default()
                },
            );
        let result = validate_definition(&workflow);
        assert!(result.valid);
        let unused: Vec<&str> = result
            .warnings
            .iter()
            .filter(|w| w.code == DiagnosticCode::UnusedRequiredInput)
            .map(|w| w.path.as_str())
            .collect();
        assert_eq!(unused, vec!["inputs.unused"]);
    }

    #[test]
    fn test_expression_validation_with_context() {
        let context = SubstitutionContext::new().with_input("who", "world");
        assert!(parse_and_validate(VALID, Some(&context)).success);

        let missing = parse_and_validate(VALID, Some(&SubstitutionContext::new()));
        assert!(!missing.success);
        assert!(missing
            .errors
            .iter()
            .any(|e| e.code == DiagnosticCode::MissingRequiredInput));
        assert!(missing
            .errors
            .iter()
            .any(|e| e.code == DiagnosticCode::UnresolvedExpression));
    }
}
