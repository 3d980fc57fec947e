//! Parameter Substitution
//!
//! Replaces `${namespace.path}` expressions in a workflow document with
//! values from a [`SubstitutionContext`].
//!
//! Supported namespaces:
//! - `env` - process environment
//! - `input` - caller-supplied inputs (declared defaults fill gaps)
//! - `variables` - workflow variables
//! - `workflow` - `id`, `instanceId`, `nameSpace`, `name`, `version`
//! - `step` - the step currently executing (`id`, `type`)
//! - `outputs` - outputs of completed steps, keyed by step id
//!
//! A string consisting of exactly one expression is replaced by the typed
//! value; expressions embedded in longer text are replaced by the value's
//! text form. Path segments are separated by dots; numeric segments index
//! into arrays (`${outputs.fetch.items.0}`).

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::diagnostics::{Diagnostic, DiagnosticCode};
use super::model::WorkflowDefinition;

/// Expression namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Env,
    Input,
    Variables,
    Workflow,
    Step,
    Outputs,
}

impl Namespace {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "env" => Some(Self::Env),
            "input" => Some(Self::Input),
            "variables" => Some(Self::Variables),
            "workflow" => Some(Self::Workflow),
            "step" => Some(Self::Step),
            "outputs" => Some(Self::Outputs),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Env => "env",
            Self::Input => "input",
            Self::Variables => "variables",
            Self::Workflow => "workflow",
            Self::Step => "step",
            Self::Outputs => "outputs",
        }
    }

    /// Runtime namespaces are only populated while a workflow executes.
    pub fn is_runtime(&self) -> bool {
        matches!(self, Self::Step | Self::Outputs)
    }
}

/// A parsed `${...}` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub namespace: Namespace,
    pub path: Vec<String>,
}

/// Parses the body of an expression (the text between `${` and `}`).
pub fn parse_expression(body: &str) -> Result<Expression, String> {
    let body = body.trim();
    if body.is_empty() {
        return Err("empty expression".to_string());
    }

    let mut parts = body.split('.');
    let head = parts.next().unwrap_or_default();
    let namespace = Namespace::parse(head)
        .ok_or_else(|| format!("unknown namespace '{}' in '{}'", head, body))?;

    let path: Vec<String> = parts.map(str::to_string).collect();
    if path.is_empty() {
        return Err(format!("expression '{}' has no path after the namespace", body));
    }
    for segment in &path {
        let valid = !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(format!("invalid path segment '{}' in '{}'", segment, body));
        }
    }

    Ok(Expression { namespace, path })
}

enum Segment<'a> {
    Text(&'a str),
    /// `raw` is the full `${...}` text, `body` the part inside the braces
    Expr { raw: &'a str, body: &'a str },
}

fn segments(text: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        if start > 0 {
            out.push(Segment::Text(&rest[..start]));
        }
        out.push(Segment::Expr {
            raw: &rest[start..start + end + 3],
            body: &after[..end],
        });
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        out.push(Segment::Text(rest));
    }
    out
}

/// Returns true if `text` contains at least one `${...}` expression.
pub fn contains_expression(text: &str) -> bool {
    segments(text)
        .iter()
        .any(|s| matches!(s, Segment::Expr { .. }))
}

/// Values visible to substitution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubstitutionContext {
    pub env: Map<String, Value>,
    pub workflow: Map<String, Value>,
    pub input: Map<String, Value>,
    pub variables: Map<String, Value>,
    pub step: Map<String, Value>,
    pub outputs: Map<String, Value>,
}

impl SubstitutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context whose `env` namespace holds the process environment.
    pub fn from_process_env() -> Self {
        let mut context = Self::new();
        for (key, value) in std::env::vars() {
            context.env.insert(key, Value::String(value));
        }
        context
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input.insert(name.into(), value.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), Value::String(value.into()));
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Records the outputs of a completed step under `outputs.<step_id>`.
    pub fn with_step_outputs(mut self, step_id: impl Into<String>, outputs: Value) -> Self {
        self.outputs.insert(step_id.into(), outputs);
        self
    }

    /// Sets the workflow identity namespace from a definition.
    pub fn with_workflow_identity(mut self, workflow: &WorkflowDefinition) -> Self {
        self.workflow.insert(
            "id".to_string(),
            Value::String(format!("{}.{}", workflow.name_space, workflow.name)),
        );
        self.workflow.insert(
            "nameSpace".to_string(),
            Value::String(workflow.name_space.clone()),
        );
        self.workflow
            .insert("name".to_string(), Value::String(workflow.name.clone()));
        self.workflow
            .insert("version".to_string(), Value::String(workflow.version.clone()));
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.workflow
            .insert("instanceId".to_string(), Value::String(instance_id.into()));
        self
    }

    /// Fills gaps from the document itself.
    ///
    /// - workflow variables not already in the context are added
    /// - declared input defaults fill inputs the caller did not supply
    /// - the workflow identity namespace is set if empty
    ///
    /// Required inputs with neither a value nor a default are reported as
    /// `MISSING_REQUIRED_INPUT`.
    pub fn merged_with_defaults(&self, workflow: &WorkflowDefinition) -> (Self, Vec<Diagnostic>) {
        let mut merged = self.clone();
        let mut errors = Vec::new();

        for (name, value) in &workflow.variables {
            merged
                .variables
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }

        for (name, definition) in &workflow.inputs {
            if merged.input.contains_key(name) {
                continue;
            }
            match &definition.default {
                Some(default) => {
                    merged.input.insert(name.clone(), default.clone());
                }
                None if definition.required => errors.push(Diagnostic::new(
                    DiagnosticCode::MissingRequiredInput,
                    format!("required input '{}' was not provided and has no default", name),
                    format!("inputs.{}", name),
                )),
                None => {}
            }
        }

        if merged.workflow.is_empty() {
            merged = merged.with_workflow_identity(workflow);
        }

        (merged, errors)
    }

    fn namespace(&self, namespace: Namespace) -> &Map<String, Value> {
        match namespace {
            Namespace::Env => &self.env,
            Namespace::Input => &self.input,
            Namespace::Variables => &self.variables,
            Namespace::Workflow => &self.workflow,
            Namespace::Step => &self.step,
            Namespace::Outputs => &self.outputs,
        }
    }

    /// Looks up a parsed expression.
    pub fn resolve(&self, expression: &Expression) -> Option<&Value> {
        let (first, rest) = expression.path.split_first()?;
        let mut current = self.namespace(expression.namespace).get(first)?;
        for segment in rest {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Looks up a dotted path such as `variables.region`.
    pub fn resolve_path(&self, path: &str) -> Option<&Value> {
        let expression = parse_expression(path).ok()?;
        self.resolve(&expression)
    }
}

/// Result of a substitution pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SubstitutionOutcome {
    pub result: Value,
    pub errors: Vec<Diagnostic>,
}

/// Applies a context to documents.
#[derive(Debug, Clone)]
pub struct ParameterSubstitution<'a> {
    context: &'a SubstitutionContext,
    strict: bool,
    defer_runtime: bool,
}

enum Lookup<'v> {
    Found(&'v Value),
    /// Runtime expression left for a later pass
    Deferred,
    Missing,
}

impl<'a> ParameterSubstitution<'a> {
    pub fn new(context: &'a SubstitutionContext) -> Self {
        Self {
            context,
            strict: false,
            defer_runtime: false,
        }
    }

    /// In strict mode unresolved expressions are reported as errors.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Leaves `step` and `outputs` expressions untouched and unreported.
    /// Used when substituting before execution, when those namespaces are
    /// still empty.
    pub fn defer_runtime(mut self, defer: bool) -> Self {
        self.defer_runtime = defer;
        self
    }

    /// Returns a substituted copy of `document`; the input is not modified.
    pub fn substitute(&self, document: &Value) -> SubstitutionOutcome {
        let mut errors = Vec::new();
        let result = self.substitute_value(document, "", &mut errors);
        SubstitutionOutcome { result, errors }
    }

    /// Substitutes every value of a step configuration map.
    pub fn substitute_map(&self, map: &Map<String, Value>) -> (Map<String, Value>, Vec<Diagnostic>) {
        let mut errors = Vec::new();
        let substituted = map
            .iter()
            .map(|(key, value)| {
                (
                    key.clone(),
                    self.substitute_value(value, key, &mut errors),
                )
            })
            .collect();
        (substituted, errors)
    }

    fn substitute_value(&self, value: &Value, path: &str, errors: &mut Vec<Diagnostic>) -> Value {
        match value {
            Value::String(text) => self.substitute_str(text, path, errors),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.substitute_value(item, &format!("{}[{}]", path, i), errors))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, item)| {
                        let child = if path.is_empty() {
                            key.clone()
                        } else {
                            format!("{}.{}", path, key)
                        };
                        (key.clone(), self.substitute_value(item, &child, errors))
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn lookup(&self, body: &str) -> Lookup<'a> {
        let Ok(expression) = parse_expression(body) else {
            return Lookup::Missing;
        };
        if self.defer_runtime && expression.namespace.is_runtime() {
            return Lookup::Deferred;
        }
        match self.context.resolve(&expression) {
            Some(value) => Lookup::Found(value),
            None => Lookup::Missing,
        }
    }

    fn unresolved(&self, raw: &str, path: &str, errors: &mut Vec<Diagnostic>) {
        if self.strict {
            errors.push(Diagnostic::new(
                DiagnosticCode::UnresolvedExpression,
                format!("expression '{}' could not be resolved", raw),
                path,
            ));
        }
    }

    fn substitute_str(&self, text: &str, path: &str, errors: &mut Vec<Diagnostic>) -> Value {
        let parts = segments(text);

        if let [Segment::Expr { raw, body }] = parts.as_slice() {
            return match self.lookup(body) {
                Lookup::Found(value) => value.clone(),
                Lookup::Deferred => Value::String(text.to_string()),
                Lookup::Missing => {
                    self.unresolved(raw, path, errors);
                    Value::String(text.to_string())
                }
            };
        }

        let mut out = String::with_capacity(text.len());
        for part in parts {
            match part {
                Segment::Text(literal) => out.push_str(literal),
                Segment::Expr { raw, body } => match self.lookup(body) {
                    Lookup::Found(value) => out.push_str(&value_text(value)),
                    Lookup::Deferred => out.push_str(raw),
                    Lookup::Missing => {
                        self.unresolved(raw, path, errors);
                        out.push_str(raw);
                    }
                },
            }
        }
        Value::String(out)
    }
}

/// Text form of a value when embedded in a longer string.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Substitutes `context` into `document`.
pub fn substitute(document: &Value, context: &SubstitutionContext, strict: bool) -> SubstitutionOutcome {
    ParameterSubstitution::new(context).strict(strict).substitute(document)
}

fn visit_strings<'v, F>(value: &'v Value, path: &str, visitor: &mut F)
where
    F: FnMut(&'v str, &str),
{
    match value {
        Value::String(text) => visitor(text, path),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                visit_strings(item, &format!("{}[{}]", path, i), visitor);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                visit_strings(item, &child, visitor);
            }
        }
        _ => {}
    }
}

/// Lists the distinct expression bodies in `document`, in first-seen order.
pub fn extract_expressions(document: &Value) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut expressions = Vec::new();
    visit_strings(document, "", &mut |text, _| {
        for part in segments(text) {
            if let Segment::Expr { body, .. } = part {
                let body = body.trim().to_string();
                if seen.insert(body.clone()) {
                    expressions.push(body);
                }
            }
        }
    });
    expressions
}

/// Returns true if any string in `document` contains an expression.
pub fn has_substitution_patterns(document: &Value) -> bool {
    let mut found = false;
    visit_strings(document, "", &mut |text, _| {
        if !found && contains_expression(text) {
            found = true;
        }
    });
    found
}

/// Checks expression syntax, and resolvability for the static namespaces,
/// without substituting anything.
pub fn validate_expressions(document: &Value, context: &SubstitutionContext) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    visit_strings(document, "", &mut |text, path| {
        for part in segments(text) {
            let Segment::Expr { raw, body } = part else {
                continue;
            };
            match parse_expression(body) {
                Err(reason) => diagnostics.push(Diagnostic::new(
                    DiagnosticCode::InvalidExpression,
                    format!("invalid expression '{}': {}", raw, reason),
                    path,
                )),
                Ok(expression) => {
                    if !expression.namespace.is_runtime() && context.resolve(&expression).is_none() {
                        diagnostics.push(Diagnostic::new(
                            DiagnosticCode::UnresolvedExpression,
                            format!("expression '{}' could not be resolved", raw),
                            path,
                        ));
                    }
                }
            }
        }
    });
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::InputDefinition;
    use serde_json::json;

    fn context() -> SubstitutionContext {
        SubstitutionContext::new()
            .with_input("region", "eu-west")
            .with_input("retries", 3)
            .with_variable("tags", json!(["a", "b"]))
            .with_env("HOME", "/home/flow")
    }

    #[test]
    fn test_whole_expression_keeps_type() {
        let outcome = substitute(&json!({ "n": "${input.retries}" }), &context(), true);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.result["n"], json!(3));
    }

    #[test]
    fn test_embedded_expression_becomes_text() {
        let doc = json!({ "msg": "deploy to ${input.region} x${input.retries} from ${env.HOME}" });
        let outcome = substitute(&doc, &context(), true);
        assert_eq!(outcome.result["msg"], json!("deploy to eu-west x3 from /home/flow"));
    }

    #[test]
    fn test_array_index_path() {
        let doc = json!({ "first": "${variables.tags.1}" });
        let outcome = substitute(&doc, &context(), true);
        assert_eq!(outcome.result["first"], json!("b"));
    }

    #[test]
    fn test_strict_reports_unresolved_and_keeps_literal() {
        let doc = json!({ "steps": [{ "config": { "m": "hi ${input.missing}" } }] });
        let outcome = substitute(&doc, &context(), true);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].code, DiagnosticCode::UnresolvedExpression);
        assert_eq!(outcome.errors[0].path, "steps[0].config.m");
        assert_eq!(outcome.result["steps"][0]["config"]["m"], json!("hi ${input.missing}"));
    }

    #[test]
    fn test_non_strict_leaves_literal_silently() {
        let doc = json!({ "m": "${input.missing}", "k": "${bogus.thing}" });
        let outcome = substitute(&doc, &context(), false);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.result, doc);
    }

    #[test]
    fn test_substitution_is_idempotent() {
        let doc = json!({ "a": "${input.region}", "b": ["${input.retries}", "plain"], "c": "${input.nope}" });
        let once = substitute(&doc, &context(), false).result;
        let twice = substitute(&once, &context(), false).result;
        assert_eq!(once, twice);
    }

    #[test]
    fn test_deferred_runtime_expressions() {
        let doc = json!({ "a": "${outputs.fetch.body}", "b": "${step.id} in ${input.region}" });
        let outcome = ParameterSubstitution::new(&context())
            .strict(true)
            .defer_runtime(true)
            .substitute(&doc);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.result["a"], json!("${outputs.fetch.body}"));
        assert_eq!(outcome.result["b"], json!("${step.id} in eu-west"));
    }

    #[test]
    fn test_input_document_untouched() {
        let doc = json!({ "a": "${input.region}" });
        let _ = substitute(&doc, &context(), false);
        assert_eq!(doc["a"], json!("${input.region}"));
    }

    #[test]
    fn test_unclosed_expression_is_text() {
        assert!(!contains_expression("cost ${input.region"));
        let outcome = substitute(&json!("cost ${input.region"), &context(), true);
        assert_eq!(outcome.result, json!("cost ${input.region"));
    }

    #[test]
    fn test_extract_expressions_distinct_in_order() {
        let doc = json!({
            "a": "${input.region}",
            "b": ["${variables.tags} and ${input.region}", "${ env.HOME }"]
        });
        assert_eq!(
            extract_expressions(&doc),
            vec!["input.region", "variables.tags", "env.HOME"]
        );
        assert!(has_substitution_patterns(&doc));
        assert!(!has_substitution_patterns(&json!({ "a": "plain" })));
    }

    #[test]
    fn test_parse_expression_rules() {
        assert!(parse_expression("input.region").is_ok());
        assert!(parse_expression("outputs.fetch.items.0").is_ok());
        assert!(parse_expression("").is_err());
        assert!(parse_expression("input").is_err());
        assert!(parse_expression("input..x").is_err());
        assert!(parse_expression("secrets.token").is_err());
        assert!(parse_expression("input.a b").is_err());
    }

    #[test]
    fn test_validate_expressions() {
        let doc = json!({
            "a": "${input.region}",
            "b": "${input.unknown}",
            "c": "${outputs.later.value}",
            "d": "${}",
            "e": "${nope.x}"
        });
        let diagnostics = validate_expressions(&doc, &context());
        let codes: Vec<(DiagnosticCode, &str)> = diagnostics
            .iter()
            .map(|d| (d.code, d.path.as_str()))
            .collect();
        assert_eq!(
            codes,
            vec![
                (DiagnosticCode::UnresolvedExpression, "b"),
                (DiagnosticCode::InvalidExpression, "d"),
                (DiagnosticCode::InvalidExpression, "e"),
            ]
        );
    }

    #[test]
    fn test_merged_with_defaults() {
        let workflow = WorkflowDefinition::new("acme", "demo", "1.0.0")
            .with_variable("greeting", "hello")
            .with_input(
                "size",
                InputDefinition {
                    default: Some(json!(10)),
                    ..Default::default()
                },
            )
            .with_input(
                "token",
                InputDefinition {
                    required: true,
                    ..Default::default()
                },
            );

        let (merged, errors) = SubstitutionContext::new()
            .with_variable("greeting", "hi")
            .merged_with_defaults(&workflow);

        assert_eq!(merged.variables["greeting"], json!("hi"));
        assert_eq!(merged.input["size"], json!(10));
        assert_eq!(merged.resolve_path("workflow.id"), Some(&json!("acme.demo")));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, DiagnosticCode::MissingRequiredInput);
        assert_eq!(errors[0].path, "inputs.token");
    }
}
