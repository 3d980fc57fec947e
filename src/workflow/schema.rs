//! Structural Schema
//!
//! A JSON-schema-like description of the workflow document, checked before
//! any semantic validation. The schema is built once on first use.
//!
//! Keyword classes map to diagnostics as follows:
//! - `required`, `type`, `enum`, `minLength` violations are errors
//! - `pattern` and `format` violations are warnings
//!
//! A string containing a `${...}` expression satisfies any type, enum or
//! pattern constraint: its real value is only known after substitution.

use std::collections::HashMap;

use chrono::DateTime;
use once_cell::sync::Lazy;
use serde_json::Value;

use super::diagnostics::{DiagnosticCode, ValidationReport};
use super::substitution::contains_expression;

/// JSON value kinds a schema node may accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    Object,
    Array,
    String,
    Integer,
    Number,
    Boolean,
}

impl JsonType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Array => "array",
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

/// Named string patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// `^[A-Za-z][A-Za-z0-9_-]*$`
    Identifier,
    /// `^\d+\.\d+\.\d+$`
    SemVer,
}

impl Pattern {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Identifier => is_identifier(text),
            Self::SemVer => is_semver(text),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::Identifier => "a letter followed by letters, digits, '_' or '-'",
            Self::SemVer => "MAJOR.MINOR.PATCH",
        }
    }
}

/// Named string formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// RFC 3339 timestamp
    DateTime,
}

impl Format {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::DateTime => DateTime::parse_from_rfc3339(text).is_ok(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::DateTime => "date-time",
        }
    }
}

/// A named property of an object schema.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: &'static str,
    pub required: bool,
    pub schema: Schema,
}

/// One node of the structural schema.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    /// Accepted kinds; empty means any value
    pub types: Vec<JsonType>,
    pub properties: Vec<Property>,
    /// Schema for object keys not listed in `properties`
    pub additional: Option<Box<Schema>>,
    pub items: Option<Box<Schema>>,
    pub enum_values: Vec<&'static str>,
    pub min_length: Option<usize>,
    pub pattern: Option<Pattern>,
    pub format: Option<Format>,
    /// Validate this node as a workflow step (recursive step lists)
    pub step: bool,
}

impl Schema {
    fn of(types: &[JsonType]) -> Self {
        Self {
            types: types.to_vec(),
            ..Self::default()
        }
    }

    fn any() -> Self {
        Self::default()
    }

    fn object() -> Self {
        Self::of(&[JsonType::Object])
    }

    fn string() -> Self {
        Self::of(&[JsonType::String])
    }

    fn integer() -> Self {
        Self::of(&[JsonType::Integer])
    }

    fn boolean() -> Self {
        Self::of(&[JsonType::Boolean])
    }

    fn array_of(items: Schema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of(&[JsonType::Array])
        }
    }

    fn step_ref() -> Self {
        Self {
            step: true,
            ..Self::default()
        }
    }

    fn required(mut self, name: &'static str, schema: Schema) -> Self {
        self.properties.push(Property {
            name,
            required: true,
            schema,
        });
        self
    }

    fn optional(mut self, name: &'static str, schema: Schema) -> Self {
        self.properties.push(Property {
            name,
            required: false,
            schema,
        });
        self
    }

    fn additional(mut self, schema: Schema) -> Self {
        self.additional = Some(Box::new(schema));
        self
    }

    fn non_empty(mut self) -> Self {
        self.min_length = Some(1);
        self
    }

    fn one_of(mut self, values: &[&'static str]) -> Self {
        self.enum_values = values.to_vec();
        self
    }

    fn pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }
}

/// Schema of a whole workflow document.
pub static WORKFLOW_SCHEMA: Lazy<Schema> = Lazy::new(|| {
    let input = Schema::object()
        .optional(
            "type",
            Schema::string().one_of(&["string", "number", "integer", "boolean", "object", "array"]),
        )
        .optional("required", Schema::boolean())
        .optional("default", Schema::any())
        .optional("description", Schema::string());

    let output = Schema::object()
        .required("source", Schema::string().non_empty())
        .optional("description", Schema::string());

    let metadata = Schema::object()
        .optional("timeout", Schema::integer())
        .optional("createdAt", Schema::string().format(Format::DateTime))
        .optional("updatedAt", Schema::string().format(Format::DateTime));

    Schema::object()
        .required("nameSpace", Schema::string().non_empty())
        .required("name", Schema::string().non_empty())
        .required("version", Schema::string().non_empty().pattern(Pattern::SemVer))
        .optional("description", Schema::string())
        .optional("author", Schema::string())
        .optional("tags", Schema::array_of(Schema::string()))
        .optional("inputs", Schema::object().additional(input))
        .optional("outputs", Schema::object().additional(output))
        .optional("variables", Schema::object())
        .required("steps", Schema::array_of(Schema::step_ref()))
        .optional("metadata", metadata)
});

/// Schema of a single step (nested step lists refer back to it).
pub static STEP_SCHEMA: Lazy<Schema> = Lazy::new(|| {
    let branch = Schema::object()
        .optional("name", Schema::string())
        .required("steps", Schema::array_of(Schema::step_ref()));

    let depends_on = Schema {
        items: Some(Box::new(Schema::string().non_empty())),
        ..Schema::of(&[JsonType::String, JsonType::Array])
    };

    Schema::object()
        .required("id", Schema::string().non_empty().pattern(Pattern::Identifier))
        .required("type", Schema::string().non_empty())
        .optional("config", Schema::object())
        .optional("dependsOn", depends_on)
        .optional("timeout", Schema::integer())
        .optional("steps", Schema::array_of(Schema::step_ref()))
        .optional("thenSteps", Schema::array_of(Schema::step_ref()))
        .optional("elseSteps", Schema::array_of(Schema::step_ref()))
        .optional("branches", Schema::array_of(branch))
});

/// Config schemas for the built-in step types, keyed by step type.
pub static STEP_CONFIG_SCHEMAS: Lazy<HashMap<&'static str, Schema>> = Lazy::new(|| {
    let mut schemas = HashMap::new();
    schemas.insert(
        "log",
        Schema::object()
            .optional("message", Schema::any())
            .optional("level", Schema::string().one_of(&["debug", "info", "warn", "error"])),
    );
    schemas.insert("delay", Schema::object().required("ms", Schema::integer()));
    schemas.insert("set", Schema::object().required("values", Schema::object()));
    schemas.insert(
        "conditional",
        Schema::object().required(
            "condition",
            Schema::of(&[JsonType::String, JsonType::Boolean]),
        ),
    );
    schemas.insert(
        "parallel",
        Schema::object().optional("mode", Schema::string().one_of(&["all", "any"])),
    );
    schemas
});

/// Validates a parsed document against [`WORKFLOW_SCHEMA`].
pub fn validate_schema(document: &Value) -> ValidationReport {
    let mut report = ValidationReport::new();
    validate_node(&WORKFLOW_SCHEMA, document, "", &mut report);
    report
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn validate_node(schema: &Schema, value: &Value, path: &str, report: &mut ValidationReport) {
    if schema.step {
        validate_step(value, path, report);
        return;
    }

    if let Value::String(text) = value {
        if contains_expression(text) {
            return;
        }
    }

    if !schema.types.is_empty() && !schema.types.iter().any(|t| t.matches(value)) {
        let expected: Vec<&str> = schema.types.iter().map(|t| t.name()).collect();
        report.error(
            DiagnosticCode::SchemaType,
            format!(
                "'{}' must be of type {}, found {}",
                display_path(path),
                expected.join(" or "),
                kind_of(value)
            ),
            path,
        );
        return;
    }

    match value {
        Value::Object(map) => {
            for property in &schema.properties {
                let property_path = child_path(path, property.name);
                match map.get(property.name) {
                    Some(child) => validate_node(&property.schema, child, &property_path, report),
                    None if property.required => report.error(
                        DiagnosticCode::SchemaRequired,
                        format!(
                            "'{}' is missing required property '{}'",
                            display_path(path),
                            property.name
                        ),
                        property_path,
                    ),
                    None => {}
                }
            }
            if let Some(additional) = &schema.additional {
                for (key, child) in map {
                    if schema.properties.iter().any(|p| p.name == key) {
                        continue;
                    }
                    validate_node(additional, child, &child_path(path, key), report);
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = &schema.items {
                for (i, item) in items.iter().enumerate() {
                    validate_node(item_schema, item, &format!("{}[{}]", path, i), report);
                }
            }
        }
        Value::String(text) => validate_string(schema, text, path, report),
        _ => {}
    }
}

fn validate_string(schema: &Schema, text: &str, path: &str, report: &mut ValidationReport) {
    if let Some(min) = schema.min_length {
        if text.chars().count() < min {
            report.error(
                DiagnosticCode::SchemaMinLength,
                format!("'{}' must be at least {} character(s) long", display_path(path), min),
                path,
            );
            return;
        }
    }

    if !schema.enum_values.is_empty() && !schema.enum_values.contains(&text) {
        report.error(
            DiagnosticCode::SchemaEnum,
            format!(
                "'{}' must be one of [{}], found '{}'",
                display_path(path),
                schema.enum_values.join(", "),
                text
            ),
            path,
        );
    }

    if let Some(pattern) = schema.pattern {
        if !pattern.matches(text) {
            report.warning(
                DiagnosticCode::SchemaPattern,
                format!(
                    "'{}' value '{}' does not match pattern ({})",
                    display_path(path),
                    text,
                    pattern.describe()
                ),
                path,
            );
        }
    }

    if let Some(format) = schema.format {
        if !format.matches(text) {
            report.warning(
                DiagnosticCode::SchemaFormat,
                format!(
                    "'{}' value '{}' is not a valid {}",
                    display_path(path),
                    text,
                    format.name()
                ),
                path,
            );
        }
    }
}

fn validate_step(value: &Value, path: &str, report: &mut ValidationReport) {
    let errors_before = report.errors.len();
    validate_node(&STEP_SCHEMA, value, path, report);
    if report.errors.len() > errors_before {
        return;
    }

    let step_type = value.get("type").and_then(Value::as_str).unwrap_or_default();
    if let Some(config_schema) = STEP_CONFIG_SCHEMAS.get(step_type) {
        let config = value
            .get("config")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        validate_node(config_schema, &config, &child_path(path, "config"), report);
    }
}

/// `^[A-Za-z][A-Za-z0-9_-]*$`
pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// `^\d+\.\d+\.\d+$`
pub fn is_semver(text: &str) -> bool {
    let parts: Vec<&str> = text.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "nameSpace": "acme",
            "name": "demo",
            "version": "1.0.0",
            "steps": [{ "id": "hello", "type": "log", "config": { "message": "hi" } }]
        })
    }

    #[test]
    fn test_minimal_document_is_valid() {
        let report = validate_schema(&minimal());
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_missing_required_fields() {
        let report = validate_schema(&json!({ "name": "demo" }));
        let paths: Vec<&str> = report
            .errors
            .iter()
            .filter(|d| d.code == DiagnosticCode::SchemaRequired)
            .map(|d| d.path.as_str())
            .collect();
        assert_eq!(paths, vec!["nameSpace", "version", "steps"]);
    }

    #[test]
    fn test_root_must_be_object() {
        let report = validate_schema(&json!(["not", "a", "workflow"]));
        assert!(report.has_error(DiagnosticCode::SchemaType));
    }

    #[test]
    fn test_wrong_type_is_error() {
        let mut doc = minimal();
        doc["steps"][0]["timeout"] = json!("soon");
        let report = validate_schema(&doc);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, DiagnosticCode::SchemaType);
        assert_eq!(report.errors[0].path, "steps[0].timeout");
    }

    #[test]
    fn test_pattern_violation_is_warning() {
        let mut doc = minimal();
        doc["version"] = json!("v1");
        doc["steps"][0]["id"] = json!("1st step");
        let report = validate_schema(&doc);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings.iter().all(|w| w.code == DiagnosticCode::SchemaPattern));
    }

    #[test]
    fn test_format_violation_is_warning() {
        let mut doc = minimal();
        doc["metadata"] = json!({ "createdAt": "yesterday" });
        let report = validate_schema(&doc);
        assert!(report.is_valid());
        assert!(report.has_warning(DiagnosticCode::SchemaFormat));

        doc["metadata"] = json!({ "createdAt": "2024-05-01T10:00:00Z" });
        assert!(validate_schema(&doc).warnings.is_empty());
    }

    #[test]
    fn test_step_config_enum() {
        let mut doc = minimal();
        doc["steps"][0]["config"]["level"] = json!("loud");
        let report = validate_schema(&doc);
        assert!(report.has_error(DiagnosticCode::SchemaEnum));
        assert_eq!(report.errors[0].path, "steps[0].config.level");
    }

    #[test]
    fn test_step_config_required_key() {
        let mut doc = minimal();
        doc["steps"][0] = json!({ "id": "pause", "type": "delay" });
        let report = validate_schema(&doc);
        assert!(report.has_error(DiagnosticCode::SchemaRequired));
        assert_eq!(report.errors[0].path, "steps[0].config.ms");
    }

    #[test]
    fn test_expression_satisfies_type() {
        let mut doc = minimal();
        doc["steps"][0] = json!({ "id": "pause", "type": "delay", "config": { "ms": "${input.wait}" } });
        assert!(validate_schema(&doc).is_valid());
    }

    #[test]
    fn test_nested_steps_are_validated() {
        let mut doc = minimal();
        doc["steps"][0] = json!({
            "id": "fan",
            "type": "parallel",
            "branches": [{ "steps": [{ "id": "inner" }] }]
        });
        let report = validate_schema(&doc);
        assert!(report.has_error(DiagnosticCode::SchemaRequired));
        assert_eq!(report.errors[0].path, "steps[0].branches[0].steps[0].type");
    }

    #[test]
    fn test_depends_on_string_or_array() {
        let mut doc = minimal();
        doc["steps"][0]["dependsOn"] = json!("other");
        assert!(validate_schema(&doc).is_valid());
        doc["steps"][0]["dependsOn"] = json!(["a", "b"]);
        assert!(validate_schema(&doc).is_valid());
        doc["steps"][0]["dependsOn"] = json!(42);
        assert!(validate_schema(&doc).has_error(DiagnosticCode::SchemaType));
    }

    #[test]
    fn test_identifier_and_semver_helpers() {
        assert!(is_identifier("fetch_data-2"));
        assert!(!is_identifier("2fetch"));
        assert!(!is_identifier(""));
        assert!(is_semver("10.0.3"));
        assert!(!is_semver("1.0"));
        assert!(!is_semver("1.0.x"));
        assert!(!is_semver("1..0"));
    }
}
