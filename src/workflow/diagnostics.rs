//! Validation Diagnostics
//!
//! Errors and warnings produced while parsing, validating and substituting
//! a workflow document. Each diagnostic carries a machine-readable code, a
//! human message and a path locating the offending element
//! (e.g. `steps[2].dependsOn[0]`).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine-readable classification of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Parse
    ParseError,
    FileReadError,

    // Schema
    SchemaRequired,
    SchemaType,
    SchemaEnum,
    SchemaMinLength,
    SchemaPattern,
    SchemaFormat,

    // Semantic
    InvalidNamespace,
    DuplicateStepId,
    MissingDependency,
    CircularDependency,
    InvalidConditionExpression,
    InvalidTimeout,
    InvalidVersion,
    InvalidOutputSource,
    UnusedRequiredInput,
    EmptyWorkflow,

    // Substitution
    InvalidExpression,
    UnresolvedExpression,
    MissingRequiredInput,

    // Executor
    StepTypeNotFound,
    InvalidStepConfig,
    ExecutionInProgress,
}

impl DiagnosticCode {
    /// Returns the code as it appears in reports, e.g. `DUPLICATE_STEP_ID`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::FileReadError => "FILE_READ_ERROR",
            Self::SchemaRequired => "SCHEMA_REQUIRED",
            Self::SchemaType => "SCHEMA_TYPE",
            Self::SchemaEnum => "SCHEMA_ENUM",
            Self::SchemaMinLength => "SCHEMA_MIN_LENGTH",
            Self::SchemaPattern => "SCHEMA_PATTERN",
            Self::SchemaFormat => "SCHEMA_FORMAT",
            Self::InvalidNamespace => "INVALID_NAMESPACE",
            Self::DuplicateStepId => "DUPLICATE_STEP_ID",
            Self::MissingDependency => "MISSING_DEPENDENCY",
            Self::CircularDependency => "CIRCULAR_DEPENDENCY",
            Self::InvalidConditionExpression => "INVALID_CONDITION_EXPRESSION",
            Self::InvalidTimeout => "INVALID_TIMEOUT",
            Self::InvalidVersion => "INVALID_VERSION",
            Self::InvalidOutputSource => "INVALID_OUTPUT_SOURCE",
            Self::UnusedRequiredInput => "UNUSED_REQUIRED_INPUT",
            Self::EmptyWorkflow => "EMPTY_WORKFLOW",
            Self::InvalidExpression => "INVALID_EXPRESSION",
            Self::UnresolvedExpression => "UNRESOLVED_EXPRESSION",
            Self::MissingRequiredInput => "MISSING_REQUIRED_INPUT",
            Self::StepTypeNotFound => "STEP_TYPE_NOT_FOUND",
            Self::InvalidStepConfig => "INVALID_STEP_CONFIG",
            Self::ExecutionInProgress => "EXECUTION_IN_PROGRESS",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single error or warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub message: String,
    /// Location of the offending element inside the document
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    /// Source file, when the document was loaded from disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: path.into(),
            line: None,
            column: None,
            file: None,
        }
    }

    /// Attaches a 1-based source position.
    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{}:", file)?;
        }
        if let (Some(line), Some(column)) = (self.line, self.column) {
            write!(f, "{}:{}: ", line, column)?;
        } else if self.file.is_some() {
            write!(f, " ")?;
        }
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.path.is_empty() {
            write!(f, " (at {})", self.path)?;
        }
        Ok(())
    }
}

/// Accumulates errors and warnings across validation passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, code: DiagnosticCode, message: impl Into<String>, path: impl Into<String>) {
        self.errors.push(Diagnostic::new(code, message, path));
    }

    pub fn warning(&mut self, code: DiagnosticCode, message: impl Into<String>, path: impl Into<String>) {
        self.warnings.push(Diagnostic::new(code, message, path));
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_error(&self, code: DiagnosticCode) -> bool {
        self.errors.iter().any(|d| d.code == code)
    }

    pub fn has_warning(&self, code: DiagnosticCode) -> bool {
        self.warnings.iter().any(|d| d.code == code)
    }

    /// Moves all diagnostics of `other` into this report.
    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Outcome of a standalone validation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl From<ValidationReport> for ValidationResult {
    fn from(report: ValidationReport) -> Self {
        Self {
            valid: report.is_valid(),
            errors: report.errors,
            warnings: report.warnings,
        }
    }
}
