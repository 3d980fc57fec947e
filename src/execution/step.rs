//! Step Contract
//!
//! Defines the interface every step implementation fulfils and the
//! context it runs in.
//!
//! A step reports failure in one of two ways:
//! - returning `Ok(StepResult { success: false, .. })` for an expected failure
//! - returning `Err(StepError)` when it cannot run at all
//!
//! The executor turns both into failed step records.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{log, Level};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::registry::{RegistryError, StepRegistry};
use crate::workflow::model::StepDefinition;
use crate::workflow::substitution::{value_text, ParameterSubstitution, SubstitutionContext};

/// Error raised by a step that could not run.
#[derive(Debug, Error)]
pub enum StepError {
    /// The step ran and failed
    #[error("step execution failed: {0}")]
    ExecutionFailed(String),

    /// The step configuration is unusable
    #[error("invalid step configuration: {0}")]
    InvalidConfig(String),

    /// The step exceeded its timeout
    #[error("step timed out after {0:?}")]
    Timeout(Duration),

    /// The run was cancelled while the step was running
    #[error("step cancelled")]
    Cancelled,

    /// A nested step could not be created
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StepError {
    /// Machine-readable code recorded on failed step records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ExecutionFailed(_) => "EXECUTION_FAILED",
            Self::InvalidConfig(_) => "INVALID_STEP_CONFIG",
            Self::Timeout(_) => "STEP_TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Registry(RegistryError::StepTypeNotFound(_)) => "STEP_TYPE_NOT_FOUND",
            Self::Registry(_) => "REGISTRY_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// Result of [`Step::validate_config`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    /// Valid exactly when `errors` is empty.
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Records an error, marking the configuration invalid.
    pub fn error(&mut self, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(message.into());
    }
}

/// Outcome of a single step execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub success: bool,
    #[serde(default)]
    pub outputs: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl StepResult {
    /// A successful result with the given outputs.
    pub fn success(outputs: Map<String, Value>) -> Self {
        Self {
            success: true,
            outputs,
            ..Self::default()
        }
    }

    /// A reported failure.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// A successful result that did no work.
    pub fn skipped() -> Self {
        Self {
            success: true,
            skipped: true,
            ..Self::default()
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Logger handed to steps, tagging every line with the execution and step.
#[derive(Debug, Clone)]
pub struct StepLogger {
    execution_id: String,
    step_id: String,
}

impl StepLogger {
    pub const TARGET: &'static str = "flowrunner::step";

    pub fn new(execution_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            step_id: step_id.into(),
        }
    }

    pub fn log(&self, level: Level, message: &str) {
        log!(target: Self::TARGET, level, "[{}/{}] {}", self.execution_id, self.step_id, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

/// Everything a step can see while it runs.
#[derive(Clone)]
pub struct StepContext {
    /// `nameSpace.name` of the running workflow
    pub workflow_id: String,
    pub execution_id: String,
    pub step_id: String,
    pub step_type: String,
    /// The step's configuration after substitution
    pub inputs: Map<String, Value>,
    pub variables: Map<String, Value>,
    pub env: HashMap<String, String>,
    /// Results of steps that already ran, keyed by step id
    pub step_results: HashMap<String, StepResult>,
    pub logger: StepLogger,
    pub dry_run: bool,
    pub timeout: Option<Duration>,
    registry: Arc<StepRegistry>,
    scope: SubstitutionContext,
    cancelled: Arc<AtomicBool>,
}

impl StepContext {
    /// Builds a context for `step` from a substitution scope.
    ///
    /// The step configuration is substituted (non-strict) against `scope`
    /// extended with the step's own identity.
    pub fn new(
        step: &StepDefinition,
        execution_id: &str,
        scope: &SubstitutionContext,
        registry: Arc<StepRegistry>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        let mut scope = scope.clone();
        scope.step = Map::new();
        scope.step.insert("id".to_string(), Value::String(step.id.clone()));
        scope
            .step
            .insert("type".to_string(), Value::String(step.step_type.clone()));

        let (inputs, _) = ParameterSubstitution::new(&scope).substitute_map(&step.config);

        let workflow_id = scope
            .workflow
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let env = scope
            .env
            .iter()
            .map(|(k, v)| (k.clone(), value_text(v)))
            .collect();

        Self {
            workflow_id,
            execution_id: execution_id.to_string(),
            step_id: step.id.clone(),
            step_type: step.step_type.clone(),
            inputs,
            variables: scope.variables.clone(),
            env,
            step_results: HashMap::new(),
            logger: StepLogger::new(execution_id, &step.id),
            dry_run: false,
            timeout: step.timeout.map(Duration::from_millis),
            registry,
            scope,
            cancelled,
        }
    }

    pub fn with_step_results(mut self, results: HashMap<String, StepResult>) -> Self {
        self.step_results = results;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Gets a configuration value.
    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key)
    }

    /// Gets a configuration value as a string.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.inputs.get(key).and_then(Value::as_str)
    }

    /// Gets an environment variable.
    pub fn env(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The substitution scope this step was created in.
    pub fn scope(&self) -> &SubstitutionContext {
        &self.scope
    }

    /// Builds the context of a step nested inside this one.
    ///
    /// `sibling_outputs` holds outputs of nested steps that already ran and
    /// is exposed under `outputs.<id>` alongside the parent's scope.
    pub fn child_context(
        &self,
        child: &StepDefinition,
        sibling_outputs: &Map<String, Value>,
        sibling_results: &HashMap<String, StepResult>,
    ) -> StepContext {
        let mut scope = self.scope.clone();
        for (id, outputs) in sibling_outputs {
            scope.outputs.insert(id.clone(), outputs.clone());
        }

        let mut results = self.step_results.clone();
        results.extend(sibling_results.iter().map(|(k, v)| (k.clone(), v.clone())));

        StepContext::new(
            child,
            &self.execution_id,
            &scope,
            Arc::clone(&self.registry),
            Arc::clone(&self.cancelled),
        )
        .with_step_results(results)
        .with_dry_run(self.dry_run)
    }
}

/// A unit of work in a workflow.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use flowrunner::execution::{Step, StepContext, StepError, StepResult};
///
/// struct Echo;
///
/// #[async_trait]
/// impl Step for Echo {
///     fn step_type(&self) -> &str {
///         "echo"
///     }
///
///     async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
///         let text = ctx.input_str("text").unwrap_or_default();
///         Ok(StepResult::success(Default::default()).with_output("text", text))
///     }
/// }
/// ```
#[async_trait]
pub trait Step: Send + Sync {
    /// The type name this step is registered under.
    fn step_type(&self) -> &str;

    /// Runs the step.
    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError>;

    /// Checks a configuration without running anything. Used for
    /// validation and dry runs.
    fn validate_config(&self, config: &Map<String, Value>) -> ConfigValidation {
        let _ = config;
        ConfigValidation::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> SubstitutionContext {
        SubstitutionContext::new()
            .with_input("name", "flow")
            .with_env("HOME", "/root")
            .with_step_outputs("first", json!({ "count": 2 }))
    }

    fn context(step: &StepDefinition) -> StepContext {
        StepContext::new(
            step,
            "exec-1",
            &scope(),
            Arc::new(StepRegistry::new()),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_context_substitutes_config() {
        let step = StepDefinition::new("greet", "log")
            .with_config("message", "hi ${input.name} from ${step.id}")
            .with_config("count", "${outputs.first.count}")
            .with_config("later", "${outputs.unknown.x}")
            .with_timeout(250);
        let ctx = context(&step);

        assert_eq!(ctx.input_str("message"), Some("hi flow from greet"));
        assert_eq!(ctx.input("count"), Some(&json!(2)));
        assert_eq!(ctx.input_str("later"), Some("${outputs.unknown.x}"));
        assert_eq!(ctx.env("HOME"), Some("/root"));
        assert_eq!(ctx.timeout(), Some(Duration::from_millis(250)));
        assert!(!ctx.is_dry_run());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_child_context_sees_sibling_outputs() {
        let parent = StepDefinition::new("parent", "conditional");
        let ctx = context(&parent).with_dry_run(true);

        let child = StepDefinition::new("child", "log").with_config("m", "${outputs.sib.v}");
        let mut outputs = Map::new();
        outputs.insert("sib".to_string(), json!({ "v": "ok" }));
        let child_ctx = ctx.child_context(&child, &outputs, &HashMap::new());

        assert_eq!(child_ctx.step_id, "child");
        assert_eq!(child_ctx.input_str("m"), Some("ok"));
        assert!(child_ctx.is_dry_run());
    }

    #[test]
    fn test_step_result_builders() {
        let ok = StepResult::success(Map::new()).with_output("n", 1);
        assert!(ok.success);
        assert_eq!(ok.outputs["n"], json!(1));

        let failed = StepResult::failure("boom");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));

        let skipped = StepResult::skipped();
        assert!(skipped.success && skipped.skipped);
    }

    #[test]
    fn test_config_validation() {
        let mut validation = ConfigValidation::ok();
        assert!(validation.valid);
        validation.error("missing 'ms'");
        assert!(!validation.valid);
        assert_eq!(validation.errors.len(), 1);
        assert!(ConfigValidation::from_errors(Vec::new()).valid);
        let failed = ConfigValidation::from_errors(vec!["bad level".to_string()]);
        assert!(!failed.valid);
        assert_eq!(failed.errors, vec!["bad level"]);
    }

    #[test]
    fn test_step_error_codes() {
        assert_eq!(StepError::Timeout(Duration::from_millis(5)).code(), "STEP_TIMEOUT");
        assert_eq!(
            StepError::from(RegistryError::StepTypeNotFound("x".into())).code(),
            "STEP_TYPE_NOT_FOUND"
        );
    }
}
