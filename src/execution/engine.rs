//! Workflow Execution Engine
//!
//! The executor that drives a validated workflow to completion:
//! - Dependency-ordered, one-at-a-time execution of top-level steps
//! - Per-step parameter substitution against the run's context
//! - Progress events and immutable state snapshots
//! - Cooperative cancellation, checked before each step
//!
//! Steps nested inside composite steps are run by their parent, not by the
//! executor.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::registry::{StepInstanceConfig, StepRegistry};
use super::state::{ExecutionState, ExecutionStatus, RecordError, RecordMetadata, StepExecutionRecord};
use super::step::{StepContext, StepError, StepResult};
use crate::monitoring::progress::{ProgressEvent, ProgressEventKind, ProgressReporter};
use crate::workflow::dependencies::resolve_execution_order;
use crate::workflow::diagnostics::{Diagnostic, DiagnosticCode};
use crate::workflow::model::{walk_steps, StepDefinition, WorkflowDefinition};
use crate::workflow::substitution::SubstitutionContext;

/// Options for a single [`WorkflowExecutor::execute_workflow`] call.
#[derive(Clone, Default)]
pub struct ExecutionOptions {
    /// Input values, overriding declared defaults
    pub inputs: Map<String, Value>,
    /// Additions and overrides to the process environment seen by
    /// `${env.*}` expressions
    pub environment: HashMap<String, String>,
    /// Validate step configurations without running step bodies
    pub dry_run: bool,
    /// Keep going after a step fails
    pub continue_on_error: bool,
    pub on_progress: Option<Arc<dyn ProgressReporter>>,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn on_progress(mut self, reporter: impl ProgressReporter + 'static) -> Self {
        self.on_progress = Some(Arc::new(reporter));
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(reporter) = &self.on_progress {
            reporter.report(&event);
        }
    }
}

impl fmt::Debug for ExecutionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionOptions")
            .field("inputs", &self.inputs)
            .field("environment", &self.environment.keys().collect::<Vec<_>>())
            .field("dry_run", &self.dry_run)
            .field("continue_on_error", &self.continue_on_error)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// A failure recorded on an execution result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ExecutionError {
    fn for_step(step_id: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            step_id: Some(step_id.to_string()),
            path: None,
        }
    }
}

impl From<Diagnostic> for ExecutionError {
    fn from(diagnostic: Diagnostic) -> Self {
        Self {
            code: diagnostic.code.as_str().to_string(),
            message: diagnostic.message,
            step_id: None,
            path: Some(diagnostic.path).filter(|p| !p.is_empty()),
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step_id {
            Some(step_id) => write!(f, "[{}] step '{}': {}", self.code, step_id, self.message),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

/// Timing and counters of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    pub execution_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
}

/// Outcome of [`WorkflowExecutor::execute_workflow`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecutionResult {
    pub success: bool,
    pub cancelled: bool,
    /// One record per attempted step, in execution order
    pub executed_steps: Vec<StepExecutionRecord>,
    /// Outputs by step id, for steps that produced any
    pub outputs: Map<String, Value>,
    /// Declared workflow outputs, resolved after the run
    pub workflow_outputs: Map<String, Value>,
    pub metadata: ExecutionMetadata,
    /// First error encountered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    pub errors: Vec<ExecutionError>,
}

impl WorkflowExecutionResult {
    pub fn execution_id(&self) -> &str {
        &self.metadata.execution_id
    }

    /// Gets the record of a step.
    pub fn step(&self, step_id: &str) -> Option<&StepExecutionRecord> {
        self.executed_steps.iter().find(|r| r.step_id == step_id)
    }

    fn aborted(execution_id: &str, start_time: DateTime<Utc>, total_steps: usize, errors: Vec<ExecutionError>) -> Self {
        let end_time = Utc::now();
        Self {
            success: false,
            cancelled: false,
            executed_steps: Vec::new(),
            outputs: Map::new(),
            workflow_outputs: Map::new(),
            metadata: ExecutionMetadata {
                execution_id: execution_id.to_string(),
                start_time,
                end_time,
                duration_ms: elapsed_ms(start_time, end_time),
                total_steps,
                completed_steps: 0,
                failed_steps: 0,
            },
            error: errors.first().cloned(),
            errors,
        }
    }
}

/// Outcome of [`WorkflowExecutor::validate_workflow`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowValidation {
    pub valid: bool,
    pub errors: Vec<Diagnostic>,
}

/// Cancels the run of the executor it was taken from.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Clears the in-flight flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Workflow executor.
///
/// Runs one workflow at a time. Step types are looked up in the registry
/// it was built with.
///
/// # Example
///
/// ```rust,no_run
/// use flowrunner::execution::{ExecutionOptions, WorkflowExecutor};
/// use flowrunner::workflow::{StepDefinition, WorkflowDefinition};
///
/// # async fn run() {
/// let workflow = WorkflowDefinition::new("demo", "hello", "1.0.0")
///     .with_step(StepDefinition::new("greet", "log").with_config("message", "hello"));
///
/// let executor = WorkflowExecutor::with_builtins();
/// let result = executor
///     .execute_workflow(&workflow, ExecutionOptions::new())
///     .await;
/// assert!(result.success);
/// # }
/// ```
pub struct WorkflowExecutor {
    registry: Arc<StepRegistry>,
    state: Mutex<ExecutionState>,
    cancelled: Arc<AtomicBool>,
    running: AtomicBool,
}

impl WorkflowExecutor {
    /// Creates an executor over an existing registry.
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(ExecutionState::idle()),
            cancelled: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
        }
    }

    /// Creates an executor with a fresh registry of built-in step types.
    pub fn with_builtins() -> Self {
        Self::new(Arc::new(StepRegistry::with_builtins()))
    }

    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    /// Returns a snapshot of the current state.
    pub fn execution_state(&self) -> ExecutionState {
        self.state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Requests cancellation of the current run. Takes effect before the
    /// next step starts.
    pub fn cancel_execution(&self) {
        info!("Cancellation requested");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns a handle that cancels runs of this executor from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancelled))
    }

    fn set_state(&self, next: ExecutionState) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *state = next;
    }

    fn transition<F>(&self, f: F) -> ExecutionState
    where
        F: FnOnce(&ExecutionState) -> ExecutionState,
    {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *state = f(&state);
        state.clone()
    }

    /// Checks a workflow against the live registry without running it.
    ///
    /// Reports an empty step list, duplicate ids, unknown step types,
    /// dangling or cyclic dependencies between top-level steps, and
    /// configurations rejected by their step type.
    pub fn validate_workflow(&self, workflow: &WorkflowDefinition) -> WorkflowValidation {
        let mut errors = Vec::new();

        if workflow.is_empty() {
            errors.push(Diagnostic::new(
                DiagnosticCode::EmptyWorkflow,
                "workflow has no steps",
                "steps",
            ));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut known: Vec<(&StepDefinition, String)> = Vec::new();
        walk_steps(&workflow.steps, "steps", &mut |step, path| {
            if !seen.insert(step.id.as_str()) {
                errors.push(Diagnostic::new(
                    DiagnosticCode::DuplicateStepId,
                    format!("duplicate step id '{}'", step.id),
                    format!("{}.id", path),
                ));
            }
            if self.registry.has_step(&step.step_type) {
                known.push((step, path.to_string()));
            } else {
                errors.push(Diagnostic::new(
                    DiagnosticCode::StepTypeNotFound,
                    format!("Step Type Not Found: '{}' (step '{}')", step.step_type, step.id),
                    format!("{}.type", path),
                ));
            }
        });

        errors.extend(
            resolve_execution_order(&workflow.steps)
                .errors
                .into_iter()
                .filter(|e| e.code != DiagnosticCode::DuplicateStepId),
        );

        for (step, path) in known {
            let instance = match self.registry.create_step(&StepInstanceConfig::from_definition(step)) {
                Ok(instance) => instance,
                Err(e) => {
                    errors.push(Diagnostic::new(DiagnosticCode::StepTypeNotFound, e.to_string(), format!("{}.type", path)));
                    continue;
                }
            };
            let validation = instance.validate_config(&step.config);
            for message in validation.errors {
                errors.push(Diagnostic::new(
                    DiagnosticCode::InvalidStepConfig,
                    format!("step '{}': {}", step.id, message),
                    format!("{}.config", path),
                ));
            }
        }

        WorkflowValidation {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Executes a workflow.
    ///
    /// 1. Validates it (skipped for dry runs) and resolves the step order
    /// 2. Builds the substitution context from declared defaults,
    ///    `options.inputs` and the process environment, overridden by
    ///    `options.environment`
    /// 3. Runs each top-level step in order, stopping at the first failure
    ///    unless `continue_on_error` is set
    /// 4. Resolves declared workflow outputs
    ///
    /// Failures never escape as `Err`; they are reported on the result and
    /// through progress events. Only one run may be in flight per executor;
    /// a concurrent call fails with `EXECUTION_IN_PROGRESS`.
    pub async fn execute_workflow(
        &self,
        workflow: &WorkflowDefinition,
        options: ExecutionOptions,
    ) -> WorkflowExecutionResult {
        let execution_id = Uuid::new_v4().to_string();
        let start_time = Utc::now();
        let total_steps = workflow.steps.len();

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Rejected run {}: another run is in progress", execution_id);
            let error = ExecutionError {
                code: DiagnosticCode::ExecutionInProgress.as_str().to_string(),
                message: "another execution is already in progress".to_string(),
                step_id: None,
                path: None,
            };
            return WorkflowExecutionResult::aborted(&execution_id, start_time, total_steps, vec![error]);
        }
        let _guard = RunGuard(&self.running);
        self.cancelled.store(false, Ordering::SeqCst);

        self.set_state(ExecutionState::started(&execution_id, total_steps));
        info!(
            "Starting workflow '{}.{}' v{} (execution {}, {} steps, dry run: {})",
            workflow.name_space, workflow.name, workflow.version, execution_id, total_steps, options.dry_run
        );
        options.emit(ProgressEvent::new(
            ProgressEventKind::WorkflowStarted,
            &execution_id,
            0.0,
            format!("Workflow '{}' started", workflow.name),
        ));

        let mut base = SubstitutionContext::from_process_env();
        base.input = options.inputs.clone();
        for (key, value) in &options.environment {
            base.env.insert(key.clone(), Value::String(value.clone()));
        }
        let (context, missing_inputs) = base.merged_with_defaults(workflow);

        if !options.dry_run {
            let mut errors = self.validate_workflow(workflow).errors;
            errors.extend(missing_inputs);
            if !errors.is_empty() {
                return self.abort(&execution_id, start_time, total_steps, errors, &options);
            }
        }

        let resolution = resolve_execution_order(&workflow.steps);
        if !resolution.valid {
            return self.abort(&execution_id, start_time, total_steps, resolution.errors, &options);
        }

        let mut scope = context
            .with_workflow_identity(workflow)
            .with_instance_id(&execution_id);

        let mut records = Vec::with_capacity(resolution.execution_order.len());
        let mut step_results: HashMap<String, StepResult> = HashMap::new();
        let mut outputs = Map::new();
        let mut errors: Vec<ExecutionError> = Vec::new();
        let mut cancelled = false;

        for step_id in &resolution.execution_order {
            if self.cancelled.load(Ordering::SeqCst) {
                info!("Execution {} cancelled before step '{}'", execution_id, step_id);
                cancelled = true;
                break;
            }

            let Some(step) = workflow.get_step(step_id) else {
                continue;
            };

            let state = self.transition(|s| s.running_step(step_id));
            options.emit(
                ProgressEvent::new(
                    ProgressEventKind::StepStarted,
                    &execution_id,
                    state.progress,
                    format!("Step '{}' started", step_id),
                )
                .for_step(step_id, &step.step_type),
            );

            let ctx = StepContext::new(
                step,
                &execution_id,
                &scope,
                Arc::clone(&self.registry),
                Arc::clone(&self.cancelled),
            )
            .with_step_results(step_results.clone())
            .with_dry_run(options.dry_run);

            let step_start = Utc::now();
            let outcome = self.run_step(step, &ctx).await;
            let step_end = Utc::now();

            let metadata = RecordMetadata {
                start_time: step_start,
                end_time: step_end,
                duration_ms: elapsed_ms(step_start, step_end),
                execution_id: execution_id.clone(),
                dry_run: options.dry_run,
            };

            let (result, failure) = match outcome {
                Ok(result) if result.success => (result, None),
                Ok(result) => {
                    let message = result
                        .error
                        .clone()
                        .unwrap_or_else(|| "step reported failure".to_string());
                    let error = RecordError {
                        message,
                        stack: result.stack_trace.clone(),
                        code: "EXECUTION_FAILED".to_string(),
                    };
                    (result, Some(error))
                }
                Err(e) => {
                    let error = RecordError {
                        message: e.to_string(),
                        stack: None,
                        code: e.code().to_string(),
                    };
                    (StepResult::failure(e.to_string()), Some(error))
                }
            };

            records.push(StepExecutionRecord {
                step_id: step_id.clone(),
                step_type: step.step_type.clone(),
                success: failure.is_none(),
                skipped: result.skipped,
                outputs: result.outputs.clone(),
                metadata,
                error: failure.clone(),
            });

            match failure {
                None => {
                    if !result.outputs.is_empty() {
                        outputs.insert(step_id.clone(), Value::Object(result.outputs.clone()));
                    }
                    scope
                        .outputs
                        .insert(step_id.clone(), Value::Object(result.outputs.clone()));
                    step_results.insert(step_id.clone(), result);

                    let state = self.transition(|s| s.step_completed(step_id));
                    debug!("Step '{}' completed ({:.0}%)", step_id, state.progress);
                    options.emit(
                        ProgressEvent::new(
                            ProgressEventKind::StepCompleted,
                            &execution_id,
                            state.progress,
                            format!("Step '{}' completed", step_id),
                        )
                        .for_step(step_id, &step.step_type),
                    );
                }
                Some(failure) => {
                    error!("Step '{}' failed: {}", step_id, failure.message);
                    step_results.insert(step_id.clone(), result);
                    errors.push(ExecutionError::for_step(step_id, &failure.code, failure.message.clone()));

                    let state = self.transition(|s| s.step_failed(step_id));
                    options.emit(
                        ProgressEvent::new(
                            ProgressEventKind::StepFailed,
                            &execution_id,
                            state.progress,
                            format!("Step '{}' failed: {}", step_id, failure.message),
                        )
                        .for_step(step_id, &step.step_type),
                    );

                    if !options.continue_on_error {
                        break;
                    }
                }
            }
        }

        let success = errors.is_empty() && !cancelled;
        let status = if cancelled {
            ExecutionStatus::Cancelled
        } else if success {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        let state = self.transition(|s| s.finished(status));

        if !cancelled {
            let (kind, message) = if success {
                (ProgressEventKind::WorkflowCompleted, format!("Workflow '{}' completed", workflow.name))
            } else {
                (ProgressEventKind::WorkflowFailed, format!("Workflow '{}' failed", workflow.name))
            };
            options.emit(ProgressEvent::new(kind, &execution_id, state.progress, message));
        }

        let workflow_outputs = resolve_workflow_outputs(workflow, &scope);
        let end_time = Utc::now();
        info!(
            "Execution {} finished: {:?} ({} completed, {} failed)",
            execution_id,
            status,
            state.completed_steps.len(),
            state.failed_steps.len()
        );

        WorkflowExecutionResult {
            success,
            cancelled,
            executed_steps: records,
            outputs,
            workflow_outputs,
            metadata: ExecutionMetadata {
                execution_id,
                start_time,
                end_time,
                duration_ms: elapsed_ms(start_time, end_time),
                total_steps,
                completed_steps: state.completed_steps.len(),
                failed_steps: state.failed_steps.len(),
            },
            error: errors.first().cloned(),
            errors,
        }
    }

    /// Runs one step, or in dry-run mode only checks its configuration.
    async fn run_step(&self, step: &StepDefinition, ctx: &StepContext) -> Result<StepResult, StepError> {
        let instance = self
            .registry
            .create_step(&StepInstanceConfig::from_definition(step))?;

        if ctx.is_dry_run() {
            let validation = instance.validate_config(&ctx.inputs);
            if !validation.valid {
                return Err(StepError::InvalidConfig(validation.errors.join("; ")));
            }
            ctx.logger.info("dry run: configuration valid, step not executed");
            return Ok(StepResult::skipped().with_metadata("dryRun", true));
        }

        instance.execute(ctx).await
    }

    /// Ends a run that failed before any step started.
    fn abort(
        &self,
        execution_id: &str,
        start_time: DateTime<Utc>,
        total_steps: usize,
        diagnostics: Vec<Diagnostic>,
        options: &ExecutionOptions,
    ) -> WorkflowExecutionResult {
        for diagnostic in &diagnostics {
            error!("{}", diagnostic);
        }
        let state = self.transition(|s| s.finished(ExecutionStatus::Failed));
        options.emit(ProgressEvent::new(
            ProgressEventKind::WorkflowFailed,
            execution_id,
            state.progress,
            format!("Workflow validation failed with {} error(s)", diagnostics.len()),
        ));

        let errors = diagnostics.into_iter().map(ExecutionError::from).collect();
        WorkflowExecutionResult::aborted(execution_id, start_time, total_steps, errors)
    }
}

impl Default for WorkflowExecutor {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for WorkflowExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowExecutor")
            .field("registry", &self.registry)
            .field("state", &self.execution_state())
            .finish()
    }
}

/// Resolves declared outputs. `step.<id>.<path>` reads step outputs; other
/// sources are read from the context namespaces. Unresolvable sources are
/// left out.
fn resolve_workflow_outputs(workflow: &WorkflowDefinition, scope: &SubstitutionContext) -> Map<String, Value> {
    let mut resolved = Map::new();
    for (name, output) in &workflow.outputs {
        let value = match output.source.strip_prefix("step.") {
            Some(rest) => scope.resolve_path(&format!("outputs.{}", rest)),
            None => scope.resolve_path(&output.source),
        };
        match value {
            Some(value) => {
                resolved.insert(name.clone(), value.clone());
            }
            None => warn!("Output '{}' could not be resolved from '{}'", name, output.source),
        }
    }
    resolved
}

fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
}
