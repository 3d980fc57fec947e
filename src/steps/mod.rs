//! Built-in Step Types
//!
//! Step implementations registered by [`StepRegistry::with_builtins`]:
//!
//! | Type | Config | Outputs |
//! |------|--------|---------|
//! | `log` | `message`, `level` | `message`, `level` |
//! | `delay` | `ms` | `delayedMs` |
//! | `set` | `values` | the values |
//! | `conditional` | `condition` + `thenSteps`/`elseSteps` | `condition`, `branch`, `steps` |
//! | `parallel` | `mode` (`all`/`any`) + `branches` | `branches`, `succeeded`, `failed` |

pub mod condition;
pub mod conditional;
pub mod delay;
pub mod log;
pub mod parallel;
pub mod set;

use std::collections::HashMap;

use ::log::warn;
use serde_json::{Map, Value};

use crate::execution::registry::{RegisterOptions, StepInstanceConfig, StepRegistry};
use crate::execution::step::{Step, StepContext, StepError, StepResult};
use crate::workflow::model::StepDefinition;
use crate::workflow::substitution::contains_expression;

pub use condition::{evaluate_condition, ConditionError};
pub use conditional::ConditionalStep;
pub use delay::DelayStep;
pub use self::log::LogStep;
pub use parallel::{ParallelMode, ParallelStep};
pub use set::SetStep;

/// Version recorded for built-in registrations.
pub const BUILTIN_VERSION: &str = env!("CARGO_PKG_VERSION");

type Constructor = fn(&StepInstanceConfig) -> Box<dyn Step>;

/// Registers every built-in step type, replacing existing registrations.
pub fn register_builtins(registry: &StepRegistry) {
    let builtins: [(&str, Constructor); 5] = [
        ("log", LogStep::create),
        ("delay", DelayStep::create),
        ("set", SetStep::create),
        ("conditional", ConditionalStep::create),
        ("parallel", ParallelStep::create),
    ];

    for (step_type, constructor) in builtins {
        if let Err(e) = registry.register(step_type, BUILTIN_VERSION, constructor, RegisterOptions::force()) {
            warn!("Failed to register built-in step '{}': {}", step_type, e);
        }
    }
}

/// True for a string that will only be known after substitution.
pub(crate) fn is_deferred(value: &Value) -> bool {
    value.as_str().map(contains_expression).unwrap_or(false)
}

/// Runs nested steps one after another in `ctx`'s scope.
///
/// Each child sees the outputs of the children before it under
/// `outputs.<id>`. Returns the outputs of every child keyed by id; the
/// first child that fails aborts the rest.
pub(crate) async fn run_child_steps(
    ctx: &StepContext,
    steps: &[StepDefinition],
) -> Result<Map<String, Value>, StepError> {
    let mut outputs = Map::new();
    let mut results: HashMap<String, StepResult> = HashMap::new();

    for child in steps {
        if ctx.is_cancelled() {
            return Err(StepError::Cancelled);
        }

        let child_ctx = ctx.child_context(child, &outputs, &results);
        let step = ctx
            .registry()
            .create_step(&StepInstanceConfig::from_definition(child))?;
        let result = step.execute(&child_ctx).await?;

        if !result.success {
            let reason = result.error.as_deref().unwrap_or("step reported failure");
            return Err(StepError::ExecutionFailed(format!(
                "nested step '{}' failed: {}",
                child.id, reason
            )));
        }

        outputs.insert(child.id.clone(), Value::Object(result.outputs.clone()));
        results.insert(child.id.clone(), result);
    }

    Ok(outputs)
}
