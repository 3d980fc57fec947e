//! `parallel` step: runs each of its `branches` concurrently.
//!
//! Steps within a branch run in order. With `mode: all` (the default) the
//! first failing branch fails the step and the remaining branches are
//! aborted; with `mode: any` the step succeeds if at least one branch does.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::task::JoinSet;

use super::{is_deferred, run_child_steps};
use crate::execution::registry::StepInstanceConfig;
use crate::execution::step::{ConfigValidation, Step, StepContext, StepError, StepResult};
use crate::workflow::model::Branch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParallelMode {
    #[default]
    All,
    Any,
}

impl ParallelMode {
    pub fn parse(mode: &str) -> Option<Self> {
        match mode {
            "all" => Some(Self::All),
            "any" => Some(Self::Any),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParallelStep {
    branches: Vec<Branch>,
}

impl ParallelStep {
    pub fn create(config: &StepInstanceConfig) -> Box<dyn Step> {
        Box::new(ParallelStep {
            branches: config.branches.clone(),
        })
    }
}

fn branch_name(branch: &Branch, index: usize) -> String {
    branch
        .name
        .clone()
        .unwrap_or_else(|| format!("branch-{}", index))
}

#[async_trait]
impl Step for ParallelStep {
    fn step_type(&self) -> &str {
        "parallel"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        let mode = match ctx.input_str("mode") {
            None => ParallelMode::All,
            Some(mode) => ParallelMode::parse(mode)
                .ok_or_else(|| StepError::InvalidConfig(format!("unknown parallel mode '{}'", mode)))?,
        };
        ctx.logger
            .info(&format!("running {} branch(es), mode {:?}", self.branches.len(), mode));

        let mut tasks = JoinSet::new();
        for (index, branch) in self.branches.iter().enumerate() {
            let branch_ctx = ctx.clone();
            let steps = branch.steps.clone();
            tasks.spawn(async move { (index, run_child_steps(&branch_ctx, &steps).await) });
        }

        let mut outcomes: Vec<Option<Result<Map<String, Value>, StepError>>> =
            (0..self.branches.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) =
                joined.map_err(|e| StepError::ExecutionFailed(format!("branch task failed: {}", e)))?;

            if let Err(e) = &outcome {
                if matches!(e, StepError::Cancelled) {
                    return Err(StepError::Cancelled);
                }
                if mode == ParallelMode::All {
                    return Err(StepError::ExecutionFailed(format!(
                        "branch '{}' failed: {}",
                        branch_name(&self.branches[index], index),
                        e
                    )));
                }
            }
            outcomes[index] = Some(outcome);
        }

        let mut branches = Vec::with_capacity(outcomes.len());
        let mut succeeded = 0;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            let name = branch_name(&self.branches[index], index);
            match outcome {
                Some(Ok(outputs)) => {
                    succeeded += 1;
                    branches.push(json!({ "name": name, "success": true, "outputs": outputs }));
                }
                Some(Err(e)) => {
                    ctx.logger.warn(&format!("branch '{}' failed: {}", name, e));
                    branches.push(json!({ "name": name, "success": false, "error": e.to_string() }));
                }
                None => {}
            }
        }
        let failed = branches.len() - succeeded;

        if mode == ParallelMode::Any && succeeded == 0 && failed > 0 {
            return Ok(StepResult::failure(format!("all {} branch(es) failed", failed))
                .with_output("branches", Value::Array(branches)));
        }

        Ok(StepResult::success(Map::new())
            .with_output("branches", Value::Array(branches))
            .with_output("succeeded", succeeded)
            .with_output("failed", failed))
    }

    fn validate_config(&self, config: &Map<String, Value>) -> ConfigValidation {
        let mut validation = ConfigValidation::ok();
        match config.get("mode") {
            None => {}
            Some(mode) if is_deferred(mode) => {}
            Some(Value::String(mode)) if ParallelMode::parse(mode).is_some() => {}
            Some(other) => validation.error(format!("'mode' must be 'all' or 'any', got {}", other)),
        }
        validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::registry::StepRegistry;
    use crate::workflow::model::StepDefinition;
    use crate::workflow::substitution::SubstitutionContext;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn sleeper(id: &str, ms: u64) -> StepDefinition {
        StepDefinition::new(id, "delay").with_config("ms", ms)
    }

    async fn run(step: &StepDefinition) -> Result<StepResult, StepError> {
        let ctx = StepContext::new(
            step,
            "exec",
            &SubstitutionContext::new(),
            Arc::new(StepRegistry::with_builtins()),
            Arc::new(AtomicBool::new(false)),
        );
        ParallelStep::create(&StepInstanceConfig::from_definition(step))
            .execute(&ctx)
            .await
    }

    #[tokio::test]
    async fn test_branches_run_concurrently() {
        let step = StepDefinition::new("fan", "parallel")
            .with_branch(Some("left"), vec![sleeper("l", 100)])
            .with_branch(Some("right"), vec![sleeper("r", 100)]);

        let started = Instant::now();
        let result = run(&step).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(190));

        assert!(result.success);
        assert_eq!(result.outputs["succeeded"], json!(2));
        assert_eq!(result.outputs["branches"][0]["name"], json!("left"));
        assert_eq!(result.outputs["branches"][1]["outputs"]["r"]["delayedMs"], json!(100));
    }

    #[tokio::test]
    async fn test_mode_all_fails_on_branch_failure() {
        let step = StepDefinition::new("fan", "parallel")
            .with_branch(None, vec![sleeper("ok", 1)])
            .with_branch(None, vec![StepDefinition::new("bad", "nope")]);

        let err = run(&step).await.unwrap_err();
        assert!(err.to_string().contains("branch-1"));
    }

    #[tokio::test]
    async fn test_mode_any() {
        let step = StepDefinition::new("fan", "parallel")
            .with_config("mode", "any")
            .with_branch(None, vec![sleeper("ok", 1)])
            .with_branch(None, vec![StepDefinition::new("bad", "nope")]);

        let result = run(&step).await.unwrap();
        assert!(result.success);
        assert_eq!(result.outputs["succeeded"], json!(1));
        assert_eq!(result.outputs["failed"], json!(1));
        assert_eq!(result.outputs["branches"][1]["success"], json!(false));

        let all_bad = StepDefinition::new("fan", "parallel")
            .with_config("mode", "any")
            .with_branch(None, vec![StepDefinition::new("bad", "nope")]);
        assert!(!run(&all_bad).await.unwrap().success);
    }

    #[test]
    fn test_validate_config() {
        let step = ParallelStep::default();
        let mut config = Map::new();
        assert!(step.validate_config(&config).valid);
        config.insert("mode".into(), json!("any"));
        assert!(step.validate_config(&config).valid);
        config.insert("mode".into(), json!("race"));
        assert!(!step.validate_config(&config).valid);
    }
}
