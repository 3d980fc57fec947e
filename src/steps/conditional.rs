//! `conditional` step: runs `thenSteps` or `elseSteps` depending on a
//! condition.
//!
//! The condition is read from the step definition as written and
//! evaluated against the step scope; see [`super::condition`].

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::condition::{condition_scope, evaluate_condition, parse_condition};
use super::run_child_steps;
use crate::execution::registry::StepInstanceConfig;
use crate::execution::step::{ConfigValidation, Step, StepContext, StepError, StepResult};
use crate::workflow::model::StepDefinition;

#[derive(Debug, Clone, Default)]
pub struct ConditionalStep {
    condition: Option<Value>,
    then_steps: Vec<StepDefinition>,
    else_steps: Vec<StepDefinition>,
}

impl ConditionalStep {
    pub fn create(config: &StepInstanceConfig) -> Box<dyn Step> {
        Box::new(ConditionalStep {
            condition: config.config.get("condition").cloned(),
            then_steps: config.then_steps.clone(),
            else_steps: config.else_steps.clone(),
        })
    }
}

#[async_trait]
impl Step for ConditionalStep {
    fn step_type(&self) -> &str {
        "conditional"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        let condition = self
            .condition
            .as_ref()
            .ok_or_else(|| StepError::InvalidConfig("missing required 'condition'".to_string()))?;
        let outcome = evaluate_condition(condition, &condition_scope(ctx.scope()))
            .map_err(|e| StepError::InvalidConfig(format!("invalid condition {}: {}", condition, e)))?;

        let (branch, steps) = if outcome {
            ("then", &self.then_steps)
        } else {
            ("else", &self.else_steps)
        };
        ctx.logger
            .info(&format!("condition is {}, running {} {} step(s)", outcome, steps.len(), branch));

        let outputs = run_child_steps(ctx, steps).await?;

        Ok(StepResult::success(Map::new())
            .with_output("condition", outcome)
            .with_output("branch", branch)
            .with_output("steps", Value::Object(outputs)))
    }

    fn validate_config(&self, config: &Map<String, Value>) -> ConfigValidation {
        let mut validation = ConfigValidation::ok();
        match config.get("condition") {
            None => validation.error("missing required 'condition'"),
            Some(Value::Bool(_)) => {}
            Some(Value::String(condition)) => {
                if let Err(e) = parse_condition(condition) {
                    validation.error(format!("invalid condition '{}': {}", condition, e));
                }
            }
            Some(other) => validation.error(format!("'condition' must be a string or boolean, got {}", other)),
        }
        validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::registry::StepRegistry;
    use crate::workflow::substitution::SubstitutionContext;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn definition(condition: &str) -> StepDefinition {
        StepDefinition::new("check", "conditional")
            .with_config("condition", condition)
            .with_then_steps(vec![
                StepDefinition::new("first", "set").with_config("values", json!({ "n": 2 })),
                StepDefinition::new("second", "log").with_config("message", "n=${outputs.first.n}"),
            ])
            .with_else_steps(vec![StepDefinition::new("other", "log").with_config("message", "else")])
    }

    async fn run(step: &StepDefinition) -> Result<StepResult, StepError> {
        run_with(step, SubstitutionContext::new().with_input("size", 10)).await
    }

    async fn run_with(step: &StepDefinition, scope: SubstitutionContext) -> Result<StepResult, StepError> {
        let ctx = StepContext::new(
            step,
            "exec",
            &scope,
            Arc::new(StepRegistry::with_builtins()),
            Arc::new(AtomicBool::new(false)),
        );
        ConditionalStep::create(&StepInstanceConfig::from_definition(step))
            .execute(&ctx)
            .await
    }

    #[tokio::test]
    async fn test_then_branch() {
        let result = run(&definition("input.size > 5")).await.unwrap();
        assert_eq!(result.outputs["condition"], json!(true));
        assert_eq!(result.outputs["branch"], json!("then"));
        assert_eq!(result.outputs["steps"]["second"]["message"], json!("n=2"));
        assert!(result.outputs["steps"].get("other").is_none());
    }

    #[tokio::test]
    async fn test_else_branch() {
        let result = run(&definition("input.size > 50")).await.unwrap();
        assert_eq!(result.outputs["branch"], json!("else"));
        assert_eq!(result.outputs["steps"]["other"]["message"], json!("else"));
    }

    #[tokio::test]
    async fn test_nested_failure_propagates() {
        let step = StepDefinition::new("check", "conditional")
            .with_config("condition", "true")
            .with_then_steps(vec![StepDefinition::new("ghost", "missing")]);
        let err = run(&step).await.unwrap_err();
        assert_eq!(err.code(), "STEP_TYPE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_bad_condition() {
        let err = run(&definition("1 >")).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_STEP_CONFIG");

        let err = run(&definition("${input.size} > 5")).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_STEP_CONFIG");
    }

    #[tokio::test]
    async fn test_input_value_cannot_rewrite_condition() {
        let step = StepDefinition::new("gate", "conditional")
            .with_config("condition", "input.env == 'production'")
            .with_then_steps(vec![StepDefinition::new("deploy", "log").with_config("message", "deploying")])
            .with_else_steps(vec![StepDefinition::new("skip", "log").with_config("message", "skipped")]);

        let scope = SubstitutionContext::new().with_input("env", "staging || true");
        let result = run_with(&step, scope).await.unwrap();
        assert_eq!(result.outputs["condition"], json!(false));
        assert_eq!(result.outputs["branch"], json!("else"));
        assert!(result.outputs["steps"].get("deploy").is_none());
    }

    #[tokio::test]
    async fn test_condition_sees_prior_outputs() {
        let step = definition("outputs.compute.total > 5");
        let scope = SubstitutionContext::new().with_step_outputs("compute", json!({ "total": 8 }));
        let result = run_with(&step, scope).await.unwrap();
        assert_eq!(result.outputs["branch"], json!("then"));
    }

    #[test]
    fn test_validate_config() {
        let step = ConditionalStep::default();
        let mut config = Map::new();
        assert!(!step.validate_config(&config).valid);
        config.insert("condition".into(), json!("input.flag"));
        assert!(step.validate_config(&config).valid);
        config.insert("condition".into(), json!("${input.flag}"));
        assert!(!step.validate_config(&config).valid);
        config.insert("condition".into(), json!("a == 'b'"));
        assert!(step.validate_config(&config).valid);
        config.insert("condition".into(), json!("(a"));
        assert!(!step.validate_config(&config).valid);
        config.insert("condition".into(), json!(false));
        assert!(step.validate_config(&config).valid);
    }
}
