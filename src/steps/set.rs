//! `set` step: publishes its `values` as outputs.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::execution::registry::StepInstanceConfig;
use crate::execution::step::{ConfigValidation, Step, StepContext, StepError, StepResult};

#[derive(Debug, Default)]
pub struct SetStep;

impl SetStep {
    pub fn create(_config: &StepInstanceConfig) -> Box<dyn Step> {
        Box::new(SetStep)
    }
}

#[async_trait]
impl Step for SetStep {
    fn step_type(&self) -> &str {
        "set"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        let values = match ctx.input("values") {
            Some(Value::Object(values)) => values.clone(),
            _ => return Err(StepError::InvalidConfig("'values' must be an object".to_string())),
        };
        ctx.logger.debug(&format!("setting {} value(s)", values.len()));
        Ok(StepResult::success(values))
    }

    fn validate_config(&self, config: &Map<String, Value>) -> ConfigValidation {
        let mut validation = ConfigValidation::ok();
        if !matches!(config.get("values"), Some(Value::Object(_))) {
            validation.error("'values' must be an object");
        }
        validation
    }
}
