//! `log` step: writes a message through the step logger.

use async_trait::async_trait;
use log::Level;
use serde_json::{Map, Value};

use super::is_deferred;
use crate::execution::registry::StepInstanceConfig;
use crate::execution::step::{ConfigValidation, Step, StepContext, StepError, StepResult};
use crate::workflow::substitution::value_text;

const LEVELS: &[&str] = &["debug", "info", "warn", "error"];

#[derive(Debug, Default)]
pub struct LogStep;

impl LogStep {
    pub fn create(_config: &StepInstanceConfig) -> Box<dyn Step> {
        Box::new(LogStep)
    }
}

fn parse_level(level: &str) -> Option<Level> {
    match level {
        "debug" => Some(Level::Debug),
        "info" => Some(Level::Info),
        "warn" => Some(Level::Warn),
        "error" => Some(Level::Error),
        _ => None,
    }
}

#[async_trait]
impl Step for LogStep {
    fn step_type(&self) -> &str {
        "log"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        let message = match ctx.input("message") {
            Some(Value::String(text)) => text.clone(),
            Some(other) if !other.is_null() => serde_json::to_string(other)?,
            _ => format!("step '{}' reached", ctx.step_id),
        };
        let level_name = ctx.input("level").map(value_text).unwrap_or_else(|| "info".to_string());
        let level = parse_level(&level_name)
            .ok_or_else(|| StepError::InvalidConfig(format!("unknown log level '{}'", level_name)))?;

        ctx.logger.log(level, &message);

        Ok(StepResult::success(Map::new())
            .with_output("message", message)
            .with_output("level", level_name))
    }

    fn validate_config(&self, config: &Map<String, Value>) -> ConfigValidation {
        let mut validation = ConfigValidation::ok();
        match config.get("level") {
            None => {}
            Some(level) if is_deferred(level) => {}
            Some(Value::String(level)) if LEVELS.contains(&level.as_str()) => {}
            Some(other) => validation.error(format!(
                "'level' must be one of {}, got {}",
                LEVELS.join(", "),
                other
            )),
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
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    async fn run(step: &StepDefinition) -> Result<StepResult, StepError> {
        let ctx = StepContext::new(
            step,
            "exec",
            &SubstitutionContext::new().with_variable("who", "world"),
            Arc::new(StepRegistry::new()),
            Arc::new(AtomicBool::new(false)),
        );
        LogStep.execute(&ctx).await
    }

    #[tokio::test]
    async fn test_logs_substituted_message() {
        let step = StepDefinition::new("hello", "log")
            .with_config("message", "hello ${variables.who}")
            .with_config("level", "warn");
        let result = run(&step).await.unwrap();
        assert!(result.success);
        assert_eq!(result.outputs["message"], json!("hello world"));
        assert_eq!(result.outputs["level"], json!("warn"));
    }

    #[tokio::test]
    async fn test_structured_and_default_message() {
        let structured = StepDefinition::new("dump", "log").with_config("message", json!({ "n": 1 }));
        assert_eq!(run(&structured).await.unwrap().outputs["message"], json!("{\"n\":1}"));

        let bare = StepDefinition::new("bare", "log");
        let result = run(&bare).await.unwrap();
        assert_eq!(result.outputs["message"], json!("step 'bare' reached"));
        assert_eq!(result.outputs["level"], json!("info"));
    }

    #[tokio::test]
    async fn test_unknown_level_fails() {
        let step = StepDefinition::new("loud", "log").with_config("level", "shout");
        assert!(matches!(run(&step).await, Err(StepError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_config() {
        let mut config = Map::new();
        assert!(LogStep.validate_config(&config).valid);
        config.insert("level".into(), json!("${input.level}"));
        assert!(LogStep.validate_config(&config).valid);
        config.insert("level".into(), json!("loud"));
        assert!(!LogStep.validate_config(&config).valid);
    }
}
