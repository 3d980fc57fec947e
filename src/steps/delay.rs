//! `delay` step: waits for `ms` milliseconds.
//!
//! The wait honours the step timeout and stops early when the run is
//! cancelled.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::time::{sleep, timeout, Instant};

use super::is_deferred;
use crate::execution::registry::StepInstanceConfig;
use crate::execution::step::{ConfigValidation, Step, StepContext, StepError, StepResult};

/// Longest single sleep between cancellation checks.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
pub struct DelayStep;

impl DelayStep {
    pub fn create(_config: &StepInstanceConfig) -> Box<dyn Step> {
        Box::new(DelayStep)
    }
}

/// Reads a millisecond count from a number or numeric string.
fn millis(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

async fn wait(ctx: &StepContext, duration: Duration) -> Result<(), StepError> {
    let deadline = Instant::now() + duration;
    loop {
        if ctx.is_cancelled() {
            return Err(StepError::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        sleep((deadline - now).min(CANCEL_CHECK_INTERVAL)).await;
    }
}

#[async_trait]
impl Step for DelayStep {
    fn step_type(&self) -> &str {
        "delay"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        let ms = ctx
            .input("ms")
            .and_then(millis)
            .ok_or_else(|| StepError::InvalidConfig("'ms' must be a non-negative integer".to_string()))?;
        let duration = Duration::from_millis(ms);

        ctx.logger.debug(&format!("waiting {} ms", ms));
        match ctx.timeout() {
            Some(limit) => timeout(limit, wait(ctx, duration))
                .await
                .map_err(|_| StepError::Timeout(limit))??,
            None => wait(ctx, duration).await?,
        }

        Ok(StepResult::success(Map::new()).with_output("delayedMs", ms))
    }

    fn validate_config(&self, config: &Map<String, Value>) -> ConfigValidation {
        let mut validation = ConfigValidation::ok();
        match config.get("ms") {
            None => validation.error("missing required 'ms'"),
            Some(ms) if is_deferred(ms) || millis(ms).is_some() => {}
            Some(other) => validation.error(format!("'ms' must be a non-negative integer, got {}", other)),
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
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn context(step: &StepDefinition, cancelled: Arc<AtomicBool>) -> StepContext {
        StepContext::new(
            step,
            "exec",
            &SubstitutionContext::new().with_input("wait", 5),
            Arc::new(StepRegistry::new()),
            cancelled,
        )
    }

    #[tokio::test]
    async fn test_waits() {
        let step = StepDefinition::new("pause", "delay").with_config("ms", "${input.wait}");
        let ctx = context(&step, Arc::new(AtomicBool::new(false)));

        let started = std::time::Instant::now();
        let result = DelayStep.execute(&ctx).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(5));
        assert_eq!(result.outputs["delayedMs"], json!(5));
    }

    #[tokio::test]
    async fn test_timeout() {
        let step = StepDefinition::new("pause", "delay")
            .with_config("ms", 5_000)
            .with_timeout(20);
        let ctx = context(&step, Arc::new(AtomicBool::new(false)));

        let err = DelayStep.execute(&ctx).await.unwrap_err();
        assert_eq!(err.code(), "STEP_TIMEOUT");
    }

    #[tokio::test]
    async fn test_cancelled() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let step = StepDefinition::new("pause", "delay").with_config("ms", 5_000);
        let ctx = context(&step, Arc::clone(&cancelled));
        cancelled.store(true, Ordering::SeqCst);

        assert!(matches!(DelayStep.execute(&ctx).await, Err(StepError::Cancelled)));
    }

    #[test]
    fn test_validate_config() {
        let mut config = Map::new();
        assert!(!DelayStep.validate_config(&config).valid);
        config.insert("ms".into(), json!(100));
        assert!(DelayStep.validate_config(&config).valid);
        config.insert("ms".into(), json!("${input.wait}"));
        assert!(DelayStep.validate_config(&config).valid);
        config.insert("ms".into(), json!(-1));
        assert!(!DelayStep.validate_config(&config).valid);
    }
}
