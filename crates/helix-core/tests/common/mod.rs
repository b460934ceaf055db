//! Shared test doubles.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use helix_core::workflow::{ExecutionContext, StepError, StepExecutor, StepOutput, WorkflowStep};
use serde_json::Value;

/// Executor for `scripted` steps, driven by step config:
///
/// - `failTimes`: fail the first N attempts of this step
/// - `alwaysFail`: fail every attempt
/// - `sleepMs`: delay before answering
/// - `value`: output value
#[derive(Default)]
pub struct ScriptedExecutor {
    attempts: Mutex<HashMap<String, u32>>,
    order: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts made for a step.
    pub fn attempts(&self, step_id: &str) -> u32 {
        self.attempts.lock().unwrap().get(step_id).copied().unwrap_or(0)
    }

    /// Step ids in the order their first attempt started.
    pub fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    fn step_type(&self) -> &str {
        "scripted"
    }

    async fn execute(
        &self,
        step: &WorkflowStep,
        _context: &ExecutionContext,
    ) -> Result<StepOutput, StepError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(step.id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if attempt == 1 {
            self.order.lock().unwrap().push(step.id.clone());
        }

        if let Some(ms) = step.config.get("sleepMs").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        let fail_times = step.config.get("failTimes").and_then(Value::as_u64).unwrap_or(0);
        let always_fail = step.config.get("alwaysFail").and_then(Value::as_bool).unwrap_or(false);
        if always_fail || u64::from(attempt) <= fail_times {
            return Err(StepError::Execution(format!("{} attempt {attempt} failed", step.id)));
        }

        Ok(StepOutput::new(step.config.get("value").cloned().unwrap_or(Value::Null)))
    }
}

/// A `scripted` step.
pub fn step(id: &str) -> WorkflowStep {
    WorkflowStep::new(id, "scripted")
}
