//! Workflow definitions: the step graph submitted to the engine.

use std::collections::HashSet;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::WorkflowError;

/// Step type whose children run concurrently.
pub const PARALLEL_STEP_TYPE: &str = "parallel";
/// Step type whose children run in order, like the top-level list.
pub const SEQUENTIAL_STEP_TYPE: &str = "sequential";

/// A workflow submitted for execution.
///
/// Definitions are never mutated by the engine; variants are produced by
/// building new definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Workflow identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered top-level steps.
    pub steps: Vec<WorkflowStep>,
    /// Scoring configuration applied after each run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization: Option<OptimizationSettings>,
}

/// Per-workflow optimization settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationSettings {
    /// Whether completed runs are scored by the registered evaluators.
    #[serde(default)]
    pub enabled: bool,
    /// Objective names of interest (e.g. `minimize_duration`).
    #[serde(default)]
    pub objectives: Vec<String>,
}

/// One node of the step graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    /// Identifier, unique within the containing step list.
    pub id: String,
    /// Step type, resolved against the executor registry.
    #[serde(rename = "type")]
    pub step_type: String,
    /// Executor-specific configuration.
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Child steps for group types.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<WorkflowStep>,
    /// Run only when this expression is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Skip when this expression is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if: Option<String>,
    /// Step to jump to after success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    /// Step to jump to after exhausted retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<String>,
    /// Retry behaviour.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// Per-attempt deadline in milliseconds.
    #[serde(default, rename = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// A failing optional child does not fail its parallel group.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

impl WorkflowStep {
    /// Creates a step with no control fields.
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_type: step_type.into(),
            config: Map::new(),
            steps: Vec::new(),
            condition: None,
            skip_if: None,
            on_success: None,
            on_error: None,
            retry_policy: None,
            timeout_ms: None,
            optional: false,
        }
    }

    /// Creates a group step running `children` concurrently.
    pub fn parallel(id: impl Into<String>, children: Vec<WorkflowStep>) -> Self {
        Self { steps: children, ..Self::new(id, PARALLEL_STEP_TYPE) }
    }

    /// Creates a group step running `children` in order.
    pub fn sequential(id: impl Into<String>, children: Vec<WorkflowStep>) -> Self {
        Self { steps: children, ..Self::new(id, SEQUENTIAL_STEP_TYPE) }
    }

    /// Sets a config entry.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Sets the `condition` expression.
    #[must_use]
    pub fn with_condition(mut self, expression: impl Into<String>) -> Self {
        self.condition = Some(expression.into());
        self
    }

    /// Sets the `skipIf` expression.
    #[must_use]
    pub fn with_skip_if(mut self, expression: impl Into<String>) -> Self {
        self.skip_if = Some(expression.into());
        self
    }

    /// Sets the success jump target.
    #[must_use]
    pub fn with_on_success(mut self, target: impl Into<String>) -> Self {
        self.on_success = Some(target.into());
        self
    }

    /// Sets the error jump target.
    #[must_use]
    pub fn with_on_error(mut self, target: impl Into<String>) -> Self {
        self.on_error = Some(target.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Marks the step optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Whether this step is a group interpreted by the engine.
    pub fn is_group(&self) -> bool {
        self.step_type == PARALLEL_STEP_TYPE || self.step_type == SEQUENTIAL_STEP_TYPE
    }

    /// Whether this step is a concurrent group.
    pub fn is_parallel(&self) -> bool {
        self.step_type == PARALLEL_STEP_TYPE
    }

    /// Deserializes `config` into an executor's typed view.
    pub fn typed_config<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.config.clone()))
    }

    /// Effective retry policy (a single attempt when none is set).
    pub fn effective_retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone().unwrap_or_default()
    }
}

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `backoff_ms * attempt`.
    #[default]
    Linear,
    /// `backoff_ms` every time.
    Fixed,
    /// `backoff_ms * 2^(attempt - 1)`.
    Exponential,
}

/// Retry policy for a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    #[serde(default)]
    pub backoff_ms: u64,
    /// Growth of the delay.
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 1, backoff_ms: 0, backoff: BackoffStrategy::Linear }
    }
}

impl RetryPolicy {
    /// Create a linear-backoff retry policy.
    pub fn new(max_attempts: u32, backoff_ms: u64) -> Self {
        Self { max_attempts, backoff_ms, backoff: BackoffStrategy::Linear }
    }

    /// Use a different backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let attempt = u64::from(attempt.max(1));
        let ms = match self.backoff {
            BackoffStrategy::Linear => self.backoff_ms.saturating_mul(attempt),
            BackoffStrategy::Fixed => self.backoff_ms,
            BackoffStrategy::Exponential => {
                let factor = 1u64.checked_shl((attempt - 1) as u32).unwrap_or(u64::MAX);
                self.backoff_ms.saturating_mul(factor)
            }
        };
        Duration::from_millis(ms)
    }
}

impl WorkflowDefinition {
    /// Creates a definition without optimization settings.
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self { id: id.into(), name: name.into(), description: None, steps, optimization: None }
    }

    /// Enables run scoring with the given objective names.
    #[must_use]
    pub fn with_optimization(mut self, objectives: Vec<String>) -> Self {
        self.optimization = Some(OptimizationSettings { enabled: true, objectives });
        self
    }

    /// Whether completed runs should be scored.
    pub fn optimization_enabled(&self) -> bool {
        self.optimization.as_ref().is_some_and(|o| o.enabled)
    }

    /// Total number of steps, counting nested children.
    pub fn step_count(&self) -> usize {
        fn count(steps: &[WorkflowStep]) -> usize {
            steps.iter().map(|s| 1 + count(&s.steps)).sum()
        }
        count(&self.steps)
    }

    /// Visits every step depth-first, parents before children.
    pub fn visit_steps<'a>(&'a self, visitor: &mut impl FnMut(&'a WorkflowStep)) {
        fn walk<'a>(steps: &'a [WorkflowStep], visitor: &mut impl FnMut(&'a WorkflowStep)) {
            for step in steps {
                visitor(step);
                walk(&step.steps, visitor);
            }
        }
        walk(&self.steps, visitor);
    }

    /// Validates ids, jump targets and retry policies.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.id.trim().is_empty() {
            return Err(WorkflowError::Validation("workflow id cannot be empty".to_string()));
        }
        validate_steps(&self.steps, &mut HashSet::new())
    }
}

/// Step ids must be unique across the whole definition since results are
/// keyed by id; jump targets must be siblings.
fn validate_steps<'a>(
    steps: &'a [WorkflowStep],
    seen: &mut HashSet<&'a str>,
) -> Result<(), WorkflowError> {
    let mut ids = HashSet::new();
    for step in steps {
        if step.id.trim().is_empty() {
            return Err(WorkflowError::Validation("step id cannot be empty".to_string()));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(WorkflowError::Validation(format!("duplicate step id: {}", step.id)));
        }
        ids.insert(step.id.as_str());
    }

    for step in steps {
        for target in [&step.on_success, &step.on_error].into_iter().flatten() {
            if target == &step.id {
                return Err(WorkflowError::Validation(format!(
                    "step {} cannot jump to itself",
                    step.id
                )));
            }
            if !ids.contains(target.as_str()) {
                return Err(WorkflowError::Validation(format!(
                    "step {} jumps to unknown step {}",
                    step.id, target
                )));
            }
        }
        if let Some(policy) = &step.retry_policy {
            if policy.max_attempts == 0 {
                return Err(WorkflowError::Validation(format!(
                    "step {} has retryPolicy.maxAttempts = 0",
                    step.id
                )));
            }
        }
        if step.is_group() {
            if step.steps.is_empty() {
                return Err(WorkflowError::Validation(format!(
                    "group step {} has no children",
                    step.id
                )));
            }
            validate_steps(&step.steps, seen)?;
        }
    }

    Ok(())
}
