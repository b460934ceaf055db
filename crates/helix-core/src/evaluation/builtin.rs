//! Built-in evaluators.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::evaluation::error::Result;
use crate::evaluation::registry::{EvaluatorPlugin, Scores};
use crate::workflow::context::StepStatus;
use crate::workflow::engine::{WorkflowResult, WorkflowStatus};

/// Scores run duration.
///
/// Emits `duration` (ms) and `speed_score`, which is 1.0 at or under the
/// target and falls off as `target / duration` above it.
#[derive(Debug, Clone)]
pub struct DurationEvaluator {
    target_ms: f64,
}

impl Default for DurationEvaluator {
    fn default() -> Self {
        Self::new(1000.0)
    }
}

impl DurationEvaluator {
    /// Creates an evaluator with a target duration.
    pub fn new(target_ms: f64) -> Self {
        Self { target_ms: target_ms.max(1.0) }
    }
}

#[async_trait]
impl EvaluatorPlugin for DurationEvaluator {
    fn id(&self) -> &str {
        "duration"
    }

    fn name(&self) -> &str {
        "Duration"
    }

    async fn evaluate(&self, result: &WorkflowResult) -> Result<Scores> {
        let duration = result.duration_ms as f64;
        let speed = if duration <= self.target_ms { 1.0 } else { self.target_ms / duration };
        Ok(BTreeMap::from([
            ("duration".to_string(), duration),
            ("speed_score".to_string(), speed),
        ]))
    }
}

/// Scores how many executed steps succeeded.
///
/// `success_rate` is completed / (completed + failed) over recorded steps;
/// `quality_score` halves it when the run itself did not complete.
#[derive(Debug, Clone, Default)]
pub struct SuccessRateEvaluator;

#[async_trait]
impl EvaluatorPlugin for SuccessRateEvaluator {
    fn id(&self) -> &str {
        "success_rate"
    }

    fn name(&self) -> &str {
        "Success rate"
    }

    async fn evaluate(&self, result: &WorkflowResult) -> Result<Scores> {
        let completed_run = result.status == WorkflowStatus::Completed;
        let (ok, failed) = result.node_results.values().fold((0u32, 0u32), |(ok, failed), r| {
            match r.status {
                StepStatus::Completed => (ok + 1, failed),
                StepStatus::Failed => (ok, failed + 1),
                _ => (ok, failed),
            }
        });
        let rate = if ok + failed == 0 {
            if completed_run { 1.0 } else { 0.0 }
        } else {
            f64::from(ok) / f64::from(ok + failed)
        };
        let quality = if completed_run { rate } else { rate * 0.5 };
        Ok(BTreeMap::from([
            ("success_rate".to_string(), rate),
            ("quality_score".to_string(), quality),
        ]))
    }
}

/// Sums `usage.totalTokens` from step outputs into `token_usage`.
#[derive(Debug, Clone, Default)]
pub struct TokenUsageEvaluator;

#[async_trait]
impl EvaluatorPlugin for TokenUsageEvaluator {
    fn id(&self) -> &str {
        "token_usage"
    }

    fn name(&self) -> &str {
        "Token usage"
    }

    async fn evaluate(&self, result: &WorkflowResult) -> Result<Scores> {
        let total: u64 = result
            .node_results
            .values()
            .filter_map(|r| r.output.as_ref())
            .filter_map(|output| output.pointer("/usage/totalTokens").and_then(|v| v.as_u64()))
            .sum();
        Ok(BTreeMap::from([("token_usage".to_string(), total as f64)]))
    }
}
