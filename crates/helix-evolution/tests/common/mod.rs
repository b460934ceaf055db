//! Deterministic runner shared by the optimizer tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use helix_core::workflow::{
    StepResult, WorkflowDefinition, WorkflowResult, WorkflowStatus, WorkflowStep,
};
use helix_evolution::WorkflowRunner;
use serde_json::{Value, json};

/// Simulates a run without executing anything.
///
/// Duration is the sum of leaf `costMs` values (default 100), with parallel
/// groups costing their slowest child. A leaf whose `temperature` is above
/// 1.2 fails.
#[derive(Debug, Default)]
pub struct CostRunner {
    runs: AtomicUsize,
}

impl CostRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

fn cost(steps: &[WorkflowStep], parallel: bool) -> u64 {
    let costs = steps.iter().map(|step| {
        if step.is_group() {
            cost(&step.steps, step.is_parallel())
        } else {
            step.config.get("costMs").and_then(Value::as_u64).unwrap_or(100)
        }
    });
    if parallel { costs.max().unwrap_or(0) } else { costs.sum() }
}

#[async_trait]
impl WorkflowRunner for CostRunner {
    async fn run(&self, definition: &WorkflowDefinition) -> WorkflowResult {
        let n = self.runs.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let mut result =
            WorkflowResult::empty(&definition.id, format!("run-{n}"), WorkflowStatus::Completed);
        definition.visit_steps(&mut |step| {
            if step.is_group() {
                return;
            }
            let temperature = step.config.get("temperature").and_then(Value::as_f64).unwrap_or(0.0);
            let step_result = if temperature > 1.2 {
                StepResult::failure(&step.id, "too creative", 1, now, now)
            } else {
                StepResult::success(&step.id, json!(null), 1, now, now)
            };
            result.node_results.insert(step.id.clone(), step_result);
        });
        if let Some(failed) = result.node_results.values().find(|r| !r.is_success()) {
            result.error = Some(format!("Step {} failed", failed.step_id));
            result.status = WorkflowStatus::Failed;
        }
        result.duration_ms = cost(&definition.steps, false);
        result
    }
}

/// Three agent steps costing 1400ms in total.
pub fn base_workflow() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "triage",
        "Ticket triage",
        vec![
            WorkflowStep::new("draft", "agent")
                .with_config("prompt", json!("Summarize the ticket."))
                .with_config("temperature", json!(0.7))
                .with_config("costMs", json!(600)),
            WorkflowStep::new("review", "agent")
                .with_config("prompt", json!("Review the summary."))
                .with_config("costMs", json!(500)),
            WorkflowStep::new("label", "agent")
                .with_config("prompt", json!("Pick a label."))
                .with_config("costMs", json!(300)),
        ],
    )
}
