//! Hook helpers used by the workflow engine and step executors.
//!
//! Every helper builds the [`HookContext`] for one lifecycle point and hands
//! it to the registry. Results are returned for inspection only; nothing here
//! can abort the workflow or step being instrumented.

use serde_json::{Value, json};

use crate::hooks::registry::HookRegistry;
use crate::hooks::types::{HookContext, HookEvent, HookResult};
use crate::workflow::context::{ExecutionContext, StepResult};
use crate::workflow::definition::{WorkflowDefinition, WorkflowStep};

/// Helper for executing hooks around workflow operations.
#[derive(Debug, Clone, Default)]
pub struct WorkflowHooks {
    /// Hook registry.
    pub registry: HookRegistry,
}

impl WorkflowHooks {
    /// Create a new workflow hooks helper.
    pub fn new(registry: HookRegistry) -> Self {
        Self { registry }
    }

    async fn dispatch(&self, event: HookEvent, input: Value, metadata: Value) -> Vec<HookResult> {
        let context = HookContext::with_metadata(event, input, metadata);
        self.registry.execute_hooks(event, &context).await
    }

    /// Execute `workflow:before` hooks.
    pub async fn execute_before_workflow_hooks(
        &self,
        definition: &WorkflowDefinition,
        context: &ExecutionContext,
    ) -> Vec<HookResult> {
        let input = json!({
            "workflowId": definition.id,
            "name": definition.name,
            "stepCount": definition.step_count(),
            "variables": context.variables,
        });
        self.dispatch(HookEvent::BeforeWorkflow, input, run_metadata(context)).await
    }

    /// Execute `workflow:after` hooks with the final status.
    pub async fn execute_after_workflow_hooks(
        &self,
        definition: &WorkflowDefinition,
        context: &ExecutionContext,
        status: &str,
        duration_ms: u64,
    ) -> Vec<HookResult> {
        let input = json!({
            "workflowId": definition.id,
            "status": status,
            "durationMs": duration_ms,
            "completedSteps": context.node_results().len(),
        });
        self.dispatch(HookEvent::AfterWorkflow, input, run_metadata(context)).await
    }

    /// Execute `workflow:error` hooks.
    pub async fn execute_workflow_error_hooks(
        &self,
        definition: &WorkflowDefinition,
        context: &ExecutionContext,
        error: &str,
    ) -> Vec<HookResult> {
        let input = json!({ "workflowId": definition.id, "error": error });
        self.dispatch(HookEvent::WorkflowError, input, run_metadata(context)).await
    }

    /// Execute `workflow:step:before` hooks.
    pub async fn execute_before_step_hooks(
        &self,
        step: &WorkflowStep,
        context: &ExecutionContext,
    ) -> Vec<HookResult> {
        let input = json!({
            "stepId": step.id,
            "type": step.step_type,
            "config": step.config,
        });
        self.dispatch(HookEvent::BeforeStep, input, run_metadata(context)).await
    }

    /// Execute `workflow:step:after` hooks.
    ///
    /// Fires for failed steps too, so observers see every settled step.
    pub async fn execute_after_step_hooks(
        &self,
        step: &WorkflowStep,
        result: &StepResult,
        context: &ExecutionContext,
    ) -> Vec<HookResult> {
        let input = json!({
            "stepId": step.id,
            "type": step.step_type,
            "result": result,
        });
        self.dispatch(HookEvent::AfterStep, input, run_metadata(context)).await
    }

    /// Execute `workflow:step:error` hooks for a failed attempt.
    pub async fn execute_step_error_hooks(
        &self,
        step: &WorkflowStep,
        error: &str,
        attempt: u32,
        context: &ExecutionContext,
    ) -> Vec<HookResult> {
        let input = json!({
            "stepId": step.id,
            "type": step.step_type,
            "error": error,
            "attempt": attempt,
        });
        self.dispatch(HookEvent::StepError, input, run_metadata(context)).await
    }

    /// Execute `agent:before` hooks ahead of a sampling call.
    pub async fn execute_before_agent_hooks(
        &self,
        step_id: &str,
        prompt: &str,
        model: Option<&str>,
        context: &ExecutionContext,
    ) -> Vec<HookResult> {
        let input = json!({ "stepId": step_id, "prompt": prompt, "model": model });
        self.dispatch(HookEvent::BeforeAgent, input, run_metadata(context)).await
    }

    /// Execute `agent:after` hooks once the sampling call returned.
    pub async fn execute_after_agent_hooks(
        &self,
        step_id: &str,
        output: &Value,
        context: &ExecutionContext,
    ) -> Vec<HookResult> {
        let input = json!({ "stepId": step_id, "output": output });
        self.dispatch(HookEvent::AfterAgent, input, run_metadata(context)).await
    }

    /// Execute `agent:error` hooks when the sampling call failed.
    pub async fn execute_agent_error_hooks(
        &self,
        step_id: &str,
        error: &str,
        context: &ExecutionContext,
    ) -> Vec<HookResult> {
        let input = json!({ "stepId": step_id, "error": error });
        self.dispatch(HookEvent::AgentError, input, run_metadata(context)).await
    }
}

fn run_metadata(context: &ExecutionContext) -> Value {
    json!({
        "workflowId": context.workflow_id,
        "executionId": context.execution_id,
    })
}
