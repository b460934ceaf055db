//! Workflow execution engine.
//!
//! Walks a [`WorkflowDefinition`] step by step, applying guards, retries,
//! timeouts and jumps, firing hooks around every boundary and emitting
//! telemetry for every transition. Runs never return `Err`: failures are
//! reported through [`WorkflowResult::status`].

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::context::{ExecutionContext, StepResult, StepStatus};
use super::control_flow::{StepGate, should_execute_step};
use super::definition::{WorkflowDefinition, WorkflowStep};
use super::error::{StepError, WorkflowError};
use super::executor::{ExecutorRegistry, StepExecutor, StepOutput};
use super::metrics::{OptimizationSuggestion, StepMetrics, WorkflowMetrics, analyze_history};
use crate::config::EngineConfig;
use crate::evaluation::registry::EvaluatorRegistry;
use crate::hooks::integration::WorkflowHooks;
use crate::hooks::registry::{HookRegistry, panic_message};
use crate::telemetry::bridge::TelemetryBridge;

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Every reached step settled without an unhandled failure.
    Completed,
    /// A step failed without an error route, or control flow broke.
    Failed,
    /// Cancellation was observed at a step boundary.
    Cancelled,
}

impl WorkflowStatus {
    /// Lowercase name, as serialized.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    /// Execution identifier.
    pub execution_id: String,
    /// Workflow identifier.
    pub workflow_id: String,
    /// Final status.
    pub status: WorkflowStatus,
    /// Results of steps that ran, keyed by step id.
    pub node_results: HashMap<String, StepResult>,
    /// Status of every reached step, including skipped ones.
    pub step_statuses: HashMap<String, StepStatus>,
    /// Variables at the end of the run.
    pub variables: HashMap<String, Value>,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Why the run failed or was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Evaluator scores, when optimization is enabled.
    #[serde(default)]
    pub objective_scores: BTreeMap<String, f64>,
    /// Evaluators that failed to score this run.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub evaluation_failures: BTreeMap<String, String>,
}

impl WorkflowResult {
    /// A result with no steps, handy for runners that short-circuit.
    pub fn empty(
        workflow_id: impl Into<String>,
        execution_id: impl Into<String>,
        status: WorkflowStatus,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            status,
            node_results: HashMap::new(),
            step_statuses: HashMap::new(),
            variables: HashMap::new(),
            duration_ms: 0,
            error: None,
            objective_scores: BTreeMap::new(),
            evaluation_failures: BTreeMap::new(),
        }
    }

    /// Whether the run completed.
    pub fn is_success(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }
}

/// How a single step settled.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum StepOutcome {
    Completed,
    Skipped,
    Failed(String),
}

/// Mutable state threaded through one run (or one parallel branch of it).
pub(super) struct RunState {
    pub(super) ctx: ExecutionContext,
    pub(super) metrics: WorkflowMetrics,
}

#[derive(Default)]
struct RunTables {
    active: HashMap<String, WorkflowMetrics>,
    history: VecDeque<WorkflowMetrics>,
}

pub(super) struct EngineInner {
    executors: ExecutorRegistry,
    hooks: WorkflowHooks,
    telemetry: TelemetryBridge,
    evaluators: Option<EvaluatorRegistry>,
    config: EngineConfig,
    runs: Mutex<RunTables>,
}

/// Executes workflow definitions.
///
/// Cloning is cheap and shares executors, hooks, telemetry and run history.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("executors", &self.inner.executors)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`WorkflowEngine`].
#[derive(Default)]
pub struct WorkflowEngineBuilder {
    executors: ExecutorRegistry,
    hooks: HookRegistry,
    telemetry: Option<TelemetryBridge>,
    evaluators: Option<EvaluatorRegistry>,
    config: EngineConfig,
}

impl WorkflowEngineBuilder {
    /// Registers a step executor.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executors.register(executor);
        self
    }

    /// Replaces the executor registry.
    #[must_use]
    pub fn executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = executors;
        self
    }

    /// Uses a shared hook registry.
    #[must_use]
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Uses a shared telemetry bridge.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryBridge) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Scores runs of optimization-enabled workflows with these evaluators.
    #[must_use]
    pub fn evaluators(mut self, evaluators: EvaluatorRegistry) -> Self {
        self.evaluators = Some(evaluators);
        self
    }

    /// Sets engine configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the engine.
    pub fn build(self) -> WorkflowEngine {
        WorkflowEngine {
            inner: Arc::new(EngineInner {
                executors: self.executors,
                hooks: WorkflowHooks::new(self.hooks),
                telemetry: self.telemetry.unwrap_or_default(),
                evaluators: self.evaluators,
                config: self.config,
                runs: Mutex::new(RunTables::default()),
            }),
        }
    }
}

impl WorkflowEngine {
    /// Starts building an engine.
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::default()
    }

    /// Hook registry shared with this engine.
    pub fn hooks(&self) -> &HookRegistry {
        &self.inner.hooks.registry
    }

    /// Telemetry bridge this engine emits on.
    pub fn telemetry(&self) -> &TelemetryBridge {
        &self.inner.telemetry
    }

    /// Evaluators used for optimization-enabled workflows.
    pub fn evaluators(&self) -> Option<&EvaluatorRegistry> {
        self.inner.evaluators.as_ref()
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Runs a workflow with a fresh context.
    pub async fn execute(&self, definition: &WorkflowDefinition) -> WorkflowResult {
        self.execute_with_context(definition, ExecutionContext::new(definition.id.clone())).await
    }

    /// Runs a workflow with a caller-prepared context.
    ///
    /// Use this to seed variables or to keep a cancellation handle
    /// (`context.cancellation_token()`) before the run starts.
    pub async fn execute_with_context(
        &self,
        definition: &WorkflowDefinition,
        context: ExecutionContext,
    ) -> WorkflowResult {
        self.inner.run_workflow(definition, context).await
    }

    /// Metrics of runs still in flight.
    pub async fn get_active_runs(&self) -> Vec<WorkflowMetrics> {
        let runs = self.inner.runs.lock().await;
        let mut active: Vec<WorkflowMetrics> = runs.active.values().cloned().collect();
        active.sort_by_key(|m| m.start_time);
        active
    }

    /// Finished runs, oldest first.
    pub async fn get_history(&self) -> Vec<WorkflowMetrics> {
        self.inner.runs.lock().await.history.iter().cloned().collect()
    }

    /// Metrics for one execution, active or finished.
    pub async fn get_run_metrics(&self, execution_id: &str) -> Option<WorkflowMetrics> {
        let runs = self.inner.runs.lock().await;
        runs.active
            .get(execution_id)
            .or_else(|| runs.history.iter().find(|m| m.execution_id == execution_id))
            .cloned()
    }

    /// Advisory suggestions derived from run history.
    pub async fn get_optimization_suggestions(&self) -> Vec<OptimizationSuggestion> {
        let history: Vec<WorkflowMetrics> = self.get_history().await;
        analyze_history(&history, &self.inner.config)
    }
}

impl EngineInner {
    async fn run_workflow(
        &self,
        definition: &WorkflowDefinition,
        mut ctx: ExecutionContext,
    ) -> WorkflowResult {
        ctx.workflow_id = definition.id.clone();
        let metrics = WorkflowMetrics::new(definition.id.clone(), ctx.execution_id.clone());
        self.runs.lock().await.active.insert(ctx.execution_id.clone(), metrics.clone());
        let mut state = RunState { ctx, metrics };

        info!(
            workflow_id = %definition.id,
            execution_id = %state.ctx.execution_id,
            step_count = definition.step_count(),
            "Starting workflow execution"
        );
        self.emit(
            "workflow:start",
            &state.ctx,
            json!({ "name": definition.name, "stepCount": definition.step_count() }),
        );
        self.hooks.execute_before_workflow_hooks(definition, &state.ctx).await;

        let outcome = match definition.validate() {
            Ok(()) => self.run_steps(&definition.steps, &mut state).await,
            Err(e) => Err(e),
        };

        let (status, error_message) = match &outcome {
            Ok(()) => (WorkflowStatus::Completed, None),
            Err(WorkflowError::Cancelled) => {
                (WorkflowStatus::Cancelled, Some(WorkflowError::Cancelled.to_string()))
            }
            Err(e) => (WorkflowStatus::Failed, Some(e.to_string())),
        };

        if let Err(e) = &outcome {
            // Step failures were already recorded against the step.
            if !matches!(e, WorkflowError::StepFailed { .. }) {
                state.metrics.record_error(None, e.to_string());
            }
            if status == WorkflowStatus::Failed {
                error!(
                    workflow_id = %definition.id,
                    execution_id = %state.ctx.execution_id,
                    error = %e,
                    "Workflow execution failed"
                );
                self.hooks.execute_workflow_error_hooks(definition, &state.ctx, &e.to_string()).await;
            }
        }

        state.metrics.finalize(status);
        let RunState { ctx, mut metrics } = state;

        let mut result = WorkflowResult {
            execution_id: ctx.execution_id.clone(),
            workflow_id: definition.id.clone(),
            status,
            node_results: ctx.node_results().clone(),
            step_statuses: ctx.step_statuses().clone(),
            variables: ctx.variables.clone(),
            duration_ms: metrics.duration_ms,
            error: error_message,
            objective_scores: BTreeMap::new(),
            evaluation_failures: BTreeMap::new(),
        };

        if definition.optimization_enabled() {
            self.score_run(&mut result, &ctx).await;
            metrics.objective_scores = result.objective_scores.clone();
        }

        {
            let mut runs = self.runs.lock().await;
            runs.active.remove(&ctx.execution_id);
            runs.history.push_back(metrics);
            while runs.history.len() > self.config.history_size.max(1) {
                runs.history.pop_front();
            }
        }

        self.hooks
            .execute_after_workflow_hooks(definition, &ctx, status.as_str(), result.duration_ms)
            .await;

        let event = match status {
            WorkflowStatus::Completed => "workflow:complete",
            WorkflowStatus::Failed => "workflow:failed",
            WorkflowStatus::Cancelled => "workflow:cancelled",
        };
        self.emit(
            event,
            &ctx,
            json!({
                "status": status.as_str(),
                "durationMs": result.duration_ms,
                "error": result.error,
            }),
        );
        info!(
            workflow_id = %definition.id,
            execution_id = %ctx.execution_id,
            status = %status,
            duration_ms = result.duration_ms,
            "Workflow execution finished"
        );

        result
    }

    async fn score_run(&self, result: &mut WorkflowResult, ctx: &ExecutionContext) {
        let Some(evaluators) = &self.evaluators else {
            return;
        };
        if evaluators.is_empty().await {
            return;
        }
        let report = evaluators.evaluate_all(result).await;
        debug!(
            execution_id = %result.execution_id,
            scores = ?report.scores,
            failures = report.failures.len(),
            "Run scored"
        );
        self.emit(
            "workflow:evaluated",
            ctx,
            json!({ "scores": report.scores, "failures": report.failures }),
        );
        result.objective_scores = report.scores;
        result.evaluation_failures = report.failures;
    }

    /// Runs a step list in order, following jumps within the list.
    pub(super) async fn run_steps(
        &self,
        steps: &[WorkflowStep],
        state: &mut RunState,
    ) -> Result<(), WorkflowError> {
        let mut index = 0;
        while let Some(step) = steps.get(index) {
            if state.ctx.is_cancelled() {
                state.ctx.set_step_status(&step.id, StepStatus::Cancelled);
                info!(
                    execution_id = %state.ctx.execution_id,
                    step_id = %step.id,
                    "Cancellation observed, stopping before step"
                );
                return Err(WorkflowError::Cancelled);
            }
            if state.ctx.has_settled(&step.id) {
                return Err(WorkflowError::ControlFlow(format!(
                    "step {} was already executed in this run; jump chain does not progress",
                    step.id
                )));
            }

            let outcome = self.run_step(step, state).await?;
            self.publish_progress(&state.metrics).await;

            index = match outcome {
                StepOutcome::Skipped => index + 1,
                StepOutcome::Completed => match &step.on_success {
                    Some(target) => position_of(steps, target, &step.id)?,
                    None => index + 1,
                },
                StepOutcome::Failed(message) => match &step.on_error {
                    Some(target) => {
                        debug!(step_id = %step.id, target = %target, "Routing failure to onError");
                        position_of(steps, target, &step.id)?
                    }
                    None => {
                        return Err(WorkflowError::StepFailed { step_id: step.id.clone(), message });
                    }
                },
            };
        }
        Ok(())
    }

    /// Runs one step (leaf or group) to a settled state.
    pub(super) fn run_step<'a>(
        &'a self,
        step: &'a WorkflowStep,
        state: &'a mut RunState,
    ) -> BoxFuture<'a, Result<StepOutcome, WorkflowError>> {
        async move {
            if let StepGate::Skip(reason) = should_execute_step(step, &state.ctx) {
                let now = Utc::now();
                state.ctx.set_step_status(&step.id, StepStatus::Skipped);
                state.metrics.record_step(StepMetrics {
                    step_id: step.id.clone(),
                    step_type: step.step_type.clone(),
                    started_at: now,
                    completed_at: now,
                    duration_ms: 0,
                    status: StepStatus::Skipped,
                    attempts: 0,
                    is_group: step.is_group(),
                });
                debug!(step_id = %step.id, reason = %reason, "Step skipped");
                self.emit(
                    "workflow:step:skipped",
                    &state.ctx,
                    json!({ "stepId": step.id, "reason": reason }),
                );
                return Ok(StepOutcome::Skipped);
            }

            state.ctx.set_step_status(&step.id, StepStatus::Running);
            debug!(step_id = %step.id, step_type = %step.step_type, "Executing step");
            self.emit(
                "workflow:step:start",
                &state.ctx,
                json!({ "stepId": step.id, "type": step.step_type }),
            );
            self.hooks.execute_before_step_hooks(step, &state.ctx).await;

            let started_at = Utc::now();
            let (outcome, attempts) = if step.is_group() {
                let settled = if step.is_parallel() {
                    self.run_parallel_group(step, state).await
                } else {
                    self.run_sequential_group(step, state).await
                };
                match settled {
                    Ok(outcome) => (outcome, 1),
                    Err(fatal) => {
                        self.abort_group(step, state, started_at, &fatal).await;
                        return Err(fatal);
                    }
                }
            } else {
                self.execute_with_retry(step, state).await
            };
            let completed_at = Utc::now();

            let (result, step_outcome) = match outcome {
                Ok(output) => {
                    for (name, value) in output.variables {
                        state.ctx.set_variable(name, value);
                    }
                    (
                        StepResult::success(&step.id, output.value, attempts, started_at, completed_at),
                        StepOutcome::Completed,
                    )
                }
                Err(e) => {
                    let message = e.to_string();
                    // A group only fails through a child, which has its own record.
                    if !step.is_group() {
                        state.metrics.record_error(Some(&step.id), message.clone());
                    }
                    (
                        StepResult::failure(&step.id, message.clone(), attempts, started_at, completed_at),
                        StepOutcome::Failed(message),
                    )
                }
            };

            state.metrics.record_step(StepMetrics {
                step_id: step.id.clone(),
                step_type: step.step_type.clone(),
                started_at,
                completed_at,
                duration_ms: result.duration_ms,
                status: result.status,
                attempts,
                is_group: step.is_group(),
            });
            state.ctx.record_step_result(result.clone())?;
            self.hooks.execute_after_step_hooks(step, &result, &state.ctx).await;

            match &step_outcome {
                StepOutcome::Failed(message) => {
                    warn!(step_id = %step.id, attempts, error = %message, "Step failed");
                    self.emit(
                        "workflow:step:failed",
                        &state.ctx,
                        json!({ "stepId": step.id, "error": message, "attempts": attempts }),
                    );
                }
                _ => {
                    debug!(step_id = %step.id, duration_ms = result.duration_ms, "Step completed");
                    self.emit(
                        "workflow:step:complete",
                        &state.ctx,
                        json!({
                            "stepId": step.id,
                            "durationMs": result.duration_ms,
                            "attempts": attempts,
                        }),
                    );
                }
            }

            Ok(step_outcome)
        }
        .boxed()
    }

    /// Settles a group whose children hit a fatal error.
    ///
    /// The group ends `cancelled` on cancellation and `failed` otherwise.
    /// The run-level error is recorded once by the caller of the top list.
    async fn abort_group(
        &self,
        group: &WorkflowStep,
        state: &mut RunState,
        started_at: DateTime<Utc>,
        fatal: &WorkflowError,
    ) {
        let completed_at = Utc::now();
        let status = if matches!(fatal, WorkflowError::Cancelled) {
            StepStatus::Cancelled
        } else {
            StepStatus::Failed
        };
        let mut result = StepResult::failure(&group.id, fatal.to_string(), 1, started_at, completed_at);
        result.status = status;
        result.output = Some(group_summary(group, &state.ctx));

        state.metrics.record_step(StepMetrics {
            step_id: group.id.clone(),
            step_type: group.step_type.clone(),
            started_at,
            completed_at,
            duration_ms: result.duration_ms,
            status,
            attempts: 1,
            is_group: true,
        });
        if status == StepStatus::Cancelled {
            state.ctx.set_step_status(&group.id, status);
        } else if let Err(e) = state.ctx.record_step_result(result.clone()) {
            warn!(step_id = %group.id, error = %e, "Group result already recorded");
            state.ctx.set_step_status(&group.id, status);
        }
        self.hooks.execute_after_step_hooks(group, &result, &state.ctx).await;

        warn!(step_id = %group.id, status = %status.as_str(), error = %fatal, "Group aborted");
        self.emit(
            "workflow:step:failed",
            &state.ctx,
            json!({
                "stepId": group.id,
                "error": fatal.to_string(),
                "status": status.as_str(),
                "attempts": 1,
            }),
        );
    }

    async fn run_sequential_group(
        &self,
        group: &WorkflowStep,
        state: &mut RunState,
    ) -> Result<Result<StepOutput, StepError>, WorkflowError> {
        match self.run_steps(&group.steps, state).await {
            Ok(()) => Ok(Ok(StepOutput::new(group_summary(group, &state.ctx)))),
            Err(WorkflowError::StepFailed { step_id, message }) => {
                Ok(Err(StepError::Execution(format!("child {step_id} failed: {message}"))))
            }
            Err(e) => Err(e),
        }
    }

    /// Runs a leaf step, retrying per its policy.
    ///
    /// Returns the last outcome and the number of attempts made.
    async fn execute_with_retry(
        &self,
        step: &WorkflowStep,
        state: &RunState,
    ) -> (Result<StepOutput, StepError>, u32) {
        let Some(executor) = self.executors.get(&step.step_type) else {
            return (Err(StepError::UnknownType(step.step_type.clone())), 1);
        };
        let policy = step.effective_retry_policy();
        let timeout_ms = step.timeout_ms.or(self.config.default_step_timeout_ms);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let call = AssertUnwindSafe(executor.execute(step, &state.ctx)).catch_unwind();
            let caught = match timeout_ms {
                Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), call).await {
                    Ok(caught) => caught,
                    Err(_) => Ok(Err(StepError::Timeout(ms))),
                },
                None => call.await,
            };
            let outcome = caught
                .unwrap_or_else(|panic| Err(StepError::Panicked(panic_message(panic.as_ref()))));

            let error = match outcome {
                Ok(output) => return (Ok(output), attempt),
                Err(e) => e,
            };

            self.hooks.execute_step_error_hooks(step, &error.to_string(), attempt, &state.ctx).await;
            if attempt >= policy.max_attempts || !error.is_retryable() {
                return (Err(error), attempt);
            }

            let delay = policy.delay_after(attempt);
            warn!(
                step_id = %step.id,
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Step attempt failed, retrying"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn publish_progress(&self, metrics: &WorkflowMetrics) {
        let mut runs = self.runs.lock().await;
        if let Some(active) = runs.active.get_mut(&metrics.execution_id) {
            active.clone_from(metrics);
        }
    }

    /// Emits an event tagged with the run's ids.
    pub(super) fn emit(&self, event_name: &str, ctx: &ExecutionContext, data: Value) {
        let mut payload = json!({
            "workflowId": ctx.workflow_id,
            "executionId": ctx.execution_id,
        });
        if let (Some(target), Value::Object(extra)) = (payload.as_object_mut(), data) {
            target.extend(extra);
        }
        self.telemetry.emit(event_name, payload);
    }
}

/// Output recorded for a group step: the status of each child.
pub(super) fn group_summary(group: &WorkflowStep, ctx: &ExecutionContext) -> Value {
    let children: serde_json::Map<String, Value> = group
        .steps
        .iter()
        .map(|child| (child.id.clone(), Value::String(ctx.step_status(&child.id).as_str().to_string())))
        .collect();
    json!({ "children": children })
}

fn position_of(steps: &[WorkflowStep], target: &str, from: &str) -> Result<usize, WorkflowError> {
    steps.iter().position(|s| s.id == target).ok_or_else(|| {
        WorkflowError::ControlFlow(format!("step {from} jumps to unknown step {target}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{FnHook, HookEvent, HookResult};
    use crate::workflow::definition::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Echoes `config.value` after sleeping `config.sleepMs`.
    ///
    /// `config.cancel` cancels the run first; `config.fail` fails the step.
    struct ScriptedExecutor {
        calls: AtomicU32,
    }

    #[async_trait]
    impl StepExecutor for ScriptedExecutor {
        fn step_type(&self) -> &str {
            "scripted"
        }

        async fn execute(
            &self,
            step: &WorkflowStep,
            context: &ExecutionContext,
        ) -> Result<StepOutput, StepError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if step.config.get("cancel").and_then(Value::as_bool).unwrap_or(false) {
                context.cancel();
            }
            if step.config.get("fail").and_then(Value::as_bool).unwrap_or(false) {
                return Err(StepError::Execution("boom".to_string()));
            }
            if let Some(sleep) = step.config.get("sleepMs").and_then(Value::as_u64) {
                tokio::time::sleep(Duration::from_millis(sleep)).await;
            }
            let value = step.config.get("value").cloned().unwrap_or(Value::Null);
            Ok(StepOutput::new(value.clone()).with_variable(format!("{}_out", step.id), value))
        }
    }

    fn engine() -> WorkflowEngine {
        WorkflowEngine::builder()
            .executor(Arc::new(ScriptedExecutor { calls: AtomicU32::new(0) }))
            .build()
    }

    #[tokio::test]
    async fn test_sequential_run_sets_variables() {
        let def = WorkflowDefinition::new(
            "wf",
            "seq",
            vec![
                WorkflowStep::new("a", "scripted").with_config("value", json!(1)),
                WorkflowStep::new("b", "scripted").with_condition("a_out == 1"),
            ],
        );
        let result = engine().execute(&def).await;
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(result.variables["a_out"], json!(1));
        assert_eq!(result.node_results.len(), 2);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_on_success_jump_skips_ahead() {
        let def = WorkflowDefinition::new(
            "wf",
            "jump",
            vec![
                WorkflowStep::new("a", "scripted").with_on_success("c"),
                WorkflowStep::new("b", "scripted"),
                WorkflowStep::new("c", "scripted"),
            ],
        );
        let result = engine().execute(&def).await;
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert!(result.node_results.contains_key("c"));
        assert!(!result.node_results.contains_key("b"));
    }

    #[tokio::test]
    async fn test_backward_jump_is_a_control_flow_failure() {
        let def = WorkflowDefinition::new(
            "wf",
            "loop",
            vec![
                WorkflowStep::new("a", "scripted"),
                WorkflowStep::new("b", "scripted").with_on_success("a"),
            ],
        );
        let result = engine().execute(&def).await;
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert!(result.error.unwrap().contains("Control flow"));
        assert_eq!(result.node_results.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_step_type_is_a_step_failure() {
        let def = WorkflowDefinition::new(
            "wf",
            "unknown",
            vec![
                WorkflowStep::new("a", "teleport")
                    .with_retry(RetryPolicy::new(3, 0))
                    .with_on_error("b"),
                WorkflowStep::new("b", "scripted"),
            ],
        );
        let result = engine().execute(&def).await;
        assert_eq!(result.status, WorkflowStatus::Completed);
        let failed = &result.node_results["a"];
        assert_eq!(failed.status, StepStatus::Failed);
        assert_eq!(failed.attempts, 1);
        assert!(failed.error.as_deref().unwrap().contains("teleport"));
    }

    #[tokio::test]
    async fn test_timeout_consumes_attempts() {
        let def = WorkflowDefinition::new(
            "wf",
            "slow",
            vec![
                WorkflowStep::new("a", "scripted")
                    .with_config("sleepMs", json!(200))
                    .with_timeout_ms(10)
                    .with_retry(RetryPolicy::new(2, 0)),
            ],
        );
        let result = engine().execute(&def).await;
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.node_results["a"].attempts, 2);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_invalid_definition_fails_without_running() {
        let def = WorkflowDefinition::new(
            "wf",
            "bad",
            vec![WorkflowStep::new("a", "scripted").with_on_error("missing")],
        );
        let engine = engine();
        let result = engine.execute(&def).await;
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert!(result.node_results.is_empty());
        let history = engine.get_history().await;
        assert_eq!(history[0].errors.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_at_next_boundary() {
        let def = WorkflowDefinition::new(
            "wf",
            "cancel",
            vec![WorkflowStep::new("a", "scripted"), WorkflowStep::new("b", "scripted")],
        );
        let ctx = ExecutionContext::new("wf");
        ctx.cancel();
        let result = engine().execute_with_context(&def, ctx).await;
        assert_eq!(result.status, WorkflowStatus::Cancelled);
        assert!(result.node_results.is_empty());
        assert_eq!(result.step_statuses["a"], StepStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancellation_inside_groups_settles_every_group() {
        let engine = engine();
        let after: Arc<std::sync::Mutex<Vec<(String, String)>>> = Arc::default();
        let sink = after.clone();
        engine
            .hooks()
            .register(Arc::new(FnHook::new("after", HookEvent::AfterStep, move |ctx| {
                sink.lock().unwrap().push((
                    ctx.input["stepId"].as_str().unwrap_or_default().to_string(),
                    ctx.input["result"]["status"].as_str().unwrap_or_default().to_string(),
                ));
                Ok(HookResult::success())
            })))
            .await;
        let cancelling = || WorkflowStep::new("a", "scripted").with_config("cancel", json!(true));
        let def = WorkflowDefinition::new(
            "wf",
            "nested",
            vec![WorkflowStep::parallel(
                "outer",
                vec![
                    WorkflowStep::sequential("inner", vec![cancelling(), WorkflowStep::new("b", "scripted")]),
                    WorkflowStep::new("c", "scripted"),
                ],
            )],
        );

        let result = engine.execute(&def).await;

        assert_eq!(result.status, WorkflowStatus::Cancelled);
        assert_eq!(result.step_statuses["a"], StepStatus::Completed);
        assert_eq!(result.step_statuses["b"], StepStatus::Cancelled);
        assert_eq!(result.step_statuses["c"], StepStatus::Completed);
        assert_eq!(result.step_statuses["inner"], StepStatus::Cancelled);
        assert_eq!(result.step_statuses["outer"], StepStatus::Cancelled);
        assert!(result.step_statuses.values().all(|s| s.is_terminal()));

        let seen = after.lock().unwrap();
        assert!(seen.contains(&("inner".to_string(), "cancelled".to_string())));
        assert!(seen.contains(&("outer".to_string(), "cancelled".to_string())));
        let history = engine.get_history().await;
        let groups: Vec<&str> =
            history[0].steps.iter().filter(|m| m.is_group).map(|m| m.step_id.as_str()).collect();
        assert_eq!(groups, vec!["inner", "outer"]);
    }

    #[tokio::test]
    async fn test_control_flow_error_inside_group_fails_the_group() {
        let def = WorkflowDefinition::new(
            "wf",
            "nested-loop",
            vec![WorkflowStep::sequential(
                "grp",
                vec![
                    WorkflowStep::new("a", "scripted"),
                    WorkflowStep::new("b", "scripted").with_on_success("a"),
                ],
            )],
        );
        let result = engine().execute(&def).await;
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.step_statuses["grp"], StepStatus::Failed);
        assert!(result.node_results["grp"].error.as_deref().unwrap().contains("Control flow"));
    }

    #[tokio::test]
    async fn test_child_failure_is_recorded_once() {
        let engine = engine();
        let def = WorkflowDefinition::new(
            "wf",
            "group-failure",
            vec![WorkflowStep::sequential(
                "grp",
                vec![
                    WorkflowStep::new("a", "scripted"),
                    WorkflowStep::new("b", "scripted").with_config("fail", json!(true)),
                ],
            )],
        );
        let result = engine.execute(&def).await;
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.step_statuses["grp"], StepStatus::Failed);

        let history = engine.get_history().await;
        let errors: Vec<Option<&str>> =
            history[0].errors.iter().map(|e| e.step_id.as_deref()).collect();
        assert_eq!(errors, vec![Some("b")]);
    }

    #[tokio::test]
    async fn test_history_is_fifo_bounded() {
        let engine = WorkflowEngine::builder()
            .executor(Arc::new(ScriptedExecutor { calls: AtomicU32::new(0) }))
            .config(EngineConfig { history_size: 2, ..EngineConfig::default() })
            .build();
        let def = WorkflowDefinition::new("wf", "h", vec![WorkflowStep::new("a", "scripted")]);

        let first = engine.execute(&def).await;
        let second = engine.execute(&def).await;
        let third = engine.execute(&def).await;

        let history = engine.get_history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].execution_id, second.execution_id);
        assert_eq!(history[1].execution_id, third.execution_id);
        assert!(engine.get_run_metrics(&first.execution_id).await.is_none());
        assert!(engine.get_active_runs().await.is_empty());
        assert_ne!(first.execution_id, second.execution_id);
    }

    #[tokio::test]
    async fn test_emit_tags_run_ids() {
        let engine = engine();
        let mut rx = engine.telemetry().subscribe();
        let def = WorkflowDefinition::new("wf", "t", vec![WorkflowStep::new("a", "scripted")]);
        let result = engine.execute(&def).await;

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.data["executionId"], result.execution_id.as_str());
            names.push(event.event_name);
        }
        assert_eq!(
            names,
            vec!["workflow:start", "workflow:step:start", "workflow:step:complete", "workflow:complete"]
        );
    }
}
