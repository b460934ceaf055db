//! Per-run execution state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::WorkflowError;

/// Status of a workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Not started yet.
    Pending,
    /// Currently executing.
    Running,
    /// Completed successfully.
    Completed,
    /// Failed after exhausting retries.
    Failed,
    /// Skipped by `skipIf` or a false `condition`.
    Skipped,
    /// Not run because the workflow was cancelled.
    Cancelled,
}

impl StepStatus {
    /// Whether the step has settled.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled)
    }

    /// Lowercase name, as serialized.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Result of executing a workflow step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// The step ID that was executed.
    pub step_id: String,
    /// Final status (completed or failed).
    pub status: StepStatus,
    /// The output from the step (if successful).
    pub output: Option<Value>,
    /// Error message if the step failed.
    pub error: Option<String>,
    /// Number of attempts made.
    pub attempts: u32,
    /// Timestamp when the step started.
    pub started_at: DateTime<Utc>,
    /// Timestamp when the step completed.
    pub completed_at: DateTime<Utc>,
    /// Duration of step execution in milliseconds.
    pub duration_ms: u64,
}

impl StepResult {
    /// Creates a successful step result.
    pub fn success(
        step_id: impl Into<String>,
        output: Value,
        attempts: u32,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Completed,
            output: Some(output),
            error: None,
            attempts,
            started_at,
            completed_at,
            duration_ms: duration_between(started_at, completed_at),
        }
    }

    /// Creates a failed step result.
    pub fn failure(
        step_id: impl Into<String>,
        error: impl Into<String>,
        attempts: u32,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Failed,
            output: None,
            error: Some(error.into()),
            attempts,
            started_at,
            completed_at,
            duration_ms: duration_between(started_at, completed_at),
        }
    }

    /// Whether the step completed.
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

pub(crate) fn duration_between(started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> u64 {
    completed_at.signed_duration_since(started_at).num_milliseconds().max(0) as u64
}

/// Execution context for a workflow run.
///
/// Tracks step results, statuses, and the variable scratch space. Step
/// results are append-only: once recorded they cannot be replaced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    /// Workflow ID being executed.
    pub workflow_id: String,
    /// Fresh identifier for this invocation.
    pub execution_id: String,
    /// Results from executed steps, keyed by step ID.
    node_results: HashMap<String, StepResult>,
    /// Status of every step that was reached.
    step_statuses: HashMap<String, StepStatus>,
    /// Variables read by `condition` / `skipIf` expressions.
    pub variables: HashMap<String, Value>,
    /// Timestamp when execution started.
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    cancellation: CancellationToken,
}

impl ExecutionContext {
    /// Creates a new execution context for a workflow.
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: Uuid::new_v4().to_string(),
            node_results: HashMap::new(),
            step_statuses: HashMap::new(),
            variables: HashMap::new(),
            started_at: Utc::now(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Seeds variables before the run starts.
    #[must_use]
    pub fn with_variables(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables.extend(variables);
        self
    }

    /// Records the result of a settled step.
    ///
    /// Fails if the step already has a result.
    pub fn record_step_result(&mut self, result: StepResult) -> Result<(), WorkflowError> {
        if self.node_results.contains_key(&result.step_id) {
            return Err(WorkflowError::ControlFlow(format!(
                "step {} already has a recorded result",
                result.step_id
            )));
        }
        self.step_statuses.insert(result.step_id.clone(), result.status);
        self.node_results.insert(result.step_id.clone(), result);
        Ok(())
    }

    /// Gets the result of a previously executed step.
    pub fn get_step_result(&self, step_id: &str) -> Option<&StepResult> {
        self.node_results.get(step_id)
    }

    /// All recorded step results.
    pub fn node_results(&self) -> &HashMap<String, StepResult> {
        &self.node_results
    }

    /// Status of a step, `Pending` if it was never reached.
    pub fn step_status(&self, step_id: &str) -> StepStatus {
        self.step_statuses.get(step_id).copied().unwrap_or(StepStatus::Pending)
    }

    /// Status of every reached step.
    pub fn step_statuses(&self) -> &HashMap<String, StepStatus> {
        &self.step_statuses
    }

    pub(crate) fn set_step_status(&mut self, step_id: &str, status: StepStatus) {
        self.step_statuses.insert(step_id.to_string(), status);
    }

    /// Whether the step already settled in this run.
    pub fn has_settled(&self, step_id: &str) -> bool {
        self.step_status(step_id).is_terminal()
    }

    /// Sets a variable in the execution context.
    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Gets a variable from the execution context.
    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Requests cooperative cancellation; observed at the next step boundary.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Handle that cancels this run from elsewhere.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Independent copy for a parallel branch, sharing the cancellation flag.
    pub(crate) fn fork(&self) -> Self {
        self.clone()
    }

    /// Merges what a forked branch produced back into this context.
    ///
    /// `baseline` is the variable map at fork time; only variables the branch
    /// changed are copied back.
    pub(crate) fn absorb(&mut self, branch: Self, baseline: &HashMap<String, Value>) {
        for (id, result) in branch.node_results {
            self.node_results.entry(id).or_insert(result);
        }
        for (id, status) in branch.step_statuses {
            if !self.step_statuses.get(&id).is_some_and(|s| s.is_terminal()) {
                self.step_statuses.insert(id, status);
            }
        }
        for (name, value) in branch.variables {
            if baseline.get(&name) != Some(&value) {
                self.variables.insert(name, value);
            }
        }
    }
}
