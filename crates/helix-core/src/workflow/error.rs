//! Errors raised while validating and executing workflows.

use thiserror::Error;

/// Errors that end a workflow run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    /// The definition is malformed.
    #[error("Workflow validation error: {0}")]
    Validation(String),

    /// A step exhausted its retries and had no error route.
    #[error("Step {step_id} failed: {message}")]
    StepFailed {
        /// Failing step.
        step_id: String,
        /// Last error message.
        message: String,
    },

    /// Unresolvable jump or non-progressing cycle.
    #[error("Control flow error: {0}")]
    ControlFlow(String),

    /// Cancellation was observed at a step boundary.
    #[error("Workflow cancelled")]
    Cancelled,
}

/// Errors produced by a single step attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    /// The executor reported a failure.
    #[error("Execution error: {0}")]
    Execution(String),

    /// The attempt exceeded the step deadline.
    #[error("Step timed out after {0}ms")]
    Timeout(u64),

    /// No executor is registered for the step type.
    #[error("Unknown step type: {0}")]
    UnknownType(String),

    /// The step config could not be interpreted by its executor.
    #[error("Invalid step config: {0}")]
    InvalidConfig(String),

    /// The sampling client failed.
    #[error("Sampling error: {0}")]
    Sampling(String),

    /// The executor panicked.
    #[error("Executor panicked: {0}")]
    Panicked(String),
}

impl StepError {
    /// Whether another attempt could change the outcome.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::UnknownType(_) | Self::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for StepError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidConfig(e.to_string())
    }
}

/// Result type for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;
