//! Evaluator error types.

use thiserror::Error;

/// Errors surfaced by the evaluator registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluatorError {
    /// No evaluator is registered under the id.
    #[error("Evaluator not found: {0}")]
    NotFound(String),

    /// The evaluator failed or panicked while scoring.
    #[error("Evaluator {evaluator} failed: {message}")]
    Failed {
        /// Evaluator id.
        evaluator: String,
        /// Failure detail.
        message: String,
    },

    /// The evaluator returned an unusable score.
    #[error("Evaluator {evaluator} returned an invalid result: {message}")]
    InvalidResult {
        /// Evaluator id.
        evaluator: String,
        /// What was wrong.
        message: String,
    },
}

/// Result type for evaluator operations.
pub type Result<T> = std::result::Result<T, EvaluatorError>;
