//! Error types for the optimizer.

use thiserror::Error;

/// Reasons an optimization run cannot proceed.
///
/// Failing to find an improvement is not an error; these are raised before
/// or instead of producing a result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptimizerError {
    /// `numIslands` is zero.
    #[error("Optimizer needs at least one island")]
    NoIslands,

    /// The per-island population would be empty.
    #[error("Population is empty: {0}")]
    EmptyPopulation(String),

    /// No evaluator is registered, so nothing can be scored.
    #[error("No evaluators registered")]
    NoEvaluators,

    /// The objectives map is empty.
    #[error("No objectives given")]
    NoObjectives,

    /// An objective name or target cannot be interpreted.
    #[error("Invalid objective '{name}': {reason}")]
    InvalidObjective {
        /// Objective as given.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A hyperparameter is out of range.
    #[error("Invalid optimizer configuration: {0}")]
    InvalidConfig(String),

    /// The base workflow does not validate.
    #[error("Invalid base workflow: {0}")]
    InvalidWorkflow(String),
}

/// Result type for optimizer operations.
pub type Result<T> = std::result::Result<T, OptimizerError>;
