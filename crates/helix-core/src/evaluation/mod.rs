//! Pluggable scoring of finished runs.

pub mod builtin;
pub mod error;
pub mod registry;

pub use builtin::{DurationEvaluator, SuccessRateEvaluator, TokenUsageEvaluator};
pub use error::{EvaluatorError, Result};
pub use registry::{EvaluationReport, EvaluatorInfo, EvaluatorPlugin, EvaluatorRegistry, Scores};
