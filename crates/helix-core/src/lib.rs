//! Helix Core - workflow execution with hooks, telemetry and run scoring.
//!
//! This crate provides:
//! - Lifecycle hooks with priority ordering and failure isolation
//! - A telemetry bridge with synchronous subscribers and a broadcast stream
//! - The workflow engine (guards, retries, timeouts, jumps, parallel groups)
//! - Pluggable evaluators that score finished runs
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use helix_core::workflow::{
//!     ExecutionContext, StepError, StepExecutor, StepOutput, WorkflowDefinition, WorkflowEngine,
//!     WorkflowStep,
//! };
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl StepExecutor for Echo {
//!     fn step_type(&self) -> &str {
//!         "echo"
//!     }
//!
//!     async fn execute(
//!         &self,
//!         step: &WorkflowStep,
//!         _context: &ExecutionContext,
//!     ) -> Result<StepOutput, StepError> {
//!         Ok(StepOutput::new(serde_json::Value::Object(step.config.clone())))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = WorkflowEngine::builder().executor(Arc::new(Echo)).build();
//!     let definition =
//!         WorkflowDefinition::new("hello", "Hello", vec![WorkflowStep::new("greet", "echo")]);
//!     let result = engine.execute(&definition).await;
//!     println!("{}: {}", result.execution_id, result.status);
//! }
//! ```

pub mod config;
pub mod evaluation;
pub mod hooks;
pub mod logging;
pub mod telemetry;
pub mod workflow;

pub use config::{ConfigError, EngineConfig, HelixConfig, LoggingConfig, TelemetryConfig};
pub use evaluation::{
    DurationEvaluator, EvaluationReport, EvaluatorError, EvaluatorPlugin, EvaluatorRegistry,
    Scores, SuccessRateEvaluator, TokenUsageEvaluator,
};
pub use hooks::{FnHook, Hook, HookContext, HookError, HookEvent, HookRegistry, HookResult};
pub use logging::init_logging;
pub use telemetry::{MetricsAggregator, MetricsSubscriber, TelemetryBridge, TelemetryEvent};
pub use workflow::{
    ExecutionContext, StepError, StepExecutor, StepOutput, StepResult, StepStatus,
    WorkflowDefinition, WorkflowEngine, WorkflowError, WorkflowResult, WorkflowStatus,
    WorkflowStep,
};
