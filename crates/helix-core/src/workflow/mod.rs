//! Workflow definitions and the execution engine.
//!
//! A [`WorkflowDefinition`] is an ordered list of [`WorkflowStep`]s. The
//! [`WorkflowEngine`] interprets it: guards (`skipIf`, `condition`), retries
//! with backoff, per-attempt timeouts, `onSuccess`/`onError` jumps within a
//! step list, and `parallel`/`sequential` groups. Leaf steps are delegated to
//! the [`StepExecutor`] registered for their type.

pub mod context;
pub mod control_flow;
pub mod definition;
pub mod engine;
pub mod error;
pub mod executor;
pub mod metrics;
mod parallel;

pub use context::{ExecutionContext, StepResult, StepStatus};
pub use control_flow::{ControlFlowError, StepGate, evaluate_expression, should_execute_step};
pub use definition::{
    BackoffStrategy, OptimizationSettings, PARALLEL_STEP_TYPE, RetryPolicy, SEQUENTIAL_STEP_TYPE,
    WorkflowDefinition, WorkflowStep,
};
pub use engine::{WorkflowEngine, WorkflowEngineBuilder, WorkflowResult, WorkflowStatus};
pub use error::{Result, StepError, WorkflowError};
pub use executor::{
    AGENT_STEP_TYPE, AgentStepConfig, AgentStepExecutor, ExecutorRegistry, SamplingClient,
    SamplingRequest, SamplingResponse, StepExecutor, StepOutput, TokenUsage, interpolate,
};
pub use metrics::{
    ErrorRecord, OptimizationSuggestion, StepMetrics, SuggestionKind, SuggestionSeverity,
    WorkflowMetrics, analyze_history,
};
