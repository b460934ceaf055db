//! Helix Evolution - island-model multi-objective workflow optimization.
//!
//! The optimizer searches variants of a workflow (prompt text, numeric
//! parameters, step structure) and keeps the ones that improve a set of
//! objectives such as `minimize_duration` or `maximize_success_rate`.
//! Objectives are compared one by one, never collapsed into a weighted
//! sum, and the result is the Pareto front of everything evaluated.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use helix_core::{
//!     DurationEvaluator, EvaluatorRegistry, SuccessRateEvaluator, TelemetryBridge, WorkflowEngine,
//! };
//! use helix_core::workflow::{WorkflowDefinition, WorkflowStep};
//! use helix_evolution::{EvolutionaryOptimizer, OptimizationRequest, OptimizerConfig};
//!
//! # async fn run(engine: WorkflowEngine) -> Result<(), helix_evolution::OptimizerError> {
//! let evaluators = EvaluatorRegistry::new();
//! evaluators.register(Arc::new(DurationEvaluator::new(1000.0))).await;
//! evaluators.register(Arc::new(SuccessRateEvaluator)).await;
//!
//! let optimizer =
//!     EvolutionaryOptimizer::new(Arc::new(engine), evaluators, TelemetryBridge::default());
//! let base = WorkflowDefinition::new("triage", "Triage", vec![WorkflowStep::new("draft", "agent")]);
//! let request = OptimizationRequest::new(base)
//!     .with_objective("minimize_duration", 1000.0)
//!     .with_objective("maximize_success_rate", 1.0)
//!     .with_config(OptimizerConfig { max_generations: 5, ..OptimizerConfig::default() });
//!
//! let result = optimizer.optimize(&request).await?;
//! println!("{} Pareto-optimal variants", result.best_assets.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crossover;
pub mod error;
pub mod genome;
pub mod grid;
pub mod island;
pub mod mutation;
pub mod objective;
pub mod optimizer;
pub mod pareto;
pub mod runner;
pub mod selection;

pub use config::OptimizerConfig;
pub use crossover::crossover;
pub use error::{OptimizerError, Result};
pub use genome::{EvoAsset, Fitness, Genome, GenomeOrigin};
pub use grid::EliteGrid;
pub use island::Island;
pub use mutation::{
    HybridMutation, MutationRegistry, MutationStrategy, ParameterMutation, PromptMutation,
    StructuralMutation,
};
pub use objective::{Direction, Objective};
pub use optimizer::{
    EvolutionaryOptimizer, GenerationStats, OptimizationRequest, OptimizationResult,
    OptimizationStats,
};
pub use pareto::{pareto_front, pareto_ranks, rank_assets};
pub use runner::WorkflowRunner;
pub use selection::tournament;
