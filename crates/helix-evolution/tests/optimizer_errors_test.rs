//! Runs that cannot start, and scoring failures that must not abort a run.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{CostRunner, base_workflow};
use helix_core::evaluation::{EvaluatorError, EvaluatorPlugin, Scores};
use helix_core::workflow::{WorkflowResult, WorkflowStep};
use helix_core::{DurationEvaluator, EvaluatorRegistry, TelemetryBridge};
use helix_evolution::{
    EvolutionaryOptimizer, OptimizationRequest, OptimizerConfig, OptimizerError,
};

struct Unreliable;

#[async_trait]
impl EvaluatorPlugin for Unreliable {
    fn id(&self) -> &str {
        "unreliable"
    }

    fn name(&self) -> &str {
        "Unreliable"
    }

    async fn evaluate(&self, _result: &WorkflowResult) -> helix_core::evaluation::Result<Scores> {
        Err(EvaluatorError::Failed {
            evaluator: "unreliable".to_string(),
            message: "scoring backend down".to_string(),
        })
    }
}

struct Exploding;

#[async_trait]
impl EvaluatorPlugin for Exploding {
    fn id(&self) -> &str {
        "exploding"
    }

    fn name(&self) -> &str {
        "Exploding"
    }

    async fn evaluate(&self, _result: &WorkflowResult) -> helix_core::evaluation::Result<Scores> {
        panic!("evaluator bug");
    }
}

fn small() -> OptimizerConfig {
    OptimizerConfig { population_size: 4, max_generations: 2, seed: Some(9), ..OptimizerConfig::default() }
}

fn optimizer_with(evaluators: EvaluatorRegistry, telemetry: TelemetryBridge) -> EvolutionaryOptimizer {
    EvolutionaryOptimizer::new(Arc::new(CostRunner::new()), evaluators, telemetry)
}

async fn duration_only() -> EvaluatorRegistry {
    let evaluators = EvaluatorRegistry::new();
    evaluators.register(Arc::new(DurationEvaluator::new(1000.0))).await;
    evaluators
}

#[tokio::test]
async fn test_fatal_errors_are_rejected_and_reported() {
    let telemetry = TelemetryBridge::default();
    let mut rx = telemetry.subscribe();
    let optimizer = optimizer_with(duration_only().await, telemetry);
    let base = || OptimizationRequest::new(base_workflow());

    let cases = vec![
        (base().with_config(small()), OptimizerError::NoObjectives),
        (
            base()
                .with_objective("minimize_duration", 1000.0)
                .with_config(OptimizerConfig { num_islands: 0, ..small() }),
            OptimizerError::NoIslands,
        ),
        (
            base()
                .with_objective("minimize_duration", 1000.0)
                .with_config(OptimizerConfig { population_size: 1, ..small() }),
            OptimizerError::EmptyPopulation("populationSize 1 cannot fill 2 islands".to_string()),
        ),
    ];
    for (request, expected) in &cases {
        assert_eq!(optimizer.optimize(request).await.unwrap_err(), *expected);
    }

    let bad_name = base().with_objective("shorten_duration", 1.0).with_config(small());
    let negative = base().with_objective("minimize_duration", -1000.0).with_config(small());
    for request in [&bad_name, &negative] {
        assert!(matches!(
            optimizer.optimize(request).await,
            Err(OptimizerError::InvalidObjective { .. })
        ));
    }

    let mut broken = base_workflow();
    broken.steps.push(WorkflowStep::new("label", "agent"));
    let duplicate = OptimizationRequest::new(broken)
        .with_objective("minimize_duration", 1000.0)
        .with_config(small());
    assert!(matches!(
        optimizer.optimize(&duplicate).await,
        Err(OptimizerError::InvalidWorkflow(_))
    ));

    let mut errors = 0;
    while let Ok(event) = rx.try_recv() {
        assert_ne!(event.event_name, "optimization:start");
        if event.event_name == "optimization:error" {
            assert!(event.data["error"].as_str().is_some());
            errors += 1;
        }
    }
    assert_eq!(errors, 6);
}

#[tokio::test]
async fn test_no_evaluators_is_fatal() {
    let optimizer = optimizer_with(EvaluatorRegistry::new(), TelemetryBridge::default());
    let request = OptimizationRequest::new(base_workflow())
        .with_objective("minimize_duration", 1000.0)
        .with_config(small());
    assert_eq!(optimizer.optimize(&request).await.unwrap_err(), OptimizerError::NoEvaluators);
}

#[tokio::test]
async fn test_failed_evaluators_score_worst_case_without_aborting() {
    let evaluators = duration_only().await;
    evaluators.register(Arc::new(Unreliable)).await;
    evaluators.register(Arc::new(Exploding)).await;
    let optimizer = optimizer_with(evaluators, TelemetryBridge::default());
    let request = OptimizationRequest::new(base_workflow())
        .with_objective("minimize_duration", 1000.0)
        .with_objective("maximize_accuracy", 0.9)
        .with_config(small());

    let result = optimizer.optimize(&request).await.unwrap();

    assert_eq!(result.stats.total_evaluations, 4);
    let fitness = &result.global_best_fitness;
    assert_eq!(fitness.score("maximize_accuracy"), f64::NEG_INFINITY);
    let reason = &fitness.failures["maximize_accuracy"];
    assert!(reason.contains("scoring backend down"));
    assert!(reason.contains("panicked"));
    assert!(fitness.raw.contains_key("minimize_duration"));
    assert!(!fitness.raw.contains_key("maximize_accuracy"));
}
