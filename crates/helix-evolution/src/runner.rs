//! Running and scoring candidate workflows.

use async_trait::async_trait;
use helix_core::workflow::{WorkflowDefinition, WorkflowEngine, WorkflowResult};
use helix_core::EvaluatorRegistry;
use tracing::{debug, warn};

use crate::genome::{EvoAsset, Fitness, Genome};
use crate::objective::Objective;

/// Executes a candidate workflow.
///
/// [`WorkflowEngine`] is the production runner; tests substitute
/// deterministic ones.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    /// Runs a workflow to completion.
    async fn run(&self, definition: &WorkflowDefinition) -> WorkflowResult;
}

#[async_trait]
impl WorkflowRunner for WorkflowEngine {
    async fn run(&self, definition: &WorkflowDefinition) -> WorkflowResult {
        self.execute(definition).await
    }
}

/// Runs genomes and turns the evaluator report into fitness.
pub(crate) struct Scorer<'a> {
    pub(crate) runner: &'a dyn WorkflowRunner,
    pub(crate) evaluators: &'a EvaluatorRegistry,
    pub(crate) objectives: &'a [Objective],
}

impl Scorer<'_> {
    pub(crate) async fn score(&self, genome: Genome, island: usize) -> EvoAsset {
        let result = self.runner.run(&genome.definition).await;
        let report = self.evaluators.evaluate_all(&result).await;
        let fitness = Fitness::from_report(self.objectives, &report);
        debug!(
            genome_id = %genome.id,
            island,
            status = %result.status,
            mean_score = fitness.mean_score(),
            "Evaluated genome"
        );
        if !fitness.is_complete() {
            warn!(genome_id = %genome.id, failures = ?fitness.failures, "Genome scored with failed objectives");
        }
        EvoAsset::new(genome, fitness, island)
    }
}
