//! The island-model evolutionary optimizer.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use helix_core::workflow::WorkflowDefinition;
use helix_core::{EvaluatorRegistry, TelemetryBridge};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::OptimizerConfig;
use crate::error::{OptimizerError, Result};
use crate::genome::{EvoAsset, Fitness, Genome};
use crate::grid::EliteGrid;
use crate::island::{Island, migrate};
use crate::mutation::{MutationRegistry, MutationStrategy};
use crate::objective::Objective;
use crate::pareto::{compare_by_mean, pareto_front};
use crate::runner::{Scorer, WorkflowRunner};

/// What to optimize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationRequest {
    /// Workflow the search starts from.
    pub base: WorkflowDefinition,
    /// Objective name (`minimize_duration`) to target value.
    pub objectives: BTreeMap<String, f64>,
    /// Hyperparameters.
    #[serde(default)]
    pub config: OptimizerConfig,
}

impl OptimizationRequest {
    /// Creates a request with default hyperparameters and no objectives.
    pub fn new(base: WorkflowDefinition) -> Self {
        Self { base, objectives: BTreeMap::new(), config: OptimizerConfig::default() }
    }

    /// Adds an objective.
    pub fn with_objective(mut self, name: impl Into<String>, target: f64) -> Self {
        self.objectives.insert(name.into(), target);
        self
    }

    /// Replaces the hyperparameters.
    pub fn with_config(mut self, config: OptimizerConfig) -> Self {
        self.config = config;
        self
    }
}

/// Population statistics after one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStats {
    /// Generation number; 0 is the seed population.
    pub generation: u32,
    /// Highest mean score across all islands.
    pub best: f64,
    /// Average mean score across all islands.
    pub average: f64,
    /// Fraction of distinct workflows in the combined population.
    pub diversity: f64,
    /// Genomes evaluated in this generation.
    pub evaluations: usize,
}

/// Aggregate statistics for a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationStats {
    /// Generations run after seeding.
    pub generations: u32,
    /// Genomes evaluated, seeds included.
    pub total_evaluations: usize,
    /// Fraction of elite-grid cells occupied.
    pub coverage: f64,
    /// Quality-diversity score of the merged elite grid.
    pub qd_score: f64,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Whether the run stopped on a plateau.
    pub converged: bool,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Per-generation statistics, seed population first.
    pub history: Vec<GenerationStats>,
}

/// Outcome of a successful optimization run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    /// Run id, also present on every telemetry event of the run.
    pub optimization_id: String,
    /// Pareto front of everything evaluated, best mean score first.
    pub best_assets: Vec<EvoAsset>,
    /// Highest mean score ever evaluated.
    pub global_best: EvoAsset,
    /// Fitness of `global_best`.
    pub global_best_fitness: Fitness,
    /// Parsed objectives, in key order.
    pub objectives: Vec<Objective>,
    /// Run statistics.
    pub stats: OptimizationStats,
}

/// Searches for workflow variants that improve the given objectives.
///
/// Every candidate is executed by the [`WorkflowRunner`] and scored by the
/// [`EvaluatorRegistry`]. Lifecycle events go to the [`TelemetryBridge`]:
/// `optimization:start`, `optimization:generation`,
/// `optimization:complete` and `optimization:error`.
pub struct EvolutionaryOptimizer {
    runner: Arc<dyn WorkflowRunner>,
    evaluators: EvaluatorRegistry,
    telemetry: TelemetryBridge,
    mutations: MutationRegistry,
}

impl fmt::Debug for EvolutionaryOptimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvolutionaryOptimizer")
            .field("evaluators", &self.evaluators)
            .field("telemetry", &self.telemetry)
            .field("mutations", &self.mutations)
            .finish_non_exhaustive()
    }
}

impl EvolutionaryOptimizer {
    /// Creates an optimizer with the built-in mutation strategies.
    pub fn new(
        runner: Arc<dyn WorkflowRunner>,
        evaluators: EvaluatorRegistry,
        telemetry: TelemetryBridge,
    ) -> Self {
        Self { runner, evaluators, telemetry, mutations: MutationRegistry::with_builtins() }
    }

    /// Replaces the mutation strategies.
    pub fn with_mutations(mut self, mutations: MutationRegistry) -> Self {
        self.mutations = mutations;
        self
    }

    /// Adds a mutation strategy, replacing one with the same name.
    pub fn register_mutation(
        &mut self,
        strategy: Arc<dyn MutationStrategy>,
    ) -> Option<Arc<dyn MutationStrategy>> {
        self.mutations.register(strategy)
    }

    /// Registered mutation strategies.
    pub fn mutations(&self) -> &MutationRegistry {
        &self.mutations
    }

    /// Runs an optimization.
    ///
    /// # Errors
    /// Returns [`OptimizerError`] when the run cannot start: bad objectives
    /// or hyperparameters, an invalid base workflow, or no evaluators. Each
    /// is also reported as `optimization:error`. Finding nothing better
    /// than the base is a successful run.
    pub async fn optimize(&self, request: &OptimizationRequest) -> Result<OptimizationResult> {
        let optimization_id = Uuid::new_v4().to_string();
        match self.run(&optimization_id, request).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(optimization_id = %optimization_id, error = %e, "Optimization failed");
                self.telemetry.emit(
                    "optimization:error",
                    json!({
                        "optimizationId": optimization_id,
                        "workflowId": request.base.id,
                        "error": e.to_string(),
                    }),
                );
                Err(e)
            }
        }
    }

    async fn run(&self, optimization_id: &str, request: &OptimizationRequest) -> Result<OptimizationResult> {
        let config = &request.config;
        let objectives = Objective::parse_all(&request.objectives)?;
        config.validate()?;
        request.base.validate().map_err(|e| OptimizerError::InvalidWorkflow(e.to_string()))?;
        if self.evaluators.is_empty().await {
            return Err(OptimizerError::NoEvaluators);
        }

        let started = Instant::now();
        let started_at = Utc::now();
        info!(
            optimization_id = %optimization_id,
            workflow_id = %request.base.id,
            islands = config.num_islands,
            population = config.population_size,
            "Starting optimization"
        );
        self.telemetry.emit(
            "optimization:start",
            json!({
                "optimizationId": optimization_id,
                "workflowId": request.base.id,
                "objectives": request.objectives,
                "config": config,
            }),
        );

        let scorer =
            Scorer { runner: self.runner.as_ref(), evaluators: &self.evaluators, objectives: &objectives };
        let base = Genome::seed(request.base.clone());
        let per_island = config.population_per_island();
        let mut islands: Vec<Island> = (0..config.num_islands)
            .map(|i| Island::new(i, EliteGrid::new(config.grid_size, &objectives), island_rng(config.seed, i)))
            .collect();

        let seeded = join_all(
            islands.iter_mut().map(|island| island.seed(&base, per_island, &self.mutations, &scorer)),
        )
        .await;
        let mut archive: Vec<EvoAsset> = seeded.into_iter().flatten().collect();
        let mut history = vec![self.record_generation(optimization_id, 0, &islands, archive.len())];

        let mut generations = 0;
        let mut converged = false;
        for generation in 1..=config.max_generations {
            let offspring = join_all(
                islands
                    .iter_mut()
                    .map(|island| island.advance(generation, config, &self.mutations, &scorer)),
            )
            .await;
            let evaluated = offspring.iter().map(Vec::len).sum();
            archive.extend(offspring.into_iter().flatten());

            if config.migration_interval > 0 && generation % config.migration_interval == 0 {
                debug!(optimization_id = %optimization_id, generation, "Migrating between islands");
                migrate(&mut islands, config.migration_count);
            }

            generations = generation;
            history.push(self.record_generation(optimization_id, generation, &islands, evaluated));
            if has_plateaued(&history, config) {
                info!(optimization_id = %optimization_id, generation, "Optimization converged");
                converged = true;
                break;
            }
        }

        let global_best = archive
            .iter()
            .max_by(|a, b| compare_by_mean(a, b))
            .cloned()
            .ok_or_else(|| OptimizerError::EmptyPopulation("no genome was evaluated".to_string()))?;
        let mut best_assets = pareto_front(&archive);
        best_assets.sort_by(|a, b| compare_by_mean(b, a));

        let mut grid = EliteGrid::new(config.grid_size, &objectives);
        for island in &islands {
            grid.merge(island.grid());
        }

        let stats = OptimizationStats {
            generations,
            total_evaluations: archive.len(),
            coverage: grid.coverage(),
            qd_score: grid.qd_score(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            converged,
            started_at,
            history,
        };
        info!(
            optimization_id = %optimization_id,
            generations,
            evaluations = stats.total_evaluations,
            best = global_best.fitness().mean_score(),
            pareto = best_assets.len(),
            "Optimization complete"
        );
        self.telemetry.emit(
            "optimization:complete",
            json!({
                "optimizationId": optimization_id,
                "workflowId": request.base.id,
                "generations": generations,
                "totalEvaluations": stats.total_evaluations,
                "coverage": stats.coverage,
                "qdScore": stats.qd_score,
                "durationMs": stats.duration_ms,
                "converged": converged,
                "bestGenomeId": global_best.id(),
                "bestScore": global_best.fitness().mean_score(),
                "paretoSize": best_assets.len(),
            }),
        );

        Ok(OptimizationResult {
            optimization_id: optimization_id.to_string(),
            global_best_fitness: global_best.fitness().clone(),
            global_best,
            best_assets,
            objectives,
            stats,
        })
    }

    fn record_generation(
        &self,
        optimization_id: &str,
        generation: u32,
        islands: &[Island],
        evaluations: usize,
    ) -> GenerationStats {
        let assets: Vec<&EvoAsset> = islands.iter().flat_map(|island| island.population()).collect();
        let scores: Vec<f64> = assets.iter().map(|a| a.fitness().mean_score()).collect();
        let best = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let average = if scores.is_empty() {
            f64::NEG_INFINITY
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        let distinct: HashSet<String> = assets
            .iter()
            .map(|a| serde_json::to_string(&a.definition().steps).unwrap_or_else(|_| a.id().to_string()))
            .collect();
        let diversity =
            if assets.is_empty() { 0.0 } else { distinct.len() as f64 / assets.len() as f64 };

        let stats = GenerationStats { generation, best, average, diversity, evaluations };
        debug!(
            optimization_id = %optimization_id,
            generation,
            best,
            average,
            diversity,
            "Generation finished"
        );
        self.telemetry.emit(
            "optimization:generation",
            json!({
                "optimizationId": optimization_id,
                "generation": generation,
                "best": best,
                "average": average,
                "diversity": diversity,
                "evaluations": evaluations,
                "populationSizes": islands.iter().map(|i| i.population().len()).collect::<Vec<_>>(),
            }),
        );
        stats
    }
}

/// Per-island random stream.
fn island_rng(seed: Option<u64>, island: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(island as u64)),
        None => StdRng::from_entropy(),
    }
}

/// Whether the best score has been flat over the last window.
fn has_plateaued(history: &[GenerationStats], config: &OptimizerConfig) -> bool {
    let window = config.convergence_window;
    if history.len() < window {
        return false;
    }
    let recent: Vec<f64> = history[history.len() - window..].iter().map(|g| g.best).collect();
    let mean = recent.iter().sum::<f64>() / window as f64;
    let variance = recent.iter().map(|b| (b - mean).powi(2)).sum::<f64>() / window as f64;
    variance < config.convergence_threshold
}
