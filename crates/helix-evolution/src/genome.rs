//! Candidate workflows and their evaluated form.
//!
//! A [`Genome`] is plain content. Once it has been run and scored it is
//! frozen inside an [`EvoAsset`]: the asset shares the genome behind an
//! `Arc` and only exposes read accessors, so evaluated content cannot be
//! edited. Mutation and crossover always build a new genome.

use std::collections::BTreeMap;
use std::sync::Arc;

use helix_core::workflow::WorkflowDefinition;
use helix_core::EvaluationReport;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::objective::Objective;

/// How a genome came to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenomeOrigin {
    /// The unmodified base workflow.
    Seed,
    /// Produced by a mutation strategy.
    Mutation {
        /// Strategy name.
        strategy: String,
    },
    /// Produced by crossover of two parents.
    Crossover,
    /// Copied from a parent without variation.
    Reproduction,
}

/// A candidate workflow variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Genome {
    /// Unique id.
    pub id: String,
    /// Workflow this genome encodes.
    pub definition: WorkflowDefinition,
    /// Generation it was created in.
    pub generation: u32,
    /// Parent genome ids, empty for the seed.
    pub parent_ids: Vec<String>,
    /// Operator that produced it.
    pub origin: GenomeOrigin,
}

impl Genome {
    /// Wraps the base workflow as generation 0.
    pub fn seed(definition: WorkflowDefinition) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            definition,
            generation: 0,
            parent_ids: Vec::new(),
            origin: GenomeOrigin::Seed,
        }
    }

    /// Creates a child genome.
    pub fn offspring(
        definition: WorkflowDefinition,
        generation: u32,
        parent_ids: Vec<String>,
        origin: GenomeOrigin,
    ) -> Self {
        Self { id: Uuid::new_v4().to_string(), definition, generation, parent_ids, origin }
    }
}

/// Scored outcome of one genome.
///
/// Keys are objective names. `scores` are normalized so that higher is
/// always better; an objective that could not be measured scores
/// `f64::NEG_INFINITY` and has an entry in `failures`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fitness {
    /// Metric values as reported by evaluators.
    pub raw: BTreeMap<String, f64>,
    /// Normalized per-objective scores.
    pub scores: BTreeMap<String, f64>,
    /// Objective name to failure reason.
    pub failures: BTreeMap<String, String>,
}

impl Fitness {
    /// Builds a fitness vector from an evaluation report.
    pub fn from_report(objectives: &[Objective], report: &EvaluationReport) -> Self {
        let mut fitness = Self::default();
        for objective in objectives {
            match report.scores.get(&objective.metric).copied().filter(|v| v.is_finite()) {
                Some(raw) => {
                    fitness.raw.insert(objective.name.clone(), raw);
                    fitness.scores.insert(objective.name.clone(), objective.normalize(raw));
                }
                None => {
                    let reason = if report.failures.is_empty() {
                        format!("metric '{}' was not reported", objective.metric)
                    } else {
                        let failed: Vec<String> =
                            report.failures.iter().map(|(id, e)| format!("{id}: {e}")).collect();
                        format!(
                            "metric '{}' missing after evaluator failures ({})",
                            objective.metric,
                            failed.join("; ")
                        )
                    };
                    fitness.scores.insert(objective.name.clone(), f64::NEG_INFINITY);
                    fitness.failures.insert(objective.name.clone(), reason);
                }
            }
        }
        fitness
    }

    /// Score for one objective; worst case when absent.
    pub fn score(&self, objective: &str) -> f64 {
        self.scores.get(objective).copied().unwrap_or(f64::NEG_INFINITY)
    }

    /// Mean of the normalized scores.
    ///
    /// Only used for reporting and tie-breaking; selection compares
    /// objectives individually.
    pub fn mean_score(&self) -> f64 {
        if self.scores.is_empty() {
            return f64::NEG_INFINITY;
        }
        self.scores.values().sum::<f64>() / self.scores.len() as f64
    }

    /// Whether every objective was measured.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Pareto dominance: no worse on every objective, better on one.
    pub fn dominates(&self, other: &Self) -> bool {
        let mut strictly_better = false;
        for (name, score) in &self.scores {
            let theirs = other.score(name);
            if *score < theirs {
                return false;
            }
            strictly_better |= *score > theirs;
        }
        strictly_better
    }

    /// Number of objectives on which `self` beats `other`.
    pub fn improvements_over(&self, other: &Self) -> usize {
        self.scores.iter().filter(|(name, score)| **score > other.score(name)).count()
    }
}

/// An evaluated genome; read-only once created.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvoAsset {
    #[serde(serialize_with = "serialize_genome")]
    genome: Arc<Genome>,
    fitness: Fitness,
    island: usize,
}

fn serialize_genome<S: Serializer>(genome: &Arc<Genome>, serializer: S) -> Result<S::Ok, S::Error> {
    genome.as_ref().serialize(serializer)
}

impl EvoAsset {
    pub(crate) fn new(genome: Genome, fitness: Fitness, island: usize) -> Self {
        Self { genome: Arc::new(genome), fitness, island }
    }

    /// Same genome and fitness, now living on another island.
    pub(crate) fn relocated(&self, island: usize) -> Self {
        Self { genome: Arc::clone(&self.genome), fitness: self.fitness.clone(), island }
    }

    /// Genome id.
    pub fn id(&self) -> &str {
        &self.genome.id
    }

    /// The evaluated genome.
    pub fn genome(&self) -> &Genome {
        &self.genome
    }

    /// The evaluated workflow.
    pub fn definition(&self) -> &WorkflowDefinition {
        &self.genome.definition
    }

    /// Generation the genome was created in.
    pub fn generation(&self) -> u32 {
        self.genome.generation
    }

    /// Scores.
    pub fn fitness(&self) -> &Fitness {
        &self.fitness
    }

    /// Island currently holding the asset.
    pub fn island(&self) -> usize {
        self.island
    }
}
