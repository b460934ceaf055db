//! Island sub-populations.
//!
//! Each island evolves on its own random stream and keeps its own elite
//! grid. Islands only interact through [`migrate`], which the optimizer
//! calls between generations.

use futures::future::join_all;
use rand::Rng;
use rand::rngs::StdRng;
use tracing::debug;

use crate::config::OptimizerConfig;
use crate::crossover::crossover;
use crate::genome::{EvoAsset, Genome, GenomeOrigin};
use crate::grid::EliteGrid;
use crate::mutation::MutationRegistry;
use crate::pareto::{compare_by_mean, rank_assets};
use crate::runner::Scorer;
use crate::selection::tournament;

/// One independently evolving population.
#[derive(Debug)]
pub struct Island {
    id: usize,
    population: Vec<EvoAsset>,
    grid: EliteGrid,
    rng: StdRng,
}

impl Island {
    pub(crate) fn new(id: usize, grid: EliteGrid, rng: StdRng) -> Self {
        Self { id, population: Vec::new(), grid, rng }
    }

    /// Island index.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Current population.
    pub fn population(&self) -> &[EvoAsset] {
        &self.population
    }

    /// The island's elite grid.
    pub fn grid(&self) -> &EliteGrid {
        &self.grid
    }

    /// Highest mean score in the population.
    pub fn best(&self) -> Option<&EvoAsset> {
        self.population.iter().max_by(|a, b| compare_by_mean(a, b))
    }

    /// Fills the island with `size` evaluated genomes.
    ///
    /// Island 0 keeps the base genome itself; every other seed is a
    /// mutation of it. Returns the newly evaluated assets.
    pub(crate) async fn seed(
        &mut self,
        base: &Genome,
        size: usize,
        mutations: &MutationRegistry,
        scorer: &Scorer<'_>,
    ) -> Vec<EvoAsset> {
        let mut genomes = Vec::with_capacity(size);
        if self.id == 0 {
            genomes.push(base.clone());
        }
        while genomes.len() < size {
            let parents = vec![base.id.clone()];
            let genome = match mutations.mutate(&base.definition, &mut self.rng) {
                Some((strategy, definition)) => {
                    Genome::offspring(definition, 0, parents, GenomeOrigin::Mutation { strategy })
                }
                None => Genome::offspring(base.definition.clone(), 0, parents, GenomeOrigin::Reproduction),
            };
            genomes.push(genome);
        }

        let id = self.id;
        let evaluated = join_all(genomes.into_iter().map(|g| scorer.score(g, id))).await;
        for asset in &evaluated {
            self.grid.insert(asset);
        }
        self.population.clone_from(&evaluated);
        debug!(island = id, size = evaluated.len(), "Seeded island");
        evaluated
    }

    /// Replaces the population with elites plus freshly bred offspring.
    ///
    /// The population size is unchanged. Elites are carried over without
    /// re-evaluation. Returns the newly evaluated offspring.
    pub(crate) async fn advance(
        &mut self,
        generation: u32,
        config: &OptimizerConfig,
        mutations: &MutationRegistry,
        scorer: &Scorer<'_>,
    ) -> Vec<EvoAsset> {
        let size = self.population.len();
        let elites: Vec<EvoAsset> =
            rank_assets(&self.population).into_iter().take(config.elite_count.min(size)).collect();

        let mut genomes = Vec::with_capacity(size.saturating_sub(elites.len()));
        while elites.len() + genomes.len() < size {
            let Some(genome) = self.breed(generation, config, mutations) else {
                break;
            };
            genomes.push(genome);
        }

        let id = self.id;
        let offspring = join_all(genomes.into_iter().map(|g| scorer.score(g, id))).await;
        for asset in &offspring {
            self.grid.insert(asset);
        }
        self.population = elites.into_iter().chain(offspring.iter().cloned()).collect();
        debug!(island = id, generation, offspring = offspring.len(), "Advanced island");
        offspring
    }

    fn breed(
        &mut self,
        generation: u32,
        config: &OptimizerConfig,
        mutations: &MutationRegistry,
    ) -> Option<Genome> {
        let population = &self.population;
        let rng = &mut self.rng;

        let first = tournament(population, config.tournament_size, rng)?;
        let mut parent_ids = vec![first.id().to_string()];
        let mut origin = GenomeOrigin::Reproduction;
        let mut definition = first.definition().clone();

        if population.len() > 1
            && rng.gen_bool(config.crossover_rate)
            && let Some(second) = tournament(population, config.tournament_size, rng)
        {
            definition = crossover(first.definition(), second.definition(), rng);
            parent_ids.push(second.id().to_string());
            origin = GenomeOrigin::Crossover;
        }
        if rng.gen_bool(config.mutation_rate)
            && let Some((strategy, mutated)) = mutations.mutate(&definition, rng)
        {
            definition = mutated;
            origin = GenomeOrigin::Mutation { strategy };
        }

        Some(Genome::offspring(definition, generation, parent_ids, origin))
    }

    /// Copies of the `count` best assets.
    pub(crate) fn emigrants(&self, count: usize) -> Vec<EvoAsset> {
        rank_assets(&self.population).into_iter().take(count).collect()
    }

    /// Replaces the worst assets with incoming ones.
    ///
    /// Migrants already present are ignored, so exactly as many assets are
    /// removed as are added.
    pub(crate) fn receive(&mut self, migrants: Vec<EvoAsset>) {
        let size = self.population.len();
        let incoming: Vec<EvoAsset> = migrants
            .into_iter()
            .filter(|m| !self.population.iter().any(|p| p.id() == m.id()))
            .take(size)
            .map(|m| m.relocated(self.id))
            .collect();
        if incoming.is_empty() {
            return;
        }

        let mut ranked = rank_assets(&self.population);
        ranked.truncate(size - incoming.len());
        for asset in &incoming {
            self.grid.insert(asset);
        }
        debug!(island = self.id, migrants = incoming.len(), "Received migrants");
        ranked.extend(incoming);
        self.population = ranked;
    }
}

/// Ring migration: island `i` sends its best `count` assets to island
/// `(i + 1) % n`. All emigrants are chosen before any island receives.
pub(crate) fn migrate(islands: &mut [Island], count: usize) {
    let n = islands.len();
    if n < 2 || count == 0 {
        return;
    }
    let outgoing: Vec<Vec<EvoAsset>> = islands.iter().map(|island| island.emigrants(count)).collect();
    for (from, migrants) in outgoing.into_iter().enumerate() {
        islands[(from + 1) % n].receive(migrants);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::tests::asset;
    use rand::SeedableRng;

    fn island(id: usize, scores: &[f64]) -> Island {
        let mut island = Island::new(id, EliteGrid::new(3, &[]), StdRng::seed_from_u64(id as u64));
        island.population = scores.iter().map(|s| asset(&[("x", *s)], 0).relocated(id)).collect();
        island
    }

    #[test]
    fn test_ring_migration_keeps_sizes() {
        let mut islands = vec![island(0, &[0.1, 0.2, 0.9]), island(1, &[0.3, 0.4, 0.5]), island(2, &[0.6, 0.0, 0.0])];
        for _ in 0..4 {
            migrate(&mut islands, 2);
            for island in &islands {
                assert_eq!(island.population().len(), 3);
                assert!(island.population().iter().all(|a| a.island() == island.id()));
            }
        }
    }

    #[test]
    fn test_migrants_replace_the_worst() {
        let mut islands = vec![island(0, &[0.9, 0.1]), island(1, &[0.5, 0.4])];
        migrate(&mut islands, 1);
        let scores: Vec<f64> = islands[1].population().iter().map(|a| a.fitness().score("x")).collect();
        assert!(scores.contains(&0.9));
        assert!(scores.contains(&0.5));
        assert!(!scores.contains(&0.4));
        // Island 0 got island 1's best in place of its worst.
        let scores: Vec<f64> = islands[0].population().iter().map(|a| a.fitness().score("x")).collect();
        assert!(scores.contains(&0.5) && scores.contains(&0.9));
    }

    #[test]
    fn test_single_island_does_not_migrate() {
        let mut islands = vec![island(0, &[0.9, 0.1])];
        let before: Vec<String> = islands[0].population().iter().map(|a| a.id().to_string()).collect();
        migrate(&mut islands, 1);
        let after: Vec<String> = islands[0].population().iter().map(|a| a.id().to_string()).collect();
        assert_eq!(before, after);
    }
}
