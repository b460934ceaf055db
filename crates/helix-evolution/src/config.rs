//! Optimizer hyperparameters.
//!
//! Keys are camelCase so the same struct reads from an optimization request
//! body and from a TOML file:
//!
//! ```toml
//! populationSize = 12
//! maxGenerations = 8
//! numIslands = 3
//! seed = 7
//! ```

use std::path::Path;
use std::str::FromStr;

use helix_core::ConfigError;
use serde::{Deserialize, Serialize};

use crate::error::{OptimizerError, Result};

/// Settings for one optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptimizerConfig {
    /// Total population, split evenly across islands; must be a multiple
    /// of `num_islands`.
    pub population_size: usize,
    /// Generations to run after the seed population.
    pub max_generations: u32,
    /// Probability that an offspring is mutated.
    pub mutation_rate: f64,
    /// Probability that an offspring comes from two parents.
    pub crossover_rate: f64,
    /// Best assets per island carried over unchanged each generation.
    pub elite_count: usize,
    /// Independent sub-populations.
    pub num_islands: usize,
    /// Generations between migrations; 0 disables migration.
    pub migration_interval: u32,
    /// Assets each island sends per migration.
    pub migration_count: usize,
    /// Cells per behaviour dimension of the MAP-Elites grid.
    pub grid_size: usize,
    /// Contestants per tournament.
    pub tournament_size: usize,
    /// Variance of the best score below which the run has plateaued.
    pub convergence_threshold: f64,
    /// Generations inspected for plateau detection.
    pub convergence_window: usize,
    /// Seed for reproducible runs; entropy when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            population_size: 20,
            max_generations: 10,
            mutation_rate: 0.3,
            crossover_rate: 0.5,
            elite_count: 2,
            num_islands: 2,
            migration_interval: 3,
            migration_count: 1,
            grid_size: 5,
            tournament_size: 3,
            convergence_threshold: 1e-6,
            convergence_window: 5,
            seed: None,
        }
    }
}

impl OptimizerConfig {
    /// Loads and validates a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    /// Population of each island.
    pub fn population_per_island(&self) -> usize {
        if self.num_islands == 0 { 0 } else { self.population_size / self.num_islands }
    }

    /// Checks value ranges.
    ///
    /// # Errors
    /// [`OptimizerError::NoIslands`] and [`OptimizerError::EmptyPopulation`]
    /// for an unusable population layout, [`OptimizerError::InvalidConfig`]
    /// for any other bad value.
    pub fn validate(&self) -> Result<()> {
        if self.num_islands == 0 {
            return Err(OptimizerError::NoIslands);
        }
        if self.population_per_island() == 0 {
            return Err(OptimizerError::EmptyPopulation(format!(
                "populationSize {} cannot fill {} islands",
                self.population_size, self.num_islands
            )));
        }
        if self.population_size % self.num_islands != 0 {
            return Err(OptimizerError::InvalidConfig(format!(
                "populationSize {} is not a multiple of numIslands {}",
                self.population_size, self.num_islands
            )));
        }
        for (name, rate) in [("mutationRate", self.mutation_rate), ("crossoverRate", self.crossover_rate)] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(OptimizerError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {rate}"
                )));
            }
        }
        if self.elite_count > self.population_per_island() {
            return Err(OptimizerError::InvalidConfig(format!(
                "eliteCount {} exceeds the island population {}",
                self.elite_count,
                self.population_per_island()
            )));
        }
        if self.grid_size == 0 {
            return Err(OptimizerError::InvalidConfig("gridSize must be > 0".to_string()));
        }
        if self.tournament_size == 0 {
            return Err(OptimizerError::InvalidConfig("tournamentSize must be > 0".to_string()));
        }
        if !self.convergence_threshold.is_finite() || self.convergence_threshold < 0.0 {
            return Err(OptimizerError::InvalidConfig(
                "convergenceThreshold must be a non-negative number".to_string(),
            ));
        }
        if self.convergence_window < 2 {
            return Err(OptimizerError::InvalidConfig("convergenceWindow must be >= 2".to_string()));
        }
        Ok(())
    }
}

impl FromStr for OptimizerConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let config: Self = toml::from_str(s)?;
        config.validate().map_err(|e| ConfigError::Validation(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = OptimizerConfig::default();
        assert_eq!(config.population_per_island(), 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_islands() {
        let config = OptimizerConfig { num_islands: 0, ..OptimizerConfig::default() };
        assert_eq!(config.validate(), Err(OptimizerError::NoIslands));
    }

    #[test]
    fn test_population_too_small_for_islands() {
        let config =
            OptimizerConfig { population_size: 3, num_islands: 4, ..OptimizerConfig::default() };
        assert!(matches!(config.validate(), Err(OptimizerError::EmptyPopulation(_))));
    }

    #[test]
    fn test_population_must_split_evenly() {
        let config =
            OptimizerConfig { population_size: 10, num_islands: 3, ..OptimizerConfig::default() };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, OptimizerError::InvalidConfig(_)));
        assert!(err.to_string().contains("multiple"));

        let config =
            OptimizerConfig { population_size: 9, num_islands: 3, ..OptimizerConfig::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rates_out_of_range() {
        let config = OptimizerConfig { mutation_rate: 1.5, ..OptimizerConfig::default() };
        assert!(matches!(config.validate(), Err(OptimizerError::InvalidConfig(_))));
        let config = OptimizerConfig { crossover_rate: f64::NAN, ..OptimizerConfig::default() };
        assert!(matches!(config.validate(), Err(OptimizerError::InvalidConfig(_))));
    }

    #[test]
    fn test_request_json_uses_camel_case() {
        let config: OptimizerConfig =
            serde_json::from_str(r#"{"populationSize": 10, "maxGenerations": 5}"#).unwrap();
        assert_eq!(config.population_size, 10);
        assert_eq!(config.max_generations, 5);
        assert_eq!(config.num_islands, 2);
    }

    #[test]
    fn test_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("optimizer.toml");
        std::fs::write(&path, "populationSize = 12\nnumIslands = 3\nseed = 7\n").unwrap();

        let config = OptimizerConfig::from_file(&path).unwrap();
        assert_eq!(config.population_per_island(), 4);
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn test_invalid_toml_value_is_rejected() {
        let err = "eliteCount = 50".parse::<OptimizerConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
