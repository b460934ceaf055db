//! MAP-Elites archive.
//!
//! Each objective is one behaviour dimension. An asset's coordinate on a
//! dimension is its target attainment quantized into `size` bins; every
//! cell keeps only its best occupant.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::genome::EvoAsset;
use crate::objective::Objective;
use crate::pareto::compare_by_mean;

/// Fixed-size grid of elites.
#[derive(Debug, Clone)]
pub struct EliteGrid {
    size: usize,
    objectives: Vec<Objective>,
    cells: HashMap<Vec<usize>, EvoAsset>,
}

impl EliteGrid {
    /// Creates an empty grid with `size` bins per objective.
    pub fn new(size: usize, objectives: &[Objective]) -> Self {
        Self { size: size.max(1), objectives: objectives.to_vec(), cells: HashMap::new() }
    }

    /// Cell coordinates of an asset.
    pub fn cell_of(&self, asset: &EvoAsset) -> Vec<usize> {
        self.objectives
            .iter()
            .map(|objective| {
                let attainment = asset
                    .fitness()
                    .raw
                    .get(&objective.name)
                    .map_or(0.0, |raw| objective.attainment(*raw));
                ((attainment * self.size as f64) as usize).min(self.size - 1)
            })
            .collect()
    }

    /// Offers an asset; returns whether it now occupies its cell.
    pub fn insert(&mut self, asset: &EvoAsset) -> bool {
        let cell = self.cell_of(asset);
        let replace = self
            .cells
            .get(&cell)
            .is_none_or(|current| compare_by_mean(asset, current) == Ordering::Greater);
        if replace {
            self.cells.insert(cell, asset.clone());
        }
        replace
    }

    /// Offers every elite of another grid.
    pub fn merge(&mut self, other: &Self) {
        for elite in other.cells.values() {
            self.insert(elite);
        }
    }

    /// Occupied cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether no cell is occupied.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Total number of cells.
    pub fn capacity(&self) -> f64 {
        (self.size as f64).powi(self.objectives.len() as i32)
    }

    /// Fraction of occupied cells.
    pub fn coverage(&self) -> f64 {
        if self.objectives.is_empty() {
            return 0.0;
        }
        self.cells.len() as f64 / self.capacity()
    }

    /// Sum over occupants of their mean target attainment.
    ///
    /// Always non-negative, and grows with both coverage and quality.
    pub fn qd_score(&self) -> f64 {
        self.cells
            .values()
            .map(|elite| {
                let total: f64 = self
                    .objectives
                    .iter()
                    .map(|o| elite.fitness().raw.get(&o.name).map_or(0.0, |raw| o.attainment(*raw)))
                    .sum();
                total / self.objectives.len().max(1) as f64
            })
            .sum()
    }

    /// Current occupants.
    pub fn elites(&self) -> impl Iterator<Item = &EvoAsset> {
        self.cells.values()
    }
}
