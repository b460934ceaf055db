//! Pareto ranking over evaluated assets.

use std::cmp::Ordering;

use crate::genome::EvoAsset;

/// Assets not dominated by any other asset in `assets`.
///
/// Assets with identical fitness do not dominate each other and are all
/// kept.
pub fn pareto_front(assets: &[EvoAsset]) -> Vec<EvoAsset> {
    assets
        .iter()
        .enumerate()
        .filter(|(i, candidate)| {
            !assets
                .iter()
                .enumerate()
                .any(|(j, other)| *i != j && other.fitness().dominates(candidate.fitness()))
        })
        .map(|(_, asset)| asset.clone())
        .collect()
}

/// Non-dominated sorting: rank 0 is the front, rank 1 the front once rank 0
/// is removed, and so on. Returned in input order.
pub fn pareto_ranks(assets: &[EvoAsset]) -> Vec<usize> {
    let mut ranks = vec![usize::MAX; assets.len()];
    let mut remaining: Vec<usize> = (0..assets.len()).collect();
    let mut rank = 0;
    while !remaining.is_empty() {
        let front: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&i| {
                !remaining
                    .iter()
                    .any(|&j| j != i && assets[j].fitness().dominates(assets[i].fitness()))
            })
            .collect();
        if front.is_empty() {
            // Only reachable with mismatched objective sets.
            for &i in &remaining {
                ranks[i] = rank;
            }
            break;
        }
        for &i in &front {
            ranks[i] = rank;
        }
        remaining.retain(|i| !front.contains(i));
        rank += 1;
    }
    ranks
}

/// Orders assets best first: Pareto rank, then mean score, then older
/// generation.
pub fn rank_assets(assets: &[EvoAsset]) -> Vec<EvoAsset> {
    let ranks = pareto_ranks(assets);
    let mut ranked: Vec<(usize, &EvoAsset)> = ranks.into_iter().zip(assets).collect();
    ranked.sort_by(|(rank_a, a), (rank_b, b)| {
        rank_a
            .cmp(rank_b)
            .then_with(|| b.fitness().mean_score().total_cmp(&a.fitness().mean_score()))
            .then_with(|| a.generation().cmp(&b.generation()))
    });
    ranked.into_iter().map(|(_, asset)| asset.clone()).collect()
}

/// Orders by mean score, breaking ties on objectives won, then older
/// generation. `Greater` means `a` is preferred.
pub fn compare_by_mean(a: &EvoAsset, b: &EvoAsset) -> Ordering {
    a.fitness()
        .mean_score()
        .total_cmp(&b.fitness().mean_score())
        .then_with(|| {
            a.fitness().improvements_over(b.fitness()).cmp(&b.fitness().improvements_over(a.fitness()))
        })
        .then_with(|| b.generation().cmp(&a.generation()))
}
