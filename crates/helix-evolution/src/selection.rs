//! Tournament selection.

use std::cmp::Ordering;

use rand::Rng;
use rand::rngs::StdRng;

use crate::genome::EvoAsset;

/// Preference between two contestants; `Greater` means `a` wins.
///
/// The genome that beats the other on strictly more objectives wins, which
/// covers Pareto dominance. A full tie goes to the lower generation.
pub fn compare(a: &EvoAsset, b: &EvoAsset) -> Ordering {
    let a_wins = a.fitness().improvements_over(b.fitness());
    let b_wins = b.fitness().improvements_over(a.fitness());
    a_wins.cmp(&b_wins).then_with(|| b.generation().cmp(&a.generation()))
}

/// Draws `size` contestants with replacement and returns the winner.
///
/// `None` only for an empty population.
pub fn tournament<'a>(population: &'a [EvoAsset], size: usize, rng: &mut StdRng) -> Option<&'a EvoAsset> {
    if population.is_empty() {
        return None;
    }
    (0..size.max(1))
        .map(|_| &population[rng.gen_range(0..population.len())])
        .reduce(|best, challenger| if compare(challenger, best) == Ordering::Greater { challenger } else { best })
}
