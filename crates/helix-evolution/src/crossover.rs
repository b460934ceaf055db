//! Uniform crossover between two workflow variants.

use std::collections::HashMap;

use helix_core::workflow::{WorkflowDefinition, WorkflowStep};
use rand::Rng;
use rand::rngs::StdRng;

/// Builds a child from `primary`'s structure.
///
/// For every leaf step that both parents share by id, each config key of
/// `secondary` is taken with probability one half, as are its retry policy
/// and timeout. Steps only one parent has keep `primary`'s version. A child
/// that fails validation falls back to a copy of `primary`.
pub fn crossover(
    primary: &WorkflowDefinition,
    secondary: &WorkflowDefinition,
    rng: &mut StdRng,
) -> WorkflowDefinition {
    let mut donors: HashMap<&str, &WorkflowStep> = HashMap::new();
    secondary.visit_steps(&mut |step| {
        if !step.is_group() {
            donors.insert(step.id.as_str(), step);
        }
    });

    let mut child = primary.clone();
    exchange(&mut child.steps, &donors, rng);
    if child.validate().is_err() {
        return primary.clone();
    }
    child
}

fn exchange(steps: &mut [WorkflowStep], donors: &HashMap<&str, &WorkflowStep>, rng: &mut StdRng) {
    for step in steps {
        if step.is_group() {
            exchange(&mut step.steps, donors, rng);
            continue;
        }
        let Some(donor) = donors.get(step.id.as_str()) else {
            continue;
        };
        for (key, value) in &donor.config {
            if rng.gen_bool(0.5) {
                step.config.insert(key.clone(), value.clone());
            }
        }
        if rng.gen_bool(0.5) {
            step.retry_policy.clone_from(&donor.retry_policy);
        }
        if rng.gen_bool(0.5) {
            step.timeout_ms = donor.timeout_ms;
        }
    }
}
