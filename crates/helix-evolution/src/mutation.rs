//! Mutation strategies.
//!
//! A strategy is a pure function from a workflow to a new workflow; the
//! input is never edited. The optimizer draws one strategy per mutation,
//! weighted by [`MutationStrategy::weight`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use helix_core::workflow::{RetryPolicy, WorkflowDefinition, WorkflowStep};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

/// Config keys that hold prompt text.
pub const PROMPT_KEYS: [&str; 2] = ["prompt", "systemPrompt"];

const DIRECTIVES: [&str; 6] = [
    "Be concise.",
    "Think step by step.",
    "State the key facts first.",
    "Double-check the result before answering.",
    "Use plain language.",
    "Answer in a structured list.",
];

/// Produces a varied copy of a workflow.
pub trait MutationStrategy: Send + Sync {
    /// Strategy name, recorded in the offspring's origin.
    fn name(&self) -> &str;

    /// Relative draw weight.
    fn weight(&self) -> f64 {
        1.0
    }

    /// Returns a mutated copy. Returning an unchanged copy is allowed when
    /// nothing applies.
    fn mutate(&self, definition: &WorkflowDefinition, rng: &mut StdRng) -> WorkflowDefinition;
}

/// Rewrites prompt text by adding or dropping an instruction.
#[derive(Debug, Clone, Default)]
pub struct PromptMutation;

impl MutationStrategy for PromptMutation {
    fn name(&self) -> &str {
        "prompt"
    }

    fn weight(&self) -> f64 {
        0.35
    }

    fn mutate(&self, definition: &WorkflowDefinition, rng: &mut StdRng) -> WorkflowDefinition {
        let mut child = definition.clone();
        let mut targets: Vec<(&mut WorkflowStep, &str)> = Vec::new();
        for step in leaf_steps_mut(&mut child.steps) {
            let key = PROMPT_KEYS
                .iter()
                .copied()
                .find(|k| step.config.get(*k).is_some_and(Value::is_string));
            if let Some(key) = key {
                targets.push((step, key));
            }
        }
        if !targets.is_empty() {
            let (step, key) = targets.swap_remove(rng.gen_range(0..targets.len()));
            let text = step.config.get(key).and_then(Value::as_str).unwrap_or_default();
            let rewritten = rewrite_prompt(text, rng);
            debug!(step_id = %step.id, key, "Rewriting prompt");
            step.config.insert(key.to_string(), Value::String(rewritten));
        }
        child
    }
}

fn rewrite_prompt(text: &str, rng: &mut StdRng) -> String {
    let present: Vec<&str> = DIRECTIVES.iter().copied().filter(|d| text.contains(d)).collect();
    let absent: Vec<&str> = DIRECTIVES.iter().copied().filter(|d| !text.contains(d)).collect();
    let drop = !present.is_empty() && (absent.is_empty() || rng.gen_bool(0.5));
    if drop {
        let directive = present[rng.gen_range(0..present.len())];
        let spaced = format!(" {directive}");
        let stripped = if text.contains(&spaced) {
            text.replacen(&spaced, "", 1)
        } else {
            text.replacen(directive, "", 1)
        };
        stripped.trim().to_string()
    } else {
        let directive = absent[rng.gen_range(0..absent.len())];
        let base = text.trim_end();
        if base.is_empty() { directive.to_string() } else { format!("{base} {directive}") }
    }
}

/// Perturbs one numeric parameter (`temperature`, `maxTokens`, costs,
/// limits) or, when a workflow has none, a retry budget.
#[derive(Debug, Clone, Default)]
pub struct ParameterMutation;

impl MutationStrategy for ParameterMutation {
    fn name(&self) -> &str {
        "parameter"
    }

    fn weight(&self) -> f64 {
        0.35
    }

    fn mutate(&self, definition: &WorkflowDefinition, rng: &mut StdRng) -> WorkflowDefinition {
        let mut child = definition.clone();
        let mut leaves = leaf_steps_mut(&mut child.steps);
        let mut numeric: Vec<(usize, String)> = Vec::new();
        for (index, step) in leaves.iter().enumerate() {
            for (key, value) in &step.config {
                if value.is_number() {
                    numeric.push((index, key.clone()));
                }
            }
        }

        if let Some((index, key)) = numeric.choose(rng).cloned() {
            let step = &mut *leaves[index];
            if let Some(value) = step.config.get(&key).and_then(|v| perturb(&key, v, rng)) {
                debug!(step_id = %step.id, key = %key, value = %value, "Tuning parameter");
                step.config.insert(key, value);
            }
        } else if !leaves.is_empty() {
            let index = rng.gen_range(0..leaves.len());
            let step = &mut *leaves[index];
            let policy = step.effective_retry_policy();
            let max_attempts = if rng.gen_bool(0.5) {
                policy.max_attempts.saturating_add(1).min(5)
            } else {
                policy.max_attempts.saturating_sub(1).max(1)
            };
            debug!(step_id = %step.id, max_attempts, "Tuning retry budget");
            step.retry_policy = Some(RetryPolicy { max_attempts, ..policy });
        }
        child
    }
}

fn perturb(key: &str, value: &Value, rng: &mut StdRng) -> Option<Value> {
    let factor = rng.gen_range(0.8..1.25);
    if let Some(n) = value.as_u64() {
        let scaled = ((n as f64) * factor).round().max(1.0) as u64;
        let scaled = match scaled.cmp(&n) {
            std::cmp::Ordering::Equal if factor >= 1.0 => n.saturating_add(1),
            std::cmp::Ordering::Equal => n.saturating_sub(1).max(1),
            _ => scaled,
        };
        return Some(json!(scaled));
    }
    let x = value.as_f64()?;
    let mut y = if x == 0.0 { rng.gen_range(0.0..0.2) } else { x * factor };
    match key {
        "temperature" => y = y.clamp(0.0, 2.0),
        "topP" => y = y.clamp(0.0, 1.0),
        _ => {}
    }
    Some(json!(y))
}

#[derive(Debug, Clone, Copy)]
enum StructuralOp {
    Swap,
    Parallelize,
    Flatten,
}

/// Changes the step graph: reorders independent steps, fans two of them out
/// into a parallel group, or dissolves a group.
///
/// Only steps without guards or jumps, and which nothing jumps to, are
/// moved. A result that fails validation is discarded.
#[derive(Debug, Clone, Default)]
pub struct StructuralMutation;

impl MutationStrategy for StructuralMutation {
    fn name(&self) -> &str {
        "structural"
    }

    fn weight(&self) -> f64 {
        0.15
    }

    fn mutate(&self, definition: &WorkflowDefinition, rng: &mut StdRng) -> WorkflowDefinition {
        let mut targeted = HashSet::new();
        definition.visit_steps(&mut |step| {
            targeted.extend(step.on_success.iter().cloned());
            targeted.extend(step.on_error.iter().cloned());
        });
        let is_free = |step: &WorkflowStep| {
            step.condition.is_none()
                && step.skip_if.is_none()
                && step.on_success.is_none()
                && step.on_error.is_none()
                && !targeted.contains(&step.id)
        };

        let mut ops = [StructuralOp::Swap, StructuralOp::Parallelize, StructuralOp::Flatten];
        ops.shuffle(rng);
        let mut child = definition.clone();
        let steps = &mut child.steps;
        for op in ops {
            let applied = match op {
                StructuralOp::Swap => {
                    let pairs: Vec<usize> = (0..steps.len().saturating_sub(1))
                        .filter(|&i| is_free(&steps[i]) && is_free(&steps[i + 1]))
                        .collect();
                    if let Some(&i) = pairs.choose(rng) {
                        steps.swap(i, i + 1);
                        true
                    } else {
                        false
                    }
                }
                StructuralOp::Parallelize => {
                    let pairs: Vec<usize> = (0..steps.len().saturating_sub(1))
                        .filter(|&i| {
                            !steps[i].is_group()
                                && !steps[i + 1].is_group()
                                && is_free(&steps[i])
                                && is_free(&steps[i + 1])
                        })
                        .collect();
                    if let Some(&i) = pairs.choose(rng) {
                        let pair: Vec<WorkflowStep> = steps.drain(i..i + 2).collect();
                        let id = format!("parallel-{}", &Uuid::new_v4().simple().to_string()[..8]);
                        steps.insert(i, WorkflowStep::parallel(id, pair));
                        true
                    } else {
                        false
                    }
                }
                StructuralOp::Flatten => {
                    let groups: Vec<usize> = (0..steps.len())
                        .filter(|&i| {
                            steps[i].is_group()
                                && is_free(&steps[i])
                                && steps[i].steps.iter().all(|c| is_free(c) && !c.is_group())
                        })
                        .collect();
                    if let Some(&i) = groups.choose(rng) {
                        let group = steps.remove(i);
                        for (offset, c) in group.steps.into_iter().enumerate() {
                            steps.insert(i + offset, c);
                        }
                        true
                    } else {
                        false
                    }
                }
            };
            if applied {
                debug!(op = ?op, "Applied structural mutation");
                break;
            }
        }

        if child.validate().is_err() {
            return definition.clone();
        }
        child
    }
}

/// Applies two different strategies in sequence.
pub struct HybridMutation {
    parts: Vec<Arc<dyn MutationStrategy>>,
}

impl Default for HybridMutation {
    fn default() -> Self {
        Self::new(vec![
            Arc::new(PromptMutation),
            Arc::new(ParameterMutation),
            Arc::new(StructuralMutation),
        ])
    }
}

impl HybridMutation {
    /// Combines the given strategies.
    pub fn new(parts: Vec<Arc<dyn MutationStrategy>>) -> Self {
        Self { parts }
    }
}

impl fmt::Debug for HybridMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.parts.iter().map(|p| p.name()).collect();
        f.debug_struct("HybridMutation").field("parts", &names).finish()
    }
}

impl MutationStrategy for HybridMutation {
    fn name(&self) -> &str {
        "hybrid"
    }

    fn weight(&self) -> f64 {
        0.15
    }

    fn mutate(&self, definition: &WorkflowDefinition, rng: &mut StdRng) -> WorkflowDefinition {
        let chosen: Vec<Arc<dyn MutationStrategy>> =
            self.parts.choose_multiple(rng, 2).cloned().collect();
        chosen.iter().fold(definition.clone(), |current, part| part.mutate(&current, rng))
    }
}

/// Strategies available to the optimizer.
#[derive(Clone)]
pub struct MutationRegistry {
    strategies: Vec<Arc<dyn MutationStrategy>>,
}

impl Default for MutationRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for MutationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationRegistry").field("strategies", &self.names()).finish()
    }
}

impl MutationRegistry {
    /// A registry with no strategies.
    pub fn empty() -> Self {
        Self { strategies: Vec::new() }
    }

    /// The prompt, parameter, structural and hybrid strategies.
    pub fn with_builtins() -> Self {
        Self {
            strategies: vec![
                Arc::new(PromptMutation),
                Arc::new(ParameterMutation),
                Arc::new(StructuralMutation),
                Arc::new(HybridMutation::default()),
            ],
        }
    }

    /// Adds a strategy, replacing one with the same name.
    pub fn register(&mut self, strategy: Arc<dyn MutationStrategy>) -> Option<Arc<dyn MutationStrategy>> {
        if let Some(slot) = self.strategies.iter_mut().find(|s| s.name() == strategy.name()) {
            return Some(std::mem::replace(slot, strategy));
        }
        self.strategies.push(strategy);
        None
    }

    /// Registered strategy names.
    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Number of strategies.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether no strategy is registered.
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Draws a strategy by weight. `None` when empty or all weights are zero.
    pub fn pick(&self, rng: &mut StdRng) -> Option<Arc<dyn MutationStrategy>> {
        let weights = self.strategies.iter().map(|s| s.weight().max(0.0));
        let index = WeightedIndex::new(weights).ok()?.sample(rng);
        self.strategies.get(index).cloned()
    }

    /// Draws a strategy and applies it, returning its name and the result.
    pub fn mutate(
        &self,
        definition: &WorkflowDefinition,
        rng: &mut StdRng,
    ) -> Option<(String, WorkflowDefinition)> {
        let strategy = self.pick(rng)?;
        Some((strategy.name().to_string(), strategy.mutate(definition, rng)))
    }
}

/// Leaf steps in document order.
fn leaf_steps_mut(steps: &mut [WorkflowStep]) -> Vec<&mut WorkflowStep> {
    let mut leaves = Vec::new();
    collect_leaves(steps, &mut leaves);
    leaves
}

fn collect_leaves<'a>(steps: &'a mut [WorkflowStep], out: &mut Vec<&'a mut WorkflowStep>) {
    for step in steps {
        if step.is_group() {
            collect_leaves(&mut step.steps, out);
        } else {
            out.push(step);
        }
    }
}
