//! Registry of pluggable run scorers.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::evaluation::error::{EvaluatorError, Result};
use crate::hooks::registry::panic_message;
use crate::workflow::engine::WorkflowResult;

/// Objective name to score.
pub type Scores = BTreeMap<String, f64>;

/// Turns a finished run into named scores.
///
/// Implementations receive the result by shared reference and must be free
/// of side effects on it.
#[async_trait]
pub trait EvaluatorPlugin: Send + Sync {
    /// Unique identifier.
    fn id(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    /// Scores a run.
    async fn evaluate(&self, result: &WorkflowResult) -> Result<Scores>;
}

/// Identity of a registered evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorInfo {
    /// Evaluator id.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Scores from every evaluator plus the evaluators that failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    /// Merged scores; later evaluators win on key collisions.
    pub scores: Scores,
    /// Evaluator id to error message.
    pub failures: BTreeMap<String, String>,
}

impl EvaluationReport {
    /// Whether every evaluator succeeded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Evaluators in registration order.
///
/// Cloning shares the registry.
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    evaluators: Arc<RwLock<Vec<Arc<dyn EvaluatorPlugin>>>>,
}

impl std::fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluatorRegistry").finish_non_exhaustive()
    }
}

impl EvaluatorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an evaluator, replacing one with the same id in place.
    pub async fn register(&self, evaluator: Arc<dyn EvaluatorPlugin>) -> Option<Arc<dyn EvaluatorPlugin>> {
        let mut evaluators = self.evaluators.write().await;
        debug!(evaluator = %evaluator.id(), "Registering evaluator");
        if let Some(slot) = evaluators.iter_mut().find(|e| e.id() == evaluator.id()) {
            return Some(std::mem::replace(slot, evaluator));
        }
        evaluators.push(evaluator);
        None
    }

    /// Removes an evaluator. Returns whether it existed.
    pub async fn unregister(&self, id: &str) -> bool {
        let mut evaluators = self.evaluators.write().await;
        let before = evaluators.len();
        evaluators.retain(|e| e.id() != id);
        evaluators.len() != before
    }

    /// Looks up an evaluator.
    pub async fn get(&self, id: &str) -> Option<Arc<dyn EvaluatorPlugin>> {
        self.evaluators.read().await.iter().find(|e| e.id() == id).cloned()
    }

    /// Registered evaluators in registration order.
    pub async fn list(&self) -> Vec<EvaluatorInfo> {
        self.evaluators
            .read()
            .await
            .iter()
            .map(|e| EvaluatorInfo { id: e.id().to_string(), name: e.name().to_string() })
            .collect()
    }

    /// Whether no evaluator is registered.
    pub async fn is_empty(&self) -> bool {
        self.evaluators.read().await.is_empty()
    }

    /// Number of registered evaluators.
    pub async fn len(&self) -> usize {
        self.evaluators.read().await.len()
    }

    /// Runs one evaluator.
    ///
    /// # Errors
    /// [`EvaluatorError::NotFound`] for an unknown id, otherwise whatever the
    /// evaluator reported. Panics become [`EvaluatorError::Failed`] and
    /// non-finite scores [`EvaluatorError::InvalidResult`].
    pub async fn evaluate(&self, id: &str, result: &WorkflowResult) -> Result<Scores> {
        let evaluator =
            self.get(id).await.ok_or_else(|| EvaluatorError::NotFound(id.to_string()))?;
        run_evaluator(evaluator.as_ref(), result).await
    }

    /// Runs every evaluator, collecting scores and failures.
    pub async fn evaluate_all(&self, result: &WorkflowResult) -> EvaluationReport {
        let evaluators: Vec<Arc<dyn EvaluatorPlugin>> = self.evaluators.read().await.clone();
        let mut report = EvaluationReport::default();
        for evaluator in evaluators {
            match run_evaluator(evaluator.as_ref(), result).await {
                Ok(scores) => report.scores.extend(scores),
                Err(e) => {
                    warn!(evaluator = %evaluator.id(), error = %e, "Evaluator failed");
                    report.failures.insert(evaluator.id().to_string(), e.to_string());
                }
            }
        }
        report
    }
}

async fn run_evaluator(evaluator: &dyn EvaluatorPlugin, result: &WorkflowResult) -> Result<Scores> {
    let scores = AssertUnwindSafe(evaluator.evaluate(result)).catch_unwind().await.map_err(
        |panic| EvaluatorError::Failed {
            evaluator: evaluator.id().to_string(),
            message: format!("panicked: {}", panic_message(panic.as_ref())),
        },
    )??;

    if let Some((name, value)) = scores.iter().find(|(_, v)| !v.is_finite()) {
        return Err(EvaluatorError::InvalidResult {
            evaluator: evaluator.id().to_string(),
            message: format!("score {name} is {value}"),
        });
    }
    Ok(scores)
}
