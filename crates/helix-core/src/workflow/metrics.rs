//! Per-run metrics and advisory suggestions derived from run history.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::{StepStatus, duration_between};
use super::engine::WorkflowStatus;
use crate::config::EngineConfig;

/// Timing and outcome of one settled step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMetrics {
    /// Step identifier.
    pub step_id: String,
    /// Step type.
    pub step_type: String,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub completed_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds; zero for skipped steps.
    pub duration_ms: u64,
    /// Final status.
    pub status: StepStatus,
    /// Attempts made.
    pub attempts: u32,
    /// Group steps are excluded from `totalStepTimeMs` so children are not counted twice.
    pub is_group: bool,
}

/// An error recorded once per failed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    /// Failing step, or `None` for run-level errors.
    pub step_id: Option<String>,
    /// Error message.
    pub message: String,
    /// When it was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Metrics accumulated during one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetrics {
    /// Workflow identifier.
    pub workflow_id: String,
    /// Execution identifier.
    pub execution_id: String,
    /// Run start.
    pub start_time: DateTime<Utc>,
    /// Run end, set when finalized.
    pub end_time: Option<DateTime<Utc>>,
    /// Total run duration.
    pub duration_ms: u64,
    /// Sum of leaf step durations.
    pub total_step_time_ms: u64,
    /// Settled steps in settlement order.
    pub steps: Vec<StepMetrics>,
    /// Errors with timestamps.
    pub errors: Vec<ErrorRecord>,
    /// Final status, `None` while active.
    pub status: Option<WorkflowStatus>,
    /// Evaluator scores attached after the run.
    pub objective_scores: BTreeMap<String, f64>,
}

impl WorkflowMetrics {
    /// Starts metrics for a run.
    pub fn new(workflow_id: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: execution_id.into(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: 0,
            total_step_time_ms: 0,
            steps: Vec::new(),
            errors: Vec::new(),
            status: None,
            objective_scores: BTreeMap::new(),
        }
    }

    /// Records a settled step.
    pub fn record_step(&mut self, step: StepMetrics) {
        self.steps.push(step);
    }

    /// Records an error.
    pub fn record_error(&mut self, step_id: Option<&str>, message: impl Into<String>) {
        self.errors.push(ErrorRecord {
            step_id: step_id.map(str::to_string),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    /// Empty metrics for a parallel branch of this run.
    pub(crate) fn fragment(&self) -> Self {
        Self {
            start_time: self.start_time,
            ..Self::new(self.workflow_id.clone(), self.execution_id.clone())
        }
    }

    /// Appends a branch's steps and errors.
    pub(crate) fn absorb(&mut self, branch: Self) {
        self.steps.extend(branch.steps);
        self.errors.extend(branch.errors);
    }

    /// Stamps the end time, durations and status.
    pub fn finalize(&mut self, status: WorkflowStatus) {
        let end = Utc::now();
        self.end_time = Some(end);
        self.duration_ms = duration_between(self.start_time, end);
        self.total_step_time_ms =
            self.steps.iter().filter(|s| !s.is_group).map(|s| s.duration_ms).sum();
        self.status = Some(status);
    }
}

/// How urgent a suggestion is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionSeverity {
    /// Worth a look.
    Low,
    /// Noticeable cost.
    Medium,
    /// Dominates the run.
    High,
}

/// What a suggestion is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    /// Step duration above the slow threshold.
    SlowStep,
    /// Step fails in at least half of its observed runs.
    FrequentFailure,
}

/// Advisory finding from run history. Never applied automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationSuggestion {
    /// Step the finding is about.
    pub step_id: String,
    /// Finding kind.
    pub kind: SuggestionKind,
    /// Severity.
    pub severity: SuggestionSeverity,
    /// Human-readable description.
    pub message: String,
    /// Mean duration in ms for slow steps, failure rate for failing steps.
    pub observed: f64,
}

#[derive(Default)]
struct StepStats {
    durations: Vec<u64>,
    runs: u32,
    failures: u32,
}

/// Scans history for slow and frequently failing steps.
///
/// Results are ordered by severity (highest first), then step id.
pub fn analyze_history(
    history: &[WorkflowMetrics],
    config: &EngineConfig,
) -> Vec<OptimizationSuggestion> {
    let mut stats: HashMap<&str, StepStats> = HashMap::new();
    for run in history {
        for step in run.steps.iter().filter(|s| !s.is_group) {
            let entry = stats.entry(step.step_id.as_str()).or_default();
            match step.status {
                StepStatus::Completed => {
                    entry.runs += 1;
                    entry.durations.push(step.duration_ms);
                }
                StepStatus::Failed => {
                    entry.runs += 1;
                    entry.failures += 1;
                    entry.durations.push(step.duration_ms);
                }
                _ => {}
            }
        }
    }

    let slow = config.slow_step_threshold_ms;
    let critical = config.critical_step_threshold_ms;
    let mut suggestions = Vec::new();

    for (step_id, stat) in stats {
        if !stat.durations.is_empty() {
            let mean = stat.durations.iter().sum::<u64>() as f64 / stat.durations.len() as f64;
            let max = stat.durations.iter().copied().max().unwrap_or(0);
            let severity = if mean > critical as f64 {
                Some(SuggestionSeverity::High)
            } else if mean > slow as f64 {
                Some(SuggestionSeverity::Medium)
            } else if max > slow {
                Some(SuggestionSeverity::Low)
            } else {
                None
            };
            if let Some(severity) = severity {
                suggestions.push(OptimizationSuggestion {
                    step_id: step_id.to_string(),
                    kind: SuggestionKind::SlowStep,
                    severity,
                    message: format!(
                        "Step '{step_id}' averages {mean:.0}ms (peak {max}ms) over {} runs; consider caching, a faster model or a tighter timeout",
                        stat.durations.len()
                    ),
                    observed: mean,
                });
            }
        }

        if stat.runs >= 2 && stat.failures * 2 >= stat.runs {
            let rate = f64::from(stat.failures) / f64::from(stat.runs);
            suggestions.push(OptimizationSuggestion {
                step_id: step_id.to_string(),
                kind: SuggestionKind::FrequentFailure,
                severity: if rate >= 0.75 {
                    SuggestionSeverity::High
                } else {
                    SuggestionSeverity::Medium
                },
                message: format!(
                    "Step '{step_id}' failed in {} of {} runs; add a retry policy or an onError route",
                    stat.failures, stat.runs
                ),
                observed: rate,
            });
        }
    }

    suggestions.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.step_id.cmp(&b.step_id)));
    suggestions
}
