//! Parallel step groups.
//!
//! Every child of a `parallel` group starts at once on its own forked
//! context; the group settles when all children have settled. A failing
//! child never cancels its siblings. Branch results, statuses, variables and
//! metrics are merged back in child order.

use futures::future::join_all;
use tracing::debug;

use super::definition::WorkflowStep;
use super::engine::{EngineInner, RunState, StepOutcome, group_summary};
use super::error::{StepError, WorkflowError};
use super::executor::StepOutput;

impl EngineInner {
    /// Runs the children of a parallel group concurrently.
    ///
    /// The group fails when any non-optional child fails. Fatal errors from
    /// any branch (broken control flow, cancellation) are returned after all
    /// branches have settled.
    pub(super) async fn run_parallel_group(
        &self,
        group: &WorkflowStep,
        state: &mut RunState,
    ) -> Result<Result<StepOutput, StepError>, WorkflowError> {
        let baseline = state.ctx.variables.clone();
        debug!(group_id = %group.id, children = group.steps.len(), "Starting parallel group");

        let branches = group.steps.iter().map(|child| {
            let mut branch =
                RunState { ctx: state.ctx.fork(), metrics: state.metrics.fragment() };
            async move {
                let outcome = self.run_step(child, &mut branch).await;
                (branch, outcome)
            }
        });
        let settled = join_all(branches).await;

        let mut failures = Vec::new();
        let mut fatal = None;
        for (child, (branch, outcome)) in group.steps.iter().zip(settled) {
            state.ctx.absorb(branch.ctx, &baseline);
            state.metrics.absorb(branch.metrics);
            match outcome {
                Ok(StepOutcome::Completed | StepOutcome::Skipped) => {}
                Ok(StepOutcome::Failed(message)) if child.optional => {
                    debug!(step_id = %child.id, error = %message, "Optional child failed");
                }
                Ok(StepOutcome::Failed(message)) => failures.push(format!("{}: {message}", child.id)),
                Err(e) => {
                    fatal.get_or_insert(e);
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        if failures.is_empty() {
            Ok(Ok(StepOutput::new(group_summary(group, &state.ctx))))
        } else {
            Ok(Err(StepError::Execution(format!(
                "parallel group {} had failing children: {}",
                group.id,
                failures.join("; ")
            ))))
        }
    }
}
