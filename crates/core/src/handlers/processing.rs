//! Forward-execution handler: the core processing loop.

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::SagaContext;
use crate::registry::StateHandlerRegistry;
use crate::status::{SagaStatus, StepStatus};
use crate::step::StepResult;

use super::{persist_step_log, persist_transition, Flow, HandlerDeps, StateHandler};

/// Handler for `PROCESSING` (and the parked `PENDING`, which it owns but
/// never advances; a parked saga re-enters through `resume`).
///
/// One invocation executes one step: advance the cursor, execute, map the
/// outcome onto a transition. A succeeded non-final step leaves the status
/// at `PROCESSING`, and the dispatch loop re-enters this handler. That is
/// the self-loop edge of the state machine.
pub struct ProcessingHandler;

pub fn register(registry: &mut StateHandlerRegistry) {
    registry.register(Arc::new(ProcessingHandler));
}

#[async_trait]
impl StateHandler for ProcessingHandler {
    fn states(&self) -> &'static [SagaStatus] {
        &[SagaStatus::Processing, SagaStatus::Pending]
    }

    async fn process(&self, ctx: &mut SagaContext, deps: &HandlerDeps) -> Flow {
        // A parked saga only moves again via a callback or recovery.
        if ctx.status().is_pending() {
            return Flow::Suspend;
        }

        let step = match ctx.next_step() {
            Some(step) => step,
            None => {
                // Cursor exhausted without reaching SUCCESS: either every
                // step already succeeded (re-entry) or the invariant broke.
                if ctx.is_last_step() {
                    return self.handle_success(ctx, deps).await;
                }
                tracing::error!(
                    order_id = ctx.order_id(),
                    "forward cursor exhausted with unfinished steps"
                );
                ctx.set_status(SagaStatus::SystemError);
                return persist_transition(deps, ctx).await.unwrap_or(Flow::Continue);
            }
        };

        tracing::info!(
            order_id = ctx.order_id(),
            step_id = step.step_id(),
            "executing step"
        );
        let result = step.execute().await;
        persist_step_log(deps, &step).await;

        match result.status() {
            StepStatus::Succeeded => {
                ctx.set_last_result(result);
                if ctx.is_last_step() {
                    self.handle_success(ctx, deps).await
                } else {
                    // Status stays PROCESSING; the loop re-enters for the
                    // next step.
                    Flow::Continue
                }
            }

            StepStatus::Completed => {
                // Already done in an earlier attempt (idempotent re-entry).
                // The cursor advanced, so the step stays in the audit trail;
                // nothing more happens this attempt.
                tracing::info!(
                    order_id = ctx.order_id(),
                    step_id = step.step_id(),
                    "step already completed, not re-executing"
                );
                ctx.set_last_result(result);
                Flow::Suspend
            }

            StepStatus::Pending | StepStatus::Unknown => {
                // PENDING: awaiting a callback. UNKNOWN: parked so the
                // recovery job can query later.
                ctx.set_status(SagaStatus::Pending);
                ctx.set_last_result(result);
                persist_transition(deps, ctx).await.unwrap_or(Flow::Suspend)
            }

            StepStatus::Executing | StepStatus::Processing | StepStatus::Skipped => {
                // Unexpected from a completed call; park for recovery.
                tracing::warn!(
                    order_id = ctx.order_id(),
                    step_id = step.step_id(),
                    status = %result.status(),
                    "unexpected in-flight status from step, parking"
                );
                ctx.set_status(SagaStatus::Pending);
                ctx.set_last_result(result);
                persist_transition(deps, ctx).await.unwrap_or(Flow::Suspend)
            }

            StepStatus::Timeout | StepStatus::Failed | StepStatus::Rejected => {
                tracing::warn!(
                    order_id = ctx.order_id(),
                    step_id = step.step_id(),
                    status = %result.status(),
                    error = result.error_message().unwrap_or_default(),
                    "step failed"
                );
                self.handle_failure(ctx, deps, result).await
            }

            StepStatus::NeedsCompensation
            | StepStatus::Compensating
            | StepStatus::Compensated
            | StepStatus::CompensationFailed => {
                tracing::error!(
                    order_id = ctx.order_id(),
                    step_id = step.step_id(),
                    status = %result.status(),
                    "compensation status during forward flow"
                );
                ctx.set_status(SagaStatus::SystemError);
                persist_transition(deps, ctx).await.unwrap_or(Flow::Continue)
            }
        }
    }
}

impl ProcessingHandler {
    /// All forward steps completed.
    async fn handle_success(&self, ctx: &mut SagaContext, deps: &HandlerDeps) -> Flow {
        tracing::info!(order_id = ctx.order_id(), "all steps completed");
        ctx.set_status(SagaStatus::Success);
        persist_transition(deps, ctx).await.unwrap_or(Flow::Continue)
    }

    /// A forward step failed: decide between FAILED, MANUAL_REVIEW,
    /// REVERTING and REVERT_FAILED, then hand off.
    async fn handle_failure(
        &self,
        ctx: &mut SagaContext,
        deps: &HandlerDeps,
        result: StepResult,
    ) -> Flow {
        ctx.set_last_result(result);
        let next = ctx.evaluate_failed_step();
        tracing::info!(order_id = ctx.order_id(), next = %next, "step failure evaluated");
        ctx.set_status(next);
        persist_transition(deps, ctx).await.unwrap_or(Flow::Continue)
    }
}
