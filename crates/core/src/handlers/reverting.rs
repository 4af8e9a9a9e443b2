//! Compensation handler: undoes succeeded forward steps in reverse order.

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::SagaContext;
use crate::registry::StateHandlerRegistry;
use crate::status::{SagaStatus, StepStatus};

use super::{persist_step_log, persist_transition, Flow, HandlerDeps, StateHandler};

/// Handler for `REVERTING` (and the parked `REVERTING_PENDING`).
///
/// On first entry it builds the compensation sequence: one paired
/// compensation step per succeeded forward step that requires one, in
/// reverse execution order. Each invocation then executes one compensation
/// step; the dispatch loop re-enters while more remain.
pub struct RevertingHandler;

pub fn register(registry: &mut StateHandlerRegistry) {
    registry.register(Arc::new(RevertingHandler));
}

#[async_trait]
impl StateHandler for RevertingHandler {
    fn states(&self) -> &'static [SagaStatus] {
        &[SagaStatus::Reverting, SagaStatus::RevertingPending]
    }

    async fn process(&self, ctx: &mut SagaContext, deps: &HandlerDeps) -> Flow {
        // A parked compensation only moves again via callback or recovery.
        if ctx.status().is_pending() {
            return Flow::Suspend;
        }

        if ctx.compensation_steps().is_empty() {
            let factory = Arc::clone(&deps.factory);
            ctx.build_compensation_steps(|forward| factory.compensation_step(forward));

            if ctx.compensation_steps().is_empty() {
                tracing::info!(order_id = ctx.order_id(), "no steps need compensation");
                return self.handle_reverted(ctx, deps).await;
            }
            tracing::info!(
                order_id = ctx.order_id(),
                count = ctx.compensation_steps().len(),
                "built compensation steps"
            );
        }

        let step = match ctx.next_compensation_step() {
            Some(step) => step,
            None => return self.handle_reverted(ctx, deps).await,
        };

        tracing::info!(
            order_id = ctx.order_id(),
            step_id = step.step_id(),
            "executing compensation step"
        );
        let result = step.execute().await;
        persist_step_log(deps, &step).await;

        match result.status() {
            StepStatus::Succeeded | StepStatus::Completed => {
                ctx.set_last_result(result);
                if ctx.has_more_compensation_steps() {
                    // Status stays REVERTING; the loop re-enters.
                    Flow::Continue
                } else {
                    self.handle_reverted(ctx, deps).await
                }
            }

            StepStatus::Pending | StepStatus::Unknown => {
                ctx.set_status(SagaStatus::RevertingPending);
                ctx.set_last_result(result);
                persist_transition(deps, ctx).await.unwrap_or(Flow::Suspend)
            }

            StepStatus::Timeout | StepStatus::Failed | StepStatus::Rejected => {
                tracing::error!(
                    order_id = ctx.order_id(),
                    step_id = step.step_id(),
                    error = result.error_message().unwrap_or_default(),
                    "compensation step failed, manual intervention required"
                );
                ctx.set_status(SagaStatus::RevertFailed);
                ctx.set_last_result(result);
                persist_transition(deps, ctx).await.unwrap_or(Flow::Continue)
            }

            _ => {
                tracing::error!(
                    order_id = ctx.order_id(),
                    step_id = step.step_id(),
                    status = %result.status(),
                    "unexpected status from compensation step"
                );
                ctx.set_status(SagaStatus::SystemError);
                persist_transition(deps, ctx).await.unwrap_or(Flow::Continue)
            }
        }
    }
}

impl RevertingHandler {
    /// Every compensation completed.
    async fn handle_reverted(&self, ctx: &mut SagaContext, deps: &HandlerDeps) -> Flow {
        tracing::info!(order_id = ctx.order_id(), "all compensations complete");
        ctx.set_status(SagaStatus::Reverted);
        persist_transition(deps, ctx).await.unwrap_or(Flow::Continue)
    }
}
