//! Resume handler: re-enters a saga after a callback, restart or recovery
//! sweep, using query-before-execute to learn what happened while the
//! process was away.

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::SagaContext;
use crate::registry::StateHandlerRegistry;
use crate::status::{SagaStatus, StepStatus};
use crate::step::SagaStep;

use super::{persist_step_log, persist_transition, Flow, HandlerDeps, StateHandler};

/// Handler for `RESUMING`, `RESUMING_REVERTING` and the recovery variants
/// `RECOVERY_PROCESSING` / `RECOVERY_REVERTING`.
///
/// The step under the active cursor may have been abandoned mid-flight:
/// submitted but unacknowledged, completed while the process was down, or
/// never dispatched. The external system holds the truth, so the handler
/// queries first and only re-executes when the outcome stays `UNKNOWN`,
/// which the step idempotency contract makes safe.
pub struct ResumingHandler;

pub fn register(registry: &mut StateHandlerRegistry) {
    registry.register(Arc::new(ResumingHandler));
}

#[async_trait]
impl StateHandler for ResumingHandler {
    fn states(&self) -> &'static [SagaStatus] {
        &[
            SagaStatus::Resuming,
            SagaStatus::ResumingReverting,
            SagaStatus::RecoveryProcessing,
            SagaStatus::RecoveryReverting,
        ]
    }

    async fn process(&self, ctx: &mut SagaContext, deps: &HandlerDeps) -> Flow {
        tracing::info!(
            order_id = ctx.order_id(),
            status = %ctx.status(),
            "resuming saga"
        );

        let step = match ctx.current_step() {
            Some(step) => step,
            None => return self.handle_no_current_step(ctx, deps).await,
        };

        tracing::info!(
            order_id = ctx.order_id(),
            step_id = step.step_id(),
            "querying step status"
        );
        let query_result = step.query().await;

        match query_result.status() {
            StepStatus::Succeeded => {
                step.update_status(query_result.clone());
                persist_step_log(deps, &step).await;
                ctx.set_last_result(query_result);
                self.continue_flow(ctx, deps).await
            }

            StepStatus::Failed | StepStatus::Rejected => {
                step.update_status(query_result.clone());
                persist_step_log(deps, &step).await;
                ctx.set_last_result(query_result);
                self.handle_step_failure(ctx, deps).await
            }

            StepStatus::Pending => {
                // Still in flight on the remote side; park again.
                let parked = if ctx.is_reverting() {
                    SagaStatus::RevertingPending
                } else {
                    SagaStatus::Pending
                };
                ctx.set_status(parked);
                persist_transition(deps, ctx).await.unwrap_or(Flow::Suspend)
            }

            StepStatus::Unknown => self.retry_step(ctx, deps, &step).await,

            other => {
                tracing::error!(
                    order_id = ctx.order_id(),
                    step_id = step.step_id(),
                    status = %other,
                    "unexpected status from step query"
                );
                ctx.set_status(SagaStatus::SystemError);
                persist_transition(deps, ctx).await.unwrap_or(Flow::Continue)
            }
        }
    }
}

impl ResumingHandler {
    /// The current step is settled; pick the next stop in the active flow.
    async fn continue_flow(&self, ctx: &mut SagaContext, deps: &HandlerDeps) -> Flow {
        let next = if ctx.is_last_step() {
            if ctx.is_reverting() {
                SagaStatus::Reverted
            } else {
                SagaStatus::Success
            }
        } else if ctx.is_reverting() {
            SagaStatus::Reverting
        } else {
            SagaStatus::Processing
        };
        ctx.set_status(next);
        persist_transition(deps, ctx).await.unwrap_or(Flow::Continue)
    }

    /// The current step failed while the process was away.
    async fn handle_step_failure(&self, ctx: &mut SagaContext, deps: &HandlerDeps) -> Flow {
        let next = if ctx.is_reverting() {
            SagaStatus::RevertFailed
        } else {
            ctx.evaluate_failed_step()
        };
        ctx.set_status(next);
        persist_transition(deps, ctx).await.unwrap_or(Flow::Continue)
    }

    /// Query could not settle the outcome: re-execute. Safe because steps
    /// are idempotent; a step that already completed observes its prior
    /// result.
    async fn retry_step(
        &self,
        ctx: &mut SagaContext,
        deps: &HandlerDeps,
        step: &Arc<dyn SagaStep>,
    ) -> Flow {
        tracing::info!(
            order_id = ctx.order_id(),
            step_id = step.step_id(),
            "step outcome unknown, re-executing"
        );
        let result = step.execute().await;
        persist_step_log(deps, step).await;

        if result.should_continue() {
            ctx.set_last_result(result);
            self.continue_flow(ctx, deps).await
        } else if result.should_wait() {
            let parked = if ctx.is_reverting() {
                SagaStatus::RevertingPending
            } else {
                SagaStatus::Pending
            };
            ctx.set_status(parked);
            ctx.set_last_result(result);
            persist_transition(deps, ctx).await.unwrap_or(Flow::Suspend)
        } else {
            ctx.set_last_result(result);
            self.handle_step_failure(ctx, deps).await
        }
    }

    /// No step under the cursor: either everything already finished, or the
    /// saga is in a shape the machine cannot explain.
    async fn handle_no_current_step(&self, ctx: &mut SagaContext, deps: &HandlerDeps) -> Flow {
        if ctx.is_last_step() {
            return self.continue_flow(ctx, deps).await;
        }

        tracing::error!(
            order_id = ctx.order_id(),
            "no current step and saga incomplete, flagging for review"
        );
        ctx.set_status(SagaStatus::ManualReview);
        persist_transition(deps, ctx).await.unwrap_or(Flow::Continue)
    }
}
