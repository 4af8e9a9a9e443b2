//! Terminal handler: after-hooks and the audit record. End of the line.

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::SagaContext;
use crate::registry::StateHandlerRegistry;
use crate::status::SagaStatus;

use super::{Flow, HandlerDeps, StateHandler};

/// Handler for every terminal status.
///
/// Runs the after-hook chain (best effort: failures are logged, never
/// propagated), writes the audit record, and suspends. Terminal statuses
/// have no outbound transitions, so nothing here mutates the status.
pub struct TerminalHandler;

pub fn register(registry: &mut StateHandlerRegistry) {
    registry.register(Arc::new(TerminalHandler));
}

#[async_trait]
impl StateHandler for TerminalHandler {
    fn states(&self) -> &'static [SagaStatus] {
        &[
            SagaStatus::Success,
            SagaStatus::Failed,
            SagaStatus::Reverted,
            SagaStatus::RevertFailed,
            SagaStatus::ManualReview,
            SagaStatus::Timeout,
            SagaStatus::SystemError,
        ]
    }

    async fn process(&self, ctx: &mut SagaContext, deps: &HandlerDeps) -> Flow {
        deps.hooks.run_after(ctx).await;
        self.log_final_state(ctx);
        Flow::Suspend
    }
}

impl TerminalHandler {
    fn log_final_state(&self, ctx: &SagaContext) {
        let duration_ms = (ctx.updated_at() - ctx.created_at()).num_milliseconds();

        tracing::info!(
            order_id = ctx.order_id(),
            status = %ctx.status(),
            duration_ms,
            steps_processed = ctx.processed_step_ids().len(),
            "saga finished"
        );

        let error = ctx
            .last_result()
            .and_then(|r| r.error_message())
            .unwrap_or("unknown");

        match ctx.status() {
            SagaStatus::Success => {
                tracing::info!(order_id = ctx.order_id(), "order completed successfully");
            }
            SagaStatus::Reverted => {
                tracing::info!(order_id = ctx.order_id(), "order reverted successfully");
            }
            SagaStatus::Failed => {
                tracing::warn!(order_id = ctx.order_id(), error, "order failed");
            }
            SagaStatus::ManualReview => {
                tracing::warn!(order_id = ctx.order_id(), "order needs manual review");
            }
            SagaStatus::Timeout => {
                tracing::warn!(order_id = ctx.order_id(), "order timed out");
            }
            SagaStatus::RevertFailed => {
                tracing::error!(
                    order_id = ctx.order_id(),
                    error,
                    "order revert failed, manual intervention required"
                );
            }
            SagaStatus::SystemError => {
                tracing::error!(order_id = ctx.order_id(), error, "order ended in system error");
            }
            other => {
                tracing::info!(order_id = ctx.order_id(), status = %other, "order ended");
            }
        }
    }
}
