//! Entry-point handler: runs the before-hook chain and admits the saga into
//! forward processing.

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::SagaContext;
use crate::hook::HookFailure;
use crate::registry::StateHandlerRegistry;
use crate::status::SagaStatus;

use super::{Flow, HandlerDeps, StateHandler};

/// Handler for `INIT`.
///
/// Runs the before-hooks; on success transitions to `PROCESSING`. Hook
/// refusals classify into `FAILED` (duplicate, validation, authorization) or
/// `SYSTEM_ERROR`. A persistence fault here is non-fatal: no step has
/// executed yet, so there is nothing to compensate; the saga surfaces
/// `SYSTEM_ERROR`.
pub struct InitHandler;

pub fn register(registry: &mut StateHandlerRegistry) {
    registry.register(Arc::new(InitHandler));
}

#[async_trait]
impl StateHandler for InitHandler {
    fn states(&self) -> &'static [SagaStatus] {
        &[SagaStatus::Init]
    }

    async fn process(&self, ctx: &mut SagaContext, deps: &HandlerDeps) -> Flow {
        tracing::info!(order_id = ctx.order_id(), "initializing saga");

        let hook_result = deps.hooks.run_before(ctx).await;
        if !hook_result.is_success() {
            let status = match hook_result.failure() {
                Some(HookFailure::Duplicate)
                | Some(HookFailure::Validation)
                | Some(HookFailure::Authorization) => SagaStatus::Failed,
                _ => SagaStatus::SystemError,
            };
            ctx.set_status(status);
            ctx.set_last_result(hook_result.to_step_result());
            return self.persist_non_fatal(ctx, deps).await;
        }

        ctx.set_status(SagaStatus::Processing);
        self.persist_non_fatal(ctx, deps).await
    }
}

impl InitHandler {
    /// Persist with the INIT-specific fault policy: any write failure
    /// surfaces `SYSTEM_ERROR` and suspends.
    async fn persist_non_fatal(&self, ctx: &mut SagaContext, deps: &HandlerDeps) -> Flow {
        match deps.repository.update_status(ctx).await {
            Ok(()) => {
                ctx.mark_persisted();
                Flow::Continue
            }
            Err(err) => {
                tracing::error!(
                    order_id = ctx.order_id(),
                    error = %err,
                    "failed to persist INIT transition"
                );
                ctx.set_status(SagaStatus::SystemError);
                Flow::Suspend
            }
        }
    }
}
