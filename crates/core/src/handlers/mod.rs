//!
//! # State Handlers
//!
//! One behavioral unit per status group. A handler does a bounded amount of
//! work, typically one step attempt, then either transitions the status
//! and hands control back to the dispatch loop ([`Flow::Continue`]) or parks
//! the saga ([`Flow::Suspend`]: awaiting a callback, or terminal).
//!
//! Handlers are the only code allowed to mutate a [`SagaContext`]. Every
//! outbound status change is written through the persistence port before
//! control moves on. Handlers never call each other; delegation happens via
//! the registry-driven loop in the engine.

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::SagaContext;
use crate::engine::SagaFactory;
use crate::hook::HookSet;
use crate::port::{RepositoryError, SagaRepository};
use crate::registry::StateHandlerRegistry;
use crate::status::SagaStatus;
use crate::step::SagaStep;

mod init;
mod processing;
mod resuming;
mod reverting;
mod terminal;

pub use init::InitHandler;
pub use processing::ProcessingHandler;
pub use resuming::ResumingHandler;
pub use reverting::RevertingHandler;
pub use terminal::TerminalHandler;

/// What the dispatch loop should do after a handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Look up the handler for the (possibly new) status and keep going.
    Continue,
    /// Stop driving this saga; the call returns to the engine caller.
    /// Future activity re-enters via `resume` or the recovery sweep.
    Suspend,
}

/// Collaborators shared by all handlers.
pub struct HandlerDeps {
    pub repository: Arc<dyn SagaRepository>,
    pub hooks: Arc<HookSet>,
    pub factory: Arc<dyn SagaFactory>,
}

/// Contract for processing a saga in a specific status group.
#[async_trait]
pub trait StateHandler: Send + Sync {
    /// The statuses this handler owns.
    fn states(&self) -> &'static [SagaStatus];

    /// Process the context for its current status. May transition the
    /// status; must persist every transition; must not return errors
    /// (unexpected conditions become `SYSTEM_ERROR` transitions).
    async fn process(&self, ctx: &mut SagaContext, deps: &HandlerDeps) -> Flow;
}

/// Bind the five standard handlers. The composition root for the default
/// state machine; deployments with custom handlers call the individual
/// `register` functions instead.
pub fn register_defaults(registry: &mut StateHandlerRegistry) {
    init::register(registry);
    processing::register(registry);
    reverting::register(registry);
    resuming::register(registry);
    terminal::register(registry);
}

/// Write the current status through the port.
///
/// Returns `None` on success. An optimistic-lock conflict means another
/// writer got there first: the transition would be lost, so the saga
/// surfaces `SYSTEM_ERROR` in memory and suspends for the recovery sweep to
/// reconcile. Any other backend failure is logged and the in-memory status
/// is kept.
pub(crate) async fn persist_transition(deps: &HandlerDeps, ctx: &mut SagaContext) -> Option<Flow> {
    match deps.repository.update_status(ctx).await {
        Ok(()) => {
            ctx.mark_persisted();
            None
        }
        Err(RepositoryError::Conflict { order_id }) => {
            tracing::error!(
                order_id,
                status = %ctx.status(),
                "optimistic lock conflict on status write"
            );
            ctx.set_status(SagaStatus::SystemError);
            Some(Flow::Suspend)
        }
        Err(err) => {
            tracing::error!(
                order_id = ctx.order_id(),
                status = %ctx.status(),
                error = %err,
                "failed to persist status"
            );
            Some(Flow::Suspend)
        }
    }
}

/// Append the step's current log row. Log failures are non-fatal; the
/// recovery sweep reconstructs from the saga row.
pub(crate) async fn persist_step_log(deps: &HandlerDeps, step: &Arc<dyn SagaStep>) {
    if let Err(err) = deps.repository.save_steps(&[step.to_log()]).await {
        tracing::error!(
            step_id = step.step_id(),
            error = %err,
            "failed to persist step log"
        );
    }
}
