//!
//! # Saga Engine
//!
//! The in-process entry point: `start`, `resume`, `query`, `exists`. The
//! engine constructs or loads a [`SagaContext`], acquires the per-saga lock
//! at the persistence boundary, and drives the registry-dispatched handler
//! loop to quiescence: a terminal status, a parked `PENDING` status, or a
//! classified system error.
//!
//! Concurrency model: per-saga serial execution. Many sagas may run on
//! independent tasks; within one saga all handler invocations for one engine
//! call form a linear chain on the calling task. Callbacks never block a
//! handler; they re-enter through [`SagaEngine::resume`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::SagaContext;
use crate::error::{ErrorCode, SagaError};
use crate::handlers::{Flow, HandlerDeps};
use crate::hook::HookSet;
use crate::port::{RepositoryError, SagaRepository};
use crate::registry::StateHandlerRegistry;
use crate::status::SagaStatus;
use crate::step::{SagaStep, StepResult};

/// Command to start a new saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSagaCommand {
    /// External order reference; unique per saga.
    pub order_no: String,
    pub customer_id: u64,
    pub items: Vec<OrderItem>,
    pub payment: PaymentInfo,
    pub shipping: ShippingInfo,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: u64,
    pub total_price: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInfo {
    /// CARD, WALLET, BANK_TRANSFER.
    pub method: String,
    pub account_id: String,
    pub amount: u64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingInfo {
    pub recipient_name: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub phone: String,
}

/// Command to resume a parked or stuck saga.
#[derive(Debug, Clone)]
pub struct ResumeSagaCommand {
    pub order_id: u64,
    /// The step a callback refers to, if any.
    pub step_id: Option<String>,
    /// The outcome delivered by the callback, if any.
    pub callback_result: Option<StepResult>,
    /// Whether this resume comes from the recovery sweep.
    pub is_recovery: bool,
    /// Where the resume request originated, for the log.
    pub source: String,
}

impl ResumeSagaCommand {
    /// Resume driven by an external callback for a specific step.
    pub fn callback(
        order_id: u64,
        step_id: impl Into<String>,
        result: StepResult,
        source: impl Into<String>,
    ) -> Self {
        Self {
            order_id,
            step_id: Some(step_id.into()),
            callback_result: Some(result),
            is_recovery: false,
            source: source.into(),
        }
    }

    /// Resume driven by the recovery sweep.
    pub fn recovery(order_id: u64, source: impl Into<String>) -> Self {
        Self {
            order_id,
            step_id: None,
            callback_result: None,
            is_recovery: true,
            source: source.into(),
        }
    }
}

/// Factory boundary between the engine and the deployment's step
/// implementations: builds the context (id generation, step sequence) for a
/// start command, and pairs a succeeded forward step with its compensation
/// step when a saga reverts.
pub trait SagaFactory: Send + Sync {
    /// Build a context for the command: generate the `order_id` and the
    /// ordered forward step sequence.
    fn create_context(&self, cmd: &StartSagaCommand) -> SagaContext;

    /// The compensation step for a succeeded forward step, or `None` when
    /// the action has no inverse.
    fn compensation_step(&self, forward: &dyn SagaStep) -> Option<Arc<dyn SagaStep>>;
}

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct SagaEngineConfig {
    /// Upper bound on handler transitions per engine call. A saga that does
    /// not quiesce within the bound is classified as a system error.
    pub max_transitions: usize,
}

impl Default for SagaEngineConfig {
    fn default() -> Self {
        Self {
            max_transitions: 128,
        }
    }
}

impl SagaEngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_transitions(mut self, n: usize) -> Self {
        self.max_transitions = n;
        self
    }
}

/// The saga orchestration engine.
pub struct SagaEngine {
    config: SagaEngineConfig,
    repository: Arc<dyn SagaRepository>,
    registry: Arc<StateHandlerRegistry>,
    deps: HandlerDeps,
}

impl SagaEngine {
    pub fn new(
        config: SagaEngineConfig,
        repository: Arc<dyn SagaRepository>,
        registry: Arc<StateHandlerRegistry>,
        hooks: Arc<HookSet>,
        factory: Arc<dyn SagaFactory>,
    ) -> Self {
        let deps = HandlerDeps {
            repository: Arc::clone(&repository),
            hooks,
            factory,
        };
        Self {
            config,
            repository,
            registry,
            deps,
        }
    }

    /// Start a new saga and drive it to quiescence.
    ///
    /// Never returns an error: the returned context's status is the outcome
    /// signal, with `last_result` carrying the error code and message when
    /// the outcome is not successful.
    pub async fn start(&self, cmd: StartSagaCommand) -> SagaContext {
        tracing::info!(order_no = %cmd.order_no, "starting saga");

        let mut ctx = self.deps.factory.create_context(&cmd);
        ctx.set_status(SagaStatus::Init);
        ctx.init_saga(&[]);

        if let Err(err) = self.repository.create(&ctx).await {
            return self.reject_create(ctx, err);
        }
        ctx.mark_persisted();
        tracing::info!(order_id = ctx.order_id(), order_no = %cmd.order_no, "saga created");

        if !self.repository.try_lock(ctx.order_id()).await {
            // Freshly created sagas are uncontended; a held lock means an id
            // collision or a misbehaving port.
            tracing::error!(order_id = ctx.order_id(), "could not lock new saga");
            ctx.set_status(SagaStatus::SystemError);
            return ctx;
        }
        self.dispatch(&mut ctx).await;
        self.repository.release_lock(ctx.order_id()).await;

        ctx
    }

    /// Resume a saga after a callback, restart or recovery sweep.
    ///
    /// Refuses terminal sagas (returns them unchanged). A contended per-saga
    /// lock also returns the loaded context unchanged; the caller may
    /// requeue.
    pub async fn resume(&self, cmd: ResumeSagaCommand) -> Result<SagaContext, SagaError> {
        tracing::info!(
            order_id = cmd.order_id,
            source = %cmd.source,
            is_recovery = cmd.is_recovery,
            "resuming saga"
        );

        let mut ctx = self
            .repository
            .find_by_id(cmd.order_id)
            .await?
            .ok_or(SagaError::SagaNotFound(cmd.order_id))?;

        if ctx.status().is_terminal() {
            tracing::warn!(
                order_id = ctx.order_id(),
                status = %ctx.status(),
                "cannot resume terminal saga"
            );
            return Ok(ctx);
        }

        if !self.repository.try_lock(ctx.order_id()).await {
            tracing::warn!(order_id = ctx.order_id(), "saga busy, resume skipped");
            return Ok(ctx);
        }

        // Reload under the lock so the resume acts on the latest snapshot.
        match self.repository.find_by_id(cmd.order_id).await {
            Ok(Some(latest)) => ctx = latest,
            Ok(None) => {}
            Err(err) => {
                self.repository.release_lock(ctx.order_id()).await;
                return Err(err.into());
            }
        }
        if ctx.status().is_terminal() {
            self.repository.release_lock(ctx.order_id()).await;
            tracing::warn!(
                order_id = ctx.order_id(),
                status = %ctx.status(),
                "saga reached terminal status concurrently, resume is a no-op"
            );
            return Ok(ctx);
        }

        if let (Some(step_id), Some(result)) = (&cmd.step_id, &cmd.callback_result) {
            match ctx.find_step(step_id) {
                Some(step) => {
                    step.update_status(result.clone());
                    if let Err(err) = self.repository.save_steps(&[step.to_log()]).await {
                        tracing::error!(step_id = %step_id, error = %err, "failed to log callback");
                    }
                }
                None => {
                    tracing::warn!(order_id = ctx.order_id(), step_id = %step_id, "callback for unknown step");
                }
            }
        }

        let next = if cmd.is_recovery {
            ctx.status().recovery_of()
        } else {
            ctx.status().resume_of()
        };
        ctx.set_status(next);
        match self.repository.update_status(&ctx).await {
            Ok(()) => ctx.mark_persisted(),
            Err(err) => {
                tracing::error!(order_id = ctx.order_id(), error = %err, "failed to persist resume");
                if err.is_conflict() {
                    ctx.set_status(SagaStatus::SystemError);
                }
                self.repository.release_lock(ctx.order_id()).await;
                return Ok(ctx);
            }
        }

        self.dispatch(&mut ctx).await;
        self.repository.release_lock(ctx.order_id()).await;

        Ok(ctx)
    }

    /// Load the current state of a saga.
    pub async fn query(&self, order_id: u64) -> Result<Option<SagaContext>, SagaError> {
        Ok(self.repository.find_by_id(order_id).await?)
    }

    /// Whether a saga exists for the external order number.
    pub async fn exists(&self, order_no: &str) -> Result<bool, SagaError> {
        Ok(self.repository.exists_by_order_no(order_no).await?)
    }

    /// Sagas stuck in one of `statuses` with `updated_at` older than
    /// `staleness`. Used by the recovery sweep.
    pub async fn query_stuck(
        &self,
        statuses: &[SagaStatus],
        staleness: chrono::Duration,
        limit: usize,
    ) -> Result<Vec<SagaContext>, SagaError> {
        Ok(self
            .repository
            .find_stuck_sagas(statuses, staleness, limit)
            .await?)
    }

    /// Drive the handler loop until the saga quiesces.
    ///
    /// Each iteration evaluates the timeout, looks up the handler for the
    /// current status and invokes it. Handlers that transition return
    /// [`Flow::Continue`]; parking and terminal handlers return
    /// [`Flow::Suspend`].
    async fn dispatch(&self, ctx: &mut SagaContext) {
        for _ in 0..self.config.max_transitions {
            if !ctx.status().is_terminal() && ctx.is_timed_out() {
                tracing::warn!(order_id = ctx.order_id(), "saga exceeded its time budget");
                ctx.set_status(SagaStatus::Timeout);
                match self.repository.update_status(ctx).await {
                    Ok(()) => ctx.mark_persisted(),
                    Err(err) => {
                        tracing::error!(order_id = ctx.order_id(), error = %err, "failed to persist timeout");
                    }
                }
                continue;
            }

            let handler = match self.registry.get(ctx.status()) {
                Ok(handler) => handler,
                Err(err) => {
                    tracing::error!(order_id = ctx.order_id(), error = %err, "dispatch failed");
                    if ctx.status() == SagaStatus::SystemError {
                        return;
                    }
                    ctx.set_status(SagaStatus::SystemError);
                    continue;
                }
            };

            match handler.process(ctx, &self.deps).await {
                Flow::Continue => {}
                Flow::Suspend => return,
            }
        }

        tracing::error!(
            order_id = ctx.order_id(),
            max_transitions = self.config.max_transitions,
            "saga did not quiesce within the transition bound"
        );
        ctx.set_status(SagaStatus::SystemError);
        if self.repository.update_status(ctx).await.is_ok() {
            ctx.mark_persisted();
        }
    }

    /// Map a refused `create` onto the outcome channel.
    fn reject_create(&self, mut ctx: SagaContext, err: RepositoryError) -> SagaContext {
        tracing::error!(
            order_id = ctx.order_id(),
            order_no = %ctx.order_no(),
            error = %err,
            "failed to persist new saga"
        );
        let message = err.to_string();
        if err.is_duplicate() {
            ctx.set_status(SagaStatus::Failed);
            ctx.set_last_result(StepResult::failed(ErrorCode::DuplicateRequest, message));
        } else {
            ctx.set_status(SagaStatus::SystemError);
            ctx.set_last_result(StepResult::failed(ErrorCode::DatabaseError, message));
        }
        ctx
    }
}
