//! Example hooks exercising the before/after contract.

use async_trait::async_trait;
use std::sync::Arc;

use order_saga_core::context::SagaContext;
use order_saga_core::hook::{Hook, HookKind, HookResult};
use order_saga_core::port::SagaRepository;

/// Rejects an order number that already belongs to a different saga.
///
/// The saga row is created before the INIT hooks run, so the check must
/// exclude the saga's own row.
pub struct DuplicateCheckHook {
    repository: Arc<dyn SagaRepository>,
}

impl DuplicateCheckHook {
    pub fn new(repository: Arc<dyn SagaRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Hook for DuplicateCheckHook {
    fn kind(&self) -> HookKind {
        HookKind::DuplicateCheck
    }

    async fn before(&self, ctx: &SagaContext) -> HookResult {
        match self.repository.find_by_order_no(ctx.order_no()).await {
            Ok(Some(existing)) if existing.order_id() != ctx.order_id() => {
                HookResult::duplicate(format!("order already exists: {}", ctx.order_no()))
            }
            Ok(_) => HookResult::success(),
            Err(err) => HookResult::from_error(&err),
        }
    }
}

/// Fails fast on orders that cannot possibly be processed.
pub struct ValidationHook;

#[async_trait]
impl Hook for ValidationHook {
    fn kind(&self) -> HookKind {
        HookKind::Validation
    }

    async fn before(&self, ctx: &SagaContext) -> HookResult {
        if ctx.order_id() == 0 {
            return HookResult::validation_failed("invalid order id");
        }
        if ctx.customer_id() == 0 {
            return HookResult::validation_failed("invalid customer id");
        }
        if ctx.steps().is_empty() {
            return HookResult::validation_failed("order has no items to process");
        }
        HookResult::success()
    }
}

/// Emits an audit line once the saga settles.
pub struct TransactionLogHook;

#[async_trait]
impl Hook for TransactionLogHook {
    fn kind(&self) -> HookKind {
        HookKind::TransactionLog
    }

    async fn after(&self, ctx: &SagaContext) -> HookResult {
        tracing::info!(
            order_id = ctx.order_id(),
            order_no = %ctx.order_no(),
            status = %ctx.status(),
            steps = ctx.processed_step_ids().len(),
            "transaction settled"
        );
        HookResult::success()
    }
}
