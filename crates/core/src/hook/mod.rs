//!
//! # Hook Chain
//!
//! Cross-cutting concerns around the saga lifecycle, kept out of the core
//! state machine. Before-hooks run in the INIT handler and may abort the
//! saga; after-hooks run in the terminal handler and are best effort.
//!
//! Contract:
//!
//! - A before-hook returning anything but success short-circuits the chain;
//!   the saga is rejected before any step executes.
//! - Every after-hook runs regardless of prior hook outcomes; failures are
//!   logged and discarded.
//! - Hooks do not propagate errors. A hook that fails internally returns
//!   [`HookResult::system_error`] (or [`HookResult::from_error`]).

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::SagaContext;
use crate::error::ErrorCode;
use crate::step::StepResult;

/// The lifecycle slots a hook can occupy. Ordering of before-hooks matters:
/// duplicate detection runs before validation, validation before
/// authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    DuplicateCheck,
    Validation,
    Authorization,
    DataMapping,
    Notification,
    TransactionLog,
    ExternalSync,
    Cleanup,
    Noop,
}

impl HookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HookKind::DuplicateCheck => "DUPLICATE_CHECK",
            HookKind::Validation => "VALIDATION",
            HookKind::Authorization => "AUTHORIZATION",
            HookKind::DataMapping => "DATA_MAPPING",
            HookKind::Notification => "NOTIFICATION",
            HookKind::TransactionLog => "TRANSACTION_LOG",
            HookKind::ExternalSync => "EXTERNAL_SYNC",
            HookKind::Cleanup => "CLEANUP",
            HookKind::Noop => "NOOP",
        }
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a hook refused the saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFailure {
    Duplicate,
    Validation,
    Authorization,
    SystemError,
}

/// Outcome of one hook invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum HookResult {
    Success,
    Failed {
        failure: HookFailure,
        message: String,
    },
}

impl HookResult {
    pub fn success() -> Self {
        HookResult::Success
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        HookResult::Failed {
            failure: HookFailure::Duplicate,
            message: message.into(),
        }
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        HookResult::Failed {
            failure: HookFailure::Validation,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        HookResult::Failed {
            failure: HookFailure::Authorization,
            message: message.into(),
        }
    }

    pub fn system_error(message: impl Into<String>) -> Self {
        HookResult::Failed {
            failure: HookFailure::SystemError,
            message: message.into(),
        }
    }

    /// Translate an error escaping a hook into a system-error result.
    pub fn from_error(err: &(dyn std::error::Error + '_)) -> Self {
        Self::system_error(err.to_string())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, HookResult::Success)
    }

    pub fn failure(&self) -> Option<HookFailure> {
        match self {
            HookResult::Success => None,
            HookResult::Failed { failure, .. } => Some(*failure),
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            HookResult::Success => None,
            HookResult::Failed { message, .. } => Some(message),
        }
    }

    /// Map into a [`StepResult`] so hook refusals share the error channel
    /// with step failures.
    pub fn to_step_result(&self) -> StepResult {
        match self {
            HookResult::Success => StepResult::success(),
            HookResult::Failed { failure, message } => {
                let code = match failure {
                    HookFailure::Duplicate => ErrorCode::DuplicateRequest,
                    HookFailure::Validation => ErrorCode::InvalidInput,
                    HookFailure::Authorization => ErrorCode::InvalidInput,
                    HookFailure::SystemError => ErrorCode::InternalError,
                };
                StepResult::failed(code, message.clone())
            }
        }
    }
}

/// A cross-cutting hook. Implementations override the phases they care
/// about; the defaults are no-ops.
#[async_trait]
pub trait Hook: Send + Sync {
    fn kind(&self) -> HookKind;

    /// Runs before the saga starts processing. Returning a failure aborts
    /// the saga.
    async fn before(&self, _ctx: &SagaContext) -> HookResult {
        HookResult::success()
    }

    /// Runs after the saga reaches a terminal status. Failures are logged
    /// and discarded.
    async fn after(&self, _ctx: &SagaContext) -> HookResult {
        HookResult::success()
    }
}

/// Ordered collection of hooks, shared by the INIT and terminal handlers.
#[derive(Default)]
pub struct HookSet {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook; execution order is registration order.
    pub fn register(&mut self, hook: Arc<dyn Hook>) -> &mut Self {
        self.hooks.push(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run the before phase. Stops at the first failure and returns it.
    pub async fn run_before(&self, ctx: &SagaContext) -> HookResult {
        for hook in &self.hooks {
            let result = hook.before(ctx).await;
            if !result.is_success() {
                tracing::warn!(
                    order_id = ctx.order_id(),
                    hook = %hook.kind(),
                    message = result.message().unwrap_or_default(),
                    "before hook rejected saga"
                );
                return result;
            }
        }
        HookResult::success()
    }

    /// Run the after phase. Every hook runs; failures are logged and
    /// swallowed.
    pub async fn run_after(&self, ctx: &SagaContext) {
        for hook in &self.hooks {
            let result = hook.after(ctx).await;
            if !result.is_success() {
                tracing::warn!(
                    order_id = ctx.order_id(),
                    hook = %hook.kind(),
                    message = result.message().unwrap_or_default(),
                    "after hook failed (continuing)"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook {
        kind: HookKind,
        before_result: HookResult,
        after_result: HookResult,
        before_calls: AtomicUsize,
        after_calls: AtomicUsize,
    }

    impl CountingHook {
        fn new(kind: HookKind) -> Self {
            Self {
                kind,
                before_result: HookResult::success(),
                after_result: HookResult::success(),
                before_calls: AtomicUsize::new(0),
                after_calls: AtomicUsize::new(0),
            }
        }

        fn rejecting(kind: HookKind, result: HookResult) -> Self {
            Self {
                before_result: result.clone(),
                after_result: result,
                ..Self::new(kind)
            }
        }
    }

    #[async_trait]
    impl Hook for CountingHook {
        fn kind(&self) -> HookKind {
            self.kind
        }

        async fn before(&self, _ctx: &SagaContext) -> HookResult {
            self.before_calls.fetch_add(1, Ordering::SeqCst);
            self.before_result.clone()
        }

        async fn after(&self, _ctx: &SagaContext) -> HookResult {
            self.after_calls.fetch_add(1, Ordering::SeqCst);
            self.after_result.clone()
        }
    }

    fn ctx() -> SagaContext {
        SagaContext::new(1, "ORD-H", 1)
    }

    #[tokio::test]
    async fn test_before_chain_short_circuits() {
        let first = Arc::new(CountingHook::new(HookKind::DuplicateCheck));
        let second = Arc::new(CountingHook::rejecting(
            HookKind::Validation,
            HookResult::validation_failed("bad order"),
        ));
        let third = Arc::new(CountingHook::new(HookKind::Authorization));

        let mut hooks = HookSet::new();
        hooks
            .register(first.clone())
            .register(second.clone())
            .register(third.clone());

        let result = hooks.run_before(&ctx()).await;
        assert_eq!(result.failure(), Some(HookFailure::Validation));
        assert_eq!(first.before_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.before_calls.load(Ordering::SeqCst), 1);
        assert_eq!(third.before_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_after_chain_runs_every_hook() {
        let first = Arc::new(CountingHook::rejecting(
            HookKind::Notification,
            HookResult::system_error("smtp down"),
        ));
        let second = Arc::new(CountingHook::new(HookKind::TransactionLog));

        let mut hooks = HookSet::new();
        hooks.register(first.clone()).register(second.clone());

        hooks.run_after(&ctx()).await;
        assert_eq!(first.after_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.after_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_set_succeeds() {
        let hooks = HookSet::new();
        assert!(hooks.run_before(&ctx()).await.is_success());
        hooks.run_after(&ctx()).await;
    }

    #[test]
    fn test_to_step_result_mapping() {
        let dup = HookResult::duplicate("order exists").to_step_result();
        assert_eq!(dup.error_code(), ErrorCode::DuplicateRequest);

        let val = HookResult::validation_failed("no items").to_step_result();
        assert_eq!(val.error_code(), ErrorCode::InvalidInput);

        let sys = HookResult::system_error("boom").to_step_result();
        assert_eq!(sys.error_code(), ErrorCode::InternalError);

        assert!(HookResult::success().to_step_result().is_success());
    }

    #[test]
    fn test_from_error() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "broken pipe");
        let result = HookResult::from_error(&io);
        assert_eq!(result.failure(), Some(HookFailure::SystemError));
        assert_eq!(result.message(), Some("broken pipe"));
    }
}
