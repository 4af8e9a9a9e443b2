//! SagaRepository port trait definition.
//!
//! This module defines the [`SagaRepository`] trait that persistence
//! backends must implement. The engine treats the port as the process-wide
//! serialization point for saga state.

use async_trait::async_trait;
use chrono::Duration;

use crate::context::SagaContext;
use crate::status::SagaStatus;
use crate::step::StepLog;

/// Errors that can occur when operating on the repository.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Optimistic locking detected a concurrent update: the stored
    /// `updated_at` no longer matches the caller's witness.
    #[error("conflict: saga {order_id} was updated concurrently")]
    Conflict {
        /// The saga whose write was refused.
        order_id: u64,
    },

    /// The requested saga was not found.
    #[error("saga not found: {order_id}")]
    NotFound {
        /// The saga id that was not found.
        order_id: u64,
    },

    /// A saga with the same `order_id` or `order_no` already exists.
    #[error("duplicate saga: {0}")]
    Duplicate(String),

    /// Backend-specific failure (connection, query, serialization).
    #[error("backend error: {0}")]
    Backend(String),
}

impl RepositoryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Trait for saga persistence operations.
///
/// Implementations must provide:
/// - Atomic single-row creates and updates.
/// - Linearizable per-key reads of the saga row.
/// - An append-only step log.
/// - A total order of `updated_at` per saga row.
///
/// # Concurrency Model
///
/// Two mechanisms serialize access:
///
/// 1. **Per-saga lock** (`try_lock` / `release_lock`): every engine entry
///    that performs status transitions acquires the lock first, making
///    concurrent `start`/`resume`/recovery for the same saga mutually
///    exclusive. A failed `try_lock` yields immediately.
/// 2. **Optimistic locking** on `update_status`: the write succeeds only
///    when the stored `updated_at` equals the caller's witness
///    ([`SagaContext::persisted_at`]); otherwise it returns
///    [`RepositoryError::Conflict`] and the caller surfaces `SYSTEM_ERROR`
///    for the recovery sweep to reconcile.
#[async_trait]
pub trait SagaRepository: Send + Sync {
    /// Persist a new saga.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::Duplicate`] if a saga with the same `order_id`
    ///   or `order_no` already exists. The check and insert are atomic.
    async fn create(&self, ctx: &SagaContext) -> Result<(), RepositoryError>;

    /// Persist a status change.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::Conflict`] when the stored `updated_at` differs
    ///   from the caller's witness.
    /// - [`RepositoryError::NotFound`] when the saga does not exist.
    async fn update_status(&self, ctx: &SagaContext) -> Result<(), RepositoryError>;

    /// Load a saga by its internal id.
    async fn find_by_id(&self, order_id: u64) -> Result<Option<SagaContext>, RepositoryError>;

    /// Load a saga by its external order number.
    async fn find_by_order_no(&self, order_no: &str)
        -> Result<Option<SagaContext>, RepositoryError>;

    /// Whether a saga exists for the given external order number.
    async fn exists_by_order_no(&self, order_no: &str) -> Result<bool, RepositoryError>;

    /// Append step log rows. The step log is append-only; a new row per
    /// attempt is expected.
    async fn save_steps(&self, steps: &[StepLog]) -> Result<(), RepositoryError>;

    /// Load all step log rows for a saga, in append order.
    async fn load_steps(&self, order_id: u64) -> Result<Vec<StepLog>, RepositoryError>;

    /// Find sagas stuck in one of `statuses` whose `updated_at` is older
    /// than `staleness`, up to `limit` rows. Used by the recovery sweep.
    async fn find_stuck_sagas(
        &self,
        statuses: &[SagaStatus],
        staleness: Duration,
        limit: usize,
    ) -> Result<Vec<SagaContext>, RepositoryError>;

    /// Try to acquire the per-saga mutex. Returns `false` when another
    /// caller holds it; the caller yields immediately.
    async fn try_lock(&self, order_id: u64) -> bool;

    /// Release the per-saga mutex.
    async fn release_lock(&self, order_id: u64);
}
