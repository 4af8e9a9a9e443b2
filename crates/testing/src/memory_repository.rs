//! In-memory implementation of the saga repository for testing.
//!
//! Thread-safe and feature-complete: optimistic locking on `updated_at`,
//! unique `order_no` enforcement, an append-only step log, the per-saga lock
//! set, and the stuck-saga scan. No database required.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use order_saga_core::context::SagaContext;
use order_saga_core::port::{RepositoryError, SagaRepository};
use order_saga_core::status::SagaStatus;
use order_saga_core::step::StepLog;

/// In-memory [`SagaRepository`].
///
/// # Concurrency
///
/// Writers take the saga map's write lock for the whole check-and-insert, so
/// `create`'s uniqueness guarantee and `update_status`'s compare-and-swap
/// are atomic. Contexts are stored as clones; step handles inside a stored
/// context are shared `Arc`s, which mirrors how a live process keeps step
/// state reachable from both the store and the running task.
#[derive(Default)]
pub struct InMemorySagaRepository {
    sagas: RwLock<HashMap<u64, SagaContext>>,
    order_no_index: RwLock<HashMap<String, u64>>,
    steps: RwLock<HashMap<u64, Vec<StepLog>>>,
    locks: Mutex<HashSet<u64>>,
    conflict_next_update: AtomicBool,
}

impl InMemorySagaRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all data.
    pub fn clear(&self) {
        self.sagas.write().clear();
        self.order_no_index.write().clear();
        self.steps.write().clear();
        self.locks.lock().clear();
    }

    /// All stored sagas, for debugging.
    pub fn find_all(&self) -> Vec<SagaContext> {
        self.sagas.read().values().cloned().collect()
    }

    /// Bump the stored saga's `updated_at`, invalidating any witness a
    /// caller is holding. Test helper for optimistic-lock scenarios.
    pub fn touch(&self, order_id: u64) {
        let mut sagas = self.sagas.write();
        if let Some(ctx) = sagas.get_mut(&order_id) {
            let status = ctx.status();
            ctx.set_status(status);
        }
    }

    /// Make the next `update_status` fail with a conflict, regardless of the
    /// witness. Test helper.
    pub fn inject_conflict(&self) {
        self.conflict_next_update.store(true, Ordering::SeqCst);
    }

    /// Number of step log rows recorded for a saga and step id.
    pub fn step_log_count(&self, order_id: u64, step_id: &str) -> usize {
        self.steps
            .read()
            .get(&order_id)
            .map(|logs| logs.iter().filter(|l| l.step_id == step_id).count())
            .unwrap_or(0)
    }
}

/// Clone a context for storage with its optimistic witness aligned, so a
/// later load hands the caller a context whose next write passes the
/// witness check.
fn snapshot(ctx: &SagaContext) -> SagaContext {
    let mut stored = ctx.clone();
    stored.mark_persisted();
    stored
}

#[async_trait]
impl SagaRepository for InMemorySagaRepository {
    async fn create(&self, ctx: &SagaContext) -> Result<(), RepositoryError> {
        let mut sagas = self.sagas.write();
        let mut index = self.order_no_index.write();

        if sagas.contains_key(&ctx.order_id()) {
            return Err(RepositoryError::Duplicate(format!(
                "order_id {}",
                ctx.order_id()
            )));
        }
        if index.contains_key(ctx.order_no()) {
            return Err(RepositoryError::Duplicate(ctx.order_no().to_string()));
        }

        sagas.insert(ctx.order_id(), snapshot(ctx));
        index.insert(ctx.order_no().to_string(), ctx.order_id());
        self.steps.write().entry(ctx.order_id()).or_default();
        Ok(())
    }

    async fn update_status(&self, ctx: &SagaContext) -> Result<(), RepositoryError> {
        if self.conflict_next_update.swap(false, Ordering::SeqCst) {
            return Err(RepositoryError::Conflict {
                order_id: ctx.order_id(),
            });
        }

        let mut sagas = self.sagas.write();
        let stored = sagas
            .get(&ctx.order_id())
            .ok_or(RepositoryError::NotFound {
                order_id: ctx.order_id(),
            })?;

        if stored.updated_at() != ctx.persisted_at() {
            return Err(RepositoryError::Conflict {
                order_id: ctx.order_id(),
            });
        }

        sagas.insert(ctx.order_id(), snapshot(ctx));
        Ok(())
    }

    async fn find_by_id(&self, order_id: u64) -> Result<Option<SagaContext>, RepositoryError> {
        Ok(self.sagas.read().get(&order_id).cloned())
    }

    async fn find_by_order_no(
        &self,
        order_no: &str,
    ) -> Result<Option<SagaContext>, RepositoryError> {
        let order_id = match self.order_no_index.read().get(order_no) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.find_by_id(order_id).await
    }

    async fn exists_by_order_no(&self, order_no: &str) -> Result<bool, RepositoryError> {
        Ok(self.order_no_index.read().contains_key(order_no))
    }

    async fn save_steps(&self, steps: &[StepLog]) -> Result<(), RepositoryError> {
        if steps.is_empty() {
            return Ok(());
        }
        let mut map = self.steps.write();
        for log in steps {
            map.entry(log.order_id).or_default().push(log.clone());
        }
        Ok(())
    }

    async fn load_steps(&self, order_id: u64) -> Result<Vec<StepLog>, RepositoryError> {
        Ok(self.steps.read().get(&order_id).cloned().unwrap_or_default())
    }

    async fn find_stuck_sagas(
        &self,
        statuses: &[SagaStatus],
        staleness: Duration,
        limit: usize,
    ) -> Result<Vec<SagaContext>, RepositoryError> {
        let cutoff = Utc::now() - staleness;
        Ok(self
            .sagas
            .read()
            .values()
            .filter(|s| statuses.contains(&s.status()))
            .filter(|s| s.updated_at() < cutoff)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn try_lock(&self, order_id: u64) -> bool {
        self.locks.lock().insert(order_id)
    }

    async fn release_lock(&self, order_id: u64) {
        self.locks.lock().remove(&order_id);
    }
}
