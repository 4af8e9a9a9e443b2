//!
//! # Saga Context
//!
//! In-memory representation of one saga instance: identity, status, the
//! forward and compensation step sequences with their cursors, the timeout
//! budget, and the processed-step audit trail.
//!
//! Lifecycle rules:
//!
//! - Created by the engine's `start`, mutated only by state handlers,
//!   persisted at every status change, dropped when the calling task
//!   returns. Durable state lives behind the persistence port.
//! - A context is confined to the task currently driving the saga; it is
//!   never shared across tasks. The per-saga lock at the persistence
//!   boundary keeps concurrent entries mutually exclusive.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::status::{SagaStatus, StepStatus};
use crate::step::{SagaStep, StepAction, StepLog, StepResult};

/// Cursor value before the first step has been taken.
pub const BEGIN_STEP: isize = -1;

/// Time reserved for running compensations once a saga decides to revert.
pub fn min_revert_budget() -> Duration {
    Duration::minutes(5)
}

/// Default overall time budget for a saga.
pub fn default_timeout() -> Duration {
    Duration::minutes(30)
}

/// Forward actions whose effects cannot be undone once landed. A saga with
/// such a step already succeeded goes to manual review instead of reverting.
pub const DEFAULT_NON_UNDOABLE: [StepAction; 2] =
    [StepAction::CreateShipment, StepAction::SendNotification];

/// One saga instance.
#[derive(Clone)]
pub struct SagaContext {
    order_id: u64,
    order_no: String,
    customer_id: u64,

    status: SagaStatus,
    last_result: Option<StepResult>,

    steps: Vec<Arc<dyn SagaStep>>,
    /// Next forward index, advance-before-execute. `BEGIN_STEP` before the
    /// first step; `steps.len()` once the forward flow is exhausted.
    current_step: isize,
    compensation_steps: Vec<Arc<dyn SagaStep>>,
    current_compensation_step: isize,
    /// Ids of steps whose execution has been attempted, in attempt order.
    processed_step_ids: Vec<String>,

    timeout: Duration,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Optimistic-lock witness: the `updated_at` value the persistence port
    /// last acknowledged.
    persisted_at: DateTime<Utc>,

    metadata: HashMap<String, serde_json::Value>,
    compensation_allowed: bool,
    non_undoable_actions: Vec<StepAction>,
}

impl std::fmt::Debug for SagaContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaContext")
            .field("order_id", &self.order_id)
            .field("order_no", &self.order_no)
            .field("status", &self.status)
            .field("current_step", &self.current_step)
            .field("current_compensation_step", &self.current_compensation_step)
            .field("steps", &self.steps.len())
            .field("compensation_steps", &self.compensation_steps.len())
            .finish()
    }
}

impl SagaContext {
    pub fn new(order_id: u64, order_no: impl Into<String>, customer_id: u64) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            order_no: order_no.into(),
            customer_id,
            status: SagaStatus::Init,
            last_result: None,
            steps: Vec::new(),
            current_step: BEGIN_STEP,
            compensation_steps: Vec::new(),
            current_compensation_step: BEGIN_STEP,
            processed_step_ids: Vec::new(),
            timeout: default_timeout(),
            created_at: now,
            updated_at: now,
            persisted_at: now,
            metadata: HashMap::new(),
            compensation_allowed: true,
            non_undoable_actions: DEFAULT_NON_UNDOABLE.to_vec(),
        }
    }

    pub fn with_steps(mut self, steps: Vec<Arc<dyn SagaStep>>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_compensation_allowed(mut self, allowed: bool) -> Self {
        self.compensation_allowed = allowed;
        self
    }

    pub fn with_non_undoable_actions(mut self, actions: Vec<StepAction>) -> Self {
        self.non_undoable_actions = actions;
        self
    }

    /// Backdate creation; only meaningful for tests exercising timeouts and
    /// staleness scans.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    // ---- identity & plain accessors ----

    pub fn order_id(&self) -> u64 {
        self.order_id
    }

    pub fn order_no(&self) -> &str {
        &self.order_no
    }

    pub fn customer_id(&self) -> u64 {
        self.customer_id
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    pub fn last_result(&self) -> Option<&StepResult> {
        self.last_result.as_ref()
    }

    pub fn set_last_result(&mut self, result: StepResult) {
        self.last_result = Some(result);
    }

    pub fn steps(&self) -> &[Arc<dyn SagaStep>] {
        &self.steps
    }

    pub fn compensation_steps(&self) -> &[Arc<dyn SagaStep>] {
        &self.compensation_steps
    }

    pub fn processed_step_ids(&self) -> &[String] {
        &self.processed_step_ids
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    pub fn compensation_allowed(&self) -> bool {
        self.compensation_allowed
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// The optimistic-lock witness carried by the next status write.
    pub fn persisted_at(&self) -> DateTime<Utc> {
        self.persisted_at
    }

    /// Advance the witness after the port acknowledged a write.
    pub fn mark_persisted(&mut self) {
        self.persisted_at = self.updated_at;
    }

    // ---- status management ----

    /// Transition the saga status, stamping `updated_at` atomically with the
    /// status write.
    pub fn set_status(&mut self, status: SagaStatus) {
        if self.status != status {
            tracing::info!(
                order_id = self.order_id,
                from = %self.status,
                to = %status,
                "saga status transition"
            );
        }
        self.status = status;
        self.updated_at = Utc::now();
    }

    // ---- initialization / rehydration ----

    /// Initialize cursors and the processed-step list.
    ///
    /// For a new saga pass no existing logs. For recovery, pass the
    /// previously persisted step logs; the forward cursor lands on the last
    /// attempted step so the resuming handler can query it.
    pub fn init_saga(&mut self, existing: &[StepLog]) {
        self.current_step = if self.is_reverting() {
            self.steps.len() as isize
        } else if existing.is_empty() {
            BEGIN_STEP
        } else {
            existing.len() as isize - 1
        };

        let existing_ids: Vec<&str> = existing.iter().map(|l| l.step_id.as_str()).collect();
        self.processed_step_ids = self
            .steps
            .iter()
            .map(|s| s.step_id().to_string())
            .filter(|id| existing_ids.contains(&id.as_str()))
            .collect();
    }

    // ---- step navigation ----

    /// Advance the forward cursor and return the step now under it,
    /// recording it as processed. Advance-before-execute: a step is in the
    /// audit trail from the moment an attempt begins.
    pub fn next_step(&mut self) -> Option<Arc<dyn SagaStep>> {
        let next = self.current_step + 1;
        if next < 0 || next as usize >= self.steps.len() {
            return None;
        }
        self.current_step = next;
        let step = Arc::clone(&self.steps[next as usize]);
        self.processed_step_ids.push(step.step_id().to_string());
        Some(step)
    }

    /// The step under the active cursor without advancing: the compensation
    /// cursor while reverting, the forward cursor otherwise.
    pub fn current_step(&self) -> Option<Arc<dyn SagaStep>> {
        let (cursor, steps) = if self.is_reverting() {
            (self.current_compensation_step, &self.compensation_steps)
        } else {
            (self.current_step, &self.steps)
        };
        if cursor < 0 || cursor as usize >= steps.len() {
            return None;
        }
        Some(Arc::clone(&steps[cursor as usize]))
    }

    /// Advance the compensation cursor and return the step under it.
    pub fn next_compensation_step(&mut self) -> Option<Arc<dyn SagaStep>> {
        let next = self.current_compensation_step + 1;
        if next < 0 || next as usize >= self.compensation_steps.len() {
            return None;
        }
        self.current_compensation_step = next;
        Some(Arc::clone(&self.compensation_steps[next as usize]))
    }

    pub fn has_more_compensation_steps(&self) -> bool {
        ((self.current_compensation_step + 1) as usize) < self.compensation_steps.len()
    }

    /// Whether the active flow has run to completion: the last forward step
    /// succeeded, or every compensation step succeeded.
    pub fn is_last_step(&self) -> bool {
        if self.is_reverting() {
            return match self.compensation_steps.last() {
                None => true,
                Some(last) => last.status() == StepStatus::Succeeded,
            };
        }
        match self.steps.last() {
            None => true,
            Some(last) => last.status() == StepStatus::Succeeded,
        }
    }

    // ---- state queries ----

    pub fn is_reverting(&self) -> bool {
        self.status.is_reverting()
    }

    /// Terminal either by status or by exceeded time budget.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal() || self.is_timed_out()
    }

    pub fn is_timed_out(&self) -> bool {
        Utc::now() > self.created_at + self.timeout
    }

    pub fn remaining_time(&self) -> Duration {
        self.timeout - (Utc::now() - self.created_at)
    }

    // ---- failure handling ----

    /// Decide the next status after a forward step failure.
    ///
    /// 1. Nothing has landed (no steps, or the first step failed): `FAILED`.
    /// 2. A non-undoable action already succeeded: `MANUAL_REVIEW`.
    /// 3. Compensation allowed and enough budget: `REVERTING`, extending the
    ///    timeout when the residual budget is short.
    /// 4. Otherwise: `REVERT_FAILED`.
    pub fn evaluate_failed_step(&mut self) -> SagaStatus {
        if self.steps.is_empty() || self.steps[0].status() == StepStatus::Failed {
            return SagaStatus::Failed;
        }

        let has_undoable_blocker = self.steps.iter().any(|s| {
            !s.action().is_compensation()
                && self.non_undoable_actions.contains(&s.action())
                && s.status() == StepStatus::Succeeded
        });
        if has_undoable_blocker {
            return SagaStatus::ManualReview;
        }

        if self.compensation_allowed && self.remaining_time() > min_revert_budget() {
            self.extend_timeout_if_needed();
            return SagaStatus::Reverting;
        }

        SagaStatus::RevertFailed
    }

    fn extend_timeout_if_needed(&mut self) {
        let remaining = self.remaining_time();
        if remaining < min_revert_budget() {
            let extension = min_revert_budget() - remaining;
            self.timeout = self.timeout + extension;
            tracing::info!(
                order_id = self.order_id,
                extension_secs = extension.num_seconds(),
                "extended saga timeout to cover compensation"
            );
        }
    }

    // ---- step lookup & compensation building ----

    /// Find a forward or compensation step by id.
    pub fn find_step(&self, step_id: &str) -> Option<Arc<dyn SagaStep>> {
        self.steps
            .iter()
            .chain(self.compensation_steps.iter())
            .find(|s| s.step_id() == step_id)
            .map(Arc::clone)
    }

    /// Logs of all processed steps, ordered by index.
    pub fn processed_step_logs(&self) -> Vec<StepLog> {
        let mut logs: Vec<StepLog> = self
            .processed_step_ids
            .iter()
            .filter_map(|id| self.find_step(id))
            .map(|s| s.to_log())
            .collect();
        logs.sort_by_key(|l| l.index);
        logs
    }

    /// Succeeded forward steps that require compensation, in reverse
    /// execution order. Later steps may depend on earlier ones, so undoing
    /// runs backwards.
    pub fn steps_needing_compensation(&self) -> Vec<Arc<dyn SagaStep>> {
        let mut needing: Vec<Arc<dyn SagaStep>> = self
            .steps
            .iter()
            .filter(|s| s.needs_compensation())
            .map(Arc::clone)
            .collect();
        needing.reverse();
        needing
    }

    /// Build the compensation sequence from the succeeded forward steps,
    /// resetting the compensation cursor. Called on entry into `REVERTING`.
    pub fn build_compensation_steps<F>(&mut self, factory: F)
    where
        F: Fn(&dyn SagaStep) -> Option<Arc<dyn SagaStep>>,
    {
        self.compensation_steps = self
            .steps_needing_compensation()
            .iter()
            .filter_map(|s| factory(s.as_ref()))
            .collect();
        self.current_compensation_step = BEGIN_STEP;
    }

    /// Install a prebuilt compensation sequence (recovery path), resetting
    /// the cursor.
    pub fn set_compensation_steps(&mut self, steps: Vec<Arc<dyn SagaStep>>) {
        self.compensation_steps = steps;
        self.current_compensation_step = BEGIN_STEP;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::step::StepState;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct FixedStep {
        state: StepState,
    }

    impl FixedStep {
        fn new(order_id: u64, index: usize, action: StepAction) -> Arc<Self> {
            Arc::new(Self {
                state: StepState::new(order_id, index, action, "TEST"),
            })
        }

        fn with_status(self: Arc<Self>, status: StepStatus) -> Arc<Self> {
            self.state.complete(StepResult::with_status(status));
            self
        }
    }

    #[async_trait]
    impl SagaStep for FixedStep {
        fn step_id(&self) -> &str {
            self.state.step_id()
        }
        fn order_id(&self) -> u64 {
            self.state.order_id()
        }
        fn index(&self) -> usize {
            self.state.index()
        }
        fn action(&self) -> StepAction {
            self.state.action()
        }
        fn status(&self) -> StepStatus {
            self.state.status()
        }
        fn result(&self) -> Option<StepResult> {
            self.state.result()
        }
        async fn execute(&self) -> StepResult {
            StepResult::success()
        }
        async fn query(&self) -> StepResult {
            StepResult::unknown()
        }
        fn update_status(&self, result: StepResult) -> bool {
            self.state.update_status(result)
        }
        fn to_log(&self) -> StepLog {
            self.state.to_log()
        }
    }

    fn four_step_context() -> SagaContext {
        let steps: Vec<Arc<dyn SagaStep>> = vec![
            FixedStep::new(1, 0, StepAction::ReserveInventory),
            FixedStep::new(1, 1, StepAction::ChargePayment),
            FixedStep::new(1, 2, StepAction::CreateShipment),
            FixedStep::new(1, 3, StepAction::SendNotification),
        ];
        let mut ctx = SagaContext::new(1, "ORD-1", 100).with_steps(steps);
        ctx.init_saga(&[]);
        ctx
    }

    #[test]
    fn test_cursor_advances_and_records() {
        let mut ctx = four_step_context();
        assert!(ctx.current_step().is_none());

        let first = ctx.next_step().unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(ctx.processed_step_ids().len(), 1);
        assert_eq!(ctx.current_step().unwrap().index(), 0);

        let second = ctx.next_step().unwrap();
        assert_eq!(second.index(), 1);
        assert_eq!(ctx.processed_step_ids().len(), 2);
    }

    #[test]
    fn test_next_step_exhausts() {
        let mut ctx = four_step_context();
        for _ in 0..4 {
            assert!(ctx.next_step().is_some());
        }
        assert!(ctx.next_step().is_none());
    }

    #[test]
    fn test_is_last_step_forward() {
        let ctx = four_step_context();
        assert!(!ctx.is_last_step());

        for step in ctx.steps() {
            step.update_status(StepResult::success());
        }
        assert!(ctx.is_last_step());
    }

    #[test]
    fn test_status_transition_stamps_updated_at() {
        let mut ctx = four_step_context();
        let before = ctx.updated_at();
        std::thread::sleep(std::time::Duration::from_millis(2));
        ctx.set_status(SagaStatus::Processing);
        assert!(ctx.updated_at() > before);
        assert_eq!(ctx.persisted_at(), before);
        ctx.mark_persisted();
        assert_eq!(ctx.persisted_at(), ctx.updated_at());
    }

    #[test]
    fn test_evaluate_first_step_failed() {
        let mut ctx = four_step_context();
        ctx.steps()[0].update_status(StepResult::failed(ErrorCode::InsufficientInventory, "out"));
        assert_eq!(ctx.evaluate_failed_step(), SagaStatus::Failed);
    }

    #[test]
    fn test_evaluate_reverting_when_compensable() {
        let mut ctx = four_step_context();
        ctx.steps()[0].update_status(StepResult::success());
        ctx.steps()[1].update_status(StepResult::success());
        ctx.steps()[2].update_status(StepResult::failed(ErrorCode::ShippingServiceError, "down"));
        assert_eq!(ctx.evaluate_failed_step(), SagaStatus::Reverting);
    }

    #[test]
    fn test_evaluate_manual_review_on_non_undoable_success() {
        let mut ctx = four_step_context();
        ctx.steps()[0].update_status(StepResult::success());
        ctx.steps()[1].update_status(StepResult::success());
        ctx.steps()[2].update_status(StepResult::success()); // CREATE_SHIPMENT landed
        ctx.steps()[3].update_status(StepResult::failed(ErrorCode::InternalError, "smtp"));
        assert_eq!(ctx.evaluate_failed_step(), SagaStatus::ManualReview);
    }

    #[test]
    fn test_evaluate_revert_failed_when_disallowed() {
        let mut ctx = four_step_context().with_compensation_allowed(false);
        ctx.steps()[0].update_status(StepResult::success());
        ctx.steps()[1].update_status(StepResult::failed(ErrorCode::PaymentDeclined, "declined"));
        assert_eq!(ctx.evaluate_failed_step(), SagaStatus::RevertFailed);
    }

    #[test]
    fn test_evaluate_revert_failed_when_no_budget() {
        let mut ctx = four_step_context()
            .with_created_at(Utc::now() - Duration::minutes(28))
            .with_timeout(Duration::minutes(30));
        ctx.steps()[0].update_status(StepResult::success());
        ctx.steps()[1].update_status(StepResult::failed(ErrorCode::PaymentDeclined, "declined"));
        // 2 minutes left, below the 5 minute revert budget.
        assert_eq!(ctx.evaluate_failed_step(), SagaStatus::RevertFailed);
    }

    #[test]
    fn test_evaluate_is_stable_across_calls() {
        let mut ctx = four_step_context();
        ctx.steps()[0].update_status(StepResult::success());
        ctx.steps()[1].update_status(StepResult::failed(ErrorCode::PaymentDeclined, "declined"));
        let first = ctx.evaluate_failed_step();
        let second = ctx.evaluate_failed_step();
        assert_eq!(first, second);
    }

    #[test]
    fn test_compensation_ordering_reversed() {
        let mut ctx = four_step_context();
        ctx.steps()[0].update_status(StepResult::success());
        ctx.steps()[1].update_status(StepResult::success());

        let needing = ctx.steps_needing_compensation();
        assert_eq!(needing.len(), 2);
        assert_eq!(needing[0].action(), StepAction::ChargePayment);
        assert_eq!(needing[1].action(), StepAction::ReserveInventory);

        ctx.build_compensation_steps(|forward| {
            forward.action().compensation_action().map(|action| {
                FixedStep::new(forward.order_id(), forward.index(), action) as Arc<dyn SagaStep>
            })
        });
        let comps = ctx.compensation_steps();
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0].action(), StepAction::RefundPayment);
        assert_eq!(comps[1].action(), StepAction::ReleaseInventory);
    }

    #[test]
    fn test_compensation_skips_notification() {
        let ctx = four_step_context();
        for step in ctx.steps() {
            step.update_status(StepResult::success());
        }
        let needing = ctx.steps_needing_compensation();
        // SEND_NOTIFICATION has no inverse and is excluded.
        assert_eq!(needing.len(), 3);
        assert_eq!(needing[0].action(), StepAction::CreateShipment);
    }

    #[test]
    fn test_compensation_cursor() {
        let mut ctx = four_step_context();
        ctx.set_compensation_steps(vec![
            FixedStep::new(1, 1, StepAction::RefundPayment),
            FixedStep::new(1, 0, StepAction::ReleaseInventory),
        ]);
        assert!(ctx.has_more_compensation_steps());
        let first = ctx.next_compensation_step().unwrap();
        assert_eq!(first.action(), StepAction::RefundPayment);
        assert!(ctx.has_more_compensation_steps());
        ctx.next_compensation_step().unwrap();
        assert!(!ctx.has_more_compensation_steps());
        assert!(ctx.next_compensation_step().is_none());
    }

    #[test]
    fn test_timeout_detection() {
        let ctx = SagaContext::new(1, "ORD-T", 1)
            .with_created_at(Utc::now() - Duration::minutes(31))
            .with_timeout(Duration::minutes(30));
        assert!(ctx.is_timed_out());
        assert!(ctx.is_terminal());
        assert!(ctx.remaining_time() < Duration::zero());
    }

    #[test]
    fn test_init_saga_rehydrates_cursor() {
        let mut ctx = four_step_context();
        let logs: Vec<StepLog> = ctx.steps()[..2].iter().map(|s| s.to_log()).collect();
        ctx.init_saga(&logs);
        // Cursor sits on the last attempted step so resume can query it.
        assert_eq!(ctx.current_step().unwrap().index(), 1);
        assert_eq!(ctx.processed_step_ids().len(), 2);
    }

    #[test]
    fn test_find_step_covers_compensations() {
        let mut ctx = four_step_context();
        ctx.set_compensation_steps(vec![FixedStep::new(1, 1, StepAction::RefundPayment)]);
        assert!(ctx.find_step("1:001:REFUND_PAYMENT:TEST").is_some());
        assert!(ctx.find_step("1:000:RESERVE_INVENTORY:TEST").is_some());
        assert!(ctx.find_step("nope").is_none());
    }

    #[test]
    fn test_processed_step_logs_sorted() {
        let mut ctx = four_step_context();
        ctx.next_step();
        ctx.next_step();
        let logs = ctx.processed_step_logs();
        assert_eq!(logs.len(), 2);
        assert!(logs[0].index < logs[1].index);
    }

    #[test]
    fn test_is_last_step_reverting_empty_is_done() {
        let mut ctx = four_step_context();
        ctx.set_status(SagaStatus::Reverting);
        assert!(ctx.is_last_step());
    }

    #[test]
    fn test_first_step_failed_never_reverts() {
        let mut ctx = four_step_context();
        ctx.steps()[0].update_status(StepResult::failed(ErrorCode::InventoryServiceError, "down"));
        // Even with compensation allowed and budget available.
        assert_eq!(ctx.evaluate_failed_step(), SagaStatus::Failed);
    }

    #[test]
    fn test_fixed_step_with_status_helper() {
        let step = FixedStep::new(1, 0, StepAction::ChargePayment)
            .with_status(StepStatus::Succeeded);
        assert_eq!(step.status(), StepStatus::Succeeded);
    }
}
