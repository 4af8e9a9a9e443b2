//! A saga step whose outcomes are scripted, standing in for real service
//! integrations in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use order_saga_core::status::StepStatus;
use order_saga_core::step::{SagaStep, StepAction, StepLog, StepResult, StepState};

/// A [`SagaStep`] that replays scripted results.
///
/// - `execute` pops the next scripted outcome; with no script it succeeds
///   with an auto-generated external reference.
/// - A step whose local status is already final replays its recorded result
///   instead of consuming the script. Per the idempotency contract, re-executing
///   a completed step observes the earlier outcome, without touching the
///   backend again.
/// - `query` pops from its own script; with no script it reports the
///   recorded final result if there is one, `UNKNOWN` otherwise. Queries
///   never mutate local state.
pub struct ScriptedStep {
    state: StepState,
    resource_id: String,
    execute_script: Mutex<VecDeque<StepResult>>,
    query_script: Mutex<VecDeque<StepResult>>,
    backend_calls: AtomicUsize,
    query_calls: AtomicUsize,
}

impl ScriptedStep {
    pub fn new(
        order_id: u64,
        index: usize,
        action: StepAction,
        service: &str,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            state: StepState::new(order_id, index, action, service),
            resource_id: resource_id.into(),
            execute_script: Mutex::new(VecDeque::new()),
            query_script: Mutex::new(VecDeque::new()),
            backend_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    /// A compensation step paired with a succeeded forward step.
    pub fn compensation_for(
        forward: &dyn SagaStep,
        action: StepAction,
        service: &str,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            state: StepState::compensation_for(forward, action, service),
            resource_id: resource_id.into(),
            execute_script: Mutex::new(VecDeque::new()),
            query_script: Mutex::new(VecDeque::new()),
            backend_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    /// Queue outcomes for successive `execute` calls.
    pub fn script_execute(&self, results: impl IntoIterator<Item = StepResult>) {
        self.execute_script.lock().extend(results);
    }

    /// Queue outcomes for successive `query` calls.
    pub fn script_query(&self, results: impl IntoIterator<Item = StepResult>) {
        self.query_script.lock().extend(results);
    }

    /// How many times the simulated backend was actually invoked.
    pub fn backend_calls(&self) -> usize {
        self.backend_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    fn default_success(&self) -> StepResult {
        StepResult::success_with_ref(format!("ref-{}", self.state.step_id()))
    }
}

#[async_trait]
impl SagaStep for ScriptedStep {
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
        if self.state.status().is_final() {
            if let Some(prior) = self.state.result() {
                tracing::info!(
                    step_id = self.state.step_id(),
                    "step already settled, replaying prior outcome"
                );
                return prior;
            }
        }

        self.backend_calls.fetch_add(1, Ordering::SeqCst);
        self.state.begin_execute();
        let result = self
            .execute_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_success());
        self.state.complete(result.clone());
        result
    }

    async fn query(&self) -> StepResult {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.query_script.lock().pop_front() {
            return scripted;
        }
        if self.state.status().is_final() {
            if let Some(prior) = self.state.result() {
                return prior;
            }
        }
        StepResult::unknown()
    }

    fn update_status(&self, result: StepResult) -> bool {
        self.state.update_status(result)
    }

    fn to_log(&self) -> StepLog {
        self.state.to_log()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use order_saga_core::error::ErrorCode;

    #[tokio::test]
    async fn test_default_execute_succeeds() {
        let step = ScriptedStep::new(1, 0, StepAction::ReserveInventory, "INVENTORY", "SKU-1");
        let result = step.execute().await;
        assert!(result.is_success());
        assert_eq!(step.status(), StepStatus::Succeeded);
        assert_eq!(step.backend_calls(), 1);
    }

    #[tokio::test]
    async fn test_scripted_outcomes_in_order() {
        let step = ScriptedStep::new(1, 1, StepAction::ChargePayment, "PAYMENT", "acct");
        step.script_execute([
            StepResult::failed(ErrorCode::PaymentServiceError, "gateway down"),
            StepResult::success(),
        ]);

        assert_eq!(step.execute().await.status(), StepStatus::Failed);
        assert_eq!(step.status(), StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_reexecute_replays_prior_outcome() {
        let step = ScriptedStep::new(1, 0, StepAction::ChargePayment, "PAYMENT", "acct");
        let first = step.execute().await;
        let second = step.execute().await;

        assert_eq!(first, second);
        // The backend saw exactly one call.
        assert_eq!(step.backend_calls(), 1);
    }

    #[tokio::test]
    async fn test_query_prefers_script_then_recorded_result() {
        let step = ScriptedStep::new(1, 2, StepAction::CreateShipment, "SHIPPING", "addr");
        assert_eq!(step.query().await.status(), StepStatus::Unknown);

        step.script_query([StepResult::pending("ship-9")]);
        assert_eq!(step.query().await.status(), StepStatus::Pending);

        step.execute().await;
        assert_eq!(step.query().await.status(), StepStatus::Succeeded);
        assert_eq!(step.query_calls(), 3);
    }

    #[tokio::test]
    async fn test_query_does_not_mutate_state() {
        let step = ScriptedStep::new(1, 0, StepAction::ReserveInventory, "INVENTORY", "SKU-1");
        step.script_query([StepResult::success()]);
        step.query().await;
        assert_eq!(step.status(), StepStatus::Unknown);
    }
}
