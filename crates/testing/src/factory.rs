//! Context factory building the four-step order flow from scripted steps.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use order_saga_core::context::SagaContext;
use order_saga_core::engine::{SagaFactory, StartSagaCommand};
use order_saga_core::step::{SagaStep, StepAction, StepResult};

use crate::scripted_step::ScriptedStep;

/// Planned outcomes per action, consumed by the steps a factory creates.
#[derive(Debug, Default, Clone)]
pub struct ScriptBook {
    execute: HashMap<StepAction, Vec<StepResult>>,
    query: HashMap<StepAction, Vec<StepResult>>,
}

impl ScriptBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `execute` outcomes for every step created with this action.
    pub fn on_execute(mut self, action: StepAction, results: Vec<StepResult>) -> Self {
        self.execute.insert(action, results);
        self
    }

    /// Queue `query` outcomes for every step created with this action.
    pub fn on_query(mut self, action: StepAction, results: Vec<StepResult>) -> Self {
        self.query.insert(action, results);
        self
    }
}

/// [`SagaFactory`] producing [`ScriptedStep`] sequences for order commands.
///
/// The step sequence mirrors the order flow: one `RESERVE_INVENTORY` per
/// item, then `CHARGE_PAYMENT`, `CREATE_SHIPMENT`, `SEND_NOTIFICATION`.
/// Created steps are retained so tests can assert on backend call counts.
pub struct ScriptedSagaFactory {
    next_order_id: AtomicU64,
    book: ScriptBook,
    timeout: Option<chrono::Duration>,
    created: Mutex<HashMap<u64, Vec<Arc<ScriptedStep>>>>,
}

impl ScriptedSagaFactory {
    pub fn new(book: ScriptBook) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(1);
        Self {
            next_order_id: AtomicU64::new(seed),
            book,
            timeout: None,
            created: Mutex::new(HashMap::new()),
        }
    }

    /// Override the context timeout, e.g. an already-expired budget for
    /// timeout tests.
    pub fn with_timeout(mut self, timeout: chrono::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The steps created for a saga, in index order.
    pub fn steps_for(&self, order_id: u64) -> Vec<Arc<ScriptedStep>> {
        self.created.lock().get(&order_id).cloned().unwrap_or_default()
    }

    /// The created step with the given action, if any.
    pub fn step_with_action(&self, order_id: u64, action: StepAction) -> Option<Arc<ScriptedStep>> {
        self.steps_for(order_id)
            .into_iter()
            .find(|s| s.action() == action)
    }

    fn make_step(
        &self,
        order_id: u64,
        index: usize,
        action: StepAction,
        resource_id: &str,
    ) -> Arc<ScriptedStep> {
        let step = Arc::new(ScriptedStep::new(
            order_id,
            index,
            action,
            service_of(action),
            resource_id,
        ));
        if let Some(results) = self.book.execute.get(&action) {
            step.script_execute(results.clone());
        }
        if let Some(results) = self.book.query.get(&action) {
            step.script_query(results.clone());
        }
        self.created
            .lock()
            .entry(order_id)
            .or_default()
            .push(Arc::clone(&step));
        step
    }
}

impl SagaFactory for ScriptedSagaFactory {
    fn create_context(&self, cmd: &StartSagaCommand) -> SagaContext {
        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        tracing::info!(order_id, order_no = %cmd.order_no, "building saga context");

        let mut steps: Vec<Arc<dyn SagaStep>> = Vec::new();
        let mut index = 0;

        for item in &cmd.items {
            steps.push(self.make_step(
                order_id,
                index,
                StepAction::ReserveInventory,
                &item.product_id,
            ));
            index += 1;
        }
        steps.push(self.make_step(
            order_id,
            index,
            StepAction::ChargePayment,
            &cmd.payment.account_id,
        ));
        index += 1;
        steps.push(self.make_step(
            order_id,
            index,
            StepAction::CreateShipment,
            &cmd.shipping.address,
        ));
        index += 1;
        steps.push(self.make_step(
            order_id,
            index,
            StepAction::SendNotification,
            &cmd.customer_id.to_string(),
        ));

        let mut ctx = SagaContext::new(order_id, cmd.order_no.clone(), cmd.customer_id)
            .with_steps(steps)
            .with_metadata(cmd.metadata.clone().unwrap_or_default());
        if let Some(timeout) = self.timeout {
            ctx = ctx.with_timeout(timeout);
        }
        ctx
    }

    fn compensation_step(&self, forward: &dyn SagaStep) -> Option<Arc<dyn SagaStep>> {
        let action = forward.action().compensation_action()?;
        let step = Arc::new(ScriptedStep::compensation_for(
            forward,
            action,
            service_of(action),
            forward.step_id(),
        ));
        if let Some(results) = self.book.execute.get(&action) {
            step.script_execute(results.clone());
        }
        if let Some(results) = self.book.query.get(&action) {
            step.script_query(results.clone());
        }
        self.created
            .lock()
            .entry(forward.order_id())
            .or_default()
            .push(Arc::clone(&step));
        Some(step)
    }
}

/// Which backing service handles an action.
fn service_of(action: StepAction) -> &'static str {
    match action {
        StepAction::ReserveInventory | StepAction::ReleaseInventory => "INVENTORY",
        StepAction::ChargePayment | StepAction::RefundPayment => "PAYMENT",
        StepAction::CreateShipment | StepAction::CancelShipment => "SHIPPING",
        StepAction::SendNotification => "NOTIFICATION",
        StepAction::Compensate | StepAction::Query => "SAGA",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::sample_command;

    #[test]
    fn test_builds_four_step_flow() {
        let factory = ScriptedSagaFactory::new(ScriptBook::new());
        let ctx = factory.create_context(&sample_command("ORD-F1"));

        let actions: Vec<StepAction> = ctx.steps().iter().map(|s| s.action()).collect();
        assert_eq!(
            actions,
            vec![
                StepAction::ReserveInventory,
                StepAction::ChargePayment,
                StepAction::CreateShipment,
                StepAction::SendNotification,
            ]
        );
        assert_eq!(factory.steps_for(ctx.order_id()).len(), 4);
    }

    #[test]
    fn test_order_ids_are_unique() {
        let factory = ScriptedSagaFactory::new(ScriptBook::new());
        let a = factory.create_context(&sample_command("ORD-A"));
        let b = factory.create_context(&sample_command("ORD-B"));
        assert_ne!(a.order_id(), b.order_id());
    }

    #[test]
    fn test_compensation_step_pairing() {
        let factory = ScriptedSagaFactory::new(ScriptBook::new());
        let ctx = factory.create_context(&sample_command("ORD-C"));

        let charge = &ctx.steps()[1];
        let comp = factory.compensation_step(charge.as_ref()).unwrap();
        assert_eq!(comp.action(), StepAction::RefundPayment);
        assert_eq!(comp.index(), charge.index());
        assert!(comp.to_log().compensation);

        let notify = &ctx.steps()[3];
        assert!(factory.compensation_step(notify.as_ref()).is_none());
    }
}
