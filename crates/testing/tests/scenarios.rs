//! End-to-end saga flows over the in-memory repository: the order saga with
//! steps RESERVE_INVENTORY, CHARGE_PAYMENT, CREATE_SHIPMENT,
//! SEND_NOTIFICATION.

use order_saga_core::error::ErrorCode;
use order_saga_core::port::SagaRepository;
use order_saga_core::recovery::{RecoveryConfig, RecoverySweeper};
use order_saga_core::status::{SagaStatus, StepStatus};
use order_saga_core::step::{SagaStep, StepAction, StepResult};
use order_saga_testing::{sample_command, ScriptBook, TestHarness};

#[tokio::test]
async fn happy_path_runs_all_steps_to_success() {
    order_saga_testing::init_tracing();
    let harness = TestHarness::new(ScriptBook::new());

    let ctx = harness.engine.start(sample_command("ORD-HAPPY")).await;

    assert_eq!(ctx.status(), SagaStatus::Success);
    assert!(ctx.compensation_steps().is_empty());

    let steps = harness.factory.steps_for(ctx.order_id());
    let expected_ids: Vec<String> = steps.iter().map(|s| s.step_id().to_string()).collect();
    assert_eq!(ctx.processed_step_ids(), expected_ids.as_slice());
    for step in &steps {
        assert_eq!(step.status(), StepStatus::Succeeded);
        assert_eq!(step.backend_calls(), 1);
    }

    let stored = harness.engine.query(ctx.order_id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), SagaStatus::Success);
    assert!(harness.engine.exists("ORD-HAPPY").await.unwrap());
}

#[tokio::test]
async fn mid_flow_failure_compensates_in_reverse_order() {
    let book = ScriptBook::new().on_execute(
        StepAction::CreateShipment,
        vec![StepResult::failed(
            ErrorCode::ShippingServiceError,
            "carrier unavailable",
        )],
    );
    let harness = TestHarness::new(book);

    let ctx = harness.engine.start(sample_command("ORD-REVERT")).await;

    assert_eq!(ctx.status(), SagaStatus::Reverted);

    let comp_actions: Vec<StepAction> =
        ctx.compensation_steps().iter().map(|s| s.action()).collect();
    assert_eq!(
        comp_actions,
        vec![StepAction::RefundPayment, StepAction::ReleaseInventory]
    );
    for comp in ctx.compensation_steps() {
        assert_eq!(comp.status(), StepStatus::Succeeded);
    }

    // The notification step never ran.
    let notify = harness
        .factory
        .step_with_action(ctx.order_id(), StepAction::SendNotification)
        .unwrap();
    assert_eq!(notify.backend_calls(), 0);
}

#[tokio::test]
async fn first_step_failure_fails_without_compensation() {
    let book = ScriptBook::new().on_execute(
        StepAction::ReserveInventory,
        vec![StepResult::failed(
            ErrorCode::InsufficientInventory,
            "out of stock",
        )],
    );
    let harness = TestHarness::new(book);

    let ctx = harness.engine.start(sample_command("ORD-NOSTOCK")).await;

    assert_eq!(ctx.status(), SagaStatus::Failed);
    assert!(ctx.compensation_steps().is_empty());
    assert_eq!(
        ctx.last_result().unwrap().error_code(),
        ErrorCode::InsufficientInventory
    );
    // Only the first step was attempted.
    assert_eq!(ctx.processed_step_ids().len(), 1);
}

#[tokio::test]
async fn unsafe_to_undo_success_goes_to_manual_review() {
    // CREATE_SHIPMENT is non-undoable by policy; it succeeded before the
    // notification failed, so automatic compensation is off the table.
    let book = ScriptBook::new().on_execute(
        StepAction::SendNotification,
        vec![StepResult::failed(ErrorCode::InternalError, "smtp refused")],
    );
    let harness = TestHarness::new(book);

    let ctx = harness.engine.start(sample_command("ORD-REVIEW")).await;

    assert_eq!(ctx.status(), SagaStatus::ManualReview);
    assert!(ctx.compensation_steps().is_empty());

    // No compensation step was even created.
    let created = harness.factory.steps_for(ctx.order_id());
    assert_eq!(created.len(), 4);
    assert!(created.iter().all(|s| !s.action().is_compensation()));
}

#[tokio::test]
async fn pending_step_parks_then_callback_completes() {
    let book = ScriptBook::new().on_execute(
        StepAction::ChargePayment,
        vec![StepResult::pending("gw-txn-77")],
    );
    let harness = TestHarness::new(book);

    let ctx = harness.engine.start(sample_command("ORD-ASYNC")).await;
    assert_eq!(ctx.status(), SagaStatus::Pending);
    assert_eq!(
        ctx.last_result().unwrap().external_ref_id(),
        Some("gw-txn-77")
    );

    let order_id = ctx.order_id();
    let charge = harness
        .factory
        .step_with_action(order_id, StepAction::ChargePayment)
        .unwrap();
    assert_eq!(charge.status(), StepStatus::Pending);

    // Shipment and notification have not run while parked.
    let shipment = harness
        .factory
        .step_with_action(order_id, StepAction::CreateShipment)
        .unwrap();
    assert_eq!(shipment.backend_calls(), 0);

    let resumed = harness
        .engine
        .resume(order_saga_core::ResumeSagaCommand::callback(
            order_id,
            charge.step_id(),
            StepResult::success_with_ref("gw-txn-77"),
            "gateway-webhook",
        ))
        .await
        .unwrap();

    assert_eq!(resumed.status(), SagaStatus::Success);
    assert_eq!(charge.status(), StepStatus::Succeeded);
    assert_eq!(shipment.backend_calls(), 1);
    // The payment backend was called once; the callback settled it.
    assert_eq!(charge.backend_calls(), 1);
}

#[tokio::test]
async fn unknown_outcome_is_recovered_via_query() {
    // The shipment call dies without an answer; the saga parks. The
    // recovery sweep queries the carrier, learns it actually succeeded, and
    // finishes the saga.
    let book = ScriptBook::new()
        .on_execute(StepAction::CreateShipment, vec![StepResult::unknown()])
        .on_query(
            StepAction::CreateShipment,
            vec![StepResult::success_with_ref("ship-55")],
        );
    let harness = TestHarness::new(book);

    let ctx = harness.engine.start(sample_command("ORD-CRASH")).await;
    assert_eq!(ctx.status(), SagaStatus::Pending);

    let sweeper = RecoverySweeper::new(
        harness.engine.clone(),
        RecoveryConfig::new().with_staleness(chrono::Duration::seconds(-1)),
    );
    let recovered = sweeper.run_once().await;
    assert_eq!(recovered, 1);

    let stored = harness.engine.query(ctx.order_id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), SagaStatus::Success);

    let shipment = harness
        .factory
        .step_with_action(ctx.order_id(), StepAction::CreateShipment)
        .unwrap();
    // Query settled the outcome; the backend was not re-invoked.
    assert_eq!(shipment.backend_calls(), 1);
    assert_eq!(shipment.query_calls(), 1);

    let notify = harness
        .factory
        .step_with_action(ctx.order_id(), StepAction::SendNotification)
        .unwrap();
    assert_eq!(notify.backend_calls(), 1);
}

#[tokio::test]
async fn pending_compensation_resumes_via_callback() {
    let book = ScriptBook::new()
        .on_execute(
            StepAction::CreateShipment,
            vec![StepResult::failed(
                ErrorCode::ShippingServiceError,
                "carrier unavailable",
            )],
        )
        .on_execute(
            StepAction::RefundPayment,
            vec![StepResult::pending("refund-31")],
        );
    let harness = TestHarness::new(book);

    let ctx = harness.engine.start(sample_command("ORD-SLOWREFUND")).await;
    assert_eq!(ctx.status(), SagaStatus::RevertingPending);

    let refund_id = ctx.compensation_steps()[0].step_id().to_string();
    let resumed = harness
        .engine
        .resume(order_saga_core::ResumeSagaCommand::callback(
            ctx.order_id(),
            refund_id,
            StepResult::success_with_ref("refund-31"),
            "payment-webhook",
        ))
        .await
        .unwrap();

    assert_eq!(resumed.status(), SagaStatus::Reverted);
}

#[tokio::test]
async fn failed_compensation_requires_manual_intervention() {
    let book = ScriptBook::new()
        .on_execute(
            StepAction::CreateShipment,
            vec![StepResult::failed(
                ErrorCode::ShippingServiceError,
                "carrier unavailable",
            )],
        )
        .on_execute(
            StepAction::RefundPayment,
            vec![StepResult::failed(
                ErrorCode::PaymentServiceError,
                "refund rejected",
            )],
        );
    let harness = TestHarness::new(book);

    let ctx = harness.engine.start(sample_command("ORD-STUCKREFUND")).await;

    assert_eq!(ctx.status(), SagaStatus::RevertFailed);
    assert_eq!(
        ctx.last_result().unwrap().error_code(),
        ErrorCode::PaymentServiceError
    );
    // The inventory release never ran after the refund failed.
    let release = harness
        .factory
        .step_with_action(ctx.order_id(), StepAction::ReleaseInventory)
        .unwrap();
    assert_eq!(release.backend_calls(), 0);
}

#[tokio::test]
async fn expired_time_budget_ends_in_timeout() {
    let harness =
        TestHarness::builder(ScriptBook::new()).with_timeout(chrono::Duration::seconds(-1)).build();

    let ctx = harness.engine.start(sample_command("ORD-LATE")).await;

    assert_eq!(ctx.status(), SagaStatus::Timeout);
    // No step ran: the budget was gone before processing began.
    assert!(ctx.processed_step_ids().is_empty());

    let stored = harness.engine.query(ctx.order_id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), SagaStatus::Timeout);
}

#[tokio::test]
async fn duplicate_order_no_is_rejected() {
    let harness = TestHarness::new(ScriptBook::new());

    let first = harness.engine.start(sample_command("ORD-DUP")).await;
    assert_eq!(first.status(), SagaStatus::Success);

    let second = harness.engine.start(sample_command("ORD-DUP")).await;
    assert_eq!(second.status(), SagaStatus::Failed);
    assert_eq!(
        second.last_result().unwrap().error_code(),
        ErrorCode::DuplicateRequest
    );
}

#[tokio::test]
async fn resume_refuses_terminal_saga() {
    let harness = TestHarness::new(ScriptBook::new());
    let ctx = harness.engine.start(sample_command("ORD-DONE")).await;
    assert_eq!(ctx.status(), SagaStatus::Success);

    let resumed = harness
        .engine
        .resume(order_saga_core::ResumeSagaCommand::recovery(
            ctx.order_id(),
            "test",
        ))
        .await
        .unwrap();
    assert_eq!(resumed.status(), SagaStatus::Success);

    // No step was re-executed.
    for step in harness.factory.steps_for(ctx.order_id()) {
        assert_eq!(step.backend_calls(), 1);
    }
}

#[tokio::test]
async fn resume_of_unknown_saga_is_not_found() {
    let harness = TestHarness::new(ScriptBook::new());
    let err = harness
        .engine
        .resume(order_saga_core::ResumeSagaCommand::recovery(999_999, "test"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        order_saga_core::SagaError::SagaNotFound(999_999)
    ));
}

#[tokio::test]
async fn rejected_step_reverts_like_a_failure() {
    let book = ScriptBook::new().on_execute(
        StepAction::ChargePayment,
        vec![StepResult::rejected(
            ErrorCode::InsufficientBalance,
            "balance too low",
        )],
    );
    let harness = TestHarness::new(book);

    let ctx = harness.engine.start(sample_command("ORD-REJECT")).await;

    assert_eq!(ctx.status(), SagaStatus::Reverted);
    let comp_actions: Vec<StepAction> =
        ctx.compensation_steps().iter().map(|s| s.action()).collect();
    assert_eq!(comp_actions, vec![StepAction::ReleaseInventory]);
}

/// A parked saga persists an in-flight step log row.
#[tokio::test]
async fn pending_step_is_visible_in_the_step_log() {
    let book = ScriptBook::new().on_execute(
        StepAction::ChargePayment,
        vec![StepResult::pending("gw-88")],
    );
    let harness = TestHarness::new(book);

    let ctx = harness.engine.start(sample_command("ORD-LOGGED")).await;
    let charge = harness
        .factory
        .step_with_action(ctx.order_id(), StepAction::ChargePayment)
        .unwrap();

    let logs = harness.repository.load_steps(ctx.order_id()).await.unwrap();
    let charge_rows: Vec<_> = logs
        .iter()
        .filter(|l| l.step_id == charge.step_id())
        .collect();
    assert_eq!(charge_rows.len(), 1);
    assert_eq!(charge_rows[0].status, StepStatus::Pending);
}
