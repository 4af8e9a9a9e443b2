//!
//! # Saga Steps
//!
//! The per-step contract and its supporting types: the action taxonomy, the
//! tagged outcome of one attempt ([`StepResult`]), the serializable
//! persistence projection ([`StepLog`]), and the [`StepState`] helper that
//! concrete steps embed to get consistent status tracking.
//!
//! Steps are the only place the engine touches external services. The
//! contract demands:
//!
//! - `execute` is **idempotent**: re-running a step that already completed
//!   externally observes the prior outcome. Implementations embed the step id
//!   as an idempotency key in outbound calls.
//! - `query` is side-effect free.
//! - Steps do not return errors; faults are mapped into a `FAILED`
//!   [`StepResult`] via [`StepResult::from_error`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::error::ErrorCode;
use crate::status::StepStatus;

/// The kind of operation a saga step performs.
///
/// Each forward action maps to a compensation action; actions with no
/// inverse (notifications) report `None` and are never auto-compensated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepAction {
    ReserveInventory,
    ReleaseInventory,
    ChargePayment,
    RefundPayment,
    CreateShipment,
    CancelShipment,
    SendNotification,
    Compensate,
    Query,
}

impl StepAction {
    /// Stable wire/log name, also used inside step ids.
    pub fn as_str(self) -> &'static str {
        match self {
            StepAction::ReserveInventory => "RESERVE_INVENTORY",
            StepAction::ReleaseInventory => "RELEASE_INVENTORY",
            StepAction::ChargePayment => "CHARGE_PAYMENT",
            StepAction::RefundPayment => "REFUND_PAYMENT",
            StepAction::CreateShipment => "CREATE_SHIPMENT",
            StepAction::CancelShipment => "CANCEL_SHIPMENT",
            StepAction::SendNotification => "SEND_NOTIFICATION",
            StepAction::Compensate => "COMPENSATE",
            StepAction::Query => "QUERY",
        }
    }

    /// The inverse action run when this step must be undone.
    pub fn compensation_action(self) -> Option<StepAction> {
        match self {
            StepAction::ReserveInventory => Some(StepAction::ReleaseInventory),
            StepAction::ChargePayment => Some(StepAction::RefundPayment),
            StepAction::CreateShipment => Some(StepAction::CancelShipment),
            // A sent notification cannot be unsent.
            StepAction::SendNotification => None,
            _ => Some(StepAction::Compensate),
        }
    }

    /// Whether a succeeded step of this action must be compensated when the
    /// saga reverts.
    pub fn requires_compensation(self) -> bool {
        self.compensation_action().is_some()
    }

    /// Whether this action is itself a compensation.
    pub fn is_compensation(self) -> bool {
        matches!(
            self,
            StepAction::ReleaseInventory
                | StepAction::RefundPayment
                | StepAction::CancelShipment
                | StepAction::Compensate
        )
    }
}

impl std::fmt::Display for StepAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable outcome of one step attempt.
///
/// The factory constructors enforce valid combinations: success carries no
/// error, failure carries a code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    status: StepStatus,
    error_code: ErrorCode,
    error_message: Option<String>,
    external_ref_id: Option<String>,
    metadata: Option<serde_json::Value>,
}

impl StepResult {
    /// Successful completion.
    pub fn success() -> Self {
        Self {
            status: StepStatus::Succeeded,
            error_code: ErrorCode::Success,
            error_message: None,
            external_ref_id: None,
            metadata: None,
        }
    }

    /// Successful completion with an external reference for reconciliation.
    pub fn success_with_ref(external_ref_id: impl Into<String>) -> Self {
        Self {
            external_ref_id: Some(external_ref_id.into()),
            ..Self::success()
        }
    }

    /// Failed attempt.
    pub fn failed(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            error_code,
            error_message: Some(message.into()),
            external_ref_id: None,
            metadata: None,
        }
    }

    /// Business-rule rejection (not a system fault).
    pub fn rejected(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Rejected,
            ..Self::failed(error_code, message)
        }
    }

    /// Submitted, awaiting an asynchronous callback.
    pub fn pending(external_ref_id: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Pending,
            error_code: ErrorCode::Success,
            error_message: None,
            external_ref_id: Some(external_ref_id.into()),
            metadata: None,
        }
    }

    /// Outcome could not be determined; the recovery path will query.
    pub fn unknown() -> Self {
        Self {
            status: StepStatus::Unknown,
            error_code: ErrorCode::Success,
            error_message: None,
            external_ref_id: None,
            metadata: None,
        }
    }

    /// Already finished in an earlier attempt.
    pub fn completed() -> Self {
        Self {
            status: StepStatus::Completed,
            error_code: ErrorCode::Success,
            error_message: None,
            external_ref_id: None,
            metadata: None,
        }
    }

    /// A result with an explicit status, for callbacks and query responses.
    pub fn with_status(status: StepStatus) -> Self {
        Self {
            status,
            error_code: ErrorCode::Success,
            error_message: None,
            external_ref_id: None,
            metadata: None,
        }
    }

    /// Translate an error escaping a step implementation into a failed
    /// result. Steps never propagate errors across the contract boundary.
    pub fn from_error(err: &(dyn std::error::Error + '_)) -> Self {
        Self::failed(ErrorCode::InternalError, err.to_string())
    }

    /// Attach a metadata payload.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn error_code(&self) -> ErrorCode {
        self.error_code
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn external_ref_id(&self) -> Option<&str> {
        self.external_ref_id.as_deref()
    }

    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Succeeded
    }

    pub fn is_retryable(&self) -> bool {
        self.error_code.is_retryable()
    }

    /// Whether the saga should keep advancing after this outcome.
    pub fn should_continue(&self) -> bool {
        matches!(self.status, StepStatus::Succeeded | StepStatus::Completed)
    }

    /// Whether the saga should park and wait for a callback or recovery.
    pub fn should_wait(&self) -> bool {
        matches!(self.status, StepStatus::Pending | StepStatus::Unknown)
    }
}

/// Serializable projection of a step for the persistence port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLog {
    pub step_id: String,
    pub order_id: u64,
    pub index: usize,
    pub action: StepAction,
    pub status: StepStatus,
    pub error_code: Option<u16>,
    pub error_message: Option<String>,
    pub external_ref_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    /// True when this row records a compensation step.
    pub compensation: bool,
    /// For a compensation step, the forward step it undoes.
    pub compensates_for: Option<String>,
}

/// Contract for one step of a saga.
///
/// Implementations live outside the engine; the engine only drives the
/// lifecycle. Concrete steps embed a [`StepState`] for the bookkeeping
/// parts of this trait.
#[async_trait]
pub trait SagaStep: Send + Sync {
    /// Unique id, format `"{order_id}:{index:03}:{action}:{service}"`.
    /// Globally unique and sortable by `(order_id, index)`.
    fn step_id(&self) -> &str;

    fn order_id(&self) -> u64;

    /// Position in the saga sequence; steps run in index order.
    fn index(&self) -> usize;

    fn action(&self) -> StepAction;

    fn status(&self) -> StepStatus;

    /// Most recent outcome, if any attempt has been made.
    fn result(&self) -> Option<StepResult>;

    /// Execute the step against its backing service.
    ///
    /// Must be idempotent and must not return errors; faults become a
    /// `FAILED` result.
    async fn execute(&self) -> StepResult;

    /// Query the authoritative status from the backing service without side
    /// effects. Used by the resuming handler when the local outcome is
    /// uncertain.
    async fn query(&self) -> StepResult;

    /// Apply a callback or query outcome.
    ///
    /// Returns `false` when the step already reached a final status; final
    /// outcomes are never overwritten.
    fn update_status(&self, result: StepResult) -> bool;

    /// Whether this step must be offered to its compensation action.
    fn needs_compensation(&self) -> bool {
        self.status().needs_compensation() && self.action().requires_compensation()
    }

    /// Persistence projection of the current state.
    fn to_log(&self) -> StepLog;
}

#[derive(Debug)]
struct StepStateInner {
    status: StepStatus,
    result: Option<StepResult>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
}

/// Shared bookkeeping for step implementations.
///
/// Concrete steps embed this by composition rather than inheriting a base
/// class: it owns the id, timestamps, and the status/result cell, and
/// enforces the final-status guard. The embedding step forwards the
/// bookkeeping parts of [`SagaStep`] here and keeps only its service call
/// logic local:
///
/// ```ignore
/// async fn execute(&self) -> StepResult {
///     self.state.begin_execute();
///     let result = self.call_backend().await;   // business logic
///     self.state.complete(result.clone());
///     result
/// }
/// ```
#[derive(Debug)]
pub struct StepState {
    step_id: String,
    order_id: u64,
    index: usize,
    action: StepAction,
    compensation: bool,
    compensates_for: Option<String>,
    inner: Mutex<StepStateInner>,
}

impl StepState {
    /// State for a forward step.
    pub fn new(order_id: u64, index: usize, action: StepAction, service: &str) -> Self {
        Self::build(order_id, index, action, service, false, None)
    }

    /// State for a compensation step paired with a succeeded forward step.
    pub fn compensation_for(forward: &dyn SagaStep, action: StepAction, service: &str) -> Self {
        Self::build(
            forward.order_id(),
            forward.index(),
            action,
            service,
            true,
            Some(forward.step_id().to_string()),
        )
    }

    fn build(
        order_id: u64,
        index: usize,
        action: StepAction,
        service: &str,
        compensation: bool,
        compensates_for: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            step_id: format!("{order_id}:{index:03}:{action}:{service}"),
            order_id,
            index,
            action,
            compensation,
            compensates_for,
            inner: Mutex::new(StepStateInner {
                status: StepStatus::Unknown,
                result: None,
                created_at: now,
                updated_at: now,
                sent_at: None,
                received_at: None,
            }),
        }
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn order_id(&self) -> u64 {
        self.order_id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn action(&self) -> StepAction {
        self.action
    }

    pub fn is_compensation(&self) -> bool {
        self.compensation
    }

    pub fn status(&self) -> StepStatus {
        self.inner.lock().unwrap().status
    }

    pub fn result(&self) -> Option<StepResult> {
        self.inner.lock().unwrap().result.clone()
    }

    /// Mark the outbound call as dispatched.
    pub fn begin_execute(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        inner.status = StepStatus::Processing;
        inner.sent_at = Some(now);
        inner.updated_at = now;
        tracing::info!(step_id = %self.step_id, "step execution started");
    }

    /// Record the outcome of the attempt.
    pub fn complete(&self, result: StepResult) {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        inner.status = result.status();
        inner.result = Some(result);
        inner.received_at = Some(now);
        inner.updated_at = now;
        tracing::info!(step_id = %self.step_id, status = %inner.status, "step execution completed");
    }

    /// Apply a query outcome. `UNKNOWN` responses leave local state alone.
    pub fn apply_query(&self, result: &StepResult) {
        if result.status() == StepStatus::Unknown {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.status = result.status();
        inner.result = Some(result.clone());
        inner.updated_at = Utc::now();
    }

    /// Apply a callback result, refusing to overwrite a final status.
    pub fn update_status(&self, result: StepResult) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.status.is_final() {
            tracing::warn!(
                step_id = %self.step_id,
                status = %inner.status,
                "ignoring status update, step already final"
            );
            return false;
        }
        let now = Utc::now();
        tracing::info!(
            step_id = %self.step_id,
            from = %inner.status,
            to = %result.status(),
            "step status updated"
        );
        inner.status = result.status();
        inner.result = Some(result);
        inner.received_at = Some(now);
        inner.updated_at = now;
        true
    }

    /// Persistence projection of the current state.
    pub fn to_log(&self) -> StepLog {
        let inner = self.inner.lock().unwrap();
        let result = inner.result.as_ref();
        StepLog {
            step_id: self.step_id.clone(),
            order_id: self.order_id,
            index: self.index,
            action: self.action,
            status: inner.status,
            error_code: result.map(|r| r.error_code().code()),
            error_message: result.and_then(|r| r.error_message().map(str::to_string)),
            external_ref_id: result.and_then(|r| r.external_ref_id().map(str::to_string)),
            metadata: result.and_then(|r| r.metadata().cloned()),
            created_at: inner.created_at,
            updated_at: inner.updated_at,
            sent_at: inner.sent_at,
            received_at: inner.received_at,
            compensation: self.compensation,
            compensates_for: self.compensates_for.clone(),
        }
    }
}
