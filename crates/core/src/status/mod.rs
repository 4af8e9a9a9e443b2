//!
//! # Lifecycle Status Types
//!
//! The saga-level and step-level state enumerations, with the predicates the
//! state machine is built on.
//!
//! Saga statuses fall into five groups:
//!
//! ```text
//! initial:   INIT
//! forward:   PROCESSING, PENDING, RESUMING, RECOVERY_PROCESSING
//! reverting: REVERTING, REVERTING_PENDING, RESUMING_REVERTING, RECOVERY_REVERTING
//! terminal:  SUCCESS, FAILED, REVERTED, REVERT_FAILED, MANUAL_REVIEW, TIMEOUT, SYSTEM_ERROR
//! ```
//!
//! Terminal statuses have no outbound transitions.

use serde::{Deserialize, Serialize};

/// Saga-level status. One value per saga instance; transitions are driven
/// exclusively by state handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    /// Saga created, ready to start processing. Entry point of the machine.
    Init,

    /// Forward steps are being executed.
    Processing,
    /// Waiting for an asynchronous callback from an external service.
    Pending,
    /// Resuming forward flow after a callback or restart.
    Resuming,
    /// Resuming forward flow from the recovery sweep.
    RecoveryProcessing,

    /// Compensation steps are being executed.
    Reverting,
    /// Waiting for an asynchronous compensation callback.
    RevertingPending,
    /// Resuming compensation after a callback or restart.
    ResumingReverting,
    /// Resuming compensation from the recovery sweep.
    RecoveryReverting,

    /// All forward steps succeeded.
    Success,
    /// Saga failed with nothing to compensate.
    Failed,
    /// All compensations completed; effects rolled back.
    Reverted,
    /// A compensation failed; manual intervention required.
    RevertFailed,
    /// Partial success that cannot be automatically compensated.
    ManualReview,
    /// Saga exceeded its time budget.
    Timeout,
    /// Unexpected system fault (persistence refused, invariant violated).
    SystemError,
}

impl SagaStatus {
    /// Stable wire/log name.
    pub fn as_str(self) -> &'static str {
        match self {
            SagaStatus::Init => "INIT",
            SagaStatus::Processing => "PROCESSING",
            SagaStatus::Pending => "PENDING",
            SagaStatus::Resuming => "RESUMING",
            SagaStatus::RecoveryProcessing => "RECOVERY_PROCESSING",
            SagaStatus::Reverting => "REVERTING",
            SagaStatus::RevertingPending => "REVERTING_PENDING",
            SagaStatus::ResumingReverting => "RESUMING_REVERTING",
            SagaStatus::RecoveryReverting => "RECOVERY_REVERTING",
            SagaStatus::Success => "SUCCESS",
            SagaStatus::Failed => "FAILED",
            SagaStatus::Reverted => "REVERTED",
            SagaStatus::RevertFailed => "REVERT_FAILED",
            SagaStatus::ManualReview => "MANUAL_REVIEW",
            SagaStatus::Timeout => "TIMEOUT",
            SagaStatus::SystemError => "SYSTEM_ERROR",
        }
    }

    /// Terminal statuses need no further processing.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SagaStatus::Success
                | SagaStatus::Failed
                | SagaStatus::Reverted
                | SagaStatus::RevertFailed
                | SagaStatus::ManualReview
                | SagaStatus::Timeout
                | SagaStatus::SystemError
        )
    }

    /// Forward-execution statuses.
    pub fn is_processing(self) -> bool {
        matches!(
            self,
            SagaStatus::Processing | SagaStatus::RecoveryProcessing | SagaStatus::Resuming
        )
    }

    /// Compensation-side statuses.
    pub fn is_reverting(self) -> bool {
        matches!(
            self,
            SagaStatus::Reverting
                | SagaStatus::RevertingPending
                | SagaStatus::ResumingReverting
                | SagaStatus::RecoveryReverting
        )
    }

    /// Statuses parked on an external callback.
    pub fn is_pending(self) -> bool {
        matches!(self, SagaStatus::Pending | SagaStatus::RevertingPending)
    }

    /// Terminal statuses that represent a failure outcome.
    pub fn is_failed(self) -> bool {
        matches!(
            self,
            SagaStatus::Failed
                | SagaStatus::RevertFailed
                | SagaStatus::ManualReview
                | SagaStatus::Timeout
        )
    }

    /// The status a stuck saga is driven into by the recovery sweep.
    ///
    /// Recovery statuses share the resuming handler's query-first logic.
    /// Idempotent: `recovery_of(recovery_of(s)) == recovery_of(s)`.
    pub fn recovery_of(self) -> SagaStatus {
        match self {
            SagaStatus::Processing | SagaStatus::Pending | SagaStatus::Resuming => {
                SagaStatus::RecoveryProcessing
            }
            SagaStatus::Reverting
            | SagaStatus::RevertingPending
            | SagaStatus::ResumingReverting => SagaStatus::RecoveryReverting,
            other => other,
        }
    }

    /// The status a parked saga is driven into when a callback arrives.
    ///
    /// Idempotent: `resume_of(resume_of(s)) == resume_of(s)`.
    pub fn resume_of(self) -> SagaStatus {
        match self {
            SagaStatus::Pending | SagaStatus::Processing => SagaStatus::Resuming,
            SagaStatus::RevertingPending | SagaStatus::Reverting => SagaStatus::ResumingReverting,
            other => other,
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution status of an individual saga step.
///
/// A step runs its own mini-lifecycle, independent of the saga status:
///
/// ```text
/// UNKNOWN -> PROCESSING -> SUCCEEDED | FAILED | REJECTED | TIMEOUT | PENDING
/// NEEDS_COMPENSATION -> COMPENSATING -> COMPENSATED | COMPENSATION_FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// Submitted to an external system, awaiting an async callback.
    Pending,
    /// Execution dispatched, call in flight.
    Executing,
    /// Actively processing on the remote side.
    Processing,
    /// Completed successfully.
    Succeeded,
    /// Execution failed.
    Failed,
    /// Timed out before completing.
    Timeout,
    /// Skipped (not applicable for this saga).
    Skipped,
    /// Outcome could not be determined; must be queried during recovery.
    Unknown,
    /// Already finished in an earlier attempt (observed during re-execution).
    Completed,
    /// Rejected by a business rule, not a system fault.
    Rejected,

    /// Succeeded but the saga failed; awaiting compensation.
    NeedsCompensation,
    /// Compensation in progress.
    Compensating,
    /// Compensation completed successfully.
    Compensated,
    /// Compensation failed; manual intervention required.
    CompensationFailed,
}

impl StepStatus {
    /// Stable wire/log name.
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Executing => "EXECUTING",
            StepStatus::Processing => "PROCESSING",
            StepStatus::Succeeded => "SUCCEEDED",
            StepStatus::Failed => "FAILED",
            StepStatus::Timeout => "TIMEOUT",
            StepStatus::Skipped => "SKIPPED",
            StepStatus::Unknown => "UNKNOWN",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Rejected => "REJECTED",
            StepStatus::NeedsCompensation => "NEEDS_COMPENSATION",
            StepStatus::Compensating => "COMPENSATING",
            StepStatus::Compensated => "COMPENSATED",
            StepStatus::CompensationFailed => "COMPENSATION_FAILED",
        }
    }

    /// Completed successfully, forward or compensation side.
    pub fn is_success(self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Compensated)
    }

    /// Landed in a failed state.
    pub fn is_failed(self) -> bool {
        matches!(
            self,
            StepStatus::Failed | StepStatus::Timeout | StepStatus::CompensationFailed
        )
    }

    /// Still actively running.
    pub fn is_in_progress(self) -> bool {
        matches!(self, StepStatus::Executing | StepStatus::Compensating)
    }

    /// Reached a final status that must not be overwritten.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded
                | StepStatus::Failed
                | StepStatus::Timeout
                | StepStatus::Skipped
                | StepStatus::Compensated
                | StepStatus::CompensationFailed
        )
    }

    /// Whether this step must be offered to its compensation action when the
    /// saga reverts. Only effects that actually landed need undoing.
    pub fn needs_compensation(self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::NeedsCompensation)
    }

    /// Whether re-executing the step is a reasonable reaction.
    pub fn is_retryable(self) -> bool {
        matches!(self, StepStatus::Failed | StepStatus::Timeout)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
