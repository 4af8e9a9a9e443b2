//!
//! # Error Types
//!
//! Stable error codes and the central error type for the saga engine.
//!

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::status::SagaStatus;

/// Standardized error codes shared by every component of the engine.
///
/// Code ranges:
/// - 1xxx: client/input errors
/// - 2xxx: business errors
/// - 3xxx: external service errors
/// - 4xxx: internal/system errors
/// - 5xxx: saga lifecycle errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    Success,

    InvalidInput,
    InvalidState,
    DuplicateRequest,
    NotFound,

    InsufficientInventory,
    InsufficientBalance,
    PaymentDeclined,
    OrderCancelled,

    PaymentServiceError,
    InventoryServiceError,
    ShippingServiceError,
    ExternalTimeout,

    DatabaseError,
    InternalError,
    ConfigurationError,

    StateHandlerNotFound,
    StepExecutionFailed,
    CompensationFailed,
    SagaTimeout,
    InvalidStateTransition,
}

impl ErrorCode {
    /// The stable numeric code, suitable for wire protocols and dashboards.
    pub fn code(self) -> u16 {
        match self {
            ErrorCode::Success => 0,

            ErrorCode::InvalidInput => 1001,
            ErrorCode::InvalidState => 1002,
            ErrorCode::DuplicateRequest => 1003,
            ErrorCode::NotFound => 1004,

            ErrorCode::InsufficientInventory => 2001,
            ErrorCode::InsufficientBalance => 2002,
            ErrorCode::PaymentDeclined => 2003,
            ErrorCode::OrderCancelled => 2004,

            ErrorCode::PaymentServiceError => 3001,
            ErrorCode::InventoryServiceError => 3002,
            ErrorCode::ShippingServiceError => 3003,
            ErrorCode::ExternalTimeout => 3004,

            ErrorCode::DatabaseError => 4001,
            ErrorCode::InternalError => 4002,
            ErrorCode::ConfigurationError => 4003,

            ErrorCode::StateHandlerNotFound => 5001,
            ErrorCode::StepExecutionFailed => 5002,
            ErrorCode::CompensationFailed => 5003,
            ErrorCode::SagaTimeout => 5004,
            ErrorCode::InvalidStateTransition => 5005,
        }
    }

    /// Default human-readable message for this code.
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::Success => "Success",

            ErrorCode::InvalidInput => "Invalid input parameters",
            ErrorCode::InvalidState => "Invalid state for this operation",
            ErrorCode::DuplicateRequest => "Duplicate request detected",
            ErrorCode::NotFound => "Resource not found",

            ErrorCode::InsufficientInventory => "Not enough inventory",
            ErrorCode::InsufficientBalance => "Insufficient account balance",
            ErrorCode::PaymentDeclined => "Payment was declined",
            ErrorCode::OrderCancelled => "Order has been cancelled",

            ErrorCode::PaymentServiceError => "Payment service unavailable",
            ErrorCode::InventoryServiceError => "Inventory service unavailable",
            ErrorCode::ShippingServiceError => "Shipping service unavailable",
            ErrorCode::ExternalTimeout => "External service timeout",

            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::ConfigurationError => "Configuration error",

            ErrorCode::StateHandlerNotFound => "No handler found for state",
            ErrorCode::StepExecutionFailed => "Saga step execution failed",
            ErrorCode::CompensationFailed => "Compensation step failed",
            ErrorCode::SagaTimeout => "Saga execution timed out",
            ErrorCode::InvalidStateTransition => "Invalid state transition attempted",
        }
    }

    /// Whether a failed operation carrying this code is worth retrying.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::PaymentServiceError
                | ErrorCode::InventoryServiceError
                | ErrorCode::ShippingServiceError
                | ErrorCode::ExternalTimeout
                | ErrorCode::DatabaseError
        )
    }

    /// Whether a failure with this code should trigger compensation of
    /// previously completed steps. Input errors (1xxx) never do; business
    /// (2xxx) and external (3xxx) errors do.
    pub fn requires_compensation(self) -> bool {
        let group = self.code() / 1000;
        group == 2 || group == 3
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code(), self.message())
    }
}

/// Central error type for saga operations that cannot be expressed as a
/// status transition.
#[derive(Debug, Error)]
pub enum SagaError {
    #[error("no state handler registered for status {0}")]
    StateHandlerNotFound(SagaStatus),

    #[error("saga not found: {0}")]
    SagaNotFound(u64),

    #[error("step {step_id} failed: {reason}")]
    StepFailed { step_id: String, reason: String },

    #[error("compensation failed for step {0}")]
    CompensationFailed(String),

    #[error("saga {0} timed out")]
    Timeout(u64),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: SagaStatus, to: SagaStatus },

    #[error("repository error: {0}")]
    Repository(#[from] crate::port::RepositoryError),
}

impl SagaError {
    /// Map to the stable error code taxonomy.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            SagaError::StateHandlerNotFound(_) => ErrorCode::StateHandlerNotFound,
            SagaError::SagaNotFound(_) => ErrorCode::NotFound,
            SagaError::StepFailed { .. } => ErrorCode::StepExecutionFailed,
            SagaError::CompensationFailed(_) => ErrorCode::CompensationFailed,
            SagaError::Timeout(_) => ErrorCode::SagaTimeout,
            SagaError::InvalidTransition { .. } => ErrorCode::InvalidStateTransition,
            SagaError::Repository(_) => ErrorCode::DatabaseError,
        }
    }
}

/// Result type with saga error.
pub type Result<T, E = SagaError> = std::result::Result<T, E>;
