//! Lending domain errors
//!
//! Each failure the caller must render differently has its own variant:
//! workflow policy violations, missing action input, amount mismatches,
//! rejected gateway callbacks and retryable storage contention are never
//! folded into one generic error.

use rust_decimal::Decimal;
use thiserror::Error;

use core_kernel::{CalendarError, MoneyError, PortError};

use crate::request::{RequestStatus, Role};
use crate::workflow::Guard;

/// Errors that can occur in the lending domain
#[derive(Debug, Error)]
pub enum LendingError {
    /// Malformed or out-of-range input
    #[error("Validation error: {0}")]
    Validation(String),

    /// The action is not in the role's vocabulary for the current status
    #[error("Action '{action}' is not available to {role} while the request is {status}")]
    UnknownAction {
        action: String,
        role: Role,
        status: RequestStatus,
    },

    /// A workflow guard rejected the actor
    #[error("Forbidden: {guard}")]
    Forbidden { guard: Guard },

    /// The action needs input that was not supplied
    #[error("Missing input for '{action}': {field}")]
    MissingInput { action: String, field: String },

    /// Claimed amount disagrees with the amount computed from the schedule
    #[error("Amount mismatch: expected {expected}, claimed {claimed}")]
    AmountMismatch { expected: Decimal, claimed: Decimal },

    /// Gateway callback failed signature verification
    #[error("Gateway signature invalid: {0}")]
    SignatureInvalid(String),

    /// No pending or overdue installment is left to apply a payment to
    #[error("Nothing to apply: loan {0} has no pending or overdue installments")]
    NothingToApply(String),

    /// Storage-level contention; safe to retry
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A notification template was given variables without a required field
    #[error("Template '{template}' requires field '{field}'")]
    MissingTemplateField { template: String, field: String },

    /// The computed schedule failed its own consistency check
    #[error("Schedule invariant violated: {0}")]
    ScheduleInvariant(String),

    /// Any other storage failure
    #[error("Storage error: {0}")]
    Storage(PortError),
}

impl LendingError {
    /// Creates a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        LendingError::Validation(message.into())
    }

    /// Creates a missing-input error for an action
    pub fn missing_input(action: impl Into<String>, field: impl Into<String>) -> Self {
        LendingError::MissingInput {
            action: action.into(),
            field: field.into(),
        }
    }

    /// Returns true if the operation may succeed when retried unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, LendingError::TransactionConflict(_))
    }

    /// Returns true for workflow policy violations
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, LendingError::UnknownAction { .. } | LendingError::Forbidden { .. })
    }
}

impl From<PortError> for LendingError {
    fn from(error: PortError) -> Self {
        match error {
            PortError::Conflict { message } => LendingError::TransactionConflict(message),
            PortError::NotFound { entity_type, id } => {
                LendingError::NotFound(format!("{} {}", entity_type, id))
            }
            PortError::Validation { message, .. } => LendingError::Validation(message),
            other => LendingError::Storage(other),
        }
    }
}

impl From<MoneyError> for LendingError {
    fn from(error: MoneyError) -> Self {
        LendingError::Validation(error.to_string())
    }
}

impl From<CalendarError> for LendingError {
    fn from(error: CalendarError) -> Self {
        LendingError::Validation(error.to_string())
    }
}
