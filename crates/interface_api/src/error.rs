//! API error handling
//!
//! Domain errors keep their specific reason on the wire: a caller can tell
//! an action outside its vocabulary (409) from a guard refusal (403) or a
//! missing field (400).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use core_kernel::PortError;
use domain_lending::LendingError;

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The request is valid but not applicable in the current state
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// Storage contention or an unreachable dependency; the caller may retry
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Lending(#[from] LendingError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, Option<serde_json::Value>) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", None),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", None),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden", None),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict", None),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error", None),
            ApiError::SignatureInvalid(_) => (StatusCode::UNAUTHORIZED, "signature_invalid", None),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", None),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None),
            ApiError::Lending(error) => lending_parts(error),
        }
    }
}

fn lending_parts(error: &LendingError) -> (StatusCode, &'static str, Option<serde_json::Value>) {
    use serde_json::json;

    match error {
        LendingError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error", None),
        LendingError::UnknownAction { action, role, status } => (
            StatusCode::CONFLICT,
            "unknown_action",
            Some(json!({ "action": action, "role": role, "status": status })),
        ),
        LendingError::Forbidden { guard } => {
            (StatusCode::FORBIDDEN, "forbidden", Some(json!({ "guard": guard })))
        }
        LendingError::MissingInput { field, .. } => {
            (StatusCode::BAD_REQUEST, "missing_input", Some(json!({ "field": field })))
        }
        LendingError::AmountMismatch { expected, claimed } => (
            StatusCode::BAD_REQUEST,
            "amount_mismatch",
            Some(json!({ "expected": expected, "claimed": claimed })),
        ),
        LendingError::SignatureInvalid(_) => (StatusCode::UNAUTHORIZED, "signature_invalid", None),
        LendingError::NothingToApply(_) => (StatusCode::CONFLICT, "nothing_to_apply", None),
        LendingError::TransactionConflict(_) => (StatusCode::SERVICE_UNAVAILABLE, "transaction_conflict", None),
        LendingError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", None),
        LendingError::Storage(PortError::Connection { .. } | PortError::Timeout { .. }) => {
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable", None)
        }
        LendingError::MissingTemplateField { .. }
        | LendingError::ScheduleInvariant(_)
        | LendingError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, details) = self.parts();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::Validation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_lending::workflow::Guard;
    use domain_lending::{RequestStatus, Role};
    use rust_decimal_macros::dec;

    fn status_of(error: LendingError) -> StatusCode {
        ApiError::from(error).into_response().status()
    }

    #[test]
    fn test_workflow_errors_keep_distinct_statuses() {
        assert_eq!(
            status_of(LendingError::UnknownAction {
                action: "make-offer".into(),
                role: Role::Customer,
                status: RequestStatus::Pending,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(LendingError::Forbidden { guard: Guard::District }), StatusCode::FORBIDDEN);
        assert_eq!(status_of(LendingError::missing_input("make-offer", "amount")), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_payment_errors() {
        assert_eq!(
            status_of(LendingError::AmountMismatch { expected: dec!(3998.20), claimed: dec!(100) }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(LendingError::SignatureInvalid("bad".into())), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(LendingError::NothingToApply("LN-1".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_of(LendingError::TransactionConflict("retry".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_storage_errors() {
        assert_eq!(status_of(LendingError::NotFound("Loan LN-1".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(LendingError::Storage(PortError::connection("down"))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(LendingError::Storage(PortError::internal("boom"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
