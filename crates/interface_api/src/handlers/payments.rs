//! Payment and checkout handlers

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use validator::Validate;

use core_kernel::LoanId;
use domain_lending::{
    Actor, ApplyOutcome, CallbackOutcome, CheckoutOrder, CreateOrder, PaymentConfirmation, PaymentMethod, Role,
};

use super::loans::visible_loan;
use crate::dto::payments::*;
use crate::{error::ApiError, AppState};

/// Header carrying the gateway's `sha256###saltIndex` signature
pub const SIGNATURE_HEADER: &str = "X-VERIFY";

/// Records a payment received outside the gateway
///
/// Admin only. The amount must settle exactly `installment_count`
/// installments at their current amounts due. Replaying a reference returns
/// the original application with 200 instead of 201.
pub async fn record_manual_payment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(loan_id): Path<LoanId>,
    Json(body): Json<ManualPaymentRequest>,
) -> Result<(StatusCode, Json<ApplyOutcome>), ApiError> {
    if actor.role != Role::Admin {
        return Err(ApiError::Forbidden("Only admins record manual payments".to_string()));
    }
    body.validate()?;
    visible_loan(&state, &actor, loan_id).await?;

    let outcome = state
        .reconciler
        .apply_payment(PaymentConfirmation {
            loan_id,
            external_reference: body.external_reference,
            amount: body.amount,
            installment_count: body.installment_count,
            method: body.method.unwrap_or(PaymentMethod::Cash),
            processed_by: actor.id,
        })
        .await?;

    let status = if outcome.is_duplicate() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

/// Opens a gateway order for the next installments of a loan
pub async fn create_order(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(loan_id): Path<LoanId>,
    Json(body): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CheckoutOrder>), ApiError> {
    body.validate()?;

    let order = state
        .checkout
        .create_order(
            &actor,
            CreateOrder {
                loan_id,
                installment_id: body.installment_id,
                installment_count: body.installment_count,
                claimed_amount: body.amount,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(order)))
}

/// Gateway server-to-server callback
///
/// Redeliveries are expected; the reconciler absorbs them.
pub async fn gateway_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<GatewayCallbackRequest>,
) -> Result<Json<CallbackOutcome>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Gateway callback without signature header");
            ApiError::SignatureInvalid(format!("missing {SIGNATURE_HEADER} header"))
        })?;
    body.validate()?;

    let outcome = state.checkout.handle_callback(&body.response, signature).await?;
    Ok(Json(outcome))
}
