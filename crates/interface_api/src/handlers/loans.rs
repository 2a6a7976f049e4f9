//! Loan handlers

use axum::{
    extract::{Path, State},
    Extension, Json,
};

use core_kernel::{LoanId, LoanRequestId};
use domain_lending::{Actor, LendingError, Loan};

use super::ensure_visible;
use crate::dto::loans::*;
use crate::{error::ApiError, AppState};

/// Loads a loan after checking the caller may see its request
pub(crate) async fn visible_loan(state: &AppState, actor: &Actor, loan_id: LoanId) -> Result<Loan, ApiError> {
    let loan = state.repayments.get_loan(loan_id).await.map_err(LendingError::from)?;
    let request = state.engine.current_state(loan.request_id).await?;
    ensure_visible(actor, &request)?;
    Ok(loan)
}

/// Gets the loan originated from a request
pub async fn get_loan_for_request(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<LoanRequestId>,
) -> Result<Json<Loan>, ApiError> {
    let request = state.engine.current_state(id).await?;
    ensure_visible(&actor, &request)?;

    let loan = state.repayments.loan_for_request(id).await.map_err(LendingError::from)?;
    Ok(Json(loan))
}

/// Gets the loan with its installment schedule
pub async fn get_schedule(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<LoanId>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let loan = visible_loan(&state, &actor, id).await?;
    let installments = state.repayments.installments(id).await.map_err(LendingError::from)?;
    Ok(Json(ScheduleResponse { loan, installments }))
}

/// Lists the payments applied to a loan
pub async fn list_payments(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<LoanId>,
) -> Result<Json<PaymentsResponse>, ApiError> {
    visible_loan(&state, &actor, id).await?;
    let payments = state.repayments.payments(id).await.map_err(LendingError::from)?;
    Ok(Json(PaymentsResponse { loan_id: id, payments }))
}
