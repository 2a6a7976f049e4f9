//! Loan request workflow handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use validator::Validate;

use core_kernel::LoanRequestId;
use domain_lending::{ActionInput, Actor, LoanRequest};

use super::ensure_visible;
use crate::dto::requests::*;
use crate::{error::ApiError, AppState};

/// Submits a new loan request for the authenticated customer
pub async fn submit_request(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<LoanRequest>), ApiError> {
    body.validate()?;
    let request = state.engine.submit(&actor, body.into_domain(actor.id)).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// Lists the requests visible to the caller
pub async fn list_requests(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<ListRequestsQuery>,
) -> Result<Json<Vec<LoanRequest>>, ApiError> {
    query.validate()?;
    let requests = state.engine.list_requests(&actor, query.into()).await?;
    Ok(Json(requests))
}

/// Gets a request by ID
pub async fn get_request(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<LoanRequestId>,
) -> Result<Json<LoanRequest>, ApiError> {
    let request = state.engine.current_state(id).await?;
    ensure_visible(&actor, &request)?;
    Ok(Json(request))
}

/// Lists the caller's actions for the request's current status
pub async fn available_actions(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<LoanRequestId>,
) -> Result<Json<ActionsResponse>, ApiError> {
    let request = state.engine.current_state(id).await?;
    ensure_visible(&actor, &request)?;

    let actions = state.engine.available_actions(id, &actor).await?;
    Ok(Json(ActionsResponse {
        request_id: id,
        status: request.status,
        actions: actions.into_iter().map(ActionView::from).collect(),
    }))
}

/// Applies a workflow action
///
/// The body is optional; actions that need input report the missing field.
pub async fn apply_action(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((id, action)): Path<(LoanRequestId, String)>,
    body: Option<Json<ActionInput>>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let input = body.map(|Json(input)| input).unwrap_or_default();
    let outcome = state.engine.apply(id, &action, &actor, input).await?;

    Ok(Json(TransitionResponse {
        request_id: outcome.request.id,
        prior_status: outcome.prior_status,
        new_status: outcome.new_status,
        occurred_at: outcome.history_entry.timestamp,
        loan_id: outcome.loan.map(|loan| loan.id),
    }))
}

/// Gets the ordered transition history of a request
pub async fn get_history(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<LoanRequestId>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let request = state.engine.current_state(id).await?;
    ensure_visible(&actor, &request)?;

    let entries = state.engine.history(id).await?;
    Ok(Json(HistoryResponse { request_id: id, entries }))
}
