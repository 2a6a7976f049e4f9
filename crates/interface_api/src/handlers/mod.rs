//! Request handlers

pub mod health;
pub mod loans;
pub mod payments;
pub mod requests;

use domain_lending::{Actor, LoanRequest, Role};

use crate::error::ApiError;

/// Customers see their own requests, agents their assignments and admins
/// the districts they manage
pub(crate) fn ensure_visible(actor: &Actor, request: &LoanRequest) -> Result<(), ApiError> {
    let visible = match actor.role {
        Role::Customer => request.customer_id == actor.id,
        Role::Agent => request.assigned_agent_id == Some(actor.id),
        Role::Admin => actor.manages_district(&request.district),
        Role::System => true,
    };

    if visible {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!("{} is not visible to this caller", request.id)))
    }
}
