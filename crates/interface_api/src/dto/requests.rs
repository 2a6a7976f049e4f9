//! Loan request DTOs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use core_kernel::{Currency, LoanRequestId, PartyId};
use domain_lending::{
    ActionAvailability, ActionId, ContactDetails, Guard, HistoryEntry, NewLoanRequest, RequestQuery, RequestStatus,
};

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitRequest {
    pub requested_amount: Decimal,
    #[serde(default)]
    pub currency: Currency,
    #[validate(length(min = 1, max = 500))]
    pub asset_descriptor: String,
    #[validate(length(min = 1, max = 100))]
    pub district: String,
    #[serde(default)]
    pub contact: ContactDetails,
}

impl SubmitRequest {
    /// Submissions are always made by the authenticated customer
    pub fn into_domain(self, customer_id: PartyId) -> NewLoanRequest {
        NewLoanRequest {
            customer_id,
            requested_amount: self.requested_amount,
            currency: self.currency,
            asset_descriptor: self.asset_descriptor,
            district: self.district,
            contact: self.contact,
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ListRequestsQuery {
    pub status: Option<RequestStatus>,
    #[validate(range(min = 1, max = 200))]
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl From<ListRequestsQuery> for RequestQuery {
    fn from(query: ListRequestsQuery) -> Self {
        RequestQuery {
            status: query.status,
            limit: query.limit,
            offset: query.offset,
            ..Default::default()
        }
    }
}

/// One action in the caller's vocabulary
#[derive(Debug, Serialize)]
pub struct ActionView {
    pub action: ActionId,
    pub label: &'static str,
    pub target: RequestStatus,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<Guard>,
}

impl From<ActionAvailability> for ActionView {
    fn from(availability: ActionAvailability) -> Self {
        Self {
            available: availability.is_available(),
            action: availability.action,
            label: availability.label,
            target: availability.target,
            blocked_by: availability.blocked_by,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ActionsResponse {
    pub request_id: LoanRequestId,
    pub status: RequestStatus,
    pub actions: Vec<ActionView>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub request_id: LoanRequestId,
    pub entries: Vec<HistoryEntry>,
}

/// Summary returned after an accepted action
#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub request_id: LoanRequestId,
    pub prior_status: RequestStatus,
    pub new_status: RequestStatus,
    pub occurred_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loan_id: Option<core_kernel::LoanId>,
}
