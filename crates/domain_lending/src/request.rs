//! Loan request aggregate
//!
//! A loan request is a customer's pledge application. It is created on
//! submission and afterwards mutated only by committed workflow transitions.
//! Requests are never deleted; cancellation is a terminal status.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{Currency, LoanRequestId, PartyId};

use crate::error::LendingError;
use crate::gateway::SETTLEMENT_CURRENCY;

/// Workflow status of a loan request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    UnderReview,
    OfferMade,
    OfferAccepted,
    OfferDeclined,
    InspectionScheduled,
    InspectionInProgress,
    InspectionCompleted,
    Approved,
    Rejected,
    PendingBankDetails,
    BankDetailsSubmitted,
    /// Amount disbursed; the loan is active
    AmountDisbursed,
    PaymentOverdue,
    Defaulted,
    Completed,
    Cancelled,
}

impl RequestStatus {
    /// Every status, in lifecycle order
    pub const ALL: [RequestStatus; 17] = [
        RequestStatus::Pending,
        RequestStatus::UnderReview,
        RequestStatus::OfferMade,
        RequestStatus::OfferAccepted,
        RequestStatus::OfferDeclined,
        RequestStatus::InspectionScheduled,
        RequestStatus::InspectionInProgress,
        RequestStatus::InspectionCompleted,
        RequestStatus::Approved,
        RequestStatus::Rejected,
        RequestStatus::PendingBankDetails,
        RequestStatus::BankDetailsSubmitted,
        RequestStatus::AmountDisbursed,
        RequestStatus::PaymentOverdue,
        RequestStatus::Defaulted,
        RequestStatus::Completed,
        RequestStatus::Cancelled,
    ];

    /// Storage and wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::UnderReview => "under_review",
            RequestStatus::OfferMade => "offer_made",
            RequestStatus::OfferAccepted => "offer_accepted",
            RequestStatus::OfferDeclined => "offer_declined",
            RequestStatus::InspectionScheduled => "inspection_scheduled",
            RequestStatus::InspectionInProgress => "inspection_in_progress",
            RequestStatus::InspectionCompleted => "inspection_completed",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::PendingBankDetails => "pending_bank_details",
            RequestStatus::BankDetailsSubmitted => "bank_details_submitted",
            RequestStatus::AmountDisbursed => "amount_disbursed",
            RequestStatus::PaymentOverdue => "payment_overdue",
            RequestStatus::Defaulted => "defaulted",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses accept no further actions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Cancelled
                | RequestStatus::Rejected
                | RequestStatus::Completed
                | RequestStatus::Defaulted
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = LendingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| LendingError::validation(format!("Unknown request status: {}", s)))
    }
}

/// Role of the party performing an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Agent,
    Admin,
    /// Background jobs and cascades inside the core
    System,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Customer, Role::Agent, Role::Admin, Role::System];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "CUSTOMER",
            Role::Agent => "AGENT",
            Role::Admin => "ADMIN",
            Role::System => "SYSTEM",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = LendingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| LendingError::validation(format!("Unknown role: {}", s)))
    }
}

/// The party performing a workflow action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: PartyId,
    pub role: Role,
    /// Districts an admin manages; empty for other roles
    #[serde(default)]
    pub districts: Vec<String>,
}

impl Actor {
    pub fn customer(id: PartyId) -> Self {
        Self { id, role: Role::Customer, districts: Vec::new() }
    }

    pub fn agent(id: PartyId) -> Self {
        Self { id, role: Role::Agent, districts: Vec::new() }
    }

    pub fn admin(id: PartyId, districts: Vec<String>) -> Self {
        Self { id, role: Role::Admin, districts }
    }

    /// The core's own identity, used by the sweeper and payment cascades
    pub fn system() -> Self {
        Self {
            id: PartyId::from_uuid(uuid::Uuid::nil()),
            role: Role::System,
            districts: Vec::new(),
        }
    }

    /// Returns true if the actor manages the given district
    pub fn manages_district(&self, district: &str) -> bool {
        self.districts.iter().any(|d| d.eq_ignore_ascii_case(district))
    }
}

/// Offer terms made by an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferTerms {
    pub amount: Decimal,
    pub tenure_months: u32,
    /// Annual interest rate in percent
    pub annual_rate: Decimal,
}

/// Customer contact details used by the notification channels
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Bank account the loan amount is disbursed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankDetails {
    pub account_holder: String,
    pub account_number: String,
    pub ifsc: String,
}

/// A customer's pledge application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanRequest {
    pub id: LoanRequestId,
    pub customer_id: PartyId,
    pub requested_amount: Decimal,
    pub currency: Currency,
    /// Free-form description of the pledged asset
    pub asset_descriptor: String,
    pub district: String,
    pub status: RequestStatus,
    /// Set only once an offer has been made
    pub offer: Option<OfferTerms>,
    pub assigned_agent_id: Option<PartyId>,
    pub inspection_date: Option<DateTime<Utc>>,
    pub bank_details: Option<BankDetails>,
    pub contact: ContactDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for submitting a new loan request
#[derive(Debug, Clone)]
pub struct NewLoanRequest {
    pub customer_id: PartyId,
    pub requested_amount: Decimal,
    pub currency: Currency,
    pub asset_descriptor: String,
    pub district: String,
    pub contact: ContactDetails,
}

impl LoanRequest {
    /// Creates a Pending request after validating the submission
    pub fn submit(input: NewLoanRequest, now: DateTime<Utc>) -> Result<Self, LendingError> {
        if input.requested_amount <= Decimal::ZERO {
            return Err(LendingError::validation("Requested amount must be positive"));
        }
        if input.asset_descriptor.trim().is_empty() {
            return Err(LendingError::validation("Asset descriptor is required"));
        }
        if input.district.trim().is_empty() {
            return Err(LendingError::validation("District is required"));
        }
        if input.currency != SETTLEMENT_CURRENCY {
            return Err(LendingError::validation(format!(
                "Loans are issued in {} only, not {}",
                SETTLEMENT_CURRENCY, input.currency
            )));
        }

        Ok(Self {
            id: LoanRequestId::new_v7(),
            customer_id: input.customer_id,
            requested_amount: input.currency.round(input.requested_amount),
            currency: input.currency,
            asset_descriptor: input.asset_descriptor.trim().to_string(),
            district: input.district.trim().to_string(),
            status: RequestStatus::Pending,
            offer: None,
            assigned_agent_id: None,
            inspection_date: None,
            bank_details: None,
            contact: input.contact,
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn submission() -> NewLoanRequest {
        NewLoanRequest {
            customer_id: PartyId::new(),
            requested_amount: dec!(45000),
            currency: Currency::INR,
            asset_descriptor: "22k gold chain, 18g".to_string(),
            district: "Ernakulam".to_string(),
            contact: ContactDetails::default(),
        }
    }

    #[test]
    fn test_submit_starts_pending_without_offer() {
        let request = LoanRequest::submit(submission(), Utc::now()).unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.offer.is_none());
        assert!(request.assigned_agent_id.is_none());
    }

    #[test]
    fn test_submit_rejects_non_positive_amount() {
        let mut input = submission();
        input.requested_amount = dec!(0);
        assert!(matches!(
            LoanRequest::submit(input, Utc::now()),
            Err(LendingError::Validation(_))
        ));
    }

    #[test]
    fn test_submit_rejects_other_currencies() {
        for currency in [Currency::USD, Currency::JPY] {
            let mut input = submission();
            input.currency = currency;
            assert!(matches!(
                LoanRequest::submit(input, Utc::now()),
                Err(LendingError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_status_parse_round_trip_for_every_status() {
        for status in RequestStatus::ALL {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        let terminal: Vec<_> = RequestStatus::ALL.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal.len(), 4);
    }

    #[test]
    fn test_district_match_is_case_insensitive() {
        let admin = Actor::admin(PartyId::new(), vec!["Ernakulam".to_string()]);
        assert!(admin.manages_district("ernakulam"));
        assert!(!admin.manages_district("Thrissur"));
    }
}
