//! Workflow actions as data
//!
//! Every action is a [`WorkflowAction`] value: the statuses it may start
//! from, the roles allowed to take it, the guards evaluated in order, the
//! status it lands in, and the effect it has on the request. The engine never
//! branches on action ids; it reads these values.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::PartyId;

use crate::request::{Actor, BankDetails, LoanRequest, RequestStatus, Role};

/// Identifier of a workflow action, as used on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionId {
    /// Recorded in history on creation; not applicable through the engine
    SubmitRequest,
    StartReview,
    MakeOffer,
    AcceptOffer,
    DeclineOffer,
    CancelRequest,
    RejectRequest,
    ScheduleInspection,
    StartInspection,
    CompleteInspection,
    ApproveRequest,
    RequestBankDetails,
    SubmitBankDetails,
    DisburseAmount,
    MarkOverdue,
    ClearOverdue,
    MarkDefaulted,
    CompleteLoan,
}

impl ActionId {
    pub const ALL: [ActionId; 18] = [
        ActionId::SubmitRequest,
        ActionId::StartReview,
        ActionId::MakeOffer,
        ActionId::AcceptOffer,
        ActionId::DeclineOffer,
        ActionId::CancelRequest,
        ActionId::RejectRequest,
        ActionId::ScheduleInspection,
        ActionId::StartInspection,
        ActionId::CompleteInspection,
        ActionId::ApproveRequest,
        ActionId::RequestBankDetails,
        ActionId::SubmitBankDetails,
        ActionId::DisburseAmount,
        ActionId::MarkOverdue,
        ActionId::ClearOverdue,
        ActionId::MarkDefaulted,
        ActionId::CompleteLoan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionId::SubmitRequest => "submit-request",
            ActionId::StartReview => "start-review",
            ActionId::MakeOffer => "make-offer",
            ActionId::AcceptOffer => "accept-offer",
            ActionId::DeclineOffer => "decline-offer",
            ActionId::CancelRequest => "cancel-request",
            ActionId::RejectRequest => "reject-request",
            ActionId::ScheduleInspection => "schedule-inspection",
            ActionId::StartInspection => "start-inspection",
            ActionId::CompleteInspection => "complete-inspection",
            ActionId::ApproveRequest => "approve-request",
            ActionId::RequestBankDetails => "request-bank-details",
            ActionId::SubmitBankDetails => "submit-bank-details",
            ActionId::DisburseAmount => "disburse-amount",
            ActionId::MarkOverdue => "mark-overdue",
            ActionId::ClearOverdue => "clear-overdue",
            ActionId::MarkDefaulted => "mark-defaulted",
            ActionId::CompleteLoan => "complete-loan",
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionId::ALL.iter().copied().find(|id| id.as_str() == s).ok_or(())
    }
}

/// Eligibility predicate evaluated after the role/status lookup succeeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    /// Actor must be the customer who owns the request
    Ownership,
    /// Actor must be the agent assigned to the request
    Assignment,
    /// Actor must manage the request's district
    District,
}

impl Guard {
    /// Evaluates the guard for an actor against a request
    pub fn check(&self, request: &LoanRequest, actor: &Actor) -> bool {
        match self {
            Guard::Ownership => actor.id == request.customer_id,
            Guard::Assignment => request.assigned_agent_id == Some(actor.id),
            Guard::District => actor.manages_district(&request.district),
        }
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Guard::Ownership => "only the customer who submitted this request may do this",
            Guard::Assignment => "only the agent assigned to this request may do this",
            Guard::District => "this request is outside the districts you manage",
        };
        f.write_str(reason)
    }
}

/// What an action does to the request beyond moving its status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionEffect {
    None,
    /// Requires amount, tenure and rate; stores the offer
    RecordOffer,
    /// Requires an agent and an inspection time; assigns the agent
    AssignInspection,
    /// Requires bank details; stores them
    RecordBankDetails,
    /// Creates the loan and its repayment schedule
    OriginateLoan,
    /// Marks the loan defaulted
    DefaultLoan,
}

/// Offer terms as supplied by the caller, before validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferInput {
    pub amount: Option<Decimal>,
    pub tenure_months: Option<u32>,
    pub annual_rate: Option<Decimal>,
}

/// Action-specific input; every field is optional and checked per effect
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionInput {
    #[serde(default)]
    pub offer: Option<OfferInput>,
    #[serde(default)]
    pub agent_id: Option<PartyId>,
    #[serde(default)]
    pub inspection_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub bank_details: Option<BankDetails>,
    #[serde(default)]
    pub first_payment_date: Option<NaiveDate>,
    /// Free-form note recorded in the history metadata
    #[serde(default)]
    pub note: Option<String>,
}

impl ActionInput {
    pub fn offer(amount: Decimal, tenure_months: u32, annual_rate: Decimal) -> Self {
        Self {
            offer: Some(OfferInput {
                amount: Some(amount),
                tenure_months: Some(tenure_months),
                annual_rate: Some(annual_rate),
            }),
            ..Default::default()
        }
    }

    pub fn inspection(agent_id: PartyId, at: DateTime<Utc>) -> Self {
        Self {
            agent_id: Some(agent_id),
            inspection_date: Some(at),
            ..Default::default()
        }
    }

    pub fn bank_details(details: BankDetails) -> Self {
        Self {
            bank_details: Some(details),
            ..Default::default()
        }
    }
}

/// A named operation on a loan request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkflowAction {
    pub id: ActionId,
    /// Short label suitable for buttons and messages
    pub label: &'static str,
    pub from: &'static [RequestStatus],
    pub roles: &'static [Role],
    /// Evaluated in order; the first failing guard is reported
    pub guards: &'static [Guard],
    pub target: RequestStatus,
    pub effect: ActionEffect,
}

impl WorkflowAction {
    /// Returns true if the action is in `role`'s vocabulary at `status`
    pub fn permits(&self, status: RequestStatus, role: Role) -> bool {
        self.from.contains(&status) && self.roles.contains(&role)
    }

    /// Returns the first guard the actor fails, if any
    pub fn failing_guard(&self, request: &LoanRequest, actor: &Actor) -> Option<Guard> {
        self.guards.iter().copied().find(|guard| !guard.check(request, actor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_id_parse() {
        assert_eq!("make-offer".parse::<ActionId>(), Ok(ActionId::MakeOffer));
        assert!("makeOffer".parse::<ActionId>().is_err());
    }

    #[test]
    fn test_action_id_serde_matches_wire_name() {
        for id in ActionId::ALL {
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.as_str()));
        }
    }
}
