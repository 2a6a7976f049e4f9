//! The static workflow policy table
//!
//! ```text
//! Pending ─start-review─▶ UnderReview ─make-offer─▶ OfferMade ─accept-offer─▶ OfferAccepted
//!    │                                     ▲  │                                    │
//!    └──────────make-offer─────────────────┘  └─decline-offer─▶ OfferDeclined      │
//!                                                                      schedule-inspection
//!                                                                                  ▼
//! InspectionCompleted ◀─complete-inspection─ InspectionInProgress ◀─start─ InspectionScheduled
//!    │
//!    └─approve-request─▶ Approved ─request-bank-details─▶ PendingBankDetails
//!                                                            │ submit-bank-details
//!                                                            ▼
//!                     AmountDisbursed ◀─disburse-amount─ BankDetailsSubmitted
//!                      │   ▲     │
//!          mark-overdue│   │clear-overdue
//!                      ▼   │     └─complete-loan─▶ Completed
//!                    PaymentOverdue ─mark-defaulted─▶ Defaulted
//! ```

use crate::error::LendingError;
use crate::request::{Actor, LoanRequest, RequestStatus, Role};
use crate::workflow::action::{ActionEffect, ActionId, Guard, WorkflowAction};

use RequestStatus::*;

const CUSTOMER: &[Role] = &[Role::Customer];
const AGENT: &[Role] = &[Role::Agent];
const ADMIN: &[Role] = &[Role::Admin];
const SYSTEM: &[Role] = &[Role::System];

const OWNER: &[Guard] = &[Guard::Ownership];
const ASSIGNED: &[Guard] = &[Guard::Assignment];
const DISTRICT: &[Guard] = &[Guard::District];
const NO_GUARDS: &[Guard] = &[];

static ACTIONS: &[WorkflowAction] = &[
    WorkflowAction {
        id: ActionId::StartReview,
        label: "Start review",
        from: &[Pending],
        roles: ADMIN,
        guards: DISTRICT,
        target: UnderReview,
        effect: ActionEffect::None,
    },
    WorkflowAction {
        id: ActionId::MakeOffer,
        label: "Make offer",
        from: &[Pending, UnderReview, OfferDeclined],
        roles: ADMIN,
        guards: DISTRICT,
        target: OfferMade,
        effect: ActionEffect::RecordOffer,
    },
    WorkflowAction {
        id: ActionId::AcceptOffer,
        label: "Accept offer",
        from: &[OfferMade],
        roles: CUSTOMER,
        guards: OWNER,
        target: OfferAccepted,
        effect: ActionEffect::None,
    },
    WorkflowAction {
        id: ActionId::DeclineOffer,
        label: "Decline offer",
        from: &[OfferMade],
        roles: CUSTOMER,
        guards: OWNER,
        target: OfferDeclined,
        effect: ActionEffect::None,
    },
    WorkflowAction {
        id: ActionId::CancelRequest,
        label: "Cancel request",
        from: &[Pending, UnderReview, OfferMade, OfferDeclined, OfferAccepted],
        roles: CUSTOMER,
        guards: OWNER,
        target: Cancelled,
        effect: ActionEffect::None,
    },
    WorkflowAction {
        id: ActionId::RejectRequest,
        label: "Reject request",
        from: &[Pending, UnderReview, OfferDeclined, InspectionCompleted],
        roles: ADMIN,
        guards: DISTRICT,
        target: Rejected,
        effect: ActionEffect::None,
    },
    WorkflowAction {
        id: ActionId::ScheduleInspection,
        label: "Schedule inspection",
        from: &[OfferAccepted],
        roles: ADMIN,
        guards: DISTRICT,
        target: InspectionScheduled,
        effect: ActionEffect::AssignInspection,
    },
    WorkflowAction {
        id: ActionId::StartInspection,
        label: "Start inspection",
        from: &[InspectionScheduled],
        roles: AGENT,
        guards: ASSIGNED,
        target: InspectionInProgress,
        effect: ActionEffect::None,
    },
    WorkflowAction {
        id: ActionId::CompleteInspection,
        label: "Complete inspection",
        from: &[InspectionInProgress],
        roles: AGENT,
        guards: ASSIGNED,
        target: InspectionCompleted,
        effect: ActionEffect::None,
    },
    WorkflowAction {
        id: ActionId::ApproveRequest,
        label: "Approve",
        from: &[InspectionCompleted],
        roles: ADMIN,
        guards: DISTRICT,
        target: Approved,
        effect: ActionEffect::None,
    },
    WorkflowAction {
        id: ActionId::RequestBankDetails,
        label: "Request bank details",
        from: &[Approved],
        roles: ADMIN,
        guards: DISTRICT,
        target: PendingBankDetails,
        effect: ActionEffect::None,
    },
    WorkflowAction {
        id: ActionId::SubmitBankDetails,
        label: "Submit bank details",
        from: &[PendingBankDetails],
        roles: CUSTOMER,
        guards: OWNER,
        target: BankDetailsSubmitted,
        effect: ActionEffect::RecordBankDetails,
    },
    WorkflowAction {
        id: ActionId::DisburseAmount,
        label: "Disburse amount",
        from: &[BankDetailsSubmitted],
        roles: ADMIN,
        guards: DISTRICT,
        target: AmountDisbursed,
        effect: ActionEffect::OriginateLoan,
    },
    WorkflowAction {
        id: ActionId::MarkOverdue,
        label: "Mark payment overdue",
        from: &[AmountDisbursed],
        roles: SYSTEM,
        guards: NO_GUARDS,
        target: PaymentOverdue,
        effect: ActionEffect::None,
    },
    WorkflowAction {
        id: ActionId::ClearOverdue,
        label: "Clear overdue",
        from: &[PaymentOverdue],
        roles: SYSTEM,
        guards: NO_GUARDS,
        target: AmountDisbursed,
        effect: ActionEffect::None,
    },
    WorkflowAction {
        id: ActionId::MarkDefaulted,
        label: "Mark defaulted",
        from: &[AmountDisbursed, PaymentOverdue],
        roles: ADMIN,
        guards: DISTRICT,
        target: Defaulted,
        effect: ActionEffect::DefaultLoan,
    },
    WorkflowAction {
        id: ActionId::CompleteLoan,
        label: "Complete loan",
        from: &[AmountDisbursed, PaymentOverdue],
        roles: SYSTEM,
        guards: NO_GUARDS,
        target: Completed,
        effect: ActionEffect::None,
    },
];

/// Read-only view over the action table
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowPolicy;

impl WorkflowPolicy {
    /// Every action the workflow knows
    pub fn actions(&self) -> &'static [WorkflowAction] {
        ACTIONS
    }

    /// Actions in `role`'s vocabulary while a request is at `status`
    pub fn permitted_actions(&self, status: RequestStatus, role: Role) -> Vec<&'static WorkflowAction> {
        ACTIONS.iter().filter(|action| action.permits(status, role)).collect()
    }

    /// Resolves an action id for a status/role pair
    ///
    /// Unknown ids and ids outside the role's vocabulary for the status are
    /// both reported as `UnknownAction`, so the response does not depend on
    /// who owns the request.
    pub fn lookup(
        &self,
        status: RequestStatus,
        role: Role,
        action_id: &str,
    ) -> Result<&'static WorkflowAction, LendingError> {
        action_id
            .parse::<ActionId>()
            .ok()
            .and_then(|id| ACTIONS.iter().find(|a| a.id == id && a.permits(status, role)))
            .ok_or_else(|| LendingError::UnknownAction {
                action: action_id.to_string(),
                role,
                status,
            })
    }

    /// Evaluates the action's guards in order, short-circuiting on the first failure
    pub fn authorize(
        &self,
        action: &WorkflowAction,
        request: &LoanRequest,
        actor: &Actor,
    ) -> Result<(), LendingError> {
        match action.failing_guard(request, actor) {
            Some(guard) => Err(LendingError::Forbidden { guard }),
            None => Ok(()),
        }
    }
}
