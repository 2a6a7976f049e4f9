//! Workflow engine
//!
//! Applies an action to a stored loan request. The order of checks is fixed:
//! action lookup for (status, role), guards, action input, then an atomic
//! commit of status, history entry and loan effect. Events and notification
//! jobs are emitted only after the commit succeeded.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use core_kernel::{add_months_clamped, LoanRequestId, Rate};

use crate::amortization::AmortizationCalculator;
use crate::error::LendingError;
use crate::events::{EventBus, LendingEvent};
use crate::loan::{EmiInstallment, Loan};
use crate::notification::{templates_for, NotificationJob};
use crate::ports::{LoanRequestPort, NotificationQueue, RequestQuery};
use crate::request::{Actor, LoanRequest, NewLoanRequest, OfferTerms, RequestStatus, Role};
use crate::retry::{retry_on_conflict, DEFAULT_CONFLICT_ATTEMPTS};
use crate::workflow::action::{ActionEffect, ActionId, ActionInput, Guard, WorkflowAction};
use crate::workflow::history::HistoryEntry;
use crate::workflow::policy::WorkflowPolicy;

/// Change to the loan ledger committed together with a transition
#[derive(Debug, Clone, PartialEq)]
pub enum LoanEffect {
    /// Inserts the loan and its full schedule
    Originate {
        loan: Loan,
        installments: Vec<EmiInstallment>,
    },
    /// Marks the request's loan and its open installments defaulted
    MarkDefaulted { at: DateTime<Utc> },
}

/// Everything a storage adapter writes for one accepted action
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedTransition {
    /// Status the request must still have for the write to apply
    pub prior_status: RequestStatus,
    /// The request as it is after the transition
    pub request: LoanRequest,
    pub entry: HistoryEntry,
    pub effect: Option<LoanEffect>,
}

/// Result of a successful `apply`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionOutcome {
    pub request: LoanRequest,
    pub prior_status: RequestStatus,
    pub new_status: RequestStatus,
    pub history_entry: HistoryEntry,
    pub loan: Option<Loan>,
}

/// An action in the actor's vocabulary and whether a guard blocks it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionAvailability {
    pub action: ActionId,
    pub label: &'static str,
    pub target: RequestStatus,
    pub blocked_by: Option<Guard>,
}

impl ActionAvailability {
    pub fn is_available(&self) -> bool {
        self.blocked_by.is_none()
    }
}

pub struct WorkflowEngine {
    policy: WorkflowPolicy,
    calculator: AmortizationCalculator,
    requests: Arc<dyn LoanRequestPort>,
    notifications: Arc<dyn NotificationQueue>,
    events: EventBus,
    conflict_retry_attempts: u32,
}

impl WorkflowEngine {
    pub fn new(
        requests: Arc<dyn LoanRequestPort>,
        notifications: Arc<dyn NotificationQueue>,
        events: EventBus,
    ) -> Self {
        Self {
            policy: WorkflowPolicy,
            calculator: AmortizationCalculator,
            requests,
            notifications,
            events,
            conflict_retry_attempts: DEFAULT_CONFLICT_ATTEMPTS,
        }
    }

    pub fn with_conflict_retry_attempts(mut self, attempts: u32) -> Self {
        self.conflict_retry_attempts = attempts;
        self
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Creates a Pending request for the submitting customer
    pub async fn submit(&self, actor: &Actor, input: NewLoanRequest) -> Result<LoanRequest, LendingError> {
        if actor.role != Role::Customer {
            return Err(LendingError::UnknownAction {
                action: ActionId::SubmitRequest.to_string(),
                role: actor.role,
                status: RequestStatus::Pending,
            });
        }
        if actor.id != input.customer_id {
            return Err(LendingError::Forbidden { guard: Guard::Ownership });
        }

        let now = Utc::now();
        let request = LoanRequest::submit(input, now)?;
        let entry = HistoryEntry::new(
            request.id,
            ActionId::SubmitRequest,
            actor,
            None,
            RequestStatus::Pending,
            now,
        );
        self.requests.insert_request(&request, &entry).await?;

        tracing::info!(request_id = %request.id, customer_id = %request.customer_id, "Loan request submitted");
        self.events.publish(LendingEvent::RequestSubmitted {
            request_id: request.id,
            customer_id: request.customer_id,
            at: now,
        });
        self.notify(ActionId::SubmitRequest, &request, None).await;

        Ok(request)
    }

    /// Applies `action_id` to the stored request on behalf of `actor`
    pub async fn apply(
        &self,
        request_id: LoanRequestId,
        action_id: &str,
        actor: &Actor,
        input: ActionInput,
    ) -> Result<TransitionOutcome, LendingError> {
        let request = self.requests.get_request(request_id).await?;
        let action = self.policy.lookup(request.status, actor.role, action_id)?;
        self.policy.authorize(action, &request, actor)?;

        let now = Utc::now();
        let prior_status = request.status;
        let (updated, effect, metadata) = self.prepare(action, request, &input, now)?;

        let entry = HistoryEntry::new(updated.id, action.id, actor, Some(prior_status), action.target, now)
            .with_metadata(metadata);
        let transition = CommittedTransition {
            prior_status,
            request: updated,
            entry,
            effect,
        };
        self.requests.record_transition(&transition).await?;

        tracing::info!(
            request_id = %transition.request.id,
            action = %action.id,
            actor_id = %actor.id,
            role = %actor.role,
            from = %prior_status,
            to = %action.target,
            "Transition committed"
        );

        let loan = match transition.effect {
            Some(LoanEffect::Originate { ref loan, .. }) => Some(loan.clone()),
            _ => None,
        };
        self.publish(&transition, loan.as_ref());
        self.notify(action.id, &transition.request, loan.as_ref()).await;

        Ok(TransitionOutcome {
            prior_status,
            new_status: transition.request.status,
            request: transition.request,
            history_entry: transition.entry,
            loan,
        })
    }

    /// Applies an action as the system actor, retrying on conflicts
    pub async fn apply_system(
        &self,
        request_id: LoanRequestId,
        action: ActionId,
    ) -> Result<TransitionOutcome, LendingError> {
        let actor = Actor::system();
        let actor = &actor;
        let action_id = action.as_str();
        retry_on_conflict(self.conflict_retry_attempts, move || {
            self.apply(request_id, action_id, actor, ActionInput::default())
        })
        .await
    }

    /// Every action in the actor's vocabulary for the request's status,
    /// with the guard that currently blocks it, if any
    pub async fn available_actions(
        &self,
        request_id: LoanRequestId,
        actor: &Actor,
    ) -> Result<Vec<ActionAvailability>, LendingError> {
        let request = self.requests.get_request(request_id).await?;
        Ok(self
            .policy
            .permitted_actions(request.status, actor.role)
            .into_iter()
            .map(|action| ActionAvailability {
                action: action.id,
                label: action.label,
                target: action.target,
                blocked_by: action.failing_guard(&request, actor),
            })
            .collect())
    }

    /// The request as currently stored
    pub async fn current_state(&self, request_id: LoanRequestId) -> Result<LoanRequest, LendingError> {
        Ok(self.requests.get_request(request_id).await?)
    }

    pub async fn history(&self, request_id: LoanRequestId) -> Result<Vec<HistoryEntry>, LendingError> {
        Ok(self.requests.history(request_id).await?)
    }

    /// Requests visible to the actor: customers see their own, agents their
    /// assignments, admins their districts
    pub async fn list_requests(
        &self,
        actor: &Actor,
        mut query: RequestQuery,
    ) -> Result<Vec<LoanRequest>, LendingError> {
        match actor.role {
            Role::Customer => query.customer_id = Some(actor.id),
            Role::Agent => query.assigned_agent_id = Some(actor.id),
            Role::Admin => query.districts = Some(actor.districts.clone()),
            Role::System => {}
        }
        Ok(self.requests.list_requests(&query).await?)
    }

    fn prepare(
        &self,
        action: &WorkflowAction,
        mut request: LoanRequest,
        input: &ActionInput,
        now: DateTime<Utc>,
    ) -> Result<(LoanRequest, Option<LoanEffect>, Value), LendingError> {
        let name = action.id.as_str();
        let mut metadata = Map::new();
        metadata.insert("label".into(), json!(action.label));
        if let Some(ref note) = input.note {
            metadata.insert("note".into(), json!(note));
        }

        let mut effect = None;
        match action.effect {
            ActionEffect::None => {}
            ActionEffect::RecordOffer => {
                let offer = self.offer_terms(name, input, now)?;
                metadata.insert("offer".into(), json!(offer));
                request.offer = Some(offer);
            }
            ActionEffect::AssignInspection => {
                let agent_id = input
                    .agent_id
                    .ok_or_else(|| LendingError::missing_input(name, "agent_id"))?;
                let inspection_date = input
                    .inspection_date
                    .ok_or_else(|| LendingError::missing_input(name, "inspection_date"))?;
                metadata.insert("agent_id".into(), json!(agent_id));
                metadata.insert("inspection_date".into(), json!(inspection_date));
                request.assigned_agent_id = Some(agent_id);
                request.inspection_date = Some(inspection_date);
            }
            ActionEffect::RecordBankDetails => {
                let details = input
                    .bank_details
                    .clone()
                    .ok_or_else(|| LendingError::missing_input(name, "bank_details"))?;
                for (field, value) in [
                    ("bank_details.account_holder", &details.account_holder),
                    ("bank_details.account_number", &details.account_number),
                    ("bank_details.ifsc", &details.ifsc),
                ] {
                    if value.trim().is_empty() {
                        return Err(LendingError::missing_input(name, field));
                    }
                }
                request.bank_details = Some(details);
            }
            ActionEffect::OriginateLoan => {
                let offer = request
                    .offer
                    .ok_or_else(|| LendingError::missing_input(name, "offer"))?;
                let disbursed_on = now.date_naive();
                let first_payment_date = match input.first_payment_date {
                    Some(date) if date <= disbursed_on => {
                        return Err(LendingError::validation(
                            "First payment date must be after the disbursal date",
                        ))
                    }
                    Some(date) => date,
                    None => add_months_clamped(disbursed_on, 1)?,
                };
                let schedule = self.calculator.schedule(
                    offer.amount,
                    Rate::annual_percent(offer.annual_rate),
                    offer.tenure_months,
                    first_payment_date,
                )?;
                let (loan, installments) =
                    Loan::originate(request.id, request.currency, &schedule, disbursed_on, now);
                metadata.insert("loan_id".into(), json!(loan.id));
                metadata.insert("emi_amount".into(), json!(loan.emi_amount));
                effect = Some(LoanEffect::Originate { loan, installments });
            }
            ActionEffect::DefaultLoan => {
                effect = Some(LoanEffect::MarkDefaulted { at: now });
            }
        }

        request.status = action.target;
        request.updated_at = now;
        Ok((request, effect, Value::Object(metadata)))
    }

    /// Offer terms must all be present and positive, and must produce a
    /// valid schedule
    fn offer_terms(
        &self,
        action: &str,
        input: &ActionInput,
        now: DateTime<Utc>,
    ) -> Result<OfferTerms, LendingError> {
        let offer = input.offer.clone().unwrap_or_default();
        let amount = offer
            .amount
            .ok_or_else(|| LendingError::missing_input(action, "amount"))?;
        let tenure_months = offer
            .tenure_months
            .ok_or_else(|| LendingError::missing_input(action, "tenure_months"))?;
        let annual_rate = offer
            .annual_rate
            .ok_or_else(|| LendingError::missing_input(action, "annual_rate"))?;

        if amount <= Decimal::ZERO || tenure_months == 0 || annual_rate <= Decimal::ZERO {
            return Err(LendingError::validation(
                "Offer amount, tenure and rate must all be positive",
            ));
        }

        self.calculator.schedule(
            amount,
            Rate::annual_percent(annual_rate),
            tenure_months,
            add_months_clamped(now.date_naive(), 1)?,
        )?;

        Ok(OfferTerms {
            amount,
            tenure_months,
            annual_rate,
        })
    }

    fn publish(&self, transition: &CommittedTransition, loan: Option<&Loan>) {
        let entry = &transition.entry;
        self.events.publish(LendingEvent::Transitioned {
            request_id: entry.request_id,
            action: entry.action,
            actor_id: entry.actor_id,
            actor_role: entry.actor_role,
            prior_status: transition.prior_status,
            next_status: entry.next_status,
            at: entry.timestamp,
        });
        if let Some(loan) = loan {
            self.events.publish(LendingEvent::LoanOriginated {
                loan_id: loan.id,
                request_id: loan.request_id,
                principal: loan.principal,
                emi_amount: loan.emi_amount,
                at: entry.timestamp,
            });
        }
    }

    /// Enqueues the action's notification jobs; failures are logged only
    async fn notify(&self, action: ActionId, request: &LoanRequest, loan: Option<&Loan>) {
        let variables = notification_variables(request, action, loan);
        let now = Utc::now();

        for template in templates_for(action) {
            let job = match NotificationJob::new(template, variables.clone(), now) {
                Ok(job) => job,
                Err(error) => {
                    tracing::warn!(request_id = %request.id, action = %action, error = %error, "Notification skipped");
                    continue;
                }
            };
            if let Err(error) = self.notifications.enqueue(&job).await {
                tracing::warn!(
                    request_id = %request.id,
                    template = %job.template,
                    channel = %job.channel,
                    error = %error,
                    "Failed to enqueue notification"
                );
            }
        }
    }
}

fn notification_variables(request: &LoanRequest, action: ActionId, loan: Option<&Loan>) -> Map<String, Value> {
    let mut vars = Map::new();
    vars.insert("request_id".into(), json!(request.id.to_string()));
    vars.insert("status".into(), json!(request.status));
    vars.insert("action".into(), json!(action));
    vars.insert("customer_name".into(), json!(request.contact.name));
    vars.insert("email".into(), json!(request.contact.email));
    vars.insert("phone".into(), json!(request.contact.phone));
    if let Some(offer) = request.offer {
        vars.insert("offer_amount".into(), json!(offer.amount.to_string()));
        vars.insert("tenure_months".into(), json!(offer.tenure_months));
        vars.insert("annual_rate".into(), json!(offer.annual_rate.to_string()));
    }
    if let Some(date) = request.inspection_date {
        vars.insert("inspection_date".into(), json!(date.to_rfc3339()));
    }
    if let Some(loan) = loan {
        vars.insert("emi_amount".into(), json!(loan.emi_amount.to_string()));
        vars.insert("first_payment_date".into(), json!(loan.first_payment_date.to_string()));
    }
    vars
}
