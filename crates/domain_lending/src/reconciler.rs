//! Payment reconciliation
//!
//! Applies a confirmed amount to a loan's open installments, earliest due
//! first, in whole installments only. The amount must equal the sum of the
//! next `installment_count` amounts due; anything else is rejected before a
//! row is written, so no part of a confirmation is ever left unapplied. The
//! gateway reference is the idempotency key: a reference already present in
//! the ledger returns the earlier result as [`ApplyOutcome::AlreadyProcessed`].
//!
//! The loan row is locked before the reference lookup, so a second delivery
//! of the same reference waits for the first to commit and then sees its
//! rows. The unique (reference, installment) constraint backs this up; a
//! violation surfaces as a conflict, and the retry finds the committed rows.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use core_kernel::{LoanId, PartyId, PaymentId};

use crate::error::LendingError;
use crate::events::{EventBus, LendingEvent};
use crate::loan::{amount_due, Loan};
use crate::payment::{Payment, PaymentMethod};
use crate::ports::RepaymentPort;
use crate::retry::{retry_on_conflict, DEFAULT_CONFLICT_ATTEMPTS};
use crate::status_sync::StatusSync;
use crate::workflow::WorkflowEngine;

/// A gateway-confirmed amount to apply
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentConfirmation {
    pub loan_id: LoanId,
    pub external_reference: String,
    pub amount: Decimal,
    /// Installments this confirmation settles
    pub installment_count: u32,
    pub method: PaymentMethod,
    pub processed_by: PartyId,
}

/// Payment rows of one application and the loan state after it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentApplication {
    pub payments: Vec<Payment>,
    pub loan: Loan,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied(PaymentApplication),
    /// The reference was applied before; nothing changed
    AlreadyProcessed(PaymentApplication),
}

impl ApplyOutcome {
    pub fn application(&self) -> &PaymentApplication {
        match self {
            ApplyOutcome::Applied(application) | ApplyOutcome::AlreadyProcessed(application) => application,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, ApplyOutcome::AlreadyProcessed(_))
    }
}

pub struct PaymentReconciler {
    repayments: Arc<dyn RepaymentPort>,
    sync: StatusSync,
    events: EventBus,
    conflict_retry_attempts: u32,
}

impl PaymentReconciler {
    pub fn new(repayments: Arc<dyn RepaymentPort>, engine: Arc<WorkflowEngine>, events: EventBus) -> Self {
        Self {
            sync: StatusSync::new(repayments.clone(), engine),
            repayments,
            events,
            conflict_retry_attempts: DEFAULT_CONFLICT_ATTEMPTS,
        }
    }

    pub fn with_conflict_retry_attempts(mut self, attempts: u32) -> Self {
        self.conflict_retry_attempts = attempts;
        self
    }

    /// Applies a confirmation exactly once
    pub async fn apply_payment(&self, confirmation: PaymentConfirmation) -> Result<ApplyOutcome, LendingError> {
        validate(&confirmation)?;

        let confirmation = &confirmation;
        let outcome = retry_on_conflict(self.conflict_retry_attempts, move || {
            self.apply_once(confirmation)
        })
        .await?;

        if let ApplyOutcome::Applied(ref application) = outcome {
            let loan = &application.loan;
            tracing::info!(
                loan_id = %loan.id,
                reference = %confirmation.external_reference,
                installments = application.payments.len(),
                paid_installments = loan.paid_installments,
                loan_status = %loan.status,
                "Payment applied"
            );
            self.events.publish(LendingEvent::PaymentApplied {
                loan_id: loan.id,
                external_reference: confirmation.external_reference.clone(),
                installments: application.payments.len() as u32,
                amount: application.payments.iter().map(|p| p.amount).sum(),
                loan_status: loan.status,
                at: Utc::now(),
            });
        } else {
            tracing::info!(
                loan_id = %confirmation.loan_id,
                reference = %confirmation.external_reference,
                "Payment reference already processed"
            );
        }

        // A replay also repairs a request left behind by an earlier cascade
        self.sync.sync_logged(outcome.application().loan.id).await;

        Ok(outcome)
    }

    async fn apply_once(&self, confirmation: &PaymentConfirmation) -> Result<ApplyOutcome, LendingError> {
        let mut tx = self.repayments.begin().await?;
        let mut loan = tx.lock_loan(confirmation.loan_id).await?;

        let existing = tx.payments_by_reference(&confirmation.external_reference).await?;
        if let Some(first) = existing.first() {
            if first.loan_id != loan.id {
                return Err(LendingError::validation(format!(
                    "Reference {} was applied to another loan",
                    confirmation.external_reference
                )));
            }
            return Ok(ApplyOutcome::AlreadyProcessed(PaymentApplication { payments: existing, loan }));
        }

        let open = tx.open_installments(loan.id).await?;
        if open.is_empty() {
            return Err(LendingError::NothingToApply(loan.id.to_string()));
        }
        let expected = amount_due(&open, confirmation.installment_count)?;
        if expected != confirmation.amount {
            tracing::warn!(
                loan_id = %loan.id,
                reference = %confirmation.external_reference,
                expected = %expected,
                confirmed = %confirmation.amount,
                "Rejected confirmation that does not settle whole installments"
            );
            return Err(LendingError::AmountMismatch {
                expected,
                claimed: confirmation.amount,
            });
        }

        let now = Utc::now();
        let mut payments = Vec::with_capacity(confirmation.installment_count as usize);

        for mut installment in open.into_iter().take(confirmation.installment_count as usize) {
            let due = installment.due_amount();
            installment.mark_paid(now);
            tx.save_installment(&installment).await?;

            let payment = Payment {
                id: PaymentId::new_v7(),
                loan_id: loan.id,
                installment_id: installment.id,
                amount: due,
                method: confirmation.method,
                external_reference: confirmation.external_reference.clone(),
                processed_by: confirmation.processed_by,
                created_at: now,
            };
            tx.insert_payment(&payment).await?;
            payments.push(payment);
        }

        let installments = tx.installments(loan.id).await?;
        loan.recompute(&installments, now);
        tx.save_loan(&loan).await?;
        tx.commit().await?;

        Ok(ApplyOutcome::Applied(PaymentApplication { payments, loan }))
    }
}

fn validate(confirmation: &PaymentConfirmation) -> Result<(), LendingError> {
    if confirmation.external_reference.trim().is_empty() {
        return Err(LendingError::validation("External reference is required"));
    }
    if confirmation.amount <= Decimal::ZERO {
        return Err(LendingError::validation("Confirmed amount must be positive"));
    }
    if confirmation.installment_count == 0 {
        return Err(LendingError::validation("Installment count must be at least one"));
    }
    Ok(())
}
