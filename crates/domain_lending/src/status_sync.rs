//! Request status follows the loan
//!
//! Payments and sweeps commit their loan changes first and move the parent
//! request afterwards, as a separate system transition. A status chosen
//! from inside the committed transaction can be stale by the time it is
//! applied, so every pass here re-reads the loan and the request and applies
//! whichever action the loan's current state calls for. A pass that applied
//! something checks again, which makes the last writer's view win.

use std::sync::Arc;

use core_kernel::LoanId;

use crate::error::LendingError;
use crate::loan::{Loan, LoanStatus};
use crate::ports::RepaymentPort;
use crate::request::RequestStatus;
use crate::workflow::{ActionId, WorkflowEngine};

const MAX_PASSES: usize = 4;

/// The system action that brings `status` in line with the loan, if any
///
/// `RepaymentPort::loans_out_of_step` selects exactly the loans for which
/// this returns `Some`.
pub fn reconciling_action(loan: &Loan, status: RequestStatus) -> Option<ActionId> {
    match (loan.status, status) {
        (LoanStatus::Completed, RequestStatus::AmountDisbursed | RequestStatus::PaymentOverdue) => {
            Some(ActionId::CompleteLoan)
        }
        (LoanStatus::Active, RequestStatus::AmountDisbursed) if loan.overdue_installments > 0 => {
            Some(ActionId::MarkOverdue)
        }
        (LoanStatus::Active, RequestStatus::PaymentOverdue) if loan.overdue_installments == 0 => {
            Some(ActionId::ClearOverdue)
        }
        _ => None,
    }
}

/// Moves a loan's request until it agrees with the loan
#[derive(Clone)]
pub struct StatusSync {
    repayments: Arc<dyn RepaymentPort>,
    engine: Arc<WorkflowEngine>,
}

impl StatusSync {
    pub fn new(repayments: Arc<dyn RepaymentPort>, engine: Arc<WorkflowEngine>) -> Self {
        Self { repayments, engine }
    }

    /// Returns the actions applied, in order; empty when already in step
    pub async fn sync(&self, loan_id: LoanId) -> Result<Vec<ActionId>, LendingError> {
        let mut applied = Vec::new();

        for _ in 0..MAX_PASSES {
            let loan = self.repayments.get_loan(loan_id).await?;
            let request = self.engine.current_state(loan.request_id).await?;
            let Some(action) = reconciling_action(&loan, request.status) else {
                return Ok(applied);
            };

            match self.engine.apply_system(loan.request_id, action).await {
                Ok(outcome) => {
                    tracing::debug!(
                        loan_id = %loan_id,
                        request_id = %loan.request_id,
                        action = %action,
                        status = %outcome.new_status,
                        "Request status synced to loan"
                    );
                    applied.push(action);
                }
                // Someone else moved the request; re-read and decide again
                Err(LendingError::UnknownAction { .. } | LendingError::TransactionConflict(_)) => {
                    tracing::debug!(loan_id = %loan_id, action = %action, "Request moved concurrently");
                }
                Err(error) => return Err(error),
            }
        }

        Err(LendingError::TransactionConflict(format!(
            "Request status for loan {} did not settle",
            loan_id
        )))
    }

    /// Syncs and logs instead of failing; the sweeper repairs what is left
    pub async fn sync_logged(&self, loan_id: LoanId) -> bool {
        match self.sync(loan_id).await {
            Ok(applied) => !applied.is_empty(),
            Err(error) => {
                tracing::warn!(loan_id = %loan_id, error = %error, "Request status sync failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amortization::AmortizationCalculator;
    use chrono::{NaiveDate, Utc};
    use core_kernel::{Currency, LoanRequestId, Rate};
    use rust_decimal_macros::dec;

    fn loan(status: LoanStatus, overdue: u32) -> Loan {
        let schedule = AmortizationCalculator
            .schedule(
                dec!(45000),
                Rate::annual_percent(dec!(12)),
                12,
                NaiveDate::from_ymd_opt(2024, 2, 10).unwrap(),
            )
            .unwrap();
        let (mut loan, _) = Loan::originate(
            LoanRequestId::new(),
            Currency::INR,
            &schedule,
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            Utc::now(),
        );
        loan.status = status;
        loan.overdue_installments = overdue;
        loan
    }

    #[test]
    fn test_overdue_loan_marks_request() {
        let action = reconciling_action(&loan(LoanStatus::Active, 2), RequestStatus::AmountDisbursed);
        assert_eq!(action, Some(ActionId::MarkOverdue));
    }

    #[test]
    fn test_caught_up_loan_clears_request() {
        let action = reconciling_action(&loan(LoanStatus::Active, 0), RequestStatus::PaymentOverdue);
        assert_eq!(action, Some(ActionId::ClearOverdue));
    }

    #[test]
    fn test_completed_loan_completes_request_from_either_status() {
        for status in [RequestStatus::AmountDisbursed, RequestStatus::PaymentOverdue] {
            let action = reconciling_action(&loan(LoanStatus::Completed, 0), status);
            assert_eq!(action, Some(ActionId::CompleteLoan));
        }
    }

    #[test]
    fn test_agreeing_states_need_nothing() {
        assert_eq!(reconciling_action(&loan(LoanStatus::Active, 0), RequestStatus::AmountDisbursed), None);
        assert_eq!(reconciling_action(&loan(LoanStatus::Active, 1), RequestStatus::PaymentOverdue), None);
        assert_eq!(reconciling_action(&loan(LoanStatus::Completed, 0), RequestStatus::Completed), None);
        assert_eq!(reconciling_action(&loan(LoanStatus::Defaulted, 3), RequestStatus::Defaulted), None);
    }
}
