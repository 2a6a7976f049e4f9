//! Loan aggregate and its installments
//!
//! A loan is originated exactly once, when its request is disbursed. Its
//! aggregates (paid count, total paid, overdue count, remaining balance) are
//! always re-derived from the installment rows, never incremented in place.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{Currency, InstallmentId, LoanId, LoanRequestId, Rate};

use crate::amortization::{AmortizationSchedule, ScheduleRow};
use crate::error::LendingError;

/// Lifecycle status of a loan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Active,
    Completed,
    Defaulted,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Active => "active",
            LoanStatus::Completed => "completed",
            LoanStatus::Defaulted => "defaulted",
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanStatus {
    type Err = LendingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LoanStatus::Active),
            "completed" => Ok(LoanStatus::Completed),
            "defaulted" => Ok(LoanStatus::Defaulted),
            other => Err(LendingError::validation(format!("Unknown loan status: {}", other))),
        }
    }
}

/// Status of a single installment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Pending,
    Paid,
    Overdue,
    Defaulted,
}

impl InstallmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallmentStatus::Pending => "pending",
            InstallmentStatus::Paid => "paid",
            InstallmentStatus::Overdue => "overdue",
            InstallmentStatus::Defaulted => "defaulted",
        }
    }

    /// Pending and overdue installments can still receive a payment
    pub fn is_open(&self) -> bool {
        matches!(self, InstallmentStatus::Pending | InstallmentStatus::Overdue)
    }
}

impl fmt::Display for InstallmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallmentStatus {
    type Err = LendingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InstallmentStatus::Pending),
            "paid" => Ok(InstallmentStatus::Paid),
            "overdue" => Ok(InstallmentStatus::Overdue),
            "defaulted" => Ok(InstallmentStatus::Defaulted),
            other => Err(LendingError::validation(format!("Unknown installment status: {}", other))),
        }
    }
}

/// One scheduled repayment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmiInstallment {
    pub id: InstallmentId,
    pub loan_id: LoanId,
    pub sequence: u32,
    pub due_date: NaiveDate,
    pub scheduled_amount: Decimal,
    pub principal: Decimal,
    pub interest: Decimal,
    /// Balance outstanding after this installment is paid, per the schedule
    pub remaining_balance: Decimal,
    pub status: InstallmentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub paid_amount: Option<Decimal>,
    pub late_fee: Decimal,
}

impl EmiInstallment {
    pub fn from_row(loan_id: LoanId, row: &ScheduleRow) -> Self {
        Self {
            id: InstallmentId::new_v7(),
            loan_id,
            sequence: row.sequence,
            due_date: row.due_date,
            scheduled_amount: row.payment,
            principal: row.principal,
            interest: row.interest,
            remaining_balance: row.remaining_balance,
            status: InstallmentStatus::Pending,
            paid_at: None,
            paid_amount: None,
            late_fee: Decimal::ZERO,
        }
    }

    /// Amount that settles this installment: scheduled amount plus late fee
    pub fn due_amount(&self) -> Decimal {
        self.scheduled_amount + self.late_fee
    }

    pub fn mark_paid(&mut self, at: DateTime<Utc>) {
        self.paid_amount = Some(self.due_amount());
        self.paid_at = Some(at);
        self.status = InstallmentStatus::Paid;
    }

    /// The persisted schedule row shape
    pub fn schedule_row(&self) -> ScheduleRow {
        ScheduleRow {
            sequence: self.sequence,
            due_date: self.due_date,
            payment: self.scheduled_amount,
            principal: self.principal,
            interest: self.interest,
            remaining_balance: self.remaining_balance,
        }
    }
}

/// A disbursed loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub request_id: LoanRequestId,
    pub principal: Decimal,
    pub currency: Currency,
    pub tenure_months: u32,
    pub annual_rate: Rate,
    pub emi_amount: Decimal,
    pub total_paid: Decimal,
    pub paid_installments: u32,
    pub overdue_installments: u32,
    pub remaining_balance: Decimal,
    pub disbursed_on: NaiveDate,
    pub first_payment_date: NaiveDate,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// Creates the loan and its installments from a computed schedule
    pub fn originate(
        request_id: LoanRequestId,
        currency: Currency,
        schedule: &AmortizationSchedule,
        disbursed_on: NaiveDate,
        now: DateTime<Utc>,
    ) -> (Self, Vec<EmiInstallment>) {
        let loan = Self {
            id: LoanId::new_v7(),
            request_id,
            principal: schedule.principal,
            currency,
            tenure_months: schedule.tenure_months,
            annual_rate: schedule.annual_rate,
            emi_amount: schedule.emi_amount,
            total_paid: Decimal::ZERO,
            paid_installments: 0,
            overdue_installments: 0,
            remaining_balance: schedule.principal,
            disbursed_on,
            first_payment_date: schedule.first_payment_date,
            status: LoanStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let installments = schedule
            .rows
            .iter()
            .map(|row| EmiInstallment::from_row(loan.id, row))
            .collect();
        (loan, installments)
    }

    /// Re-derives every aggregate from a fresh read of the installments
    ///
    /// An active loan whose installments are all paid becomes `Completed`.
    pub fn recompute(&mut self, installments: &[EmiInstallment], now: DateTime<Utc>) {
        let paid: Vec<_> = installments
            .iter()
            .filter(|i| i.status == InstallmentStatus::Paid)
            .collect();

        self.paid_installments = paid.len() as u32;
        self.total_paid = paid
            .iter()
            .map(|i| i.paid_amount.unwrap_or_else(|| i.due_amount()))
            .sum();
        self.overdue_installments = installments
            .iter()
            .filter(|i| i.status == InstallmentStatus::Overdue)
            .count() as u32;
        self.remaining_balance = installments
            .iter()
            .filter(|i| i.status != InstallmentStatus::Paid)
            .map(|i| i.principal)
            .sum();

        if self.status == LoanStatus::Active
            && !installments.is_empty()
            && paid.len() == installments.len()
        {
            self.status = LoanStatus::Completed;
        }
        self.updated_at = now;
    }

    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Active
    }
}

/// Sum of the amounts due on the first `count` of `open`
///
/// `open` holds a loan's pending and overdue installments, earliest due
/// first. Checkout prices orders with this and the reconciler checks every
/// confirmation against it.
pub fn amount_due(open: &[EmiInstallment], count: u32) -> Result<Decimal, LendingError> {
    if count == 0 {
        return Err(LendingError::validation("Installment count must be at least one"));
    }
    if count as usize > open.len() {
        return Err(LendingError::validation(format!("Only {} installments are open", open.len())));
    }
    Ok(open.iter().take(count as usize).map(|i| i.due_amount()).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amortization::AmortizationCalculator;
    use rust_decimal_macros::dec;

    fn originate() -> (Loan, Vec<EmiInstallment>) {
        let first = NaiveDate::from_ymd_opt(2024, 2, 10).unwrap();
        let schedule = AmortizationCalculator
            .schedule(dec!(45000), Rate::annual_percent(dec!(12)), 12, first)
            .unwrap();
        Loan::originate(
            LoanRequestId::new(),
            Currency::INR,
            &schedule,
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn test_originate_copies_schedule() {
        let (loan, installments) = originate();
        assert_eq!(installments.len(), 12);
        assert!(installments.iter().all(|i| i.loan_id == loan.id));
        assert!(installments.iter().all(|i| i.status == InstallmentStatus::Pending));
        assert_eq!(loan.remaining_balance, dec!(45000));
        assert_eq!(loan.emi_amount, dec!(3998.20));
    }

    #[test]
    fn test_recompute_from_installments() {
        let (mut loan, mut installments) = originate();
        installments[0].mark_paid(Utc::now());
        installments[1].status = InstallmentStatus::Overdue;

        loan.recompute(&installments, Utc::now());

        assert_eq!(loan.paid_installments, 1);
        assert_eq!(loan.total_paid, dec!(3998.20));
        assert_eq!(loan.overdue_installments, 1);
        assert_eq!(loan.remaining_balance, dec!(41451.80));
        assert_eq!(loan.status, LoanStatus::Active);
    }

    #[test]
    fn test_recompute_completes_when_all_paid() {
        let (mut loan, mut installments) = originate();
        for installment in installments.iter_mut() {
            installment.mark_paid(Utc::now());
        }

        loan.recompute(&installments, Utc::now());

        assert_eq!(loan.status, LoanStatus::Completed);
        assert_eq!(loan.remaining_balance, dec!(0));
    }

    #[test]
    fn test_amount_due_sums_next_installments() {
        let (_, mut installments) = originate();
        installments[0].late_fee = dec!(100);
        assert_eq!(amount_due(&installments, 2).unwrap(), dec!(8096.40));
        assert!(matches!(amount_due(&installments, 0), Err(LendingError::Validation(_))));
        assert!(matches!(amount_due(&installments[..2], 3), Err(LendingError::Validation(_))));
    }

    #[test]
    fn test_due_amount_includes_late_fee() {
        let (_, mut installments) = originate();
        installments[0].late_fee = dec!(100);
        assert_eq!(installments[0].due_amount(), dec!(4098.20));
    }
}
