//! Reducing-balance amortization
//!
//! The schedule is a pure function of principal, rate, tenure and first
//! payment date. Amounts are rounded with [`round_currency`] (half away from
//! zero, two decimals) at every step, and the final row absorbs the drift so
//! that the principal components always sum to the original principal.
//!
//! ```text
//! r   = annual / 100 / 12
//! EMI = P / n                          when r == 0
//! EMI = P * r * (1+r)^n / ((1+r)^n - 1) otherwise
//! ```

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{installment_due_date, round_currency, Rate};

use crate::error::LendingError;

/// Longest tenure a schedule may be computed for
pub const MAX_TENURE_MONTHS: u32 = 360;

/// Highest annual rate accepted, in percent
pub const MAX_ANNUAL_RATE: Decimal = Decimal::ONE_HUNDRED;

/// One row of the persisted schedule
///
/// This is the shape agreement and UI collaborators read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub sequence: u32,
    pub due_date: NaiveDate,
    pub payment: Decimal,
    pub principal: Decimal,
    pub interest: Decimal,
    pub remaining_balance: Decimal,
}

/// A complete repayment schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmortizationSchedule {
    pub principal: Decimal,
    pub annual_rate: Rate,
    pub tenure_months: u32,
    pub first_payment_date: NaiveDate,
    pub emi_amount: Decimal,
    pub total_interest: Decimal,
    pub total_payment: Decimal,
    pub rows: Vec<ScheduleRow>,
}

/// Computes fixed-payment schedules
#[derive(Debug, Clone, Copy, Default)]
pub struct AmortizationCalculator;

impl AmortizationCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Builds the schedule for a loan
    pub fn schedule(
        &self,
        principal: Decimal,
        annual_rate: Rate,
        tenure_months: u32,
        first_payment_date: NaiveDate,
    ) -> Result<AmortizationSchedule, LendingError> {
        validate_terms(principal, annual_rate, tenure_months)?;

        let monthly_rate = annual_rate.monthly();
        let emi_amount = Self::emi(principal, monthly_rate, tenure_months)?;

        let mut rows = Vec::with_capacity(tenure_months as usize);
        let mut balance = principal;

        for sequence in 1..=tenure_months {
            let interest = round_currency(balance * monthly_rate);
            let principal_part = if sequence == tenure_months {
                balance
            } else {
                (emi_amount - interest).min(balance).max(Decimal::ZERO)
            };
            balance -= principal_part;

            rows.push(ScheduleRow {
                sequence,
                due_date: installment_due_date(first_payment_date, sequence)?,
                payment: principal_part + interest,
                principal: principal_part,
                interest,
                remaining_balance: balance,
            });
        }

        let principal_sum: Decimal = rows.iter().map(|row| row.principal).sum();
        if principal_sum != principal {
            return Err(LendingError::ScheduleInvariant(format!(
                "principal components sum to {} but principal is {}",
                principal_sum, principal
            )));
        }

        let total_interest: Decimal = rows.iter().map(|row| row.interest).sum();
        let total_payment: Decimal = rows.iter().map(|row| row.payment).sum();

        Ok(AmortizationSchedule {
            principal,
            annual_rate,
            tenure_months,
            first_payment_date,
            emi_amount,
            total_interest,
            total_payment,
            rows,
        })
    }

    /// Equated monthly installment, rounded to currency precision
    pub fn emi(
        principal: Decimal,
        monthly_rate: Decimal,
        tenure_months: u32,
    ) -> Result<Decimal, LendingError> {
        if tenure_months == 0 {
            return Err(LendingError::validation("Tenure must be at least one month"));
        }
        if monthly_rate.is_zero() {
            return Ok(round_currency(principal / Decimal::from(tenure_months)));
        }

        let growth = compound(Decimal::ONE + monthly_rate, tenure_months)?;
        let numerator = principal
            .checked_mul(monthly_rate)
            .and_then(|v| v.checked_mul(growth))
            .ok_or_else(|| LendingError::validation("EMI calculation overflowed"))?;
        let emi = numerator
            .checked_div(growth - Decimal::ONE)
            .ok_or_else(|| LendingError::validation("EMI calculation overflowed"))?;

        Ok(round_currency(emi))
    }
}

fn validate_terms(principal: Decimal, annual_rate: Rate, tenure_months: u32) -> Result<(), LendingError> {
    if principal <= Decimal::ZERO {
        return Err(LendingError::validation("Principal must be positive"));
    }
    if round_currency(principal) != principal {
        return Err(LendingError::validation(
            "Principal must not have more than two decimal places",
        ));
    }
    if tenure_months == 0 || tenure_months > MAX_TENURE_MONTHS {
        return Err(LendingError::validation(format!(
            "Tenure must be between 1 and {} months",
            MAX_TENURE_MONTHS
        )));
    }
    let rate = annual_rate.as_percentage();
    if rate < Decimal::ZERO || rate > MAX_ANNUAL_RATE {
        return Err(LendingError::validation(format!(
            "Annual rate must be between 0 and {}",
            MAX_ANNUAL_RATE
        )));
    }
    Ok(())
}

/// `base^exponent` by repeated checked multiplication
fn compound(base: Decimal, exponent: u32) -> Result<Decimal, LendingError> {
    (0..exponent).try_fold(Decimal::ONE, |acc, _| {
        acc.checked_mul(base)
            .ok_or_else(|| LendingError::validation("Rate and tenure overflow the compounding factor"))
    })
}
