//! Calendar arithmetic for repayment schedules
//!
//! Monthly due dates are always offsets from an anchor date, never chained
//! from the previous due date, so that a schedule anchored on the 31st keeps
//! returning to the 31st whenever the month allows it.

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use thiserror::Error;

/// Errors raised by calendar arithmetic
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("Date out of range: {0} + {1} months")]
    OutOfRange(NaiveDate, u32),
}

/// Adds whole months to a date, clamping to the last day of the target month
///
/// Jan 31 + 1 month is Feb 28 (or Feb 29 in a leap year), never Mar 3.
pub fn add_months_clamped(date: NaiveDate, months: u32) -> Result<NaiveDate, CalendarError> {
    date.checked_add_months(Months::new(months))
        .ok_or(CalendarError::OutOfRange(date, months))
}

/// Due date of the `sequence`-th installment (1-based) for a schedule whose
/// first payment falls on `first_payment_date`
pub fn installment_due_date(
    first_payment_date: NaiveDate,
    sequence: u32,
) -> Result<NaiveDate, CalendarError> {
    add_months_clamped(first_payment_date, sequence.saturating_sub(1))
}

/// The latest due date that is past its grace period at `now`
///
/// An installment is overdue when `due_date < cutoff`.
pub fn grace_cutoff(now: DateTime<Utc>, grace_period_days: u32) -> NaiveDate {
    let today = now.date_naive();
    today
        .checked_sub_days(Days::new(u64::from(grace_period_days)))
        .unwrap_or(today)
}
