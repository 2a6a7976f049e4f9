//! Custom Test Assertions
//!
//! Assertion helpers for schedules, loans and workflow history that report
//! which row or entry broke the expectation.

use domain_lending::{EmiInstallment, HistoryEntry, InstallmentStatus, Loan, ScheduleRow};
use rust_decimal::Decimal;

/// Asserts that two amounts are within `tolerance` of each other
pub fn assert_amount_approx_eq(actual: Decimal, expected: Decimal, tolerance: Decimal) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= tolerance,
        "Amounts differ by more than tolerance: actual={}, expected={}, diff={}, tolerance={}",
        actual,
        expected,
        diff,
        tolerance
    );
}

/// Asserts the structural properties every amortization schedule has
///
/// Principal portions sum to `principal`, the balance never rises and ends
/// at zero, and due dates strictly increase.
///
/// # Panics
///
/// Panics naming the first offending row
pub fn assert_schedule_consistent(rows: &[ScheduleRow], principal: Decimal) {
    let total: Decimal = rows.iter().map(|r| r.principal).sum();
    assert_eq!(total, principal, "Principal portions sum to {} not {}", total, principal);

    let mut balance = principal;
    for pair in rows.windows(2) {
        assert!(
            pair[1].due_date > pair[0].due_date,
            "Row {} due {} is not after row {} due {}",
            pair[1].sequence,
            pair[1].due_date,
            pair[0].sequence,
            pair[0].due_date
        );
    }
    for row in rows {
        assert!(
            row.remaining_balance <= balance,
            "Balance rose at row {}: {} -> {}",
            row.sequence,
            balance,
            row.remaining_balance
        );
        assert_eq!(row.payment, row.principal + row.interest, "Row {} payment", row.sequence);
        balance = row.remaining_balance;
    }
    if let Some(last) = rows.last() {
        assert_eq!(last.remaining_balance, Decimal::ZERO, "Final balance");
    }
}

/// Asserts that a loan's stored aggregates agree with its installments
pub fn assert_loan_matches_installments(loan: &Loan, installments: &[EmiInstallment]) {
    let paid: Vec<_> = installments
        .iter()
        .filter(|i| i.status == InstallmentStatus::Paid)
        .collect();
    let overdue = installments
        .iter()
        .filter(|i| i.status == InstallmentStatus::Overdue)
        .count();
    let total_paid: Decimal = paid
        .iter()
        .map(|i| i.paid_amount.unwrap_or_else(|| i.due_amount()))
        .sum();

    assert_eq!(loan.paid_installments as usize, paid.len(), "paid_installments");
    assert_eq!(loan.overdue_installments as usize, overdue, "overdue_installments");
    assert_eq!(loan.total_paid, total_paid, "total_paid");
}

/// Asserts that each entry starts where the previous one ended
pub fn assert_history_chains(entries: &[HistoryEntry]) {
    for pair in entries.windows(2) {
        assert_eq!(
            pair[1].prior_status,
            Some(pair[0].next_status),
            "{} does not follow {}",
            pair[1].action,
            pair[0].action
        );
        assert!(pair[1].timestamp >= pair[0].timestamp, "{} is out of order", pair[1].action);
    }
    if let Some(first) = entries.first() {
        assert_eq!(first.prior_status, None, "First entry has a prior status");
    }
}
