//! Loan DTOs

use serde::Serialize;

use core_kernel::LoanId;
use domain_lending::{EmiInstallment, Loan, Payment};

#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub loan: Loan,
    pub installments: Vec<EmiInstallment>,
}

#[derive(Debug, Serialize)]
pub struct PaymentsResponse {
    pub loan_id: LoanId,
    pub payments: Vec<Payment>,
}
