//! Core Kernel - Foundational types for the lending core
//!
//! This crate provides the building blocks shared by the domain, storage and
//! API crates:
//! - Strongly typed identifiers
//! - Currency rounding policy and interest rates
//! - Month arithmetic with month-end clamping
//! - The port vocabulary (`PortError`, `DomainPort`, health checks)

pub mod money;
pub mod calendar;
pub mod identifiers;
pub mod ports;
pub mod error;

pub use money::{Currency, MoneyError, Rate, round_currency};
pub use calendar::{add_months_clamped, installment_due_date, grace_cutoff, CalendarError};
pub use identifiers::{
    LoanRequestId, HistoryEntryId, LoanId, InstallmentId, PaymentId,
    PaymentOrderId, PartyId, NotificationJobId,
};
pub use ports::{PortError, DomainPort, AdapterHealth, HealthCheckResult, HealthCheckable};
pub use error::CoreError;
