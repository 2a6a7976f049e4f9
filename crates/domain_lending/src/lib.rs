//! Lending Domain - Loan lifecycle core
//!
//! This crate holds the business rules of a secured micro-loan:
//!
//! - **Workflow**: a role-gated state machine over loan requests, defined as
//!   a static table of actions with guards ([`workflow`])
//! - **Amortization**: reducing-balance schedules with exact principal
//!   reconciliation on the final row ([`amortization`])
//! - **Reconciliation**: exactly-once application of gateway-confirmed
//!   payments to installments ([`reconciler`])
//! - **Overdue sweep**: periodic, single-flight reclassification of unpaid
//!   installments ([`sweeper`])
//! - **Status sync**: moves a disbursed request to match its loan after a
//!   payment or sweep commits ([`status_sync`])
//! - **Gateway boundary**: signature verification, callback normalization
//!   and order creation ([`gateway`], [`checkout`])
//!
//! Storage and the notification outbox are reached only through the traits
//! in [`ports`]; the `mock` feature provides in-memory implementations.

pub mod amortization;
pub mod checkout;
pub mod error;
pub mod events;
pub mod gateway;
pub mod loan;
pub mod notification;
pub mod payment;
pub mod ports;
pub mod reconciler;
pub mod request;
pub mod retry;
pub mod status_sync;
pub mod sweeper;
pub mod workflow;

pub use amortization::{AmortizationCalculator, AmortizationSchedule, ScheduleRow};
pub use checkout::{CallbackOutcome, CheckoutOrder, CheckoutService, CreateOrder, OrderStatus, PaymentOrder};
pub use error::LendingError;
pub use events::{EventBus, LendingEvent};
pub use gateway::{GatewayAdapter, GatewayCredentials, GatewayEvent, SignedGatewayRequest, SETTLEMENT_CURRENCY};
pub use loan::{EmiInstallment, InstallmentStatus, Loan, LoanStatus};
pub use notification::{Channel, DeliveryStatus, NotificationJob, NotificationTemplate, QueuedNotification, RetryPolicy};
pub use payment::{Payment, PaymentMethod};
pub use ports::{LoanRequestPort, NotificationQueue, PaymentOrderPort, RepaymentPort, RepaymentTx, RequestQuery};
pub use reconciler::{ApplyOutcome, PaymentApplication, PaymentConfirmation, PaymentReconciler};
pub use request::{Actor, BankDetails, ContactDetails, LoanRequest, NewLoanRequest, OfferTerms, RequestStatus, Role};
pub use retry::retry_on_conflict;
pub use status_sync::StatusSync;
pub use sweeper::{spawn_sweeper, OverdueSweeper, SweepOutcome, SweepReport, SweeperConfig, SweeperHandle};
pub use workflow::{
    ActionAvailability, ActionEffect, ActionId, ActionInput, Guard, HistoryEntry, OfferInput, TransitionOutcome,
    WorkflowAction, WorkflowEngine, WorkflowPolicy,
};
