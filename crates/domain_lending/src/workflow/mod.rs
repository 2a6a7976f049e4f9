//! Role-gated loan request workflow
//!
//! - [`action`]: actions, guards and action input as data
//! - [`policy`]: the static (status, role) → action table
//! - [`engine`]: applies actions and commits transitions
//! - [`history`]: the append-only audit trail

pub mod action;
pub mod engine;
pub mod history;
pub mod policy;

pub use action::{ActionEffect, ActionId, ActionInput, Guard, OfferInput, WorkflowAction};
pub use engine::{ActionAvailability, CommittedTransition, LoanEffect, TransitionOutcome, WorkflowEngine};
pub use history::HistoryEntry;
pub use policy::WorkflowPolicy;
