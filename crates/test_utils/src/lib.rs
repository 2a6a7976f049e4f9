//! Test Utilities Crate
//!
//! Shared test infrastructure, fixtures, and helpers for the lending test
//! suite.
//!
//! # Modules
//!
//! - `fixtures`: The reference loan scenario and its parties
//! - `builders`: Builders for requests and loans in any state
//! - `database`: PostgreSQL test containers
//! - `assertions`: Assertions over schedules, loans and history
//! - `generators`: Property-based test data generators

pub mod fixtures;
pub mod builders;
pub mod database;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use builders::*;
pub use database::*;
pub use assertions::*;
pub use generators::*;
