//! Request/Response data transfer objects

pub mod loans;
pub mod payments;
pub mod requests;
