//! PostgreSQL implementations of the lending ports
//!
//! Each store owns a pool handle and implements one or more port traits from
//! `domain_lending::ports`. Queries are checked at runtime; rows are decoded
//! into `FromRow` structs and then mapped to domain types, so a malformed
//! stored value surfaces as `DatabaseError::SerializationError` rather than a
//! panic. Status and enum columns hold the domain's snake_case names.

pub mod loan_requests;
pub mod notifications;
pub mod repayments;

pub use loan_requests::PgLoanRequestStore;
pub use notifications::PgNotificationQueue;
pub use repayments::{PgRepaymentStore, PgRepaymentTx};

use chrono::Utc;
use sqlx::PgPool;
use std::str::FromStr;

use core_kernel::{AdapterHealth, HealthCheckResult};

use crate::error::DatabaseError;

/// Runs `SELECT 1` and reports the latency
pub(crate) async fn ping(pool: &PgPool, adapter_id: &str) -> HealthCheckResult {
    let start = std::time::Instant::now();
    let result = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    let (status, message) = match result {
        Ok(_) => (AdapterHealth::Healthy, None),
        Err(e) => (AdapterHealth::Unhealthy, Some(format!("Database error: {}", e))),
    };
    HealthCheckResult {
        adapter_id: adapter_id.to_string(),
        status,
        latency_ms,
        message,
        checked_at: Utc::now(),
    }
}

/// Parses a text column into a domain enum
pub(crate) fn parse_column<T: FromStr>(column: &str, value: &str) -> Result<T, DatabaseError> {
    value
        .parse()
        .map_err(|_| DatabaseError::decode(column, format!("unexpected value '{}'", value)))
}

/// Domain counts are `u32`; Postgres `INTEGER` is signed
pub(crate) fn to_db_int(column: &str, value: u32) -> Result<i32, DatabaseError> {
    i32::try_from(value).map_err(|e| DatabaseError::decode(column, e))
}

pub(crate) fn from_db_int(column: &str, value: i32) -> Result<u32, DatabaseError> {
    u32::try_from(value).map_err(|e| DatabaseError::decode(column, e))
}
