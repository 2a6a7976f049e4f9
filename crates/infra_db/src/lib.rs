//! Infrastructure Database Layer
//!
//! PostgreSQL adapters for the ports declared in `domain_lending::ports`,
//! built on SQLx with runtime-checked queries.
//!
//! # Transactions
//!
//! A workflow transition (status write, history row, loan origination or
//! default) commits in one transaction, guarded by a compare-and-set on the
//! request's prior status. Repayment units of work hold a `FOR UPDATE` lock
//! on the loan row from `lock_loan` until commit.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, PgLoanRequestStore};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/lending")).await?;
//! run_migrations(&pool).await?;
//! let requests = PgLoanRequestStore::new(pool.clone());
//! ```

pub mod pool;
pub mod error;
pub mod repositories;

pub use pool::{create_pool, run_migrations, DatabaseConfig, DatabasePool};
pub use error::DatabaseError;
pub use repositories::{PgLoanRequestStore, PgNotificationQueue, PgRepaymentStore, PgRepaymentTx};
