//! Bounded retry for storage contention

use std::future::Future;

use crate::error::LendingError;

/// Attempts used when the caller has no configured value
pub const DEFAULT_CONFLICT_ATTEMPTS: u32 = 3;

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` attempts have failed with `TransactionConflict`
pub async fn retry_on_conflict<T, F, Fut>(max_attempts: u32, mut op: F) -> Result<T, LendingError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LendingError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(error) if error.is_retryable() && attempt < max_attempts => {
                tracing::debug!(attempt, max_attempts, error = %error, "Retrying after transaction conflict");
                attempt += 1;
                tokio::task::yield_now().await;
            }
            result => return result,
        }
    }
}
