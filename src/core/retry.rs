//! Retry utilities for downstream writes.

use crate::core::{Result, TallyError};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Fixed-interval retry configuration
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt
    pub max_retries: u32,
    /// Delay between attempts
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            interval: Duration::from_secs(5),
        }
    }
}

/// Execute `operation` until it succeeds or `policy.max_retries` retries have
/// failed.
///
/// Every error is retried regardless of kind. On exhaustion the last error is
/// returned wrapped in [`TallyError::RetriesExhausted`].
pub async fn retry_fixed<F, Fut, T>(policy: RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if retries >= policy.max_retries {
                    tracing::error!(retries, "Unable to commit batch, not retrying: {}", error);
                    return Err(TallyError::RetriesExhausted {
                        retries,
                        source: Box::new(error),
                    });
                }

                tracing::warn!(
                    retries,
                    category = error.category(),
                    recoverable = error.is_recoverable(),
                    "Unable to commit batch, retrying in {:?}: {}",
                    policy.interval,
                    error
                );

                retries += 1;
                sleep(policy.interval).await;
            },
        }
    }
}
