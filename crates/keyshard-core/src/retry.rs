//! Bounded retries and confirmation waits for calls into the external store

use crate::config::RetryConfig;
use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Run `f`, retrying transient failures with exponential backoff
///
/// Non-retryable errors are returned immediately. When the attempt budget is
/// spent the last transient error is returned to the caller.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                let delay = config.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    error!(
                        operation,
                        attempts = attempt,
                        error = %e,
                        "Retry budget exhausted"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Wait for durable confirmation, bounded by `timeout`
///
/// If the wait times out the write may still have landed, so `recheck` reads
/// durable state: `Some` means the effect is there, `None` yields
/// [`Error::Timeout`].
pub async fn confirm<T, W, R, RFut>(
    timeout: Duration,
    operation: &str,
    wait: W,
    recheck: R,
) -> Result<T>
where
    W: Future<Output = Result<T>>,
    R: FnOnce() -> RFut,
    RFut: Future<Output = Result<Option<T>>>,
{
    match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "Confirmation timed out, re-checking durable state"
            );
            match recheck().await? {
                Some(value) => {
                    info!(operation, "Effect found in durable state after timeout");
                    Ok(value)
                }
                None => Err(Error::Timeout(operation.to_string())),
            }
        }
    }
}
