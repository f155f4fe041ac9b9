//! Startup connection retries with exponential backoff.

use std::fmt::Display;
use std::future::Future;

use crate::config::RetryPolicy;
use crate::error::{BridgeError, Result};

/// Run `connect` until it succeeds or the policy's attempts are used up.
///
/// Each failure is logged with the delay before the next attempt. When the
/// last attempt fails, [`BridgeError::RetriesExhausted`] carries the final
/// error message.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, target: &str, mut connect: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match connect().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(target_name = %target, attempt, "Connected after retrying");
                }
                return Ok(value);
            }
            Err(e) if attempt >= max_attempts => {
                return Err(BridgeError::RetriesExhausted {
                    target: target.to_string(),
                    attempts: attempt,
                    message: e.to_string(),
                });
            }
            Err(e) => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    target_name = %target,
                    attempt,
                    max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Connection attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
