//! Timeout and bounded backoff around external calls.

use std::future::Future;

use studio_types::{config::RetryPolicy, AgentError, Result};

/// Run `op` until it succeeds, each attempt bounded by the policy's call
/// timeout. Between failed attempts the task sleeps for the policy's backoff.
/// The last error is returned once `max_attempts` is exhausted.
pub async fn call_with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = AgentError::Other(format!("{}: no attempt made", label));

    for attempt in 0..attempts {
        let outcome = match tokio::time::timeout(policy.call_timeout(), op()).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout(policy.call_timeout_ms)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(error) => {
                log::warn!(
                    "{} failed (attempt {}/{}): {}",
                    label,
                    attempt + 1,
                    attempts,
                    error
                );
                last_error = error;
            }
        }

        if attempt + 1 < attempts {
            let delay = policy.backoff(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(last_error)
}
