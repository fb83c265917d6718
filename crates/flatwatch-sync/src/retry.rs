use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

/// Fixed-delay retry discipline. Without a deadline the loop never gives up on
/// retryable errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::forever(Duration::from_secs(5))
    }
}

impl RetryPolicy {
    pub fn forever(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("non-retryable failure: {0}")]
    Fatal(E),
    #[error("retry deadline elapsed after {attempts} attempts")]
    DeadlineElapsed { attempts: u32 },
}

/// Run `op` until it succeeds, sleeping `policy.delay` after every retryable failure.
///
/// A failure rejected by `is_retryable` is returned at once as [`RetryError::Fatal`].
/// With a deadline set, the loop stops once the next attempt would start past it.
pub async fn retry_until_success<T, E, F, Fut, R>(
    label: &str,
    policy: RetryPolicy,
    is_retryable: R,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: Display,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => {
                info!(label, attempts, "{label} succeeded");
                return Ok(value);
            }
            Err(err) if is_retryable(&err) => {
                if let Some(deadline) = policy.deadline {
                    if started.elapsed() + policy.delay > deadline {
                        warn!(label, attempts, error = %err, "giving up, retry deadline elapsed");
                        return Err(RetryError::DeadlineElapsed { attempts });
                    }
                }
                warn!(
                    label,
                    attempts,
                    error = %err,
                    delay_ms = policy.delay.as_millis() as u64,
                    "{label} failed, retrying"
                );
                sleep(policy.delay).await;
            }
            Err(err) => {
                error!(label, attempts, error = %err, "{label} failed with a non-retryable error");
                return Err(RetryError::Fatal(err));
            }
        }
    }
}
