use std::fmt::Debug;
use std::future::Future;
use std::time::{Duration, Instant};

use itertools::Itertools;
use tracing::Instrument;

use crate::bitbucket::api::DEFAULT_REQUEST_TIMEOUT;

/// Tells [`perform_retryable`] whether a failed attempt may be repeated.
pub enum ShouldRetry<E> {
    Yes(E),
    No(E),
}

/// Plain errors are retried.
impl From<anyhow::Error> for ShouldRetry<anyhow::Error> {
    fn from(error: anyhow::Error) -> Self {
        Self::Yes(error)
    }
}

/// Timeout, attempt count and backoff of a retryable operation.
#[derive(Debug, Clone)]
pub struct RetryMethod {
    timeout_after: Duration,
    /// Total number of attempts, counting the first one.
    max_attempts: u32,
    retry_on_error: bool,
    backoff_time: Duration,
}

impl RetryMethod {
    pub fn no_retry() -> Self {
        Self {
            retry_on_error: false,
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Same timeout, but only one attempt.
    pub fn single_attempt(&self) -> Self {
        Self {
            max_attempts: 1,
            retry_on_error: false,
            ..self.clone()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_after = timeout;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_time = backoff;
        self
    }
}

impl Default for RetryMethod {
    fn default() -> Self {
        Self {
            timeout_after: DEFAULT_REQUEST_TIMEOUT,
            max_attempts: 3,
            retry_on_error: true,
            #[cfg(not(test))]
            backoff_time: Duration::from_secs(5),
            #[cfg(test)]
            backoff_time: Duration::from_millis(10),
        }
    }
}

#[derive(Debug)]
pub enum RetryableOpError<E> {
    /// The last attempt failed with this error.
    Err(E),
    /// The last attempt timed out. Contains the errors of the earlier attempts.
    AllAttemptsExhausted(Vec<anyhow::Error>),
}

impl<E: Into<anyhow::Error>> From<RetryableOpError<E>> for anyhow::Error {
    fn from(value: RetryableOpError<E>) -> Self {
        match value {
            RetryableOpError::Err(error) => error.into(),
            RetryableOpError::AllAttemptsExhausted(errors) => anyhow::anyhow!(
                "Operation did not succeed in any attempt. Errors:\n{}",
                errors
                    .into_iter()
                    .map(|error| format!("{error:?}"))
                    .join("\n")
            ),
        }
    }
}

/// Runs `func` until it succeeds, returns an error that should not be retried, or the
/// attempts of `retry_method` run out.
///
/// Every attempt is bounded by the timeout of `retry_method`. Errors convert into
/// [`ShouldRetry`], so `anyhow::Error` is retried unless the closure says otherwise.
/// Returning `anyhow::Ok(...)` from `func` helps type inference.
pub async fn perform_retryable<T, E, R, F, Fut>(
    operation_name: &str,
    retry_method: RetryMethod,
    func: F,
) -> Result<T, RetryableOpError<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, R>>,
    R: Into<ShouldRetry<E>>,
    E: Debug,
{
    let span = tracing::trace_span!("Retryable op", operation = operation_name);

    let mut errors = vec![];
    for attempt in 1..=retry_method.max_attempts {
        let last_attempt = attempt == retry_method.max_attempts;
        let start = Instant::now();

        let outcome = tokio::time::timeout(retry_method.timeout_after, func())
            .instrument(span.clone())
            .await;
        let duration = format!("{:.2}ms", start.elapsed().as_secs_f64() * 1000.0);

        match outcome {
            Ok(Ok(value)) => {
                span.in_scope(|| tracing::trace!(attempt, duration, "Completed"));
                return Ok(value);
            }
            Ok(Err(error)) => match Into::<ShouldRetry<E>>::into(error) {
                ShouldRetry::Yes(error) if retry_method.retry_on_error && !last_attempt => {
                    span.in_scope(|| {
                        tracing::debug!(attempt, duration, "Attempt failed: {error:?}")
                    });
                    errors.push(anyhow::anyhow!("{error:?}"));
                }
                ShouldRetry::Yes(error) | ShouldRetry::No(error) => {
                    span.in_scope(|| {
                        tracing::debug!(attempt, duration, "Giving up after error: {error:?}")
                    });
                    return Err(RetryableOpError::Err(error));
                }
            },
            Err(_) => {
                span.in_scope(|| tracing::debug!(attempt, duration, "Attempt timed out"));
                errors.push(anyhow::anyhow!(
                    "Attempt {attempt} timed out after {:?}",
                    retry_method.timeout_after
                ));
            }
        }

        if !last_attempt {
            tokio::time::sleep(retry_method.backoff_time).await;
        }
    }

    Err(RetryableOpError::AllAttemptsExhausted(errors))
}
