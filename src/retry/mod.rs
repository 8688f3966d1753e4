//! Classification-driven retry with exponential backoff.
//!
//! This is the only place backoff delays are computed. Callers wrap a provider
//! call in [`RetryPolicy::run`] and get back either the first success or the
//! last error.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::provider::{NetworkErrorCode, ProviderError};

/// Upper bound for any single backoff sleep.
pub const MAX_DELAY: Duration = Duration::from_secs(120);

/// Whether an error is worth retrying, and how long to wait first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub retryable: bool,
    pub base_delay: Duration,
}

impl Classification {
    const fn retry_after(secs: u64) -> Self {
        Self {
            retryable: true,
            base_delay: Duration::from_secs(secs),
        }
    }

    const fn permanent() -> Self {
        Self {
            retryable: false,
            base_delay: Duration::ZERO,
        }
    }
}

/// Errors that can be sorted into retryable and permanent.
pub trait Classify {
    fn classification(&self) -> Classification;
}

impl Classify for ProviderError {
    fn classification(&self) -> Classification {
        classify(self)
    }
}

pub fn classify(err: &ProviderError) -> Classification {
    match err {
        ProviderError::Status { code: 429, .. } => Classification::retry_after(60),
        ProviderError::Status { code: 503, .. } => Classification::retry_after(10),
        ProviderError::Status { code, .. } if (500..600).contains(code) => {
            Classification::retry_after(5)
        }
        ProviderError::Status { .. } => Classification::permanent(),
        ProviderError::Timeout => Classification::retry_after(3),
        ProviderError::Network { code, .. } => match code {
            NetworkErrorCode::ConnectionReset
            | NetworkErrorCode::ConnectionRefused
            | NetworkErrorCode::HostUnreachable
            | NetworkErrorCode::DnsRetry => Classification::retry_after(3),
            NetworkErrorCode::Other => Classification::permanent(),
        },
        ProviderError::Malformed(_) | ProviderError::MissingCredentials => {
            Classification::permanent()
        }
    }
}

/// Hooks fired while retrying. Both default to no-ops.
pub trait RetryObserver<E>: Send + Sync {
    /// Called before sleeping ahead of retry number `attempt` (1-based).
    fn on_retry(&self, _attempt: u32, _error: &E, _delay: Duration) {}

    /// Called once when the operation gives up after `attempts` calls.
    fn on_failure(&self, _attempts: u32, _error: &E) {}
}

impl<E> RetryObserver<E> for () {}

/// Observer that reports retries through `tracing`.
pub struct LogObserver<'a> {
    pub operation: &'a str,
}

impl<E: std::fmt::Display> RetryObserver<E> for LogObserver<'_> {
    fn on_retry(&self, attempt: u32, error: &E, delay: Duration) {
        tracing::warn!(
            operation = self.operation,
            attempt,
            delay_secs = delay.as_secs_f64(),
            "Retrying after error: {}",
            error
        );
    }

    fn on_failure(&self, attempts: u32, error: &E) {
        tracing::error!(
            operation = self.operation,
            attempts,
            "Giving up after error: {}",
            error
        );
    }
}

/// Retry budget and delay cap.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first call.
    pub max_retries: u32,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            max_delay: MAX_DELAY,
        }
    }

    /// `min(base * 2^attempt_index, max_delay)`.
    pub fn next_delay(&self, base: Duration, attempt_index: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt_index);
        base.checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub async fn run<F, Fut, T, E>(
        &self,
        mut op: F,
        observer: &dyn RetryObserver<E>,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let mut retries = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let class = err.classification();
                    if !class.retryable || retries >= self.max_retries {
                        observer.on_failure(retries + 1, &err);
                        return Err(err);
                    }
                    let delay = self.next_delay(class.base_delay, retries);
                    retries += 1;
                    observer.on_retry(retries, &err, delay);
                    sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[derive(Default)]
    struct Recorder {
        retries: Mutex<Vec<(u32, Duration)>>,
        failures: Mutex<Vec<u32>>,
    }

    impl RetryObserver<ProviderError> for Recorder {
        fn on_retry(&self, attempt: u32, _error: &ProviderError, delay: Duration) {
            self.retries.lock().unwrap().push((attempt, delay));
        }

        fn on_failure(&self, attempts: u32, _error: &ProviderError) {
            self.failures.lock().unwrap().push(attempts);
        }
    }

    fn status(code: u16) -> ProviderError {
        ProviderError::Status {
            code,
            message: String::new(),
        }
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(classify(&status(429)), Classification::retry_after(60));
        assert_eq!(classify(&status(500)), Classification::retry_after(5));
        assert_eq!(classify(&status(502)), Classification::retry_after(5));
        assert_eq!(classify(&status(503)), Classification::retry_after(10));
        assert_eq!(classify(&status(504)), Classification::retry_after(5));
        assert_eq!(classify(&ProviderError::Timeout), Classification::retry_after(3));
        let reset = ProviderError::Network {
            code: NetworkErrorCode::ConnectionReset,
            message: String::new(),
        };
        assert_eq!(classify(&reset), Classification::retry_after(3));

        for code in [400, 401, 403, 404, 422] {
            assert!(!classify(&status(code)).retryable, "{}", code);
        }
        assert!(!classify(&ProviderError::Malformed("x".into())).retryable);
        assert!(!classify(&ProviderError::MissingCredentials).retryable);
        let other = ProviderError::Network {
            code: NetworkErrorCode::Other,
            message: String::new(),
        };
        assert!(!classify(&other).retryable);
    }

    #[test]
    fn test_next_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(5);
        let base = Duration::from_secs(60);
        assert_eq!(policy.next_delay(base, 0), Duration::from_secs(60));
        assert_eq!(policy.next_delay(base, 1), Duration::from_secs(120));
        assert_eq!(policy.next_delay(base, 2), MAX_DELAY);
        assert_eq!(policy.next_delay(Duration::from_secs(3), 3), Duration::from_secs(24));
        assert_eq!(policy.next_delay(Duration::from_secs(3), 40), MAX_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_503s_then_success() {
        let policy = RetryPolicy::default();
        let recorder = Recorder::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();

        let result = policy
            .run(
                || {
                    let calls = calls.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(status(503))
                        } else {
                            Ok("releases")
                        }
                    }
                },
                &recorder,
            )
            .await;

        assert_eq!(result.unwrap(), "releases");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let retries = recorder.retries.lock().unwrap().clone();
        assert_eq!(
            retries,
            vec![(1, Duration::from_secs(10)), (2, Duration::from_secs(20))]
        );
        assert!(recorder.failures.lock().unwrap().is_empty());
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_fails_fast() {
        let policy = RetryPolicy::default();
        let recorder = Recorder::default();
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = policy
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(status(401)) }
                },
                &recorder,
            )
            .await;

        assert_eq!(result.unwrap_err(), status(401));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(recorder.retries.lock().unwrap().is_empty());
        assert_eq!(*recorder.failures.lock().unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_error() {
        let policy = RetryPolicy::new(2);
        let recorder = Recorder::default();
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = policy
            .run(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(ProviderError::Timeout)
                        } else {
                            Err(status(502))
                        }
                    }
                },
                &recorder,
            )
            .await;

        assert_eq!(result.unwrap_err(), status(502));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(recorder.retries.lock().unwrap().len(), 2);
        assert_eq!(*recorder.failures.lock().unwrap(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_calls_once() {
        let policy = RetryPolicy::new(0);
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = policy
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(status(429)) }
                },
                &(),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
