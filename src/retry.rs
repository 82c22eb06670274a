use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Result;
use crate::error::Error;

const RETRY_CANCELLED: &str = "retry cancelled";

#[derive(Clone, Copy, Debug)]
pub struct RetryDecision<'a> {
    pub attempt: usize,
    pub max_attempts: usize,
    pub error: &'a Error,
}

pub trait RetryClassifier: Send + Sync {
    fn should_retry(&self, decision: &RetryDecision<'_>) -> bool;
}

impl<F> RetryClassifier for F
where
    F: Fn(&RetryDecision<'_>) -> bool + Send + Sync,
{
    fn should_retry(&self, decision: &RetryDecision<'_>) -> bool {
        self(decision)
    }
}

/// Exponential backoff with additive jitter.
///
/// Retry `n` (1-based) waits `base_backoff * 2^(n-1)` plus a uniform sample
/// of up to `jitter_ratio` of that delay.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_backoff: Duration,
    jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::standard()
        }
    }

    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            jitter_ratio: 0.1,
        }
    }

    /// Total attempts including the first one.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    pub fn configured_max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Smallest and largest delay retry `retry_index` can wait.
    pub fn backoff_bounds(&self, retry_index: usize) -> (Duration, Duration) {
        let capped_exponent = retry_index.saturating_sub(1).min(31) as u32;
        let multiplier = 1_u128 << capped_exponent;
        let delay_ms = self
            .base_backoff
            .as_millis()
            .saturating_mul(multiplier)
            .min(u64::MAX as u128) as u64;
        let jitter_ms = ((delay_ms as f64) * self.jitter_ratio).floor() as u64;
        (
            Duration::from_millis(delay_ms),
            Duration::from_millis(delay_ms.saturating_add(jitter_ms)),
        )
    }

    pub fn backoff_for_retry(&self, retry_index: usize) -> Duration {
        let (low, high) = self.backoff_bounds(retry_index);
        if high <= low {
            return low;
        }
        let low_ms = low.as_millis() as u64;
        let high_ms = high.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(low_ms..=high_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Re-runs a fetcher under a [`RetryPolicy`] until it succeeds, the attempts
/// run out, or the retrier is cancelled.
#[derive(Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    classifier: Option<Arc<dyn RetryClassifier>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Retrier {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Retrier")
            .field("policy", &self.policy)
            .field("custom_classifier", &self.classifier.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            classifier: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: impl RetryClassifier + 'static) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Observes an existing token instead of a private one.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The last attempt's error is returned unchanged. Cancellation is
    /// checked before every attempt and during every wait.
    pub async fn run<F, Fut, T>(&self, mut fetcher: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts;
        let mut attempt = 1_usize;
        loop {
            if self.cancel.is_cancelled() {
                debug!(attempt, "retry cancelled before attempt");
                return Err(Error::Cancelled {
                    reason: RETRY_CANCELLED,
                });
            }

            let error = match fetcher().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if attempt >= max_attempts || !self.should_retry(attempt, max_attempts, &error) {
                return Err(error);
            }

            let delay = self.policy.backoff_for_retry(attempt);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed, retrying"
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(attempt, "retry cancelled during backoff");
                    return Err(Error::Cancelled {
                        reason: RETRY_CANCELLED,
                    });
                }
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    fn should_retry(&self, attempt: usize, max_attempts: usize, error: &Error) -> bool {
        match &self.classifier {
            Some(classifier) => classifier.should_retry(&RetryDecision {
                attempt,
                max_attempts,
                error,
            }),
            None => !error.is_cancelled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::Instant;

    use super::*;

    #[test]
    fn backoff_doubles_within_jitter_bound() {
        let policy = RetryPolicy::standard();
        for retry_index in 1..=4 {
            let expected = Duration::from_secs(1) * 2_u32.pow(retry_index as u32 - 1);
            let (low, high) = policy.backoff_bounds(retry_index);
            assert_eq!(low, expected);
            assert_eq!(high, expected + expected / 10);
            let sampled = policy.backoff_for_retry(retry_index);
            assert!(sampled >= low && sampled <= high, "{sampled:?} outside bounds");
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let policy = RetryPolicy::standard()
            .base_backoff(Duration::from_millis(100))
            .jitter_ratio(0.0);
        assert_eq!(policy.backoff_for_retry(3), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_two_failures_with_growing_delays() {
        let calls = AtomicUsize::new(0);
        let started = Instant::now();
        let retrier = Retrier::new(RetryPolicy::standard());

        let value = retrier
            .run(|| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        Err(Error::interceptor("flaky"))
                    } else {
                        Ok(call)
                    }
                }
            })
            .await
            .expect("third attempt should succeed");

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(3000), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(3300), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn last_failure_is_returned_unchanged() {
        let calls = AtomicUsize::new(0);
        let retrier = Retrier::new(RetryPolicy::standard().base_backoff(Duration::from_millis(10)));

        let error = retrier
            .run(|| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(Error::interceptor(format!("failure {call}"))) }
            })
            .await
            .expect_err("every attempt fails");

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(error, Error::Interceptor { message, .. } if message == "failure 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retrying() {
        let calls = Arc::new(AtomicUsize::new(0));
        let retrier = Retrier::new(RetryPolicy::standard());
        let token = retrier.cancel_token();
        tokio::spawn(async move {
            sleep(Duration::from_millis(500)).await;
            token.cancel();
        });

        let calls_clone = Arc::clone(&calls);
        let error = retrier
            .run(move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Error::interceptor("down")) }
            })
            .await
            .expect_err("cancel should win");

        assert!(error.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn classifier_can_stop_retries() {
        let calls = AtomicUsize::new(0);
        let retrier = Retrier::new(RetryPolicy::standard())
            .with_classifier(|decision: &RetryDecision<'_>| decision.error.status() != Some(404));

        let error = retrier
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(Error::from(crate::error::ApiError::from_status(404, "", None)))
                }
            })
            .await
            .expect_err("404 is not retried");

        assert_eq!(error.status(), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
