use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use drive_core::DriveError;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::api::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retry,
    Fatal,
}

/// Decides whether a failed remote call is re-issued.
pub trait RetryClassifier: Send + Sync {
    fn should_retry(&self, err: &DriveError) -> Verdict;
}

/// Default policy: retry throttling, 5xx and connection failures.
///
/// With the stop flags set, quota exhaustion becomes fatal instead of being
/// retried until the quota resets.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveRetryClassifier {
    pub stop_on_upload_limit: bool,
    pub stop_on_download_limit: bool,
}

impl RetryClassifier for DriveRetryClassifier {
    fn should_retry(&self, err: &DriveError) -> Verdict {
        if let Some(detail) = err.detail() {
            let reason = detail.reason.as_str();
            let upload_limit = matches!(reason, "quotaExceeded" | "teamDriveFileLimitExceeded")
                || (matches!(reason, "rateLimitExceeded" | "userRateLimitExceeded")
                    && detail.message == "User rate limit exceeded.");
            if self.stop_on_upload_limit && upload_limit {
                error!(reason, "received upload limit error");
                return Verdict::Fatal;
            }
            if self.stop_on_download_limit && reason == "downloadQuotaExceeded" {
                error!(reason, "received download limit error");
                return Verdict::Fatal;
            }
        }
        if err.is_retryable() {
            Verdict::Retry
        } else {
            Verdict::Fatal
        }
    }
}

/// Exponential retry delay. With jitter each delay is drawn from the upper
/// half of its step, so consecutive retries never collapse to zero.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    /// Delay before retry `attempt` (zero based) ignoring jitter.
    pub fn step(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let step = self.step(attempt);
        if !self.jitter || step.is_zero() {
            return step;
        }
        rng.gen_range(step / 2..=step)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PacerConfig {
    /// Sustained spacing between calls once the burst is spent.
    pub min_sleep: Duration,
    pub burst: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            min_sleep: Duration::from_millis(100),
            burst: 100,
            max_attempts: 10,
            backoff: Backoff::new(Duration::from_millis(100), Duration::from_secs(16), true),
        }
    }
}

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Rate limited caller that re-issues calls the classifier deems retryable.
pub struct Pacer {
    config: PacerConfig,
    classifier: Arc<dyn RetryClassifier>,
    bucket: Mutex<Bucket>,
}

impl Pacer {
    pub fn new(config: PacerConfig, classifier: Arc<dyn RetryClassifier>) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: f64::from(config.burst.max(1)),
                refilled_at: Instant::now(),
            }),
            config,
            classifier,
        }
    }

    pub async fn call<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DriveError>>,
    {
        let mut attempt = 0u32;
        loop {
            self.acquire(cancel).await?;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
                result = op() => result,
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            attempt += 1;
            if self.classifier.should_retry(&err) == Verdict::Fatal {
                return Err(RemoteError::Api(err));
            }
            if attempt >= self.config.max_attempts.max(1) {
                return Err(RemoteError::RetriesExhausted {
                    attempts: attempt,
                    source: err,
                });
            }
            let delay = self.config.backoff.delay(attempt - 1);
            warn!(attempt, ?delay, error = %err, "retrying remote call");
            sleep_or_cancel(delay, cancel).await?;
        }
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<(), RemoteError> {
        if cancel.is_cancelled() {
            return Err(RemoteError::Cancelled);
        }
        if self.config.min_sleep.is_zero() {
            return Ok(());
        }
        let per_token = self.config.min_sleep.as_secs_f64();
        let capacity = f64::from(self.config.burst.max(1));
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed / per_token).min(capacity);
                bucket.refilled_at = now;
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) * per_token)
            };
            sleep_or_cancel(wait, cancel).await?;
        }
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), RemoteError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RemoteError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
