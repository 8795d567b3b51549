use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::time::sleep;
use tracing::warn;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

const MAX_EXPONENT: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_ms),
            max_jitter: Duration::from_millis(config.retry_jitter_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_jitter: Duration::from_millis(200),
        }
    }
}

/// Quota and rate-limit failures are the only ones worth waiting out.
pub fn is_quota_error(err: &AppError) -> bool {
    if matches!(err.status(), Some(429 | 503)) {
        return true;
    }
    match err {
        AppError::Provider { message, .. } => mentions_quota(message),
        AppError::Http(inner) => mentions_quota(&inner.to_string()),
        _ => false,
    }
}

fn mentions_quota(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("quota") || lower.contains("rate limit")
}

/// Exponential backoff with jitter, applied only to quota errors.
pub struct QuotaBackoff {
    policy: RetryPolicy,
    jitter_rng: Arc<Mutex<StdRng>>,
}

impl QuotaBackoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_rng(policy, StdRng::from_entropy())
    }

    pub fn with_rng(policy: RetryPolicy, rng: StdRng) -> Self {
        Self {
            policy,
            jitter_rng: Arc::new(Mutex::new(rng)),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn run<T, F, Fut>(&self, mut operation: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.policy.max_attempts && is_quota_error(&err) => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        ?err,
                        attempt, "provider quota hit; retrying after {:?}", delay
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// `base * 2^(attempt-1)` plus uniform jitter in `[0, max_jitter]`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
        let base = self
            .policy
            .base_delay
            .checked_mul(1 << exponent)
            .unwrap_or(Duration::MAX);
        let jitter_cap = u64::try_from(self.policy.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = {
            let mut rng = self.jitter_rng.lock();
            Duration::from_millis(rng.gen_range(0..=jitter_cap))
        };
        base.saturating_add(jitter)
    }
}
