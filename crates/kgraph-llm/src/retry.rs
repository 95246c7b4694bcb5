//! Rate-limit handling for the HTTP backends.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;

use crate::error::LlmError;

/// How often and how long to wait when a backend answers 429.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based). An integer `Retry-After`
    /// wins; otherwise the base delay doubles per attempt. Both are capped.
    pub fn delay(&self, retry_after: Option<&str>, attempt: u32) -> Duration {
        let delay = retry_after
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or_else(
                || self.base_delay.saturating_mul(1 << attempt.min(16)),
                Duration::from_secs,
            );
        delay.min(self.max_delay)
    }
}

/// Send a request built by `send`, retrying while the backend answers 429.
///
/// Any other status is returned for the caller to inspect.
///
/// # Errors
///
/// Returns [`LlmError::RateLimited`] once the retries are used up and
/// [`LlmError::Http`] on transport failures, which are not retried.
pub(crate) async fn send_with_retry<F, Fut>(
    provider: &str,
    policy: RetryPolicy,
    mut send: F,
) -> Result<reqwest::Response, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0;
    loop {
        let response = send().await.map_err(LlmError::Http)?;
        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }
        if attempt >= policy.max_retries {
            tracing::warn!(provider, attempts = attempt + 1, "rate limited, giving up");
            return Err(LlmError::RateLimited);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok());
        let delay = policy.delay(retry_after, attempt);
        tracing::warn!(
            provider,
            attempt = attempt + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "rate limited, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
