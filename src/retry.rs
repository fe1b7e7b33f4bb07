//! Retry with exponential backoff for oracle and GitHub HTTP calls.
//!
//! Only transient failures are retried:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Network errors and timeouts → retry
//! - Any other HTTP 4xx → fail immediately
//!
//! Backoff starts at `initial_delay_ms` and is multiplied by
//! `backoff_multiplier` after every failed attempt, capped at `max_delay_ms`.
//! With the defaults: 1s, 2s, 4s, 8s, 16s, 32s.
//!
//! Retries wrap a single HTTP request. A decision loop that has already run
//! tool calls is never replayed.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::config::RetryConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.backoff_multiplier,
        }
    }
}

impl RetryPolicy {
    /// No retries, no sleeping. Used by tests and one-shot probes.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// A failed call, classified for the retry loop.
#[derive(Debug)]
pub enum CallError {
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

impl CallError {
    /// Classify a non-success HTTP status.
    pub fn from_status(service: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let err = anyhow::anyhow!("{} API error {}: {}", service, status, body);
        if is_retryable_status(status) {
            CallError::Transient(err)
        } else {
            CallError::Fatal(err)
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CallError::Transient(_))
    }
}

impl From<reqwest::Error> for CallError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            CallError::Transient(e.into())
        } else if let Some(status) = e.status() {
            if is_retryable_status(status) {
                CallError::Transient(e.into())
            } else {
                CallError::Fatal(e.into())
            }
        } else {
            CallError::Fatal(e.into())
        }
    }
}

pub fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.as_u16() == 408 || status.is_server_error()
}

/// Read a response as JSON, classifying non-success statuses.
pub async fn read_json(
    service: &str,
    response: reqwest::Response,
) -> std::result::Result<serde_json::Value, CallError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| CallError::Fatal(anyhow::anyhow!("{} returned invalid JSON: {}", service, e)));
    }
    let body = response.text().await.unwrap_or_default();
    Err(CallError::from_status(service, status, &body))
}

/// Run `call` until it succeeds, fails fatally, or retries are exhausted.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, CallError>>,
{
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            tokio::time::sleep(policy.delay_for(attempt)).await;
        }

        match call().await {
            Ok(value) => return Ok(value),
            Err(CallError::Fatal(e)) => return Err(e.context(format!("{} failed", operation))),
            Err(CallError::Transient(e)) => {
                if attempt < policy.max_retries {
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_retries = policy.max_retries,
                        error = %e,
                        "transient failure, retrying"
                    );
                }
                last_err = Some(e);
            }
        }
    }

    let err = last_err.unwrap_or_else(|| anyhow::anyhow!("no attempts were made"));
    Err(err.context(format!(
        "{} failed after {} retries",
        operation, policy.max_retries
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn default_delays_double_and_cap() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_retries, 6);
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(6), Duration::from_secs(32));
        assert_eq!(p.delay_for(7), Duration::from_secs(60));
        assert_eq!(p.delay_for(20), Duration::from_secs(60));
    }

    #[test]
    fn status_classification() {
        use reqwest::StatusCode;
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(CallError::from_status("x", StatusCode::INTERNAL_SERVER_ERROR, "").is_transient());
        assert!(!CallError::from_status("x", StatusCode::NOT_FOUND, "").is_transient());
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            ..RetryPolicy::none()
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&fast_policy(3), "test", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(CallError::Transient(anyhow::anyhow!("busy")))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = with_retry(&fast_policy(5), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CallError::Fatal(anyhow::anyhow!("bad request")))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = with_retry(&fast_policy(2), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CallError::Transient(anyhow::anyhow!("still busy")))
        })
        .await;
        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("still busy"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
