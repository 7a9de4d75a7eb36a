//! Bounded retry for connector requests.
//!
//! Every connector request goes through [`RetryPolicy::run`] or
//! [`RetryPolicy::send_json`]. Transient failures (timeouts, connection
//! errors, HTTP 429, HTTP 5xx, truncated bodies) are retried up to
//! `max_attempts` total attempts. Permanent failures (other 4xx,
//! unrecognized payloads) return immediately. Exhausting the budget
//! yields [`SourceError::RetriesExhausted`], never an empty table.

use std::future::Future;
use std::time::Duration;

use crm_geocode_matcher_models::config::{Backoff, RetryConfig};

use crate::SourceError;

/// Upper bound on any single delay.
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 500;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never less than 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub delay: Duration,
    /// Delay growth.
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_millis(config.delay_ms),
            backoff: config.backoff,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor)
            }
        };
        delay.min(MAX_DELAY)
    }

    /// Runs `operation` until it succeeds, fails permanently, or the
    /// attempt budget is spent.
    ///
    /// # Errors
    ///
    /// * the operation's own error if it is not transient
    /// * [`SourceError::RetriesExhausted`] wrapping the last transient
    ///   error once `max_attempts` attempts have failed
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    log::error!("{label}: giving up after {attempt} attempts: {e}");
                    return Err(SourceError::RetriesExhausted {
                        attempts: attempt,
                        last_error: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    log::warn!(
                        "{label}: attempt {attempt}/{max_attempts} failed: {e}; retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Sends a request built fresh on every attempt and parses the body
    /// as JSON.
    ///
    /// # Errors
    ///
    /// * [`SourceError::Status`] for non-retryable status codes
    /// * [`SourceError::RetriesExhausted`] if every attempt failed
    ///   transiently
    #[allow(clippy::future_not_send)]
    pub async fn send_json<F>(
        &self,
        label: &str,
        build_request: F,
    ) -> Result<serde_json::Value, SourceError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let build_request = &build_request;
        self.run(label, move || async move {
            let response = build_request().send().await?;
            let status = response.status();
            let url = response.url().to_string();

            if status.is_client_error() || status.is_server_error() {
                return Err(SourceError::Status {
                    status: status.as_u16(),
                    url,
                });
            }

            let text = response.text().await?;
            serde_json::from_str(&text).map_err(|e| {
                let preview: String = text.chars().take(BODY_PREVIEW_LEN).collect();
                log::debug!(
                    "JSON parse failed\n  url: {url}\n  received: {} bytes\n  body preview: {preview}",
                    text.len()
                );
                SourceError::Json(e)
            })
        })
        .await
    }
}

/// Returns `true` if the transport error is likely transient.
pub(crate) fn is_transient_http(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}

/// Returns `true` for HTTP 429 and 5xx.
pub(crate) const fn is_transient_status(status: u16) -> bool {
    status == 429 || status >= 500
}
