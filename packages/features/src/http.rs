//! Outbound HTTP helpers shared by the source adapters.
//!
//! Adapters call [`send_json`] instead of `reqwest::RequestBuilder::send()`
//! directly so that every request maps failures onto the same
//! [`FetchError`] taxonomy:
//!
//! - connection failures and timeouts → [`FetchError::Transport`]
//! - non-2xx statuses → [`FetchError::UpstreamStatus`]
//! - bodies that are not JSON → [`FetchError::MalformedResponse`]
//!
//! Retries are opt-in per source ([`RetryPolicy`]). With the default of
//! zero retries a request fails on its first error.

use std::future::Future;
use std::time::Duration;

use crate::FetchError;
use crate::config::ConfigError;

/// Delay before the first retry; doubles on every further attempt.
const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Maximum length of the response body preview kept in errors and logs.
const BODY_PREVIEW_LEN: usize = 200;

/// How many times to retry transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first. `0` disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// A policy with the default backoff (1s, 2s, 4s, ...).
    #[must_use]
    pub const fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: BASE_RETRY_DELAY,
        }
    }

    /// Fail on the first error.
    #[must_use]
    pub const fn none() -> Self {
        Self::new(0)
    }

    /// Backoff before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1_u32 << attempt.saturating_sub(1).min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Builds the HTTP client shared by all adapters.
///
/// # Errors
///
/// Returns [`ConfigError::HttpClient`] if the TLS backend cannot be
/// initialised.
pub fn build_client(user_agent: &str) -> Result<reqwest::Client, ConfigError> {
    Ok(reqwest::Client::builder().user_agent(user_agent).build()?)
}

/// Runs `op`, retrying transient failures according to `policy`.
///
/// `label` identifies the request in log messages.
///
/// # Errors
///
/// Returns the last [`FetchError`] once retries are exhausted, or the first
/// non-transient error.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, label: &str, op: F) -> Result<T, FetchError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                log::warn!(
                    "{label}: {e} (retry {attempt}/{} in {delay:?})",
                    policy.max_retries
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Sends a request and parses the response body as JSON.
///
/// The `build_request` closure is called once per attempt since a
/// [`reqwest::RequestBuilder`] is consumed by sending it.
///
/// # Errors
///
/// Returns [`FetchError`] if the request fails, the status is not a
/// success, or the body is not JSON.
pub async fn send_json<F>(
    build_request: F,
    policy: RetryPolicy,
    label: &str,
) -> Result<serde_json::Value, FetchError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    with_retry(policy, label, || send_once(build_request())).await
}

async fn send_once(request: reqwest::RequestBuilder) -> Result<serde_json::Value, FetchError> {
    let response = request.send().await?;
    let status = response.status();
    let url = response.url().to_string();
    let text = response.text().await?;

    if !status.is_success() {
        log::debug!("{url}: HTTP {status}: {}", preview(&text));
        return Err(FetchError::UpstreamStatus {
            status: status.as_u16(),
            message: preview(&text),
        });
    }

    parse_json_body(&text)
}

/// Parses a response body, keeping a preview of it in the error.
///
/// # Errors
///
/// Returns [`FetchError::MalformedResponse`] if `text` is not JSON.
pub fn parse_json_body(text: &str) -> Result<serde_json::Value, FetchError> {
    serde_json::from_str(text).map_err(|e| {
        FetchError::malformed(format!(
            "invalid JSON ({e}), {} bytes: {}",
            text.len(),
            preview(text)
        ))
    })
}

fn preview(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(BODY_PREVIEW_LEN) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
