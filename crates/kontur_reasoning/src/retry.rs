//! Retry with exponential backoff for generation requests.
//!
//! Retries on transient errors (429 rate limit, 5xx server errors, network timeouts).
//! Client errors (400, 401, 403, 404) fail on the first attempt.

use std::time::Duration;

use anyhow::Result;
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Server-suggested wait in whole seconds, capped at `max`.
fn retry_after(response: &Response, max: Duration) -> Option<Duration> {
    let secs: u64 = response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    Some(Duration::from_secs(secs).min(max))
}

fn next_delay(current: Duration, config: &RetryConfig) -> Duration {
    Duration::from_secs_f64(
        (current.as_secs_f64() * config.backoff_factor).min(config.max_delay.as_secs_f64()),
    )
}

/// Call `operation` until it yields a successful response, a non-retryable
/// status, or `max_attempts` is used up.
pub async fn with_retry<F, Fut>(config: &RetryConfig, provider: &str, operation: F) -> Result<Response>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<Response>>,
{
    let mut delay = config.initial_delay;
    let mut last_error = None;

    for attempt in 1..=config.max_attempts {
        let mut wait = delay;
        match operation().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    if attempt > 1 {
                        tracing::info!("{} succeeded on attempt {}", provider, attempt);
                    }
                    return Ok(response);
                }

                if let Some(hint) = retry_after(&response, config.max_delay) {
                    wait = hint;
                }
                let error_text = response.text().await.unwrap_or_default();
                if !is_retryable_status(status) {
                    anyhow::bail!("{} API error ({}): {}", provider, status, error_text);
                }
                tracing::warn!(
                    "{} returned {} on attempt {}/{}: {}",
                    provider,
                    status,
                    attempt,
                    config.max_attempts,
                    error_text.chars().take(200).collect::<String>()
                );
                last_error = Some(format!("{} ({}): {}", provider, status, error_text));
            }
            Err(e) => {
                tracing::warn!(
                    "{} network error on attempt {}/{}: {}",
                    provider,
                    attempt,
                    config.max_attempts,
                    e
                );
                last_error = Some(format!("{}: {}", provider, e));
            }
        }

        if attempt < config.max_attempts {
            tracing::debug!("{} retrying in {:.1}s", provider, wait.as_secs_f64());
            tokio::time::sleep(wait).await;
            delay = next_delay(delay, config);
        }
    }

    anyhow::bail!(
        "All {} attempts exhausted. Last error: {}",
        config.max_attempts,
        last_error.unwrap_or_else(|| "unknown".to_string())
    )
}
