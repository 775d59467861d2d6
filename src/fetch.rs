use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::warn;

use crate::config::Config;

/// HTTP fetcher: one shared client, a fixed pre-request delay, and
/// exponential-backoff retries on transient failures.
pub struct Fetcher {
    client: reqwest::Client,
    delay: Duration,
    max_retries: u32,
    backoff_base: Duration,
}

/// Classified fetch failure, so the retry engine knows what is worth retrying.
#[derive(Debug)]
pub enum FetchError {
    /// Transport error or a 429/5xx response.
    Transient(String),
    /// Anything else (404s, redirect loops, non-HTTP schemes).
    Permanent(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Transient(e) => write!(f, "transient: {}", e),
            FetchError::Permanent(e) => write!(f, "permanent: {}", e),
        }
    }
}

impl std::error::Error for FetchError {}

impl Fetcher {
    pub fn new(cfg: &Config) -> Self {
        Fetcher {
            client: reqwest::Client::new(),
            delay: Duration::from_millis(cfg.delay_ms),
            max_retries: cfg.max_retries,
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
        }
    }

    /// Fetch `url` and return the body text, retrying transient failures up
    /// to the attempt ceiling.
    pub async fn fetch(&self, url: &str) -> Result<String> {
        with_backoff(self.max_retries, self.backoff_base, url, || self.fetch_once(url)).await
    }

    /// Sleep the configured inter-request delay, then fetch. The run loop
    /// uses this for sequential pacing; concurrent mode paces at dispatch.
    pub async fn fetch_paced(&self, url: &str) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        self.fetch(url).await
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            response
                .text()
                .await
                .map_err(|e| FetchError::Transient(e.to_string()))
        } else if status.as_u16() == 429 || status.is_server_error() {
            Err(FetchError::Transient(format!("HTTP {}", status)))
        } else {
            Err(FetchError::Permanent(format!("HTTP {}", status)))
        }
    }
}

/// Run `op` up to `max_retries` times, sleeping `base * 2^attempt` between
/// transient failures. Permanent failures and exhaustion propagate the last
/// error.
pub async fn with_backoff<T, F, Fut>(
    max_retries: u32,
    base: Duration,
    label: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(FetchError::Permanent(e)) => return Err(anyhow!("{}: {}", label, e)),
            Err(FetchError::Transient(e)) => {
                attempt += 1;
                if attempt >= max_retries {
                    return Err(anyhow!("{}: {} (gave up after {} attempts)", label, e, attempt));
                }
                let backoff = base * 2u32.pow(attempt - 1);
                warn!(
                    "{} failed (attempt {}/{}), backing off {:.1}s: {}",
                    label,
                    attempt,
                    max_retries,
                    backoff.as_secs_f64(),
                    e
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_on_third_attempt_within_ceiling() {
        let calls = AtomicU32::new(0);
        let out = with_backoff(3, Duration::from_millis(1), "flaky", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(FetchError::Transient("HTTP 503".into()))
                } else {
                    Ok("body")
                }
            }
        })
        .await;
        assert_eq!(out.unwrap(), "body");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_after_three_transient_failures() {
        let calls = AtomicU32::new(0);
        let out: Result<&str> = with_backoff(3, Duration::from_millis(1), "down", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::Transient("HTTP 500".into())) }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let out: Result<&str> = with_backoff(3, Duration::from_millis(1), "missing", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::Permanent("HTTP 404".into())) }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
