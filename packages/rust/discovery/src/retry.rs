//! Plain request/response fetching with bounded exponential backoff.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use spacebook_shared::{Result, SpacebookError};
use tracing::{debug, warn};

/// User-Agent string for HTTP requests.
const USER_AGENT: &str = concat!("spacebook/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout of the underlying HTTP client.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Backoff schedule for [`RetryFetcher`].
///
/// Failed attempt `n` (0-based) waits `base_delay * 2^n` before the next one
/// while `n < max_retries`; the failure after the last wait is returned.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Sum of every wait a request can go through before giving up.
    pub fn worst_case_wait(&self) -> Duration {
        (0..self.max_retries)
            .map(|n| self.delay_for_attempt(n))
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1_u32 << attempt.min(20);
        self.base_delay.saturating_mul(multiplier)
    }
}

impl Default for RetryPolicy {
    /// Waits of 1s, 2s, ... 64s: seven retries, about 2.1 minutes worst case.
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), 7)
    }
}

/// HTTP GET with retry. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RetryFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl RetryFetcher {
    /// Create a fetcher with the default policy.
    pub fn new() -> Result<Self> {
        Self::with_policy(RetryPolicy::default())
    }

    pub fn with_policy(policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| SpacebookError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, policy })
    }

    /// Fetch the whole body of `url` as text.
    ///
    /// The first success short-circuits. Transport failures and retryable
    /// statuses (5xx, 429) are retried; other statuses fail immediately.
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(FetchFailure::Fatal(e)) => return Err(e),
                Err(FetchFailure::Retryable(e)) => {
                    if attempt >= self.policy.max_retries() {
                        warn!(url, attempts = attempt + 1, error = %e, "giving up");
                        return Err(e);
                    }
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(url, attempt, delay_ms = delay.as_millis() as u64, error = %e, "fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Fetch `url` and decode the body as JSON.
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.fetch_text(url).await?;
        serde_json::from_str(&body)
            .map_err(|e| SpacebookError::parse(format!("{url}: invalid JSON body: {e}")))
    }

    async fn fetch_once(&self, url: &str) -> std::result::Result<String, FetchFailure> {
        debug!(url, "fetching");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchFailure::Retryable(SpacebookError::Network(format!("{url}: {e}"))))?;

        let status = response.status();
        if !status.is_success() {
            let err = SpacebookError::Network(format!("{url}: HTTP {status}"));
            return Err(if is_retryable(status) {
                FetchFailure::Retryable(err)
            } else {
                FetchFailure::Fatal(err)
            });
        }

        response.text().await.map_err(|e| {
            FetchFailure::Retryable(SpacebookError::Network(format!(
                "{url}: body read failed: {e}"
            )))
        })
    }
}

enum FetchFailure {
    Retryable(SpacebookError),
    Fatal(SpacebookError),
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(5), max_retries)
    }

    #[test]
    fn default_schedule_doubles_from_one_second() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 7);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(64_000));
        assert_eq!(policy.worst_case_wait(), Duration::from_millis(127_000));
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/book"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = RetryFetcher::with_policy(fast_policy(7)).unwrap();
        let body = fetcher
            .fetch_text(&format!("{}/book", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn retries_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
            .mount(&server)
            .await;

        let fetcher = RetryFetcher::with_policy(fast_policy(7)).unwrap();
        let value: serde_json::Value = fetcher
            .fetch_json(&format!("{}/flaky", server.uri()))
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn surfaces_last_error_after_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4)
            .mount(&server)
            .await;

        let fetcher = RetryFetcher::with_policy(fast_policy(3)).unwrap();
        let err = fetcher
            .fetch_text(&format!("{}/down", server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = RetryFetcher::with_policy(fast_policy(7)).unwrap();
        let err = fetcher
            .fetch_text(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, SpacebookError::Network(_)));
    }

    #[tokio::test]
    async fn default_budget_uses_every_wait() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/always-down"))
            .respond_with(ResponseTemplate::new(503))
            .expect(8)
            .mount(&server)
            .await;

        // Default shape scaled down to milliseconds: 1 + 2 + ... + 64.
        let policy = RetryPolicy::new(Duration::from_millis(1), RetryPolicy::default().max_retries());
        let fetcher = RetryFetcher::with_policy(policy).unwrap();

        let started = std::time::Instant::now();
        let err = fetcher
            .fetch_text(&format!("{}/always-down", server.uri()))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("503"));
        assert!(started.elapsed() >= Duration::from_millis(127));
        assert_eq!(server.received_requests().await.map(|r| r.len()), Some(8));
    }
}
