//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the harvester, including:
//! - Building HTTP clients with the configured user agent and timeout
//! - GET requests for listing and detail pages
//! - Bounded retries with a fixed pause between attempts
//! - Error classification

use crate::config::{FetcherConfig, SiteConfig};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

/// Why a fetch ultimately failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchErrorKind {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("transport error: {0}")]
    Transport(String),
}

/// A page that could not be retrieved after every attempt was used
#[derive(Debug, Clone, Error)]
#[error("failed to fetch {url} after {attempts} attempt(s): {kind}")]
pub struct FetchError {
    pub url: String,
    pub attempts: u32,
    pub kind: FetchErrorKind,
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - Value of the User-Agent header sent with every request
/// * `timeout` - Total per-request timeout
pub fn build_http_client(user_agent: &str, timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches pages with bounded retries
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
    max_attempts: u32,
    retry_delay: Duration,
}

impl PageFetcher {
    /// Creates a fetcher from the site and fetcher configuration
    pub fn new(site: &SiteConfig, config: &FetcherConfig) -> Result<Self, reqwest::Error> {
        let client = build_http_client(&site.user_agent, Duration::from_secs(config.timeout_secs))?;
        Ok(Self::with_client(
            client,
            config.max_retries,
            Duration::from_millis(config.retry_delay_ms),
        ))
    }

    /// Creates a fetcher around an existing client
    ///
    /// `max_attempts` counts the first request; zero is treated as one.
    pub fn with_client(client: Client, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            client,
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    /// Fetches `url` and returns the decoded body
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | 2xx | Return body |
    /// | Non-2xx status | Retry after the fixed delay |
    /// | Timeout | Retry after the fixed delay |
    /// | Connection/transport error | Retry after the fixed delay |
    ///
    /// The error is returned only after every attempt failed; it carries the
    /// classification of the last one.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let mut last_kind = FetchErrorKind::Transport("no attempt made".to_string());

        for attempt in 1..=self.max_attempts {
            match self.fetch_once(url).await {
                Ok(body) => {
                    if attempt > 1 {
                        tracing::debug!(url, attempt, "Fetch succeeded after retry");
                    }
                    return Ok(body);
                }
                Err(kind) => {
                    tracing::debug!(url, attempt, error = %kind, "Fetch attempt failed");
                    last_kind = kind;
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(FetchError {
            url: url.to_string(),
            attempts: self.max_attempts,
            kind: last_kind,
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchErrorKind> {
        let response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchErrorKind::HttpStatus(status.as_u16()));
        }

        response.text().await.map_err(classify)
    }
}

fn classify(error: reqwest::Error) -> FetchErrorKind {
    if error.is_timeout() {
        FetchErrorKind::Timeout
    } else {
        FetchErrorKind::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(max_attempts: u32) -> PageFetcher {
        let client = build_http_client("TestHarvester/1.0", Duration::from_secs(5)).unwrap();
        PageFetcher::with_client(client, max_attempts, Duration::from_millis(10))
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client("TestHarvester/1.0", Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(fetcher(0).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let body = fetcher(3)
            .fetch(&format!("{}/page", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "<html>ok</html>");
    }

    #[tokio::test]
    async fn test_fetch_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .expect(1)
            .mount(&server)
            .await;

        let body = fetcher(3)
            .fetch(&format!("{}/flaky", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "recovered");
    }

    #[tokio::test]
    async fn test_fetch_gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let err = fetcher(3)
            .fetch(&format!("{}/gone", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.kind, FetchErrorKind::HttpStatus(500));
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = build_http_client("TestHarvester/1.0", Duration::from_millis(50)).unwrap();
        let fetcher = PageFetcher::with_client(client, 1, Duration::from_millis(1));
        let err = fetcher
            .fetch(&format!("{}/slow", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Timeout);
    }
}
