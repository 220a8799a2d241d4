use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use crate::util::{validate_feed_url, UrlValidationError};

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching a feed document.
///
/// Every variant is terminal for the feed in the current cycle: nothing is
/// retried until the next scheduled update.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Feed URL failed validation, no request was made
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(reqwest::Error),
    /// Connect or overall request timeout elapsed
    #[error("Request timed out")]
    Timeout,
    /// Server answered 404
    #[error("Feed not found")]
    NotFound,
    /// HTTP response with any other non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(err)
        }
    }
}

/// Client-side limits for feed requests.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Whole request budget, body included
    pub request_timeout: Duration,
    /// TCP connect + TLS handshake budget
    pub connect_timeout: Duration,
    /// Permit loopback and private-network feed URLs
    pub allow_private_hosts: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(5),
            allow_private_hosts: false,
        }
    }
}

/// Issues one GET per feed URL with bounded timeouts.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    allow_private_hosts: bool,
}

impl FeedFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(FetchError::Network)?;

        Ok(Self {
            client,
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    /// Request a feed document.
    ///
    /// On success the returned [`FeedBody`] owns the still-open response
    /// stream; consuming or dropping it closes the connection.
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidUrl`] - URL rejected before any request
    /// - [`FetchError::Timeout`] - connect or request timeout elapsed
    /// - [`FetchError::Network`] - connection or TLS errors
    /// - [`FetchError::NotFound`] - 404 response
    /// - [`FetchError::HttpStatus`] - any other non-2xx response
    pub async fn fetch(&self, url: &str) -> Result<FeedBody, FetchError> {
        let url = validate_feed_url(url, self.allow_private_hosts)?;

        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        Ok(FeedBody {
            inner: BodyInner::Response(response),
        })
    }
}

/// A fetched, not yet read feed document.
///
/// Ownership is the close discipline: [`FeedBody::into_bytes`] consumes the
/// body, and a body that is dropped unread is closed by its destructor, so
/// each stream is released exactly once whatever path the pipeline takes.
#[derive(Debug)]
pub struct FeedBody {
    inner: BodyInner,
}

#[derive(Debug)]
enum BodyInner {
    Response(reqwest::Response),
    Buffered(Vec<u8>),
}

impl FeedBody {
    /// A body that is already in memory.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: BodyInner::Buffered(bytes.into()),
        }
    }

    /// Read the whole document, enforcing the size limit.
    pub async fn into_bytes(self) -> Result<Vec<u8>, FetchError> {
        match self.inner {
            BodyInner::Response(response) => read_limited_bytes(response, MAX_FEED_SIZE).await,
            BodyInner::Buffered(bytes) if bytes.len() > MAX_FEED_SIZE => {
                Err(FetchError::ResponseTooLarge)
            }
            BodyInner::Buffered(bytes) => Ok(bytes),
        }
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Capture Content-Length for completeness check
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><title>Test</title><link>https://example.com/1</link></item>
</channel></rss>"#;

    fn local_fetcher() -> FeedFetcher {
        FeedFetcher::new(&FetchConfig {
            allow_private_hosts: true,
            ..FetchConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(&mock_server)
            .await;

        let body = local_fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        let bytes = body.into_bytes().await.unwrap();
        assert_eq!(bytes, VALID_RSS.as_bytes());
    }

    #[tokio::test]
    async fn test_fetch_404_is_not_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1) // No retry
            .mount(&mock_server)
            .await;

        let result = local_fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await;
        match result {
            Err(FetchError::NotFound) => {}
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_500_fails_without_retry() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = local_fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await;
        match result {
            Err(FetchError::HttpStatus(500)) => {}
            other => panic!("Expected HttpStatus(500), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_request_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let fetcher = FeedFetcher::new(&FetchConfig {
            request_timeout: Duration::from_millis(200),
            connect_timeout: Duration::from_millis(200),
            allow_private_hosts: true,
        })
        .unwrap();

        let result = fetcher.fetch(&format!("{}/feed", mock_server.uri())).await;
        assert!(matches!(result, Err(FetchError::Timeout)), "got {:?}", result);
    }

    #[tokio::test]
    async fn test_fetch_private_host_rejected_by_default() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let fetcher = FeedFetcher::new(&FetchConfig::default()).unwrap();
        let result = fetcher.fetch(&format!("{}/feed", mock_server.uri())).await;
        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_fetch_response_too_large() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; MAX_FEED_SIZE + 1]))
            .mount(&mock_server)
            .await;

        let body = local_fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert!(matches!(
            body.into_bytes().await,
            Err(FetchError::ResponseTooLarge)
        ));
    }

    #[tokio::test]
    async fn test_buffered_body_round_trip() {
        let body = FeedBody::from_bytes(VALID_RSS);
        assert_eq!(body.into_bytes().await.unwrap(), VALID_RSS.as_bytes());
    }
}
