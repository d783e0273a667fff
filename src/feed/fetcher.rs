use crate::feed::parser::parse_feed;
use crate::feed::SourceAdapter;
use crate::item::{Item, Source};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

const MAX_RETRIES: u32 = 3;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while fetching and parsing a source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the 30-second timeout
    #[error("Request timed out")]
    Timeout,
    /// Body could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Fetches syndication feeds over HTTP and parses them with feed-rs.
///
/// Transient conditions (429, 5xx, truncated bodies) are retried here with
/// exponential backoff (1s, 2s, 4s); anything else fails the fetch at once
/// and is left to the scheduler's cycle-level retry.
#[derive(Clone)]
pub struct RssAdapter {
    client: reqwest::Client,
    backoff_base: Duration,
}

impl RssAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            backoff_base: Duration::from_secs(1),
        }
    }

    /// HTTP client with pooling and a request timeout.
    pub fn default_client() -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("feedkeeper/", env!("CARGO_PKG_VERSION")))
            .build()
    }

    #[cfg(test)]
    fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let mut retry_count = 0;

        loop {
            let response = tokio::time::timeout(REQUEST_TIMEOUT, self.client.get(url).send())
                .await
                .map_err(|_| SourceError::Timeout)?
                .map_err(SourceError::Network)?;

            let status = response.status();
            let delay = self.backoff_base * 2u32.pow(retry_count);

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= MAX_RETRIES {
                    return Err(SourceError::RateLimited(MAX_RETRIES));
                }
                tracing::warn!(
                    url = %url,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(SourceError::HttpStatus(status.as_u16()));
                }
                tracing::warn!(
                    url = %url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // 4xx errors fail immediately
            if !status.is_success() {
                return Err(SourceError::HttpStatus(status.as_u16()));
            }

            match read_limited_bytes(response, MAX_FEED_SIZE).await {
                Ok(bytes) => return Ok(bytes),
                Err(SourceError::IncompleteResponse { expected, received })
                    if retry_count < MAX_RETRIES =>
                {
                    tracing::debug!(
                        url = %url,
                        expected,
                        received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    async fn fetch(&self, source: &Source) -> Result<Vec<Item>, SourceError> {
        tracing::info!(source = %source.name, url = %source.url, "Fetching feed");
        let bytes = self.fetch_bytes(&source.url).await?;
        let items = parse_feed(&bytes).map_err(|e| SourceError::Parse(e.to_string()))?;
        tracing::info!(source = %source.name, item_count = items.len(), "Parsed feed");
        Ok(items)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, SourceError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(SourceError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(SourceError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(SourceError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(SourceError::IncompleteResponse {
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
    use wiremock::matchers::{any, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    fn adapter() -> RssAdapter {
        RssAdapter::new(reqwest::Client::new()).with_backoff_base(Duration::from_millis(1))
    }

    fn source(server: &MockServer) -> Source {
        Source::new("test", format!("{}/feed", server.uri()))
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&mock_server)
            .await;

        let items = adapter().fetch(&source(&mock_server)).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Test");
    }

    #[tokio::test]
    async fn test_fetch_404_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        match adapter().fetch(&source(&mock_server)).await.unwrap_err() {
            SourceError::HttpStatus(404) => {}
            e => panic!("Expected HttpStatus(404), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_fetch_500_retries_then_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // Initial request + 3 retries
            .mount(&mock_server)
            .await;

        match adapter().fetch(&source(&mock_server)).await.unwrap_err() {
            SourceError::HttpStatus(500) => {}
            e => panic!("Expected HttpStatus(500), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_fetch_503_retry_then_success() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let items = adapter().fetch(&source(&mock_server)).await.unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_429_exhausts_into_rate_limited() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        assert!(matches!(
            adapter().fetch(&source(&mock_server)).await,
            Err(SourceError::RateLimited(3))
        ));
    }

    #[tokio::test]
    async fn test_malformed_feed_parse_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        match adapter().fetch(&source(&mock_server)).await.unwrap_err() {
            SourceError::Parse(_) => {}
            e => panic!("Expected Parse error, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_empty_feed_success() {
        let empty_rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel></channel></rss>"#;

        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(empty_rss))
            .mount(&mock_server)
            .await;

        let items = adapter().fetch(&source(&mock_server)).await.unwrap();
        assert!(items.is_empty());
    }
}
