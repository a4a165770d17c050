use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::error::FetchError;
use super::parser::{parse_feed, RawFeed};

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Fetches and parses feed documents.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Parse an already-retrieved document.
    fn parse_document(&self, bytes: &[u8]) -> Result<RawFeed, FetchError> {
        parse_feed(bytes)
    }

    /// Fetch `url` and parse the body.
    ///
    /// Bounded only by `cancel`; there is no per-request timeout.
    async fn fetch_and_parse(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<RawFeed, FetchError>;
}

/// Network feed client backed by `reqwest` and `feed-rs`.
#[derive(Clone)]
pub struct HttpFeedClient {
    client: reqwest::Client,
}

impl HttpFeedClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::NetworkFetchFailed(format!(
                "HTTP error: status {}",
                response.status().as_u16()
            )));
        }

        read_limited_bytes(response, MAX_FEED_SIZE).await
    }
}

#[async_trait]
impl FeedClient for HttpFeedClient {
    async fn fetch_and_parse(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<RawFeed, FetchError> {
        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            result = self.fetch_bytes(url) => result?,
        };

        self.parse_document(&bytes)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let too_large = || FetchError::NetworkFetchFailed(format!("Response exceeds {} bytes", limit));

    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(too_large());
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(too_large());
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
