//! Signed asset fetching
//!
//! [`AssetFetcher`] is the seam between the orchestrator and the network. The production
//! implementation is [`HttpFetcher`]; tests substitute scripted fetchers.

use crate::error::{FetchError, Result};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// Longest error body kept for status classification
const ERROR_BODY_LIMIT: usize = 512;

/// Something that can turn a signed URL into bytes
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetch the full body behind `url`
    async fn fetch(&self, url: &Url) -> std::result::Result<Vec<u8>, FetchError>;
}

/// [`AssetFetcher`] over a shared `reqwest` client
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("grabber/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client (custom headers, proxies, cookies)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> std::result::Result<Vec<u8>, FetchError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        // Only a plain 200 carries the image; anything else is classified
        if status != reqwest::StatusCode::OK {
            let code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            tracing::debug!(url = %url, status = code, "asset request rejected");
            return Err(if status.is_success() {
                FetchError::Client { code }
            } else {
                FetchError::from_status(code, &snippet)
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(FetchError::Connection("empty response body".to_string()));
        }
        Ok(bytes.to_vec())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn fetch(server: &MockServer, p: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let url = Url::parse(&format!("{}{}", server.uri(), p)).unwrap();
        fetcher.fetch(&url).await
    }

    #[tokio::test]
    async fn returns_body_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page/1.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
            .mount(&server)
            .await;

        assert_eq!(fetch(&server, "/page/1.png").await.unwrap(), b"png-bytes");
    }

    #[tokio::test]
    async fn classifies_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(path("/expired"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Request has expired"))
            .mount(&server)
            .await;
        Mock::given(path("/forbidden"))
            .respond_with(ResponseTemplate::new(403).set_body_string("AccessDenied"))
            .mount(&server)
            .await;
        Mock::given(path("/busy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(path("/slow-down"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(path("/no-content"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        assert_eq!(
            fetch(&server, "/expired").await.unwrap_err(),
            FetchError::ExpiredSignature
        );
        assert_eq!(
            fetch(&server, "/forbidden").await.unwrap_err(),
            FetchError::PermissionDenied { code: 403 }
        );
        assert_eq!(
            fetch(&server, "/busy").await.unwrap_err(),
            FetchError::Server { code: 503 }
        );
        assert_eq!(
            fetch(&server, "/slow-down").await.unwrap_err(),
            FetchError::RateLimited
        );
        assert_eq!(
            fetch(&server, "/no-content").await.unwrap_err(),
            FetchError::Client { code: 204 }
        );
        assert_eq!(
            fetch(&server, "/missing").await.unwrap_err(),
            FetchError::Client { code: 404 }
        );
    }

    #[tokio::test]
    async fn request_timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(path("/hang"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_millis(100)).unwrap();
        let url = Url::parse(&format!("{}/hang", server.uri())).unwrap();
        assert_eq!(fetcher.fetch(&url).await.unwrap_err(), FetchError::Timeout);
    }
}
