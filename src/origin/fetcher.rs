//! HTTP origin client
//!
//! This module handles every HTTP request made to the origin:
//! - Building the HTTP client with the configured user agent and timeouts
//! - GET requests for pages, sitemaps and original images
//! - Classifying failures so the retry policy can tell transient from permanent

use super::{FetchError, FetchedResource, OriginClient};
use crate::config::OriginConfig;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use url::Url;

/// Builds an HTTP client for origin requests
///
/// # Example
///
/// ```no_run
/// use imgedge::config::OriginConfig;
/// use imgedge::origin::build_http_client;
///
/// let client = build_http_client(&OriginConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &OriginConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent())
        .timeout(Duration::from_millis(config.timeout_ms))
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
        .https_only(config.https_only)
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`OriginClient`] over reqwest
#[derive(Debug, Clone)]
pub struct HttpOrigin {
    client: Client,
}

impl HttpOrigin {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &OriginConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::new(build_http_client(config)?))
    }
}

/// Maps a reqwest error onto the fetch taxonomy
fn classify(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if e.is_connect() {
        FetchError::Connect {
            url: url.to_string(),
            message: e.to_string(),
        }
    } else if e.is_builder() {
        FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl OriginClient for HttpOrigin {
    /// Fetches a URL, classifying the outcome
    ///
    /// | Condition | Result |
    /// |-----------|--------|
    /// | 2xx | `Ok` with body |
    /// | 429 | `RateLimited` (transient) |
    /// | 5xx, 408 | `Status` (transient) |
    /// | other 4xx | `Status` (permanent) |
    /// | Timeout | `Timeout` (transient) |
    /// | Connection refused | `Connect` (transient) |
    /// | Malformed URL | `InvalidUrl` (permanent) |
    async fn fetch(&self, url: &str) -> Result<FetchedResource, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        let final_url = response.url().to_string();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited {
                url: url.to_string(),
            });
        }

        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await.map_err(|e| classify(url, e))?;

        tracing::trace!(url, status = status.as_u16(), size = body.len(), "Fetched from origin");

        Ok(FetchedResource {
            url: final_url,
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryableError;
    use wiremock::matchers::{header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn origin() -> HttpOrigin {
        HttpOrigin::from_config(&OriginConfig::default()).unwrap()
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(&OriginConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uploads/a.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"jpegbytes".to_vec())
                    .insert_header("content-type", "image/jpeg"),
            )
            .mount(&server)
            .await;

        let resource = origin()
            .fetch(&format!("{}/uploads/a.jpg", server.uri()))
            .await
            .unwrap();

        assert_eq!(resource.status, 200);
        assert_eq!(resource.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(&resource.body[..], b"jpegbytes");
    }

    #[tokio::test]
    async fn test_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header_matcher(
                "user-agent",
                OriginConfig::default().user_agent().as_str(),
            ))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        origin().fetch(&format!("{}/", server.uri())).await.unwrap();
    }

    #[tokio::test]
    async fn test_404_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = origin()
            .fetch(&format!("{}/missing.jpg", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_429_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = origin()
            .fetch(&format!("{}/busy.jpg", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::RateLimited { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_503_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = origin()
            .fetch(&format!("{}/a.jpg", server.uri()))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_malformed_url() {
        let err = origin().fetch("not a url").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }
}
