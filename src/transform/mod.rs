//! Transform service client
//!
//! The transform service turns original image bytes into a rendition
//! described by a [`TransformSpec`]. It is remote and stateless; the
//! pipeline talks to it through [`TransformService`].

use crate::image::TransformSpec;
use crate::retry::RetryableError;
use crate::FailureKind;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Transform failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("Transform service returned HTTP {status}")]
    Status { status: u16 },

    #[error("Transform service throttled the request")]
    RateLimited,

    #[error("Transform service timed out")]
    Timeout,

    #[error("Transform service unreachable: {0}")]
    Unreachable(String),

    #[error("Transform service rejected the parameters: {0}")]
    InvalidParams(String),

    #[error("Transform service returned an empty body")]
    EmptyBody,
}

impl TransformError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::RateLimited => FailureKind::TooManySubrequests,
            Self::InvalidParams(_) => FailureKind::InvalidInput,
            _ => FailureKind::TransformFailed,
        }
    }
}

impl RetryableError for TransformError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Status { status } => *status >= 500,
            Self::RateLimited | Self::Timeout | Self::Unreachable(_) => true,
            Self::InvalidParams(_) | Self::EmptyBody => false,
        }
    }
}

/// Output of a successful transform
#[derive(Debug, Clone)]
pub struct TransformedImage {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Produces renditions of original images
#[async_trait]
pub trait TransformService: Send + Sync {
    async fn transform(
        &self,
        original: Bytes,
        spec: &TransformSpec,
        content_type: &str,
    ) -> Result<TransformedImage, TransformError>;
}

/// [`TransformService`] that `POST`s originals to an HTTP endpoint
///
/// Spec fields travel as query parameters (`format`, `width`, `height`,
/// `fit`, `quality`, plus `gravity` when configured); the body is the raw
/// original with its content type.
#[derive(Debug, Clone)]
pub struct HttpTransformService {
    client: Client,
    endpoint: Url,
    gravity: Option<String>,
}

impl HttpTransformService {
    pub fn new(client: Client, endpoint: Url, gravity: Option<String>) -> Self {
        Self {
            client,
            endpoint,
            gravity,
        }
    }

    /// Builds a client with `timeout` for the given endpoint
    pub fn with_timeout(
        endpoint: Url,
        timeout: Duration,
        gravity: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::new(client, endpoint, gravity))
    }

    fn request_url(&self, spec: &TransformSpec) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            for (name, value) in spec.query_pairs() {
                query.append_pair(name, &value);
            }
            if let Some(gravity) = &self.gravity {
                query.append_pair("gravity", gravity);
            }
        }
        url
    }
}

#[async_trait]
impl TransformService for HttpTransformService {
    async fn transform(
        &self,
        original: Bytes,
        spec: &TransformSpec,
        content_type: &str,
    ) -> Result<TransformedImage, TransformError> {
        let response = self
            .client
            .post(self.request_url(spec))
            .header(header::CONTENT_TYPE, content_type)
            .body(original)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransformError::Timeout
                } else {
                    TransformError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        match status {
            s if s.is_success() => {}
            StatusCode::TOO_MANY_REQUESTS => return Err(TransformError::RateLimited),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                let reason = response.text().await.unwrap_or_default();
                return Err(TransformError::InvalidParams(reason));
            }
            s => return Err(TransformError::Status { status: s.as_u16() }),
        }

        let returned_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .map(str::to_string);

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransformError::Timeout
            } else {
                TransformError::Unreachable(e.to_string())
            }
        })?;

        if bytes.is_empty() {
            return Err(TransformError::EmptyBody);
        }

        Ok(TransformedImage {
            bytes,
            content_type: returned_type.unwrap_or_else(|| spec.format.content_type().to_string()),
        })
    }
}
