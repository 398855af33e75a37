//! Origin access
//!
//! The origin is the website whose pages, sitemaps and images the pipeline
//! reads. [`OriginClient`] is the seam the rest of the crate depends on;
//! [`HttpOrigin`] is the production implementation.

mod fetcher;

pub use fetcher::{build_http_client, HttpOrigin};

use crate::retry::RetryableError;
use crate::FailureKind;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// A successfully fetched origin resource
#[derive(Debug, Clone)]
pub struct FetchedResource {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl FetchedResource {
    /// The body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Media type without parameters, lowercased
    pub fn media_type(&self) -> Option<String> {
        self.content_type.as_deref().map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    pub fn is_html(&self) -> bool {
        matches!(self.media_type().as_deref(), Some("text/html") | Some("application/xhtml+xml"))
    }

    pub fn is_xml(&self) -> bool {
        self.media_type().map_or(false, |t| t.ends_with("/xml") || t.ends_with("+xml"))
    }
}

/// Origin fetch failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Rate limited by {url}")]
    RateLimited { url: String },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Connection failed for {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Empty response body from {url}")]
    EmptyBody { url: String },
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidUrl { .. } => FailureKind::InvalidInput,
            Self::RateLimited { .. } => FailureKind::TooManySubrequests,
            _ => FailureKind::FetchFailed,
        }
    }

    /// The URL the failure is about
    pub fn url(&self) -> &str {
        match self {
            Self::InvalidUrl { url, .. }
            | Self::Status { url, .. }
            | Self::RateLimited { url }
            | Self::Timeout { url }
            | Self::Connect { url, .. }
            | Self::Network { url, .. }
            | Self::EmptyBody { url } => url,
        }
    }
}

impl RetryableError for FetchError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status >= 500 || *status == 408,
            Self::RateLimited { .. }
            | Self::Timeout { .. }
            | Self::Connect { .. }
            | Self::Network { .. } => true,
            Self::InvalidUrl { .. } | Self::EmptyBody { .. } => false,
        }
    }
}

/// Reads resources from the origin
#[async_trait]
pub trait OriginClient: Send + Sync {
    /// Fetches `url`; any non-2xx answer is an error
    async fn fetch(&self, url: &str) -> Result<FetchedResource, FetchError>;
}
