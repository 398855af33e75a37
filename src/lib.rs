//! Imgedge: an edge image-optimization pipeline
//!
//! This crate crawls HTML pages and sitemaps, discovers image references,
//! negotiates the best image encoding for each client and materializes
//! optimized variants into a blob store. Work that already exists in the
//! store is never repeated.
//!
//! The moving parts, leaves first:
//! - [`image`]: formats, transform specs, image references, cache keys and
//!   client format negotiation
//! - [`blob`], [`origin`], [`transform`]: the external collaborators
//! - [`scheduler`]: bounded FIFO execution of fetch/transform/store work
//! - [`materialize`]: the coalesced get-or-create cache protocol
//! - [`crawler`] and [`state`]: the resumable crawl state machine
//! - [`service`]: thin adapters for the exposed HTTP surface

pub mod blob;
pub mod config;
pub mod crawler;
pub mod extract;
pub mod image;
pub mod materialize;
pub mod origin;
pub mod output;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod storage;
pub mod transform;
pub mod url;

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Blob store error: {0}")]
    Blob(#[from] blob::BlobError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] scheduler::SchedulerError),

    #[error("Sitemap unreachable at {url}: {reason}")]
    SitemapUnreachable { url: String, reason: String },

    #[error("Root page unreachable at {url}: {reason}")]
    RootUnreachable { url: String, reason: String },

    #[error("Crawl job {0} not found")]
    JobNotFound(i64),

    #[error("Crawl job {0} is already being driven by another crawler")]
    JobBusy(i64),

    #[error("Invalid job transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::JobStatus,
        to: state::JobStatus,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Returns true if this error ends a crawl job in the `Failed` state
    /// rather than aborting the crawler itself
    pub fn is_job_failure(&self) -> bool {
        matches!(
            self,
            Self::SitemapUnreachable { .. } | Self::RootUnreachable { .. }
        )
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid host pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),

    #[error("Unsupported image: {0}")]
    UnsupportedImage(String),
}

/// Failure classes shared by every outbound operation
///
/// Per-image failures are reported with one of these classes; only
/// `TooManySubrequests` is retryable regardless of the underlying cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Origin unreachable or answered with a non-2xx status
    FetchFailed,
    /// Transform service unreachable, non-2xx or rejected the parameters
    TransformFailed,
    /// Platform-level throttling
    TooManySubrequests,
    /// Blob store read or write error
    StoreFailed,
    /// Malformed URL, unsupported extension or invalid parameters
    InvalidInput,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchFailed => "fetch_failed",
            Self::TransformFailed => "transform_failed",
            Self::TooManySubrequests => "too_many_subrequests",
            Self::StoreFailed => "store_failed",
            Self::InvalidInput => "invalid_input",
        }
    }

    /// Returns true if this class never warrants a retry
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::InvalidInput)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use image::{CacheKey, FormatNegotiator, ImageFormat, ImageRef, TransformSpec};
pub use materialize::{ImageMaterializer, Materialization};
pub use scheduler::Scheduler;
pub use state::{CrawlJob, JobStatus};
