use crate::image::{Fit, ImageFormat, TransformSpec, DEFAULT_QUALITY};
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Imgedge
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub origin: OriginConfig,
    pub transform: TransformConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub serve: ServeConfig,
}

/// How the pipeline talks to origin servers
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Name sent in the `User-Agent` header
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: Option<String>,

    /// Whole-request timeout (milliseconds)
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    #[serde(rename = "connect-timeout-ms")]
    pub connect_timeout_ms: u64,

    /// Refuse plain HTTP origins
    #[serde(rename = "https-only")]
    pub https_only: bool,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            crawler_name: "imgedge".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: None,
            timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            https_only: false,
        }
    }
}

impl OriginConfig {
    /// `Name/Version (+ContactURL)`
    pub fn user_agent(&self) -> String {
        match &self.contact_url {
            Some(contact) => format!("{}/{} (+{})", self.crawler_name, self.crawler_version, contact),
            None => format!("{}/{}", self.crawler_name, self.crawler_version),
        }
    }
}

/// Transform service endpoint and the variants produced during a crawl
#[derive(Debug, Clone, Deserialize)]
pub struct TransformConfig {
    /// Endpoint receiving `POST`ed originals
    pub endpoint: String,

    #[serde(rename = "timeout-ms", default = "default_transform_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub fit: Fit,

    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Focal point hint forwarded to the service (e.g. `auto`, `center`)
    #[serde(default)]
    pub gravity: Option<String>,

    #[serde(default = "default_variants")]
    pub variants: Vec<VariantConfig>,
}

fn default_transform_timeout_ms() -> u64 {
    30_000
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

fn default_variants() -> Vec<VariantConfig> {
    vec![
        VariantConfig::of(ImageFormat::Avif),
        VariantConfig::of(ImageFormat::Webp),
    ]
}

impl TransformConfig {
    /// Builds a spec for `format`, filling in configured defaults
    pub fn spec_for(&self, format: ImageFormat) -> TransformSpec {
        TransformSpec::new(format)
            .with_fit(self.fit)
            .with_quality(self.quality)
    }

    /// The specs every discovered image is materialized into
    pub fn variant_specs(&self) -> Vec<TransformSpec> {
        self.variants
            .iter()
            .map(|v| {
                let mut spec = self.spec_for(v.format);
                spec.width = v.width;
                spec.height = v.height;
                if let Some(fit) = v.fit {
                    spec.fit = fit;
                }
                if let Some(quality) = v.quality {
                    spec.quality = quality;
                }
                spec
            })
            .collect()
    }
}

/// One `[[transform.variants]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct VariantConfig {
    pub format: ImageFormat,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub fit: Option<Fit>,
    #[serde(default)]
    pub quality: Option<u8>,
}

impl VariantConfig {
    pub fn of(format: ImageFormat) -> Self {
        Self {
            format,
            width: None,
            height: None,
            fit: None,
            quality: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    #[default]
    Filesystem,
    Memory,
}

/// Blob store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Root directory of the filesystem backend
    pub root: String,

    /// Base URL the store is publicly reachable at, if any
    #[serde(rename = "public-url")]
    pub public_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Filesystem,
            root: "./imgedge-store".to_string(),
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently running pipeline tasks
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_concurrent: 5 }
    }
}

/// What a cancellation request does to the batch in progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancelMode {
    /// Let the current batch finish, then stop
    #[default]
    BetweenBatches,
    /// Stop waiting for the current batch; its images stay queued
    AbandonBatch,
}

/// Crawl batching and persistence
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Images submitted per batch
    #[serde(rename = "batch-size")]
    pub batch_size: usize,

    /// Pause between consecutive batches (milliseconds)
    #[serde(rename = "batch-delay-ms")]
    pub batch_delay_ms: u64,

    /// Path to the SQLite job database
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Suffixes of sitemap-index children worth crawling; empty means all
    #[serde(rename = "relevant-sitemaps")]
    pub relevant_sitemaps: Vec<String>,

    #[serde(rename = "cancel-mode")]
    pub cancel_mode: CancelMode,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay_ms: 1_000,
            database_path: "./imgedge.db".to_string(),
            relevant_sitemaps: Vec::new(),
            cancel_mode: CancelMode::BetweenBatches,
        }
    }
}

impl CrawlerConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

/// Which image references found in HTML are worth optimizing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Accepted path prefixes, e.g. `/wp-content/uploads/`; empty means any
    #[serde(rename = "path-prefixes")]
    pub path_prefixes: Vec<String>,

    /// Host patterns (`*.example.com`); empty means the page's own host
    #[serde(rename = "allowed-hosts")]
    pub allowed_hosts: Vec<String>,

    /// Substrings that exclude a path
    #[serde(rename = "excluded-paths")]
    pub excluded_paths: Vec<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            path_prefixes: Vec::new(),
            allowed_hosts: Vec::new(),
            excluded_paths: vec!["/cdn-cgi/".to_string(), "favicon".to_string()],
        }
    }
}

/// Retry settings of one class of outbound call
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    #[serde(rename = "initial-delay-ms")]
    pub initial_delay_ms: u64,

    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    #[serde(rename = "attempt-timeout-ms")]
    pub attempt_timeout_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 5_000,
            max_delay_ms: 30_000,
            attempt_timeout_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub origin: RetrySettings,
    pub transform: RetrySettings,
    pub sitemap: RetrySettings,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            origin: RetrySettings::default(),
            transform: RetrySettings::default(),
            sitemap: RetrySettings {
                max_retries: 5,
                ..RetrySettings::default()
            },
        }
    }
}

/// Response when even the original image cannot be fetched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchFailureMode {
    /// Answer 502
    #[default]
    BadGateway,
    /// Redirect the client to the source URL
    Redirect,
}

/// Single-image serving behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    #[serde(rename = "cache-control")]
    pub cache_control: String,

    #[serde(rename = "fetch-failure")]
    pub fetch_failure: FetchFailureMode,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            cache_control: "public, max-age=31536000".to_string(),
            fetch_failure: FetchFailureMode::BadGateway,
        }
    }
}

impl Config {
    /// A configuration with every default, pointing at `endpoint`
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            origin: OriginConfig::default(),
            transform: TransformConfig {
                endpoint: endpoint.into(),
                timeout_ms: default_transform_timeout_ms(),
                fit: Fit::default(),
                quality: DEFAULT_QUALITY,
                gravity: None,
                variants: default_variants(),
            },
            store: StoreConfig::default(),
            scheduler: SchedulerConfig::default(),
            crawler: CrawlerConfig::default(),
            extract: ExtractConfig::default(),
            retry: RetryConfig::default(),
            serve: ServeConfig::default(),
        }
    }
}
