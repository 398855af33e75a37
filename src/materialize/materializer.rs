use super::flight::FlightGroup;
use crate::blob::BlobStore;
use crate::image::{content_type_for_path, CacheKey, ImageRef, TransformSpec};
use crate::origin::{FetchError, OriginClient};
use crate::retry::RetryPolicy;
use crate::transform::{TransformError, TransformService};
use crate::FailureKind;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// How a ready image came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializeOutcome {
    /// The variant was already stored; nothing was fetched or transformed
    Cached,
    /// The original was fetched from the origin and transformed
    Created,
    /// The original came from the store and was transformed
    CreatedFromCachedOriginal,
    /// The transform failed; these are the original bytes, not stored as a variant
    Degraded,
    /// Transformed, but the store rejected the variant; the next request
    /// transforms again
    Unstored,
}

impl MaterializeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Created => "created",
            Self::CreatedFromCachedOriginal => "created_from_cached_original",
            Self::Degraded => "degraded",
            Self::Unstored => "unstored",
        }
    }
}

/// Bytes ready to serve
#[derive(Debug, Clone)]
pub struct MaterializedImage {
    /// Key the bytes are stored under (the original's key when degraded)
    pub key: CacheKey,
    pub bytes: Bytes,
    pub content_type: String,
    pub outcome: MaterializeOutcome,
}

/// Result of a materialization that did not hit an internal error
#[derive(Debug, Clone)]
pub enum Materialization {
    Ready(Arc<MaterializedImage>),
    /// Even the original could not be obtained; callers should point
    /// clients at `source_url` or answer with a gateway error
    Fallback {
        source_url: String,
        cause: MaterializeError,
    },
}

impl Materialization {
    pub fn outcome(&self) -> Option<MaterializeOutcome> {
        match self {
            Self::Ready(image) => Some(image.outcome),
            Self::Fallback { .. } => None,
        }
    }
}

/// Materialization failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MaterializeError {
    #[error("Invalid input for {source_url}: {reason}")]
    InvalidInput { source_url: String, reason: String },

    #[error("Fetching original {source_url} failed: {reason}")]
    FetchFailed {
        source_url: String,
        reason: String,
        kind: FailureKind,
    },

    #[error("Transforming {key} failed: {reason}")]
    TransformFailed {
        key: String,
        reason: String,
        kind: FailureKind,
    },

    #[error("Materialization of {key} was abandoned by its leader")]
    Abandoned { key: String },
}

impl MaterializeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidInput { .. } => FailureKind::InvalidInput,
            Self::FetchFailed { kind, .. } | Self::TransformFailed { kind, .. } => *kind,
            Self::Abandoned { .. } => FailureKind::StoreFailed,
        }
    }

    fn from_fetch(source_url: &str, err: FetchError) -> Self {
        Self::FetchFailed {
            source_url: source_url.to_string(),
            reason: err.to_string(),
            kind: err.kind(),
        }
    }

    fn from_transform(key: &CacheKey, err: TransformError) -> Self {
        Self::TransformFailed {
            key: key.to_string(),
            reason: err.to_string(),
            kind: err.kind(),
        }
    }
}

/// Retry policies of the two outbound calls a materialization makes
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicies {
    pub origin: RetryPolicy,
    pub transform: RetryPolicy,
}

#[derive(Debug, Clone)]
struct Original {
    bytes: Bytes,
    content_type: String,
    key: CacheKey,
    from_store: bool,
}

type VariantResult = Result<Materialization, MaterializeError>;
type OriginalResult = Result<Original, MaterializeError>;

/// Get-or-create cache over the blob store
pub struct ImageMaterializer {
    store: Arc<dyn BlobStore>,
    origin: Arc<dyn OriginClient>,
    transformer: Arc<dyn TransformService>,
    retry: RetryPolicies,
    variants: FlightGroup<CacheKey, VariantResult>,
    originals: FlightGroup<CacheKey, OriginalResult>,
    public_base: Option<Url>,
}

impl ImageMaterializer {
    /// Creates a materializer; requires a Tokio runtime
    pub fn new(
        store: Arc<dyn BlobStore>,
        origin: Arc<dyn OriginClient>,
        transformer: Arc<dyn TransformService>,
        retry: RetryPolicies,
    ) -> Self {
        Self {
            store,
            origin,
            transformer,
            retry,
            variants: FlightGroup::new(),
            originals: FlightGroup::new(),
            public_base: None,
        }
    }

    /// Sets the public base URL of the blob store
    pub fn with_public_base(mut self, mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        self.public_base = Some(base);
        self
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Public URL of a stored object, when the store is publicly reachable
    pub fn public_url(&self, key: &CacheKey) -> Option<Url> {
        self.public_base.as_ref()?.join(key.as_str()).ok()
    }

    /// Returns the variant of `image` described by `spec`, creating it if needed
    ///
    /// 1. A stored variant is returned as-is (`Cached`)
    /// 2. Otherwise the original is read from the store or fetched (and stored)
    /// 3. The transform output is stored under the variant key before returning
    ///
    /// A transform failure degrades to the original bytes; a failed origin
    /// fetch yields [`Materialization::Fallback`]. Concurrent calls for the
    /// same key share one execution.
    pub async fn materialize(
        &self,
        image: &ImageRef,
        spec: &TransformSpec,
    ) -> Result<Materialization, MaterializeError> {
        spec.validate().map_err(|e| MaterializeError::InvalidInput {
            source_url: image.source_url().to_string(),
            reason: e.to_string(),
        })?;

        let key = CacheKey::variant(image, spec);
        let flight = self
            .variants
            .run(key.clone(), || self.materialize_uncoalesced(image, spec, &key))
            .await
            .map_err(|_| MaterializeError::Abandoned {
                key: key.to_string(),
            })?;

        if !flight.was_led() {
            tracing::debug!(key = %key, "Joined in-flight materialization");
        }
        flight.into_inner()
    }

    async fn materialize_uncoalesced(
        &self,
        image: &ImageRef,
        spec: &TransformSpec,
        key: &CacheKey,
    ) -> VariantResult {
        if let Some(cached) = self.lookup(key).await {
            tracing::debug!(key = %key, "Cache hit");
            return Ok(Materialization::Ready(Arc::new(cached)));
        }

        let original = match self.load_original(image).await {
            Ok(original) => original,
            Err(err @ MaterializeError::Abandoned { .. }) => return Err(err),
            Err(cause) => {
                tracing::warn!(
                    source_url = image.source_url(),
                    key = %key,
                    error = %cause,
                    "Original unavailable"
                );
                return Ok(Materialization::Fallback {
                    source_url: image.source_url().to_string(),
                    cause,
                });
            }
        };

        let transformed = self
            .retry
            .transform
            .run(
                "transform",
                || {
                    self.transformer
                        .transform(original.bytes.clone(), spec, &original.content_type)
                },
                || TransformError::Timeout,
            )
            .await;

        let transformed = match transformed {
            Ok(transformed) => transformed,
            Err(err) => {
                let cause = MaterializeError::from_transform(key, err);
                tracing::warn!(
                    source_url = image.source_url(),
                    key = %key,
                    error = %cause,
                    "Transform failed, serving original"
                );
                return Ok(Materialization::Ready(Arc::new(MaterializedImage {
                    key: original.key,
                    bytes: original.bytes,
                    content_type: original.content_type,
                    outcome: MaterializeOutcome::Degraded,
                })));
            }
        };

        let content_type = spec.format.content_type();
        let stored = self
            .store
            .put(key.as_str(), transformed.bytes.clone(), content_type)
            .await;

        let outcome = match stored {
            Ok(_) if original.from_store => MaterializeOutcome::CreatedFromCachedOriginal,
            Ok(_) => MaterializeOutcome::Created,
            Err(e) => {
                tracing::warn!(
                    source_url = image.source_url(),
                    key = %key,
                    error = %e,
                    "Failed to store variant, serving it uncached"
                );
                MaterializeOutcome::Unstored
            }
        };
        tracing::debug!(key = %key, outcome = outcome.as_str(), size = transformed.bytes.len(), "Stored variant");

        Ok(Materialization::Ready(Arc::new(MaterializedImage {
            key: key.clone(),
            bytes: transformed.bytes,
            content_type: content_type.to_string(),
            outcome,
        })))
    }

    /// Reads a stored variant; store read errors count as a miss
    async fn lookup(&self, key: &CacheKey) -> Option<MaterializedImage> {
        match self.store.head(key.as_str()).await {
            Ok(Some(_)) => {}
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Store head failed, treating as miss");
                return None;
            }
        }

        match self.store.get(key.as_str()).await {
            Ok(Some(object)) => Some(MaterializedImage {
                key: key.clone(),
                bytes: object.body,
                content_type: object.meta.content_type,
                outcome: MaterializeOutcome::Cached,
            }),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Store get failed, treating as miss");
                None
            }
        }
    }

    async fn load_original(&self, image: &ImageRef) -> OriginalResult {
        let key = CacheKey::original(image);
        self.originals
            .run(key.clone(), || self.load_original_uncoalesced(image, &key))
            .await
            .map_err(|_| MaterializeError::Abandoned {
                key: key.to_string(),
            })?
            .into_inner()
    }

    async fn load_original_uncoalesced(&self, image: &ImageRef, key: &CacheKey) -> OriginalResult {
        match self.store.get(key.as_str()).await {
            Ok(Some(object)) => {
                tracing::debug!(key = %key, "Original found in store");
                return Ok(Original {
                    bytes: object.body,
                    content_type: object.meta.content_type,
                    key: key.clone(),
                    from_store: true,
                });
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(key = %key, error = %e, "Store get failed for original"),
        }

        let source_url = image.source_url();
        let fetched = self
            .retry
            .origin
            .run(
                "origin fetch",
                || self.origin.fetch(source_url),
                || FetchError::Timeout {
                    url: source_url.to_string(),
                },
            )
            .await
            .map_err(|e| MaterializeError::from_fetch(source_url, e))?;

        if fetched.body.is_empty() {
            return Err(MaterializeError::from_fetch(
                source_url,
                FetchError::EmptyBody {
                    url: source_url.to_string(),
                },
            ));
        }

        let content_type = match fetched.media_type() {
            Some(t) if t.starts_with("image/") => t,
            Some(t) if t.starts_with("text/") => {
                return Err(MaterializeError::InvalidInput {
                    source_url: source_url.to_string(),
                    reason: format!("origin returned {} instead of an image", t),
                });
            }
            _ => content_type_for_path(image.canonical_path()).to_string(),
        };

        if let Err(e) = self
            .store
            .put(key.as_str(), fetched.body.clone(), &content_type)
            .await
        {
            tracing::warn!(key = %key, error = %e, "Failed to store original");
        }

        Ok(Original {
            bytes: fetched.body,
            content_type,
            key: key.clone(),
            from_store: false,
        })
    }
}
