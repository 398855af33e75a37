//! Blob store abstraction
//!
//! The blob store is the shared key/value object store that holds originals
//! and transformed variants. The pipeline only needs a handful of
//! operations: `head`, `get`, `put` and a paginated `list`.

mod filesystem;
mod memory;

pub use filesystem::FsBlobStore;
pub use memory::{MemoryBlobStore, OpCounts};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Page size used by [`list_all`]
pub const LIST_PAGE_SIZE: usize = 1000;

/// Blob store errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BlobError {
    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    #[error("IO error on {key}: {message}")]
    Io { key: String, message: String },

    #[error("Corrupt metadata for {key}: {message}")]
    CorruptMetadata { key: String, message: String },

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type BlobResult<T> = std::result::Result<T, BlobError>;

/// Metadata of one stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub uploaded: DateTime<Utc>,
}

/// An object body together with its metadata
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub meta: ObjectMeta,
    pub body: Bytes,
}

/// One page of a key listing
///
/// When `truncated` is set, pass `cursor` back to fetch the next page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub truncated: bool,
    pub cursor: Option<String>,
}

/// Interface of a key/value object store
///
/// Implementations must make `put` atomic: a concurrent reader sees either
/// nothing or the complete object.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Name of the backend, for logging
    fn name(&self) -> &str;

    /// Metadata of `key`, or `None` when absent
    async fn head(&self, key: &str) -> BlobResult<Option<ObjectMeta>>;

    /// Body and metadata of `key`, or `None` when absent
    async fn get(&self, key: &str) -> BlobResult<Option<StoredObject>>;

    /// Stores `body` under `key`, replacing any previous object
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> BlobResult<ObjectMeta>;

    /// Lists keys starting with `prefix` in lexicographic order
    ///
    /// `cursor` is the opaque value from the previous page, `limit` the
    /// maximum number of keys to return.
    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize)
        -> BlobResult<ListPage>;
}

/// Follows the cursor until every key under `prefix` has been listed
pub async fn list_all(store: &dyn BlobStore, prefix: &str) -> BlobResult<Vec<String>> {
    let mut keys = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = store.list(prefix, cursor.as_deref(), LIST_PAGE_SIZE).await?;
        keys.extend(page.keys);

        match (page.truncated, page.cursor) {
            (true, Some(next)) => cursor = Some(next),
            _ => break,
        }
    }

    Ok(keys)
}

/// Checks that a key is a safe relative path
///
/// Rejects empty keys, absolute keys, backslashes, NUL bytes and `.`/`..`
/// segments.
pub fn validate_key(key: &str) -> BlobResult<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if invalid {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Applies cursor and limit to an already sorted, prefix-filtered key list
pub(crate) fn paginate<'a, I>(sorted_keys: I, cursor: Option<&str>, limit: usize) -> ListPage
where
    I: Iterator<Item = &'a str>,
{
    let limit = limit.max(1);
    let mut keys: Vec<String> = sorted_keys
        .filter(|k| cursor.map_or(true, |c| *k > c))
        .take(limit + 1)
        .map(str::to_string)
        .collect();

    let truncated = keys.len() > limit;
    if truncated {
        keys.truncate(limit);
    }
    let cursor = if truncated { keys.last().cloned() } else { None };

    ListPage {
        keys,
        truncated,
        cursor,
    }
}
