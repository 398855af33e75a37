//! Local filesystem blob store
//!
//! Object bodies live under `<root>/objects/<key>`, metadata as a JSON
//! sidecar under `<root>/meta/<key>.json`. Writes go to `<root>/tmp` first
//! and are renamed into place, so readers never observe a partial body.

use super::{
    paginate, validate_key, BlobError, BlobResult, BlobStore, ListPage, ObjectMeta, StoredObject,
};
use crate::image::content_type_for_path;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    uploaded: DateTime<Utc>,
}

/// Blob store backed by a local directory
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    name: String,
    root: PathBuf,
}

impl FsBlobStore {
    /// Opens (creating if needed) a store rooted at `root`
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> BlobResult<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in ["objects", "meta", "tmp"] {
            let path = root.join(dir);
            // Runs once at startup; not worth an async constructor
            std::fs::create_dir_all(&path).map_err(|e| io_error(&path.display().to_string(), e))?;
        }
        Ok(Self {
            name: name.into(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join("objects").join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join("meta").join(format!("{}.json", key))
    }

    fn tmp_path(&self) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root
            .join("tmp")
            .join(format!("{}-{}.part", std::process::id(), n))
    }

    async fn write_atomic(&self, target: &Path, data: &[u8], key: &str) -> BlobResult<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(key, e))?;
        }
        let tmp = self.tmp_path();
        fs::write(&tmp, data).await.map_err(|e| io_error(key, e))?;
        if let Err(e) = fs::rename(&tmp, target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(io_error(key, e));
        }
        Ok(())
    }

    async fn read_meta(&self, key: &str) -> BlobResult<Option<ObjectMeta>> {
        let object_path = self.object_path(key);
        let size = match fs::metadata(&object_path).await {
            Ok(m) if m.is_file() => m.len(),
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(key, e)),
        };

        let sidecar = match fs::read(self.meta_path(key)).await {
            Ok(raw) => serde_json::from_slice::<Sidecar>(&raw).map_err(|e| {
                BlobError::CorruptMetadata {
                    key: key.to_string(),
                    message: e.to_string(),
                }
            })?,
            // Objects copied in by hand have no sidecar
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Sidecar {
                content_type: content_type_for_path(key).to_string(),
                uploaded: Utc::now(),
            },
            Err(e) => return Err(io_error(key, e)),
        };

        Ok(Some(ObjectMeta {
            key: key.to_string(),
            size,
            content_type: sidecar.content_type,
            uploaded: sidecar.uploaded,
        }))
    }

    /// Collects every key under `objects/`, sorted
    async fn walk_keys(&self) -> BlobResult<Vec<String>> {
        let objects_root = self.root.join("objects");
        let mut keys = Vec::new();
        let mut stack = vec![objects_root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&dir.display().to_string(), e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_error(&dir.display().to_string(), e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| io_error(&path.display().to_string(), e))?;

                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file() {
                    if let Some(key) = relative_key(&objects_root, &path) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

fn io_error(key: &str, e: std::io::Error) -> BlobError {
    BlobError::Io {
        key: key.to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn head(&self, key: &str) -> BlobResult<Option<ObjectMeta>> {
        validate_key(key)?;
        self.read_meta(key).await
    }

    async fn get(&self, key: &str) -> BlobResult<Option<StoredObject>> {
        validate_key(key)?;
        let Some(meta) = self.read_meta(key).await? else {
            return Ok(None);
        };
        match fs::read(self.object_path(key)).await {
            Ok(body) => Ok(Some(StoredObject {
                meta,
                body: Bytes::from(body),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> BlobResult<ObjectMeta> {
        validate_key(key)?;

        let sidecar = Sidecar {
            content_type: content_type.to_string(),
            uploaded: Utc::now(),
        };
        let sidecar_json = serde_json::to_vec(&sidecar)
            .map_err(|e| BlobError::Backend(format!("serializing metadata: {}", e)))?;

        // Metadata first: a body without sidecar still reads back correctly
        self.write_atomic(&self.meta_path(key), &sidecar_json, key)
            .await?;
        self.write_atomic(&self.object_path(key), &body, key).await?;

        tracing::trace!(store = %self.name, key, size = body.len(), "Stored object");

        Ok(ObjectMeta {
            key: key.to_string(),
            size: body.len() as u64,
            content_type: sidecar.content_type,
            uploaded: sidecar.uploaded,
        })
    }

    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> BlobResult<ListPage> {
        let keys = self.walk_keys().await?;
        let matching = keys
            .iter()
            .map(String::as_str)
            .filter(|k| k.starts_with(prefix));
        Ok(paginate(matching, cursor, limit))
    }
}
