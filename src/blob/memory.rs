use super::{paginate, validate_key, BlobResult, BlobStore, ListPage, ObjectMeta, StoredObject};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;

/// Number of calls made to each operation of a [`MemoryBlobStore`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub head: usize,
    pub get: usize,
    pub put: usize,
    pub list: usize,
}

/// In-memory blob store
///
/// Backs the `memory` store backend and every orchestration test. Call
/// counters make "was this work repeated?" observable.
pub struct MemoryBlobStore {
    name: String,
    objects: RwLock<BTreeMap<String, StoredObject>>,
    head_calls: AtomicUsize,
    get_calls: AtomicUsize,
    put_calls: AtomicUsize,
    list_calls: AtomicUsize,
    puts_by_key: Mutex<HashMap<String, usize>>,
}

impl MemoryBlobStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: RwLock::new(BTreeMap::new()),
            head_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            puts_by_key: Mutex::new(HashMap::new()),
        }
    }

    pub fn op_counts(&self) -> OpCounts {
        OpCounts {
            head: self.head_calls.load(Ordering::SeqCst),
            get: self.get_calls.load(Ordering::SeqCst),
            put: self.put_calls.load(Ordering::SeqCst),
            list: self.list_calls.load(Ordering::SeqCst),
        }
    }

    /// How many times `key` has been written
    pub fn puts_for(&self, key: &str) -> usize {
        let puts = self.puts_by_key.lock().unwrap_or_else(|e| e.into_inner());
        puts.get(key).copied().unwrap_or(0)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn head(&self, key: &str) -> BlobResult<Option<ObjectMeta>> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        validate_key(key)?;
        Ok(self.objects.read().await.get(key).map(|o| o.meta.clone()))
    }

    async fn get(&self, key: &str) -> BlobResult<Option<StoredObject>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        validate_key(key)?;
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> BlobResult<ObjectMeta> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        validate_key(key)?;

        let meta = ObjectMeta {
            key: key.to_string(),
            size: body.len() as u64,
            content_type: content_type.to_string(),
            uploaded: Utc::now(),
        };
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                meta: meta.clone(),
                body,
            },
        );

        let mut puts = self.puts_by_key.lock().unwrap_or_else(|e| e.into_inner());
        *puts.entry(key.to_string()).or_insert(0) += 1;

        Ok(meta)
    }

    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> BlobResult<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.read().await;
        let keys = objects
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .map(|(k, _)| k.as_str())
            .take_while(|k| k.starts_with(prefix));
        Ok(paginate(keys, cursor, limit))
    }
}
