//! In-memory implementations of the storage seams.
//!
//! Used by tests and by the `memory` object-store backend for local runs.
//! State lives in `HashMap`s behind `std::sync::RwLock`; vector search is
//! brute-force cosine similarity.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::embedding::cosine_similarity;
use crate::models::{DocumentStatus, QueryHit};

use super::{BucketNotification, ObjectInfo, ObjectStore, StatusStore, StoredObject, VectorStore};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

// ============ Object store ============

struct MemoryObject {
    data: Vec<u8>,
    content_type: String,
    last_modified: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryBucket {
    objects: BTreeMap<String, MemoryObject>,
    notification: Option<BucketNotification>,
}

/// In-memory [`ObjectStore`]. Bucket creation is create-if-absent under a
/// single write lock, so concurrent duplicate creations cannot both succeed.
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: RwLock<BTreeMap<String, MemoryBucket>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The notification configuration currently armed on a bucket.
    pub fn notification(&self, bucket: &str) -> Result<Option<BucketNotification>> {
        let buckets = read(&self.buckets)?;
        Ok(buckets.get(bucket).and_then(|b| b.notification.clone()))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(read(&self.buckets)?.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut buckets = write(&self.buckets)?;
        if buckets.contains_key(bucket) {
            bail!("bucket '{}' already exists", bucket);
        }
        buckets.insert(bucket.to_string(), MemoryBucket::default());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let mut buckets = write(&self.buckets)?;
        if buckets.remove(bucket).is_none() {
            bail!("bucket '{}' does not exist", bucket);
        }
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        Ok(read(&self.buckets)?.keys().cloned().collect())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let mut buckets = write(&self.buckets)?;
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| anyhow!("bucket '{}' does not exist", bucket))?;
        b.objects.insert(
            key.to_string(),
            MemoryObject {
                data,
                content_type: content_type.to_string(),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>> {
        let buckets = read(&self.buckets)?;
        let b = buckets
            .get(bucket)
            .ok_or_else(|| anyhow!("bucket '{}' does not exist", bucket))?;
        Ok(b.objects.get(key).map(|o| StoredObject {
            data: o.data.clone(),
            content_type: o.content_type.clone(),
        }))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let mut buckets = write(&self.buckets)?;
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| anyhow!("bucket '{}' does not exist", bucket))?;
        b.objects.remove(key);
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectInfo>> {
        let buckets = read(&self.buckets)?;
        let b = buckets
            .get(bucket)
            .ok_or_else(|| anyhow!("bucket '{}' does not exist", bucket))?;
        Ok(b.objects
            .iter()
            .map(|(key, o)| ObjectInfo {
                key: key.clone(),
                size: o.data.len() as i64,
                content_type: Some(o.content_type.clone()),
                last_modified: o.last_modified,
            })
            .collect())
    }

    async fn set_bucket_notification(
        &self,
        bucket: &str,
        notification: &BucketNotification,
    ) -> Result<()> {
        let mut buckets = write(&self.buckets)?;
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| anyhow!("bucket '{}' does not exist", bucket))?;
        b.notification = Some(notification.clone());
        Ok(())
    }
}

// ============ Status store ============

/// In-memory [`StatusStore`] keyed by `(index_name, filename)`.
#[derive(Default)]
pub struct MemoryStatusStore {
    rows: RwLock<BTreeMap<(String, String), DocumentStatus>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn upsert(&self, status: &DocumentStatus) -> Result<()> {
        let mut rows = write(&self.rows)?;
        let key = (status.index_name.clone(), status.filename.clone());
        match rows.get_mut(&key) {
            Some(existing) => {
                existing.status = status.status;
                existing.error_msg = status.error_msg.clone();
                existing.updated_at = status.updated_at;
            }
            None => {
                rows.insert(key, status.clone());
            }
        }
        Ok(())
    }

    async fn get(&self, index_name: &str, filename: &str) -> Result<Option<DocumentStatus>> {
        let rows = read(&self.rows)?;
        Ok(rows
            .get(&(index_name.to_string(), filename.to_string()))
            .cloned())
    }

    async fn list_for_index(&self, index_name: &str) -> Result<Vec<DocumentStatus>> {
        let rows = read(&self.rows)?;
        Ok(rows
            .values()
            .filter(|r| r.index_name == index_name)
            .cloned()
            .collect())
    }

    async fn delete(&self, index_name: &str, filename: &str) -> Result<bool> {
        let mut rows = write(&self.rows)?;
        Ok(rows
            .remove(&(index_name.to_string(), filename.to_string()))
            .is_some())
    }

    async fn delete_for_index(&self, index_name: &str) -> Result<u64> {
        let mut rows = write(&self.rows)?;
        let before = rows.len();
        rows.retain(|(index, _), _| index != index_name);
        Ok((before - rows.len()) as u64)
    }
}

// ============ Vector store ============

struct StoredChunk {
    filename: String,
    chunk_index: i64,
    text: String,
    vector: Vec<f32>,
}

/// In-memory [`VectorStore`] with brute-force cosine similarity.
#[derive(Default)]
pub struct InMemoryVectorStore {
    chunks: RwLock<HashMap<String, Vec<StoredChunk>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one embedded chunk to an index.
    pub fn insert(
        &self,
        index_name: &str,
        filename: &str,
        chunk_index: i64,
        text: &str,
        vector: Vec<f32>,
    ) -> Result<()> {
        let mut chunks = write(&self.chunks)?;
        chunks
            .entry(index_name.to_string())
            .or_default()
            .push(StoredChunk {
                filename: filename.to_string(),
                chunk_index,
                text: text.to_string(),
                vector,
            });
        Ok(())
    }

    /// Drop every chunk of an index.
    pub fn clear_index(&self, index_name: &str) -> Result<()> {
        write(&self.chunks)?.remove(index_name);
        Ok(())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(
        &self,
        index_name: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<QueryHit>> {
        let chunks = read(&self.chunks)?;
        let mut hits: Vec<QueryHit> = chunks
            .get(index_name)
            .map(|list| {
                list.iter()
                    .map(|c| QueryHit {
                        filename: c.filename.clone(),
                        chunk_index: c.chunk_index,
                        content: c.text.clone(),
                        score: cosine_similarity(query_vec, &c.vector) as f64,
                    })
                    .collect()
            })
            .unwrap_or_default();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusKind;

    #[tokio::test]
    async fn test_bucket_create_is_exclusive() {
        let store = MemoryObjectStore::new();
        store.create_bucket("docs").await.unwrap();
        assert!(store.create_bucket("docs").await.is_err());
        assert!(store.bucket_exists("docs").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_bucket_removes_objects() {
        let store = MemoryObjectStore::new();
        store.create_bucket("docs").await.unwrap();
        store
            .put_object("docs", "a.txt", b"hello".to_vec(), "text/plain")
            .await
            .unwrap();
        store.delete_bucket("docs").await.unwrap();
        assert!(!store.bucket_exists("docs").await.unwrap());
        assert!(store.list_objects("docs").await.is_err());
    }

    #[tokio::test]
    async fn test_object_roundtrip_and_listing() {
        let store = MemoryObjectStore::new();
        store.create_bucket("docs").await.unwrap();
        store
            .put_object("docs", "b.md", b"# B".to_vec(), "text/markdown")
            .await
            .unwrap();
        store
            .put_object("docs", "a.txt", b"a".to_vec(), "text/plain")
            .await
            .unwrap();

        let obj = store.get_object("docs", "b.md").await.unwrap().unwrap();
        assert_eq!(obj.data, b"# B");
        assert_eq!(obj.content_type, "text/markdown");
        assert!(store.get_object("docs", "zzz.md").await.unwrap().is_none());

        let keys: Vec<String> = store
            .list_objects("docs")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["a.txt", "b.md"]);

        store.delete_object("docs", "a.txt").await.unwrap();
        store.delete_object("docs", "a.txt").await.unwrap();
        assert_eq!(store.list_objects("docs").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_status_upsert_keeps_id() {
        let store = MemoryStatusStore::new();
        let first = DocumentStatus::new("x", "doc.txt", StatusKind::Pending, None);
        store.upsert(&first).await.unwrap();

        let update = DocumentStatus::new(
            "x",
            "doc.txt",
            StatusKind::Failed,
            Some("bad pdf".to_string()),
        );
        store.upsert(&update).await.unwrap();

        let row = store.get("x", "doc.txt").await.unwrap().unwrap();
        assert_eq!(row.id, first.id);
        assert_eq!(row.status, StatusKind::Failed);
        assert_eq!(row.error_msg.as_deref(), Some("bad pdf"));
    }

    #[tokio::test]
    async fn test_status_delete_for_index() {
        let store = MemoryStatusStore::new();
        for (index, file) in [("x", "a.txt"), ("x", "b.txt"), ("y", "a.txt")] {
            store
                .upsert(&DocumentStatus::new(index, file, StatusKind::Pending, None))
                .await
                .unwrap();
        }
        assert_eq!(store.delete_for_index("x").await.unwrap(), 2);
        assert!(store.list_for_index("x").await.unwrap().is_empty());
        assert_eq!(store.list_for_index("y").await.unwrap().len(), 1);
        assert!(store.delete("y", "a.txt").await.unwrap());
        assert!(!store.delete("y", "a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_vector_search_is_scoped_to_index() {
        let store = InMemoryVectorStore::new();
        store
            .insert("a", "one.md", 0, "alpha", vec![1.0, 0.0])
            .unwrap();
        store
            .insert("b", "two.md", 0, "beta", vec![1.0, 0.0])
            .unwrap();
        store
            .insert("a", "three.md", 0, "gamma", vec![0.0, 1.0])
            .unwrap();

        let hits = store.search("a", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].filename, "one.md");
        assert!(hits.iter().all(|h| h.filename != "two.md"));

        assert!(store.search("missing", &[1.0, 0.0], 10).await.unwrap().is_empty());
    }
}
