//! Storage seams for RAG indices.
//!
//! Three independently failing stores back the system:
//!
//! | Trait | Holds | Authority |
//! |-------|-------|-----------|
//! | [`ObjectStore`] | buckets, metadata object, document blobs | source of truth for existence |
//! | [`StatusStore`] | per-document processing status rows | best-effort companion |
//! | [`VectorStore`] | chunk embeddings written by the external worker | read-only here |
//!
//! Implementations must be `Send + Sync`; all operations are async via
//! `async-trait`. In-memory implementations live in [`memory`].

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{DocumentStatus, QueryHit};

/// Listing entry for one object in a bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: i64,
    /// Not every backend reports content type in listings.
    pub content_type: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// An object's bytes together with its stored content type.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// Bucket event hook: deliver the listed events to a notification target.
///
/// `target_arn` follows the object store's convention, e.g.
/// `arn:minio:sqs::RAGINDEX:webhook` for a MinIO webhook target enabled by
/// `MINIO_NOTIFY_WEBHOOK_ENABLE_RAGINDEX`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketNotification {
    pub id: String,
    pub target_arn: String,
    pub events: Vec<String>,
}

/// Object storage: one bucket per index.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Check whether a bucket exists.
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Create a bucket. Fails if it cannot be created.
    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    /// Remove every object in the bucket, then the bucket itself.
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    /// List all bucket names.
    async fn list_buckets(&self) -> Result<Vec<String>>;

    /// Store an object, replacing any previous content under `key`.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    /// Fetch an object. Returns `Ok(None)` when the key does not exist.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// List every object in the bucket.
    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectInfo>>;

    /// Install (or replace) the bucket's event notification configuration.
    async fn set_bucket_notification(
        &self,
        bucket: &str,
        notification: &BucketNotification,
    ) -> Result<()>;
}

/// Relational side-index of document processing status, keyed by
/// `(index_name, filename)`.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Insert the record, or update status, error message, and
    /// `updated_at` of the existing row for the same key.
    async fn upsert(&self, status: &DocumentStatus) -> Result<()>;

    /// Fetch the row for one document.
    async fn get(&self, index_name: &str, filename: &str) -> Result<Option<DocumentStatus>>;

    /// All rows for an index, ordered by filename.
    async fn list_for_index(&self, index_name: &str) -> Result<Vec<DocumentStatus>>;

    /// Delete one row. Returns whether a row was removed.
    async fn delete(&self, index_name: &str, filename: &str) -> Result<bool>;

    /// Delete every row of an index. Returns the number of rows removed.
    async fn delete_for_index(&self, index_name: &str) -> Result<u64>;
}

/// Similarity search over chunk embeddings, scoped to one index.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return up to `limit` candidate hits for `index_name` ordered by
    /// similarity to `query_vec`.
    async fn search(&self, index_name: &str, query_vec: &[f32], limit: usize)
        -> Result<Vec<QueryHit>>;
}
