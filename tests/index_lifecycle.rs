//! Index and document lifecycle against in-memory stores, with failure
//! injection for the create rollback and best-effort status paths.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rag_indices::config::NotificationConfig;
use rag_indices::error::IndexError;
use rag_indices::notify::NotificationBridge;
use rag_indices::service::IndexService;

use rag_indices_core::models::{DocumentStatus, StatusKind};
use rag_indices_core::naming::METADATA_OBJECT;
use rag_indices_core::store::memory::{MemoryObjectStore, MemoryStatusStore};
use rag_indices_core::store::{
    BucketNotification, ObjectInfo, ObjectStore, StatusStore, StoredObject,
};

/// Object store that can be told to fail specific steps.
#[derive(Default)]
struct FlakyObjectStore {
    inner: MemoryObjectStore,
    fail_metadata_put: AtomicBool,
    fail_notification: AtomicBool,
    fail_delete_bucket: AtomicBool,
}

#[async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.inner.bucket_exists(bucket).await
    }
    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.inner.create_bucket(bucket).await
    }
    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        if self.fail_delete_bucket.load(Ordering::SeqCst) {
            return Err(anyhow!("delete_bucket unavailable"));
        }
        self.inner.delete_bucket(bucket).await
    }
    async fn list_buckets(&self) -> Result<Vec<String>> {
        self.inner.list_buckets().await
    }
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        if key == METADATA_OBJECT && self.fail_metadata_put.load(Ordering::SeqCst) {
            return Err(anyhow!("metadata write refused"));
        }
        self.inner.put_object(bucket, key, data, content_type).await
    }
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>> {
        self.inner.get_object(bucket, key).await
    }
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.inner.delete_object(bucket, key).await
    }
    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectInfo>> {
        self.inner.list_objects(bucket).await
    }
    async fn set_bucket_notification(
        &self,
        bucket: &str,
        notification: &BucketNotification,
    ) -> Result<()> {
        if self.fail_notification.load(Ordering::SeqCst) {
            return Err(anyhow!("notification target not configured"));
        }
        self.inner.set_bucket_notification(bucket, notification).await
    }
}

/// Status store whose every call fails.
struct BrokenStatusStore;

#[async_trait]
impl StatusStore for BrokenStatusStore {
    async fn upsert(&self, _status: &DocumentStatus) -> Result<()> {
        Err(anyhow!("status db down"))
    }
    async fn get(&self, _index: &str, _filename: &str) -> Result<Option<DocumentStatus>> {
        Err(anyhow!("status db down"))
    }
    async fn list_for_index(&self, _index: &str) -> Result<Vec<DocumentStatus>> {
        Err(anyhow!("status db down"))
    }
    async fn delete(&self, _index: &str, _filename: &str) -> Result<bool> {
        Err(anyhow!("status db down"))
    }
    async fn delete_for_index(&self, _index: &str) -> Result<u64> {
        Err(anyhow!("status db down"))
    }
}

fn service_with(
    objects: Arc<dyn ObjectStore>,
    statuses: Arc<dyn StatusStore>,
) -> IndexService {
    let bridge = NotificationBridge::new(objects.clone(), NotificationConfig::default());
    IndexService::new(objects, statuses, bridge)
}

fn memory_service() -> (IndexService, Arc<MemoryObjectStore>, Arc<MemoryStatusStore>) {
    let objects = Arc::new(MemoryObjectStore::new());
    let statuses = Arc::new(MemoryStatusStore::new());
    (
        service_with(objects.clone(), statuses.clone()),
        objects,
        statuses,
    )
}

// ============ Indices ============

#[tokio::test]
async fn test_create_then_get_returns_same_fields() {
    let (service, objects, _) = memory_service();

    let created = service.create_index("team-docs", "Runbooks").await.unwrap();
    let fetched = service.get_index("team-docs").await.unwrap();
    assert_eq!(fetched.name, "team-docs");
    assert_eq!(fetched.description, "Runbooks");
    assert_eq!(fetched.created_at, created.created_at);

    // Creation arms the bucket notification.
    let armed = objects.notification("team-docs").unwrap().unwrap();
    assert_eq!(armed.target_arn, "arn:minio:sqs::RAGINDEX:webhook");
}

#[tokio::test]
async fn test_create_rejects_bad_names() {
    let (service, _, _) = memory_service();

    let too_long = "a".repeat(64);
    for name in ["", "Docs", "-docs", "docs-", "my_docs", too_long.as_str()] {
        let err = service.create_index(name, "").await.unwrap_err();
        assert!(
            matches!(err, IndexError::BadRequest(_)),
            "expected BadRequest for {:?}",
            name
        );
    }
    let err = service.create_index("", "").await.unwrap_err();
    assert_eq!(err.to_string(), "Index name is required");
}

#[tokio::test]
async fn test_create_duplicate_is_conflict() {
    let (service, _, _) = memory_service();
    service.create_index("docs", "").await.unwrap();

    let err = service.create_index("docs", "again").await.unwrap_err();
    assert!(matches!(err, IndexError::Conflict(_)));
    assert_eq!(err.to_string(), "RAG index 'docs' already exists");

    // The original description is untouched.
    assert_eq!(service.get_index("docs").await.unwrap().description, "");
}

#[tokio::test]
async fn test_metadata_failure_rolls_back_bucket() {
    let objects = Arc::new(FlakyObjectStore::default());
    objects.fail_metadata_put.store(true, Ordering::SeqCst);
    let service = service_with(objects.clone(), Arc::new(MemoryStatusStore::new()));

    let err = service.create_index("docs", "").await.unwrap_err();
    assert!(matches!(err, IndexError::Internal { .. }));
    assert_eq!(err.to_string(), "Failed to create index metadata");
    assert!(!objects.bucket_exists("docs").await.unwrap());

    // A retry after the fault clears succeeds.
    objects.fail_metadata_put.store(false, Ordering::SeqCst);
    service.create_index("docs", "").await.unwrap();
}

#[tokio::test]
async fn test_notification_failure_rolls_back_bucket() {
    let objects = Arc::new(FlakyObjectStore::default());
    objects.fail_notification.store(true, Ordering::SeqCst);
    let service = service_with(objects.clone(), Arc::new(MemoryStatusStore::new()));

    let err = service.create_index("docs", "").await.unwrap_err();
    assert_eq!(err.to_string(), "Failed to configure index notifications");
    assert!(!objects.bucket_exists("docs").await.unwrap());
}

#[tokio::test]
async fn test_failed_rollback_returns_original_error() {
    let objects = Arc::new(FlakyObjectStore::default());
    objects.fail_metadata_put.store(true, Ordering::SeqCst);
    objects.fail_delete_bucket.store(true, Ordering::SeqCst);
    let service = service_with(objects.clone(), Arc::new(MemoryStatusStore::new()));

    let err = service.create_index("docs", "").await.unwrap_err();
    assert_eq!(err.to_string(), "Failed to create index metadata");

    // The leftover bucket has no metadata, so it is not an index.
    assert!(objects.bucket_exists("docs").await.unwrap());
    assert!(matches!(
        service.get_index("docs").await.unwrap_err(),
        IndexError::NotFound(_)
    ));
    assert!(service.list_indices().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_skips_buckets_without_valid_metadata() {
    let (service, objects, _) = memory_service();
    service.create_index("beta", "").await.unwrap();
    service.create_index("alpha", "").await.unwrap();

    objects.create_bucket("orphan").await.unwrap();
    objects.create_bucket("garbled").await.unwrap();
    objects
        .put_object("garbled", METADATA_OBJECT, b"{not json".to_vec(), "application/json")
        .await
        .unwrap();

    let names: Vec<String> = service
        .list_indices()
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(names, vec!["alpha", "beta"]);
}

#[tokio::test]
async fn test_update_description() {
    let (service, _, _) = memory_service();
    service.create_index("docs", "old").await.unwrap();

    let updated = service.update_index("docs", "new").await.unwrap();
    assert_eq!(updated.description, "new");
    assert_eq!(service.get_index("docs").await.unwrap().description, "new");

    let err = service.update_index("missing", "x").await.unwrap_err();
    assert!(matches!(err, IndexError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_index_cascades() {
    let (service, objects, statuses) = memory_service();
    service.create_index("docs", "").await.unwrap();
    service
        .upload_document("docs", "a.txt", b"alpha".to_vec(), Some("text/plain"))
        .await
        .unwrap();

    service.delete_index("docs").await.unwrap();

    assert!(!objects.bucket_exists("docs").await.unwrap());
    assert!(statuses.list_for_index("docs").await.unwrap().is_empty());
    assert!(matches!(
        service.get_index("docs").await.unwrap_err(),
        IndexError::NotFound(_)
    ));
    assert!(matches!(
        service.list_documents("docs").await.unwrap_err(),
        IndexError::NotFound(_)
    ));
    assert!(matches!(
        service.delete_index("docs").await.unwrap_err(),
        IndexError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_delete_index_removes_metadata_less_bucket() {
    let (service, objects, _) = memory_service();
    objects.create_bucket("orphan").await.unwrap();

    service.delete_index("orphan").await.unwrap();
    assert!(!objects.bucket_exists("orphan").await.unwrap());
}

#[tokio::test]
async fn test_delete_index_survives_status_failure() {
    let objects = Arc::new(MemoryObjectStore::new());
    let service = service_with(objects.clone(), Arc::new(BrokenStatusStore));
    service.create_index("docs", "").await.unwrap();

    service.delete_index("docs").await.unwrap();
    assert!(!objects.bucket_exists("docs").await.unwrap());
}

// ============ Documents ============

#[tokio::test]
async fn test_status_lifecycle() {
    let (service, objects, statuses) = memory_service();
    service.create_index("x", "").await.unwrap();

    let uploaded = service
        .upload_document("x", "doc.txt", b"hello".to_vec(), Some("text/plain"))
        .await
        .unwrap();
    assert_eq!(uploaded.status, Some(StatusKind::Pending));
    assert_eq!(uploaded.size, 5);

    let docs = service.list_documents("x").await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].name, "doc.txt");
    assert_eq!(docs[0].status, Some(StatusKind::Pending));

    service
        .update_document_status("x", "doc.txt", "completed", None)
        .await
        .unwrap();
    let docs = service.list_documents("x").await.unwrap();
    assert_eq!(docs[0].status, Some(StatusKind::Completed));

    service.delete_document("x", "doc.txt").await.unwrap();
    assert!(objects.get_object("x", "doc.txt").await.unwrap().is_none());
    assert!(statuses.get("x", "doc.txt").await.unwrap().is_none());
    assert!(service.list_documents("x").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_status_carries_error_message() {
    let (service, _, _) = memory_service();
    service.create_index("x", "").await.unwrap();
    service
        .upload_document("x", "doc.pdf", b"%PDF".to_vec(), None)
        .await
        .unwrap();

    service
        .update_document_status("x", "doc.pdf", "failed", Some("unreadable".to_string()))
        .await
        .unwrap();

    let docs = service.list_documents("x").await.unwrap();
    assert_eq!(docs[0].status, Some(StatusKind::Failed));
    assert_eq!(docs[0].error_msg.as_deref(), Some("unreadable"));
}

#[tokio::test]
async fn test_folder_markers_are_not_documents() {
    let (service, objects, _) = memory_service();
    service.create_index("x", "").await.unwrap();
    service
        .upload_document("x", "doc.txt", b"hello".to_vec(), None)
        .await
        .unwrap();
    objects
        .put_object("x", "drafts/", Vec::new(), "application/x-directory")
        .await
        .unwrap();

    let docs = service.list_documents("x").await.unwrap();
    let names: Vec<&str> = docs.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["doc.txt"]);

    service.delete_index("x").await.unwrap();
    assert!(!objects.bucket_exists("x").await.unwrap());
}

#[tokio::test]
async fn test_upload_validates_filename_before_index() {
    let (service, _, _) = memory_service();

    // No index exists, yet filename problems win.
    for filename in [METADATA_OBJECT, "notes.exe", "archive"] {
        let err = service
            .upload_document("missing", filename, b"x".to_vec(), None)
            .await
            .unwrap_err();
        assert!(
            matches!(err, IndexError::BadRequest(_)),
            "expected BadRequest for {}",
            filename
        );
    }

    let err = service
        .upload_document("missing", "ok.md", b"x".to_vec(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::NotFound(_)));
}

#[tokio::test]
async fn test_upload_accepts_allowed_extensions() {
    let (service, _, _) = memory_service();
    service.create_index("x", "").await.unwrap();

    for filename in ["a.txt", "b.md", "c.json", "d.csv", "e.docx", "f.PDF"] {
        service
            .upload_document("x", filename, b"x".to_vec(), None)
            .await
            .unwrap();
    }
    assert_eq!(service.list_documents("x").await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_upload_survives_status_failure() {
    let objects = Arc::new(MemoryObjectStore::new());
    let service = service_with(objects.clone(), Arc::new(BrokenStatusStore));
    service.create_index("x", "").await.unwrap();

    service
        .upload_document("x", "doc.txt", b"hello".to_vec(), None)
        .await
        .unwrap();
    assert!(objects.get_object("x", "doc.txt").await.unwrap().is_some());

    // Listing still works without statuses.
    let docs = service.list_documents("x").await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].status, None);

    // Deleting still works; the status delete failure is swallowed.
    service.delete_document("x", "doc.txt").await.unwrap();

    // The explicit status endpoints surface the failure.
    let err = service
        .update_document_status("x", "doc.txt", "completed", None)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Internal { .. }));
    let err = service
        .delete_document_status("x", "doc.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Internal { .. }));
}

#[tokio::test]
async fn test_download_and_reserved_names() {
    let (service, _, _) = memory_service();
    service.create_index("x", "").await.unwrap();
    service
        .upload_document("x", "doc.md", b"# Title".to_vec(), Some("text/markdown"))
        .await
        .unwrap();

    let object = service.download_document("x", "doc.md").await.unwrap();
    assert_eq!(object.data, b"# Title");
    assert_eq!(object.content_type, "text/markdown");

    let err = service.download_document("x", "gone.md").await.unwrap_err();
    assert!(matches!(err, IndexError::NotFound(_)));
    assert_eq!(err.to_string(), "Document not found");

    let err = service
        .download_document("x", METADATA_OBJECT)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::BadRequest(_)));

    let err = service.delete_document("x", METADATA_OBJECT).await.unwrap_err();
    assert!(matches!(err, IndexError::BadRequest(_)));
    assert_eq!(err.to_string(), "Cannot delete reserved file");

    // The metadata object never appears as a document.
    let docs = service.list_documents("x").await.unwrap();
    assert!(docs.iter().all(|d| d.name != METADATA_OBJECT));
}

#[tokio::test]
async fn test_status_update_validation() {
    let (service, _, _) = memory_service();

    let err = service
        .update_document_status("x", "doc.txt", "", None)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Status is required");

    let err = service
        .update_document_status("x", "doc.txt", "exploded", None)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::BadRequest(_)));

    // Status rows do not require the document to exist.
    let record = service
        .update_document_status("x", "doc.txt", "processing", None)
        .await
        .unwrap();
    assert_eq!(record.status, StatusKind::Processing);
}
