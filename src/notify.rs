//! Bucket event hook that triggers asynchronous embedding.
//!
//! Arming writes a notification configuration on the index bucket so that
//! object creations and removals are delivered to the embedding worker's
//! webhook. The target is named by a fixed token that must match the object
//! store's `MINIO_NOTIFY_WEBHOOK_ENABLE_<TOKEN>` setting:
//!
//! ```text
//! arn:minio:sqs:<region>:<TOKEN>:webhook
//! ```
//!
//! Delivery is fire-and-forget; only the arming call's outcome is observed.
//! Re-arming replaces the configuration, and deleting the bucket drops it.

use anyhow::Result;
use std::sync::Arc;

use rag_indices_core::store::{BucketNotification, ObjectStore};

use crate::config::NotificationConfig;

pub struct NotificationBridge {
    store: Arc<dyn ObjectStore>,
    config: NotificationConfig,
}

impl NotificationBridge {
    pub fn new(store: Arc<dyn ObjectStore>, config: NotificationConfig) -> Self {
        Self { store, config }
    }

    pub fn target_arn(&self) -> String {
        format!(
            "arn:minio:sqs:{}:{}:{}",
            self.config.region, self.config.target_id, self.config.target_type
        )
    }

    /// The notification configuration installed on `bucket`.
    pub fn notification_for(&self, bucket: &str) -> BucketNotification {
        BucketNotification {
            id: format!("{}-{}", bucket, self.config.target_id.to_ascii_lowercase()),
            target_arn: self.target_arn(),
            events: self.config.events.clone(),
        }
    }

    /// Install the event hook on `bucket`. Idempotent.
    pub async fn arm(&self, bucket: &str) -> Result<()> {
        let notification = self.notification_for(bucket);
        self.store
            .set_bucket_notification(bucket, &notification)
            .await?;
        tracing::debug!(index = %bucket, target = %notification.target_arn, "armed bucket notification");
        Ok(())
    }
}
