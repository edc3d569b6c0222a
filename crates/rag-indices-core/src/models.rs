//! Core data models shared by the service, the adapters, and the tools.
//!
//! An [`Index`] is durable only through the metadata object stored in its
//! bucket; a [`Document`] is the object blob itself; a [`DocumentStatus`]
//! is a best-effort side record that may be missing without implying
//! anything about the document.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named, bucket-backed document collection.
///
/// Serialized verbatim as the reserved metadata object of the bucket, so
/// the field names are part of the persisted layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Index {
    /// Create index metadata stamped with the current UTC time.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            created_at: Utc::now(),
        }
    }
}

/// Lightweight index listing entry consumed by the tool reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl From<&Index> for IndexSummary {
    fn from(index: &Index) -> Self {
        Self {
            name: index.name.clone(),
            description: index.description.clone(),
        }
    }
}

/// Processing state of a document in the external embedding pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Pending => "pending",
            StatusKind::Processing => "processing",
            StatusKind::Completed => "completed",
            StatusKind::Failed => "failed",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(StatusKind::Pending),
            "processing" => Ok(StatusKind::Processing),
            "completed" => Ok(StatusKind::Completed),
            "failed" => Ok(StatusKind::Failed),
            other => anyhow::bail!(
                "invalid status '{}': must be one of pending, processing, completed, failed",
                other
            ),
        }
    }
}

/// Side record tracking one document's processing status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStatus {
    pub id: String,
    pub index_name: String,
    pub filename: String,
    pub status: StatusKind,
    pub error_msg: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl DocumentStatus {
    /// Build a fresh record with a random ID and both timestamps set to now.
    pub fn new(
        index_name: impl Into<String>,
        filename: impl Into<String>,
        status: StatusKind,
        error_msg: Option<String>,
    ) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            index_name: index_name.into(),
            filename: filename.into(),
            status,
            error_msg,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A document as reported by listings: blob attributes joined with the
/// optional status record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub name: String,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub last_modified: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

/// One ranked similarity-search hit returned by a query tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHit {
    pub filename: String,
    pub chunk_index: i64,
    pub content: String,
    pub score: f64,
}
