//! SQL-backed [`StatusStore`].
//!
//! One row per `(index_name, filename)` in `document_status`. The external
//! embedding worker drives transitions through the status-update endpoint;
//! this store only persists what it is told.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::any::AnyRow;
use sqlx::Row;

use rag_indices_core::models::{DocumentStatus, StatusKind};
use rag_indices_core::store::StatusStore;

use crate::db::Database;

pub struct SqlStatusStore {
    db: Database,
}

impl SqlStatusStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn row_to_status(row: &AnyRow) -> Result<DocumentStatus> {
    let status: String = row.try_get("status")?;
    Ok(DocumentStatus {
        id: row.try_get("id")?,
        index_name: row.try_get("index_name")?,
        filename: row.try_get("filename")?,
        status: status.parse::<StatusKind>()?,
        error_msg: row.try_get("error_msg")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const SELECT_COLUMNS: &str =
    "SELECT id, index_name, filename, status, error_msg, created_at, updated_at FROM document_status";

#[async_trait]
impl StatusStore for SqlStatusStore {
    async fn upsert(&self, status: &DocumentStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO document_status
                (id, index_name, filename, status, error_msg, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (index_name, filename) DO UPDATE SET
                status = excluded.status,
                error_msg = excluded.error_msg,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&status.id)
        .bind(&status.index_name)
        .bind(&status.filename)
        .bind(status.status.as_str())
        .bind(status.error_msg.clone())
        .bind(status.created_at)
        .bind(status.updated_at)
        .execute(&self.db.pool)
        .await
        .with_context(|| {
            format!(
                "Failed to upsert status for {}/{}",
                status.index_name, status.filename
            )
        })?;
        Ok(())
    }

    async fn get(&self, index_name: &str, filename: &str) -> Result<Option<DocumentStatus>> {
        let row = sqlx::query(&format!(
            "{} WHERE index_name = $1 AND filename = $2",
            SELECT_COLUMNS
        ))
        .bind(index_name)
        .bind(filename)
        .fetch_optional(&self.db.pool)
        .await
        .with_context(|| format!("Failed to read status for {}/{}", index_name, filename))?;

        row.as_ref().map(row_to_status).transpose()
    }

    async fn list_for_index(&self, index_name: &str) -> Result<Vec<DocumentStatus>> {
        let rows = sqlx::query(&format!(
            "{} WHERE index_name = $1 ORDER BY filename",
            SELECT_COLUMNS
        ))
        .bind(index_name)
        .fetch_all(&self.db.pool)
        .await
        .with_context(|| format!("Failed to list statuses for index {}", index_name))?;

        rows.iter().map(row_to_status).collect()
    }

    async fn delete(&self, index_name: &str, filename: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM document_status WHERE index_name = $1 AND filename = $2")
                .bind(index_name)
                .bind(filename)
                .execute(&self.db.pool)
                .await
                .with_context(|| {
                    format!("Failed to delete status for {}/{}", index_name, filename)
                })?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_for_index(&self, index_name: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM document_status WHERE index_name = $1")
            .bind(index_name)
            .execute(&self.db.pool)
            .await
            .with_context(|| format!("Failed to delete statuses for index {}", index_name))?;
        Ok(result.rows_affected())
    }
}
