use anyhow::Result;

use crate::db::{Database, DbKind};

/// Create the status table (and, on SQLite, the local embeddings table).
///
/// Idempotent. On Postgres the `document_embeddings` table belongs to the
/// embedding worker and is left alone.
pub async fn run_migrations(db: &Database) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_status (
            id TEXT PRIMARY KEY,
            index_name TEXT NOT NULL,
            filename TEXT NOT NULL,
            status TEXT NOT NULL,
            error_msg TEXT,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL,
            UNIQUE(index_name, filename)
        )
        "#,
    )
    .execute(&db.pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_status_index ON document_status(index_name)",
    )
    .execute(&db.pool)
    .await?;

    if db.kind == DbKind::Sqlite {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_embeddings (
                index_name TEXT NOT NULL,
                filename TEXT NOT NULL,
                chunk_index BIGINT NOT NULL,
                chunk_text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                UNIQUE(index_name, filename, chunk_index)
            )
            "#,
        )
        .execute(&db.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_document_embeddings_index ON document_embeddings(index_name)",
        )
        .execute(&db.pool)
        .await?;
    }

    Ok(())
}
