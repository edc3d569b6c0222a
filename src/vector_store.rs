//! SQL-backed [`VectorStore`].
//!
//! Reads the `document_embeddings` table the embedding worker fills:
//!
//! - **Postgres**: pgvector cosine distance, `1 - (embedding <=> $query)`,
//!   computed and ordered by the database.
//! - **SQLite**: embeddings stored as little-endian `f32` blobs; all chunks
//!   of the index are fetched and scored in Rust.
//!
//! Either way results are restricted to one index.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;

use rag_indices_core::embedding::{
    blob_to_vec, cosine_similarity, vec_to_blob, vec_to_pgvector_literal,
};
use rag_indices_core::models::QueryHit;
use rag_indices_core::store::VectorStore;

use crate::db::{Database, DbKind};

pub struct SqlVectorStore {
    db: Database,
}

impl SqlVectorStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Write one embedded chunk. Replaces an existing chunk with the same
    /// `(index_name, filename, chunk_index)`.
    ///
    /// The embedding worker owns this table in production; this is used for
    /// local seeding and tests.
    pub async fn upsert_chunk(
        &self,
        index_name: &str,
        filename: &str,
        chunk_index: i64,
        chunk_text: &str,
        embedding: &[f32],
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM document_embeddings WHERE index_name = $1 AND filename = $2 AND chunk_index = $3",
        )
        .bind(index_name)
        .bind(filename)
        .bind(chunk_index)
        .execute(&self.db.pool)
        .await?;

        let insert = match self.db.kind {
            DbKind::Postgres => sqlx::query(
                "INSERT INTO document_embeddings (index_name, filename, chunk_index, chunk_text, embedding) \
                 VALUES ($1, $2, $3, $4, $5::vector)",
            )
            .bind(index_name)
            .bind(filename)
            .bind(chunk_index)
            .bind(chunk_text)
            .bind(vec_to_pgvector_literal(embedding)),
            DbKind::Sqlite => sqlx::query(
                "INSERT INTO document_embeddings (index_name, filename, chunk_index, chunk_text, embedding) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(index_name)
            .bind(filename)
            .bind(chunk_index)
            .bind(chunk_text)
            .bind(vec_to_blob(embedding)),
        };

        insert
            .execute(&self.db.pool)
            .await
            .with_context(|| format!("Failed to store chunk {}/{}#{}", index_name, filename, chunk_index))?;
        Ok(())
    }

    async fn search_postgres(
        &self,
        index_name: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<QueryHit>> {
        let rows = sqlx::query(
            r#"
            SELECT filename, chunk_index, chunk_text,
                   CAST(1 - (embedding <=> $1::vector) AS DOUBLE PRECISION) AS similarity
            FROM document_embeddings
            WHERE index_name = $2
            ORDER BY embedding <=> $1::vector
            LIMIT $3
            "#,
        )
        .bind(vec_to_pgvector_literal(query_vec))
        .bind(index_name)
        .bind(limit as i64)
        .fetch_all(&self.db.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(QueryHit {
                    filename: row.try_get("filename")?,
                    chunk_index: row.try_get("chunk_index")?,
                    content: row.try_get("chunk_text")?,
                    score: row.try_get("similarity")?,
                })
            })
            .collect()
    }

    async fn search_sqlite(
        &self,
        index_name: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<QueryHit>> {
        let rows = sqlx::query(
            "SELECT filename, chunk_index, chunk_text, embedding FROM document_embeddings WHERE index_name = $1",
        )
        .bind(index_name)
        .fetch_all(&self.db.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let vector = blob_to_vec(&blob);
            hits.push(QueryHit {
                filename: row.try_get("filename")?,
                chunk_index: row.try_get("chunk_index")?,
                content: row.try_get("chunk_text")?,
                score: cosine_similarity(query_vec, &vector) as f64,
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

#[async_trait]
impl VectorStore for SqlVectorStore {
    async fn search(
        &self,
        index_name: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<QueryHit>> {
        let hits = match self.db.kind {
            DbKind::Postgres => self.search_postgres(index_name, query_vec, limit).await,
            DbKind::Sqlite => self.search_sqlite(index_name, query_vec, limit).await,
        };
        hits.with_context(|| format!("Vector search failed for index {}", index_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::{db, migrate};

    async fn store() -> SqlVectorStore {
        let db = db::connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        })
        .await
        .unwrap();
        migrate::run_migrations(&db).await.unwrap();
        SqlVectorStore::new(db)
    }

    #[tokio::test]
    async fn test_sqlite_search_ranks_and_scopes() {
        let store = store().await;
        store
            .upsert_chunk("a", "close.md", 0, "close", &[1.0, 0.1])
            .await
            .unwrap();
        store
            .upsert_chunk("a", "far.md", 0, "far", &[0.0, 1.0])
            .await
            .unwrap();
        store
            .upsert_chunk("b", "other.md", 0, "other", &[1.0, 0.0])
            .await
            .unwrap();

        let hits = store.search("a", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].filename, "close.md");
        assert_eq!(hits[0].content, "close");
        assert!(hits[0].score > hits[1].score);

        let limited = store.search("a", &[1.0, 0.0], 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_chunk_replaces() {
        let store = store().await;
        store
            .upsert_chunk("a", "doc.md", 0, "old", &[1.0, 0.0])
            .await
            .unwrap();
        store
            .upsert_chunk("a", "doc.md", 0, "new", &[1.0, 0.0])
            .await
            .unwrap();

        let hits = store.search("a", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "new");
    }
}
