//! Database connection.
//!
//! Uses the `sqlx` Any driver so one code path serves Postgres (production,
//! where the embedding worker writes pgvector rows) and SQLite (local runs
//! and tests). Queries stick to the SQL both dialects share, with `$N`
//! placeholders.

use anyhow::{Context, Result};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::time::Duration;

use crate::config::DatabaseConfig;

/// SQL dialect behind a connection URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Postgres,
    Sqlite,
}

impl DbKind {
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else {
            anyhow::bail!("Unsupported database URL scheme: {}", url)
        }
    }
}

/// A pool together with the dialect it speaks.
#[derive(Clone)]
pub struct Database {
    pub pool: AnyPool,
    pub kind: DbKind,
}

pub async fn connect(config: &DatabaseConfig) -> Result<Database> {
    sqlx::any::install_default_drivers();

    let kind = DbKind::from_url(&config.url)?;

    // Each in-memory SQLite connection is its own database.
    let max_connections = if kind == DbKind::Sqlite && config.url.contains(":memory:") {
        1
    } else {
        config.max_connections
    };

    let pool = AnyPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&config.url)
        .await
        .with_context(|| format!("Failed to connect to {:?} database", kind))?;

    Ok(Database { pool, kind })
}
