//! # RAG Indices Core
//!
//! Shared logic for RAG indices: the data model, index and document naming
//! rules, the storage seams ([`store::ObjectStore`], [`store::StatusStore`],
//! [`store::VectorStore`]), the [`embedding::Embedder`] seam, in-memory
//! implementations of every seam, and result ranking.
//!
//! This crate contains no tokio, sqlx, HTTP, or other runtime-specific
//! dependencies. Concrete adapters (S3, SQL, embedding providers) live in
//! the `rag-indices` app crate.

pub mod embedding;
pub mod models;
pub mod naming;
pub mod search;
pub mod store;
