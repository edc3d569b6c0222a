//! # RAG Indices
//!
//! Index lifecycle management and per-index retrieval tools for agents.
//!
//! An *index* is a named object-store bucket holding documents plus a
//! reserved `.metadata.json`. Uploads arm a bucket notification so an
//! external embedding worker can chunk and embed each document, reporting
//! progress back through the status API. A reconciler keeps one
//! `query-<index>` tool registered per live index and serves the tools over
//! HTTP and MCP.
//!
//! ## Architecture
//!
//! ```text
//!  HTTP /api ──▶ IndexService ──▶ ObjectStore (buckets, blobs)
//!                    │        └─▶ StatusStore (document_status)
//!                    └─▶ NotificationBridge ──▶ bucket events ──▶ embedding worker
//!                                                                      │
//!                                                          document_embeddings
//!                                                                      │
//!  Reconciler ──poll──▶ index listing                                  ▼
//!      └──▶ ToolRegistry ──▶ QueryTool ──embed──▶ VectorStore::search
//!                 ▲
//!  HTTP /tools, /mcp
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragx migrate                       # create SQL tables
//! ragx serve all                     # index API + tool server
//! ragx indices                       # list valid indices
//! ragx query docs "rotation policy"  # one-off query
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overlay |
//! | [`error`] | Error taxonomy and HTTP mapping |
//! | [`db`] | SQL connection pool |
//! | [`migrate`] | Schema creation |
//! | [`object_store_s3`] | S3-compatible object store |
//! | [`status_store`] | SQL document status store |
//! | [`vector_store`] | SQL similarity search |
//! | [`embedding`] | Embedding providers |
//! | [`notify`] | Bucket notification arming |
//! | [`service`] | Index and document lifecycle |
//! | [`tools`] | Query tools and the tool registry |
//! | [`reconcile`] | Periodic tool reconciliation |
//! | [`mcp`] | MCP protocol bridge |
//! | [`server`] | HTTP routers |

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod mcp;
pub mod migrate;
pub mod notify;
pub mod object_store_s3;
pub mod reconcile;
pub mod server;
pub mod service;
pub mod status_store;
pub mod tools;
pub mod vector_store;
