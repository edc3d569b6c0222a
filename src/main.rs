//! # RAG Indices CLI (`ragx`)
//!
//! ## Usage
//!
//! ```bash
//! ragx --config ./config/ragx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragx migrate` | Create the SQL tables |
//! | `ragx serve api` | Index management API |
//! | `ragx serve tools` | Tool server and reconciler |
//! | `ragx serve all` | Both, in one process |
//! | `ragx indices` | List valid indices |
//! | `ragx query <index> "<text>"` | Query one index |

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use rag_indices::config::{self, Config};
use rag_indices::db;
use rag_indices::embedding::create_provider;
use rag_indices::migrate::run_migrations;
use rag_indices::notify::NotificationBridge;
use rag_indices::object_store_s3::S3ObjectStore;
use rag_indices::reconcile::{HttpIndexSource, IndexSource, Reconciler, ServiceIndexSource};
use rag_indices::server;
use rag_indices::service::IndexService;
use rag_indices::status_store::SqlStatusStore;
use rag_indices::tools::{QueryTool, ToolRegistry};
use rag_indices::vector_store::SqlVectorStore;

use rag_indices_core::store::memory::MemoryObjectStore;
use rag_indices_core::store::{ObjectStore, StatusStore, VectorStore};

/// RAG index management and per-index retrieval tools for agents.
#[derive(Parser)]
#[command(name = "ragx", version)]
struct Cli {
    /// Path to configuration file (TOML). Defaults to `./config/ragx.toml`;
    /// a missing file means built-in defaults plus `RAGX_*` overrides.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the status and embedding tables. Idempotent.
    Migrate,

    /// Start a server.
    Serve {
        #[command(subcommand)]
        target: ServeTarget,
    },

    /// List valid indices.
    Indices,

    /// Query one index through its query tool.
    Query {
        /// Index name.
        index: String,

        /// Query text.
        text: String,

        /// Maximum number of results (default: `reconciler.default_top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ServeTarget {
    /// Index management API on `server.bind`.
    Api,
    /// Tool server and reconciler on `server.tools_bind`.
    Tools,
    /// Both servers; the reconciler lists indices in-process.
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Warnings from the environment overlay are emitted before the
    // configured subscriber exists.
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_writer(std::io::stderr)
        .finish();
    let cfg = tracing::subscriber::with_default(bootstrap, || {
        config::load_config(cli.config.as_deref())
    })?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Migrate => {
            let db = db::connect(&cfg.database).await?;
            run_migrations(&db).await?;
            println!("Migrations applied.");
        }
        Commands::Serve { target } => serve(&cfg, target).await?,
        Commands::Indices => {
            let service = build_service(&cfg).await?;
            let indices = service.list_indices().await?;
            if indices.is_empty() {
                println!("No indices.");
            }
            for index in indices {
                if index.description.is_empty() {
                    println!("{}", index.name);
                } else {
                    println!("{}  {}", index.name, index.description);
                }
            }
        }
        Commands::Query { index, text, top_k } => {
            let db = db::connect(&cfg.database).await?;
            let vectors: Arc<dyn VectorStore> = Arc::new(SqlVectorStore::new(db));
            let embedder = create_provider(&cfg.embedding)?;
            let tool = QueryTool::new(
                &index,
                "",
                cfg.reconciler.default_top_k,
                embedder,
                vectors,
            );
            let response = tool.invoke(&text, top_k).await?;
            if response.results.is_empty() {
                println!("No results.");
            }
            for (rank, hit) in response.results.iter().enumerate() {
                println!(
                    "{}. [{:.4}] {} #{}",
                    rank + 1,
                    hit.score,
                    hit.filename,
                    hit.chunk_index
                );
                println!("   {}", hit.content.replace('\n', " "));
            }
        }
    }

    Ok(())
}

fn build_object_store(cfg: &Config) -> Result<Arc<dyn ObjectStore>> {
    match cfg.object_store.backend.as_str() {
        "s3" => Ok(Arc::new(S3ObjectStore::from_env(&cfg.object_store)?)),
        "memory" => {
            tracing::warn!("using in-memory object store; indices will not persist");
            Ok(Arc::new(MemoryObjectStore::new()))
        }
        other => bail!("Unknown object_store backend: '{}'", other),
    }
}

async fn build_service(cfg: &Config) -> Result<Arc<IndexService>> {
    let objects = build_object_store(cfg)?;
    let db = db::connect(&cfg.database).await?;
    let statuses: Arc<dyn StatusStore> = Arc::new(SqlStatusStore::new(db));
    let bridge = NotificationBridge::new(objects.clone(), cfg.notifications.clone());
    Ok(Arc::new(IndexService::new(objects, statuses, bridge)))
}

async fn build_reconciler(
    cfg: &Config,
    source: Arc<dyn IndexSource>,
) -> Result<Arc<Reconciler>> {
    let db = db::connect(&cfg.database).await?;
    let vectors: Arc<dyn VectorStore> = Arc::new(SqlVectorStore::new(db));
    let embedder = create_provider(&cfg.embedding)?;
    Ok(Arc::new(Reconciler::new(
        source,
        Arc::new(ToolRegistry::new()),
        embedder,
        vectors,
        &cfg.reconciler,
    )))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

async fn serve(cfg: &Config, target: ServeTarget) -> Result<()> {
    match target {
        ServeTarget::Api => {
            let service = build_service(cfg).await?;
            let app = server::api_router(service, cfg.server.max_upload_bytes);
            server::serve(&cfg.server.bind, app, shutdown_signal()).await
        }
        ServeTarget::Tools => {
            let source: Arc<dyn IndexSource> = match &cfg.reconciler.index_api_url {
                Some(url) => Arc::new(HttpIndexSource::new(
                    url,
                    std::time::Duration::from_secs(cfg.reconciler.poll_timeout_secs.max(1)),
                )?),
                None => Arc::new(ServiceIndexSource::new(build_service(cfg).await?)),
            };
            let reconciler = build_reconciler(cfg, source).await?;
            let app = server::tools_router(reconciler.registry().clone());
            let handle = reconciler.spawn();

            let result = server::serve(&cfg.server.tools_bind, app, shutdown_signal()).await;
            handle.shutdown().await;
            result
        }
        ServeTarget::All => {
            let service = build_service(cfg).await?;
            let reconciler =
                build_reconciler(cfg, Arc::new(ServiceIndexSource::new(service.clone()))).await?;

            let api = server::api_router(service, cfg.server.max_upload_bytes);
            let tools = server::tools_router(reconciler.registry().clone());
            let handle = reconciler.spawn();

            let (stop_tx, _) = tokio::sync::broadcast::channel::<()>(1);
            let mut api_stop = stop_tx.subscribe();
            let mut tools_stop = stop_tx.subscribe();
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = stop_tx.send(());
            });

            let result = tokio::try_join!(
                server::serve(&cfg.server.bind, api, async move {
                    let _ = api_stop.recv().await;
                }),
                server::serve(&cfg.server.tools_bind, tools, async move {
                    let _ = tools_stop.recv().await;
                }),
            );
            handle.shutdown().await;
            result.map(|_| ())
        }
    }
}
