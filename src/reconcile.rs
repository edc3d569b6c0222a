//! Periodic reconciliation of query tools against the live index set.
//!
//! Each cycle:
//!
//! 1. polls the index set from an [`IndexSource`] under a bounded timeout;
//! 2. diffs it against the query tools currently in the [`ToolRegistry`]
//!    ([`plan_changes`]);
//! 3. registers tools for new indices, re-registers tools whose index
//!    description changed, and unregisters tools whose index disappeared.
//!
//! A failed or timed-out poll changes nothing; the next tick retries.
//!
//! At most one cycle runs at a time. The periodic task awaits each cycle
//! before taking the next tick and skips missed ticks, and
//! [`Reconciler::run_cycle`] itself refuses to start while another cycle is
//! in progress, reporting [`CycleOutcome::Skipped`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use rag_indices_core::embedding::Embedder;
use rag_indices_core::models::IndexSummary;
use rag_indices_core::naming::is_valid_index_name;
use rag_indices_core::store::VectorStore;

use crate::config::ReconcilerConfig;
use crate::service::IndexService;
use crate::tools::{query_tool_description, QueryTool, ToolRegistry, QUERY_TOOL_PREFIX};

// ═══════════════════════════════════════════════════════════════════════
// Index sources
// ═══════════════════════════════════════════════════════════════════════

/// Where the reconciler observes the live index set.
#[async_trait]
pub trait IndexSource: Send + Sync {
    async fn list_indices(&self) -> Result<Vec<IndexSummary>>;
}

/// Lists indices through the management API: `GET <base>/api/indices`.
pub struct HttpIndexSource {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<Vec<IndexSummary>>,
}

impl HttpIndexSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/api/indices", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl IndexSource for HttpIndexSource {
    async fn list_indices(&self) -> Result<Vec<IndexSummary>> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", self.url))?;

        if !resp.status().is_success() {
            bail!("GET {} failed (HTTP {})", self.url, resp.status());
        }

        let envelope: Envelope = resp
            .json()
            .await
            .with_context(|| format!("Invalid index listing from {}", self.url))?;
        Ok(envelope.data.unwrap_or_default())
    }
}

/// Lists indices from an in-process [`IndexService`].
pub struct ServiceIndexSource {
    service: Arc<IndexService>,
}

impl ServiceIndexSource {
    pub fn new(service: Arc<IndexService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl IndexSource for ServiceIndexSource {
    async fn list_indices(&self) -> Result<Vec<IndexSummary>> {
        Ok(self.service.list_index_summaries().await?)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Planning
// ═══════════════════════════════════════════════════════════════════════

/// Changes one cycle applies to the registry. All lists are sorted by
/// index name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub register: Vec<IndexSummary>,
    /// Registered indices whose description changed.
    pub reregister: Vec<IndexSummary>,
    /// Index names no longer observed.
    pub unregister: Vec<String>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.register.is_empty() && self.reregister.is_empty() && self.unregister.is_empty()
    }
}

/// Diff observed indices against registered tools.
///
/// `registered` maps index name to the description its tool currently
/// carries. Observed entries with invalid names are ignored; duplicates
/// keep their first occurrence.
pub fn plan_changes(
    observed: &[IndexSummary],
    registered: &BTreeMap<String, String>,
) -> ReconcilePlan {
    let mut seen: BTreeMap<&str, &IndexSummary> = BTreeMap::new();
    for index in observed {
        if is_valid_index_name(&index.name) {
            seen.entry(index.name.as_str()).or_insert(index);
        }
    }

    let mut plan = ReconcilePlan::default();
    for (name, index) in &seen {
        match registered.get(*name) {
            None => plan.register.push((*index).clone()),
            Some(current) => {
                if *current != query_tool_description(name, &index.description) {
                    plan.reregister.push((*index).clone());
                }
            }
        }
    }

    let observed_names: BTreeSet<&str> = seen.keys().copied().collect();
    plan.unregister = registered
        .keys()
        .filter(|name| !observed_names.contains(name.as_str()))
        .cloned()
        .collect();

    plan
}

// ═══════════════════════════════════════════════════════════════════════
// Reconciler
// ═══════════════════════════════════════════════════════════════════════

/// Counts and names from one applied cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub registered: Vec<String>,
    pub reregistered: Vec<String>,
    pub unregistered: Vec<String>,
    /// Query tools registered after the cycle.
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Applied(ReconcileReport),
    /// Another cycle was in progress.
    Skipped,
    /// The index source failed or timed out; nothing changed.
    PollFailed,
}

pub struct Reconciler {
    source: Arc<dyn IndexSource>,
    registry: Arc<ToolRegistry>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    default_top_k: usize,
    interval: Duration,
    poll_timeout: Duration,
    running: AtomicBool,
}

/// Clears the in-progress flag when a cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn IndexSource>,
        registry: Arc<ToolRegistry>,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        config: &ReconcilerConfig,
    ) -> Self {
        Self {
            source,
            registry,
            embedder,
            vectors,
            default_top_k: config.default_top_k,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            poll_timeout: Duration::from_secs(config.poll_timeout_secs.max(1)),
            running: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Index name → description of every registered query tool.
    async fn registered_indices(&self) -> BTreeMap<String, String> {
        self.registry
            .snapshot()
            .await
            .iter()
            .filter_map(|tool| {
                tool.name()
                    .strip_prefix(QUERY_TOOL_PREFIX)
                    .map(|index| (index.to_string(), tool.description().to_string()))
            })
            .collect()
    }

    fn build_tool(&self, index: &IndexSummary) -> Arc<QueryTool> {
        Arc::new(QueryTool::new(
            &index.name,
            &index.description,
            self.default_top_k,
            self.embedder.clone(),
            self.vectors.clone(),
        ))
    }

    /// Run one reconciliation cycle.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("reconcile cycle already in progress, skipping");
            return CycleOutcome::Skipped;
        }
        let _guard = CycleGuard(&self.running);

        let observed = match tokio::time::timeout(self.poll_timeout, self.source.list_indices()).await
        {
            Ok(Ok(indices)) => indices,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "failed to poll indices; keeping current tools");
                return CycleOutcome::PollFailed;
            }
            Err(_) => {
                tracing::warn!(timeout_secs = self.poll_timeout.as_secs(), "index poll timed out; keeping current tools");
                return CycleOutcome::PollFailed;
            }
        };

        let registered = self.registered_indices().await;
        let plan = plan_changes(&observed, &registered);

        let mut report = ReconcileReport::default();
        for index in &plan.register {
            self.registry.register(self.build_tool(index)).await;
            tracing::info!(index = %index.name, "registered query tool");
            report.registered.push(index.name.clone());
        }
        for index in &plan.reregister {
            self.registry.register(self.build_tool(index)).await;
            tracing::info!(index = %index.name, "re-registered query tool with new description");
            report.reregistered.push(index.name.clone());
        }
        for name in &plan.unregister {
            self.registry
                .unregister(&format!("{}{}", QUERY_TOOL_PREFIX, name))
                .await;
            tracing::info!(index = %name, "unregistered query tool");
            report.unregistered.push(name.clone());
        }
        report.total = self.registered_indices().await.len();

        if plan.is_empty() {
            tracing::debug!(total = report.total, "reconcile cycle: no changes");
        } else {
            tracing::info!(
                registered = report.registered.len(),
                reregistered = report.reregistered.len(),
                unregistered = report.unregistered.len(),
                total = report.total,
                "reconcile cycle applied"
            );
        }

        CycleOutcome::Applied(report)
    }

    /// Start the periodic task. The first cycle runs immediately.
    pub fn spawn(self: Arc<Self>) -> ReconcilerHandle {
        let shutdown = Arc::new(Notify::new());
        let stop = shutdown.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_secs = self.interval.as_secs(), "tool reconciler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                    _ = stop.notified() => break,
                }
            }

            tracing::info!("tool reconciler stopped");
        });

        ReconcilerHandle { shutdown, join }
    }
}

/// Handle to a running reconciler task.
pub struct ReconcilerHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Stop the task after any in-progress cycle and wait for it to exit.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "reconciler task failed");
        }
    }
}
