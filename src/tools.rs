//! Query tools and the live tool registry.
//!
//! Every valid index gets one [`QueryTool`] named `query-<index>`. The tool
//! embeds the query text, runs a similarity search restricted to its index,
//! and returns ranked hits. Binding is by index name only: if the index is
//! deleted and recreated, the same tool serves whatever now owns the name.
//!
//! [`ToolRegistry`] holds the registered tools behind a `tokio` read/write
//! lock. Lookups clone the tool's `Arc` under the read lock and execute
//! after the guard is released, so an unregistration never waits for, or
//! cancels, invocations already in flight.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use rag_indices_core::embedding::{embed_query, Embedder};
use rag_indices_core::models::QueryHit;
use rag_indices_core::search::rank_hits;
use rag_indices_core::store::VectorStore;

use crate::error::{IndexError, IndexResult, InternalContext};

/// Prefix of every query tool name.
pub const QUERY_TOOL_PREFIX: &str = "query-";

/// Tool name for an index.
pub fn query_tool_name(index_name: &str) -> String {
    format!("{}{}", QUERY_TOOL_PREFIX, index_name)
}

/// Description an agent sees for an index's query tool.
pub fn query_tool_description(index_name: &str, description: &str) -> String {
    if description.trim().is_empty() {
        format!(
            "Query the '{}' RAG index for relevant documents.",
            index_name
        )
    } else {
        description.to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tool trait
// ═══════════════════════════════════════════════════════════════════════

/// A capability callable by agents through `POST /tools/{name}` or MCP.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route name and MCP tool name.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// JSON Schema of the parameters object.
    fn parameters_schema(&self) -> Value;

    /// Execute with a JSON parameters object.
    async fn execute(&self, params: Value) -> IndexResult<Value>;
}

/// Listing entry for `GET /tools/list` and MCP `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

// ═══════════════════════════════════════════════════════════════════════
// QueryTool
// ═══════════════════════════════════════════════════════════════════════

/// Result of one query tool invocation.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub index: String,
    pub query: String,
    pub results: Vec<QueryHit>,
}

pub struct QueryTool {
    index_name: String,
    tool_name: String,
    description: String,
    default_top_k: usize,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
}

impl QueryTool {
    pub fn new(
        index_name: &str,
        description: &str,
        default_top_k: usize,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            index_name: index_name.to_string(),
            tool_name: query_tool_name(index_name),
            description: query_tool_description(index_name, description),
            default_top_k: default_top_k.max(1),
            embedder,
            vectors,
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Embed `query`, search this tool's index, and return up to `top_k`
    /// ranked hits (default from configuration).
    pub async fn invoke(&self, query: &str, top_k: Option<usize>) -> IndexResult<QueryResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Err(IndexError::bad_request("query must not be empty"));
        }
        let top_k = top_k.unwrap_or(self.default_top_k);
        if top_k == 0 {
            return Err(IndexError::bad_request("top_k must be >= 1"));
        }

        let query_vec = embed_query(self.embedder.as_ref(), query)
            .await
            .internal("Failed to embed query")?;

        let hits = self
            .vectors
            .search(&self.index_name, &query_vec, top_k)
            .await
            .internal("Failed to search index")?;

        let results = rank_hits(hits, top_k);
        tracing::debug!(index = %self.index_name, hits = results.len(), "query tool invoked");

        Ok(QueryResponse {
            index: self.index_name.clone(),
            query: query.to_string(),
            results,
        })
    }
}

#[async_trait]
impl Tool for QueryTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Text to search for"
                },
                "top_k": {
                    "type": "integer",
                    "minimum": 1,
                    "default": self.default_top_k,
                    "description": "Maximum number of results"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> IndexResult<Value> {
        let query = params
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| IndexError::bad_request("missing required parameter: query"))?;

        let top_k = match params.get("top_k") {
            None | Some(Value::Null) => None,
            Some(v) => match v.as_u64() {
                Some(k) if k >= 1 => Some(k as usize),
                _ => return Err(IndexError::bad_request("top_k must be an integer >= 1")),
            },
        };

        let response = self.invoke(query, top_k).await?;
        serde_json::to_value(response)
            .map_err(|e| IndexError::internal("Failed to encode query results", e))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// ToolRegistry
// ═══════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().await.insert(name, tool);
    }

    /// Remove a tool. Returns whether it was registered.
    pub async fn unregister(&self, name: &str) -> bool {
        self.tools.write().await.remove(name).is_some()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub async fn names(&self) -> Vec<String> {
        self.tools.read().await.keys().cloned().collect()
    }

    /// Snapshot of every registered tool, sorted by name.
    pub async fn snapshot(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.read().await.values().cloned().collect()
    }

    pub async fn list(&self) -> Vec<ToolInfo> {
        self.snapshot()
            .await
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }

    /// Invoke a tool by name. Unknown names are `NotFound`.
    pub async fn invoke(&self, name: &str, params: Value) -> IndexResult<Value> {
        let tool = self
            .get(name)
            .await
            .ok_or_else(|| IndexError::not_found(format!("no tool registered with name: {}", name)))?;
        tool.execute(params).await
    }
}
