//! End-to-end HTTP tests: a real server on a free port, driven with reqwest.

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;

use rag_indices::config::NotificationConfig;
use rag_indices::notify::NotificationBridge;
use rag_indices::server::{api_router, tools_router};
use rag_indices::service::IndexService;
use rag_indices::tools::{QueryTool, ToolRegistry};

use rag_indices_core::embedding::Embedder;
use rag_indices_core::store::memory::{InMemoryVectorStore, MemoryObjectStore, MemoryStatusStore};

/// Start `app` on an ephemeral port and return its base URL.
async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let base = format!("http://{}", addr);
    wait_for_server(&base).await;
    base
}

async fn wait_for_server(base: &str) {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if client
            .get(format!("{}/health", base))
            .send()
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("server at {} did not come up", base);
}

async fn api_server(max_upload_bytes: usize) -> String {
    let objects = Arc::new(MemoryObjectStore::new());
    let bridge = NotificationBridge::new(objects.clone(), NotificationConfig::default());
    let service = Arc::new(IndexService::new(
        objects,
        Arc::new(MemoryStatusStore::new()),
        bridge,
    ));
    spawn_server(api_router(service, max_upload_bytes)).await
}

fn file_form(filename: &str, content: &[u8], mime: &str) -> reqwest::multipart::Form {
    let part = reqwest::multipart::Part::bytes(content.to_vec())
        .file_name(filename.to_string())
        .mime_str(mime)
        .unwrap();
    reqwest::multipart::Form::new().part("file", part)
}

#[tokio::test]
async fn test_health() {
    let base = api_server(1024).await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_index_crud() {
    let base = api_server(1024 * 1024).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/indices", base))
        .json(&json!({"name": "docs", "description": "Runbooks"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], false);
    assert_eq!(body["data"]["name"], "docs");
    assert!(body["data"]["created_at"].is_string());

    let resp = client
        .post(format!("{}/api/indices", base))
        .json(&json!({"name": "docs"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "RAG index 'docs' already exists");

    let resp = client
        .post(format!("{}/api/indices", base))
        .json(&json!({"name": "Bad_Name"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .put(format!("{}/api/indices/docs", base))
        .json(&json!({"description": "Current runbooks"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = client
        .get(format!("{}/api/indices", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["description"], "Current runbooks");

    let resp = client
        .delete(format!("{}/api/indices/docs", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{}/api/indices/docs", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .delete(format!("{}/api/indices/docs", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_document_flow() {
    let base = api_server(1024 * 1024).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/indices", base))
        .json(&json!({"name": "x"}))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("{}/api/indices/x/upload", base))
        .multipart(file_form("doc.txt", b"hello world", "text/plain"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["name"], "doc.txt");
    assert_eq!(body["data"]["status"], "pending");

    let resp = client
        .put(format!("{}/api/indices/x/documents/doc.txt/status", base))
        .json(&json!({"status": "completed"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = client
        .get(format!("{}/api/indices/x/documents", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let docs = body["data"].as_array().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["name"], "doc.txt");
    assert_eq!(docs[0]["size"], 11);
    assert_eq!(docs[0]["status"], "completed");

    let resp = client
        .get(format!("{}/api/indices/x/documents/doc.txt", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "text/plain");
    assert_eq!(
        resp.headers()["content-disposition"],
        "attachment; filename=\"doc.txt\""
    );
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"hello world");

    let resp = client
        .delete(format!("{}/api/indices/x/documents/doc.txt", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{}/api/indices/x/documents/doc.txt", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_upload_rejections() {
    let base = api_server(1024).await;
    let client = reqwest::Client::new();
    client
        .post(format!("{}/api/indices", base))
        .json(&json!({"name": "x"}))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("{}/api/indices/x/upload", base))
        .multipart(file_form("tool.exe", b"MZ", "application/octet-stream"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/api/indices/x/upload", base))
        .multipart(file_form(".metadata.json", b"{}", "application/json"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let form = reqwest::multipart::Form::new().text("note", "no file here");
    let resp = client
        .post(format!("{}/api/indices/x/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Missing file in request");

    let resp = client
        .post(format!("{}/api/indices/missing/upload", base))
        .multipart(file_form("doc.txt", b"x", "text/plain"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("{}/api/indices/x/upload", base))
        .multipart(file_form("big.txt", &vec![b'a'; 8 * 1024], "text/plain"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "File exceeds the maximum upload size");
}

#[tokio::test]
async fn test_upload_size_boundary() {
    let base = api_server(4096).await;
    let client = reqwest::Client::new();
    client
        .post(format!("{}/api/indices", base))
        .json(&json!({"name": "x"}))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("{}/api/indices/x/upload", base))
        .multipart(file_form("exact.txt", &vec![b'a'; 4096], "text/plain"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["size"], 4096);

    let resp = client
        .post(format!("{}/api/indices/x/upload", base))
        .multipart(file_form("over.txt", &vec![b'a'; 4097], "text/plain"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "File exceeds the maximum upload size");
}

#[tokio::test]
async fn test_reserved_document_paths() {
    let base = api_server(1024).await;
    let client = reqwest::Client::new();
    client
        .post(format!("{}/api/indices", base))
        .json(&json!({"name": "x"}))
        .send()
        .await
        .unwrap();

    let resp = client
        .get(format!("{}/api/indices/x/documents/.metadata.json", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .delete(format!("{}/api/indices/x/documents/.metadata.json", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // The index is untouched.
    let resp = client
        .get(format!("{}/api/indices/x", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_status_validation() {
    let base = api_server(1024).await;
    let client = reqwest::Client::new();

    let resp = client
        .put(format!("{}/api/indices/x/documents/doc.txt/status", base))
        .json(&json!({"status": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .put(format!("{}/api/indices/x/documents/doc.txt/status", base))
        .json(&json!({"status": "failed", "error_msg": "parse error"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["status"], "failed");
    assert_eq!(body["data"]["error_msg"], "parse error");

    let resp = client
        .delete(format!("{}/api/indices/x/documents/doc.txt/status", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

// ============ Tool server ============

struct UnitEmbedder;

#[async_trait]
impl Embedder for UnitEmbedder {
    fn model_name(&self) -> &str {
        "unit"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

async fn tools_server() -> String {
    let vectors = Arc::new(InMemoryVectorStore::new());
    vectors
        .insert("docs", "a.md", 0, "alpha", vec![1.0, 0.0])
        .unwrap();
    vectors
        .insert("docs", "b.md", 0, "beta", vec![0.6, 0.8])
        .unwrap();

    let registry = Arc::new(ToolRegistry::new());
    registry
        .register(Arc::new(QueryTool::new(
            "docs",
            "",
            5,
            Arc::new(UnitEmbedder),
            vectors,
        )))
        .await;
    spawn_server(tools_router(registry)).await
}

#[tokio::test]
async fn test_tools_list_and_call() {
    let base = tools_server().await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{}/tools/list", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let tools = body["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "query-docs");
    assert_eq!(
        tools[0]["description"],
        "Query the 'docs' RAG index for relevant documents."
    );
    assert_eq!(tools[0]["parameters"]["required"], json!(["query"]));

    let resp = client
        .post(format!("{}/tools/query-docs", base))
        .json(&json!({"query": "alpha"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let results = body["result"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["filename"], "a.md");
    assert_eq!(results[0]["score"], 1.0);
    assert_eq!(results[1]["score"], 0.6);
}

#[tokio::test]
async fn test_tool_errors() {
    let base = tools_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/tools/query-missing", base))
        .json(&json!({"query": "alpha"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "no tool registered with name: query-missing");

    let resp = client
        .post(format!("{}/tools/query-docs", base))
        .json(&json!({"query": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/tools/query-docs", base))
        .json(&json!({"query": "alpha", "top_k": 0}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
