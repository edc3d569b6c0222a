//! HTTP surfaces: the index management API and the tool server.
//!
//! # Index API
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/api/indices` | List valid indices |
//! | `POST`   | `/api/indices` | Create `{name, description}` |
//! | `GET`    | `/api/indices/{name}` | Get one index |
//! | `PUT`    | `/api/indices/{name}` | Update `{description}` |
//! | `DELETE` | `/api/indices/{name}` | Delete an index and its documents |
//! | `GET`    | `/api/indices/{name}/documents` | List documents with status |
//! | `POST`   | `/api/indices/{name}/upload` | Multipart upload, field `file` |
//! | `GET`    | `/api/indices/{name}/documents/{filename}` | Download |
//! | `DELETE` | `/api/indices/{name}/documents/{filename}` | Delete a document |
//! | `PUT`    | `/api/indices/{name}/documents/{filename}/status` | Worker status callback |
//! | `DELETE` | `/api/indices/{name}/documents/{filename}/status` | Delete a status row |
//! | `GET`    | `/health` | Health check |
//!
//! Successful responses use the envelope
//! `{"data": ..., "message": "...", "error": false}`. Failures render as
//! `{"error": "<message>"}` (see [`IndexError`]).
//!
//! # Tool server
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | Registered tools with parameter schemas |
//! | `POST` | `/tools/{name}` | Call a tool; body is the parameters object |
//! | `*`    | `/mcp` | MCP Streamable HTTP endpoint |
//! | `GET`  | `/health` | Health check |
//!
//! All origins, methods, and headers are permitted.

use anyhow::Context;
use axum::{
    extract::{
        multipart::{Multipart, MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Path, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Extension, Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::error::{IndexError, IndexResult};
use crate::mcp::McpBridge;
use crate::service::IndexService;
use crate::tools::{ToolInfo, ToolRegistry};

/// Success envelope for the index API.
#[derive(Serialize)]
struct Envelope<T> {
    data: T,
    message: String,
    error: bool,
}

fn ok<T: Serialize>(data: T, message: impl Into<String>) -> Json<Envelope<T>> {
    Json(Envelope {
        data,
        message: message.into(),
        error: false,
    })
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

fn bad_json(rejection: JsonRejection) -> IndexError {
    IndexError::bad_request(format!("Invalid request body: {}", rejection.body_text()))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Index API
// ═══════════════════════════════════════════════════════════════════════

/// Room left in the request body limit for multipart boundaries and part
/// headers, so a file of exactly `max_upload_bytes` still fits.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Largest accepted file, checked against the file part itself.
#[derive(Clone, Copy)]
struct UploadLimit(usize);

/// Router for the index management API.
pub fn api_router(service: Arc<IndexService>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/indices", get(list_indices).post(create_index))
        .route(
            "/api/indices/{name}",
            get(get_index).put(update_index).delete(delete_index),
        )
        .route("/api/indices/{name}/documents", get(list_documents))
        .route("/api/indices/{name}/upload", post(upload_document))
        .route(
            "/api/indices/{name}/documents/{filename}",
            get(download_document).delete(delete_document),
        )
        .route(
            "/api/indices/{name}/documents/{filename}/status",
            put(update_document_status).delete(delete_document_status),
        )
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(
            max_upload_bytes.saturating_add(MULTIPART_OVERHEAD),
        ))
        .layer(Extension(UploadLimit(max_upload_bytes)))
        .layer(cors())
        .with_state(service)
}

type ApiState = State<Arc<IndexService>>;

#[derive(Deserialize)]
struct CreateIndexRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct UpdateIndexRequest {
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct UpdateStatusRequest {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error_msg: Option<String>,
}

async fn list_indices(State(service): ApiState) -> IndexResult<impl IntoResponse> {
    let indices = service.list_indices().await?;
    Ok(ok(indices, "RAG indices listed successfully"))
}

async fn get_index(
    State(service): ApiState,
    Path(name): Path<String>,
) -> IndexResult<impl IntoResponse> {
    let index = service.get_index(&name).await?;
    Ok(ok(index, "RAG index retrieved successfully"))
}

async fn create_index(
    State(service): ApiState,
    body: Result<Json<CreateIndexRequest>, JsonRejection>,
) -> IndexResult<impl IntoResponse> {
    let Json(req) = body.map_err(bad_json)?;
    let index = service.create_index(&req.name, &req.description).await?;
    Ok((
        StatusCode::CREATED,
        ok(index, "RAG index created successfully"),
    ))
}

async fn update_index(
    State(service): ApiState,
    Path(name): Path<String>,
    body: Result<Json<UpdateIndexRequest>, JsonRejection>,
) -> IndexResult<impl IntoResponse> {
    let Json(req) = body.map_err(bad_json)?;
    let index = service.update_index(&name, &req.description).await?;
    Ok(ok(index, "RAG index updated successfully"))
}

async fn delete_index(
    State(service): ApiState,
    Path(name): Path<String>,
) -> IndexResult<impl IntoResponse> {
    service.delete_index(&name).await?;
    Ok(ok((), "RAG index deleted successfully"))
}

async fn list_documents(
    State(service): ApiState,
    Path(name): Path<String>,
) -> IndexResult<impl IntoResponse> {
    let documents = service.list_documents(&name).await?;
    Ok(ok(documents, "Documents listed successfully"))
}

fn multipart_error(e: MultipartError) -> IndexError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        IndexError::bad_request("File exceeds the maximum upload size")
    } else {
        IndexError::bad_request(format!("Invalid multipart request: {}", e.body_text()))
    }
}

/// Last path component of a client-supplied filename.
fn base_filename(raw: &str) -> &str {
    raw.rsplit(['/', '\\']).next().unwrap_or(raw)
}

async fn upload_document(
    State(service): ApiState,
    Path(name): Path<String>,
    Extension(UploadLimit(max_upload_bytes)): Extension<UploadLimit>,
    multipart: Result<Multipart, MultipartRejection>,
) -> IndexResult<impl IntoResponse> {
    let mut multipart = multipart.map_err(|e| {
        IndexError::bad_request(format!("Invalid multipart request: {}", e.body_text()))
    })?;
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = base_filename(field.file_name().unwrap_or_default()).to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(multipart_error)?;
        upload = Some((filename, content_type, data));
        break;
    }

    let (filename, content_type, data) =
        upload.ok_or_else(|| IndexError::bad_request("Missing file in request"))?;
    if data.len() > max_upload_bytes {
        return Err(IndexError::bad_request(
            "File exceeds the maximum upload size",
        ));
    }

    let document = service
        .upload_document(&name, &filename, data.to_vec(), content_type.as_deref())
        .await?;
    Ok((
        StatusCode::CREATED,
        ok(document, "File uploaded successfully"),
    ))
}

async fn download_document(
    State(service): ApiState,
    Path((name, filename)): Path<(String, String)>,
) -> IndexResult<Response> {
    let object = service.download_document(&name, &filename).await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        filename.replace(['"', '\\'], "_")
    );
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|e| IndexError::internal("Failed to build response headers", e))?;
    let content_type = HeaderValue::from_str(&object.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        object.data,
    )
        .into_response())
}

async fn delete_document(
    State(service): ApiState,
    Path((name, filename)): Path<(String, String)>,
) -> IndexResult<impl IntoResponse> {
    service.delete_document(&name, &filename).await?;
    Ok(ok((), "Document deleted successfully"))
}

async fn update_document_status(
    State(service): ApiState,
    Path((name, filename)): Path<(String, String)>,
    body: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> IndexResult<impl IntoResponse> {
    let Json(req) = body.map_err(bad_json)?;
    let status = service
        .update_document_status(&name, &filename, &req.status, req.error_msg)
        .await?;
    Ok(ok(status, "Document status updated successfully"))
}

async fn delete_document_status(
    State(service): ApiState,
    Path((name, filename)): Path<(String, String)>,
) -> IndexResult<impl IntoResponse> {
    service.delete_document_status(&name, &filename).await?;
    Ok(ok((), "Document status deleted successfully"))
}

// ═══════════════════════════════════════════════════════════════════════
// Tool server
// ═══════════════════════════════════════════════════════════════════════

/// Router for the tool server, including the MCP endpoint at `/mcp`.
pub fn tools_router(registry: Arc<ToolRegistry>) -> Router {
    let bridge = McpBridge::new(registry.clone());
    let mcp = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .nest_service("/mcp", mcp)
        .layer(cors())
        .with_state(registry)
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(registry): State<Arc<ToolRegistry>>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: registry.list().await,
    })
}

async fn handle_tool_call(
    State(registry): State<Arc<ToolRegistry>>,
    Path(name): Path<String>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> IndexResult<Json<serde_json::Value>> {
    let Json(params) = body.map_err(bad_json)?;
    let result = registry.invoke(&name, params).await?;
    Ok(Json(serde_json::json!({ "result": result })))
}

// ═══════════════════════════════════════════════════════════════════════
// Serving
// ═══════════════════════════════════════════════════════════════════════

/// Bind `addr` and serve `app` until `shutdown` resolves.
pub async fn serve(
    addr: &str,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
}
