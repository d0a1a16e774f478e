//! JSON HTTP API over the build and generation pipelines.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/status` | Knowledge-base status and build metadata |
//! | `POST` | `/build` | Rebuild the knowledge base from server-side paths and uploaded files |
//! | `POST` | `/search` | Top-k chunks for a query |
//! | `POST` | `/generate` | Generate test cases or a script |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "no_knowledge_base", "message": "..." } }
//! ```
//!
//! | Code | Status | When |
//! |------|--------|------|
//! | `bad_request` | 400 | empty query, missing markup, nothing to build |
//! | `embeddings_disabled` | 400 | no embedding provider configured |
//! | `no_knowledge_base` | 409 | nothing has been built yet |
//! | `timeout` | 408 | embedding or model call exceeded its deadline |
//! | `ungrounded` | 422 | test cases cite sources that were not retrieved |
//! | `malformed_output` | 502 | model output is not a test-case list |
//! | `model_error` | 502 | model provider failure |
//! | `index_mismatch` | 500 | embedder does not match the persisted index |
//! | `internal` | 500 | anything else |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front-end
//! can call the API directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::{EmbedError, GenerationError, GenerationFailure, IndexError, ModelError};
use crate::generate::Generator;
use crate::index::{IndexMeta, VectorIndex};
use crate::ingest::build_from_report;
use crate::loader::{load_buffers, load_documents, Upload};
use crate::knowledge::{KnowledgeBase, KnowledgeStatus};
use crate::models::{GenerationRequest, GenerationResult};
use crate::retrieve::retrieve;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    kb: Arc<KnowledgeBase>,
    generator: Arc<Generator>,
}

impl AppState {
    pub fn new(config: Config, kb: KnowledgeBase, generator: Generator) -> Self {
        Self {
            config: Arc::new(config),
            kb: Arc::new(kb),
            generator: Arc::new(generator),
        }
    }
}

/// The API router, without binding a socket.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/build", post(handle_build))
        .route("/search", post(handle_search))
        .route("/generate", post(handle_generate))
        .layer(cors)
        .with_state(state)
}

/// `qah serve`: run the API on `[server].bind` until the process is stopped.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let kb = KnowledgeBase::open(&config.index.path).await?;
    let generator = Generator::from_config(config)?;
    let app = router(AppState::new(config.clone(), kb, generator));

    println!("QA Harness API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn no_knowledge_base() -> AppError {
    app_error(
        StatusCode::CONFLICT,
        "no_knowledge_base",
        "no knowledge base has been built yet; POST /build first",
    )
}

fn timeout_error(message: impl Into<String>) -> AppError {
    app_error(StatusCode::REQUEST_TIMEOUT, "timeout", message)
}

fn internal(message: impl Into<String>) -> AppError {
    app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

fn classify_index_error(err: IndexError) -> AppError {
    let message = err.to_string();
    match err {
        IndexError::Embed(EmbedError::Timeout(_)) => timeout_error(message),
        IndexError::Embed(EmbedError::Disabled) => {
            app_error(StatusCode::BAD_REQUEST, "embeddings_disabled", message)
        }
        IndexError::Empty => bad_request(message),
        IndexError::DimensionMismatch { .. } | IndexError::EmbedderMismatch { .. } => {
            app_error(StatusCode::INTERNAL_SERVER_ERROR, "index_mismatch", message)
        }
        _ => internal(message),
    }
}

fn classify_generation_error(err: GenerationError) -> AppError {
    let message = err.to_string();
    if err.is_timeout() {
        return timeout_error(message);
    }
    match err.cause {
        GenerationFailure::Retrieval(e) => {
            let mut mapped = classify_index_error(e);
            mapped.message = message;
            mapped
        }
        GenerationFailure::MissingMarkup => bad_request(message),
        GenerationFailure::Ungrounded { .. } => {
            app_error(StatusCode::UNPROCESSABLE_ENTITY, "ungrounded", message)
        }
        GenerationFailure::MalformedOutput { .. } => {
            app_error(StatusCode::BAD_GATEWAY, "malformed_output", message)
        }
        GenerationFailure::Model(ModelError::Disabled) => bad_request(message),
        GenerationFailure::Model(_) => app_error(StatusCode::BAD_GATEWAY, "model_error", message),
    }
}

fn require_embeddings(state: &AppState, action: &str) -> Result<(), AppError> {
    if state.config.embedding.is_enabled() {
        return Ok(());
    }
    Err(app_error(
        StatusCode::BAD_REQUEST,
        "embeddings_disabled",
        format!("{} requires an [embedding] provider", action),
    ))
}

fn active_index(state: &AppState) -> Result<Arc<VectorIndex>, AppError> {
    state.kb.current().ok_or_else(no_knowledge_base)
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

// ============ GET /status ============

async fn handle_status(State(state): State<AppState>) -> Json<KnowledgeStatus> {
    Json(state.kb.status())
}

// ============ POST /build ============

/// Server-side paths, uploaded files, or both.
#[derive(Deserialize)]
struct BuildRequest {
    #[serde(default)]
    paths: Vec<PathBuf>,
    #[serde(default)]
    files: Vec<UploadedFile>,
}

#[derive(Deserialize)]
struct UploadedFile {
    name: String,
    content: String,
}

#[derive(Serialize)]
struct BuildFailure {
    source_name: String,
    error: String,
}

#[derive(Serialize)]
struct BuildResponse {
    documents: Vec<String>,
    skipped: Vec<String>,
    failures: Vec<BuildFailure>,
    chunks: usize,
    meta: IndexMeta,
}

async fn handle_build(
    State(state): State<AppState>,
    Json(req): Json<BuildRequest>,
) -> Result<Json<BuildResponse>, AppError> {
    if req.paths.is_empty() && req.files.is_empty() {
        return Err(bad_request("paths or files must be given"));
    }
    require_embeddings(&state, "building")?;

    let uploads: Vec<Upload> = req
        .files
        .into_iter()
        .map(|f| Upload {
            name: f.name,
            content: f.content.into_bytes(),
        })
        .collect();
    let mut report = load_documents(&req.paths);
    report.merge(load_buffers(&uploads));

    let outcome = build_from_report(
        &state.kb,
        &state.config,
        state.generator.embedder().as_ref(),
        report,
    )
    .await
    .map_err(classify_index_error)?;

    Ok(Json(BuildResponse {
        documents: outcome
            .load
            .documents
            .iter()
            .map(|d| d.source_name.clone())
            .collect(),
        skipped: outcome.load.skipped,
        failures: outcome
            .load
            .failures
            .into_iter()
            .map(|f| BuildFailure {
                source_name: f.source_name,
                error: f.error.to_string(),
            })
            .collect(),
        chunks: outcome.chunks,
        meta: outcome.index.meta().clone(),
    }))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Serialize)]
struct SearchHit {
    chunk_id: String,
    source_name: String,
    sequence_index: i64,
    score: f32,
    text: String,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    require_embeddings(&state, "searching")?;
    let index = active_index(&state)?;
    let k = req.k.unwrap_or(state.config.retrieval.test_case_k);

    let retrieval = retrieve(&index, state.generator.embedder().as_ref(), &req.query, k)
        .await
        .map_err(classify_index_error)?;

    Ok(Json(SearchResponse {
        results: retrieval
            .chunks
            .into_iter()
            .map(|hit| SearchHit {
                chunk_id: hit.chunk.id,
                source_name: hit.chunk.source_name,
                sequence_index: hit.chunk.sequence_index,
                score: hit.score,
                text: hit.chunk.text,
            })
            .collect(),
    }))
}

// ============ POST /generate ============

async fn handle_generate(
    State(state): State<AppState>,
    Json(req): Json<GenerationRequest>,
) -> Result<Json<GenerationResult>, AppError> {
    if req.free_text_input.trim().is_empty() {
        return Err(bad_request("text_input must not be empty"));
    }
    require_embeddings(&state, "generating")?;
    let index = active_index(&state)?;
    let result = state
        .generator
        .generate(&index, &req)
        .await
        .map_err(classify_generation_error)?;
    Ok(Json(result))
}
