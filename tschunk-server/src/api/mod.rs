//! HTTP API endpoints

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use tschunk_core::{
    compact_to_chunk, decode_from, ChunkError, ChunkMeta, ChunkRef, CompactResult,
    CompactionOptions, DecodedChunk, Ingestor, ReaderOptions, SeriesPoints, Sink, Source,
    StoreError,
};

/// Shared handler state
pub struct AppState {
    pub sink: Arc<dyn Sink>,
    pub source: Arc<dyn Source>,
    pub ingestor: Ingestor,
    pub reader: ReaderOptions,
    pub max_body_bytes: usize,
}

type SharedState = Arc<AppState>;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = DefaultBodyLimit::max(state.max_body_bytes);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/chunks", post(ingest))
        .route("/api/v1/chunks/:tenant/*key", get(get_chunk))
        .route("/api/v1/compact", post(compact))
        .layer(body_limit)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct IngestParams {
    prefix: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub chunk: ChunkRef,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompactRequest {
    /// Window and identity of the chunk to produce
    pub meta: ChunkMeta,
    /// Chunks of `meta.tenant_id` to merge
    pub object_keys: Vec<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub options: CompactionOptions,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompactResponse {
    pub chunk: ChunkRef,
    pub result: CompactResult,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error carrying the status it maps to
#[derive(Debug)]
pub enum ApiError {
    Chunk(ChunkError),
    BadRequest(String),
    Internal(String),
}

impl From<ChunkError> for ApiError {
    fn from(e: ChunkError) -> Self {
        ApiError::Chunk(e)
    }
}

fn chunk_status(e: &ChunkError) -> StatusCode {
    match e {
        e if e.is_validation() => StatusCode::BAD_REQUEST,
        e if e.is_corruption() => StatusCode::UNPROCESSABLE_ENTITY,
        ChunkError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        ChunkError::Source(inner) => match StoreError::from_boxed(inner) {
            Some(se) if se.is_not_found() => StatusCode::NOT_FOUND,
            Some(StoreError::InvalidPath(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        },
        ChunkError::Sink(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Chunk(e) => (chunk_status(&e), e.to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        if status.is_server_error() || status == StatusCode::BAD_GATEWAY {
            warn!(%status, "{}", error);
        }
        (status, Json(ErrorResponse { error })).into_response()
    }
}

/// Run codec work on the blocking pool; the token is cancelled if the request goes away
async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&CancellationToken) -> Result<T, ApiError> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    tokio::task::spawn_blocking(move || f(&cancel))
        .await
        .map_err(|e| ApiError::Internal(format!("worker failed: {}", e)))?
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: tschunk_core::VERSION.to_string(),
    })
}

async fn ingest(
    State(state): State<SharedState>,
    Query(params): Query<IngestParams>,
    body: Bytes,
) -> Result<Json<IngestResponse>, ApiError> {
    let prefix = params.prefix.unwrap_or_default();
    let resp = run_blocking(move |cancel| {
        let (chunk, warnings) =
            state
                .ingestor
                .ingest(cancel, &body[..], state.sink.as_ref(), &prefix)?;
        Ok(IngestResponse { chunk, warnings })
    })
    .await?;
    Ok(Json(resp))
}

async fn get_chunk(
    State(state): State<SharedState>,
    Path((tenant, key)): Path<(String, String)>,
) -> Result<Json<DecodedChunk>, ApiError> {
    let key = key.trim_start_matches('/').to_string();
    let chunk = run_blocking(move |cancel| {
        Ok(decode_from(
            cancel,
            &tenant,
            &key,
            state.source.as_ref(),
            &state.reader,
        )?)
    })
    .await?;
    Ok(Json(chunk))
}

async fn compact(
    State(state): State<SharedState>,
    Json(req): Json<CompactRequest>,
) -> Result<Json<CompactResponse>, ApiError> {
    if req.object_keys.is_empty() {
        return Err(ApiError::BadRequest("object_keys required".into()));
    }

    let resp = run_blocking(move |cancel| {
        let meta = req.meta.normalized();
        let mut series = Vec::new();
        for key in &req.object_keys {
            let chunk = decode_from(
                cancel,
                &meta.tenant_id,
                key,
                state.source.as_ref(),
                &state.reader,
            )?;
            if chunk.meta.namespace != meta.namespace {
                return Err(ApiError::BadRequest(format!(
                    "chunk {} belongs to namespace {:?}",
                    key, chunk.meta.namespace
                )));
            }
            series.extend(chunk.series.iter().map(SeriesPoints::from_decoded));
        }

        let (chunk, result) = compact_to_chunk(
            cancel,
            state.sink.as_ref(),
            &meta,
            &req.prefix,
            &series,
            &req.options,
        )?;
        Ok(CompactResponse { chunk, result })
    })
    .await?;
    Ok(Json(resp))
}
