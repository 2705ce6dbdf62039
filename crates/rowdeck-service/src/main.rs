use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use rowdeck_api::{ApiError, IngestReport, ListingPage, RowdeckApi};
use rowdeck_core::{PageRequest, RejectedRow};
use rowdeck_store_sqlite::RecordStore;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
struct ServiceState {
    api: RowdeckApi,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    success: bool,
    accepted_count: usize,
    rejected_rows: Vec<RejectedRow>,
}

impl UploadResponse {
    fn from_report(report: IngestReport) -> Self {
        Self {
            success: true,
            accepted_count: report.accepted_count,
            rejected_rows: report.rejected_rows,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams {
    query_string: Option<String>,
    // Raw strings so a non-numeric value can fall back to the default
    // instead of failing extraction.
    page: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ListParams {
    page: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

#[derive(Debug, Clone)]
struct ServiceError {
    status: StatusCode,
    body: ErrorBody,
}

impl ServiceError {
    fn bad_request(kind: &'static str, message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, body: ErrorBody { kind, message: message.into() } }
    }

    fn no_file() -> Self {
        Self::bad_request("no_file", "No file uploaded")
    }

    // Store internals (including query text) stay in the logs, never in the
    // response body.
    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorBody { kind: "store", message: "internal storage error".to_string() },
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<ApiError> for ServiceError {
    fn from(err: ApiError) -> Self {
        match &err {
            ApiError::Invalid(invalid) => Self::bad_request(invalid.kind(), invalid.to_string()),
            ApiError::Store(store_err) => {
                tracing::error!(error = %store_err, "store operation failed");
                Self::internal()
            }
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "rowdeck-service")]
#[command(about = "HTTP service for CSV ingestion and paginated record search")]
struct Args {
    #[arg(long, default_value = "./rowdeck.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// Serve from an ephemeral in-memory store instead of a database file.
    #[arg(long)]
    memory: bool,
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/search", get(search))
        .route("/list", get(list))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let store = if args.memory {
        tracing::warn!("serving from an ephemeral in-memory store; data is lost on shutdown");
        RecordStore::open_in_memory()?
    } else {
        RecordStore::open(&args.db)?
    };
    let store = Arc::new(store);
    let state = ServiceState { api: RowdeckApi::new(Arc::clone(&store)) };

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(
        bind = %args.bind,
        db = %args.db.display(),
        memory = args.memory,
        "rowdeck service listening"
    );
    axum::serve(listener, app(state)).with_graceful_shutdown(shutdown_signal()).await?;

    match Arc::into_inner(store) {
        Some(store) => store.close()?,
        None => tracing::warn!("store still shared at shutdown; skipping explicit close"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install shutdown signal handler");
    }
}

// Store calls are synchronous SQLite work; they run on the blocking pool so
// a slow query never stalls the async workers.
async fn run_blocking<T, F>(task: F) -> Result<T, ServiceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(outcome) => outcome.map_err(ServiceError::from),
        Err(err) => {
            tracing::error!(error = %err, "blocking task failed to complete");
            Err(ServiceError::internal())
        }
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn upload(
    State(state): State<ServiceState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServiceError> {
    let mut file: Option<Vec<u8>> = None;
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        ServiceError::bad_request("bad_request", format!("malformed multipart body: {err}"))
    })? {
        if field.name() == Some("file") {
            if file.is_some() {
                return Err(ServiceError::bad_request(
                    "bad_request",
                    "multiple file fields in one upload",
                ));
            }
            let bytes = field.bytes().await.map_err(|err| {
                ServiceError::bad_request("bad_request", format!("unreadable file field: {err}"))
            })?;
            file = Some(bytes.to_vec());
        }
    }
    let Some(bytes) = file else {
        return Err(ServiceError::no_file());
    };

    let api = state.api.clone();
    let report = run_blocking(move || api.ingest_csv(&bytes)).await?;
    tracing::info!(
        accepted = report.accepted_count,
        rejected = report.rejected_rows.len(),
        "csv upload ingested"
    );
    Ok(Json(UploadResponse::from_report(report)))
}

async fn search(
    State(state): State<ServiceState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ListingPage>, ServiceError> {
    let page = PageRequest::from_raw(params.page.as_deref(), params.limit.as_deref())
        .map_err(|err| ServiceError::bad_request(err.kind(), err.to_string()))?;
    let api = state.api.clone();
    let listing = run_blocking(move || api.search(params.query_string.as_deref(), page)).await?;
    Ok(Json(listing))
}

async fn list(
    State(state): State<ServiceState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListingPage>, ServiceError> {
    let page = PageRequest::from_raw(params.page.as_deref(), params.limit.as_deref())
        .map_err(|err| ServiceError::bad_request(err.kind(), err.to_string()))?;
    let api = state.api.clone();
    let listing = run_blocking(move || api.list(page)).await?;
    Ok(Json(listing))
}
