//!
//! src/server.rs  Andrew Belles  Oct 4th, 2025
//!
//! HTTP surface: POST /generate runs one reconciliation with optional
//! overrides from the body, GET /health reports liveness
//!

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::CatalogApi;
use crate::config::{CatalogConfig, RunConfig, RunOverrides};
use crate::errors::ReconcileError;
use crate::pipeline::Pipeline;
use crate::report::XlsxReportWriter;
use crate::resolve::DatasetResolver;

#[derive(Clone)]
pub struct AppState {
    run: Arc<RunConfig>,
    catalog: CatalogConfig,
    api: Arc<dyn CatalogApi>,
    resolver: Arc<DatasetResolver>
}

impl AppState {
    pub fn new(
        run: RunConfig,
        catalog: CatalogConfig,
        api: Arc<dyn CatalogApi>,
        resolver: DatasetResolver
    ) -> Self {
        Self { run: Arc::new(run), catalog, api, resolver: Arc::new(resolver) }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    pub artist: Option<String>,
    pub dataset_path: Option<String>,
    pub output_excel: Option<String>
}

impl From<GenerateRequest> for RunOverrides {
    fn from(req: GenerateRequest) -> Self {
        RunOverrides {
            artist_name: req.artist,
            dataset_path: req.dataset_path,
            output_path: req.output_excel.map(PathBuf::from)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub status: &'static str,
    pub output_excel: String,
    pub summary: String,
    pub generated_at: DateTime<Utc>
}

/// Error body is `{"detail": ...}` with the status of the error class
pub struct ApiError(ReconcileError);

impl From<ReconcileError> for ApiError {
    fn from(e: ReconcileError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(kind = self.0.kind(), error = %self.0, "generate.failed");
        } else {
            warn!(kind = self.0.kind(), error = %self.0, "generate.rejected");
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/generate", post(generate))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn generate(State(state): State<AppState>, body: Bytes) ->
    Result<Json<GenerateResponse>, ApiError> {

    // an empty body means "use the configured defaults"
    let request: GenerateRequest = if body.iter().all(u8::is_ascii_whitespace) {
        GenerateRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ReconcileError::Parse(format!("request body: {e}")))?
    };

    let run = state.run.with_overrides(&request.into());
    let mut sink = XlsxReportWriter::new(&run.output_path);
    let pipeline = Pipeline::new(state.api.as_ref(), state.resolver.as_ref(), state.catalog);
    let summary = pipeline.run(&run, &mut sink).await?;

    Ok(Json(GenerateResponse {
        status: "ok",
        output_excel: run.output_path.display().to_string(),
        summary: summary.to_string(),
        generated_at: Utc::now()
    }))
}

/// Serves until `shutdown` is cancelled
pub async fn serve(state: AppState, bind: SocketAddr, shutdown: CancellationToken) ->
    Result<(), ReconcileError> {

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "server.listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("server.stopped");
    Ok(())
}
