use std::net::SocketAddr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::directory::{Directory, SourceType, Stream, Worker};
use crate::error::DispatchError;

#[derive(Clone)]
pub struct DashboardState {
    pub directory: Directory,
}

#[derive(Serialize)]
struct WorkerResponse {
    id: String,
    host: String,
    workload: i64,
    status: String,
    last_seen: String,
    version: String,
}

impl From<Worker> for WorkerResponse {
    fn from(worker: Worker) -> Self {
        Self {
            id: worker.id,
            host: worker.host,
            workload: worker.workload,
            status: worker.status,
            last_seen: worker.last_seen.to_rfc3339(),
            version: worker.version,
        }
    }
}

#[derive(Serialize)]
struct StreamResponse {
    id: u32,
    live: bool,
    recording: bool,
    playlist_combined: Option<String>,
    playlist_presentation: Option<String>,
    playlist_camera: Option<String>,
    files: Vec<String>,
    silences: usize,
    transcoding: Vec<TranscodingProgress>,
}

#[derive(Serialize)]
struct TranscodingProgress {
    version: SourceType,
    progress: u32,
}

impl From<Stream> for StreamResponse {
    fn from(stream: Stream) -> Self {
        let mut transcoding: Vec<TranscodingProgress> = stream
            .transcoding_progress
            .iter()
            .map(|(&version, &progress)| TranscodingProgress { version, progress })
            .collect();
        transcoding.sort_by_key(|t| t.version.as_wire());

        Self {
            id: stream.id,
            live: stream.live_now,
            recording: stream.recording,
            playlist_combined: stream.playlists.combined,
            playlist_presentation: stream.playlists.presentation,
            playlist_camera: stream.playlists.camera,
            files: stream.files.into_iter().map(|f| f.path).collect(),
            silences: stream.silences.len(),
            transcoding,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Read-only status routes.
pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/workers", get(list_workers_handler))
        .route("/api/streams/{id}", get(stream_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState, shutdown: CancellationToken) {
    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn list_workers_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    match state.directory.workers.alive_workers(Utc::now()).await {
        Ok(workers) => {
            let workers: Vec<WorkerResponse> = workers.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(workers)).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

async fn stream_handler(
    State(state): State<DashboardState>,
    Path(id): Path<u32>,
) -> impl IntoResponse {
    match state.directory.streams.stream_by_id(id).await {
        Ok(stream) => (StatusCode::OK, Json(StreamResponse::from(stream))).into_response(),
        Err(e @ DispatchError::StreamNotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}
