//! HTTP ingest API.
//!
//! # Routes
//!
//! - `GET /` -- liveness marker
//! - `POST /ingest` -- submit one `SecurityEvent` JSON body
//! - `GET /queue/stats` -- queue length, name and backlog status
//!
//! Every error response has the body `{"status":"error","detail":...}`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use watchpost_core::error::{PipelineError, QueueError, WatchpostError};
use watchpost_core::event::SecurityEvent;
use watchpost_core::pipeline::{HealthStatus, Pipeline};
use watchpost_core::queue::QueueStats;
use watchpost_ingest::{GatewayError, IngestGateway, IngestReceipt};

/// Liveness message returned by `GET /`.
pub const ROOT_MESSAGE: &str = "Watchpost backend running";

/// Errors returned by API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Body was not valid `SecurityEvent` JSON (bad syntax, unknown source, bad timestamp).
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// The gateway refused the event.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The queue could not be read.
    #[error("failed to read queue: {0}")]
    Queue(#[from] QueueError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidBody(_) | Self::Gateway(GatewayError::Validation(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Gateway(GatewayError::Overloaded { .. } | GatewayError::Closed) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Gateway(GatewayError::Queue(_) | GatewayError::Encode(_)) | Self::Queue(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            status: "error",
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct RootResponse {
    /// Fixed liveness message.
    pub message: &'static str,
}

/// Shared handler state.
pub struct AppState {
    gateway: Arc<IngestGateway>,
}

impl AppState {
    /// Wrap the gateway for use by handlers.
    pub fn new(gateway: Arc<IngestGateway>) -> Self {
        Self { gateway }
    }
}

/// Build the API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/ingest", post(ingest))
        .route("/queue/stats", get(queue_stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Handle GET / - liveness marker.
async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: ROOT_MESSAGE,
    })
}

/// Handle POST /ingest - validate, assign an id and enqueue.
async fn ingest(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SecurityEvent>, JsonRejection>,
) -> Result<Json<IngestReceipt>, ApiError> {
    let Json(event) = payload.map_err(|e| ApiError::InvalidBody(e.body_text()))?;
    let receipt = state.gateway.ingest(event).await?;
    Ok(Json(receipt))
}

/// Handle GET /queue/stats - queue snapshot.
async fn queue_stats(State(state): State<Arc<AppState>>) -> Result<Json<QueueStats>, ApiError> {
    let stats = state.gateway.queue_stats().await?;
    Ok(Json(stats))
}

/// HTTP server module.
///
/// Binds on `start` and shuts down gracefully on `stop`, letting
/// in-flight requests finish.
pub struct HttpServer {
    listen_addr: String,
    state: Arc<AppState>,
    local_addr: Option<SocketAddr>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HttpServer {
    /// Create a server for `listen_addr` serving the given gateway.
    pub fn new(listen_addr: impl Into<String>, gateway: Arc<IngestGateway>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            state: Arc::new(AppState::new(gateway)),
            local_addr: None,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    /// Address actually bound, available after `start`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Pipeline for HttpServer {
    async fn start(&mut self) -> Result<(), WatchpostError> {
        if self.handle.is_some() {
            return Err(PipelineError::AlreadyRunning.into());
        }

        let listener = TcpListener::bind(&self.listen_addr).await.map_err(|e| {
            PipelineError::InitFailed(format!("failed to bind to {}: {e}", self.listen_addr))
        })?;
        self.local_addr = listener.local_addr().ok();
        tracing::info!(
            listen_addr = %self.listen_addr,
            local_addr = ?self.local_addr,
            "HTTP ingest API listening"
        );

        self.cancel = CancellationToken::new();
        let shutdown = self.cancel.clone().cancelled_owned();
        let router = create_router(Arc::clone(&self.state));
        self.handle = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "HTTP server failed");
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), WatchpostError> {
        let Some(handle) = self.handle.take() else {
            return Err(PipelineError::NotRunning.into());
        };
        self.cancel.cancel();
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "HTTP server task panicked");
        }
        tracing::info!("HTTP ingest API stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match &self.handle {
            None => HealthStatus::Unhealthy("not running".to_owned()),
            Some(handle) if handle.is_finished() => {
                HealthStatus::Unhealthy("server task exited".to_owned())
            }
            Some(_) => HealthStatus::Healthy,
        }
    }
}
