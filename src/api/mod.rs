//! HTTP API server for the rover gateway
//!
//! The control surface a UI or platform layer uses to drive the vehicle
//! connection (attach, detach, permission results) and to query state.

pub mod command;
pub mod health;
pub mod vehicle;
pub mod voice;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::assistant::CommandDispatcher;
use crate::vehicle::ConnectionManager;
use crate::voice::VoiceCommandLoop;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub connection: Arc<ConnectionManager>,
    pub dispatcher: Arc<CommandDispatcher>,
    /// Absent when voice is disabled
    pub voice: Option<Arc<VoiceCommandLoop>>,
}

/// Build the router with all routes
#[must_use]
pub fn router(state: ApiState) -> Router {
    let state = Arc::new(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/vehicle", vehicle::router(Arc::clone(&state)))
        .nest("/api/voice", voice::router(Arc::clone(&state)))
        .nest("/api/command", command::router(state))
        .merge(health::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: ApiState,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub const fn new(state: ApiState, port: u16) -> Self {
        Self { state, port }
    }

    /// Run the API server until `shutdown` is cancelled
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        tracing::info!("API server stopped");
        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

/// API errors
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Conflict(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}
