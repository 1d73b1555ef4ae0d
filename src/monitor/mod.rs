//! Status monitor HTTP endpoint
//!
//! Serves read-only JSON views of the index and, while a download runs, of
//! the live run counters.

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::{Error, Result};

pub mod routes;
pub mod state;

pub use routes::StatusResponse;
pub use state::MonitorState;

/// Create the monitor router
///
/// # Routes
///
/// - `GET /health` - Liveness check with the crate version
/// - `GET /status` - Run counters, index status counts and the last import
pub fn create_router(state: MonitorState) -> Router {
    Router::new()
        .route("/health", get(routes::health_check))
        .route("/status", get(routes::status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Errors surface as `500` with a JSON body
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Bind `bind_address` and serve until `shutdown` is cancelled
pub async fn serve(
    bind_address: SocketAddr,
    state: MonitorState,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(bind_address).await.map_err(|e| {
        Error::Monitor(format!("failed to bind {}: {}", bind_address, e))
    })?;
    serve_listener(listener, state, shutdown).await
}

/// Serve on an already bound listener until `shutdown` is cancelled
pub async fn serve_listener(
    listener: TcpListener,
    state: MonitorState,
    shutdown: CancellationToken,
) -> Result<()> {
    let address = listener.local_addr()?;
    tracing::info!(address = %address, "Monitor listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Monitor(e.to_string()))?;

    tracing::info!("Monitor stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
