//! Axum HTTP server for the REST API

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::{ControllerState, ResourceStore};
use crate::{Error, Result};

use super::handlers;

pub const API_PORT: u16 = 8080;

/// What the handlers read from
pub struct ApiState {
    pub store: Arc<dyn ResourceStore>,
    pub is_leader: Arc<AtomicBool>,
}

/// Metrics endpoint handler
#[cfg(feature = "metrics")]
async fn metrics_handler() -> std::result::Result<String, axum::http::StatusCode> {
    use prometheus_client::encoding::text::encode;
    let mut buffer = String::new();
    encode(&mut buffer, &crate::controller::metrics::REGISTRY)
        .map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(buffer)
}

pub fn router(state: Arc<ApiState>) -> Router {
    let app = Router::new()
        .route("/healthz", get(handlers::health))
        .route("/api/v1/vdbs", get(handlers::list_vdbs))
        .route("/api/v1/vdbs/{namespace}/{name}", get(handlers::get_vdb));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Run the REST API server
pub async fn run_server(state: Arc<ControllerState>) -> Result<()> {
    let api_state = Arc::new(ApiState {
        store: state.engine.context().store.clone(),
        is_leader: Arc::clone(&state.is_leader),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], API_PORT));
    info!("REST API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, router(api_state))
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    Ok(())
}
