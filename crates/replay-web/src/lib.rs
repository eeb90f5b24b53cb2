//! HTTP server for CPEE Replay
//!
//! Serves the replay endpoint the process engine calls in place of real
//! services, plus a small read-only API.

mod api;
pub mod protocol;

pub use protocol::{
    InstantiationSignal, ReplayError, ReplayOutcome, ReplayRequest, ReplayService, SimTarget,
    INSTANTIATION_STATUS,
};

use axum::{
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use replay_core::config::ServerSettings;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Web server configuration
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl WebConfig {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Shared application state
pub struct AppState {
    pub service: ReplayService,
}

/// Build the application router
pub fn router(service: ReplayService) -> Router {
    let state = Arc::new(AppState { service });

    Router::new()
        .route(
            "/cpee/replay",
            get(api::replay).post(api::replay).put(api::replay),
        )
        .route("/api/tables", get(api::tables))
        .route("/api/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the web server
pub async fn start_server(config: WebConfig, service: ReplayService) -> anyhow::Result<()> {
    let app = router(service);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Replay server listening on http://{}", addr);
    info!("  - Replay endpoint at /cpee/replay");
    info!("  - API at /api/*");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "cpee-replay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
