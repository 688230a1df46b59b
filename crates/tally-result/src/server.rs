//! Viewer-facing HTTP surface: landing page, static assets, WebSocket,
//! health, readiness and metrics.

use std::path::PathBuf;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tally::{Hub, LinkState};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, error};

use crate::session;

/// Served when `VIEWS_DIR` has no index.html.
const FALLBACK_INDEX: &str = include_str!("../views/index.html");

/// Shared state for all routes
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub link: watch::Receiver<LinkState>,
    pub backend: &'static str,
    pub views_dir: PathBuf,
    pub shutdown: CancellationToken,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend: &'static str,
    pub state: &'static str,
    pub viewers: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backend: state.backend,
        state: state.link.borrow().as_str(),
        viewers: state.hub.session_count(),
    })
}

/// 200 once the database connection is established
async fn ready(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let link = *state.link.borrow();
    let connected = link == LinkState::Connected;
    let status_code = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if connected { "ready" } else { "not_ready" },
            backend: state.backend,
            state: link.as_str(),
            viewers: state.hub.session_count(),
        }),
    )
}

async fn metrics() -> impl IntoResponse {
    match tally::metrics::encode_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let path = state.views_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(page) => Html(page),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "serving built-in landing page");
            Html(FALLBACK_INDEX.to_string())
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run_session(socket, state.hub, state.shutdown))
}

pub fn router(state: AppState) -> Router {
    let assets = ServeDir::new(&state.views_dir);

    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .fallback_service(assets)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
