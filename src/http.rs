//! HTTP listener for the gateway bridge and Prometheus.
//!
//! Serves `POST /events` (one JSON event per request), `/metrics` and
//! `/health`. Runs on its own tokio task.

use crate::config::HttpConfig;
use crate::handlers::{Bot, Event};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;

/// Header carrying the shared bridge secret.
pub const SECRET_HEADER: &str = "x-bridge-secret";

#[derive(Clone)]
struct AppState {
    bot: Arc<Bot>,
    secret: Option<Arc<str>>,
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Dispatch one event. Responds once its effects have been applied.
async fn events_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<Event>,
) -> StatusCode {
    if let Some(secret) = &state.secret {
        let presented = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if presented != Some(secret.as_ref()) {
            tracing::warn!("Rejected event with missing or wrong bridge secret");
            return StatusCode::UNAUTHORIZED;
        }
    }

    state.bot.dispatch(event).await;
    StatusCode::NO_CONTENT
}

/// Build the router.
pub fn router(bot: Arc<Bot>, config: &HttpConfig) -> Router {
    let state = AppState {
        bot,
        secret: config.bridge_secret.as_deref().map(Arc::from),
    };

    let mut app = Router::new()
        .route("/events", post(events_handler))
        .route("/health", get(health_handler));
    if config.metrics {
        app = app.route("/metrics", get(metrics_handler));
    }
    app.with_state(state)
}

/// Run the HTTP server until it fails.
///
/// This is a long-running task that should be spawned in the background.
pub async fn run_http_server(bot: Arc<Bot>, config: HttpConfig) {
    let app = router(bot, &config);
    let addr = config.listen;

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind HTTP server");
            return;
        }
    };
    tracing::info!(%addr, "HTTP server listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "HTTP server error");
    }
}
