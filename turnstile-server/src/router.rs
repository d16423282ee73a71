//! Route table and server lifecycle.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::handlers::{analysis, chat, llm, sessions, traces};
use crate::middleware;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let v1 = Router::new()
        .route("/sessions", post(sessions::create).get(sessions::list))
        .route("/sessions/", get(sessions::list))
        .route("/sessions/:id", get(sessions::get).delete(sessions::delete))
        .route("/sessions/:id/chat", post(chat::chat))
        .route("/sessions/:id/chat/stream", post(chat::chat_stream))
        .route("/sessions/:id/traces", get(traces::list_for_session))
        .route("/trace/:id", get(traces::get))
        .route("/llm/models", get(llm::supported_models))
        .route("/llm/config", get(llm::default_config))
        .route("/analysis/cost", get(analysis::cost))
        .route("/analysis/cost/hotspots", get(analysis::not_implemented))
        .route("/analysis/performance", get(analysis::not_implemented))
        .route(
            "/analysis/performance/bottlenecks",
            get(analysis::not_implemented),
        )
        .route("/analysis/prompt", get(analysis::not_implemented))
        .route("/analysis/prompt/compare", get(analysis::not_implemented))
        .route("/analysis/abtest/:test_id", get(analysis::not_implemented));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/v1", v1)
        .layer(axum::middleware::from_fn(middleware::request_id))
        .with_state(state)
}

/// Liveness probe with DB status.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match turnstile_core::db::health_check(&state.pool).await {
        Ok(version) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "postgresql": version,
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            })),
        ),
    }
}

/// Serve until the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("turnstile gateway listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}
