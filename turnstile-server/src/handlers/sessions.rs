use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::state::AppState;

use super::{error_body, error_body_with};

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub user_id: String,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                error_body_with("INVALID_INPUT", rejection.body_text()),
            )
                .into_response();
        }
    };

    if req.user_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            error_body_with("INVALID_INPUT", "user_id is required"),
        )
            .into_response();
    }

    match state.sessions.create(&req.user_id).await {
        Ok(session) => {
            tracing::info!(session_id = %session.id, user_id = %req.user_id, "session created");
            (StatusCode::CREATED, Json(session)).into_response()
        }
        Err(e) => {
            tracing::error!(user_id = %req.user_id, error = %e, "failed to create session");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body_with("CREATE_SESSION_FAILED", e.to_string()),
            )
                .into_response()
        }
    }
}

pub async fn list(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.sessions.list().await {
        Ok(sessions) => (StatusCode::OK, Json(sessions)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to list sessions");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body_with("GET_SESSIONS_FAILED", e.to_string()),
            )
                .into_response()
        }
    }
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = Uuid::parse_str(&id) else {
        return (StatusCode::BAD_REQUEST, error_body("INVALID_SESSION_ID")).into_response();
    };

    match state.sessions.get(id).await {
        Ok(session) => (StatusCode::OK, Json(session)).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, error_body("SESSION_NOT_FOUND")).into_response(),
    }
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = Uuid::parse_str(&id) else {
        return (StatusCode::BAD_REQUEST, error_body("INVALID_SESSION_ID")).into_response();
    };

    match state.sessions.delete(id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"message": "Session deleted"})),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(session_id = %id, error = %e, "failed to delete session");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body_with("DELETE_SESSION_FAILED", e.to_string()),
            )
                .into_response()
        }
    }
}
