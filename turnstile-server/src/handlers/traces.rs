use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use turnstile_core::models::trace::{ExecutionStep, Trace};

use crate::state::AppState;

use super::{error_body, error_body_with};

#[derive(Debug, Serialize)]
pub struct TraceDetailResponse {
    #[serde(flatten)]
    pub trace: Trace,
    pub steps: Vec<ExecutionStep>,
}

#[derive(Debug, Serialize)]
pub struct TraceListResponse {
    pub traces: Vec<Trace>,
    pub total: usize,
    pub total_cost: CostTotals,
}

#[derive(Debug, Serialize)]
pub struct CostTotals {
    pub tokens: i64,
    pub api_cost: f64,
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let trace = match state.traces.get_trace(&id).await {
        Ok(trace) => trace,
        Err(e) if e.is_not_found() => {
            return (StatusCode::NOT_FOUND, error_body("TRACE_NOT_FOUND")).into_response();
        }
        Err(e) => {
            tracing::error!(trace_id = %id, error = %e, "failed to get trace");
            return (StatusCode::NOT_FOUND, error_body("TRACE_NOT_FOUND")).into_response();
        }
    };

    match state.traces.get_steps(&id).await {
        Ok(steps) => (StatusCode::OK, Json(TraceDetailResponse { trace, steps })).into_response(),
        Err(e) => {
            tracing::error!(trace_id = %id, error = %e, "failed to get steps");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body_with("FAILED_TO_GET_STEPS", e.to_string()),
            )
                .into_response()
        }
    }
}

pub async fn list_for_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    if session_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, error_body("SESSION_ID_REQUIRED")).into_response();
    }

    match state.traces.get_session_traces(&session_id).await {
        Ok(traces) => {
            let tokens: i64 = traces.iter().map(|t| t.cost_tokens as i64).sum();
            let api_cost: f64 = traces.iter().map(|t| t.cost_api).sum();
            tracing::info!(
                session_id = %session_id,
                traces_count = traces.len(),
                total_tokens = tokens,
                total_cost = api_cost,
                "listed session traces"
            );
            (
                StatusCode::OK,
                Json(TraceListResponse {
                    total: traces.len(),
                    total_cost: CostTotals { tokens, api_cost },
                    traces,
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "failed to list traces");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body_with("FAILED_TO_LIST_TRACES", e.to_string()),
            )
                .into_response()
        }
    }
}
