use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use turnstile_core::analysis::{CostAnalysisInput, TimeRange};

use crate::state::AppState;

use super::{error_body, error_body_with};

#[derive(Debug, Deserialize)]
pub struct CostQuery {
    #[serde(default)]
    pub session_id: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

pub async fn cost(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CostQuery>,
) -> impl IntoResponse {
    if query.session_id.is_empty() {
        return (StatusCode::BAD_REQUEST, error_body("SESSION_ID_REQUIRED")).into_response();
    }

    let time_range = match (query.start_time.as_deref(), query.end_time.as_deref()) {
        (Some(start), Some(end)) => {
            let parse = |s: &str| {
                DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
            };
            match (parse(start), parse(end)) {
                (Ok(start_time), Ok(end_time)) => Some(TimeRange {
                    start_time,
                    end_time,
                }),
                _ => {
                    return (
                        StatusCode::BAD_REQUEST,
                        error_body_with("INVALID_INPUT", "start_time/end_time must be RFC 3339"),
                    )
                        .into_response();
                }
            }
        }
        _ => None,
    };

    let input = CostAnalysisInput {
        session_id: query.session_id.clone(),
        time_range,
        filters: None,
    };

    match state.cost.analyze(&input).await {
        Ok(result) => {
            tracing::info!(
                session_id = %query.session_id,
                total_cost = result.summary.total_cost,
                trace_count = result.summary.trace_count,
                "cost analysis complete"
            );
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(e) => {
            tracing::error!(session_id = %query.session_id, error = %e, "cost analysis failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("COST_ANALYSIS_FAILED"),
            )
                .into_response()
        }
    }
}

/// The remaining analysis surfaces are routed but not implemented yet.
pub async fn not_implemented() -> impl IntoResponse {
    (StatusCode::NOT_IMPLEMENTED, error_body("NOT_IMPLEMENTED"))
}
