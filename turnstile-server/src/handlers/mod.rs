//! HTTP handlers. Each endpoint is a thin axum wrapper over an inner
//! function that is directly testable without dispatch machinery.

pub mod analysis;
pub mod chat;
pub mod llm;
pub mod sessions;
pub mod traces;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

/// Standard error body: `{"error":"<CODE>", "message":"…"}`.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn error_body(code: &'static str) -> Json<ApiError> {
    Json(ApiError {
        error: code,
        message: None,
    })
}

pub fn error_body_with(code: &'static str, message: impl Into<String>) -> Json<ApiError> {
    Json(ApiError {
        error: code,
        message: Some(message.into()),
    })
}

pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_omits_empty_message() {
        let body = serde_json::to_value(&error_body("SESSION_NOT_FOUND").0).unwrap();
        assert_eq!(body, serde_json::json!({"error": "SESSION_NOT_FOUND"}));

        let body =
            serde_json::to_value(&error_body_with("INVALID_INPUT", "messages required").0).unwrap();
        assert_eq!(body["message"], "messages required");
    }
}
