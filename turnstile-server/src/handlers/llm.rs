use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

use super::error_body_with;

#[derive(Debug, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub models: Vec<String>,
    pub default_model: String,
    pub requires_key: bool,
}

#[derive(Debug, Serialize)]
pub struct SupportedModelsResponse {
    pub providers: BTreeMap<String, ProviderInfo>,
}

pub async fn supported_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.agent.get_supported_models().await {
        Ok(models) => {
            let providers = models
                .into_iter()
                .map(|(name, models)| {
                    let default_model = models.first().cloned().unwrap_or_default();
                    (
                        name.clone(),
                        ProviderInfo {
                            name,
                            models,
                            default_model,
                            requires_key: true,
                        },
                    )
                })
                .collect();
            (StatusCode::OK, Json(SupportedModelsResponse { providers })).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to get supported models");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body_with("GET_MODELS_FAILED", e.to_string()),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LlmConfigResponse {
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    pub temperature: f64,
    pub max_tokens: i32,
}

pub async fn default_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.llm.default_config();
    (
        StatusCode::OK,
        Json(LlmConfigResponse {
            provider: config.provider.as_str().to_string(),
            model: config.model,
            base_url: config.base_url,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }),
    )
}
