//! Model-config validation and defaulting. This module is the single
//! source of truth for `provider`, `model`, `temperature`, `max_tokens`.

use crate::config::LlmConfig;
use crate::error::CoreError;
use crate::models::llm::{ModelConfig, Provider, ProviderCredentials};

/// Per-request model selection as supplied by the caller. Everything is
/// optional; [`LlmService::resolve`] fills the gaps.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i32>,
}

#[derive(Clone)]
pub struct LlmService {
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    /// The configured process-wide default model config.
    pub fn default_config(&self) -> ModelConfig {
        let provider =
            Provider::parse(&self.config.default_provider).unwrap_or(Provider::OpenAi);
        let model = if self.config.default_model.is_empty() {
            provider.default_model().to_string()
        } else {
            self.config.default_model.clone()
        };
        let credentials = ProviderCredentials::from_env(provider);
        ModelConfig {
            provider,
            model,
            base_url: credentials.base_url,
            temperature: 0.7,
            max_tokens: 2000,
        }
    }

    /// Resolves the effective config for one turn: defaults, then caller
    /// overrides, provider inference from the model name when the caller
    /// named a model but no provider, env credentials, then validation.
    pub fn resolve(&self, opts: &ChatOptions) -> Result<ModelConfig, CoreError> {
        let mut config = self.default_config();

        if let Some(provider) = opts.provider.as_deref().filter(|p| !p.is_empty()) {
            config.provider = Provider::parse(provider).ok_or_else(|| {
                CoreError::InvalidInput(format!("unknown provider: {provider}"))
            })?;
        }
        if let Some(model) = opts.model.as_deref().filter(|m| !m.is_empty()) {
            config.model = model.to_string();
            if opts.provider.as_deref().map_or(true, str::is_empty) {
                config.provider = Provider::infer_from_model(model);
            }
        }
        if let Some(temperature) = opts.temperature {
            config.temperature = temperature;
        }
        if let Some(max_tokens) = opts.max_tokens {
            config.max_tokens = max_tokens;
        }

        let credentials = ProviderCredentials::from_env(config.provider);
        if !credentials.base_url.is_empty() {
            config.base_url = credentials.base_url;
        }

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &ModelConfig) -> Result<(), CoreError> {
        if config.model.is_empty() {
            return Err(CoreError::InvalidInput("model is required".into()));
        }
        if !(0.0..=2.0).contains(&config.temperature) {
            return Err(CoreError::InvalidInput(
                "temperature must be between 0 and 2".into(),
            ));
        }
        if !(1..=32_000).contains(&config.max_tokens) {
            return Err(CoreError::InvalidInput(
                "max_tokens must be between 1 and 32000".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> LlmService {
        LlmService::new(LlmConfig::default())
    }

    #[test]
    fn resolve_without_overrides_uses_defaults() {
        let config = service().resolve(&ChatOptions::default()).unwrap();
        assert_eq!(config.provider, Provider::DeepSeek);
        assert_eq!(config.model, "deepseek-chat");
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.max_tokens, 2000);
    }

    #[test]
    fn resolve_infers_provider_from_model() {
        let opts = ChatOptions {
            model: Some("claude-3-5-sonnet-20241022".to_string()),
            ..Default::default()
        };
        let config = service().resolve(&opts).unwrap();
        assert_eq!(config.provider, Provider::Anthropic);
    }

    #[test]
    fn explicit_provider_wins_over_inference() {
        let opts = ChatOptions {
            provider: Some("qwen".to_string()),
            model: Some("deepseek-chat".to_string()),
            ..Default::default()
        };
        let config = service().resolve(&opts).unwrap();
        assert_eq!(config.provider, Provider::Qwen);
        assert_eq!(config.model, "deepseek-chat");
    }

    #[test]
    fn resolve_rejects_out_of_range_values() {
        let opts = ChatOptions {
            temperature: Some(2.5),
            ..Default::default()
        };
        assert!(matches!(
            service().resolve(&opts),
            Err(CoreError::InvalidInput(_))
        ));

        let opts = ChatOptions {
            max_tokens: Some(0),
            ..Default::default()
        };
        assert!(service().resolve(&opts).is_err());

        let opts = ChatOptions {
            max_tokens: Some(64_000),
            ..Default::default()
        };
        assert!(service().resolve(&opts).is_err());
    }

    #[test]
    fn resolve_rejects_unknown_provider() {
        let opts = ChatOptions {
            provider: Some("skynet".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            service().resolve(&opts),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn boundary_values_are_accepted() {
        for (temperature, max_tokens) in [(0.0, 1), (2.0, 32_000)] {
            let opts = ChatOptions {
                temperature: Some(temperature),
                max_tokens: Some(max_tokens),
                ..Default::default()
            };
            assert!(service().resolve(&opts).is_ok());
        }
    }
}
