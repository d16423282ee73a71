use serde::{Deserialize, Serialize};

/// Supported model vendors. The closed inference table in
/// [`Provider::infer_from_model`] is the only authority mapping a model
/// name to its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    DeepSeek,
    Anthropic,
    Qwen,
    Ernie,
    ChatGlm,
}

impl Provider {
    pub const ALL: [Provider; 6] = [
        Provider::OpenAi,
        Provider::DeepSeek,
        Provider::Anthropic,
        Provider::Qwen,
        Provider::Ernie,
        Provider::ChatGlm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::DeepSeek => "deepseek",
            Provider::Anthropic => "anthropic",
            Provider::Qwen => "qwen",
            Provider::Ernie => "ernie",
            Provider::ChatGlm => "chatglm",
        }
    }

    pub fn parse(s: &str) -> Option<Provider> {
        match s {
            "openai" => Some(Provider::OpenAi),
            "deepseek" => Some(Provider::DeepSeek),
            "anthropic" => Some(Provider::Anthropic),
            "qwen" => Some(Provider::Qwen),
            "ernie" => Some(Provider::Ernie),
            "chatglm" => Some(Provider::ChatGlm),
            _ => None,
        }
    }

    /// Infer the provider from a model name. Unknown models fall back to
    /// OpenAI.
    pub fn infer_from_model(model: &str) -> Provider {
        match model {
            "deepseek-chat" | "deepseek-reasoner" => Provider::DeepSeek,
            m if m.starts_with("claude-3-") || m.starts_with("claude-3-5-") => Provider::Anthropic,
            "qwen-turbo" | "qwen-plus" | "qwen-max" | "qwen-max-longcontext" => Provider::Qwen,
            "ernie-bot" | "ernie-bot-turbo" | "ernie-bot-4" | "ernie-speed" => Provider::Ernie,
            "glm-4" | "glm-4v" | "glm-3-turbo" => Provider::ChatGlm,
            _ => Provider::OpenAi,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-3.5-turbo",
            Provider::DeepSeek => "deepseek-chat",
            Provider::Anthropic => "claude-3-sonnet-20240229",
            Provider::Qwen => "qwen-turbo",
            Provider::Ernie => "ernie-bot-turbo",
            Provider::ChatGlm => "glm-4",
        }
    }
}

/// API key and base URL for one provider, sourced from the environment.
/// A missing key is not a validation error at this layer; the upstream
/// fails the call and produces an `error` chunk instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub api_key: String,
    pub base_url: String,
}

impl ProviderCredentials {
    /// Reads `LLM_PROVIDERS_<NAME>_API_KEY` / `_BASE_URL`, falling back to
    /// the short `<NAME>_API_KEY` / `<NAME>_BASE_URL` names.
    pub fn from_env(provider: Provider) -> Self {
        let name = provider.as_str().to_uppercase();
        let lookup = |suffix: &str| {
            std::env::var(format!("LLM_PROVIDERS_{name}_{suffix}"))
                .or_else(|_| std::env::var(format!("{name}_{suffix}")))
                .unwrap_or_default()
        };
        Self {
            api_key: lookup("API_KEY"),
            base_url: lookup("BASE_URL"),
        }
    }
}

/// Effective model configuration for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: Provider,
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub base_url: String,
    pub temperature: f64,
    pub max_tokens: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_table_is_closed() {
        assert_eq!(Provider::infer_from_model("deepseek-chat"), Provider::DeepSeek);
        assert_eq!(Provider::infer_from_model("deepseek-reasoner"), Provider::DeepSeek);
        assert_eq!(
            Provider::infer_from_model("claude-3-sonnet-20240229"),
            Provider::Anthropic
        );
        assert_eq!(
            Provider::infer_from_model("claude-3-5-sonnet-20241022"),
            Provider::Anthropic
        );
        assert_eq!(Provider::infer_from_model("qwen-max-longcontext"), Provider::Qwen);
        assert_eq!(Provider::infer_from_model("ernie-speed"), Provider::Ernie);
        assert_eq!(Provider::infer_from_model("glm-3-turbo"), Provider::ChatGlm);
        // Everything else is OpenAI.
        assert_eq!(Provider::infer_from_model("gpt-4"), Provider::OpenAi);
        assert_eq!(Provider::infer_from_model("mystery-model"), Provider::OpenAi);
    }

    #[test]
    fn provider_roundtrip() {
        for p in Provider::ALL {
            assert_eq!(Provider::parse(p.as_str()), Some(p));
        }
        assert_eq!(Provider::parse("not-a-provider"), None);
    }
}
