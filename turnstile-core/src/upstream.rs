//! Streaming client for the model-execution back-end.
//!
//! The back-end exposes a unary execute call and a server-stream variant
//! that frames [`StreamChunk`] values as `data: <json>` SSE records. The
//! client holds one persistent connection per process (multiplexed when the
//! back-end negotiates HTTP/2) with a 30 s keepalive ping and a 5 s response
//! window; no pings are sent while no streams are active.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::CoreError;
use crate::models::llm::ModelConfig;

/// Defaults applied inside the client when the caller omitted them.
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_MAX_TOKENS: i32 = 2000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<ToolCallFunction>,
}

/// One server-stream message, tagged by `type`. The same shape is used on
/// the wire from the back-end and on the SSE stream to the client, so the
/// two cannot drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    ContentDelta {
        content_delta: String,
    },
    ToolCall {
        tool_call: ToolCall,
    },
    UsageUpdate {
        usage: Usage,
    },
    FinalResponse {
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        cost: f64,
        execution_time: f64,
    },
    Error {
        error: String,
    },
}

impl StreamChunk {
    /// A `final_response` or `error` chunk terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamChunk::FinalResponse { .. } | StreamChunk::Error { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
    pub provider: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
}

impl AgentRequest {
    pub fn from_config(
        session_id: String,
        messages: Vec<ChatMessage>,
        config: &ModelConfig,
    ) -> Self {
        Self {
            session_id,
            messages,
            provider: config.provider.as_str().to_string(),
            model: config.model.clone(),
            temperature: Some(config.temperature),
            max_tokens: Some(config.max_tokens),
            tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentResponse {
    #[serde(default)]
    pub session_id: String,
    pub message: ChatMessage,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

pub type ChunkStream = BoxStream<'static, Result<StreamChunk, CoreError>>;

/// Contract with the model-execution back-end. The concrete transport is an
/// implementation detail behind this seam; tests substitute their own.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn execute_agent(&self, req: &AgentRequest) -> Result<AgentResponse, CoreError>;

    /// Opens the server stream. The returned stream ends at normal
    /// end-of-stream, after a terminal chunk, or when the caller stops
    /// polling (cancellation).
    async fn execute_agent_stream(&self, req: &AgentRequest) -> Result<ChunkStream, CoreError>;

    /// Provider name to its supported model list.
    async fn get_supported_models(&self) -> Result<BTreeMap<String, Vec<String>>, CoreError>;

    async fn validate_config(&self, config: &ModelConfig) -> Result<(), CoreError>;

    async fn health_check(&self) -> Result<(), CoreError>;

    /// Idempotent. After close, all operations fail with `ClientClosed`.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// HTTP implementation of [`AgentClient`].
pub struct HttpAgentClient {
    client: reqwest::Client,
    base_url: String,
    closed: AtomicBool,
}

impl HttpAgentClient {
    pub fn new(config: &LlmConfig) -> Result<Self, CoreError> {
        Self::with_base_url(config.base_url.clone())
    }

    /// Custom base URL constructor, also the hook for integration tests.
    pub fn with_base_url(base_url: String) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .http2_keep_alive_interval(Duration::from_secs(30))
            .http2_keep_alive_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), CoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::ClientClosed);
        }
        Ok(())
    }

    fn apply_defaults(req: &AgentRequest) -> AgentRequest {
        let mut req = req.clone();
        req.temperature = Some(req.temperature.unwrap_or(DEFAULT_TEMPERATURE));
        req.max_tokens = Some(req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS));
        req
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn execute_agent(&self, req: &AgentRequest) -> Result<AgentResponse, CoreError> {
        self.ensure_open()?;
        let req = Self::apply_defaults(req);

        let response = self
            .client
            .post(format!("{}/v1/agent/execute", self.base_url))
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::Upstream(format!(
                "execute failed (status {status}): {body}"
            )));
        }

        Ok(response.json().await?)
    }

    async fn execute_agent_stream(&self, req: &AgentRequest) -> Result<ChunkStream, CoreError> {
        self.ensure_open()?;
        let req = Self::apply_defaults(req);

        let response = self
            .client
            .post(format!("{}/v1/agent/execute/stream", self.base_url))
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::Upstream(format!(
                "stream open failed (status {status}): {body}"
            )));
        }

        // SSE framing: accumulate `data:` lines until a blank line, decode
        // one chunk per record, stop after a terminal chunk.
        let stream = async_stream::try_stream! {
            let mut body = response.bytes_stream();
            let mut buffer = String::new();
            let mut data_buf = String::new();
            let mut done = false;

            while let Some(piece) = body.next().await {
                let piece = piece
                    .map_err(|e| CoreError::Upstream(format!("stream read error: {e}")))?;
                let text = std::str::from_utf8(&piece)
                    .map_err(|e| CoreError::Upstream(format!("stream utf8 error: {e}")))?;
                buffer.push_str(text);

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer = buffer[pos + 1..].to_string();

                    if let Some(data) = line.strip_prefix("data:") {
                        if !data_buf.is_empty() {
                            data_buf.push('\n');
                        }
                        data_buf.push_str(data.trim_start());
                    } else if line.is_empty() && !data_buf.is_empty() {
                        let chunk: StreamChunk = serde_json::from_str(&data_buf)
                            .map_err(|e| CoreError::Upstream(format!(
                                "stream decode error: {e}; payload={data_buf}"
                            )))?;
                        data_buf.clear();
                        let terminal = chunk.is_terminal();
                        yield chunk;
                        if terminal {
                            done = true;
                            break;
                        }
                    }
                }

                if done {
                    break;
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn get_supported_models(&self) -> Result<BTreeMap<String, Vec<String>>, CoreError> {
        self.ensure_open()?;

        #[derive(Deserialize)]
        struct ProviderModels {
            #[serde(default)]
            models: Vec<String>,
        }
        #[derive(Deserialize)]
        struct ModelsResponse {
            #[serde(default)]
            providers: BTreeMap<String, ProviderModels>,
        }

        let response: ModelsResponse = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| CoreError::Upstream(format!("get models failed: {e}")))?
            .json()
            .await?;

        Ok(response
            .providers
            .into_iter()
            .map(|(name, p)| (name, p.models))
            .collect())
    }

    async fn validate_config(&self, config: &ModelConfig) -> Result<(), CoreError> {
        self.ensure_open()?;

        #[derive(Deserialize)]
        struct ValidateResponse {
            valid: bool,
            #[serde(default)]
            error_message: String,
        }

        let response: ValidateResponse = self
            .client
            .post(format!("{}/v1/config/validate", self.base_url))
            .json(&serde_json::json!({
                "provider": config.provider.as_str(),
                "model": config.model,
                "temperature": config.temperature,
                "max_tokens": config.max_tokens,
            }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| CoreError::Upstream(format!("validate failed: {e}")))?
            .json()
            .await?;

        if !response.valid {
            return Err(CoreError::InvalidInput(response.error_message));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CoreError> {
        self.ensure_open()?;

        #[derive(Deserialize)]
        struct HealthResponse {
            status: String,
        }

        let response: HealthResponse = self
            .client
            .get(format!("{}/healthz", self.base_url))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| CoreError::Upstream(format!("health check failed: {e}")))?
            .json()
            .await?;

        if response.status != "healthy" && response.status != "ok" {
            return Err(CoreError::Upstream(format!(
                "back-end unhealthy: {}",
                response.status
            )));
        }
        Ok(())
    }

    fn close(&self) {
        // First close wins; repeats are no-ops. In-flight streams are
        // allowed to finish, new calls fail fast.
        self.closed.swap(true, Ordering::AcqRel);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> AgentRequest {
        AgentRequest {
            session_id: "s1".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            provider: "openai".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
        }
    }

    #[test]
    fn chunk_tagging_matches_wire_format() {
        let chunk: StreamChunk =
            serde_json::from_str(r#"{"type":"content_delta","content_delta":"He"}"#).unwrap();
        assert!(matches!(chunk, StreamChunk::ContentDelta { ref content_delta } if content_delta == "He"));

        let encoded = serde_json::to_value(&StreamChunk::FinalResponse {
            usage: Some(Usage {
                prompt_tokens: 3,
                completion_tokens: 7,
                total_tokens: 10,
            }),
            cost: 0.0002,
            execution_time: 1.5,
        })
        .unwrap();
        assert_eq!(encoded["type"], "final_response");
        assert_eq!(encoded["usage"]["total_tokens"], 10);
        assert_eq!(encoded["cost"], 0.0002);
    }

    #[test]
    fn unknown_wire_fields_are_ignored() {
        // The back-end also tags chunks with session_id; the client does
        // not care.
        let chunk: StreamChunk = serde_json::from_str(
            r#"{"type":"usage_update","session_id":"s1","usage":{"prompt_tokens":1,"completion_tokens":2,"total_tokens":3}}"#,
        )
        .unwrap();
        assert!(matches!(chunk, StreamChunk::UsageUpdate { usage } if usage.total_tokens == 3));
    }

    #[tokio::test]
    async fn execute_agent_applies_defaults_and_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/agent/execute"))
            .and(wiremock::matchers::body_partial_json(serde_json::json!({
                "temperature": 0.7,
                "max_tokens": 2000,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "session_id": "s1",
                "message": {"role": "assistant", "content": "hello"},
                "usage": {"prompt_tokens": 3, "completion_tokens": 7, "total_tokens": 10},
                "cost": 0.0002,
                "execution_time": 1.5,
            })))
            .mount(&server)
            .await;

        let client = HttpAgentClient::with_base_url(server.uri()).unwrap();
        let response = client.execute_agent(&request()).await.unwrap();
        assert_eq!(response.message.content, "hello");
        assert_eq!(response.usage.total_tokens, 10);
        assert_eq!(response.cost, 0.0002);
    }

    #[tokio::test]
    async fn stream_decodes_chunks_and_stops_at_final_response() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"type\":\"content_delta\",\"content_delta\":\"He\"}\n\n",
            "data: {\"type\":\"content_delta\",\"content_delta\":\"llo\"}\n\n",
            "data: {\"type\":\"usage_update\",\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":7,\"total_tokens\":10}}\n\n",
            "data: {\"type\":\"final_response\",\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":7,\"total_tokens\":10},\"cost\":0.0002,\"execution_time\":1.5}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/agent/execute/stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let client = HttpAgentClient::with_base_url(server.uri()).unwrap();
        let mut stream = client.execute_agent_stream(&request()).await.unwrap();

        let mut chunks = Vec::new();
        while let Some(item) = stream.next().await {
            chunks.push(item.unwrap());
        }

        assert_eq!(chunks.len(), 4);
        assert!(matches!(&chunks[0], StreamChunk::ContentDelta { content_delta } if content_delta == "He"));
        assert!(matches!(&chunks[3], StreamChunk::FinalResponse { cost, .. } if *cost == 0.0002));
    }

    #[tokio::test]
    async fn auxiliary_endpoints_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "providers": {
                    "openai": {"models": ["gpt-3.5-turbo", "gpt-4"]},
                    "deepseek": {"models": ["deepseek-chat"]},
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/config/validate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "valid": false,
                "error_message": "model not served",
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/healthz"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "healthy"})),
            )
            .mount(&server)
            .await;

        let client = HttpAgentClient::with_base_url(server.uri()).unwrap();

        let models = client.get_supported_models().await.unwrap();
        assert_eq!(models["openai"], vec!["gpt-3.5-turbo", "gpt-4"]);
        assert_eq!(models.len(), 2);

        let config = ModelConfig {
            provider: crate::models::llm::Provider::OpenAi,
            model: "gpt-9".to_string(),
            base_url: String::new(),
            temperature: 0.7,
            max_tokens: 2000,
        };
        let err = client.validate_config(&config).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(msg) if msg == "model not served"));

        client.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn closed_client_rejects_all_operations() {
        let client = HttpAgentClient::with_base_url("http://localhost:1".to_string()).unwrap();
        assert!(!client.is_closed());
        client.close();
        client.close(); // idempotent
        assert!(client.is_closed());

        let err = client.execute_agent(&request()).await.unwrap_err();
        assert!(matches!(err, CoreError::ClientClosed));
        let err = client.get_supported_models().await.unwrap_err();
        assert!(matches!(err, CoreError::ClientClosed));
    }
}
