//! The request-turn pipeline, unary and streaming.
//!
//! Both endpoints share the same nine steps: validate the session and
//! payload, open a trace, snapshot the inputs, invoke the back-end, record
//! the execution step, persist messages, account the budget, snapshot the
//! outputs, close the trace. They differ only in how the model response is
//! consumed.
//!
//! Tracing, message-persist, and budget failures are logged and never
//! surfaced: a turn that reached the model must not fail because the
//! bookkeeping did.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONNECTION, USER_AGENT};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use turnstile_core::models::llm::ModelConfig;
use turnstile_core::models::session::Message;
use turnstile_core::models::trace::{
    ExecutionStep, Snapshot, TraceStatus, STEP_LLM_CALL, STEP_LLM_CALL_STREAM,
};
use turnstile_core::upstream::{AgentRequest, ChatMessage, StreamChunk, ToolCall, Usage};
use turnstile_core::{ChatOptions, TurnScope};

use crate::middleware::RequestId;
use crate::state::AppState;
use crate::watchdog::ActivityMonitor;

use super::{error_body, error_body_with};

pub const AGENT_SIMPLE_CHAT: &str = "simple_chat";
pub const AGENT_STREAM_CHAT: &str = "stream_chat";

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<MessageRequest>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub message: MessageResponse,
    pub usage: Usage,
    pub cost: f64,
    pub execution_time: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub role: String,
    pub content: String,
}

/// Everything the two endpoints share before the upstream call.
struct Turn {
    session_id: Uuid,
    /// Domain messages destined for the message store.
    messages: Vec<Message>,
    /// The same messages in wire shape for the back-end.
    wire_messages: Vec<ChatMessage>,
    config: ModelConfig,
}

pub fn validate_messages(messages: &[MessageRequest]) -> Result<(), String> {
    if messages.is_empty() {
        return Err("messages are required".to_string());
    }
    for message in messages {
        match message.role.as_str() {
            "user" | "assistant" | "system" => {}
            other => return Err(format!("invalid role: {other}")),
        }
        if message.content.is_empty() {
            return Err("message content is required".to_string());
        }
    }
    Ok(())
}

fn prepare_turn(
    state: &AppState,
    session_id: Uuid,
    req: ChatRequest,
) -> Result<Turn, (StatusCode, Json<super::ApiError>)> {
    if let Err(msg) = validate_messages(&req.messages) {
        return Err((
            StatusCode::BAD_REQUEST,
            error_body_with("INVALID_INPUT", msg),
        ));
    }

    let options = ChatOptions {
        provider: req.provider,
        model: req.model,
        temperature: req.temperature,
        max_tokens: req.max_tokens,
    };
    let config = state.llm.resolve(&options).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            error_body_with("INVALID_CONFIG", e.to_string()),
        )
    })?;

    let messages: Vec<Message> = req
        .messages
        .iter()
        .map(|m| Message::new(session_id, m.role.clone(), m.content.clone()))
        .collect();
    let wire_messages = messages
        .iter()
        .map(|m| ChatMessage {
            role: m.role.clone(),
            content: m.content.clone(),
        })
        .collect();

    Ok(Turn {
        session_id,
        messages,
        wire_messages,
        config,
    })
}

fn turn_metadata(headers: &HeaderMap, request_id: Option<&RequestId>, source: &str) -> serde_json::Value {
    let header = |name| {
        headers
            .get(name)
            .and_then(|v: &axum::http::HeaderValue| v.to_str().ok())
            .unwrap_or_default()
    };
    serde_json::json!({
        "user_agent": header(USER_AGENT.as_str()),
        "ip_address": header("x-forwarded-for"),
        "request_id": request_id.map(|r| r.0.as_str()).unwrap_or_default(),
        "source": source,
        "agent_version": env!("CARGO_PKG_VERSION"),
    })
}

/// Opens the trace and records the `pre_llm` snapshot. Both writes are
/// soft: a broken trace store yields `None` and the turn proceeds.
async fn open_trace(state: &AppState, turn: &Turn, agent_name: &str, mut metadata: serde_json::Value) -> Option<TurnScope> {
    metadata["model"] = serde_json::Value::String(turn.config.model.clone());

    let trace = match state
        .tracer
        .start_trace(&turn.session_id.to_string(), agent_name, metadata)
        .await
    {
        Ok(trace) => trace,
        Err(e) => {
            tracing::error!(session_id = %turn.session_id, error = %e, "failed to start trace");
            return None;
        }
    };
    tracing::info!(trace_id = %trace.id, agent_name, "trace started");

    let scope = TurnScope::new(state.tracer.clone(), trace.id);
    scope
        .record_snapshot(&Snapshot::pre_llm(
            serde_json::to_value(&turn.messages).unwrap_or_default(),
            serde_json::json!({
                "messages_count": turn.messages.len(),
                "model": turn.config.model,
                "provider": turn.config.provider,
            }),
            serde_json::json!({
                "llm_config": turn.config,
                "session_id": turn.session_id,
            }),
        ))
        .await;
    Some(scope)
}

async fn record_post_snapshot(
    scope: &TurnScope,
    turn: &Turn,
    output: serde_json::Value,
    total_tokens: i32,
    total_cost: f64,
    latency_ms: i64,
) {
    scope
        .record_snapshot(&Snapshot::post_llm(
            serde_json::to_value(&turn.messages).unwrap_or_default(),
            output,
            serde_json::json!({
                "messages_count": turn.messages.len() + 1,
                "model": turn.config.model,
                "provider": turn.config.provider,
                "total_tokens": total_tokens,
                "cost": total_cost,
            }),
            serde_json::json!({
                "llm_config": turn.config,
                "session_id": turn.session_id,
                "latency_ms": latency_ms,
            }),
        ))
        .await;
}

/// Persist the turn's messages and account the budget. All failures are
/// logged only; the client already has its response.
async fn finalize_turn(state: &AppState, turn: &Turn, assistant_content: &str, total_tokens: i32, total_cost: f64) {
    for message in &turn.messages {
        if let Err(e) = state.messages.create(message).await {
            tracing::error!(session_id = %turn.session_id, error = %e, "failed to save message");
        }
    }

    let assistant = Message::new(turn.session_id, "assistant", assistant_content)
        .with_tokens(total_tokens);
    if let Err(e) = state.messages.create(&assistant).await {
        tracing::error!(session_id = %turn.session_id, error = %e, "failed to save assistant message");
    }

    if let Err(e) = state
        .sessions
        .increment_budget(turn.session_id, total_tokens, total_cost)
        .await
    {
        tracing::error!(session_id = %turn.session_id, error = %e, "failed to update session budget");
    }
}

// ============================================================================
// Unary path
// ============================================================================

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request_id: Option<Extension<RequestId>>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Ok(session_id) = Uuid::parse_str(&id) else {
        return (StatusCode::BAD_REQUEST, error_body("INVALID_SESSION_ID")).into_response();
    };

    if let Err(response) = load_session(&state, session_id).await {
        return response;
    }

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

    let turn = match prepare_turn(&state, session_id, req) {
        Ok(turn) => turn,
        Err(response) => return response.into_response(),
    };

    tracing::info!(
        session_id = %session_id,
        provider = turn.config.provider.as_str(),
        model = %turn.config.model,
        messages_count = turn.messages.len(),
        "executing chat"
    );

    let request_id = request_id.map(|Extension(id)| id);
    let metadata = turn_metadata(&headers, request_id.as_ref(), "http_api");
    let scope = open_trace(&state, &turn, AGENT_SIMPLE_CHAT, metadata).await;

    let request = AgentRequest::from_config(
        session_id.to_string(),
        turn.wire_messages.clone(),
        &turn.config,
    );

    let start = Instant::now();
    let response = match state.agent.execute_agent(&request).await {
        Ok(response) => response,
        Err(e) => {
            if let Some(scope) = &scope {
                scope.end(TraceStatus::Failed).await;
            }
            tracing::error!(session_id = %session_id, error = %e, "chat execution failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body_with("CHAT_EXECUTION_FAILED", e.to_string()),
            )
                .into_response();
        }
    };
    let latency = start.elapsed();

    let total_tokens = response.usage.total_tokens;
    let output = serde_json::json!({
        "message": {"role": response.message.role, "content": response.message.content},
        "usage": response.usage,
        "cost": response.cost,
        "execution_time": response.execution_time,
    });

    if let Some(scope) = &scope {
        let mut step = ExecutionStep::new(&scope.trace_id, STEP_LLM_CALL);
        step.input = serde_json::to_value(&turn.messages).unwrap_or_default();
        step.output = output.clone();
        step.cost_tokens = total_tokens;
        step.cost_api = response.cost;
        step.latency_ms = latency.as_millis() as i32;
        scope.record_step(step).await;
    }

    finalize_turn(&state, &turn, &response.message.content, total_tokens, response.cost).await;

    if let Some(scope) = &scope {
        record_post_snapshot(
            scope,
            &turn,
            output,
            total_tokens,
            response.cost,
            latency.as_millis() as i64,
        )
        .await;
        scope.end(TraceStatus::Completed).await;
    }

    tracing::info!(
        session_id = %session_id,
        cost = response.cost,
        execution_time = response.execution_time,
        total_tokens,
        "chat executed"
    );

    (
        StatusCode::OK,
        Json(ChatResponse {
            message: MessageResponse {
                role: response.message.role,
                content: response.message.content,
            },
            usage: response.usage,
            cost: response.cost,
            execution_time: response.execution_time,
            tool_calls: response.tool_calls,
            trace_id: scope.map(|s| s.trace_id),
        }),
    )
        .into_response()
}

// ============================================================================
// Streaming path
// ============================================================================

pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request_id: Option<Extension<RequestId>>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Ok(session_id) = Uuid::parse_str(&id) else {
        return (StatusCode::BAD_REQUEST, error_body("INVALID_SESSION_ID")).into_response();
    };

    if let Err(response) = load_session(&state, session_id).await {
        return response;
    }

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

    let turn = match prepare_turn(&state, session_id, req) {
        Ok(turn) => turn,
        Err(response) => return response.into_response(),
    };

    tracing::info!(
        session_id = %session_id,
        provider = turn.config.provider.as_str(),
        model = %turn.config.model,
        messages_count = turn.messages.len(),
        "executing stream chat"
    );

    let request_id = request_id.map(|Extension(id)| id);
    let metadata = turn_metadata(&headers, request_id.as_ref(), "http_api_stream");
    let scope = open_trace(&state, &turn, AGENT_STREAM_CHAT, metadata).await;

    // The turn runs in its own task, bridged to the SSE body through a
    // channel: a dropped client surfaces as a send failure in the task
    // rather than silently dropping the in-flight bookkeeping.
    let (tx, mut rx) = mpsc::channel::<Event>(32);
    tokio::spawn(run_stream_turn(state, scope, turn, tx));

    let body_stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok::<Event, Infallible>(event);
        }
    };

    (
        [(CACHE_CONTROL, "no-cache"), (CONNECTION, "keep-alive")],
        Sse::new(body_stream),
    )
        .into_response()
}

/// Sends one chunk as an SSE record. `false` means the client is gone.
async fn send_chunk(tx: &mpsc::Sender<Event>, chunk: &StreamChunk) -> bool {
    let Ok(payload) = serde_json::to_string(chunk) else {
        tracing::error!("failed to encode stream chunk");
        return true;
    };
    tx.send(Event::default().data(payload)).await.is_ok()
}

async fn send_done(tx: &mpsc::Sender<Event>) {
    let _ = tx
        .send(Event::default().data(r#"{"type":"done"}"#))
        .await;
}

async fn run_stream_turn(
    state: Arc<AppState>,
    scope: Option<TurnScope>,
    turn: Turn,
    tx: mpsc::Sender<Event>,
) {
    let monitor = ActivityMonitor::new(&state.config.stream);
    tracing::info!(
        session_id = %turn.session_id,
        activity_timeout_secs = state.config.stream.activity_timeout_secs,
        max_total_timeout_secs = state.config.stream.max_total_timeout_secs,
        "starting activity monitor"
    );
    monitor.start();
    let cancel = monitor.token();

    let request = AgentRequest::from_config(
        turn.session_id.to_string(),
        turn.wire_messages.clone(),
        &turn.config,
    );

    let start = Instant::now();
    let mut stream = match state.agent.execute_agent_stream(&request).await {
        Ok(stream) => stream,
        Err(e) => {
            fail_stream(&tx, &scope, &e.to_string()).await;
            return;
        }
    };

    let mut full_content = String::new();
    let mut total_tokens = 0i32;
    let mut total_cost = 0.0f64;
    let mut execution_time = 0.0f64;
    let mut finished = false;

    while !finished {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Dropping the chunk stream cancels the upstream call.
                let message = monitor
                    .cancel_cause()
                    .map(|c| c.message())
                    .unwrap_or_else(|| "client disconnected".to_string());
                tracing::error!(session_id = %turn.session_id, cause = %message, "stream cancelled");
                fail_stream(&tx, &scope, &message).await;
                return;
            }
            item = stream.next() => {
                match item {
                    None => break,
                    Some(Err(e)) => {
                        tracing::error!(session_id = %turn.session_id, error = %e, "stream chat failed");
                        fail_stream(&tx, &scope, &e.to_string()).await;
                        return;
                    }
                    Some(Ok(chunk)) => {
                        monitor.update_activity();
                        match &chunk {
                            StreamChunk::ContentDelta { content_delta } => {
                                full_content.push_str(content_delta);
                            }
                            StreamChunk::UsageUpdate { usage } => {
                                total_tokens = usage.total_tokens;
                            }
                            StreamChunk::FinalResponse { usage, cost, execution_time: exec_time } => {
                                if let Some(usage) = usage {
                                    total_tokens = usage.total_tokens;
                                }
                                total_cost = *cost;
                                execution_time = *exec_time;

                                if let Some(scope) = &scope {
                                    let mut step = ExecutionStep::new(&scope.trace_id, STEP_LLM_CALL_STREAM);
                                    step.input =
                                        serde_json::to_value(&turn.messages).unwrap_or_default();
                                    step.output = serde_json::json!({
                                        "message": {"role": "assistant", "content": full_content},
                                        "usage": usage,
                                        "cost": cost,
                                        "execution_time": exec_time,
                                    });
                                    step.cost_tokens = total_tokens;
                                    step.cost_api = total_cost;
                                    step.latency_ms = (exec_time * 1000.0) as i32;
                                    scope.record_step(step).await;
                                }
                                finished = true;
                            }
                            StreamChunk::Error { error } => {
                                tracing::error!(session_id = %turn.session_id, error = %error, "upstream error chunk");
                                fail_stream(&tx, &scope, error).await;
                                return;
                            }
                            StreamChunk::ToolCall { .. } => {}
                        }

                        if !send_chunk(&tx, &chunk).await {
                            tracing::info!(session_id = %turn.session_id, "client disconnected mid-stream");
                            monitor.stop();
                            if let Some(scope) = &scope {
                                scope.end_with_error(TraceStatus::Failed, "client disconnected").await;
                            }
                            return;
                        }
                    }
                }
            }
        }
    }

    monitor.stop();
    let latency = start.elapsed();

    finalize_turn(&state, &turn, &full_content, total_tokens, total_cost).await;

    if let Some(scope) = &scope {
        record_post_snapshot(
            scope,
            &turn,
            serde_json::Value::String(full_content.clone()),
            total_tokens,
            total_cost,
            latency.as_millis() as i64,
        )
        .await;
        scope.end(TraceStatus::Completed).await;
    }

    tracing::info!(
        session_id = %turn.session_id,
        cost = total_cost,
        total_tokens,
        execution_time,
        "stream chat executed"
    );

    send_done(&tx).await;
}

/// Emits a synthetic `error` event and closes the trace as failed. Used
/// for upstream failures, error chunks, and watchdog cancellations alike.
async fn fail_stream(tx: &mpsc::Sender<Event>, scope: &Option<TurnScope>, message: &str) {
    let _ = send_chunk(
        tx,
        &StreamChunk::Error {
            error: message.to_string(),
        },
    )
    .await;
    if let Some(scope) = scope {
        scope.end_with_error(TraceStatus::Failed, message).await;
    }
}

async fn load_session(state: &AppState, session_id: Uuid) -> Result<(), Response> {
    match state.sessions.get(session_id).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            tracing::error!(session_id = %session_id, "session not found");
            Err((StatusCode::NOT_FOUND, error_body("SESSION_NOT_FOUND")).into_response())
        }
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "failed to load session");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body_with("CHAT_EXECUTION_FAILED", e.to_string()),
            )
                .into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> MessageRequest {
        MessageRequest {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn messages_are_required() {
        assert!(validate_messages(&[]).is_err());
        assert!(validate_messages(&[msg("user", "hi")]).is_ok());
    }

    #[test]
    fn roles_come_from_the_closed_set() {
        assert!(validate_messages(&[msg("user", "a"), msg("assistant", "b"), msg("system", "c")]).is_ok());
        let err = validate_messages(&[msg("robot", "a")]).unwrap_err();
        assert!(err.contains("invalid role"));
    }

    #[test]
    fn empty_content_is_rejected() {
        assert!(validate_messages(&[msg("user", "")]).is_err());
    }

    #[test]
    fn metadata_carries_request_context() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, "test-agent/1.0".parse().unwrap());
        let request_id = RequestId("req-1".to_string());
        let metadata = turn_metadata(&headers, Some(&request_id), "http_api_stream");
        assert_eq!(metadata["user_agent"], "test-agent/1.0");
        assert_eq!(metadata["request_id"], "req-1");
        assert_eq!(metadata["source"], "http_api_stream");
        assert!(metadata["agent_version"].is_string());
    }
}
