use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a trace. A trace is created `Running` and transitions
/// exactly once to a terminal state. Stored as lowercase text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Running,
    Completed,
    Failed,
    Error,
}

impl TraceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TraceStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Running => "running",
            TraceStatus::Completed => "completed",
            TraceStatus::Failed => "failed",
            TraceStatus::Error => "error",
        }
    }
}

impl TryFrom<String> for TraceStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        match value.as_str() {
            "running" => Ok(TraceStatus::Running),
            "completed" => Ok(TraceStatus::Completed),
            "failed" => Ok(TraceStatus::Failed),
            "error" => Ok(TraceStatus::Error),
            other => Err(format!("unknown trace status: {other}")),
        }
    }
}

/// Root record of one execution of one agent kind on one session turn.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Trace {
    pub id: String,
    pub session_id: String,
    pub agent_name: String,
    #[sqlx(try_from = "String")]
    pub status: TraceStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cost_tokens: i32,
    pub cost_api: f64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Step types recorded within a trace.
pub const STEP_LLM_CALL: &str = "llm_call";
pub const STEP_LLM_CALL_STREAM: &str = "llm_call_stream";
pub const STEP_TOOL_CALL: &str = "tool_call";
pub const STEP_SNAPSHOT: &str = "snapshot";

/// Ordered unit of work within a trace. `sequence` is per-trace monotonic
/// starting at 1 and assigned by the store when left at zero.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExecutionStep {
    pub id: String,
    pub trace_id: String,
    pub sequence: i32,
    pub step_type: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub cost_tokens: i32,
    pub cost_api: f64,
    pub latency_ms: i32,
    pub snapshot: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionStep {
    pub fn new(trace_id: impl Into<String>, step_type: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            trace_id: trace_id.into(),
            sequence: 0,
            step_type: step_type.to_string(),
            input: serde_json::Value::Null,
            output: serde_json::Value::Null,
            cost_tokens: 0,
            cost_api: 0.0,
            latency_ms: 0,
            snapshot: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStage {
    PreLlm,
    PostLlm,
}

/// Determinism capture stored as a step of type `snapshot`. Enough to diff
/// two traces; not a reproducer (upstream sampling is not captured).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub stage: SnapshotStage,
    pub timestamp: DateTime<Utc>,
    pub input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    pub state: serde_json::Value,
    pub context: serde_json::Value,
}

impl Snapshot {
    pub fn pre_llm(input: serde_json::Value, state: serde_json::Value, context: serde_json::Value) -> Self {
        Self {
            stage: SnapshotStage::PreLlm,
            timestamp: Utc::now(),
            input,
            output: None,
            state,
            context,
        }
    }

    pub fn post_llm(
        input: serde_json::Value,
        output: serde_json::Value,
        state: serde_json::Value,
        context: serde_json::Value,
    ) -> Self {
        Self {
            stage: SnapshotStage::PostLlm,
            timestamp: Utc::now(),
            input,
            output: Some(output),
            state,
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!TraceStatus::Running.is_terminal());
        assert!(TraceStatus::Completed.is_terminal());
        assert!(TraceStatus::Failed.is_terminal());
        assert!(TraceStatus::Error.is_terminal());
    }

    #[test]
    fn snapshot_stage_serialises_snake_case() {
        let snap = Snapshot::pre_llm(
            serde_json::json!([]),
            serde_json::json!({}),
            serde_json::json!({}),
        );
        let v = serde_json::to_value(&snap).unwrap();
        assert_eq!(v["stage"], "pre_llm");
        assert!(v.get("output").is_none(), "pre_llm has no output field");
    }
}
