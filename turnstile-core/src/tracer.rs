//! Execution tracing: one `Trace` per turn, populated with ordered steps
//! and pre/post snapshots through the trace store.
//!
//! Tracer failures are soft by convention — the turn orchestrator logs and
//! continues, so a broken trace store never fails a user-visible turn.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::trace::{ExecutionStep, Snapshot, Trace, TraceStatus, STEP_SNAPSHOT};
use crate::store::TraceStore;

#[derive(Clone)]
pub struct Tracer {
    store: TraceStore,
}

impl Tracer {
    pub fn new(store: TraceStore) -> Self {
        Self { store }
    }

    /// Creates a `running` trace. Metadata is taken here, up front, so the
    /// stored row is complete from the first write.
    pub async fn start_trace(
        &self,
        session_id: &str,
        agent_name: &str,
        metadata: serde_json::Value,
    ) -> Result<Trace, CoreError> {
        let now = Utc::now();
        let trace = Trace {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            agent_name: agent_name.to_string(),
            status: TraceStatus::Running,
            started_at: now,
            ended_at: None,
            cost_tokens: 0,
            cost_api: 0.0,
            metadata,
            created_at: now,
        };
        self.store.create_trace(&trace).await?;
        Ok(trace)
    }

    /// Records one step. Identifier and timestamps are filled in when
    /// absent; sequence assignment and cost accumulation happen in the
    /// store, in one transaction with the insert.
    pub async fn record_step(&self, mut step: ExecutionStep) -> Result<i32, CoreError> {
        if step.trace_id.is_empty() {
            return Err(CoreError::InvalidInput("step requires a trace_id".into()));
        }
        if step.id.is_empty() {
            step.id = Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        step.created_at = now;
        step.updated_at = now;

        self.store.create_step(&step).await
    }

    /// Stores a snapshot as an auxiliary step of type `snapshot`.
    pub async fn record_snapshot(
        &self,
        trace_id: &str,
        snapshot: &Snapshot,
    ) -> Result<i32, CoreError> {
        let mut step = ExecutionStep::new(trace_id, STEP_SNAPSHOT);
        step.snapshot = serde_json::to_value(snapshot)
            .map_err(|e| CoreError::Other(format!("failed to encode snapshot: {e}")))?;
        self.record_step(step).await
    }

    pub async fn end_trace(&self, trace_id: &str, status: TraceStatus) -> Result<(), CoreError> {
        self.store.update_status(trace_id, status, Utc::now()).await
    }

    pub async fn end_trace_with_error(
        &self,
        trace_id: &str,
        status: TraceStatus,
        error_text: &str,
    ) -> Result<(), CoreError> {
        self.store
            .update_status_with_error(trace_id, status, Utc::now(), error_text)
            .await
    }

    pub async fn get_trace(
        &self,
        trace_id: &str,
    ) -> Result<(Trace, Vec<ExecutionStep>), CoreError> {
        let trace = self.store.get_trace(trace_id).await?;
        let steps = self.store.get_steps(trace_id).await?;
        Ok((trace, steps))
    }
}

/// Explicit handle for the current turn's tracing, threaded through the
/// orchestrator and any deeper collaborators (tool calls) instead of an
/// implicit ambient context.
#[derive(Clone)]
pub struct TurnScope {
    pub tracer: Arc<Tracer>,
    pub trace_id: String,
}

impl TurnScope {
    pub fn new(tracer: Arc<Tracer>, trace_id: impl Into<String>) -> Self {
        Self {
            tracer,
            trace_id: trace_id.into(),
        }
    }

    /// Soft-record a step: failures are logged, never propagated.
    pub async fn record_step(&self, step: ExecutionStep) {
        if let Err(e) = self.tracer.record_step(step).await {
            tracing::error!(trace_id = %self.trace_id, error = %e, "failed to record step");
        }
    }

    /// Soft-record a snapshot: failures are logged, never propagated.
    pub async fn record_snapshot(&self, snapshot: &Snapshot) {
        if let Err(e) = self.tracer.record_snapshot(&self.trace_id, snapshot).await {
            tracing::error!(trace_id = %self.trace_id, error = %e, "failed to record snapshot");
        }
    }

    /// Soft-close the trace.
    pub async fn end(&self, status: TraceStatus) {
        if let Err(e) = self.tracer.end_trace(&self.trace_id, status).await {
            tracing::error!(trace_id = %self.trace_id, error = %e, "failed to end trace");
        }
    }

    /// Soft-close the trace with an error description.
    pub async fn end_with_error(&self, status: TraceStatus, error_text: &str) {
        if let Err(e) = self
            .tracer
            .end_trace_with_error(&self.trace_id, status, error_text)
            .await
        {
            tracing::error!(trace_id = %self.trace_id, error = %e, "failed to end trace");
        }
    }
}
