use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::CoreError;
use crate::models::trace::{ExecutionStep, Trace, TraceStatus};

/// Persistence for traces and their ordered execution steps.
///
/// Terminal transitions are idempotent: repeating the same terminal status
/// is a no-op, a different terminal is a conflict. Step sequence numbers
/// are assigned server-side under a per-trace advisory lock so concurrent
/// recorders cannot collide.
#[derive(Clone)]
pub struct TraceStore {
    pool: PgPool,
}

impl TraceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_trace(&self, trace: &Trace) -> Result<(), CoreError> {
        sqlx::query(
            r#"INSERT INTO traces
                   (id, session_id, agent_name, status, started_at, ended_at,
                    cost_tokens, cost_api, metadata, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
        )
        .bind(&trace.id)
        .bind(&trace.session_id)
        .bind(&trace.agent_name)
        .bind(trace.status.as_str())
        .bind(trace.started_at)
        .bind(trace.ended_at)
        .bind(trace.cost_tokens)
        .bind(trace.cost_api)
        .bind(&trace.metadata)
        .bind(trace.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;
        Ok(())
    }

    pub async fn get_trace(&self, trace_id: &str) -> Result<Trace, CoreError> {
        sqlx::query_as(
            r#"SELECT id, session_id, agent_name, status, started_at, ended_at,
                      cost_tokens, cost_api, metadata, created_at
               FROM traces WHERE id = $1"#,
        )
        .bind(trace_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CoreError::NotFound("trace"))
    }

    pub async fn get_session_traces(&self, session_id: &str) -> Result<Vec<Trace>, CoreError> {
        let traces = sqlx::query_as(
            r#"SELECT id, session_id, agent_name, status, started_at, ended_at,
                      cost_tokens, cost_api, metadata, created_at
               FROM traces WHERE session_id = $1
               ORDER BY created_at DESC"#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(traces)
    }

    pub async fn update_status(
        &self,
        trace_id: &str,
        status: TraceStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.transition(trace_id, status, ended_at, None).await
    }

    pub async fn update_status_with_error(
        &self,
        trace_id: &str,
        status: TraceStatus,
        ended_at: DateTime<Utc>,
        error_text: &str,
    ) -> Result<(), CoreError> {
        self.transition(trace_id, status, ended_at, Some(error_text))
            .await
    }

    /// Single terminal transition. Only a `running` row is updated; a
    /// repeat with the SAME terminal status leaves the stored row exactly
    /// as it was, a different terminal fails with a conflict.
    async fn transition(
        &self,
        trace_id: &str,
        status: TraceStatus,
        ended_at: DateTime<Utc>,
        error_text: Option<&str>,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"UPDATE traces
               SET status = $2, ended_at = $3, error = COALESCE($4, error)
               WHERE id = $1 AND status = 'running'"#,
        )
        .bind(trace_id)
        .bind(status.as_str())
        .bind(ended_at)
        .bind(error_text)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM traces WHERE id = $1")
                .bind(trace_id)
                .fetch_optional(&self.pool)
                .await?;

        match current {
            None => Err(CoreError::NotFound("trace")),
            Some((existing,)) if existing == status.as_str() => Ok(()),
            Some((existing,)) => Err(CoreError::Conflict(format!(
                "trace {trace_id} already ended as {existing}, refusing {}",
                status.as_str()
            ))),
        }
    }

    /// Commutative accumulate on the aggregated cost fields. Safe under
    /// concurrent callers writing the same trace.
    pub async fn add_cost(
        &self,
        trace_id: &str,
        tokens: i32,
        api_cost: f64,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"UPDATE traces
               SET cost_tokens = cost_tokens + $2,
                   cost_api = cost_api + $3
               WHERE id = $1"#,
        )
        .bind(trace_id)
        .bind(tokens)
        .bind(api_cost)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts a step; when `step.sequence == 0` the next sequence number
    /// is computed inside the transaction under a per-trace advisory lock.
    /// A step that declares cost also accumulates onto the parent trace in
    /// the same transaction. Returns the assigned sequence.
    pub async fn create_step(&self, step: &ExecutionStep) -> Result<i32, CoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&step.trace_id)
            .execute(&mut *tx)
            .await?;

        let (sequence,): (i32,) = sqlx::query_as(
            r#"INSERT INTO execution_steps
                   (id, trace_id, sequence, step_type, input, output,
                    cost_tokens, cost_api, latency_ms, snapshot,
                    created_at, updated_at)
               VALUES ($1, $2,
                       CASE WHEN $3 = 0 THEN
                           (SELECT COUNT(*) + 1 FROM execution_steps WHERE trace_id = $2)
                       ELSE $3 END,
                       $4, $5, $6, $7, $8, $9, $10, $11, $12)
               RETURNING sequence"#,
        )
        .bind(&step.id)
        .bind(&step.trace_id)
        .bind(step.sequence)
        .bind(&step.step_type)
        .bind(&step.input)
        .bind(&step.output)
        .bind(step.cost_tokens)
        .bind(step.cost_api)
        .bind(step.latency_ms)
        .bind(&step.snapshot)
        .bind(step.created_at)
        .bind(step.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique_violation)?;

        if step.cost_tokens > 0 || step.cost_api > 0.0 {
            sqlx::query(
                r#"UPDATE traces
                   SET cost_tokens = cost_tokens + $2,
                       cost_api = cost_api + $3
                   WHERE id = $1"#,
            )
            .bind(&step.trace_id)
            .bind(step.cost_tokens)
            .bind(step.cost_api)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(sequence)
    }

    pub async fn get_steps(&self, trace_id: &str) -> Result<Vec<ExecutionStep>, CoreError> {
        let steps = sqlx::query_as(
            r#"SELECT id, trace_id, sequence, step_type, input, output,
                      cost_tokens, cost_api, latency_ms, snapshot,
                      created_at, updated_at
               FROM execution_steps WHERE trace_id = $1
               ORDER BY sequence ASC"#,
        )
        .bind(trace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(steps)
    }
}

fn map_unique_violation(err: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return CoreError::Conflict(db_err.message().to_string());
        }
    }
    CoreError::Database(err)
}
