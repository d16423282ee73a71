use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Idempotent schema bootstrap. `execution_traces` is a legacy summary
/// table kept for back-compat; nothing writes to it anymore.
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    const STATEMENTS: &[&str] = &[
        r#"CREATE TABLE IF NOT EXISTS sessions (
            id UUID PRIMARY KEY,
            user_id TEXT NOT NULL,
            status TEXT NOT NULL,
            budget_total_tokens INTEGER NOT NULL DEFAULT 0,
            budget_used_tokens INTEGER NOT NULL DEFAULT 0,
            budget_total_cost DOUBLE PRECISION NOT NULL DEFAULT 0,
            budget_used_cost DOUBLE PRECISION NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions (user_id)",
        r#"CREATE TABLE IF NOT EXISTS messages (
            id UUID PRIMARY KEY,
            session_id UUID NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            tokens INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_messages_session_id ON messages (session_id)",
        r#"CREATE TABLE IF NOT EXISTS traces (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            agent_name TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TIMESTAMPTZ NOT NULL,
            ended_at TIMESTAMPTZ,
            cost_tokens INTEGER NOT NULL DEFAULT 0,
            cost_api DOUBLE PRECISION NOT NULL DEFAULT 0,
            metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
            error TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_traces_session_id ON traces (session_id)",
        r#"CREATE TABLE IF NOT EXISTS execution_steps (
            id TEXT PRIMARY KEY,
            trace_id TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            step_type TEXT NOT NULL,
            input JSONB NOT NULL DEFAULT 'null'::jsonb,
            output JSONB NOT NULL DEFAULT 'null'::jsonb,
            cost_tokens INTEGER NOT NULL DEFAULT 0,
            cost_api DOUBLE PRECISION NOT NULL DEFAULT 0,
            latency_ms INTEGER NOT NULL DEFAULT 0,
            snapshot JSONB NOT NULL DEFAULT 'null'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_execution_steps_trace_id ON execution_steps (trace_id)",
        r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_execution_steps_trace_sequence
            ON execution_steps (trace_id, sequence)"#,
        r#"CREATE TABLE IF NOT EXISTS execution_traces (
            id UUID PRIMARY KEY,
            session_id UUID NOT NULL,
            status TEXT NOT NULL,
            cost_tokens INTEGER NOT NULL DEFAULT 0,
            cost_api DOUBLE PRECISION NOT NULL DEFAULT 0,
            started_at TIMESTAMPTZ NOT NULL,
            ended_at TIMESTAMPTZ
        )"#,
    ];

    for stmt in STATEMENTS {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}
