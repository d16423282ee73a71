use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Quota counters embedded in the sessions row under `budget_*` columns.
/// A total of zero means "no limit".
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct Budget {
    #[serde(rename = "total_tokens")]
    pub budget_total_tokens: i32,
    #[serde(rename = "used_tokens")]
    pub budget_used_tokens: i32,
    #[serde(rename = "total_cost")]
    pub budget_total_cost: f64,
    #[serde(rename = "used_cost")]
    pub budget_used_cost: f64,
}

/// Long-lived conversation container owning messages and traces.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub status: String,
    #[sqlx(flatten)]
    pub budget: Budget,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const SESSION_ACTIVE: &str = "active";
pub const SESSION_CLOSED: &str = "closed";

/// Immutable turn record. Appended once per role per turn, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: String,
    pub content: String,
    pub tokens: i32,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(session_id: Uuid, role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role: role.into(),
            content: content.into(),
            tokens: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_tokens(mut self, tokens: i32) -> Self {
        self.tokens = tokens;
        self
    }
}
