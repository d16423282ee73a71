use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::BudgetConfig;
use crate::error::CoreError;
use crate::models::session::{Session, SESSION_ACTIVE};

/// Session persistence plus the atomic budget accumulator.
///
/// Two concurrent turns on one session are allowed; they only race on the
/// budget counters, which `increment_budget` updates in a single statement.
#[derive(Clone)]
pub struct SessionStore {
    pool: PgPool,
    budget: BudgetConfig,
}

impl SessionStore {
    pub fn new(pool: PgPool, budget: BudgetConfig) -> Self {
        Self { pool, budget }
    }

    pub async fn create(&self, user_id: &str) -> Result<Session, CoreError> {
        let now = Utc::now();
        let session: Session = sqlx::query_as(
            r#"INSERT INTO sessions
                   (id, user_id, status,
                    budget_total_tokens, budget_used_tokens,
                    budget_total_cost, budget_used_cost,
                    created_at, updated_at)
               VALUES ($1, $2, $3, $4, 0, $5, 0, $6, $6)
               RETURNING *"#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(SESSION_ACTIVE)
        .bind(self.budget.default_total_tokens)
        .bind(self.budget.default_total_cost)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(session)
    }

    pub async fn get(&self, id: Uuid) -> Result<Session, CoreError> {
        sqlx::query_as("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreError::NotFound("session"))
    }

    pub async fn list(&self) -> Result<Vec<Session>, CoreError> {
        let sessions = sqlx::query_as("SELECT * FROM sessions ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(sessions)
    }

    /// Hard delete. Idempotent: deleting a missing session succeeds.
    pub async fn delete(&self, id: Uuid) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Atomic `used += added` on both counters. Safe under concurrent turns.
    pub async fn increment_budget(
        &self,
        id: Uuid,
        added_tokens: i32,
        added_cost: f64,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"UPDATE sessions
               SET budget_used_tokens = budget_used_tokens + $2,
                   budget_used_cost = budget_used_cost + $3,
                   updated_at = now()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(added_tokens)
        .bind(added_cost)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fails with `BudgetExceeded` when either quota would be crossed.
    /// A total of zero disables that quota. The chat paths account
    /// post-hoc and do not call this; it is available for callers that
    /// want a strict pre-check.
    pub fn check_budget(
        session: &Session,
        added_tokens: i32,
        added_cost: f64,
    ) -> Result<(), CoreError> {
        let b = &session.budget;
        if b.budget_total_tokens > 0
            && b.budget_used_tokens + added_tokens > b.budget_total_tokens
        {
            return Err(CoreError::BudgetExceeded("token budget exceeded".into()));
        }
        if b.budget_total_cost > 0.0 && b.budget_used_cost + added_cost > b.budget_total_cost {
            return Err(CoreError::BudgetExceeded("cost budget exceeded".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::Budget;
    use chrono::Utc;

    fn session_with_budget(total_tokens: i32, used_tokens: i32) -> Session {
        Session {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            status: SESSION_ACTIVE.to_string(),
            budget: Budget {
                budget_total_tokens: total_tokens,
                budget_used_tokens: used_tokens,
                budget_total_cost: 0.0,
                budget_used_cost: 0.0,
            },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn check_budget_rejects_crossing_token_quota() {
        let session = session_with_budget(100, 95);
        assert!(SessionStore::check_budget(&session, 5, 0.0).is_ok());
        assert!(SessionStore::check_budget(&session, 6, 0.0).is_err());
    }

    #[test]
    fn check_budget_zero_total_is_unlimited() {
        let session = session_with_budget(0, 1_000_000);
        assert!(SessionStore::check_budget(&session, i32::MAX / 2, 0.0).is_ok());
    }

    #[test]
    fn check_budget_cost_quota() {
        let mut session = session_with_budget(0, 0);
        session.budget.budget_total_cost = 1.0;
        session.budget.budget_used_cost = 0.95;
        assert!(SessionStore::check_budget(&session, 0, 0.04).is_ok());
        assert!(SessionStore::check_budget(&session, 0, 0.06).is_err());
    }
}
