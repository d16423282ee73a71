use sqlx::PgPool;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::session::Message;

/// Append-only chat history for a session.
#[derive(Clone)]
pub struct MessageStore {
    pool: PgPool,
}

impl MessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, message: &Message) -> Result<(), CoreError> {
        sqlx::query(
            r#"INSERT INTO messages (id, session_id, role, content, tokens, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(message.id)
        .bind(message.session_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(message.tokens)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_by_session(&self, session_id: Uuid) -> Result<Vec<Message>, CoreError> {
        let messages =
            sqlx::query_as("SELECT * FROM messages WHERE session_id = $1 ORDER BY created_at ASC")
                .bind(session_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(messages)
    }
}
