use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use concierge_core::domain::conversation::{ChatRole, ChatTurn};
use concierge_core::domain::request::UserId;

use super::{ChatHistoryRepository, RepositoryError};
use crate::DbPool;

pub struct SqlChatHistoryRepository {
    pool: DbPool,
}

impl SqlChatHistoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ChatHistoryRepository for SqlChatHistoryRepository {
    async fn get_history(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<ChatTurn>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT role, content FROM (
                SELECT id, role, content
                FROM chat_history
                WHERE user_id = ?
                ORDER BY id DESC
                LIMIT ?
            )
            ORDER BY id ASC
            "#,
        )
        .bind(user_id.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(chat_turn_from_row).collect()
    }

    async fn save_message(
        &self,
        user_id: &UserId,
        role: ChatRole,
        content: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO chat_history (user_id, role, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id.as_str())
        .bind(role.as_str())
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_history(&self, user_id: &UserId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM chat_history WHERE user_id = ?")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn chat_turn_from_row(row: &SqliteRow) -> Result<ChatTurn, RepositoryError> {
    let role: String = row.try_get("role")?;
    let content: String = row.try_get("content")?;
    let role = role.parse::<ChatRole>().map_err(|err| RepositoryError::Decode(err.to_string()))?;
    Ok(ChatTurn::new(role, content))
}
