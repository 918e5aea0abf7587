use async_trait::async_trait;
use thiserror::Error;

use concierge_core::domain::conversation::{ChatRole, ChatTurn};
use concierge_core::domain::request::UserId;
use concierge_core::errors::ApplicationError;

pub mod history;
pub mod memory;

pub use history::SqlChatHistoryRepository;
pub use memory::InMemoryChatHistoryRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        ApplicationError::Persistence(error.to_string())
    }
}

/// Per-user conversation log. Appends persist, reads return append order,
/// clearing empties the user's log and nobody else's.
#[async_trait]
pub trait ChatHistoryRepository: Send + Sync {
    /// Most recent `limit` turns for `user_id`, oldest first.
    async fn get_history(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<ChatTurn>, RepositoryError>;

    async fn save_message(
        &self,
        user_id: &UserId,
        role: ChatRole,
        content: &str,
    ) -> Result<(), RepositoryError>;

    async fn clear_history(&self, user_id: &UserId) -> Result<(), RepositoryError>;
}
