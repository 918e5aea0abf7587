use std::collections::HashMap;

use tokio::sync::RwLock;

use concierge_core::domain::conversation::{ChatRole, ChatTurn};
use concierge_core::domain::request::UserId;

use super::{ChatHistoryRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryChatHistoryRepository {
    turns: RwLock<HashMap<UserId, Vec<ChatTurn>>>,
}

impl InMemoryChatHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ChatHistoryRepository for InMemoryChatHistoryRepository {
    async fn get_history(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<ChatTurn>, RepositoryError> {
        let turns = self.turns.read().await;
        let Some(log) = turns.get(user_id) else {
            return Ok(Vec::new());
        };
        let start = log.len().saturating_sub(limit);
        Ok(log[start..].to_vec())
    }

    async fn save_message(
        &self,
        user_id: &UserId,
        role: ChatRole,
        content: &str,
    ) -> Result<(), RepositoryError> {
        let mut turns = self.turns.write().await;
        turns.entry(user_id.clone()).or_default().push(ChatTurn::new(role, content));
        Ok(())
    }

    async fn clear_history(&self, user_id: &UserId) -> Result<(), RepositoryError> {
        let mut turns = self.turns.write().await;
        turns.remove(user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use concierge_core::domain::conversation::{ChatRole, ChatTurn};
    use concierge_core::domain::request::UserId;

    use crate::repositories::{ChatHistoryRepository, InMemoryChatHistoryRepository};

    #[tokio::test]
    async fn history_is_returned_oldest_first_and_limited_to_recent_turns() {
        let repo = InMemoryChatHistoryRepository::new();
        let user = UserId::new("alice");

        for (role, content) in [
            (ChatRole::User, "one"),
            (ChatRole::Assistant, "two"),
            (ChatRole::User, "three"),
        ] {
            repo.save_message(&user, role, content).await.expect("save");
        }

        let recent = repo.get_history(&user, 2).await.expect("history");
        assert_eq!(recent, vec![ChatTurn::assistant("two"), ChatTurn::user("three")]);
    }

    #[tokio::test]
    async fn clearing_one_user_leaves_others_untouched() {
        let repo = InMemoryChatHistoryRepository::new();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        repo.save_message(&alice, ChatRole::User, "hi").await.expect("save alice");
        repo.save_message(&bob, ChatRole::User, "hey").await.expect("save bob");
        repo.clear_history(&alice).await.expect("clear");

        assert!(repo.get_history(&alice, 10).await.expect("alice").is_empty());
        assert_eq!(repo.get_history(&bob, 10).await.expect("bob").len(), 1);
    }
}
