use std::sync::Arc;

use async_trait::async_trait;
use concierge_agent::runtime::AgentRuntime;
use concierge_chat::{EventContext, InboundMessage, MessageService, ServiceError};
use concierge_core::domain::request::InboundRequest;

/// Feeds chat messages into the agent pipeline. The pipeline renders every
/// failure as reply text, so this service always answers.
pub struct AgentMessageService {
    runtime: Arc<AgentRuntime>,
}

impl AgentMessageService {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl MessageService for AgentMessageService {
    async fn handle_message(
        &self,
        message: &InboundMessage,
        ctx: &EventContext,
    ) -> Result<Option<String>, ServiceError> {
        let request = InboundRequest::new(message.user_id.clone(), message.text.clone())
            .with_correlation_id(ctx.correlation_id.clone());
        let reply = self.runtime.handle_message(&request).await;
        Ok(Some(reply.text))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use concierge_agent::runtime::AgentRuntime;
    use concierge_chat::{EventContext, InboundMessage, MessageService};
    use concierge_core::config::AppConfig;
    use concierge_db::InMemoryChatHistoryRepository;

    use super::AgentMessageService;

    async fn service(allowed: Vec<String>) -> AgentMessageService {
        let mut config = AppConfig::default();
        config.security.allowed_user_ids = allowed;
        let runtime = AgentRuntime::from_config(&config, Arc::new(InMemoryChatHistoryRepository::new()))
            .await
            .expect("runtime");
        AgentMessageService::new(Arc::new(runtime))
    }

    fn message(user: &str, text: &str) -> InboundMessage {
        InboundMessage { user_id: user.into(), chat_id: user.to_string(), text: text.to_string() }
    }

    #[tokio::test]
    async fn chat_messages_are_answered_by_the_pipeline() {
        let service = service(Vec::new()).await;
        let reply = service
            .handle_message(&message("100", "calc 2 ** 10"), &EventContext::default())
            .await
            .expect("reply");
        assert_eq!(reply.as_deref(), Some("2 ** 10 = 1024"));
    }

    #[tokio::test]
    async fn rejections_are_still_replies() {
        let service = service(vec!["100".to_string()]).await;
        let reply = service
            .handle_message(&message("200", "hello"), &EventContext::default())
            .await
            .expect("reply");
        assert_eq!(reply.as_deref(), Some("You are not authorised to use this bot."));
    }
}
