use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use concierge_core::domain::request::UserId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEnvelope {
    pub envelope_id: String,
    pub event: ChatEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    Message(InboundMessage),
    Unsupported { event_type: String },
}

impl ChatEvent {
    pub fn event_type(&self) -> ChatEventType {
        match self {
            Self::Message(_) => ChatEventType::Message,
            Self::Unsupported { .. } => ChatEventType::Unsupported,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChatEventType {
    Message,
    Unsupported,
}

/// A text message from a user. `chat_id` is where the reply goes, which for
/// direct chats is usually the user's own id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub user_id: UserId,
    pub chat_id: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundReply {
    pub chat_id: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(OutboundReply),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("message service failure: {0}")]
    Failed(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Produces the reply text for one message, or `None` when nothing should
/// be sent back.
#[async_trait]
pub trait MessageService: Send + Sync {
    async fn handle_message(
        &self,
        message: &InboundMessage,
        ctx: &EventContext,
    ) -> Result<Option<String>, ServiceError>;
}

/// Replies with nothing; used when no assistant is wired in.
pub struct NoopMessageService;

#[async_trait]
impl MessageService for NoopMessageService {
    async fn handle_message(
        &self,
        _message: &InboundMessage,
        _ctx: &EventContext,
    ) -> Result<Option<String>, ServiceError> {
        Ok(None)
    }
}

pub struct EventDispatcher {
    service: Arc<dyn MessageService>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(NoopMessageService))
    }
}

impl EventDispatcher {
    pub fn new(service: Arc<dyn MessageService>) -> Self {
        Self { service }
    }

    pub async fn dispatch(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let ChatEvent::Message(message) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if message.text.trim().is_empty() {
            return Ok(HandlerResult::Ignored);
        }

        let reply = self.service.handle_message(message, ctx).await?;
        Ok(match reply {
            Some(text) => {
                HandlerResult::Responded(OutboundReply { chat_id: message.chat_id.clone(), text })
            }
            None => HandlerResult::Processed,
        })
    }
}
