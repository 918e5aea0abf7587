//! Chat transport boundary.
//!
//! Transports deliver `(user, text)` pairs and accept rendered replies; the
//! assistant behind [`events::MessageService`] never sees protocol details.
//!
//! ```text
//! ChatTransport -> TransportRunner -> EventDispatcher -> MessageService
//!                        ^                                    |
//!                        +------------- OutboundReply --------+
//! ```
//!
//! - `TransportRunner` - receive loop with reconnect backoff
//! - `EventDispatcher` - turns message events into replies
//! - `MessageService` - seam implemented by the agent bridge

pub mod events;
pub mod runner;

pub use events::{
    ChatEnvelope, ChatEvent, ChatEventType, DispatchError, EventContext, EventDispatcher,
    HandlerResult, InboundMessage, MessageService, NoopMessageService, OutboundReply, ServiceError,
};
pub use runner::{ChatTransport, NoopChatTransport, ReconnectPolicy, TransportError, TransportRunner};
