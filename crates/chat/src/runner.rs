use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::events::{
    ChatEnvelope, ChatEvent, EventContext, EventDispatcher, HandlerResult, OutboundReply,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 1_u64 << attempt.min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms))
    }
}

/// A chat platform connection. `next_envelope` yields `None` when the
/// stream ends normally.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn send_reply(&self, reply: &OutboundReply) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopChatTransport;

#[async_trait]
impl ChatTransport for NoopChatTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_reply(&self, _reply: &OutboundReply) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Pumps envelopes from a transport into the dispatcher. Each envelope is
/// handled on its own task, so a slow generation never stalls other users.
pub struct TransportRunner {
    transport: Arc<dyn ChatTransport>,
    dispatcher: Arc<EventDispatcher>,
    reconnect_policy: ReconnectPolicy,
}

impl Default for TransportRunner {
    fn default() -> Self {
        Self {
            transport: Arc::new(NoopChatTransport),
            dispatcher: Arc::new(EventDispatcher::default()),
            reconnect_policy: ReconnectPolicy::default(),
        }
    }
}

impl TransportRunner {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        dispatcher: Arc<EventDispatcher>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, reconnect_policy }
    }

    /// Runs until the stream closes or retries are exhausted. Transport
    /// failures are logged, never returned. The retry budget counts
    /// consecutive failures and starts over once a connection is established.
    pub async fn start(&self) -> Result<()> {
        let mut attempt = 0;
        loop {
            let transport_error = match self.connect(attempt).await {
                Ok(()) => match self.pump_connection().await {
                    Ok(()) => return Ok(()),
                    Err(error) => {
                        attempt = 0;
                        error
                    }
                },
                Err(error) => error,
            };

            warn!(
                event_name = "transport.connection.failed",
                attempt,
                max_retries = self.reconnect_policy.max_retries,
                error = %transport_error,
                "chat transport failed"
            );

            if attempt >= self.reconnect_policy.max_retries {
                warn!(
                    event_name = "transport.connection.exhausted",
                    max_retries = self.reconnect_policy.max_retries,
                    "chat transport retries exhausted; continuing without chat"
                );
                return Ok(());
            }

            let delay = self.reconnect_policy.backoff(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    async fn connect(&self, attempt: u32) -> Result<(), TransportError> {
        info!(event_name = "transport.connection.opening", attempt, "connecting chat transport");
        self.transport.connect().await?;
        info!(event_name = "transport.connection.opened", attempt, "chat transport connected");
        Ok(())
    }

    async fn pump_connection(&self) -> Result<(), TransportError> {
        let mut in_flight = JoinSet::new();
        let outcome = self.pump(&mut in_flight).await;

        // Replies already being generated are still delivered.
        while in_flight.join_next().await.is_some() {}

        outcome?;
        self.transport.disconnect().await
    }

    async fn pump(&self, in_flight: &mut JoinSet<()>) -> Result<(), TransportError> {
        loop {
            while in_flight.try_join_next().is_some() {}

            let Some(envelope) = self.transport.next_envelope().await? else {
                info!(event_name = "transport.stream.closed", "chat transport stream closed");
                return Ok(());
            };

            info!(
                event_name = "ingress.chat.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                "received chat envelope"
            );

            match self.transport.acknowledge(&envelope.envelope_id).await {
                Ok(()) => debug!(
                    event_name = "ingress.chat.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    "acknowledged chat envelope"
                ),
                Err(error) => warn!(
                    event_name = "ingress.chat.ack_failed",
                    envelope_id = %envelope.envelope_id,
                    error = %error,
                    "failed to acknowledge chat envelope"
                ),
            }

            let transport = Arc::clone(&self.transport);
            let dispatcher = Arc::clone(&self.dispatcher);
            in_flight.spawn(async move { handle_envelope(transport, dispatcher, envelope).await });
        }
    }
}

async fn handle_envelope(
    transport: Arc<dyn ChatTransport>,
    dispatcher: Arc<EventDispatcher>,
    envelope: ChatEnvelope,
) {
    let context = EventContext { correlation_id: envelope.envelope_id.clone() };
    let user_id = match &envelope.event {
        ChatEvent::Message(message) => message.user_id.to_string(),
        ChatEvent::Unsupported { .. } => "unknown".to_owned(),
    };

    match dispatcher.dispatch(&envelope, &context).await {
        Ok(HandlerResult::Responded(reply)) => {
            if let Err(error) = transport.send_reply(&reply).await {
                warn!(
                    event_name = "egress.chat.reply_failed",
                    correlation_id = %context.correlation_id,
                    user_id = %user_id,
                    error = %error,
                    "failed to deliver reply"
                );
            }
        }
        Ok(HandlerResult::Processed | HandlerResult::Ignored) => {}
        Err(error) => warn!(
            event_name = "ingress.chat.dispatch_failed",
            correlation_id = %context.correlation_id,
            user_id = %user_id,
            error = %error,
            "event dispatch failed; continuing transport loop"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::{ChatTransport, ReconnectPolicy, TransportError, TransportRunner};
    use crate::events::{
        ChatEnvelope, ChatEvent, EventContext, EventDispatcher, InboundMessage, MessageService,
        OutboundReply, ServiceError,
    };

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<ChatEnvelope>, TransportError>>,
        connect_attempts: usize,
        acknowledgements: Vec<String>,
        replies: Vec<OutboundReply>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<ChatEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    ..ScriptedState::default()
                }),
            }
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
            self.state.lock().await.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
            self.state.lock().await.acknowledgements.push(envelope_id.to_owned());
            Ok(())
        }

        async fn send_reply(&self, reply: &OutboundReply) -> Result<(), TransportError> {
            self.state.lock().await.replies.push(reply.clone());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.state.lock().await.disconnect_calls += 1;
            Ok(())
        }
    }

    struct UppercaseService;

    #[async_trait]
    impl MessageService for UppercaseService {
        async fn handle_message(
            &self,
            message: &InboundMessage,
            _ctx: &EventContext,
        ) -> Result<Option<String>, ServiceError> {
            if message.text == "explode" {
                return Err(ServiceError::Failed("boom".to_owned()));
            }
            Ok(Some(message.text.to_uppercase()))
        }
    }

    fn message(id: &str, text: &str) -> Result<Option<ChatEnvelope>, TransportError> {
        Ok(Some(ChatEnvelope {
            envelope_id: id.to_owned(),
            event: ChatEvent::Message(InboundMessage {
                user_id: "7".into(),
                chat_id: "chat-7".to_owned(),
                text: text.to_owned(),
            }),
        }))
    }

    fn instant_retries(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![
                Ok(Some(ChatEnvelope {
                    envelope_id: "env-1".to_owned(),
                    event: ChatEvent::Unsupported { event_type: "photo".to_owned() },
                })),
                Ok(None),
            ],
        ));

        let runner = TransportRunner::new(
            transport.clone(),
            Arc::new(EventDispatcher::default()),
            instant_retries(2),
        );
        runner.start().await.expect("runner should not fail");

        let state = transport.state.lock().await;
        assert_eq!(state.connect_attempts, 2);
        assert_eq!(state.acknowledgements, vec!["env-1"]);
        assert!(state.replies.is_empty());
        assert_eq!(state.disconnect_calls, 1);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));

        let runner = TransportRunner::new(
            transport.clone(),
            Arc::new(EventDispatcher::default()),
            instant_retries(2),
        );
        runner.start().await.expect("runner should degrade gracefully");
        assert_eq!(transport.state.lock().await.connect_attempts, 3);
    }

    #[tokio::test]
    async fn each_message_gets_exactly_one_reply_and_failures_do_not_stop_the_loop() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![],
            vec![
                message("env-1", "hello"),
                message("env-2", "explode"),
                message("env-3", "still alive"),
                Ok(None),
            ],
        ));

        let runner = TransportRunner::new(
            transport.clone(),
            Arc::new(EventDispatcher::new(Arc::new(UppercaseService))),
            instant_retries(0),
        );
        runner.start().await.expect("runner");

        let state = transport.state.lock().await;
        let mut texts: Vec<&str> = state.replies.iter().map(|reply| reply.text.as_str()).collect();
        texts.sort_unstable();
        assert_eq!(texts, vec!["HELLO", "STILL ALIVE"]);
        assert!(state.replies.iter().all(|reply| reply.chat_id == "chat-7"));
        assert_eq!(state.acknowledgements.len(), 3);
    }

    #[tokio::test]
    async fn dropped_connections_do_not_use_up_the_retry_budget() {
        let dropped = || Err(TransportError::Receive("socket reset".to_owned()));
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![],
            vec![
                dropped(),
                dropped(),
                message("env-1", "between drops"),
                dropped(),
                dropped(),
                dropped(),
                Ok(None),
            ],
        ));

        let runner = TransportRunner::new(
            transport.clone(),
            Arc::new(EventDispatcher::new(Arc::new(UppercaseService))),
            instant_retries(1),
        );
        runner.start().await.expect("runner");

        let state = transport.state.lock().await;
        assert_eq!(state.connect_attempts, 6);
        assert_eq!(state.disconnect_calls, 1);
        assert_eq!(state.replies.len(), 1);
        assert_eq!(state.replies[0].text, "BETWEEN DROPS");
    }

    #[tokio::test]
    async fn receive_errors_trigger_a_reconnect() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(()), Ok(())],
            vec![
                message("env-1", "first"),
                Err(TransportError::Receive("socket reset".to_owned())),
                message("env-2", "second"),
                Ok(None),
            ],
        ));

        let runner = TransportRunner::new(
            transport.clone(),
            Arc::new(EventDispatcher::new(Arc::new(UppercaseService))),
            instant_retries(1),
        );
        runner.start().await.expect("runner");

        let state = transport.state.lock().await;
        assert_eq!(state.connect_attempts, 2);
        assert_eq!(state.replies.len(), 2);
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = ReconnectPolicy { max_retries: 5, base_delay_ms: 250, max_delay_ms: 1_000 };
        assert_eq!(policy.backoff(0).as_millis(), 250);
        assert_eq!(policy.backoff(1).as_millis(), 500);
        assert_eq!(policy.backoff(4).as_millis(), 1_000);
    }
}
