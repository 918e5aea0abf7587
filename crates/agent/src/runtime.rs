//! The request pipeline: guard, planner, then one of command handling,
//! capability dispatch or the generative fallback.

use std::sync::Arc;

use tracing::{info, warn};

use concierge_core::config::AppConfig;
use concierge_core::domain::conversation::ChatRole;
use concierge_core::domain::request::{InboundRequest, UserId};
use concierge_core::errors::{ApplicationError, ErrorKind};
use concierge_db::{ChatHistoryRepository, RepositoryError};

use crate::capabilities::register_builtins;
use crate::guard::SecurityGuard;
use crate::llm::{build_backend, GenerativeBackend};
use crate::planner::{BuiltinCommand, Plan, Planner};
use crate::replies;
use crate::tools::{Dispatcher, ToolArguments};

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyOutcome {
    Rejected(ErrorKind),
    Command(BuiltinCommand),
    Tool { name: String, succeeded: bool },
    Generated,
    BackendFailed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentReply {
    pub text: String,
    pub outcome: ReplyOutcome,
}

impl AgentReply {
    fn new(text: impl Into<String>, outcome: ReplyOutcome) -> Self {
        Self { text: text.into(), outcome }
    }
}

pub struct AgentRuntime {
    guard: Arc<SecurityGuard>,
    planner: Planner,
    dispatcher: Arc<Dispatcher>,
    history: Arc<dyn ChatHistoryRepository>,
    backend: Arc<dyn GenerativeBackend>,
    history_limit: usize,
    system_prompt: Option<String>,
}

impl AgentRuntime {
    pub fn new(
        guard: Arc<SecurityGuard>,
        planner: Planner,
        dispatcher: Arc<Dispatcher>,
        history: Arc<dyn ChatHistoryRepository>,
        backend: Arc<dyn GenerativeBackend>,
    ) -> Self {
        Self {
            guard,
            planner,
            dispatcher,
            history,
            backend,
            history_limit: DEFAULT_HISTORY_LIMIT,
            system_prompt: None,
        }
    }

    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    /// Wires every component from configuration. The history store is
    /// supplied by the caller so binaries can pick SQLite or in-memory.
    pub async fn from_config(
        config: &AppConfig,
        history: Arc<dyn ChatHistoryRepository>,
    ) -> Result<Self, ApplicationError> {
        let planner = Planner::new().map_err(|error| {
            ApplicationError::Configuration(format!("routing table failed to compile: {error}"))
        })?;
        let dispatcher = Arc::new(Dispatcher::new());
        register_builtins(&dispatcher, &config.tools).await?;
        let backend = build_backend(&config.llm)?;

        Ok(Self::new(
            Arc::new(SecurityGuard::from_config(&config.security)),
            planner,
            dispatcher,
            history,
            backend,
        )
        .with_history_limit(config.llm.history_limit)
        .with_system_prompt(config.llm.system_prompt.clone()))
    }

    pub fn guard(&self) -> &Arc<SecurityGuard> {
        &self.guard
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn backend(&self) -> &Arc<dyn GenerativeBackend> {
        &self.backend
    }

    /// Always produces a reply; every failure is rendered into the text.
    pub async fn handle_message(&self, request: &InboundRequest) -> AgentReply {
        if let Err(rejection) = self.guard.validate(&request.user_id) {
            info!(
                event_name = "pipeline.request.rejected",
                correlation_id = %request.correlation_id,
                error_kind = rejection.kind().as_str(),
                "request rejected by guard"
            );
            return AgentReply::new(rejection.to_string(), ReplyOutcome::Rejected(rejection.kind()));
        }

        let plan = self.planner.plan(&request.text);
        info!(
            event_name = "pipeline.request.planned",
            correlation_id = %request.correlation_id,
            user_id = %request.user_id,
            plan = plan.label(),
            text_chars = request.text.chars().count(),
            "request planned"
        );

        match plan {
            Plan::Command(command) => self.run_command(command, request).await,
            Plan::ToolInvocation { tool_name, arguments } => {
                self.run_tool(tool_name, arguments, request).await
            }
            Plan::Fallback => self.run_fallback(request).await,
        }
    }

    pub async fn status_text(&self) -> String {
        let tools = self.dispatcher.available_tools().await;
        replies::status_text(&self.backend.label(), self.backend.is_ready(), &tools)
    }

    async fn run_command(&self, command: BuiltinCommand, request: &InboundRequest) -> AgentReply {
        let text = match command {
            BuiltinCommand::Welcome => replies::welcome_text(),
            BuiltinCommand::Help => replies::help_text(),
            BuiltinCommand::Status => self.status_text().await,
            BuiltinCommand::Reset => match self.history.clear_history(&request.user_id).await {
                Ok(()) => replies::reset_text().to_string(),
                Err(error) => {
                    self.log_history_failure(request, "clear", &error);
                    ApplicationError::from(error).user_message().to_string()
                }
            },
        };
        AgentReply::new(text, ReplyOutcome::Command(command))
    }

    async fn run_tool(
        &self,
        tool_name: String,
        arguments: ToolArguments,
        request: &InboundRequest,
    ) -> AgentReply {
        let result = self.dispatcher.dispatch(&tool_name, arguments).await;
        let text = replies::tool_reply(&result);

        self.save(request, &request.user_id, ChatRole::User, &request.text).await;
        self.save(request, &request.user_id, ChatRole::Assistant, &text).await;

        AgentReply::new(text, ReplyOutcome::Tool { name: tool_name, succeeded: result.succeeded() })
    }

    async fn run_fallback(&self, request: &InboundRequest) -> AgentReply {
        // Read before saving so the current message is not duplicated in the prompt.
        let history = match self.history.get_history(&request.user_id, self.history_limit).await {
            Ok(history) => history,
            Err(error) => {
                self.log_history_failure(request, "read", &error);
                Vec::new()
            }
        };
        self.save(request, &request.user_id, ChatRole::User, &request.text).await;

        let generated = self
            .backend
            .generate(&request.text, &history, self.system_prompt.as_deref())
            .await;
        let reply = match generated {
            Ok(text) => AgentReply::new(text, ReplyOutcome::Generated),
            Err(error) => {
                warn!(
                    event_name = "pipeline.backend.failed",
                    correlation_id = %request.correlation_id,
                    error_kind = error.kind().as_str(),
                    error = %error,
                    "generative backend failed"
                );
                AgentReply::new(replies::apology_text(&error), ReplyOutcome::BackendFailed)
            }
        };

        self.save(request, &request.user_id, ChatRole::Assistant, &reply.text).await;
        reply
    }

    async fn save(&self, request: &InboundRequest, user_id: &UserId, role: ChatRole, content: &str) {
        if let Err(error) = self.history.save_message(user_id, role, content).await {
            self.log_history_failure(request, "save", &error);
        }
    }

    fn log_history_failure(&self, request: &InboundRequest, operation: &str, error: &RepositoryError) {
        warn!(
            event_name = "pipeline.history.failed",
            correlation_id = %request.correlation_id,
            operation,
            error = %error,
            "history store failed; continuing"
        );
    }
}
