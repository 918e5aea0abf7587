use std::sync::Arc;

use concierge_agent::replies::BOT_NAME;
use concierge_agent::runtime::AgentRuntime;
use concierge_core::config::{AppConfig, LoadOptions};
use concierge_core::domain::request::InboundRequest;
use concierge_db::{
    connect_with_settings, migrations, ChatHistoryRepository, DbPool,
    InMemoryChatHistoryRepository, SqlChatHistoryRepository,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::commands::{command_runtime, CommandResult, StageFailure};

pub const DEFAULT_USER_ID: &str = "cli_user";

const EXIT_WORDS: &[&str] = &["/quit", "/exit", "exit", "quit"];
const BANNER: &str = "Concierge terminal chat\n\
                      Type a message and press Enter.\n\
                      Commands: /reset  /status  /help  /quit";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionInput {
    Skip,
    Quit,
    Message(String),
}

/// Terminal-only aliases are resolved here; everything else is left for the
/// planner so the harness behaves like any other transport.
pub fn classify_input(line: &str) -> SessionInput {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return SessionInput::Skip;
    }

    let lowered = trimmed.to_ascii_lowercase();
    if EXIT_WORDS.contains(&lowered.as_str()) {
        return SessionInput::Quit;
    }

    match lowered.as_str() {
        "help" => SessionInput::Message("/help".to_string()),
        "status" => SessionInput::Message("/status".to_string()),
        _ => SessionInput::Message(trimmed.to_string()),
    }
}

/// Runs the read-reply loop until an exit word or end of input. Returns the
/// number of messages that went through the pipeline.
pub async fn run_session<R, W>(
    runtime: &AgentRuntime,
    user_id: &str,
    input: R,
    output: &mut W,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output.write_all(format!("{BANNER}\n\n").as_bytes()).await?;

    let mut lines = input.lines();
    let mut handled = 0;
    loop {
        output.write_all(b"You: ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            output.write_all(b"\nGoodbye!\n").await?;
            break;
        };

        match classify_input(&line) {
            SessionInput::Skip => continue,
            SessionInput::Quit => {
                output.write_all(b"Goodbye!\n").await?;
                break;
            }
            SessionInput::Message(text) => {
                let reply = runtime.handle_message(&InboundRequest::new(user_id, text)).await;
                output.write_all(format!("\n{BOT_NAME}: {}\n\n", reply.text).as_bytes()).await?;
                handled += 1;
            }
        }
    }

    output.flush().await?;
    Ok(handled)
}

pub fn run(user_id: &str) -> CommandResult {
    CommandResult::from_stages("chat", session(user_id))
}

fn session(user_id: &str) -> Result<String, StageFailure> {
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        StageFailure::new("config_validation", format!("configuration issue: {error}"), 2)
    })?;
    init_logging();
    let runtime = command_runtime()?;

    runtime.block_on(async {
        let (history, pool) = open_history(&config).await;
        let agent = AgentRuntime::from_config(&config, history)
            .await
            .map_err(|error| StageFailure::new("agent_init", error, 4))?;

        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        let handled = run_session(&agent, user_id, stdin, &mut stdout).await;

        if let Some(pool) = pool {
            pool.close().await;
        }
        let handled = handled.map_err(|error| StageFailure::new("terminal_io", error, 5))?;
        Ok(format!("session ended after {handled} messages"))
    })
}

/// SQLite history when the database is reachable, otherwise an in-memory
/// store so the harness still works offline.
async fn open_history(config: &AppConfig) -> (Arc<dyn ChatHistoryRepository>, Option<DbPool>) {
    let opened = async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await?;
        migrations::run_pending(&pool).await?;
        Ok::<DbPool, anyhow::Error>(pool)
    }
    .await;

    match opened {
        Ok(pool) => (Arc::new(SqlChatHistoryRepository::new(pool.clone())), Some(pool)),
        Err(error) => {
            warn!(
                event_name = "cli.chat.history_fallback",
                error = %error,
                "database unavailable; chat history will not outlive this session"
            );
            (Arc::new(InMemoryChatHistoryRepository::new()), None)
        }
    }
}

fn init_logging() {
    // Logs go to stderr and stay quiet by default so they do not interleave with the prompt.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .compact()
        .try_init();
}
