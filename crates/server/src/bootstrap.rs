use std::sync::Arc;

use concierge_agent::runtime::AgentRuntime;
use concierge_chat::{EventDispatcher, NoopChatTransport, ReconnectPolicy, TransportRunner};
use concierge_core::config::{AppConfig, ConfigError};
use concierge_core::errors::ApplicationError;
use concierge_db::{connect, migrations, DbPool, SqlChatHistoryRepository};
use thiserror::Error;
use tracing::{info, warn};

use crate::bridge::AgentMessageService;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
    pub chat_runner: TransportRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Runtime(#[from] ApplicationError),
}

/// Composition root: every long-lived component is built here once and
/// handed out by reference.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let history = Arc::new(SqlChatHistoryRepository::new(db_pool.clone()));
    let runtime = Arc::new(AgentRuntime::from_config(&config, history).await?);
    info!(
        event_name = "system.bootstrap.runtime_ready",
        backend = %runtime.backend().label(),
        backend_ready = runtime.backend().is_ready(),
        tools = runtime.dispatcher().available_tools().await.len(),
        "agent runtime assembled"
    );

    if config.chat.enabled {
        warn!(
            event_name = "system.bootstrap.chat_transport",
            transport_mode = "noop",
            "chat is enabled but no platform transport is linked; messages will not be received"
        );
    }
    let dispatcher = EventDispatcher::new(Arc::new(AgentMessageService::new(Arc::clone(&runtime))));
    let chat_runner = TransportRunner::new(
        Arc::new(NoopChatTransport),
        Arc::new(dispatcher),
        ReconnectPolicy::default(),
    );

    Ok(Application { config, db_pool, runtime, chat_runner })
}
