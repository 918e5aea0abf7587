mod bootstrap;
mod bridge;
mod health;
mod sweeper;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use concierge_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use concierge_core::config::LogFormat::*;

    // RUST_LOG wins over the configured level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let bootstrap::Application { config, db_pool, runtime, chat_runner } =
        bootstrap::bootstrap_with_config(config).await?;

    let health_task = health::spawn(
        &config.server.bind_address,
        config.server.health_check_port,
        health::HealthState::new(db_pool.clone(), Arc::clone(&runtime)),
    )
    .await?;

    let sweeper_task = sweeper::spawn_idle_sweeper(
        Arc::clone(runtime.guard()),
        Duration::from_secs(config.security.idle_window_eviction_secs),
    );

    let mut chat_task = tokio::spawn(async move { chat_runner.start().await });

    tracing::info!(
        event_name = "system.server.started",
        backend = %runtime.backend().label(),
        "concierge-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        grace_secs = config.server.graceful_shutdown_secs,
        "concierge-server stopping"
    );

    sweeper_task.abort();
    health_task.abort();

    let grace = Duration::from_secs(config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, &mut chat_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(error))) => {
            tracing::warn!(event_name = "system.server.chat_error", error = %error, "chat runner failed");
        }
        Ok(Err(join_error)) => {
            tracing::warn!(
                event_name = "system.server.chat_error",
                error = %join_error,
                "chat runner task ended abnormally"
            );
        }
        Err(_) => {
            tracing::warn!(
                event_name = "system.server.grace_expired",
                "in-flight chat work did not finish within the grace period"
            );
            chat_task.abort();
        }
    }

    db_pool.close().await;
    tracing::info!(event_name = "system.server.stopped", "concierge-server stopped");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}
