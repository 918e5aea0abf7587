use concierge_core::config::{AppConfig, LoadOptions};
use concierge_db::{connect_with_settings, migrations};

use crate::commands::{command_runtime, CommandResult, StageFailure};

pub fn run() -> CommandResult {
    CommandResult::from_stages("migrate", apply())
}

fn apply() -> Result<String, StageFailure> {
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        StageFailure::new("config_validation", format!("configuration issue: {error}"), 2)
    })?;
    let runtime = command_runtime()?;

    runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| StageFailure::new("db_connectivity", error, 4))?;

        let outcome = migrations::run_pending(&pool)
            .await
            .map_err(|error| StageFailure::new("migration", error, 5));
        pool.close().await;
        outcome?;

        Ok(format!("applied pending migrations to `{}`", config.database.url))
    })
}
