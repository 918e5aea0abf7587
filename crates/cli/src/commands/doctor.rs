use concierge_agent::capabilities::builtin_capabilities;
use concierge_agent::llm::build_backend;
use concierge_core::config::{AppConfig, LoadOptions};
use concierge_db::connect_with_settings;
use serde::Serialize;

use crate::commands::{command_runtime, escape_json, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
pub struct DoctorCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self::new(name, CheckStatus::Skipped, "skipped because configuration did not load")
    }
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub overall_status: CheckStatus,
    pub summary: String,
    pub checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report(AppConfig::load(LoadOptions::default()));
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

/// Capability status is informational and never fails the report.
pub fn build_report<E: std::fmt::Display>(loaded: Result<AppConfig, E>) -> DoctorReport {
    let checks = match loaded {
        Ok(config) => vec![
            DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ),
            check_database_connectivity(&config),
            check_backend_readiness(&config),
            check_capabilities(&config),
        ],
        Err(error) => vec![
            DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()),
            DoctorCheck::skipped("database_connectivity"),
            DoctorCheck::skipped("backend_readiness"),
            DoctorCheck::skipped("capabilities"),
        ],
    };

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match command_runtime() {
        Ok(runtime) => runtime,
        Err(failure) => {
            return DoctorCheck::new("database_connectivity", CheckStatus::Fail, failure.message);
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        pool.close().await;
        Ok::<(), String>(())
    });

    match result {
        Ok(()) => DoctorCheck::new(
            "database_connectivity",
            CheckStatus::Pass,
            format!("connected using `{}`", config.database.url),
        ),
        Err(error) => DoctorCheck::new("database_connectivity", CheckStatus::Fail, error),
    }
}

fn check_backend_readiness(config: &AppConfig) -> DoctorCheck {
    match build_backend(&config.llm) {
        Ok(backend) if backend.is_ready() => {
            DoctorCheck::new("backend_readiness", CheckStatus::Pass, backend.label())
        }
        Ok(backend) => DoctorCheck::new(
            "backend_readiness",
            CheckStatus::Fail,
            format!("{} is not ready; free-text replies will be apologies", backend.label()),
        ),
        Err(error) => DoctorCheck::new("backend_readiness", CheckStatus::Fail, error.to_string()),
    }
}

fn check_capabilities(config: &AppConfig) -> DoctorCheck {
    let rendered: Vec<String> = builtin_capabilities(&config.tools)
        .iter()
        .map(|capability| {
            let state = if capability.is_available() { "on" } else { "off" };
            format!("{}={state}", capability.name())
        })
        .collect();

    DoctorCheck::new("capabilities", CheckStatus::Pass, rendered.join(", "))
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use concierge_core::config::AppConfig;

    use super::{build_report, render_human, CheckStatus};

    fn config_with_memory_db() -> AppConfig {
        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:".to_string();
        config.llm.model_path = None;
        config
    }

    #[test]
    fn unready_backend_fails_the_report_but_database_passes() {
        let report = build_report(Ok::<_, String>(config_with_memory_db()));

        let status_of = |name: &str| {
            report.checks.iter().find(|check| check.name == name).map(|check| check.status)
        };
        assert_eq!(status_of("config_validation"), Some(CheckStatus::Pass));
        assert_eq!(status_of("database_connectivity"), Some(CheckStatus::Pass));
        assert_eq!(status_of("backend_readiness"), Some(CheckStatus::Fail));
        assert_eq!(status_of("capabilities"), Some(CheckStatus::Pass));
        assert_eq!(report.overall_status, CheckStatus::Fail);
    }

    #[test]
    fn config_failure_skips_dependent_checks() {
        let report = build_report(Err::<AppConfig, _>("chat.bot_token is required"));

        assert_eq!(report.checks[0].status, CheckStatus::Fail);
        assert!(report.checks[1..].iter().all(|check| check.status == CheckStatus::Skipped));
        assert!(render_human(&report).contains("- [skip] backend_readiness"));
    }

    #[test]
    fn capability_check_lists_every_builtin() {
        let report = build_report(Ok::<_, String>(config_with_memory_db()));
        let capabilities = report
            .checks
            .iter()
            .find(|check| check.name == "capabilities")
            .expect("capabilities check");

        assert!(capabilities.details.contains("calculator=on"));
        assert!(capabilities.details.contains("shell=off"));
    }
}
