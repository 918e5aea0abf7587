pub mod chat;
pub mod config;
pub mod doctor;
pub mod migrate;

use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

/// One machine-readable line per command run.
#[derive(Debug, Serialize)]
struct CommandOutcome<'a> {
    command: &'a str,
    status: &'static str,
    error_class: Option<&'a str>,
    message: String,
}

/// A failed step inside a command: error class, message and exit code.
#[derive(Debug)]
pub struct StageFailure {
    pub error_class: &'static str,
    pub message: String,
    pub exit_code: u8,
}

impl StageFailure {
    pub fn new(error_class: &'static str, message: impl ToString, exit_code: u8) -> Self {
        Self { error_class, message: message.to_string(), exit_code }
    }
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload =
            CommandOutcome { command, status: "ok", error_class: None, message: message.into() };
        Self { exit_code: 0, output: serialize_payload(&payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command,
            status: "error",
            error_class: Some(error_class),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(&payload) }
    }

    pub fn from_stages(command: &str, result: Result<String, StageFailure>) -> Self {
        match result {
            Ok(message) => Self::success(command, message),
            Err(failure) => {
                Self::failure(command, failure.error_class, failure.message, failure.exit_code)
            }
        }
    }
}

/// Builds a current-thread runtime for commands that need one; a failure maps
/// to the shared `runtime_init` class.
pub(crate) fn command_runtime() -> Result<tokio::runtime::Runtime, StageFailure> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        StageFailure::new("runtime_init", format!("failed to initialize async runtime: {error}"), 3)
    })
}

fn serialize_payload(payload: &CommandOutcome<'_>) -> String {
    serde_json::to_string(payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"{}\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            escape_json(payload.command),
            escape_json(&error.to_string())
        )
    })
}

pub(crate) fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::{CommandResult, StageFailure};

    #[test]
    fn failure_payload_carries_error_class_and_exit_code() {
        let result = CommandResult::from_stages(
            "migrate",
            Err(StageFailure::new("db_connectivity", "unable to open database file", 4)),
        );

        assert_eq!(result.exit_code, 4);
        let payload: serde_json::Value = serde_json::from_str(&result.output).expect("json");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "db_connectivity");
    }

    #[test]
    fn success_payload_has_null_error_class() {
        let result = CommandResult::success("chat", "session ended after 0 messages");

        assert_eq!(result.exit_code, 0);
        let payload: serde_json::Value = serde_json::from_str(&result.output).expect("json");
        assert!(payload["error_class"].is_null());
        assert_eq!(payload["command"], "chat");
    }
}
