use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

use concierge_core::config::ToolsConfig;

use crate::planner::SHELL;
use crate::tools::{Capability, CapabilityResult, ToolArguments};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("no closing quotation")]
    UnterminatedQuote,
    #[error("no escaped character")]
    DanglingEscape,
}

/// POSIX-style word splitting: whitespace separates words, single quotes are
/// literal, double quotes honour `\"` `\\` `\$` and `` \` ``, and a bare
/// backslash escapes the next character.
pub fn split_words(input: &str) -> Result<Vec<String>, SplitError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        match ch {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(SplitError::UnterminatedQuote),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(SplitError::UnterminatedQuote),
                        },
                        Some(c) => current.push(c),
                        None => return Err(SplitError::UnterminatedQuote),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(c) => current.push(c),
                    None => return Err(SplitError::DanglingEscape),
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Runs allowlisted programs directly (no shell), resolving the program by
/// its base name on `PATH`.
pub struct ShellRunner {
    enabled: bool,
    allowed_commands: BTreeSet<String>,
    timeout: Duration,
}

impl ShellRunner {
    pub fn new<I, S>(enabled: bool, allowed_commands: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled,
            allowed_commands: allowed_commands
                .into_iter()
                .map(Into::into)
                .filter(|command: &String| !command.trim().is_empty())
                .collect(),
            timeout,
        }
    }

    pub fn from_config(config: &ToolsConfig) -> Self {
        Self::new(
            config.shell_enabled,
            config.shell_allowed_commands.iter().cloned(),
            Duration::from_secs(config.shell_timeout_secs),
        )
    }

    fn not_allowed(&self, base: &str) -> CapabilityResult {
        let allowed = self.allowed_commands.iter().cloned().collect::<Vec<_>>().join(", ");
        CapabilityResult::failure(format!(
            "command `{base}` is not allowed; allowed commands: {allowed}"
        ))
    }
}

#[async_trait]
impl Capability for ShellRunner {
    fn name(&self) -> &str {
        SHELL
    }

    fn description(&self) -> &str {
        "Run a whitelisted shell command and return its output."
    }

    fn is_available(&self) -> bool {
        self.enabled && !self.allowed_commands.is_empty()
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<CapabilityResult> {
        let command = arguments.get("command").and_then(|value| value.as_str()).unwrap_or_default();
        if command.trim().is_empty() {
            return Ok(CapabilityResult::failure("no command provided"));
        }

        let words = match split_words(command) {
            Ok(words) => words,
            Err(error) => {
                return Ok(CapabilityResult::failure(format!("invalid command: {error}")));
            }
        };
        let Some((program, args)) = words.split_first() else {
            return Ok(CapabilityResult::failure("no command provided"));
        };

        let base = Path::new(program)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        if !self.allowed_commands.contains(&base) {
            return Ok(self.not_allowed(&base));
        }

        info!(
            event_name = "capability.shell.spawn",
            program = %base,
            argc = args.len(),
            "running command"
        );
        let child = Command::new(&base)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Ok(CapabilityResult::failure(format!("command not found: {base}")));
            }
            Err(error) => return Ok(CapabilityResult::failure(error.to_string())),
        };

        // Dropping the future on timeout kills the child.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => return Ok(CapabilityResult::failure(error.to_string())),
            Err(_) => {
                return Ok(CapabilityResult::failure(format!(
                    "command timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let exit_code = output.status.code();
        if output.status.success() {
            return Ok(CapabilityResult::success(stdout.trim())
                .with_extra("exit_code", json!(exit_code)));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let error = match (stderr.trim(), exit_code) {
            ("", Some(code)) => format!("exit code {code}"),
            ("", None) => "terminated by signal".to_string(),
            (stderr, _) => stderr.to_string(),
        };
        Ok(CapabilityResult::failure(error)
            .with_extra("exit_code", json!(exit_code))
            .with_extra("stdout", json!(stdout)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{split_words, ShellRunner, SplitError};
    use crate::tools::{Capability, ToolArguments};

    fn command(text: &str) -> ToolArguments {
        let mut arguments = ToolArguments::new();
        arguments.insert("command".to_string(), json!(text));
        arguments
    }

    #[test]
    fn splitting_honours_quotes_and_escapes() {
        assert_eq!(
            split_words(r#"echo 'a b' "c \"d\"" e\ f"#),
            Ok(vec!["echo".into(), "a b".into(), "c \"d\"".into(), "e f".into()])
        );
        assert_eq!(split_words("  ls   -la  "), Ok(vec!["ls".into(), "-la".into()]));
        assert_eq!(split_words("echo ''"), Ok(vec!["echo".into(), String::new()]));
        assert_eq!(split_words("echo 'open"), Err(SplitError::UnterminatedQuote));
        assert_eq!(split_words("echo \\"), Err(SplitError::DanglingEscape));
    }

    #[test]
    fn disabled_by_flag_or_empty_allowlist() {
        let empty: [&str; 0] = [];
        assert!(!ShellRunner::new(false, ["echo"], Duration::from_secs(5)).is_available());
        assert!(!ShellRunner::new(true, empty, Duration::from_secs(5)).is_available());
        assert!(ShellRunner::new(true, ["echo"], Duration::from_secs(5)).is_available());
    }

    #[tokio::test]
    async fn commands_outside_the_allowlist_are_refused() {
        let runner = ShellRunner::new(true, ["echo", "ls"], Duration::from_secs(5));
        let result = runner.execute(&command("rm -rf /")).await.expect("execute");
        assert_eq!(result.error(), Some("command `rm` is not allowed; allowed commands: echo, ls"));

        let result = runner.execute(&command("/tmp/evil/rm x")).await.expect("execute");
        assert!(!result.succeeded());
    }

    #[tokio::test]
    async fn empty_and_malformed_commands_fail() {
        let runner = ShellRunner::new(true, ["echo"], Duration::from_secs(5));
        let empty = runner.execute(&command("   ")).await.expect("execute");
        assert_eq!(empty.error(), Some("no command provided"));

        let malformed = runner.execute(&command("echo \"half")).await.expect("execute");
        assert_eq!(malformed.error(), Some("invalid command: no closing quotation"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn allowed_command_output_is_trimmed() {
        let runner = ShellRunner::new(true, ["echo"], Duration::from_secs(5));
        let result = runner.execute(&command("echo 'hello world'")).await.expect("execute");

        assert!(result.succeeded());
        assert_eq!(result.output(), "hello world");
        assert_eq!(result.extra_data().get("exit_code"), Some(&json!(0)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let runner = ShellRunner::new(true, ["ls"], Duration::from_secs(5));
        let result = runner
            .execute(&command("ls /definitely/not/a/real/path"))
            .await
            .expect("execute");

        assert!(!result.succeeded());
        assert!(result.error().is_some_and(|error| !error.is_empty()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_commands_time_out() {
        let runner = ShellRunner::new(true, ["sleep"], Duration::from_secs(1));
        let result = runner.execute(&command("sleep 5")).await.expect("execute");
        assert_eq!(result.error(), Some("command timed out after 1s"));
    }

    #[tokio::test]
    async fn missing_binaries_are_reported() {
        let runner = ShellRunner::new(true, ["concierge-no-such-binary"], Duration::from_secs(5));
        let result = runner.execute(&command("concierge-no-such-binary")).await.expect("execute");
        assert_eq!(result.error(), Some("command not found: concierge-no-such-binary"));
    }
}
