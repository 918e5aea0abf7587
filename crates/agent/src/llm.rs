//! Generative backends used for the fallback branch of the pipeline.
//!
//! Two implementations ship: `llama-cli` spawned per request (the process
//! exits after each reply, so memory is reclaimed immediately) and an Ollama
//! HTTP server. Every failure is a [`BackendError`], which the pipeline
//! renders as an apology instead of failing the request.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error};

use concierge_core::config::{LlmConfig, LlmProvider};
use concierge_core::domain::conversation::{ChatRole, ChatTurn};
use concierge_core::errors::{ApplicationError, ErrorKind};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Concierge, a helpful assistant running locally on this device. \
     Be concise and accurate. When you cannot answer, say so.";

const STDERR_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("no model is configured; set llm.model_path or CONCIERGE_LLM_MODEL_PATH")]
    ModelNotConfigured,
    #[error("model file `{0}` does not exist")]
    ModelMissing(PathBuf),
    #[error("`{0}` was not found; install llama.cpp or set llm.binary")]
    BinaryNotFound(String),
    #[error("generation timed out after {0} seconds")]
    TimedOut(u64),
    #[error("backend exited with {status}: {stderr}")]
    ProcessFailed { status: String, stderr: String },
    #[error("backend request failed: {0}")]
    Request(String),
    #[error("backend returned an empty reply")]
    EmptyReply,
}

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::BackendUnavailable
    }
}

#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Short description for status output, e.g. the model in use.
    fn label(&self) -> String;

    /// Cheap local readiness check; does not contact the backend.
    fn is_ready(&self) -> bool;

    async fn generate(
        &self,
        message: &str,
        history: &[ChatTurn],
        system_prompt: Option<&str>,
    ) -> Result<String, BackendError>;
}

pub fn build_backend(config: &LlmConfig) -> Result<Arc<dyn GenerativeBackend>, ApplicationError> {
    match config.provider {
        LlmProvider::LlamaCli => Ok(Arc::new(LlamaCliBackend::from_config(config))),
        LlmProvider::Ollama => Ok(Arc::new(OllamaBackend::from_config(config)?)),
    }
}

/// ChatML prompt ending with an open assistant turn.
pub fn build_chatml_prompt(message: &str, history: &[ChatTurn], system_prompt: &str) -> String {
    let mut parts = Vec::with_capacity(history.len() + 3);
    parts.push(format!("<|im_start|>system\n{system_prompt}<|im_end|>"));
    for turn in history {
        parts.push(format!("<|im_start|>{}\n{}<|im_end|>", turn.role, turn.content));
    }
    parts.push(format!("<|im_start|>user\n{message}<|im_end|>"));
    parts.push("<|im_start|>assistant\n".to_string());
    parts.join("\n")
}

fn excerpt(text: &str) -> String {
    text.trim().chars().take(STDERR_EXCERPT_CHARS).collect()
}

pub struct LlamaCliBackend {
    binary: String,
    model_path: Option<PathBuf>,
    threads: u32,
    max_tokens: u32,
    ctx_size: u32,
    gpu_layers: u32,
    timeout: Duration,
}

impl LlamaCliBackend {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            model_path: config.model_path.clone(),
            threads: config.threads,
            max_tokens: config.max_tokens,
            ctx_size: config.ctx_size,
            gpu_layers: config.gpu_layers,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn model_path(&self) -> Result<&Path, BackendError> {
        let path = self.model_path.as_deref().ok_or(BackendError::ModelNotConfigured)?;
        if path.as_os_str().is_empty() {
            return Err(BackendError::ModelNotConfigured);
        }
        if !path.exists() {
            return Err(BackendError::ModelMissing(path.to_path_buf()));
        }
        Ok(path)
    }

    fn arguments(&self, model_path: &Path, prompt: &str) -> Vec<String> {
        vec![
            "--model".to_string(),
            model_path.display().to_string(),
            "--threads".to_string(),
            self.threads.to_string(),
            "--ctx-size".to_string(),
            self.ctx_size.to_string(),
            "--n-predict".to_string(),
            self.max_tokens.to_string(),
            "--n-gpu-layers".to_string(),
            self.gpu_layers.to_string(),
            "--log-disable".to_string(),
            "--prompt".to_string(),
            prompt.to_string(),
        ]
    }
}

#[async_trait]
impl GenerativeBackend for LlamaCliBackend {
    fn label(&self) -> String {
        match &self.model_path {
            Some(path) => format!("llama-cli ({})", path.display()),
            None => "llama-cli (model not set)".to_string(),
        }
    }

    fn is_ready(&self) -> bool {
        self.model_path().is_ok() && which::which(&self.binary).is_ok()
    }

    async fn generate(
        &self,
        message: &str,
        history: &[ChatTurn],
        system_prompt: Option<&str>,
    ) -> Result<String, BackendError> {
        let model_path = self.model_path()?;
        let prompt =
            build_chatml_prompt(message, history, system_prompt.unwrap_or(DEFAULT_SYSTEM_PROMPT));

        debug!(
            event_name = "llm.llama_cli.spawn",
            binary = %self.binary,
            history_turns = history.len(),
            prompt_chars = prompt.len(),
            "starting inference"
        );
        let child = Command::new(&self.binary)
            .args(self.arguments(model_path, &prompt))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| match error.kind() {
                io::ErrorKind::NotFound => BackendError::BinaryNotFound(self.binary.clone()),
                _ => BackendError::ProcessFailed {
                    status: "spawn failure".to_string(),
                    stderr: error.to_string(),
                },
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| BackendError::TimedOut(self.timeout.as_secs()))?
            .map_err(|error| BackendError::ProcessFailed {
                status: "io failure".to_string(),
                stderr: error.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                event_name = "llm.llama_cli.failed",
                status = %output.status,
                "llama-cli exited unsuccessfully"
            );
            return Err(BackendError::ProcessFailed {
                status: output.status.to_string(),
                stderr: excerpt(&stderr),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        // llama-cli echoes the prompt before the completion.
        let reply = match stdout.find(&prompt) {
            Some(start) => &stdout[start + prompt.len()..],
            None => &stdout[..],
        };
        Ok(reply.trim().to_string())
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OllamaMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaReply,
}

#[derive(Debug, Deserialize)]
struct OllamaReply {
    content: String,
}

pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaBackend {
    pub fn from_config(config: &LlmConfig) -> Result<Self, ApplicationError> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| ApplicationError::Configuration("llm.base_url is required for ollama".into()))?;
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                ApplicationError::Integration(format!("failed to build ollama http client: {error}"))
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl GenerativeBackend for OllamaBackend {
    fn label(&self) -> String {
        format!("ollama ({} at {})", self.model, self.base_url)
    }

    fn is_ready(&self) -> bool {
        !self.model.trim().is_empty()
    }

    async fn generate(
        &self,
        message: &str,
        history: &[ChatTurn],
        system_prompt: Option<&str>,
    ) -> Result<String, BackendError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(OllamaMessage {
            role: ChatRole::System.as_str(),
            content: system_prompt.unwrap_or(DEFAULT_SYSTEM_PROMPT),
        });
        messages.extend(
            history.iter().map(|turn| OllamaMessage { role: turn.role.as_str(), content: &turn.content }),
        );
        messages.push(OllamaMessage { role: ChatRole::User.as_str(), content: message });

        let request = OllamaChatRequest { model: &self.model, messages, stream: false };
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|error| self.request_error(error))?;
        let body: OllamaChatResponse =
            response.json().await.map_err(|error| self.request_error(error))?;

        let reply = body.message.content.trim().to_string();
        if reply.is_empty() {
            return Err(BackendError::EmptyReply);
        }
        Ok(reply)
    }
}

impl OllamaBackend {
    fn request_error(&self, error: reqwest::Error) -> BackendError {
        if error.is_timeout() {
            BackendError::TimedOut(self.timeout.as_secs())
        } else {
            BackendError::Request(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use concierge_core::config::{AppConfig, LlmProvider};
    use concierge_core::domain::conversation::ChatTurn;
    use concierge_core::errors::ErrorKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::{build_backend, build_chatml_prompt, BackendError, GenerativeBackend, LlamaCliBackend, OllamaBackend};

    #[test]
    fn chatml_prompt_orders_system_history_user_then_open_assistant_turn() {
        let history = vec![ChatTurn::user("hi"), ChatTurn::assistant("hello")];
        let prompt = build_chatml_prompt("what time is it?", &history, "be brief");

        assert_eq!(
            prompt,
            "<|im_start|>system\nbe brief<|im_end|>\n\
             <|im_start|>user\nhi<|im_end|>\n\
             <|im_start|>assistant\nhello<|im_end|>\n\
             <|im_start|>user\nwhat time is it?<|im_end|>\n\
             <|im_start|>assistant\n"
        );
    }

    #[tokio::test]
    async fn missing_model_path_is_a_recoverable_backend_error() {
        let backend = LlamaCliBackend::from_config(&AppConfig::default().llm);
        let error = backend.generate("hello", &[], None).await.expect_err("no model configured");

        assert_eq!(error, BackendError::ModelNotConfigured);
        assert_eq!(error.kind(), ErrorKind::BackendUnavailable);
        assert!(!backend.is_ready());
    }

    #[tokio::test]
    async fn nonexistent_model_file_is_reported() {
        let mut config = AppConfig::default().llm;
        config.model_path = Some(PathBuf::from("/definitely/not/here.gguf"));
        let backend = LlamaCliBackend::from_config(&config);

        let error = backend.generate("hello", &[], None).await.expect_err("model missing");
        assert!(matches!(error, BackendError::ModelMissing(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let model = dir.path().join("model.gguf");
        std::fs::write(&model, b"gguf").expect("write model");

        let mut config = AppConfig::default().llm;
        config.model_path = Some(model);
        config.binary = "concierge-no-such-llama".to_string();
        let backend = LlamaCliBackend::from_config(&config);

        let error = backend.generate("hello", &[], None).await.expect_err("binary missing");
        assert_eq!(error, BackendError::BinaryNotFound("concierge-no-such-llama".into()));
    }

    #[cfg(unix)]
    fn fake_llama(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-llama");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        script.display().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn echoed_prompt_is_stripped_from_the_reply() {
        let dir = tempfile::tempdir().expect("tempdir");
        let model = dir.path().join("model.gguf");
        std::fs::write(&model, b"gguf").expect("write model");

        let mut config = AppConfig::default().llm;
        config.model_path = Some(model);
        config.binary =
            fake_llama(dir.path(), r#"for last; do :; done; printf '%s  Paris is the capital.\n' "$last""#);
        let backend = LlamaCliBackend::from_config(&config);

        let reply = backend.generate("capital of France?", &[], Some("geo")).await.expect("reply");
        assert_eq!(reply, "Paris is the capital.");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let model = dir.path().join("model.gguf");
        std::fs::write(&model, b"gguf").expect("write model");

        let mut config = AppConfig::default().llm;
        config.model_path = Some(model);
        config.binary = fake_llama(dir.path(), "echo 'out of memory' >&2; exit 3");
        let backend = LlamaCliBackend::from_config(&config);

        match backend.generate("hi", &[], None).await {
            Err(BackendError::ProcessFailed { stderr, .. }) => assert_eq!(stderr, "out of memory"),
            other => panic!("expected process failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_generation_times_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let model = dir.path().join("model.gguf");
        std::fs::write(&model, b"gguf").expect("write model");

        let mut config = AppConfig::default().llm;
        config.model_path = Some(model);
        config.timeout_secs = 1;
        config.binary = fake_llama(dir.path(), "sleep 5");
        let backend = LlamaCliBackend::from_config(&config);

        assert_eq!(backend.generate("hi", &[], None).await, Err(BackendError::TimedOut(1)));
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut received = Vec::new();
        let mut chunk = [0_u8; 4096];
        loop {
            let Ok(read) = socket.read(&mut chunk).await else { return };
            if read == 0 {
                return;
            }
            received.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&received);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if received.len() >= header_end + 4 + content_length {
                    return;
                }
            }
        }
    }

    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            read_request(&mut socket).await;
            let response = format!(
                "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });
        format!("http://{address}")
    }

    fn ollama_config(base_url: String) -> concierge_core::config::LlmConfig {
        let mut config = AppConfig::default().llm;
        config.provider = LlmProvider::Ollama;
        config.base_url = Some(base_url);
        config.timeout_secs = 5;
        config
    }

    #[tokio::test]
    async fn ollama_reply_content_is_returned() {
        let base_url =
            serve_once("HTTP/1.1 200 OK", r#"{"message":{"role":"assistant","content":" Bonjour! "},"done":true}"#)
                .await;
        let backend = OllamaBackend::from_config(&ollama_config(base_url)).expect("backend");

        let reply = backend.generate("say hi in french", &[ChatTurn::user("hi")], None).await;
        assert_eq!(reply, Ok("Bonjour!".to_string()));
    }

    #[tokio::test]
    async fn ollama_http_errors_are_backend_errors() {
        let base_url = serve_once("HTTP/1.1 500 Internal Server Error", r#"{"error":"model not loaded"}"#).await;
        let backend = OllamaBackend::from_config(&ollama_config(base_url)).expect("backend");

        let error = backend.generate("hi", &[], None).await.expect_err("server error");
        assert!(matches!(error, BackendError::Request(_)));
    }

    #[test]
    fn provider_selects_the_backend() {
        let mut config = AppConfig::default().llm;
        let backend = build_backend(&config).expect("llama backend");
        assert!(backend.label().starts_with("llama-cli"));

        config.provider = LlmProvider::Ollama;
        let backend = build_backend(&config).expect("ollama backend");
        assert!(backend.label().starts_with("ollama (llama3.1"));
    }
}
