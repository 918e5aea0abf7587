use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use concierge_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl ToString, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.to_string(), env_keys }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field::new("database.url", &config.database.url, &["CONCIERGE_DATABASE_URL"]),
        Field::new(
            "database.max_connections",
            config.database.max_connections,
            &["CONCIERGE_DATABASE_MAX_CONNECTIONS"],
        ),
        Field::new(
            "database.timeout_secs",
            config.database.timeout_secs,
            &["CONCIERGE_DATABASE_TIMEOUT_SECS"],
        ),
        Field::new(
            "security.allowed_user_ids",
            render_list(&config.security.allowed_user_ids, "<everyone>"),
            &["CONCIERGE_SECURITY_ALLOWED_USER_IDS", "CONCIERGE_ALLOWED_USER_IDS"],
        ),
        Field::new(
            "security.rate_limit_rpm",
            config.security.rate_limit_rpm,
            &["CONCIERGE_SECURITY_RATE_LIMIT_RPM", "CONCIERGE_RATE_LIMIT_RPM"],
        ),
        Field::new(
            "security.idle_window_eviction_secs",
            config.security.idle_window_eviction_secs,
            &["CONCIERGE_SECURITY_IDLE_WINDOW_EVICTION_SECS"],
        ),
        Field::new(
            "tools.calculator_enabled",
            config.tools.calculator_enabled,
            &["CONCIERGE_TOOLS_CALCULATOR_ENABLED"],
        ),
        Field::new(
            "tools.web_search_enabled",
            config.tools.web_search_enabled,
            &["CONCIERGE_TOOLS_WEB_SEARCH_ENABLED"],
        ),
        Field::new(
            "tools.file_manager_enabled",
            config.tools.file_manager_enabled,
            &["CONCIERGE_TOOLS_FILE_MANAGER_ENABLED"],
        ),
        Field::new(
            "tools.shell_enabled",
            config.tools.shell_enabled,
            &["CONCIERGE_TOOLS_SHELL_ENABLED"],
        ),
        Field::new(
            "tools.file_allowed_dirs",
            render_paths(&config.tools.file_allowed_dirs),
            &["CONCIERGE_TOOLS_FILE_ALLOWED_DIRS"],
        ),
        Field::new(
            "tools.shell_allowed_commands",
            render_list(&config.tools.shell_allowed_commands, "<none>"),
            &["CONCIERGE_TOOLS_SHELL_ALLOWED_COMMANDS"],
        ),
        Field::new(
            "tools.web_search_endpoint",
            &config.tools.web_search_endpoint,
            &["CONCIERGE_TOOLS_WEB_SEARCH_ENDPOINT"],
        ),
        Field::new("llm.provider", format!("{:?}", config.llm.provider), &["CONCIERGE_LLM_PROVIDER"]),
        Field::new("llm.binary", &config.llm.binary, &["CONCIERGE_LLM_BINARY"]),
        Field::new(
            "llm.model_path",
            config
                .llm
                .model_path
                .as_deref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<unset>".to_string()),
            &["CONCIERGE_LLM_MODEL_PATH"],
        ),
        Field::new(
            "llm.base_url",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
            &["CONCIERGE_LLM_BASE_URL"],
        ),
        Field::new("llm.model", &config.llm.model, &["CONCIERGE_LLM_MODEL"]),
        Field::new("llm.timeout_secs", config.llm.timeout_secs, &["CONCIERGE_LLM_TIMEOUT_SECS"]),
        Field::new("llm.history_limit", config.llm.history_limit, &["CONCIERGE_LLM_HISTORY_LIMIT"]),
        Field::new("chat.enabled", config.chat.enabled, &["CONCIERGE_CHAT_ENABLED"]),
        Field::new(
            "chat.bot_token",
            redact_token(config.chat.bot_token.expose_secret()),
            &["CONCIERGE_CHAT_BOT_TOKEN"],
        ),
        Field::new(
            "server.bind_address",
            &config.server.bind_address,
            &["CONCIERGE_SERVER_BIND_ADDRESS"],
        ),
        Field::new(
            "server.health_check_port",
            config.server.health_check_port,
            &["CONCIERGE_SERVER_HEALTH_CHECK_PORT"],
        ),
        Field::new(
            "logging.level",
            &config.logging.level,
            &["CONCIERGE_LOGGING_LEVEL", "CONCIERGE_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["CONCIERGE_LOGGING_FORMAT", "CONCIERGE_LOG_FORMAT"],
        ),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    key_path.split('.').try_fold(root, |current, key| current.get(key)).is_some()
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn render_list(values: &[String], empty: &str) -> String {
    if values.is_empty() {
        empty.to_string()
    } else {
        values.join(",")
    }
}

fn render_paths(paths: &[PathBuf]) -> String {
    let rendered: Vec<String> = paths.iter().map(|path| path.display().to_string()).collect();
    render_list(&rendered, "<none>")
}

/// Keeps a recognisable prefix (`123456:`) and hides the secret part.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once(':') {
        return format!("{prefix}:***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_token, render_list};

    #[test]
    fn tokens_keep_only_the_bot_id() {
        assert_eq!(redact_token("123456:ABC-secret"), "123456:***");
        assert_eq!(redact_token("opaque"), "<redacted>");
        assert_eq!(redact_token("  "), "<empty>");
    }

    #[test]
    fn nested_keys_are_found_in_the_file_document() {
        let doc: Value = "[security]\nrate_limit_rpm = 5\n".parse().expect("toml");
        assert!(contains_path(&doc, "security.rate_limit_rpm"));
        assert!(!contains_path(&doc, "security.allowed_user_ids"));
        assert!(!contains_path(&doc, "llm.model"));
    }

    #[test]
    fn empty_lists_render_a_placeholder() {
        assert_eq!(render_list(&[], "<everyone>"), "<everyone>");
        assert_eq!(render_list(&["1".to_string(), "2".to_string()], "<none>"), "1,2");
    }
}
