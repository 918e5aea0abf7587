use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub tools: ToolsConfig,
    pub llm: LlmConfig,
    pub chat: ChatConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SecurityConfig {
    /// Empty means every user is allowed.
    pub allowed_user_ids: Vec<String>,
    /// Requests per user per trailing minute. Zero or below blocks everyone.
    pub rate_limit_rpm: i64,
    pub idle_window_eviction_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ToolsConfig {
    pub calculator_enabled: bool,
    pub web_search_enabled: bool,
    pub file_manager_enabled: bool,
    pub shell_enabled: bool,
    pub file_allowed_dirs: Vec<PathBuf>,
    pub file_io_timeout_secs: u64,
    pub shell_allowed_commands: Vec<String>,
    pub shell_timeout_secs: u64,
    pub web_search_endpoint: String,
    pub web_search_max_results: usize,
    pub web_search_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub binary: String,
    pub model_path: Option<PathBuf>,
    pub threads: u32,
    pub max_tokens: u32,
    pub ctx_size: u32,
    pub gpu_layers: u32,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub history_limit: usize,
    pub system_prompt: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub enabled: bool,
    pub bot_token: SecretString,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    LlamaCli,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model_path: Option<PathBuf>,
    pub allowed_user_ids: Option<Vec<String>>,
    pub rate_limit_rpm: Option<i64>,
    pub shell_enabled: Option<bool>,
    pub chat_enabled: Option<bool>,
    pub chat_bot_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_CONFIG_FILE: &str = "concierge.toml";
pub const NESTED_CONFIG_FILE: &str = "config/concierge.toml";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://concierge.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            security: SecurityConfig {
                allowed_user_ids: Vec::new(),
                rate_limit_rpm: 10,
                idle_window_eviction_secs: 600,
            },
            tools: ToolsConfig {
                calculator_enabled: true,
                web_search_enabled: true,
                file_manager_enabled: true,
                shell_enabled: false,
                file_allowed_dirs: vec![
                    PathBuf::from("/sdcard/concierge_files"),
                    PathBuf::from("/tmp"),
                ],
                file_io_timeout_secs: 10,
                shell_allowed_commands: ["ls", "cat", "pwd", "echo", "date", "uname"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                shell_timeout_secs: 30,
                web_search_endpoint: "https://api.duckduckgo.com/".to_string(),
                web_search_max_results: 5,
                web_search_timeout_secs: 15,
            },
            llm: LlmConfig {
                provider: LlmProvider::LlamaCli,
                binary: "llama-cli".to_string(),
                model_path: None,
                threads: 4,
                max_tokens: 512,
                ctx_size: 2048,
                gpu_layers: 0,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 120,
                history_limit: 20,
                system_prompt: None,
            },
            chat: ChatConfig { enabled: false, bot_token: String::new().into() },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "llama_cli" | "llama-cli" | "llama" => Ok(Self::LlamaCli),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected llama_cli|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(security) = patch.security {
            if let Some(allowed_user_ids) = security.allowed_user_ids {
                self.security.allowed_user_ids = clean_list(allowed_user_ids);
            }
            if let Some(rate_limit_rpm) = security.rate_limit_rpm {
                self.security.rate_limit_rpm = rate_limit_rpm;
            }
            if let Some(idle_window_eviction_secs) = security.idle_window_eviction_secs {
                self.security.idle_window_eviction_secs = idle_window_eviction_secs;
            }
        }

        if let Some(tools) = patch.tools {
            if let Some(enabled) = tools.calculator_enabled {
                self.tools.calculator_enabled = enabled;
            }
            if let Some(enabled) = tools.web_search_enabled {
                self.tools.web_search_enabled = enabled;
            }
            if let Some(enabled) = tools.file_manager_enabled {
                self.tools.file_manager_enabled = enabled;
            }
            if let Some(enabled) = tools.shell_enabled {
                self.tools.shell_enabled = enabled;
            }
            if let Some(dirs) = tools.file_allowed_dirs {
                self.tools.file_allowed_dirs = dirs;
            }
            if let Some(timeout_secs) = tools.file_io_timeout_secs {
                self.tools.file_io_timeout_secs = timeout_secs;
            }
            if let Some(commands) = tools.shell_allowed_commands {
                self.tools.shell_allowed_commands = clean_list(commands);
            }
            if let Some(timeout_secs) = tools.shell_timeout_secs {
                self.tools.shell_timeout_secs = timeout_secs;
            }
            if let Some(endpoint) = tools.web_search_endpoint {
                self.tools.web_search_endpoint = endpoint;
            }
            if let Some(max_results) = tools.web_search_max_results {
                self.tools.web_search_max_results = max_results;
            }
            if let Some(timeout_secs) = tools.web_search_timeout_secs {
                self.tools.web_search_timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(binary) = llm.binary {
                self.llm.binary = binary;
            }
            if let Some(model_path) = llm.model_path {
                self.llm.model_path = Some(model_path);
            }
            if let Some(threads) = llm.threads {
                self.llm.threads = threads;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(ctx_size) = llm.ctx_size {
                self.llm.ctx_size = ctx_size;
            }
            if let Some(gpu_layers) = llm.gpu_layers {
                self.llm.gpu_layers = gpu_layers;
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(history_limit) = llm.history_limit {
                self.llm.history_limit = history_limit;
            }
            if let Some(system_prompt) = llm.system_prompt {
                self.llm.system_prompt = Some(system_prompt);
            }
        }

        if let Some(chat) = patch.chat {
            if let Some(enabled) = chat.enabled {
                self.chat.enabled = enabled;
            }
            if let Some(chat_bot_token_value) = chat.bot_token {
                self.chat.bot_token = secret_value(chat_bot_token_value);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CONCIERGE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CONCIERGE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CONCIERGE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CONCIERGE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let allowed = read_env("CONCIERGE_SECURITY_ALLOWED_USER_IDS")
            .or_else(|| read_env("CONCIERGE_ALLOWED_USER_IDS"));
        if let Some(value) = allowed {
            self.security.allowed_user_ids = split_list(&value);
        }
        let rate_limit = read_env("CONCIERGE_SECURITY_RATE_LIMIT_RPM")
            .map(|value| ("CONCIERGE_SECURITY_RATE_LIMIT_RPM", value))
            .or_else(|| {
                read_env("CONCIERGE_RATE_LIMIT_RPM").map(|value| ("CONCIERGE_RATE_LIMIT_RPM", value))
            });
        if let Some((key, value)) = rate_limit {
            self.security.rate_limit_rpm = parse_i64(key, &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_SECURITY_IDLE_WINDOW_EVICTION_SECS") {
            self.security.idle_window_eviction_secs =
                parse_u64("CONCIERGE_SECURITY_IDLE_WINDOW_EVICTION_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_TOOLS_CALCULATOR_ENABLED") {
            self.tools.calculator_enabled =
                parse_bool("CONCIERGE_TOOLS_CALCULATOR_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_TOOLS_WEB_SEARCH_ENABLED") {
            self.tools.web_search_enabled =
                parse_bool("CONCIERGE_TOOLS_WEB_SEARCH_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_TOOLS_FILE_MANAGER_ENABLED") {
            self.tools.file_manager_enabled =
                parse_bool("CONCIERGE_TOOLS_FILE_MANAGER_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_TOOLS_SHELL_ENABLED") {
            self.tools.shell_enabled = parse_bool("CONCIERGE_TOOLS_SHELL_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_TOOLS_FILE_ALLOWED_DIRS") {
            self.tools.file_allowed_dirs = split_list(&value).into_iter().map(PathBuf::from).collect();
        }
        if let Some(value) = read_env("CONCIERGE_TOOLS_FILE_IO_TIMEOUT_SECS") {
            self.tools.file_io_timeout_secs =
                parse_u64("CONCIERGE_TOOLS_FILE_IO_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_TOOLS_SHELL_ALLOWED_COMMANDS") {
            self.tools.shell_allowed_commands = split_list(&value);
        }
        if let Some(value) = read_env("CONCIERGE_TOOLS_SHELL_TIMEOUT_SECS") {
            self.tools.shell_timeout_secs =
                parse_u64("CONCIERGE_TOOLS_SHELL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_TOOLS_WEB_SEARCH_ENDPOINT") {
            self.tools.web_search_endpoint = value;
        }
        if let Some(value) = read_env("CONCIERGE_TOOLS_WEB_SEARCH_MAX_RESULTS") {
            self.tools.web_search_max_results =
                parse_usize("CONCIERGE_TOOLS_WEB_SEARCH_MAX_RESULTS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_TOOLS_WEB_SEARCH_TIMEOUT_SECS") {
            self.tools.web_search_timeout_secs =
                parse_u64("CONCIERGE_TOOLS_WEB_SEARCH_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_BINARY") {
            self.llm.binary = value;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_MODEL_PATH") {
            self.llm.model_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("CONCIERGE_LLM_THREADS") {
            self.llm.threads = parse_u32("CONCIERGE_LLM_THREADS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("CONCIERGE_LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_CTX_SIZE") {
            self.llm.ctx_size = parse_u32("CONCIERGE_LLM_CTX_SIZE", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_GPU_LAYERS") {
            self.llm.gpu_layers = parse_u32("CONCIERGE_LLM_GPU_LAYERS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CONCIERGE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CONCIERGE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_HISTORY_LIMIT") {
            self.llm.history_limit = parse_usize("CONCIERGE_LLM_HISTORY_LIMIT", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_SYSTEM_PROMPT") {
            self.llm.system_prompt = Some(value);
        }

        if let Some(value) = read_env("CONCIERGE_CHAT_ENABLED") {
            self.chat.enabled = parse_bool("CONCIERGE_CHAT_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_CHAT_BOT_TOKEN") {
            self.chat.bot_token = secret_value(value);
        }

        if let Some(value) = read_env("CONCIERGE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CONCIERGE_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("CONCIERGE_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("CONCIERGE_LOGGING_LEVEL").or_else(|| read_env("CONCIERGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CONCIERGE_LOGGING_FORMAT").or_else(|| read_env("CONCIERGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(model_path) = overrides.llm_model_path {
            self.llm.model_path = Some(model_path);
        }
        if let Some(allowed_user_ids) = overrides.allowed_user_ids {
            self.security.allowed_user_ids = clean_list(allowed_user_ids);
        }
        if let Some(rate_limit_rpm) = overrides.rate_limit_rpm {
            self.security.rate_limit_rpm = rate_limit_rpm;
        }
        if let Some(shell_enabled) = overrides.shell_enabled {
            self.tools.shell_enabled = shell_enabled;
        }
        if let Some(chat_enabled) = overrides.chat_enabled {
            self.chat.enabled = chat_enabled;
        }
        if let Some(chat_bot_token) = overrides.chat_bot_token {
            self.chat.bot_token = secret_value(chat_bot_token);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_security(&self.security)?;
        validate_tools(&self.tools)?;
        validate_llm(&self.llm)?;
        validate_chat(&self.chat)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// Path of the config file `load` would read, if any.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Expands `${NAME}` references from the process environment.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let (name, tail) =
            rest[start + 2..].split_once('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let value = env::var(name)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: name.to_string() })?;
        output.push_str(&value);
        rest = tail;
    }

    output.push_str(rest);
    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_security(security: &SecurityConfig) -> Result<(), ConfigError> {
    if security.idle_window_eviction_secs == 0 {
        return Err(ConfigError::Validation(
            "security.idle_window_eviction_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_tools(tools: &ToolsConfig) -> Result<(), ConfigError> {
    if tools.file_io_timeout_secs == 0 || tools.file_io_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "tools.file_io_timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if tools.shell_timeout_secs == 0 || tools.shell_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "tools.shell_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if let Some(command) =
        tools.shell_allowed_commands.iter().find(|command| command.contains('/'))
    {
        return Err(ConfigError::Validation(format!(
            "tools.shell_allowed_commands entries must be bare command names, got `{command}`"
        )));
    }

    let endpoint = tools.web_search_endpoint.trim();
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return Err(ConfigError::Validation(
            "tools.web_search_endpoint must start with http:// or https://".to_string(),
        ));
    }

    if tools.web_search_max_results == 0 || tools.web_search_max_results > 25 {
        return Err(ConfigError::Validation(
            "tools.web_search_max_results must be in range 1..=25".to_string(),
        ));
    }

    if tools.web_search_timeout_secs == 0 || tools.web_search_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "tools.web_search_timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    if llm.history_limit == 0 || llm.history_limit > 200 {
        return Err(ConfigError::Validation(
            "llm.history_limit must be in range 1..=200".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::LlamaCli => {
            if llm.binary.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "llm.binary is required for the llama_cli provider".to_string(),
                ));
            }
            if llm.threads == 0 || llm.max_tokens == 0 || llm.ctx_size == 0 {
                return Err(ConfigError::Validation(
                    "llm.threads, llm.max_tokens and llm.ctx_size must be greater than zero"
                        .to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let base_url = llm.base_url.as_deref().map(str::trim).unwrap_or_default();
            if base_url.is_empty() {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err(ConfigError::Validation(
                    "llm.base_url must start with http:// or https://".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_chat(chat: &ChatConfig) -> Result<(), ConfigError> {
    if chat.enabled && chat.bot_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "chat.bot_token is required when chat.enabled is true".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty()).map(str::to_string).collect()
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.trim().parse::<i64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().to_ascii_lowercase().parse::<bool>().map_err(|_| invalid_override(key, value))
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    security: Option<SecurityPatch>,
    tools: Option<ToolsPatch>,
    llm: Option<LlmPatch>,
    chat: Option<ChatPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SecurityPatch {
    allowed_user_ids: Option<Vec<String>>,
    rate_limit_rpm: Option<i64>,
    idle_window_eviction_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolsPatch {
    calculator_enabled: Option<bool>,
    web_search_enabled: Option<bool>,
    file_manager_enabled: Option<bool>,
    shell_enabled: Option<bool>,
    file_allowed_dirs: Option<Vec<PathBuf>>,
    file_io_timeout_secs: Option<u64>,
    shell_allowed_commands: Option<Vec<String>>,
    shell_timeout_secs: Option<u64>,
    web_search_endpoint: Option<String>,
    web_search_max_results: Option<usize>,
    web_search_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    binary: Option<String>,
    model_path: Option<PathBuf>,
    threads: Option<u32>,
    max_tokens: Option<u32>,
    ctx_size: Option<u32>,
    gpu_layers: Option<u32>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    history_limit: Option<usize>,
    system_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatPatch {
    enabled: Option<bool>,
    bot_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
