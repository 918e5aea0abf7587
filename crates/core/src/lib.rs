pub mod config;
pub mod domain;
pub mod errors;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};
pub use domain::conversation::{ChatRole, ChatTurn};
pub use domain::request::{InboundRequest, UserId};
pub use errors::{ApplicationError, DomainError, ErrorKind};
