use thiserror::Error;

/// Classification shared by every failure the request pipeline can surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AccessDenied,
    RateLimited,
    UnknownCapability,
    CapabilityDisabled,
    CapabilityExecutionFailure,
    BackendUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessDenied => "access_denied",
            Self::RateLimited => "rate_limited",
            Self::UnknownCapability => "unknown_capability",
            Self::CapabilityDisabled => "capability_disabled",
            Self::CapabilityExecutionFailure => "capability_execution_failure",
            Self::BackendUnavailable => "backend_unavailable",
        }
    }

    /// Every pipeline failure ends up in the reply text.
    pub fn is_user_visible(&self) -> bool {
        true
    }

    /// The core never retries; waiting (rate limits) or reconfiguring is up
    /// to the user or operator.
    pub fn is_retriable(&self) -> bool {
        false
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Domain(_) => "The request could not be processed. Check inputs and try again.",
            Self::Persistence(_) | Self::Integration(_) => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Configuration(_) => "An unexpected internal error occurred.",
        }
    }
}
