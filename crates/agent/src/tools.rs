use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use concierge_core::errors::{ApplicationError, ErrorKind};

pub type ToolArguments = serde_json::Map<String, Value>;

/// Outcome of a capability invocation. `error` is set exactly when the
/// invocation failed; `extra_data` is for programmatic consumers only and is
/// never rendered.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CapabilityResult {
    succeeded: bool,
    output: String,
    error: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    extra_data: ToolArguments,
    #[serde(skip)]
    failure_kind: Option<ErrorKind>,
}

impl CapabilityResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            output: output.into(),
            error: None,
            extra_data: ToolArguments::new(),
            failure_kind: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::failure_of_kind(ErrorKind::CapabilityExecutionFailure, error)
    }

    pub fn failure_of_kind(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            output: String::new(),
            error: Some(error.into()),
            extra_data: ToolArguments::new(),
            failure_kind: Some(kind),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra_data.insert(key.into(), value);
        self
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn extra_data(&self) -> &ToolArguments {
        &self.extra_data
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        self.failure_kind
    }
}

impl fmt::Display for CapabilityResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.succeeded, &self.error) {
            (true, _) => f.write_str(&self.output),
            (false, Some(error)) => write!(f, "[Error] {error}"),
            (false, None) => f.write_str("[Error] unknown failure"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub enabled: bool,
}

/// A routable unit of functionality.
///
/// `execute` may fail or even panic; the [`Dispatcher`] turns both into a
/// failure [`CapabilityResult`]. Capabilities that block on I/O enforce
/// their own timeout.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Fixed at construction: the configured flag combined with the
    /// capability's own preconditions.
    fn is_available(&self) -> bool;

    fn describe(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            enabled: self.is_available(),
        }
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<CapabilityResult>;
}

/// Capability registry plus the single point where faults become results.
#[derive(Default)]
pub struct Dispatcher {
    registry: RwLock<HashMap<String, Arc<dyn Capability>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry under the capability's name.
    pub async fn register(&self, capability: Arc<dyn Capability>) -> Result<(), ApplicationError> {
        let name = capability.name().to_string();
        if name.trim().is_empty() {
            return Err(ApplicationError::Configuration(
                "capability name must not be empty".to_string(),
            ));
        }
        if name.trim() != name {
            return Err(ApplicationError::Configuration(format!(
                "capability name `{name}` has surrounding whitespace"
            )));
        }

        let available = capability.is_available();
        let replaced = self.registry.write().await.insert(name.clone(), capability).is_some();
        debug!(
            event_name = "dispatch.capability.registered",
            capability = %name,
            available,
            replaced,
            "capability registered"
        );
        Ok(())
    }

    /// Name to description for every available capability, sorted by name.
    pub async fn available_tools(&self) -> BTreeMap<String, String> {
        self.registry
            .read()
            .await
            .iter()
            .filter(|(_, capability)| capability.is_available())
            .map(|(name, capability)| (name.clone(), capability.description().to_string()))
            .collect()
    }

    pub async fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        let mut descriptors: Vec<_> =
            self.registry.read().await.values().map(|capability| capability.describe()).collect();
        descriptors.sort_by(|left, right| left.name.cmp(&right.name));
        descriptors
    }

    /// Total over its inputs: always returns a result, never propagates a
    /// capability's error or panic.
    pub async fn dispatch(&self, name: &str, arguments: ToolArguments) -> CapabilityResult {
        let capability = self.registry.read().await.get(name).cloned();

        let Some(capability) = capability else {
            warn!(
                event_name = "dispatch.capability.unknown",
                capability = %name,
                error_kind = ErrorKind::UnknownCapability.as_str(),
                "dispatch to unknown capability"
            );
            return CapabilityResult::failure_of_kind(
                ErrorKind::UnknownCapability,
                format!("unknown capability: {name}"),
            );
        };

        if !capability.is_available() {
            warn!(
                event_name = "dispatch.capability.disabled",
                capability = %name,
                error_kind = ErrorKind::CapabilityDisabled.as_str(),
                "dispatch to disabled capability"
            );
            return CapabilityResult::failure_of_kind(
                ErrorKind::CapabilityDisabled,
                format!("capability disabled: {name}"),
            );
        }

        let started = Instant::now();
        let task = tokio::spawn(async move { capability.execute(&arguments).await });
        let result = match task.await {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => CapabilityResult::failure(format!("{error:#}")),
            Err(join_error) if join_error.is_panic() => {
                CapabilityResult::failure(panic_message(join_error.into_panic()))
            }
            Err(_) => CapabilityResult::failure("capability execution was cancelled"),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if result.succeeded() {
            info!(
                event_name = "dispatch.capability.completed",
                capability = %name,
                elapsed_ms,
                "capability completed"
            );
        } else {
            warn!(
                event_name = "dispatch.capability.failed",
                capability = %name,
                elapsed_ms,
                error = result.error().unwrap_or_default(),
                "capability failed"
            );
        }
        result
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "capability panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::json;

    use concierge_core::errors::ErrorKind;

    use super::{Capability, CapabilityResult, Dispatcher, ToolArguments};

    struct Echo {
        name: &'static str,
        enabled: bool,
    }

    #[async_trait]
    impl Capability for Echo {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Echo the `text` argument"
        }

        fn is_available(&self) -> bool {
            self.enabled
        }

        async fn execute(&self, arguments: &ToolArguments) -> Result<CapabilityResult> {
            let text = arguments.get("text").and_then(|value| value.as_str()).unwrap_or_default();
            Ok(CapabilityResult::success(text).with_extra("length", json!(text.len())))
        }
    }

    struct Faulty {
        panics: bool,
    }

    #[async_trait]
    impl Capability for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn execute(&self, _arguments: &ToolArguments) -> Result<CapabilityResult> {
            if self.panics {
                panic!("index out of range");
            }
            Err(anyhow!("disk on fire"))
        }
    }

    fn args(pairs: &[(&str, &str)]) -> ToolArguments {
        pairs.iter().map(|(key, value)| (key.to_string(), json!(value))).collect()
    }

    #[tokio::test]
    async fn unknown_capability_is_a_failure_result() {
        let dispatcher = Dispatcher::new();
        let result = dispatcher.dispatch("nope", ToolArguments::new()).await;

        assert!(!result.succeeded());
        assert_eq!(result.error(), Some("unknown capability: nope"));
        assert_eq!(result.failure_kind(), Some(ErrorKind::UnknownCapability));
    }

    #[tokio::test]
    async fn disabled_capability_is_registered_but_not_dispatched() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(Echo { name: "echo", enabled: false })).await.expect("register");

        assert!(dispatcher.available_tools().await.is_empty());
        assert_eq!(dispatcher.descriptors().await.len(), 1);

        let result = dispatcher.dispatch("echo", args(&[("text", "hi")])).await;
        assert_eq!(result.error(), Some("capability disabled: echo"));
        assert_eq!(result.failure_kind(), Some(ErrorKind::CapabilityDisabled));
    }

    #[tokio::test]
    async fn errors_and_panics_become_failure_results() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(Faulty { panics: false })).await.expect("register");
        let result = dispatcher.dispatch("faulty", ToolArguments::new()).await;
        assert_eq!(result.error(), Some("disk on fire"));
        assert_eq!(result.failure_kind(), Some(ErrorKind::CapabilityExecutionFailure));

        dispatcher.register(Arc::new(Faulty { panics: true })).await.expect("re-register");
        let result = dispatcher.dispatch("faulty", ToolArguments::new()).await;
        assert!(!result.succeeded());
        assert_eq!(result.error(), Some("index out of range"));
    }

    #[tokio::test]
    async fn re_registration_replaces_instead_of_duplicating() {
        let dispatcher = Dispatcher::new();
        for _ in 0..5 {
            dispatcher.register(Arc::new(Echo { name: "echo", enabled: true })).await.expect("register");
        }
        assert_eq!(dispatcher.available_tools().await.len(), 1);

        dispatcher.register(Arc::new(Echo { name: "echo", enabled: false })).await.expect("replace");
        assert!(dispatcher.available_tools().await.is_empty());
    }

    #[tokio::test]
    async fn empty_names_are_rejected() {
        let dispatcher = Dispatcher::new();
        let error = dispatcher.register(Arc::new(Echo { name: "  ", enabled: true })).await;
        assert!(error.is_err());
    }

    #[tokio::test]
    async fn padded_names_are_rejected_so_keys_match_capability_names() {
        let dispatcher = Dispatcher::new();
        let error = dispatcher.register(Arc::new(Echo { name: " echo ", enabled: true })).await;
        assert!(error.is_err());
        assert!(dispatcher.descriptors().await.is_empty());

        dispatcher.register(Arc::new(Echo { name: "echo", enabled: true })).await.expect("register");
        let names: Vec<String> =
            dispatcher.descriptors().await.into_iter().map(|descriptor| descriptor.name).collect();
        assert_eq!(names, ["echo"]);
    }

    #[tokio::test]
    async fn rendering_shows_output_or_error_but_never_extra_data() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(Echo { name: "echo", enabled: true })).await.expect("register");

        let result = dispatcher.dispatch("echo", args(&[("text", "hello")])).await;
        assert!(result.succeeded());
        assert_eq!(result.to_string(), "hello");
        assert_eq!(result.extra_data().get("length"), Some(&json!(5)));

        assert_eq!(CapabilityResult::failure("bad input").to_string(), "[Error] bad input");
    }
}
