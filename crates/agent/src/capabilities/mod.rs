//! Built-in capabilities. Each one is registered whether or not it is
//! enabled, so `/status` and `doctor` can report disabled tools too.

pub mod calculator;
pub mod file_manager;
pub mod shell;
pub mod web_search;

use std::sync::Arc;

use concierge_core::config::ToolsConfig;
use concierge_core::errors::ApplicationError;

use crate::tools::{Capability, Dispatcher};

pub use calculator::Calculator;
pub use file_manager::FileManager;
pub use shell::ShellRunner;
pub use web_search::{DuckDuckGoSearch, SearchHit, SearchProvider, WebSearch};

pub fn builtin_capabilities(config: &ToolsConfig) -> Vec<Arc<dyn Capability>> {
    vec![
        Arc::new(Calculator::new(config.calculator_enabled)),
        Arc::new(WebSearch::from_config(config)),
        Arc::new(FileManager::from_config(config)),
        Arc::new(ShellRunner::from_config(config)),
    ]
}

pub async fn register_builtins(
    dispatcher: &Dispatcher,
    config: &ToolsConfig,
) -> Result<(), ApplicationError> {
    for capability in builtin_capabilities(config) {
        dispatcher.register(capability).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use concierge_core::config::AppConfig;

    use super::register_builtins;
    use crate::planner::{CALCULATOR, FILE_MANAGER, SHELL, WEB_SEARCH};
    use crate::tools::{Dispatcher, ToolArguments};

    #[tokio::test]
    async fn defaults_register_everything_but_enable_shell_only_on_request() {
        let dispatcher = Dispatcher::new();
        register_builtins(&dispatcher, &AppConfig::default().tools).await.expect("register");

        let names: Vec<String> =
            dispatcher.descriptors().await.into_iter().map(|descriptor| descriptor.name).collect();
        for expected in [CALCULATOR, FILE_MANAGER, SHELL, WEB_SEARCH] {
            assert!(names.iter().any(|name| name == expected), "{expected} missing");
        }

        let available = dispatcher.available_tools().await;
        assert!(available.contains_key(CALCULATOR));
        assert!(available.contains_key(WEB_SEARCH));
        assert!(!available.contains_key(SHELL));
    }

    #[tokio::test]
    async fn disabled_capabilities_report_disabled_on_dispatch() {
        let mut config = AppConfig::default().tools;
        config.calculator_enabled = false;
        let dispatcher = Dispatcher::new();
        register_builtins(&dispatcher, &config).await.expect("register");

        let result = dispatcher.dispatch(CALCULATOR, Default::default()).await;
        assert_eq!(result.error(), Some("capability disabled: calculator"));
    }

    #[tokio::test]
    async fn deeply_nested_calculator_input_comes_back_as_a_failure() {
        let dispatcher = Dispatcher::new();
        register_builtins(&dispatcher, &AppConfig::default().tools).await.expect("register");

        let expression = format!("calc {}1{}", "(".repeat(20_000), ")".repeat(20_000));
        let mut arguments = ToolArguments::new();
        arguments.insert("expression".into(), serde_json::json!(expression));
        let result = dispatcher.dispatch(CALCULATOR, arguments).await;

        assert!(!result.succeeded());
        assert!(result.error().is_some_and(|error| error.contains("nested too deeply")));
    }
}
