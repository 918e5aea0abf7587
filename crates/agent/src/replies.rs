use std::collections::BTreeMap;

use crate::llm::BackendError;
use crate::tools::CapabilityResult;

pub const BOT_NAME: &str = "Concierge";

pub fn help_text() -> String {
    format!(
        "{BOT_NAME} - local assistant\n\n\
         Commands:\n  \
         /start  - Welcome message\n  \
         /help   - Show this help\n  \
         /reset  - Clear your conversation history\n  \
         /status - Show backend and tool status\n\n\
         Send any other message to chat.\n\
         Prefix with 'search ...' to query the web, 'calc ...' for maths, \
         'read file <path>' to read a file or 'run: <command>' for a shell command."
    )
}

pub fn welcome_text() -> String {
    format!("Hello! I'm {BOT_NAME}, your local assistant.\n\n{}", help_text())
}

pub fn reset_text() -> &'static str {
    "Conversation history cleared."
}

pub fn status_text(backend_label: &str, backend_ready: bool, tools: &BTreeMap<String, String>) -> String {
    let readiness = if backend_ready { "ready" } else { "not ready" };
    let tool_list = if tools.is_empty() {
        "  none enabled".to_string()
    } else {
        tools
            .iter()
            .map(|(name, description)| format!("  - {name}: {description}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!("{BOT_NAME} status\n\nModel: {backend_label} ({readiness})\n\nAvailable tools:\n{tool_list}")
}

/// Output on success, `[Error] <error>` otherwise. Extra data is never shown.
pub fn tool_reply(result: &CapabilityResult) -> String {
    result.to_string()
}

pub fn apology_text(error: &BackendError) -> String {
    format!("Sorry, I couldn't generate a reply: {error}")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::{apology_text, status_text, tool_reply, welcome_text};
    use crate::llm::BackendError;
    use crate::tools::CapabilityResult;

    #[test]
    fn welcome_includes_the_command_list() {
        let text = welcome_text();
        assert!(text.starts_with("Hello!"));
        assert!(text.contains("/reset"));
        assert!(text.contains("/status"));
    }

    #[test]
    fn status_lists_enabled_tools_or_says_none() {
        let mut tools = BTreeMap::new();
        assert!(status_text("llama-cli (model not set)", false, &tools).contains("none enabled"));

        tools.insert("calculator".to_string(), "Evaluate maths".to_string());
        let text = status_text("ollama (llama3.1)", true, &tools);
        assert!(text.contains("Model: ollama (llama3.1) (ready)"));
        assert!(text.contains("  - calculator: Evaluate maths"));
    }

    #[test]
    fn tool_replies_hide_extra_data() {
        let success = CapabilityResult::success("2 + 2 = 4").with_extra("value", json!(4.0));
        assert_eq!(tool_reply(&success), "2 + 2 = 4");

        let failure = CapabilityResult::failure("division by zero").with_extra("secret", json!("x"));
        assert_eq!(tool_reply(&failure), "[Error] division by zero");
    }

    #[test]
    fn apology_carries_the_backend_error() {
        assert_eq!(
            apology_text(&BackendError::TimedOut(120)),
            "Sorry, I couldn't generate a reply: generation timed out after 120 seconds"
        );
    }
}
