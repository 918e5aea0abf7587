//! Deterministic intent classification.
//!
//! Commands are matched first, then an ordered routing table of regex rules;
//! anything left over goes to the generative fallback. The routing table is a
//! literal, ordered list so precedence can be read (and tested) in one place.

use regex::{Captures, Regex};
use serde_json::Value;

use crate::tools::ToolArguments;

pub const CALCULATOR: &str = "calculator";
pub const FILE_MANAGER: &str = "file_manager";
pub const SHELL: &str = "shell";
pub const WEB_SEARCH: &str = "web_search";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuiltinCommand {
    Welcome,
    Help,
    Reset,
    Status,
}

impl BuiltinCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::Help => "help",
            Self::Reset => "reset",
            Self::Status => "status",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Plan {
    Command(BuiltinCommand),
    ToolInvocation { tool_name: String, arguments: ToolArguments },
    Fallback,
}

impl Plan {
    /// Short label for logs; never includes user text.
    pub fn label(&self) -> &str {
        match self {
            Self::Command(command) => command.as_str(),
            Self::ToolInvocation { tool_name, .. } => tool_name,
            Self::Fallback => "fallback",
        }
    }
}

const COMMAND_PREFIXES: &[(&str, BuiltinCommand)] = &[
    ("/start", BuiltinCommand::Welcome),
    ("/help", BuiltinCommand::Help),
    ("/reset", BuiltinCommand::Reset),
    ("/status", BuiltinCommand::Status),
];

type Extractor = fn(&str, &Captures<'_>, &Planner) -> ToolArguments;

struct RuleSpec {
    tool_name: &'static str,
    pattern: &'static str,
    extract: Extractor,
}

/// Evaluated top to bottom, first match wins. Shell precedes search so
/// `run: find ...` stays a shell command; the calculator's loose numeric
/// pattern goes last so it cannot swallow other tools' inputs that contain
/// digits.
const ROUTING_TABLE: &[RuleSpec] = &[
    RuleSpec {
        tool_name: SHELL,
        pattern: r"(?i)^(run|exec(ute)?|shell)\s*:",
        extract: shell_arguments,
    },
    RuleSpec {
        tool_name: FILE_MANAGER,
        pattern: r"(?i)(read|open|show)\s+file\s+(.+)",
        extract: file_arguments,
    },
    RuleSpec {
        tool_name: WEB_SEARCH,
        pattern: r"(?i)^(search|look up|find|google|web)\b",
        extract: search_arguments,
    },
    RuleSpec {
        tool_name: CALCULATOR,
        pattern: r"(?i)(^calc(ulate)?\s+|\d[\d\s+\-*/().^%]+\d)",
        extract: calculator_arguments,
    },
];

const SHELL_PREFIX: &str = r"(?i)^(run|exec(ute)?|shell)\s*:?\s*";
const SEARCH_PREFIX: &str = r"(?i)^(search|look up|find|google|web)\s*(for\b\s*)?";

struct RoutingRule {
    tool_name: &'static str,
    pattern: Regex,
    extract: Extractor,
}

/// Pure classifier; build once at startup and share.
pub struct Planner {
    rules: Vec<RoutingRule>,
    shell_prefix: Regex,
    search_prefix: Regex,
}

impl Planner {
    pub fn new() -> Result<Self, regex::Error> {
        let rules = ROUTING_TABLE
            .iter()
            .map(|spec| {
                Ok(RoutingRule {
                    tool_name: spec.tool_name,
                    pattern: Regex::new(spec.pattern)?,
                    extract: spec.extract,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            rules,
            shell_prefix: Regex::new(SHELL_PREFIX)?,
            search_prefix: Regex::new(SEARCH_PREFIX)?,
        })
    }

    /// Tool names in precedence order.
    pub fn routing_order(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.tool_name).collect()
    }

    pub fn plan(&self, text: &str) -> Plan {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Plan::Fallback;
        }

        let lowered = trimmed.to_lowercase();
        if let Some((_, command)) =
            COMMAND_PREFIXES.iter().find(|(prefix, _)| lowered.starts_with(prefix))
        {
            return Plan::Command(*command);
        }

        for rule in &self.rules {
            if let Some(captures) = rule.pattern.captures(trimmed) {
                return Plan::ToolInvocation {
                    tool_name: rule.tool_name.to_string(),
                    arguments: (rule.extract)(trimmed, &captures, self),
                };
            }
        }

        Plan::Fallback
    }
}

fn single(key: &str, value: impl Into<String>) -> ToolArguments {
    let mut arguments = ToolArguments::new();
    arguments.insert(key.to_string(), Value::String(value.into()));
    arguments
}

fn calculator_arguments(text: &str, _captures: &Captures<'_>, _planner: &Planner) -> ToolArguments {
    single("expression", text)
}

fn file_arguments(_text: &str, captures: &Captures<'_>, _planner: &Planner) -> ToolArguments {
    let path = captures.get(2).map(|path| path.as_str().trim()).unwrap_or_default();
    let mut arguments = single("action", "read");
    arguments.insert("path".to_string(), Value::String(path.to_string()));
    arguments
}

fn shell_arguments(text: &str, _captures: &Captures<'_>, planner: &Planner) -> ToolArguments {
    let command = planner.shell_prefix.replace(text, "");
    single("command", command.trim())
}

fn search_arguments(text: &str, _captures: &Captures<'_>, planner: &Planner) -> ToolArguments {
    let stripped = planner.search_prefix.replace(text, "");
    let query = match stripped.trim() {
        "" => text,
        query => query,
    };
    single("query", query)
}
