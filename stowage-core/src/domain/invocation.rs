//! Runtime invocation domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Network policy requested for a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPolicy {
    /// Leave the engine's default networking untouched
    #[default]
    Default,

    /// Run without network access
    Disabled,

    /// A named custom network; the engine has no equivalent
    Custom(String),
}

/// The fully assembled engine command, ready for a process launcher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInvocation {
    /// Program followed by its arguments
    pub argv: Vec<String>,

    /// Variables to set on the launched process
    pub env: BTreeMap<String, String>,
}

impl RuntimeInvocation {
    pub fn new(argv: Vec<String>, env: BTreeMap<String, String>) -> Self {
        Self { argv, env }
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    /// Renders the invocation as a single shell line, environment first
    pub fn shell_line(&self) -> String {
        self.env
            .iter()
            .map(|(name, value)| format!("{}={}", name, shell_escape(value)))
            .chain(self.argv.iter().map(|arg| shell_escape(arg)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn shell_escape(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    let plain = arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "/._-:=,@+%".contains(c));
    if plain {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', "'\\''"))
}
