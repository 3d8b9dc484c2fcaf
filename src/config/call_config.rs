use serde::{Deserialize, Serialize};

/// Placeholder replaced by the phone number in `command`
pub const NUMBER_PLACEHOLDER: &str = "{number}";

/// How a `CALL:` alert is turned into a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Whether call requests are acted on at all
    pub enabled: bool,
    /// Program and arguments to run. Every `{number}` is replaced by the number.
    pub command: Vec<String>,
}

impl Default for CallConfig {
    fn default() -> Self {
        CallConfig {
            enabled: true,
            command: vec!["xdg-open".to_string(), format!("tel:{}", NUMBER_PLACEHOLDER)],
        }
    }
}

impl CallConfig {
    /// Builds the argv for one call, or `None` if no program is configured
    pub fn command_for(&self, number: &str) -> Option<(String, Vec<String>)> {
        let (program, args) = self.command.split_first()?;
        let args = args
            .iter()
            .map(|arg| arg.replace(NUMBER_PLACEHOLDER, number))
            .collect();
        Some((program.replace(NUMBER_PLACEHOLDER, number), args))
    }
}
