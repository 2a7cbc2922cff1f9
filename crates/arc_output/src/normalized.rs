use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Log,
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Log => "log",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The externally observed unit: one leveled line of process output.
///
/// `text` keeps its trailing `\n`; only a final flush (or a forced break on an
/// over-long line) may produce an unterminated message.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub level: Level,
    pub text: String,
}

impl NormalizedMessage {
    pub fn new(level: Level, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }

    pub fn log(text: impl Into<String>) -> Self {
        Self::new(Level::Log, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Level::Error, text)
    }

    pub fn is_terminated(&self) -> bool {
        self.text.ends_with('\n')
    }
}

/// Outcome of the overall operation, supplied by the caller once input ends.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TerminalStatus {
    #[default]
    Success,
    Failure { reason: Option<String> },
}

impl TerminalStatus {
    pub fn failure(reason: impl Into<String>) -> Self {
        TerminalStatus::Failure {
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TerminalStatus::Success)
    }
}

/// Counters reported once a session has finished.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SessionSummary {
    pub status: TerminalStatus,
    /// Logical stdout lines seen by the classifier, flushed partials included.
    pub stdout_lines: usize,
    pub stderr_lines: usize,
    pub messages: usize,
    /// Stdout lines that were not a recognized envelope and passed through verbatim.
    pub plain_fallbacks: usize,
    pub saw_error_output: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_accepts_warn_alias() {
        let level: Level = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(level, Level::Warning);
        assert_eq!(serde_json::to_string(&Level::Warning).unwrap(), "\"warning\"");
        assert_eq!(Level::Warning.to_string(), "warning");
    }

    #[test]
    fn terminal_status_is_tagged() {
        let value = serde_json::to_value(TerminalStatus::failure("exit 1")).unwrap();
        assert_eq!(value["status"], "failure");
        assert_eq!(value["reason"], "exit 1");
        assert!(TerminalStatus::default().is_success());
    }
}
