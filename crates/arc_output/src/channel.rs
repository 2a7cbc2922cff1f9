use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two independent output streams of a monitored process.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stdout,
    Stderr,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Stdout => "stdout",
            Channel::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw fragment read from a subprocess.
///
/// The payload may hold any number of newlines, and a logical line may span
/// several chunks.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct OutputChunk {
    pub channel: Channel,
    pub text: String,
}

impl OutputChunk {
    pub fn new(channel: Channel, text: impl Into<String>) -> Self {
        Self {
            channel,
            text: text.into(),
        }
    }

    pub fn stdout(text: impl Into<String>) -> Self {
        Self::new(Channel::Stdout, text)
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self::new(Channel::Stderr, text)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_serializes_lowercase() {
        let chunk = OutputChunk::stderr("boom\n");
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["channel"], "stderr");
        assert_eq!(value["text"], "boom\n");
        assert_eq!(Channel::Stdout.to_string(), "stdout");
    }
}
