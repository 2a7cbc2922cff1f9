use serde::Deserialize;
use serde_json::Value;

use crate::error::FallbackReason;
use crate::normalized::Level;

pub const PHUTIL_OUT: &str = "phutil:out";
pub const PHUTIL_ERR: &str = "phutil:err";

/// Wire shape of a structured stdout line, discriminated by `type`.
///
/// Unknown fields are ignored; an unknown `type` fails the decode.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Envelope {
    #[serde(rename = "phutil:out")]
    Out {
        message: String,
        #[serde(default)]
        level: Option<Level>,
    },
    #[serde(rename = "phutil:err")]
    Error {
        message: String,
        #[serde(default)]
        level: Option<Level>,
    },
}

impl Envelope {
    fn into_parts(self) -> (Level, String) {
        match self {
            Envelope::Out { message, level } => (level.unwrap_or(Level::Log), message),
            Envelope::Error { message, level } => (level.unwrap_or(Level::Error), message),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Classified {
    /// Embedded envelope content; may itself contain several lines.
    Structured { level: Level, text: String },
    /// The input line, verbatim.
    Plain { text: String, reason: FallbackReason },
}

impl Classified {
    pub fn level(&self) -> Level {
        match self {
            Classified::Structured { level, .. } => *level,
            Classified::Plain { .. } => Level::Log,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Classified::Structured { text, .. } | Classified::Plain { text, .. } => text,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Classified::Structured { .. })
    }
}

/// Decides what a completed stdout line means.
///
/// Implementations must not fail: anything they cannot interpret comes back
/// as [`Classified::Plain`].
pub trait LineClassifier {
    fn classify(&mut self, line: &str) -> Classified;

    /// Looks at the unterminated stdout tail after a chunk has been consumed.
    ///
    /// Returning `Some` ends the line there, without waiting for a newline.
    /// The default keeps buffering until a newline or end of input.
    fn classify_unterminated(&mut self, _partial: &str) -> Option<(Level, String)> {
        None
    }
}

/// Recognizes the `phutil:out` / `phutil:err` JSON envelopes emitted by `arc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhutilClassifier;

impl PhutilClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl LineClassifier for PhutilClassifier {
    fn classify(&mut self, line: &str) -> Classified {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => return plain(line, FallbackReason::InvalidJson),
        };

        // only a string marker counts; serde would also accept a variant index here
        let marker = value.get("type").and_then(Value::as_str);
        if !matches!(marker, Some(PHUTIL_OUT | PHUTIL_ERR)) {
            return plain(line, FallbackReason::UnrecognizedEnvelope);
        }

        match serde_json::from_value::<Envelope>(value) {
            Ok(envelope) => {
                let (level, text) = envelope.into_parts();
                Classified::Structured { level, text }
            }
            Err(_) => plain(line, FallbackReason::UnrecognizedEnvelope),
        }
    }

    /// `arc` writes one envelope per write with no trailing newline, so a tail
    /// holding a whole envelope is complete. Truncated JSON keeps buffering.
    fn classify_unterminated(&mut self, partial: &str) -> Option<(Level, String)> {
        let trimmed = partial.trim();
        if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
            return None;
        }
        match self.classify(partial) {
            Classified::Structured { level, text } => Some((level, text)),
            Classified::Plain { .. } => None,
        }
    }
}

fn plain(line: &str, reason: FallbackReason) -> Classified {
    Classified::Plain {
        text: line.to_string(),
        reason,
    }
}
