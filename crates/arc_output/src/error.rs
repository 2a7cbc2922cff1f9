use std::error::Error as StdError;

use thiserror::Error;

/// Errors surfaced to callers of a session or pump.
///
/// Malformed envelopes never show up here; they degrade to plain text.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output session is closed; no further chunks may be fed")]
    SessionClosed,
    #[error("upstream output sequence failed: {source}")]
    Upstream {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("output processing was cancelled")]
    Cancelled,
    #[error("output consumer dropped the message stream")]
    ConsumerClosed,
    #[error("failed to read process output: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "tokio")]
    #[error("failed to join output pump task: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl OutputError {
    pub fn upstream<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        OutputError::Upstream { source: err.into() }
    }
}

/// Why a stdout line was passed through as plain text.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FallbackReason {
    /// The line is not syntactically valid JSON.
    InvalidJson,
    /// Valid JSON, but not an object carrying a recognized `type` and a string `message`.
    UnrecognizedEnvelope,
}

impl FallbackReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FallbackReason::InvalidJson => "invalid_json",
            FallbackReason::UnrecognizedEnvelope => "unrecognized_envelope",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FallbackDetail {
    pub line_number: usize,
    pub reason: FallbackReason,
    /// Raw line, only populated with [`crate::FallbackDetailCapture::FullDetails`].
    pub line: Option<String>,
}

pub trait FallbackSink: Send + 'static {
    fn on_fallback(&mut self, detail: FallbackDetail);
}
