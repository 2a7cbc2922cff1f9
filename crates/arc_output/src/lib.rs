#![forbid(unsafe_code)]
//! Streaming normalizer for `arc` subprocess output.
//!
//! Raw stdout/stderr fragments go in; leveled lines come out:
//! - Fragments are joined into logical lines per channel, whatever the read boundaries.
//! - Stdout lines carrying a `{"type": "phutil:out", "message": ...}` envelope are
//!   unwrapped and their content split into lines again; anything else passes through
//!   verbatim.
//! - Stderr lines become `error` messages.
//!
//! The synchronous core is [`OutputSession`]. With the `tokio` feature, [`spawn_output_pump`]
//! drives a session from an async chunk stream and [`chunks_from_pipes`] produces that stream
//! from a child's pipes.

mod channel;
mod classifier;
mod config;
mod error;
mod normalized;
mod reassembler;
mod session;

#[cfg(feature = "tokio")]
mod pump;
#[cfg(feature = "tokio")]
mod reader;

pub use channel::{Channel, OutputChunk};
pub use classifier::{Classified, LineClassifier, PhutilClassifier, PHUTIL_ERR, PHUTIL_OUT};
pub use config::{FallbackDetailCapture, OutputConfig, OutputLimits};
pub use error::{FallbackDetail, FallbackReason, FallbackSink, OutputError};
pub use normalized::{Level, NormalizedMessage, SessionSummary, TerminalStatus};
pub use reassembler::{BufferState, CompletedLine, LineReassembler};
pub use session::{normalize_chunks, OutputSession};

#[cfg(feature = "tokio")]
pub use pump::{pump_output, spawn_output_pump, DynOutputCompletion, MessageStream, OutputStream};
#[cfg(feature = "tokio")]
pub use reader::{chunks_from_pipes, ChunkStream};
