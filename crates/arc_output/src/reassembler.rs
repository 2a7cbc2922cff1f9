use tracing::warn;

use crate::error::OutputError;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BufferState {
    Empty,
    Accumulating,
    Flushed,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CompletedLine {
    /// 1-based position of this line within its buffer.
    pub line_number: usize,
    pub text: String,
    pub terminated: bool,
}

/// Joins fragments into logical lines for a single channel.
///
/// Holds at most one unterminated tail between calls; a newline is never left
/// in the buffer after `feed` returns.
#[derive(Debug, Default)]
pub struct LineReassembler {
    pending: String,
    line_number: usize,
    max_line_bytes: Option<usize>,
    closed: bool,
}

impl LineReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line_bytes(max_line_bytes: Option<usize>) -> Self {
        Self {
            max_line_bytes,
            ..Self::default()
        }
    }

    pub fn state(&self) -> BufferState {
        if self.closed {
            BufferState::Flushed
        } else if self.pending.is_empty() {
            BufferState::Empty
        } else {
            BufferState::Accumulating
        }
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Appends `text` and returns every line it completes, in order.
    pub fn feed(&mut self, text: &str) -> Result<Vec<CompletedLine>, OutputError> {
        if self.closed {
            return Err(OutputError::SessionClosed);
        }

        let mut lines = Vec::new();
        if text.is_empty() {
            return Ok(lines);
        }

        let search_from = self.pending.len();
        self.pending.push_str(text);

        let mut start = 0;
        let mut cursor = search_from;
        while let Some(offset) = self.pending[cursor..].find('\n') {
            let end = cursor + offset + 1;
            let line = self.pending[start..end].to_string();
            lines.push(self.complete(line, true));
            start = end;
            cursor = end;
        }
        self.pending.drain(..start);

        if let Some(max_line_bytes) = self.max_line_bytes {
            if self.pending.len() > max_line_bytes {
                warn!(
                    observed_bytes = self.pending.len(),
                    max_line_bytes, "partial line exceeds limit; emitting it unterminated"
                );
                let line = std::mem::take(&mut self.pending);
                lines.push(self.complete(line, false));
            }
        }

        Ok(lines)
    }

    /// Emits the unterminated tail without closing the buffer.
    pub fn take_partial(&mut self) -> Option<CompletedLine> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Some(self.complete(line, false))
    }

    /// End of input: emits the tail, if any, and closes the buffer.
    ///
    /// Flushing an already flushed buffer yields nothing.
    pub fn flush(&mut self) -> Option<CompletedLine> {
        if self.closed {
            return None;
        }
        let tail = self.take_partial();
        self.closed = true;
        tail
    }

    /// Drops the tail without emitting it and closes the buffer.
    ///
    /// Returns the number of discarded bytes.
    pub fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.closed = true;
        dropped
    }

    fn complete(&mut self, text: String, terminated: bool) -> CompletedLine {
        self.line_number += 1;
        CompletedLine {
            line_number: self.line_number,
            text,
            terminated,
        }
    }
}
