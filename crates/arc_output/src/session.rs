use tracing::{debug, trace};

use crate::channel::{Channel, OutputChunk};
use crate::classifier::{Classified, LineClassifier, PhutilClassifier};
use crate::config::{FallbackDetailCapture, OutputConfig};
use crate::error::{FallbackDetail, FallbackReason, OutputError};
use crate::normalized::{Level, NormalizedMessage, SessionSummary, TerminalStatus};
use crate::reassembler::{CompletedLine, LineReassembler};

/// One parse session over the output of a single process run.
///
/// `new` starts the session, `feed` processes chunks in arrival order, and
/// `finish` or `abort` stops it. Stdout lines go through the classifier and
/// their content is split again into lines; stderr lines map one to one onto
/// `error` messages.
///
/// `max_line_bytes` bounds the content and stderr buffers. Raw stdout is never
/// broken early, since a forced break would cut an envelope into invalid JSON.
pub struct OutputSession<C = PhutilClassifier> {
    stdout: LineReassembler,
    stderr: LineReassembler,
    content: LineReassembler,
    content_level: Level,
    /// Set when an unterminated envelope ended a stdout line.
    stdout_line_ended: bool,
    classifier: C,
    config: OutputConfig,
    summary: SessionSummary,
    closed: bool,
}

impl OutputSession<PhutilClassifier> {
    pub fn new(config: OutputConfig) -> Self {
        Self::with_classifier(config, PhutilClassifier::new())
    }
}

impl Default for OutputSession<PhutilClassifier> {
    fn default() -> Self {
        Self::new(OutputConfig::default())
    }
}

impl<C: LineClassifier> OutputSession<C> {
    pub fn with_classifier(config: OutputConfig, classifier: C) -> Self {
        let max_line_bytes = config.limits.max_line_bytes;
        Self {
            stdout: LineReassembler::new(),
            stderr: LineReassembler::with_max_line_bytes(max_line_bytes),
            content: LineReassembler::with_max_line_bytes(max_line_bytes),
            content_level: Level::Log,
            stdout_line_ended: false,
            classifier,
            config,
            summary: SessionSummary::default(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Processes one chunk and returns the messages it completes.
    pub fn feed(&mut self, chunk: &OutputChunk) -> Result<Vec<NormalizedMessage>, OutputError> {
        self.ensure_open()?;

        let mut out = Vec::new();
        if chunk.is_empty() {
            return Ok(out);
        }
        match chunk.channel {
            Channel::Stdout => {
                let mut text = chunk.text.as_str();
                if std::mem::take(&mut self.stdout_line_ended) {
                    // the newline trailing an envelope that already ended its line
                    text = text.strip_prefix('\n').unwrap_or(text);
                }
                for line in self.stdout.feed(text)? {
                    self.route_stdout_line(line, &mut out)?;
                }
                self.route_complete_stdout_tail(&mut out)?;
            }
            Channel::Stderr => {
                for line in self.stderr.feed(&chunk.text)? {
                    self.route_stderr_line(line, &mut out);
                }
            }
        }
        self.record(&out);
        Ok(out)
    }

    /// Flushes both channels and closes the session.
    pub fn finish(
        &mut self,
        status: TerminalStatus,
    ) -> Result<(Vec<NormalizedMessage>, SessionSummary), OutputError> {
        self.ensure_open()?;

        let mut out = Vec::new();
        if let Some(line) = self.stdout.flush() {
            self.route_stdout_line(line, &mut out)?;
        }
        if let Some(partial) = self.content.flush() {
            out.push(NormalizedMessage::new(self.content_level, partial.text));
        }
        if let Some(line) = self.stderr.flush() {
            self.route_stderr_line(line, &mut out);
        }
        self.record(&out);

        self.closed = true;
        self.summary.status = status;
        debug!(
            status = ?self.summary.status,
            messages = self.summary.messages,
            stdout_lines = self.summary.stdout_lines,
            stderr_lines = self.summary.stderr_lines,
            "output session finished"
        );
        Ok((out, self.summary.clone()))
    }

    /// Closes the session without flushing; partial lines are discarded.
    pub fn abort(&mut self) {
        if self.closed {
            return;
        }
        let dropped = self.stdout.discard() + self.stderr.discard() + self.content.discard();
        self.closed = true;
        debug!(dropped_bytes = dropped, "output session aborted");
    }

    fn ensure_open(&self) -> Result<(), OutputError> {
        if self.closed {
            return Err(OutputError::SessionClosed);
        }
        Ok(())
    }

    fn route_stdout_line(
        &mut self,
        line: CompletedLine,
        out: &mut Vec<NormalizedMessage>,
    ) -> Result<(), OutputError> {
        self.summary.stdout_lines += 1;
        match self.classifier.classify(&line.text) {
            Classified::Structured { level, text } => self.push_content(level, &text, out),
            Classified::Plain { text, reason } => {
                self.report_fallback(line.line_number, reason, &text);
                self.push_content(Level::Log, &text, out)
            }
        }
    }

    fn route_complete_stdout_tail(
        &mut self,
        out: &mut Vec<NormalizedMessage>,
    ) -> Result<(), OutputError> {
        if self.stdout.pending().is_empty() {
            return Ok(());
        }
        let Some((level, text)) = self.classifier.classify_unterminated(self.stdout.pending())
        else {
            return Ok(());
        };
        if let Some(line) = self.stdout.take_partial() {
            trace!(line_number = line.line_number, "unterminated envelope ends its line");
        }
        self.stdout_line_ended = true;
        self.summary.stdout_lines += 1;
        self.push_content(level, &text, out)
    }

    fn route_stderr_line(&mut self, line: CompletedLine, out: &mut Vec<NormalizedMessage>) {
        self.summary.stderr_lines += 1;
        out.push(NormalizedMessage::error(line.text));
    }

    fn push_content(
        &mut self,
        level: Level,
        text: &str,
        out: &mut Vec<NormalizedMessage>,
    ) -> Result<(), OutputError> {
        if text.is_empty() {
            return Ok(());
        }
        // a line keeps the level it started with
        if self.content.pending().is_empty() {
            self.content_level = level;
        }
        for piece in self.content.feed(text)? {
            out.push(NormalizedMessage::new(self.content_level, piece.text));
            self.content_level = level;
        }
        Ok(())
    }

    fn report_fallback(&mut self, line_number: usize, reason: FallbackReason, text: &str) {
        self.summary.plain_fallbacks += 1;
        debug!(
            line_number,
            reason = reason.as_str(),
            "stdout line is not a structured envelope; passing it through as text"
        );
        trace!(line_number, line = %text.trim_end(), "plain stdout line");

        let capture = self.config.fallback_detail;
        if let Some(sink) = self.config.fallback_sink.as_mut() {
            sink.on_fallback(FallbackDetail {
                line_number,
                reason,
                line: match capture {
                    FallbackDetailCapture::FullDetails => Some(text.to_string()),
                    FallbackDetailCapture::RedactedSummaryOnly => None,
                },
            });
        }
    }

    fn record(&mut self, out: &[NormalizedMessage]) {
        self.summary.messages += out.len();
        if out.iter().any(|message| message.level == Level::Error) {
            self.summary.saw_error_output = true;
        }
    }
}

/// Runs a whole session over an in-memory chunk sequence.
pub fn normalize_chunks<I>(
    chunks: I,
    status: TerminalStatus,
) -> Result<(Vec<NormalizedMessage>, SessionSummary), OutputError>
where
    I: IntoIterator<Item = OutputChunk>,
{
    let mut session: OutputSession = OutputSession::default();
    let mut messages = Vec::new();
    for chunk in chunks {
        messages.extend(session.feed(&chunk)?);
    }
    let (tail, summary) = session.finish(status)?;
    messages.extend(tail);
    Ok((messages, summary))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::FallbackSink;

    fn envelope(message: &str) -> String {
        serde_json::json!({ "type": "phutil:out", "message": message }).to_string()
    }

    fn run(chunks: Vec<OutputChunk>) -> Vec<NormalizedMessage> {
        normalize_chunks(chunks, TerminalStatus::Success).unwrap().0
    }

    #[test]
    fn envelope_content_is_split_into_lines() {
        let got = run(vec![OutputChunk::stdout(
            envelope("hello\nanother line\n") + "\n",
        )]);
        assert_eq!(
            got,
            [
                NormalizedMessage::log("hello\n"),
                NormalizedMessage::log("another line\n"),
            ]
        );
    }

    #[test]
    fn unterminated_envelope_is_classified_without_newline() {
        let got = run(vec![OutputChunk::stdout(envelope("hello\nanother line\n"))]);
        assert_eq!(
            got,
            [
                NormalizedMessage::log("hello\n"),
                NormalizedMessage::log("another line\n"),
            ]
        );
    }

    #[test]
    fn consecutive_envelopes_join_on_content() {
        let got = run(vec![
            OutputChunk::stdout(format!("{}\n{}\n", envelope("foo"), envelope("bar\n"))),
            OutputChunk::stdout(envelope("baz\n") + "\n"),
        ]);
        assert_eq!(
            got,
            [
                NormalizedMessage::log("foobar\n"),
                NormalizedMessage::log("baz\n"),
            ]
        );
    }

    #[test]
    fn level_switch_joins_into_the_pending_line() {
        let err = serde_json::json!({ "type": "phutil:err", "message": "bad\n" }).to_string();
        let got = run(vec![OutputChunk::stdout(format!(
            "{}\n{}\n{}\n",
            envelope("partial"),
            err,
            envelope("more\n")
        ))]);
        assert_eq!(
            got,
            [
                NormalizedMessage::log("partialbad\n"),
                NormalizedMessage::log("more\n"),
            ]
        );
        assert!(got.iter().all(NormalizedMessage::is_terminated));
    }

    #[test]
    fn lines_after_a_level_switch_take_the_new_level() {
        let err = serde_json::json!({ "type": "phutil:err", "message": "!\nfirst\nsecond" });
        let got = run(vec![
            OutputChunk::stdout(envelope("warn")),
            OutputChunk::stdout(err.to_string()),
        ]);
        assert_eq!(
            got,
            [
                NormalizedMessage::log("warn!\n"),
                NormalizedMessage::error("first\n"),
                NormalizedMessage::error("second"),
            ]
        );
    }

    #[test]
    fn whole_envelope_without_newline_is_not_glued_to_the_next_chunk() {
        let mut session: OutputSession = OutputSession::default();
        let got = session
            .feed(&OutputChunk::stdout(envelope("hello\n")))
            .unwrap();
        assert_eq!(got, [NormalizedMessage::log("hello\n")]);
        assert_eq!(session.stdout.pending(), "");

        let got = session.feed(&OutputChunk::stdout("\nfoo\n")).unwrap();
        assert_eq!(got, [NormalizedMessage::log("foo\n")]);
        let (_, summary) = session.finish(TerminalStatus::Success).unwrap();
        assert_eq!(summary.stdout_lines, 2);
        assert_eq!(summary.plain_fallbacks, 1);
    }

    #[test]
    fn truncated_envelope_tail_waits_for_the_rest_of_the_line() {
        let line = envelope("foobar\n");
        let split = line.find("bar").unwrap();
        let mut session: OutputSession = OutputSession::default();
        assert!(session
            .feed(&OutputChunk::stdout(&line[..split]))
            .unwrap()
            .is_empty());
        let got = session
            .feed(&OutputChunk::stdout(format!("{}\n", &line[split..])))
            .unwrap();
        assert_eq!(got, [NormalizedMessage::log("foobar\n")]);
    }

    #[test]
    fn line_limit_never_splits_an_envelope() {
        let config = OutputConfig::default().with_max_line_bytes(8);
        let mut session = OutputSession::new(config);
        let line = envelope("0123456789abcdef\n");
        let (head, tail) = line.split_at(line.len() / 2);

        let mut got = session.feed(&OutputChunk::stdout(head)).unwrap();
        got.extend(session.feed(&OutputChunk::stdout(tail)).unwrap());
        got.extend(session.feed(&OutputChunk::stdout("0123456789")).unwrap());
        got.extend(session.feed(&OutputChunk::stderr("abcdefghij")).unwrap());
        let (tail, summary) = session.finish(TerminalStatus::Success).unwrap();
        got.extend(tail);

        assert_eq!(
            got,
            [
                NormalizedMessage::log("0123456789abcdef\n"),
                NormalizedMessage::error("abcdefghij"),
                NormalizedMessage::log("0123456789"),
            ]
        );
        assert_eq!(summary.plain_fallbacks, 1);
    }

    #[test]
    fn finish_twice_and_feed_after_finish_are_rejected() {
        let mut session: OutputSession = OutputSession::default();
        session.feed(&OutputChunk::stderr("x")).unwrap();
        let (tail, summary) = session.finish(TerminalStatus::Success).unwrap();
        assert_eq!(tail, [NormalizedMessage::error("x")]);
        assert!(summary.saw_error_output);

        assert!(matches!(
            session.feed(&OutputChunk::stdout("late\n")),
            Err(OutputError::SessionClosed)
        ));
        assert!(matches!(
            session.finish(TerminalStatus::Success),
            Err(OutputError::SessionClosed)
        ));
    }

    #[test]
    fn abort_discards_partials() {
        let mut session: OutputSession = OutputSession::default();
        assert!(session.feed(&OutputChunk::stdout("half")).unwrap().is_empty());
        assert!(session.feed(&OutputChunk::stderr("also half")).unwrap().is_empty());
        session.abort();
        assert!(session.is_closed());
        assert!(matches!(
            session.finish(TerminalStatus::Success),
            Err(OutputError::SessionClosed)
        ));
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<FallbackDetail>>>);

    impl FallbackSink for Recorder {
        fn on_fallback(&mut self, detail: FallbackDetail) {
            self.0.lock().unwrap().push(detail);
        }
    }

    #[test]
    fn fallback_sink_sees_redacted_details_by_default() {
        let recorder = Recorder::default();
        let config = OutputConfig::default()
            .with_fallback_sink(recorder.clone(), FallbackDetailCapture::RedactedSummaryOnly);
        let mut session = OutputSession::new(config);
        session.feed(&OutputChunk::stdout("not json\n")).unwrap();
        let (_, summary) = session.finish(TerminalStatus::Success).unwrap();

        assert_eq!(summary.plain_fallbacks, 1);
        let details = recorder.0.lock().unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].line_number, 1);
        assert_eq!(details[0].reason, FallbackReason::InvalidJson);
        assert!(details[0].line.is_none());
    }

    #[test]
    fn fallback_sink_sees_raw_line_with_full_details() {
        let recorder = Recorder::default();
        let config = OutputConfig::default()
            .with_fallback_sink(recorder.clone(), FallbackDetailCapture::FullDetails);
        let mut session = OutputSession::new(config);
        session
            .feed(&OutputChunk::stdout("{\"type\":\"other\"}\n"))
            .unwrap();

        let details = recorder.0.lock().unwrap();
        assert_eq!(details[0].reason, FallbackReason::UnrecognizedEnvelope);
        assert_eq!(details[0].line.as_deref(), Some("{\"type\":\"other\"}\n"));
    }

    struct Upper;

    impl LineClassifier for Upper {
        fn classify(&mut self, line: &str) -> Classified {
            Classified::Structured {
                level: Level::Info,
                text: line.to_uppercase(),
            }
        }
    }

    #[test]
    fn custom_classifier_is_honoured() {
        let mut session = OutputSession::with_classifier(OutputConfig::default(), Upper);
        let got = session.feed(&OutputChunk::stdout("quiet\n")).unwrap();
        assert_eq!(got, [NormalizedMessage::new(Level::Info, "QUIET\n")]);
    }
}
