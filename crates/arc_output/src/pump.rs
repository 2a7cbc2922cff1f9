use std::{
    error::Error as StdError,
    future::{poll_fn, Future},
    pin::Pin,
    task::{Context, Poll},
};

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::OutputChunk;
use crate::classifier::LineClassifier;
use crate::config::OutputConfig;
use crate::error::OutputError;
use crate::normalized::{NormalizedMessage, SessionSummary, TerminalStatus};
use crate::session::OutputSession;

/// Streaming surface produced by [`spawn_output_pump`].
///
/// `messages` yields normalized lines as soon as they are complete and ends
/// once every buffer has been flushed. `completion` resolves with the session
/// summary; drain `messages` before awaiting it, the queue between them is
/// bounded.
pub struct OutputStream {
    pub messages: MessageStream,
    pub completion: DynOutputCompletion,
}

/// Type-erased completion future that resolves when the pump stops.
pub type DynOutputCompletion =
    Pin<Box<dyn Future<Output = Result<SessionSummary, OutputError>> + Send>>;

#[derive(Debug)]
pub struct MessageStream {
    rx: mpsc::Receiver<NormalizedMessage>,
}

impl MessageStream {
    pub fn new(rx: mpsc::Receiver<NormalizedMessage>) -> Self {
        Self { rx }
    }

    pub async fn next_message(&mut self) -> Option<NormalizedMessage> {
        self.rx.recv().await
    }
}

impl Stream for MessageStream {
    type Item = NormalizedMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Spawns a pump over `chunks` using the default `phutil` classifier.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_output_pump<S, E, F>(
    chunks: S,
    status: F,
    config: OutputConfig,
    cancel: CancellationToken,
) -> OutputStream
where
    S: Stream<Item = Result<OutputChunk, E>> + Send + 'static,
    E: Into<Box<dyn StdError + Send + Sync>> + Send + 'static,
    F: Future<Output = TerminalStatus> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.effective_channel_capacity());
    let session = OutputSession::new(config);
    let handle = tokio::spawn(pump_output(session, chunks, status, tx, cancel));

    let completion = Box::pin(async move {
        match handle.await {
            Ok(result) => result,
            Err(err) => Err(OutputError::Join(err)),
        }
    });

    OutputStream {
        messages: MessageStream::new(rx),
        completion,
    }
}

/// Drives `session` over `chunks` on the current task.
///
/// Chunks are handled one at a time; every message is sent before the next
/// chunk is polled, so a slow consumer pauses the upstream. `status` is only
/// awaited after the chunk stream ends. An upstream error or cancellation
/// aborts the session and its partial lines are never emitted.
pub async fn pump_output<C, S, E, F>(
    mut session: OutputSession<C>,
    chunks: S,
    status: F,
    sender: mpsc::Sender<NormalizedMessage>,
    cancel: CancellationToken,
) -> Result<SessionSummary, OutputError>
where
    C: LineClassifier,
    S: Stream<Item = Result<OutputChunk, E>>,
    E: Into<Box<dyn StdError + Send + Sync>>,
    F: Future<Output = TerminalStatus>,
{
    tokio::pin!(chunks);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                session.abort();
                debug!("output pump cancelled while waiting for input");
                return Err(OutputError::Cancelled);
            }
            next = poll_fn(|cx| chunks.as_mut().poll_next(cx)) => next,
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(err)) => {
                session.abort();
                let err = OutputError::upstream(err);
                warn!(error = %err, "upstream output failed; partial lines discarded");
                return Err(err);
            }
            None => break,
        };

        let messages = session.feed(&chunk)?;
        if let Err(err) = deliver(&sender, messages, &cancel).await {
            session.abort();
            return Err(err);
        }
    }

    let status = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            session.abort();
            debug!("output pump cancelled while waiting for terminal status");
            return Err(OutputError::Cancelled);
        }
        status = status => status,
    };

    let (messages, summary) = session.finish(status)?;
    deliver(&sender, messages, &cancel).await?;
    Ok(summary)
}

async fn deliver(
    sender: &mpsc::Sender<NormalizedMessage>,
    messages: Vec<NormalizedMessage>,
    cancel: &CancellationToken,
) -> Result<(), OutputError> {
    for message in messages {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OutputError::Cancelled),
            sent = sender.send(message) => {
                if sent.is_err() {
                    debug!("output consumer went away");
                    return Err(OutputError::ConsumerClosed);
                }
            }
        }
    }
    Ok(())
}
