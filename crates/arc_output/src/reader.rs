use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use futures_core::Stream;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};
use tracing::{debug, trace};

use crate::channel::{Channel, OutputChunk};

const PIPE_QUEUE_DEPTH: usize = 16;

/// Chunks read from a process's pipes, in per-channel arrival order.
#[derive(Debug)]
pub struct ChunkStream {
    rx: mpsc::Receiver<io::Result<OutputChunk>>,
}

impl Stream for ChunkStream {
    type Item = io::Result<OutputChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Reads an already spawned child's stdout and stderr into one chunk stream.
///
/// Each pipe is read on its own task. The stream ends once both pipes hit EOF
/// or fail; a read error is yielded as an `Err` item and ends that pipe.
/// Must be called from within a Tokio runtime.
pub fn chunks_from_pipes<O, E>(stdout: O, stderr: E, read_chunk_bytes: usize) -> ChunkStream
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(PIPE_QUEUE_DEPTH);
    let read_chunk_bytes = read_chunk_bytes.max(1);
    tokio::spawn(read_pipe(stdout, Channel::Stdout, read_chunk_bytes, tx.clone()));
    tokio::spawn(read_pipe(stderr, Channel::Stderr, read_chunk_bytes, tx));
    ChunkStream { rx }
}

async fn read_pipe<R>(
    mut reader: R,
    channel: Channel,
    read_chunk_bytes: usize,
    tx: mpsc::Sender<io::Result<OutputChunk>>,
) where
    R: AsyncRead + Unpin,
{
    let mut decoder = Utf8Decoder::default();
    let mut buf = vec![0u8; read_chunk_bytes];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(n) => n,
            Err(err) => {
                debug!(%channel, error = %err, "failed to read process pipe");
                let _ = tx.send(Err(err)).await;
                return;
            }
        };

        let text = if n == 0 {
            decoder.finish()
        } else {
            decoder.decode(&buf[..n])
        };
        if !text.is_empty() {
            trace!(%channel, bytes = text.len(), "read output chunk");
            if tx.send(Ok(OutputChunk::new(channel, text))).await.is_err() {
                return;
            }
        }
        if n == 0 {
            return;
        }
    }
}

/// Incremental UTF-8 decoding that carries incomplete sequences across reads.
#[derive(Debug, Default)]
struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);

        let mut out = String::new();
        let mut rest: &[u8] = &self.carry;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.carry = rest.to_vec();
        out
    }

    fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        tail
    }
}
