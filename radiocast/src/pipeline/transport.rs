//! Backpressured byte conduit between pipeline stages.
//!
//! A bounded `mpsc` of `Bytes` chunks. A full channel parks the writer, which
//! is the pipeline's only flow control: a stalled encoder stalls capture.
//! End-of-stream is signalled by dropping every `ByteSender`.

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// The receiving side is gone
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transport channel closed")]
pub struct ChannelClosed;

/// Writing end of a transport channel
#[derive(Debug, Clone)]
pub struct ByteSender {
    tx: mpsc::Sender<Bytes>,
}

/// Reading end of a transport channel
#[derive(Debug)]
pub struct ByteReceiver {
    rx: mpsc::Receiver<Bytes>,
}

/// Create a transport channel buffering up to `capacity` chunks
pub fn byte_channel(capacity: usize) -> (ByteSender, ByteReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ByteSender { tx }, ByteReceiver { rx })
}

impl ByteSender {
    /// Send a chunk, waiting while the channel is full
    pub async fn send(&self, chunk: Bytes) -> Result<(), ChannelClosed> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx.send(chunk).await.map_err(|_| ChannelClosed)
    }

    /// Send a chunk from a non-async thread, blocking while the channel is full
    ///
    /// Must not be called from inside the tokio runtime.
    pub fn blocking_send(&self, chunk: Bytes) -> Result<(), ChannelClosed> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx.blocking_send(chunk).map_err(|_| ChannelClosed)
    }
}

impl ByteReceiver {
    /// Receive the next chunk
    ///
    /// Returns `None` once all senders are dropped and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}
