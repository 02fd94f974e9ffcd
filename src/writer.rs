//! Dedicated writer task: the session's single outbound serialization point.
//!
//! Every stream enqueues frames through a cloned [`WriterHandle`]; one task
//! drains the queue onto the transport, so the wire never sees two frames
//! interleaved and no stream contends for a lock on the write path.
//!
//! # Architecture
//!
//! ```text
//! Stream 1 ─┐
//! Stream 2 ─┼─► mpsc::UnboundedSender<WriterCommand> ─► Writer Task ─► Transport
//! Stream N ─┘
//! ```
//!
//! The queue is unbounded because enqueueing happens while a stream holds
//! its own lock. Data volume is bounded by per-stream credit instead: a
//! stream never enqueues more DATA than its peer has authorized.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{MuxError, Result};
use crate::protocol::Frame;
use crate::transport::MessageWrite;

/// Maximum frames to send before flushing the transport.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the transport.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Stream the frame belongs to (for logging).
    pub stream_id: u32,
    /// Encoded frame: one transport message.
    pub message: Bytes,
}

impl OutboundFrame {
    /// Encode a frame for sending.
    #[inline]
    pub fn new(frame: &Frame) -> Self {
        Self {
            stream_id: frame.stream_id(),
            message: frame.encode(),
        }
    }

    /// Encoded size of this frame.
    #[inline]
    pub fn size(&self) -> usize {
        self.message.len()
    }
}

/// Instruction for the writer task.
#[derive(Debug)]
enum WriterCommand {
    /// Send a frame.
    Frame(OutboundFrame),
    /// Flush what is queued ahead of this command, close the transport and stop.
    Shutdown,
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable; every stream holds one.
#[derive(Clone, Debug)]
pub struct WriterHandle {
    /// Channel sender for frames.
    tx: mpsc::UnboundedSender<WriterCommand>,
    /// Frames queued but not yet written.
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Queue a frame. Never blocks.
    ///
    /// Fails with `SessionClosed` once the writer task has stopped.
    pub fn send(&self, frame: &Frame) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx
            .send(WriterCommand::Frame(OutboundFrame::new(frame)))
            .map_err(|_| {
                self.pending.fetch_sub(1, Ordering::Release);
                MuxError::SessionClosed
            })
    }

    /// Ask the writer task to drain the queue, close the transport and stop.
    ///
    /// Frames queued after this call are dropped.
    pub fn shutdown(&self) {
        let _ = self.tx.send(WriterCommand::Shutdown);
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Create a handle whose frames land in a plain receiver, bypassing the
    /// writer task. Used to observe the exact frames a stream emits.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriterCommand>();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let counter = pending.clone();
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                if let WriterCommand::Frame(outbound) = command {
                    counter.fetch_sub(1, Ordering::Release);
                    if let Ok(frame) = Frame::decode(outbound.message) {
                        let _ = frame_tx.send(frame);
                    }
                }
            }
        });
        (Self { tx, pending }, frame_rx)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The returned `JoinHandle` resolves when the task stops: `Ok(())` after a
/// shutdown request or once every handle is dropped, `Err` if the transport
/// failed.
pub fn spawn_writer_task<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: MessageWrite,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
    };

    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

/// Main writer loop - receives frames and writes them to the transport.
///
/// Collects ready frames into batches and flushes once per batch.
async fn writer_loop<W>(
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: MessageWrite,
{
    loop {
        // Wait for first command
        let first = match rx.recv().await {
            Some(command) => command,
            None => {
                // Every handle dropped, clean shutdown
                let _ = writer.close().await;
                return Ok(());
            }
        };

        // Collect additional ready commands (non-blocking)
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        let mut shutdown = false;
        let mut next = Some(first);

        while let Some(command) = next.take() {
            match command {
                WriterCommand::Frame(frame) => batch.push(frame),
                WriterCommand::Shutdown => {
                    shutdown = true;
                    break;
                }
            }
            if batch.len() < MAX_BATCH_SIZE {
                next = rx.try_recv().ok();
            }
        }

        let batch_size = batch.len();
        let result = write_batch(&mut writer, batch).await;
        pending.fetch_sub(batch_size, Ordering::Release);
        if let Err(e) = result {
            discard_queued(&mut rx, &pending);
            return Err(e);
        }

        if shutdown {
            discard_queued(&mut rx, &pending);
            writer.close().await?;
            tracing::debug!("Writer task stopped after shutdown request");
            return Ok(());
        }
    }
}

/// Close the queue and release the pending count of frames that will never be written.
fn discard_queued(rx: &mut mpsc::UnboundedReceiver<WriterCommand>, pending: &AtomicUsize) {
    rx.close();
    let mut dropped = 0;
    while let Ok(command) = rx.try_recv() {
        if let WriterCommand::Frame(_) = command {
            dropped += 1;
        }
    }
    if dropped > 0 {
        pending.fetch_sub(dropped, Ordering::Release);
        tracing::debug!("Writer task discarded {} queued frames", dropped);
    }
}

/// Send every frame of a batch as its own message, then flush once.
async fn write_batch<W>(writer: &mut W, batch: Vec<OutboundFrame>) -> Result<()>
where
    W: MessageWrite,
{
    if batch.is_empty() {
        return Ok(());
    }

    for frame in batch {
        tracing::trace!("Writing {} byte frame for stream {}", frame.size(), frame.stream_id);
        writer.send(frame.message).await?;
    }

    writer.flush().await?;
    Ok(())
}
