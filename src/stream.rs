//! Multiplexed streams.
//!
//! A stream is one ordered, flow-controlled, bidirectional byte channel
//! carried by a [`Session`](crate::Session). Each stream owns an inbound
//! [`ByteBuffer`], its send credit and a small state machine:
//!
//! ```text
//! Created ──ACK──► Accepted ──Close──► Closed ───FIN──┐
//!                     │                               ▼
//!                     └─────FIN──► RemoteClosed ─Close─► Dead
//! ```
//!
//! All mutable state sits behind one lock per stream. Blocked readers,
//! writers and openers park their wakers in the stream; every mutation wakes
//! all of them and each re-checks its own condition.
//!
//! Flow control: a writer may only send as many bytes as the peer has
//! granted. The reader grants credit back with an ACK for every byte it
//! drains from the buffer.

use std::fmt;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{ready, Context, Poll, Waker};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::buffer::ByteBuffer;
use crate::error::{MuxError, Result};
use crate::protocol::{Frame, FrameType};
use crate::transport::Addr;
use crate::writer::WriterHandle;

/// Lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Opened locally, waiting for the peer's first ACK.
    Created,
    /// Full-duplex I/O permitted.
    Accepted,
    /// Local side sent FIN; the peer may still send.
    Closed,
    /// Peer sent FIN; the local side may still write.
    RemoteClosed,
    /// Both directions closed. Unread bytes may remain buffered.
    Dead,
}

impl StreamState {
    /// Local side has sent (or can no longer send) FIN.
    #[inline]
    fn is_locally_closed(self) -> bool {
        matches!(self, StreamState::Closed | StreamState::Dead)
    }

    /// Peer will send no more data.
    #[inline]
    fn is_remotely_closed(self) -> bool {
        matches!(self, StreamState::RemoteClosed | StreamState::Dead)
    }
}

/// Addresses of the connection a stream rides on.
#[derive(Debug, Clone)]
pub(crate) struct Endpoints {
    pub local: Addr,
    pub remote: Addr,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Read,
    Write,
}

/// One-shot deadline with a sticky "exceeded" flag.
#[derive(Debug, Default)]
struct Deadline {
    exceeded: bool,
    /// Bumped on every re-arm so stale timers are ignored.
    generation: u64,
    timer: Option<AbortHandle>,
}

impl Deadline {
    fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Debug)]
struct StreamInner {
    state: StreamState,
    /// First ACK seen (or stream accepted from a remote open).
    accepted: bool,
    buffer: ByteBuffer,
    /// Bytes the peer has authorized us to send.
    send_credit: u32,
    /// Sticky terminal error.
    end_err: Option<MuxError>,
    read_deadline: Deadline,
    write_deadline: Deadline,
    /// Every application handle is gone; inbound data is discarded.
    detached: bool,
    waiters: Vec<Waker>,
}

impl StreamInner {
    fn deadline_mut(&mut self, direction: Direction) -> &mut Deadline {
        match direction {
            Direction::Read => &mut self.read_deadline,
            Direction::Write => &mut self.write_deadline,
        }
    }

    fn park(&mut self, cx: &Context<'_>) {
        if !self.waiters.iter().any(|w| w.will_wake(cx.waker())) {
            self.waiters.push(cx.waker().clone());
        }
    }

    fn wake_all(&mut self) {
        for waker in self.waiters.drain(..) {
            waker.wake();
        }
    }
}

/// State shared between the session's stream table and application handles.
pub(crate) struct StreamShared {
    id: u32,
    inner: Mutex<StreamInner>,
    writer: WriterHandle,
    endpoints: Arc<Endpoints>,
}

impl StreamShared {
    pub(crate) fn new(
        id: u32,
        state: StreamState,
        send_credit: u32,
        window: u32,
        writer: WriterHandle,
        endpoints: Arc<Endpoints>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            inner: Mutex::new(StreamInner {
                state,
                accepted: state != StreamState::Created,
                buffer: ByteBuffer::new(window as usize),
                send_credit,
                end_err: None,
                read_deadline: Deadline::default(),
                write_deadline: Deadline::default(),
                detached: false,
                waiters: Vec::new(),
            }),
            writer,
            endpoints,
        })
    }

    fn lock(&self) -> MutexGuard<'_, StreamInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn state(&self) -> StreamState {
        self.lock().state
    }

    /// Apply a frame received for this stream.
    pub(crate) fn handle_frame(&self, frame: Frame) {
        let mut inner = self.lock();

        match frame.frame_type() {
            FrameType::Ack => match frame.credit() {
                Ok(credit) => {
                    inner.send_credit = inner.send_credit.saturating_add(credit);
                    if !inner.accepted {
                        inner.accepted = true;
                        if inner.state == StreamState::Created {
                            inner.state = StreamState::Accepted;
                        }
                        tracing::debug!("Stream {} accepted with {} bytes of credit", self.id, credit);
                    } else {
                        tracing::trace!("Stream {} granted {} bytes of credit", self.id, credit);
                    }
                }
                Err(e) => {
                    inner.end_err.get_or_insert(e);
                }
            },
            FrameType::Data => {
                if inner.detached {
                    tracing::debug!(
                        "Stream {} discarding {} bytes after handle dropped",
                        self.id,
                        frame.payload_len()
                    );
                    return;
                }
                tracing::trace!("Stream {} received {} data bytes", self.id, frame.payload_len());
                if let Err(e) = inner.buffer.write(frame.payload()) {
                    tracing::warn!("Stream {} buffer overflow: {}", self.id, e);
                    inner.end_err.get_or_insert(e);
                }
            }
            FrameType::Fin => {
                tracing::debug!("Remote stream {} closed", self.id);
                inner.state = if inner.state.is_locally_closed() {
                    StreamState::Dead
                } else {
                    StreamState::RemoteClosed
                };
            }
            FrameType::Open => {
                tracing::warn!("Stream {} received OPEN while already open", self.id);
                return;
            }
        }

        inner.wake_all();
    }

    /// Resolve once the peer accepted the open request.
    pub(crate) fn poll_accepted(&self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let mut inner = self.lock();

        if inner.accepted {
            return Poll::Ready(Ok(()));
        }
        if let Some(err) = &inner.end_err {
            return Poll::Ready(Err(err.clone()));
        }
        if inner.state.is_remotely_closed() {
            return Poll::Ready(Err(MuxError::StreamRefused(self.id)));
        }

        inner.park(cx);
        Poll::Pending
    }

    pub(crate) fn poll_read(&self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let mut inner = self.lock();

        if inner.buffer.is_empty()
            && inner.end_err.is_none()
            && !inner.read_deadline.exceeded
            && !inner.state.is_remotely_closed()
        {
            tracing::trace!("Stream {} read waiting", self.id);
            inner.park(cx);
            return Poll::Pending;
        }

        if inner.buffer.is_empty() && inner.state.is_remotely_closed() {
            return Poll::Ready(Ok(0));
        }
        if inner.read_deadline.exceeded {
            return Poll::Ready(Err(MuxError::ReadTimeout));
        }
        if let Some(err) = &inner.end_err {
            return Poll::Ready(Err(err.clone()));
        }

        let n = inner.buffer.read(buf);
        inner.wake_all();

        // Grant the freed space back to the peer.
        if let Err(e) = self.writer.send(&Frame::ack(self.id, n as u32)) {
            // The session is shutting down and will post the terminal error.
            tracing::debug!("Stream {} could not send ACK: {}", self.id, e);
        }

        Poll::Ready(Ok(n))
    }

    /// One credit-limited write step: sends at most `min(buf.len(), credit)` bytes.
    pub(crate) fn poll_write(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let mut inner = self.lock();

        if inner.send_credit == 0
            && inner.end_err.is_none()
            && !inner.write_deadline.exceeded
            && !inner.state.is_locally_closed()
        {
            tracing::trace!("Stream {} write waiting for credit", self.id);
            inner.park(cx);
            return Poll::Pending;
        }

        if inner.state.is_locally_closed() {
            return Poll::Ready(Err(MuxError::BrokenPipe));
        }
        if inner.write_deadline.exceeded {
            return Poll::Ready(Err(MuxError::WriteTimeout));
        }
        if let Some(err) = &inner.end_err {
            return Poll::Ready(Err(err.clone()));
        }

        let n = buf.len().min(inner.send_credit as usize);
        self.writer
            .send(&Frame::data(self.id, Bytes::copy_from_slice(&buf[..n])))?;
        inner.send_credit -= n as u32;
        inner.wake_all();

        Poll::Ready(Ok(n))
    }

    pub(crate) fn close(&self) -> Result<()> {
        let mut inner = self.lock();

        inner.state = match inner.state {
            StreamState::Closed | StreamState::Dead => return Ok(()),
            StreamState::RemoteClosed => StreamState::Dead,
            StreamState::Created | StreamState::Accepted => StreamState::Closed,
        };
        inner.wake_all();
        tracing::debug!("Stream {} closed locally", self.id);

        self.writer.send(&Frame::fin(self.id))
    }

    /// Called when the last application handle is dropped.
    fn detach(&self) {
        {
            let mut inner = self.lock();
            inner.detached = true;
            let dropped = inner.buffer.clear();
            if dropped > 0 {
                tracing::debug!("Stream {} dropped with {} unread bytes", self.id, dropped);
            }
            inner.read_deadline.cancel();
            inner.write_deadline.cancel();
        }
        if let Err(e) = self.close() {
            tracing::debug!("Stream {} close on drop failed: {}", self.id, e);
        }
    }

    /// Post a session-level outcome to this stream.
    ///
    /// `None` means the connection ended cleanly: the stream becomes dead but
    /// buffered bytes stay readable. `Some(err)` becomes the terminal error.
    pub(crate) fn terminate(&self, reason: Option<MuxError>) {
        let mut inner = self.lock();
        match reason {
            None => {
                inner.state = StreamState::Dead;
                if !inner.accepted {
                    inner.end_err.get_or_insert(MuxError::SessionClosed);
                }
            }
            Some(err) => {
                inner.end_err.get_or_insert(err);
            }
        }
        inner.wake_all();
    }

    pub(crate) fn is_removable(&self) -> bool {
        let inner = self.lock();
        inner.state == StreamState::Dead && inner.buffer.is_empty()
    }

    fn set_deadline(self: &Arc<Self>, direction: Direction, deadline: Option<Instant>) -> Result<()> {
        let mut inner = self.lock();
        let slot = inner.deadline_mut(direction);

        slot.cancel();
        slot.exceeded = false;
        slot.generation = slot.generation.wrapping_add(1);

        if let Some(at) = deadline {
            if at <= Instant::now() {
                slot.exceeded = true;
            } else {
                let runtime = tokio::runtime::Handle::try_current()
                    .map_err(|e| MuxError::from(io::Error::new(io::ErrorKind::Other, e)))?;
                let generation = slot.generation;
                let stream = Arc::downgrade(self);
                let timer = runtime.spawn(async move {
                    tokio::time::sleep_until(at).await;
                    if let Some(stream) = stream.upgrade() {
                        stream.expire(direction, generation);
                    }
                });
                slot.timer = Some(timer.abort_handle());
            }
        }

        inner.wake_all();
        Ok(())
    }

    fn expire(&self, direction: Direction, generation: u64) {
        let mut inner = self.lock();
        let slot = inner.deadline_mut(direction);
        if slot.generation != generation {
            return;
        }
        slot.exceeded = true;
        slot.timer = None;
        tracing::debug!("Stream {} {:?} deadline exceeded", self.id, direction);
        inner.wake_all();
    }

    #[cfg(test)]
    fn send_credit(&self) -> u32 {
        self.lock().send_credit
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.lock().buffer.len()
    }
}

/// Closes the stream once every clone of the application handle is gone.
struct HandleGuard {
    shared: Arc<StreamShared>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.shared.detach();
    }
}

/// Application handle to a multiplexed stream.
///
/// Cloning the handle yields another reference to the same stream, so one
/// task can read while another writes. The stream is closed when the last
/// clone is dropped.
///
/// `Stream` implements tokio's `AsyncRead` and `AsyncWrite`, so it can be
/// used wherever a byte-stream connection is expected.
#[derive(Clone)]
pub struct Stream {
    guard: Arc<HandleGuard>,
}

impl Stream {
    pub(crate) fn from_shared(shared: Arc<StreamShared>) -> Self {
        Self {
            guard: Arc::new(HandleGuard { shared }),
        }
    }

    #[inline]
    fn shared(&self) -> &Arc<StreamShared> {
        &self.guard.shared
    }

    /// Stream identifier, unique within the session.
    pub fn id(&self) -> u32 {
        self.shared().id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.shared().state()
    }

    /// Read into `buf`, waiting until data, end-of-stream, a deadline or an
    /// error.
    ///
    /// Returns `Ok(0)` at end-of-stream (the peer closed and every byte has
    /// been read).
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        poll_fn(|cx| self.shared().poll_read(cx, buf)).await
    }

    /// Write all of `buf`, waiting for credit as needed.
    ///
    /// Each DATA frame carries at most the credit available at the time it
    /// is sent. On error a prefix of `buf` may already have been sent; use
    /// [`Stream::write_counted`] when that count matters.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        let (written, result) = self.write_counted(buf).await;
        result.map(|()| written)
    }

    /// Like [`Stream::write`], but also reports how many bytes were queued
    /// for the peer before an error stopped the write.
    pub async fn write_counted(&self, buf: &[u8]) -> (usize, Result<()>) {
        let mut written = 0;
        while written < buf.len() {
            let remaining = &buf[written..];
            match poll_fn(|cx| self.shared().poll_write(cx, remaining)).await {
                Ok(n) => written += n,
                Err(e) => return (written, Err(e)),
            }
        }
        (written, Ok(()))
    }

    /// Half-close the stream: send FIN. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.shared().close()
    }

    /// Arm (or with `None`, disarm) the read deadline.
    ///
    /// Replaces any previous deadline. A deadline in the past makes pending
    /// and future reads fail with `ReadTimeout` until it is reset.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        self.shared().set_deadline(Direction::Read, deadline)
    }

    /// Arm (or with `None`, disarm) the write deadline.
    pub fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        self.shared().set_deadline(Direction::Write, deadline)
    }

    /// Arm both deadlines.
    pub fn set_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        self.set_read_deadline(deadline)?;
        self.set_write_deadline(deadline)
    }

    /// Local address of the underlying connection.
    pub fn local_addr(&self) -> Addr {
        self.shared().endpoints.local.clone()
    }

    /// Remote address of the underlying connection.
    pub fn remote_addr(&self) -> Addr {
        self.shared().endpoints.remote.clone()
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let dst = buf.initialize_unfilled();
        let n = ready!(self.shared().poll_read(cx, dst))?;
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.shared()
            .poll_write(cx, buf)
            .map_err(io::Error::from)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(self.shared().close().map_err(io::Error::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    const WINDOW: u32 = 64;

    fn endpoints() -> Arc<Endpoints> {
        Arc::new(Endpoints {
            local: Addr::Named("local".to_string()),
            remote: Addr::Named("remote".to_string()),
        })
    }

    /// An accepted stream with `credit` bytes to send, plus the frames it emits.
    fn accepted_stream(credit: u32) -> (Stream, mpsc::UnboundedReceiver<Frame>) {
        let (writer, frames) = WriterHandle::detached();
        let shared = StreamShared::new(1, StreamState::Accepted, credit, WINDOW, writer, endpoints());
        (Stream::from_shared(shared), frames)
    }

    async fn next_frame(frames: &mut mpsc::UnboundedReceiver<Frame>) -> Frame {
        tokio::time::timeout(Duration::from_secs(1), frames.recv())
            .await
            .expect("frame expected")
            .expect("writer open")
    }

    #[tokio::test]
    async fn test_first_ack_accepts_later_acks_add_credit() {
        let (writer, _frames) = WriterHandle::detached();
        let shared = StreamShared::new(3, StreamState::Created, 0, WINDOW, writer, endpoints());

        let waiter = {
            let shared = shared.clone();
            tokio::spawn(async move { poll_fn(|cx| shared.poll_accepted(cx)).await })
        };

        shared.handle_frame(Frame::ack(3, 10));
        waiter.await.unwrap().unwrap();
        assert_eq!(shared.state(), StreamState::Accepted);
        assert_eq!(shared.send_credit(), 10);

        shared.handle_frame(Frame::ack(3, 5));
        assert_eq!(shared.state(), StreamState::Accepted);
        assert_eq!(shared.send_credit(), 15);
    }

    #[tokio::test]
    async fn test_fin_before_accept_refuses_open() {
        let (writer, _frames) = WriterHandle::detached();
        let shared = StreamShared::new(5, StreamState::Created, 0, WINDOW, writer, endpoints());

        shared.handle_frame(Frame::fin(5));
        let result = poll_fn(|cx| shared.poll_accepted(cx)).await;
        assert!(matches!(result, Err(MuxError::StreamRefused(5))));
    }

    #[tokio::test]
    async fn test_read_drains_buffer_and_grants_credit() {
        let (stream, mut frames) = accepted_stream(0);
        stream.shared().handle_frame(Frame::data(1, Bytes::from_static(b"hello world")));

        let mut buf = [0u8; 5];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 5);
        assert_eq!(&buf, b"hello");

        let ack = next_frame(&mut frames).await;
        assert_eq!(ack.frame_type(), FrameType::Ack);
        assert_eq!(ack.credit().unwrap(), 5);

        let mut rest = [0u8; 16];
        let n = stream.read(&mut rest).await.unwrap();
        assert_eq!(&rest[..n], b" world");
        assert_eq!(next_frame(&mut frames).await.credit().unwrap(), 6);
    }

    #[tokio::test]
    async fn test_read_waits_for_data() {
        let (stream, _frames) = accepted_stream(0);

        let reader = {
            let stream = stream.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 8];
                let n = stream.read(&mut buf).await.unwrap();
                buf[..n].to_vec()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        stream.shared().handle_frame(Frame::data(1, Bytes::from_static(b"late")));
        assert_eq!(reader.await.unwrap(), b"late");
    }

    #[tokio::test]
    async fn test_remote_fin_wakes_reader_with_eof() {
        let (stream, _frames) = accepted_stream(0);

        let reader = {
            let stream = stream.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 8];
                stream.read(&mut buf).await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        stream.shared().handle_frame(Frame::fin(1));

        assert_eq!(reader.await.unwrap().unwrap(), 0);
        assert_eq!(stream.state(), StreamState::RemoteClosed);
    }

    #[tokio::test]
    async fn test_buffered_data_read_before_eof() {
        let (stream, _frames) = accepted_stream(0);
        stream.shared().handle_frame(Frame::data(1, Bytes::from_static(b"tail")));
        stream.shared().handle_frame(Frame::fin(1));

        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 4);
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_deadline_in_past() {
        let (stream, _frames) = accepted_stream(0);
        stream
            .set_read_deadline(Some(Instant::now() - Duration::from_millis(10)))
            .unwrap();

        let mut buf = [0u8; 4];
        assert!(matches!(stream.read(&mut buf).await, Err(MuxError::ReadTimeout)));
    }

    #[tokio::test]
    async fn test_read_deadline_fires_while_blocked() {
        let (stream, _frames) = accepted_stream(0);
        stream
            .set_read_deadline(Some(Instant::now() + Duration::from_millis(20)))
            .unwrap();

        let mut buf = [0u8; 4];
        let start = std::time::Instant::now();
        assert!(matches!(stream.read(&mut buf).await, Err(MuxError::ReadTimeout)));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[tokio::test]
    async fn test_resetting_deadline_clears_timeout() {
        let (stream, _frames) = accepted_stream(0);
        stream
            .set_read_deadline(Some(Instant::now() - Duration::from_millis(1)))
            .unwrap();
        stream.set_read_deadline(None).unwrap();

        stream.shared().handle_frame(Frame::data(1, Bytes::from_static(b"ok")));
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_replaced_deadline_timer_is_ignored() {
        let (stream, _frames) = accepted_stream(0);
        stream
            .set_read_deadline(Some(Instant::now() + Duration::from_millis(10)))
            .unwrap();
        stream
            .set_read_deadline(Some(Instant::now() + Duration::from_secs(60)))
            .unwrap();

        let mut buf = [0u8; 4];
        let result =
            tokio::time::timeout(Duration::from_millis(50), stream.read(&mut buf)).await;
        assert!(result.is_err(), "old timer must not fire");
    }

    #[tokio::test]
    async fn test_write_limited_by_credit() {
        let (stream, mut frames) = accepted_stream(4);

        let writer = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.write(b"0123456789").await })
        };

        let first = next_frame(&mut frames).await;
        assert_eq!(first.frame_type(), FrameType::Data);
        assert_eq!(first.payload(), b"0123");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());
        assert!(frames.try_recv().is_err());

        stream.shared().handle_frame(Frame::ack(1, 6));
        assert_eq!(writer.await.unwrap().unwrap(), 10);

        let second = next_frame(&mut frames).await;
        assert_eq!(second.payload(), b"456789");
        assert_eq!(stream.shared().send_credit(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_reports_bytes_already_sent() {
        let (stream, mut frames) = accepted_stream(4);

        let writer = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.write_counted(b"0123456789").await })
        };

        assert_eq!(next_frame(&mut frames).await.payload(), b"0123");
        stream.close().unwrap();

        let (written, result) = writer.await.unwrap();
        assert_eq!(written, 4);
        assert!(matches!(result, Err(MuxError::BrokenPipe)));
    }

    #[tokio::test]
    async fn test_write_deadline() {
        let (stream, _frames) = accepted_stream(0);
        stream
            .set_write_deadline(Some(Instant::now() + Duration::from_millis(10)))
            .unwrap();

        assert!(matches!(stream.write(b"x").await, Err(MuxError::WriteTimeout)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (stream, mut frames) = accepted_stream(8);

        stream.close().unwrap();
        stream.close().unwrap();
        assert_eq!(stream.state(), StreamState::Closed);

        assert_eq!(next_frame(&mut frames).await.frame_type(), FrameType::Fin);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_after_close_is_broken_pipe() {
        let (stream, _frames) = accepted_stream(8);
        stream.close().unwrap();
        assert!(matches!(stream.write(b"x").await, Err(MuxError::BrokenPipe)));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_writer() {
        let (stream, _frames) = accepted_stream(0);

        let writer = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.write(b"blocked").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        stream.close().unwrap();
        assert!(matches!(writer.await.unwrap(), Err(MuxError::BrokenPipe)));
    }

    #[tokio::test]
    async fn test_removable_only_when_dead_and_drained() {
        let (stream, _frames) = accepted_stream(8);
        let shared = stream.shared().clone();

        shared.handle_frame(Frame::data(1, Bytes::from_static(b"abc")));
        shared.handle_frame(Frame::fin(1));
        assert!(!shared.is_removable());

        stream.close().unwrap();
        assert_eq!(shared.state(), StreamState::Dead);
        assert!(!shared.is_removable(), "unread bytes keep the stream");

        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 3);
        assert!(shared.is_removable());
    }

    #[tokio::test]
    async fn test_local_close_then_remote_fin_is_dead() {
        let (stream, _frames) = accepted_stream(8);
        stream.close().unwrap();
        stream.shared().handle_frame(Frame::fin(1));
        assert_eq!(stream.state(), StreamState::Dead);
        assert!(stream.shared().is_removable());
    }

    #[tokio::test]
    async fn test_overflow_becomes_terminal_error() {
        let (stream, _frames) = accepted_stream(0);
        let oversized = Bytes::from(vec![0u8; WINDOW as usize + 1]);
        stream.shared().handle_frame(Frame::data(1, oversized));

        let mut buf = [0u8; 8];
        assert!(matches!(
            stream.read(&mut buf).await,
            Err(MuxError::NoCapacity { .. })
        ));
        assert!(matches!(
            stream.write(b"x").await,
            Err(MuxError::NoCapacity { .. })
        ));
    }

    #[tokio::test]
    async fn test_terminate_with_error_is_sticky() {
        let (stream, _frames) = accepted_stream(0);
        stream.shared().terminate(Some(MuxError::SessionClosed));
        stream.shared().terminate(Some(MuxError::BrokenPipe));

        let mut buf = [0u8; 8];
        assert!(matches!(stream.read(&mut buf).await, Err(MuxError::SessionClosed)));
        assert!(matches!(stream.read(&mut buf).await, Err(MuxError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_terminate_clean_keeps_buffered_data() {
        let (stream, _frames) = accepted_stream(8);
        stream.shared().handle_frame(Frame::data(1, Bytes::from_static(b"left")));
        stream.shared().terminate(None);

        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 4);
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
        assert!(matches!(stream.write(b"x").await, Err(MuxError::BrokenPipe)));
    }

    #[tokio::test]
    async fn test_drop_last_handle_sends_fin_and_discards() {
        let (stream, mut frames) = accepted_stream(8);
        let shared = stream.shared().clone();
        shared.handle_frame(Frame::data(1, Bytes::from_static(b"unread")));

        let clone = stream.clone();
        drop(stream);
        assert_eq!(shared.state(), StreamState::Accepted);

        drop(clone);
        assert_eq!(shared.state(), StreamState::Closed);
        assert_eq!(shared.buffered(), 0);
        assert_eq!(next_frame(&mut frames).await.frame_type(), FrameType::Fin);

        shared.handle_frame(Frame::data(1, Bytes::from_static(b"more")));
        assert_eq!(shared.buffered(), 0);
        shared.handle_frame(Frame::fin(1));
        assert!(shared.is_removable());
    }

    #[tokio::test]
    async fn test_async_read_write_traits() {
        let (mut stream, mut frames) = accepted_stream(16);

        stream.write_all(b"via trait").await.unwrap();
        assert_eq!(next_frame(&mut frames).await.payload(), b"via trait");

        stream.shared().handle_frame(Frame::data(1, Bytes::from_static(b"in")));
        stream.shared().handle_frame(Frame::fin(1));

        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"in");

        stream.shutdown().await.unwrap();
        assert_eq!(stream.state(), StreamState::Dead);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_io_error_kind() {
        let (mut stream, _frames) = accepted_stream(0);
        stream
            .set_read_deadline(Some(Instant::now() - Duration::from_millis(1)))
            .unwrap();

        let mut buf = [0u8; 4];
        let err = AsyncReadExt::read(&mut stream, &mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_addresses() {
        let (stream, _frames) = accepted_stream(0);
        assert_eq!(stream.local_addr().to_string(), "local");
        assert_eq!(stream.remote_addr().to_string(), "remote");
        assert_eq!(stream.id(), 1);
    }
}
