//! Length-prefixed message transport over a byte stream.
//!
//! Restores message boundaries on top of any `AsyncRead + AsyncWrite`
//! (TCP, Unix sockets, `tokio::io::duplex`) so a session can ride on a plain
//! byte stream:
//! ```text
//! ┌───────────┬─────────────────────┐
//! │ Length    │ Message             │
//! │ 4 bytes   │ `Length` bytes      │
//! │ uint32 LE │                     │
//! └───────────┴─────────────────────┘
//! ```
//!
//! Message boundaries come from tokio-util's `LengthDelimitedCodec`
//! configured for a 4-byte little-endian length field.

use std::future::Future;
use std::io;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use super::{Addr, MessageRead, MessageWrite, Transport};
use crate::config::DEFAULT_MAX_MESSAGE_SIZE;

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Build the codec shared by both halves.
fn length_codec(max_message_size: u32) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_PREFIX_SIZE)
        .little_endian()
        .max_frame_length(max_message_size as usize)
        .new_codec()
}

/// A byte stream carrying length-prefixed messages.
pub struct FramedTransport<T> {
    io: T,
    local: Addr,
    remote: Addr,
    max_message_size: u32,
}

impl<T> FramedTransport<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap a byte stream with explicit endpoint addresses.
    pub fn new(io: T, local: Addr, remote: Addr) -> Self {
        Self {
            io,
            local,
            remote,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Set the largest message the reader accepts.
    pub fn with_max_message_size(mut self, size: u32) -> Self {
        self.max_message_size = size;
        self
    }
}

impl FramedTransport<TcpStream> {
    /// Wrap a connected TCP stream, taking addresses from the socket.
    pub fn from_tcp(stream: TcpStream) -> io::Result<Self> {
        let local = stream.local_addr()?.into();
        let remote = stream.peer_addr()?.into();
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, local, remote))
    }
}

impl<T> Transport for FramedTransport<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    type Reader = FramedReader<ReadHalf<T>>;
    type Writer = FramedWriter<WriteHalf<T>>;

    fn local_addr(&self) -> Addr {
        self.local.clone()
    }

    fn remote_addr(&self) -> Addr {
        self.remote.clone()
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (read_half, write_half) = tokio::io::split(self.io);
        (
            FramedReader::with_max_message_size(read_half, self.max_message_size),
            FramedWriter::new(write_half),
        )
    }
}

/// Receiving half: reassembles length-prefixed messages.
pub struct FramedReader<R> {
    inner: FramedRead<R, LengthDelimitedCodec>,
}

impl<R> FramedReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Create a reader with the default maximum message size.
    pub fn new(reader: R) -> Self {
        Self::with_max_message_size(reader, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a reader with a custom maximum message size.
    ///
    /// A declared length above the maximum fails the read with
    /// `InvalidData`.
    pub fn with_max_message_size(reader: R, max_message_size: u32) -> Self {
        Self {
            inner: FramedRead::new(reader, length_codec(max_message_size)),
        }
    }

    /// Get the number of buffered, not yet delivered bytes.
    pub fn buffered(&self) -> usize {
        self.inner.read_buffer().len()
    }
}

impl<R> MessageRead for FramedReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    fn recv(&mut self) -> impl Future<Output = io::Result<Option<Bytes>>> + Send {
        async move {
            // `FramedRead` keeps partial input in its own buffer, so `next` is cancel safe.
            match self.inner.next().await {
                Some(Ok(message)) => Ok(Some(message.freeze())),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        }
    }
}

/// Sending half: writes length-prefixed messages.
pub struct FramedWriter<W> {
    inner: FramedWrite<W, LengthDelimitedCodec>,
}

impl<W> FramedWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Create a new writer.
    ///
    /// Any message whose length fits the prefix is accepted; the size limit
    /// is enforced by the receiving side.
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, length_codec(u32::MAX)),
        }
    }
}

impl<W> MessageWrite for FramedWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn send(&mut self, message: Bytes) -> impl Future<Output = io::Result<()>> + Send {
        async move { self.inner.feed(message).await }
    }

    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        async move { SinkExt::<Bytes>::flush(&mut self.inner).await }
    }

    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        async move { SinkExt::<Bytes>::close(&mut self.inner).await }
    }
}
