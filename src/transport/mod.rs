//! Transport module - the message-oriented connection a session rides on.
//!
//! The multiplexer needs an ordered, reliable connection that preserves
//! message boundaries (a WebSocket, for example). It is expressed as a pair
//! of halves:
//! - [`MessageRead`]: receives whole messages
//! - [`MessageWrite`]: sends whole messages
//!
//! Provided implementations:
//! - [`memory`]: in-process pipe built on tokio channels
//! - [`framed`]: 4-byte length prefix over any `AsyncRead + AsyncWrite`

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;

use bytes::Bytes;

pub mod framed;
pub mod memory;

pub use framed::{FramedReader, FramedTransport, FramedWriter};
pub use memory::{MemoryReader, MemoryTransport, MemoryWriter};

/// Receiving half of a message transport.
pub trait MessageRead: Send + 'static {
    /// Receive the next message.
    ///
    /// Returns `Ok(None)` once the peer has closed the connection cleanly.
    /// Must be cancel safe: dropping the future before it completes must not
    /// lose a message.
    fn recv(&mut self) -> impl Future<Output = io::Result<Option<Bytes>>> + Send;
}

/// Sending half of a message transport.
pub trait MessageWrite: Send + 'static {
    /// Send one message.
    fn send(&mut self, message: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    /// Flush messages buffered by the transport.
    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Close the sending direction; the peer observes end-of-connection.
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// A connection that can be split into message halves.
pub trait Transport: Send + 'static {
    /// Receiving half.
    type Reader: MessageRead;
    /// Sending half.
    type Writer: MessageWrite;

    /// Address of the local end.
    fn local_addr(&self) -> Addr;

    /// Address of the remote end.
    fn remote_addr(&self) -> Addr;

    /// Split into read and write halves.
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Address of one end of a transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Addr {
    /// Network socket address.
    Socket(SocketAddr),
    /// Named endpoint without a socket address (in-memory pipes, tunnels).
    Named(String),
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Socket(addr) => write!(f, "{}", addr),
            Addr::Named(name) => write!(f, "{}", name),
        }
    }
}

impl From<SocketAddr> for Addr {
    fn from(addr: SocketAddr) -> Self {
        Addr::Socket(addr)
    }
}
