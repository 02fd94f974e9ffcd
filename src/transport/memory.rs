//! In-memory message transport.
//!
//! Two connected ends backed by a pair of bounded tokio channels. Message
//! boundaries are preserved exactly, which makes it the reference transport
//! for tests and for multiplexing inside a single process.
//!
//! # Example
//!
//! ```ignore
//! use wsmux::transport::memory;
//! use wsmux::{Session, SessionConfig};
//!
//! let (a, b) = memory::pair();
//! let client = Session::client(a, SessionConfig::default())?;
//! let server = Session::server(b, SessionConfig::default())?;
//! ```

use std::future::Future;
use std::io;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{Addr, MessageRead, MessageWrite, Transport};
use crate::config::DEFAULT_TRANSPORT_CHANNEL_CAPACITY;

/// One end of an in-memory pipe.
#[derive(Debug)]
pub struct MemoryTransport {
    reader: MemoryReader,
    writer: MemoryWriter,
    local: Addr,
    remote: Addr,
}

/// Receiving half of a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryReader {
    rx: mpsc::Receiver<Bytes>,
}

/// Sending half of a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryWriter {
    /// `None` once closed.
    tx: Option<mpsc::Sender<Bytes>>,
}

/// Create a connected pair with the default channel capacity.
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    pair_with_capacity(DEFAULT_TRANSPORT_CHANNEL_CAPACITY)
}

/// Create a connected pair whose directions each buffer `capacity` messages.
pub fn pair_with_capacity(capacity: usize) -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);

    let a_addr = Addr::Named("memory-a".to_string());
    let b_addr = Addr::Named("memory-b".to_string());

    let a = MemoryTransport {
        reader: MemoryReader { rx: a_rx },
        writer: MemoryWriter { tx: Some(a_tx) },
        local: a_addr.clone(),
        remote: b_addr.clone(),
    };
    let b = MemoryTransport {
        reader: MemoryReader { rx: b_rx },
        writer: MemoryWriter { tx: Some(b_tx) },
        local: b_addr,
        remote: a_addr,
    };
    (a, b)
}

/// Create a connected pair sized from a session configuration.
pub fn pair_with_config(config: &crate::SessionConfig) -> (MemoryTransport, MemoryTransport) {
    pair_with_capacity(config.transport_channel_capacity)
}

impl Transport for MemoryTransport {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn local_addr(&self) -> Addr {
        self.local.clone()
    }

    fn remote_addr(&self) -> Addr {
        self.remote.clone()
    }

    fn split(self) -> (MemoryReader, MemoryWriter) {
        (self.reader, self.writer)
    }
}

impl MessageRead for MemoryReader {
    fn recv(&mut self) -> impl Future<Output = io::Result<Option<Bytes>>> + Send {
        async move { Ok(self.rx.recv().await) }
    }
}

impl MessageWrite for MemoryWriter {
    fn send(&mut self, message: Bytes) -> impl Future<Output = io::Result<()>> + Send {
        async move {
            let tx = self.tx.as_ref().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "memory transport closed")
            })?;
            tx.send(message).await.map_err(|_| {
                io::Error::new(io::ErrorKind::BrokenPipe, "memory transport peer dropped")
            })
        }
    }

    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        async move { Ok(()) }
    }

    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        async move {
            self.tx = None;
            Ok(())
        }
    }
}
