//! Error types for wsmux.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Main error type for all multiplexer operations.
///
/// The type is `Clone` so that a session-wide failure can be posted as the
/// terminal error of every live stream.
#[derive(Debug, Clone, Error)]
pub enum MuxError {
    /// A received frame could not be decoded. Fatal to the session.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The read deadline fired before data arrived.
    #[error("Read deadline exceeded")]
    ReadTimeout,

    /// The write deadline fired before credit was granted.
    #[error("Write deadline exceeded")]
    WriteTimeout,

    /// Write attempted on a stream that has been closed locally.
    #[error("Broken pipe")]
    BrokenPipe,

    /// The peer sent more data than the stream buffer can hold.
    #[error("Stream buffer capacity exceeded ({capacity} bytes)")]
    NoCapacity { capacity: usize },

    /// The peer did not acknowledge an open request in time.
    #[error("Stream accept timeout")]
    AcceptTimeout,

    /// The peer refused an open request.
    #[error("Stream {0} refused by remote")]
    StreamRefused(u32),

    /// The session has been closed locally.
    #[error("Session closed")]
    SessionClosed,

    /// I/O error on the underlying connection.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// Invalid session configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<io::Error> for MuxError {
    fn from(err: io::Error) -> Self {
        MuxError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for MuxError {
    fn from(err: serde_json::Error) -> Self {
        MuxError::Config(err.to_string())
    }
}

impl From<MuxError> for io::Error {
    fn from(err: MuxError) -> Self {
        let kind = match &err {
            MuxError::MalformedFrame(_) => io::ErrorKind::InvalidData,
            MuxError::ReadTimeout | MuxError::WriteTimeout | MuxError::AcceptTimeout => {
                io::ErrorKind::TimedOut
            }
            MuxError::BrokenPipe => io::ErrorKind::BrokenPipe,
            MuxError::NoCapacity { .. } => io::ErrorKind::OutOfMemory,
            MuxError::StreamRefused(_) => io::ErrorKind::ConnectionRefused,
            MuxError::SessionClosed => io::ErrorKind::NotConnected,
            MuxError::Io(inner) => inner.kind(),
            MuxError::Config(_) => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, err)
    }
}

/// Result type alias using MuxError.
pub type Result<T> = std::result::Result<T, MuxError>;
