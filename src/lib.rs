//! # wsmux
//!
//! Stream multiplexer for message-oriented connections.
//!
//! One ordered, reliable, message-bounded connection (a WebSocket, or any
//! byte stream wrapped in [`transport::FramedTransport`]) carries many
//! independent, bidirectional, flow-controlled byte streams.
//!
//! ## Architecture
//!
//! - **Session**: owns the connection, runs the read loop, routes frames to
//!   streams and handles open/accept
//! - **Stream**: per-stream buffer, credit and state machine; usable through
//!   `read`/`write` or tokio's `AsyncRead`/`AsyncWrite`
//! - **Writer task**: the single point where frames reach the connection
//!
//! ## Wire format
//!
//! Every frame is one transport message:
//! ```text
//! ┌────────────┬──────┬──────────────────────────┐
//! │ Stream ID  │ Type │ Payload                  │
//! │ 4 bytes LE │ 1 B  │ rest of the message      │
//! └────────────┴──────┴──────────────────────────┘
//! ```
//! Types: OPEN (4-byte window), DATA (bytes), ACK (4-byte credit), FIN (empty).
//!
//! ## Example
//!
//! ```ignore
//! use wsmux::transport::memory;
//! use wsmux::{Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> wsmux::Result<()> {
//!     let (a, b) = memory::pair();
//!     let client = Session::client(a, SessionConfig::default())?;
//!     let server = Session::server(b, SessionConfig::default())?;
//!
//!     let (outbound, inbound) = tokio::try_join!(client.open(), server.accept())?;
//!     outbound.write(b"hello").await?;
//!
//!     let mut buf = [0u8; 5];
//!     let n = inbound.read(&mut buf).await?;
//!     assert_eq!(&buf[..n], b"hello");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod net;
pub mod protocol;
pub mod transport;

mod buffer;
mod session;
mod stream;
mod writer;

pub use config::SessionConfig;
pub use error::{MuxError, Result};
pub use net::{Dialer, Listener};
pub use session::{Role, Session};
pub use stream::{Stream, StreamState};
pub use transport::Addr;
