//! Listener and dialer facades.
//!
//! Lets code written against "something that accepts connections" or
//! "something that dials connections" run on top of a session, treating
//! every multiplexed [`Stream`] as an ordinary connection.
//!
//! ```ignore
//! use wsmux::net::Listener;
//!
//! async fn serve(listener: &impl Listener) -> wsmux::Result<()> {
//!     loop {
//!         let stream = listener.accept().await?;
//!         tokio::spawn(handle(stream));
//!     }
//! }
//! ```

use std::future::Future;

use crate::error::Result;
use crate::session::Session;
use crate::stream::Stream;
use crate::transport::Addr;

/// A source of inbound connections.
pub trait Listener: Send + Sync {
    /// Wait for the next inbound connection.
    fn accept(&self) -> impl Future<Output = Result<Stream>> + Send;

    /// Stop accepting; pending and future `accept` calls fail.
    fn close(&self);

    /// Address connections are accepted on.
    fn local_addr(&self) -> Addr;
}

/// A way to establish outbound connections.
pub trait Dialer: Send + Sync {
    /// Establish a new connection.
    fn dial(&self) -> impl Future<Output = Result<Stream>> + Send;

    /// Address connections are dialed to.
    fn remote_addr(&self) -> Addr;
}

impl Listener for Session {
    fn accept(&self) -> impl Future<Output = Result<Stream>> + Send {
        Session::accept(self)
    }

    fn close(&self) {
        Session::close(self)
    }

    fn local_addr(&self) -> Addr {
        Session::local_addr(self)
    }
}

impl Dialer for Session {
    fn dial(&self) -> impl Future<Output = Result<Stream>> + Send {
        self.open()
    }

    fn remote_addr(&self) -> Addr {
        Session::remote_addr(self)
    }
}
