//! Session: one transport connection carrying many streams.
//!
//! The session owns the transport. Its two halves are driven by two tasks:
//!
//! ```text
//!            ┌──────────── Session ─────────────┐
//! Transport ─┤ read loop ─► dispatch ─► Stream N│
//!  (reader)  │     │                            │
//!            │     └─► remote OPEN ─► accept queue
//!            │                                  │
//! Transport ◄┤ writer task ◄── WriterHandle ◄── every Stream
//!  (writer)  └──────────────────────────────────┘
//! ```
//!
//! The read loop is the only consumer of the transport reader and the only
//! task that creates streams for remote opens. The stream table maps ids to
//! streams; entries are removed once a stream is dead and drained.
//!
//! # Stream ids
//!
//! The dialing side ([`Session::client`]) allocates odd ids starting at 1,
//! the listening side ([`Session::server`]) even ids starting at 2.
//!
//! # Open handshake
//!
//! ```text
//! initiator                         acceptor
//!   OPEN(id, window) ───────────────►  stream created, accepted
//!                    ◄─────────────── ACK(id, window)
//!   accepted
//! ```
//!
//! A full accept backlog is answered with FIN instead of ACK.

use std::collections::HashMap;
use std::future::poll_fn;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SessionConfig;
use crate::error::{MuxError, Result};
use crate::protocol::{Frame, FrameType};
use crate::stream::{Endpoints, Stream, StreamShared, StreamState};
use crate::transport::{Addr, MessageRead, Transport};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Which end of the connection a session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Dialing side; allocates odd stream ids.
    Client,
    /// Listening side; allocates even stream ids.
    Server,
}

impl Role {
    /// First id this role allocates.
    pub fn first_id(self) -> u32 {
        match self {
            Role::Client => 1,
            Role::Server => 2,
        }
    }

    /// Whether `id` belongs to the id space of this role.
    pub fn owns(self, id: u32) -> bool {
        (id % 2 == 1) == (self == Role::Client)
    }
}

struct StreamTable {
    streams: HashMap<u32, Arc<StreamShared>>,
    next_id: u32,
    /// Set once by shutdown; no stream is inserted afterwards.
    closed: bool,
}

struct SessionShared {
    role: Role,
    config: SessionConfig,
    endpoints: Arc<Endpoints>,
    table: Mutex<StreamTable>,
    writer: WriterHandle,
    closed_tx: watch::Sender<bool>,
}

impl SessionShared {
    fn lock_table(&self) -> MutexGuard<'_, StreamTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn new_stream(&self, id: u32, state: StreamState, send_credit: u32) -> Arc<StreamShared> {
        StreamShared::new(
            id,
            state,
            send_credit,
            self.config.stream_window,
            self.writer.clone(),
            self.endpoints.clone(),
        )
    }

    /// Allocate a fresh local id and insert a `Created` stream for it.
    fn register_local(&self) -> Result<Arc<StreamShared>> {
        let mut table = self.lock_table();
        if table.closed {
            return Err(MuxError::SessionClosed);
        }

        loop {
            let id = table.next_id;
            table.next_id = id.wrapping_add(2);
            if id == 0 || table.streams.contains_key(&id) {
                continue;
            }

            let stream = self.new_stream(id, StreamState::Created, 0);
            table.streams.insert(id, stream.clone());
            return Ok(stream);
        }
    }

    fn remove(&self, id: u32) {
        if self.lock_table().streams.remove(&id).is_some() {
            tracing::debug!("Stream {} removed", id);
        }
    }

    /// Drop every dead, drained stream from the table.
    fn sweep(&self) {
        let mut table = self.lock_table();
        let before = table.streams.len();
        table.streams.retain(|_, stream| !stream.is_removable());
        let removed = before - table.streams.len();
        if removed > 0 {
            tracing::debug!("Swept {} removable streams", removed);
        }
    }

    /// Route one decoded frame.
    fn dispatch(&self, frame: Frame, accept_tx: &mpsc::Sender<Stream>) {
        let id = frame.stream_id();
        let frame_type = frame.frame_type();
        tracing::trace!("Received {:?} for stream {} ({} bytes)", frame_type, id, frame.payload_len());

        let stream = self.lock_table().streams.get(&id).cloned();

        match (frame_type, stream) {
            (FrameType::Open, Some(_)) => {
                tracing::warn!("Ignoring duplicate OPEN for stream {}", id);
            }
            (FrameType::Open, None) => self.accept_remote(frame, accept_tx),
            (_, Some(stream)) => {
                stream.handle_frame(frame);
                if stream.is_removable() {
                    self.remove(id);
                }
            }
            (_, None) => {
                tracing::debug!("Dropping {:?} for unknown stream {}", frame_type, id);
            }
        }
    }

    /// Create the local end of a remote-initiated stream and queue it for accept.
    fn accept_remote(&self, frame: Frame, accept_tx: &mpsc::Sender<Stream>) {
        let id = frame.stream_id();
        if id == 0 || self.role.owns(id) {
            tracing::warn!("Ignoring OPEN for stream {} from the local id space", id);
            return;
        }

        let credit = match frame.credit() {
            Ok(credit) => credit,
            Err(e) => {
                tracing::warn!("Ignoring OPEN for stream {}: {}", id, e);
                return;
            }
        };

        let stream = self.new_stream(id, StreamState::Accepted, credit);
        {
            let mut table = self.lock_table();
            if table.closed {
                return;
            }
            table.streams.insert(id, stream.clone());
        }

        // The ACK is queued before the handle is published, so nothing the
        // application writes or closes can reach the peer ahead of it.
        let refusal = match accept_tx.try_reserve() {
            Ok(permit) => {
                if let Err(e) = self.writer.send(&Frame::ack(id, self.config.stream_window)) {
                    tracing::debug!("Could not acknowledge stream {}: {}", id, e);
                }
                tracing::debug!("Accepted stream {} with {} bytes of credit", id, credit);
                permit.send(Stream::from_shared(stream));
                return;
            }
            Err(refusal) => refusal,
        };

        match refusal {
            TrySendError::Full(()) => tracing::warn!("Accept backlog full, refusing stream {}", id),
            TrySendError::Closed(()) => tracing::debug!("Accept queue closed, refusing stream {}", id),
        }
        self.remove(id);
        if let Err(e) = stream.close() {
            tracing::debug!("Could not refuse stream {}: {}", id, e);
        }
    }

    /// Close the session once: post `reason` to every stream and stop the writer.
    ///
    /// `None` means the peer ended the connection cleanly.
    fn shutdown(&self, reason: Option<MuxError>) {
        let streams = {
            let mut table = self.lock_table();
            if table.closed {
                return;
            }
            table.closed = true;
            std::mem::take(&mut table.streams)
        };

        match &reason {
            None => tracing::debug!("Session ended by peer, closing {} streams", streams.len()),
            Some(e) => tracing::debug!("Session shutting down ({}), closing {} streams", e, streams.len()),
        }

        for stream in streams.into_values() {
            stream.terminate(reason.clone());
        }

        self.writer.shutdown();
        self.closed_tx.send_replace(true);
    }
}

/// A multiplexed session over one transport connection.
///
/// Must be created inside a tokio runtime; it spawns its read loop and
/// writer task. Dropping the session closes it.
///
/// # Example
///
/// ```ignore
/// use wsmux::transport::memory;
/// use wsmux::{Session, SessionConfig};
///
/// let (a, b) = memory::pair();
/// let client = Session::client(a, SessionConfig::default())?;
/// let server = Session::server(b, SessionConfig::default())?;
///
/// let outbound = client.open().await?;
/// outbound.write(b"hello").await?;
///
/// let inbound = server.accept().await?;
/// let mut buf = [0u8; 5];
/// inbound.read(&mut buf).await?;
/// ```
pub struct Session {
    shared: Arc<SessionShared>,
    accept_rx: tokio::sync::Mutex<mpsc::Receiver<Stream>>,
}

impl Session {
    /// Start the dialing end of a session.
    pub fn client<T: Transport>(transport: T, config: SessionConfig) -> Result<Self> {
        Self::start(transport, config, Role::Client)
    }

    /// Start the listening end of a session.
    pub fn server<T: Transport>(transport: T, config: SessionConfig) -> Result<Self> {
        Self::start(transport, config, Role::Server)
    }

    fn start<T: Transport>(transport: T, config: SessionConfig, role: Role) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| MuxError::from(io::Error::new(io::ErrorKind::Other, e)))?;

        let endpoints = Arc::new(Endpoints {
            local: transport.local_addr(),
            remote: transport.remote_addr(),
        });
        let (reader, writer) = transport.split();

        let (writer, writer_task) = spawn_writer_task(writer);
        let (closed_tx, _) = watch::channel(false);
        let (accept_tx, accept_rx) = mpsc::channel(config.accept_backlog);

        let shared = Arc::new(SessionShared {
            role,
            table: Mutex::new(StreamTable {
                streams: HashMap::new(),
                next_id: role.first_id(),
                closed: false,
            }),
            config,
            endpoints,
            writer,
            closed_tx,
        });

        runtime.spawn(read_loop(shared.clone(), reader, accept_tx));
        runtime.spawn(watch_writer(Arc::downgrade(&shared), writer_task));

        tracing::debug!(
            "Session started as {:?} ({} -> {})",
            role,
            shared.endpoints.local,
            shared.endpoints.remote
        );

        Ok(Self {
            shared,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
        })
    }

    /// Open a new stream and wait for the peer to accept it.
    ///
    /// Fails with `StreamRefused` if the peer's accept backlog is full,
    /// `AcceptTimeout` after `open_timeout`, or the session's terminal error
    /// if the session ends while waiting.
    pub async fn open(&self) -> Result<Stream> {
        let stream = self.shared.register_local()?;
        let id = stream.id();
        let handle = Stream::from_shared(stream.clone());

        tracing::debug!("Opening stream {}", id);
        if let Err(e) = self
            .shared
            .writer
            .send(&Frame::open(id, self.shared.config.stream_window))
        {
            self.shared.remove(id);
            return Err(e);
        }

        let accepted = poll_fn(|cx| stream.poll_accepted(cx));
        match tokio::time::timeout(self.shared.config.open_timeout, accepted).await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => {
                tracing::debug!("Open of stream {} failed: {}", id, e);
                self.shared.remove(id);
                Err(e)
            }
            Err(_) => {
                tracing::warn!("Open of stream {} timed out", id);
                self.shared.remove(id);
                // Dropping the handle sends FIN.
                drop(handle);
                Err(MuxError::AcceptTimeout)
            }
        }
    }

    /// Wait for the next remote-initiated stream.
    ///
    /// Streams queued before the session closed are still handed out; after
    /// that this fails with `SessionClosed`.
    pub async fn accept(&self) -> Result<Stream> {
        let mut accept_rx = self.accept_rx.lock().await;
        accept_rx.recv().await.ok_or(MuxError::SessionClosed)
    }

    /// Close the session and every stream on it.
    ///
    /// Frames already queued are flushed before the transport is closed.
    pub fn close(&self) {
        self.shared.shutdown(Some(MuxError::SessionClosed));
    }

    /// Whether the session has shut down.
    pub fn is_closed(&self) -> bool {
        *self.shared.closed_tx.borrow()
    }

    /// Wait until the session has shut down, for any reason.
    pub async fn closed(&self) {
        let mut closed_rx = self.shared.closed_tx.subscribe();
        let _ = closed_rx.wait_for(|closed| *closed).await;
    }

    /// Which end of the connection this session is.
    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Number of streams in the stream table.
    pub fn stream_count(&self) -> usize {
        self.shared.lock_table().streams.len()
    }

    /// Frames queued for the writer task but not yet written.
    pub fn pending_frames(&self) -> usize {
        self.shared.writer.pending_count()
    }

    /// Local address of the transport.
    pub fn local_addr(&self) -> Addr {
        self.shared.endpoints.local.clone()
    }

    /// Remote address of the transport.
    pub fn remote_addr(&self) -> Addr {
        self.shared.endpoints.remote.clone()
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.shared.role)
            .field("local", &self.shared.endpoints.local)
            .field("remote", &self.shared.endpoints.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Main read loop - receives messages, decodes frames and dispatches them.
async fn read_loop<R: MessageRead>(
    shared: Arc<SessionShared>,
    mut reader: R,
    accept_tx: mpsc::Sender<Stream>,
) {
    let mut closed_rx = shared.closed_tx.subscribe();
    let mut sweep = tokio::time::interval(shared.config.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            _ = closed_rx.wait_for(|closed| *closed) => {
                tracing::debug!("Read loop stopped by session close");
                return;
            }
            _ = sweep.tick() => shared.sweep(),
            message = reader.recv() => match message {
                Ok(Some(message)) => match Frame::decode(message) {
                    Ok(frame) => shared.dispatch(frame, &accept_tx),
                    Err(e) => {
                        tracing::error!("Closing session on malformed frame: {}", e);
                        break Some(e);
                    }
                },
                Ok(None) => {
                    tracing::debug!("Connection closed by peer");
                    break None;
                }
                Err(e) => {
                    tracing::error!("Transport read error: {}", e);
                    break Some(MuxError::from(e));
                }
            },
        }
    };

    shared.shutdown(reason);
}

/// Shut the session down if the writer task fails.
async fn watch_writer(session: Weak<SessionShared>, task: JoinHandle<Result<()>>) {
    let reason = match task.await {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(e) => MuxError::from(io::Error::new(io::ErrorKind::Other, e)),
    };

    tracing::error!("Writer task failed: {}", reason);
    if let Some(session) = session.upgrade() {
        session.shutdown(Some(reason));
    }
}
