//! One TCP link to one remote peer.
//!
//! A [`PeerConnection`] splits its stream: the read half is owned by a
//! dedicated receive task, the write half sits behind an async mutex so that
//! concurrent [`PeerConnection::send`] calls are serialised line by line.
//!
//! Inbound lines are decoded with the envelope codec and forwarded to the
//! owning [`ConnectionManager`](super::connection_manager::ConnectionManager)
//! as [`ConnectionEvent`]s.  A line that fails to decode is dropped with a
//! warning and the loop keeps reading.  So is a line longer than
//! [`MAX_LINE_BYTES`]; reading resumes after its terminating newline.
//!
//! [`PeerConnection::close`] never waits behind a stalled write: a send in
//! progress is abandoned as soon as the connection is closed.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use parlor_core::{decode_envelope, encode_envelope, Envelope, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Inbound lines longer than this (newline included) are discarded.
pub const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Identifies a connection for the lifetime of the process.
pub type ConnectionId = Uuid;

/// Which side opened the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted by our listener.
    Inbound,
    /// Opened by our `connect`.
    Outbound,
}

/// What a connection reports to its manager.
#[derive(Debug)]
pub enum ConnectionEvent {
    Received {
        conn: Arc<PeerConnection>,
        envelope: Envelope,
    },
    /// Emitted exactly once, when the connection closes for any reason.
    Closed { id: ConnectionId },
}

/// Errors from [`PeerConnection::send`].
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection to {0} is closed")]
    Closed(SocketAddr),

    #[error("cannot encode envelope: {0}")]
    Encode(#[from] ProtocolError),

    #[error("write to {addr} failed: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

pub struct PeerConnection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    direction: Direction,
    remote_name: RwLock<Option<String>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl PeerConnection {
    /// Takes ownership of `stream` and starts its receive loop.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the peer address of `stream` cannot be read
    /// (the socket is already dead).
    pub fn spawn(
        stream: TcpStream,
        direction: Direction,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> std::io::Result<Arc<Self>> {
        let remote_addr = stream.peer_addr()?;
        // Game messages are tiny; don't let Nagle hold them back.
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let conn = Arc::new(Self {
            id: Uuid::new_v4(),
            remote_addr,
            direction,
            remote_name: RwLock::new(None),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
            shutdown,
            events,
        });

        debug!("{:?} connection {} with {remote_addr}", direction, conn.id);
        tokio::spawn(Arc::clone(&conn).receive_loop(reader, shutdown_rx));
        Ok(conn)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Display name learned from the peer's GREETING, if one has arrived.
    pub fn remote_name(&self) -> Option<String> {
        self.remote_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records the remote display name.  Only the first call has effect;
    /// returns `true` if this call set it.
    pub fn set_remote_name(&self, name: &str) -> bool {
        let mut slot = self
            .remote_name
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        *slot = Some(name.to_string());
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Encodes and writes one envelope.
    ///
    /// A failed write closes the connection.  Closing the connection while
    /// the write is stalled (the peer stopped reading) abandons it.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the connection is closed, the envelope
    /// cannot be encoded, or the socket write fails.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed(self.remote_addr));
        }
        let line = encode_envelope(envelope)?;
        let cancel = self.shutdown.subscribe();

        let mut guard = tokio::select! {
            guard = self.writer.lock() => guard,
            _ = closed(cancel.clone()) => return Err(ConnectionError::Closed(self.remote_addr)),
        };
        let writer = guard
            .as_mut()
            .ok_or(ConnectionError::Closed(self.remote_addr))?;
        let written = tokio::select! {
            written = writer.write_all(line.as_bytes()) => written,
            _ = closed(cancel) => {
                debug!("abandoned a stalled write to {}", self.remote_addr);
                return Err(ConnectionError::Closed(self.remote_addr));
            }
        };
        if let Err(source) = written {
            drop(guard);
            self.close().await;
            return Err(ConnectionError::Io {
                addr: self.remote_addr,
                source,
            });
        }
        Ok(())
    }

    /// Closes the socket and stops the receive loop.  Idempotent; the
    /// manager is notified exactly once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        debug!("connection {} with {} closed", self.id, self.remote_addr);
        let _ = self.events.send(ConnectionEvent::Closed { id: self.id });
    }

    async fn receive_loop(
        self: Arc<Self>,
        reader: OwnedReadHalf,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        // Set while skipping the rest of an oversized line.
        let mut discarding = false;

        loop {
            buf.clear();
            let mut limited = (&mut reader).take(MAX_LINE_BYTES);
            let read = tokio::select! {
                _ = shutdown.changed() => break,
                read = limited.read_until(b'\n', &mut buf) => read,
            };

            match read {
                Ok(0) => {
                    debug!("{} closed the connection", self.remote_addr);
                    break;
                }
                Ok(n) if buf.last() != Some(&b'\n') && n as u64 == MAX_LINE_BYTES => {
                    if !discarding {
                        warn!(
                            "dropping line over {MAX_LINE_BYTES} bytes from {}",
                            self.remote_addr
                        );
                        discarding = true;
                    }
                }
                Ok(_) if discarding => discarding = false,
                Ok(_) => Self::handle_line(&self, &buf),
                Err(e) => {
                    if !self.is_closed() {
                        warn!("read error from {}: {e}", self.remote_addr);
                    }
                    break;
                }
            }
        }

        self.close().await;
    }

    fn handle_line(this: &Arc<Self>, raw: &[u8]) {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                warn!("dropping non-UTF-8 line from {}: {e}", this.remote_addr);
                return;
            }
        };

        match decode_envelope(line) {
            Ok(envelope) => {
                let _ = this.events.send(ConnectionEvent::Received {
                    conn: Arc::clone(this),
                    envelope,
                });
            }
            Err(ProtocolError::Empty) => {}
            Err(e) => warn!("dropping malformed line from {}: {e}", this.remote_addr),
        }
    }
}

/// Resolves once the connection's shutdown flag is raised (or its sender is
/// gone).
async fn closed(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("direction", &self.direction)
            .field("remote_name", &self.remote_name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
