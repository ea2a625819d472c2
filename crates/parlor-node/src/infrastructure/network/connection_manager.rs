//! ConnectionManager: owns the session listener, the set of active peer
//! connections, and fan-out of outbound envelopes.
//!
//! Every [`PeerConnection`] reports to one internal dispatch task.  That task
//! removes closed connections from the active set, answers the first
//! GREETING on an accepted connection with our own, and republishes
//! everything as [`ManagerEvent`]s on the channel returned by
//! [`ConnectionManager::new`].
//!
//! The active set is keyed by connection id and unique by remote endpoint,
//! and holds at most [`ManagerConfig::max_peers`] connections.
//! [`ConnectionManager::active_connections`] and
//! [`ConnectionManager::broadcast`] operate on a snapshot, so a connection
//! closing mid-broadcast never disturbs delivery to the others.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use parlor_core::{Envelope, MessageKind};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::peer_connection::{
    ConnectionError, ConnectionEvent, ConnectionId, Direction, PeerConnection,
};

/// Error type for listen / connect operations.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("port {port} is already in use")]
    PortInUse { port: u16 },

    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("already listening on {0}")]
    AlreadyListening(SocketAddr),

    #[error("connection to {addr} refused")]
    ConnectionRefused { addr: SocketAddr },

    #[error("connection to {addr} timed out")]
    Timeout { addr: SocketAddr },

    #[error("host {addr} is unreachable")]
    HostUnreachable { addr: SocketAddr },

    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("handshake send to {addr} failed: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: ConnectionError,
    },
}

/// Tunables for the connection manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Address the session listener binds to.
    pub bind_address: IpAddr,
    /// Upper bound on a single outbound TCP connect.
    pub connect_timeout: Duration,
    /// Connections beyond this many are refused.  `None` is unlimited.
    pub max_peers: Option<usize>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            connect_timeout: Duration::from_secs(3),
            max_peers: None,
        }
    }
}

/// Events published to the application layer.
#[derive(Debug)]
pub enum ManagerEvent {
    PeerConnected {
        id: ConnectionId,
        addr: SocketAddr,
        direction: Direction,
    },
    Message {
        id: ConnectionId,
        envelope: Envelope,
    },
    /// A connection closed for a reason other than our own `shutdown()`.
    PeerDisconnected {
        id: ConnectionId,
        addr: SocketAddr,
        remote_name: Option<String>,
    },
}

/// Accept-loop bookkeeping, present while listening.
struct Listening {
    addr: SocketAddr,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct ConnectionManager {
    local_name: String,
    config: ManagerConfig,
    connections: RwLock<HashMap<ConnectionId, Arc<PeerConnection>>>,
    listening: Mutex<Option<Listening>>,
    active: AtomicBool,
    conn_events: mpsc::UnboundedSender<ConnectionEvent>,
    events: mpsc::UnboundedSender<ManagerEvent>,
}

impl ConnectionManager {
    /// Creates a manager and returns it together with its event receiver.
    ///
    /// Must be called from within a Tokio runtime: the dispatch task is
    /// spawned here and lives as long as the manager.
    pub fn new(
        local_name: impl Into<String>,
        config: ManagerConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ManagerEvent>) {
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mgr = Arc::new(Self {
            local_name: local_name.into(),
            config,
            connections: RwLock::new(HashMap::new()),
            listening: Mutex::new(None),
            active: AtomicBool::new(false),
            conn_events: conn_tx,
            events: event_tx.clone(),
        });

        tokio::spawn(dispatch_loop(Arc::downgrade(&mgr), conn_rx, event_tx));
        (mgr, event_rx)
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// `true` between the first successful listen/connect and `shutdown()`.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Address of the session listener, if listening.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|l| l.addr)
    }

    /// Binds the session listener and starts accepting peers.
    ///
    /// Port `0` picks an ephemeral port; the bound address is returned.
    ///
    /// # Errors
    ///
    /// - [`NetworkError::PortInUse`] if the port is taken.
    /// - [`NetworkError::AlreadyListening`] if this manager already listens.
    /// - [`NetworkError::BindFailed`] for any other bind error.
    pub async fn start_listening(self: &Arc<Self>, port: u16) -> Result<SocketAddr, NetworkError> {
        if let Some(addr) = self.listen_addr() {
            return Err(NetworkError::AlreadyListening(addr));
        }

        let addr = SocketAddr::new(self.config.bind_address, port);
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            if source.kind() == ErrorKind::AddrInUse {
                NetworkError::PortInUse { port }
            } else {
                NetworkError::BindFailed { addr, source }
            }
        })?;
        let bound = listener
            .local_addr()
            .map_err(|source| NetworkError::BindFailed { addr, source })?;

        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, Arc::downgrade(self), stop_rx));

        let mut slot = self.listening.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.as_ref() {
            // Lost a race with a concurrent start_listening.
            let _ = stop.send(true);
            return Err(NetworkError::AlreadyListening(existing.addr));
        }
        *slot = Some(Listening {
            addr: bound,
            stop,
            task,
        });
        drop(slot);

        self.active.store(true, Ordering::Release);
        info!("listening for peers on {bound}");
        Ok(bound)
    }

    /// Opens a connection to `host:port`, sends our GREETING and adds the
    /// connection to the active set.
    ///
    /// No retries happen here; the caller owns the retry policy.
    ///
    /// # Errors
    ///
    /// [`NetworkError::ConnectionRefused`], [`NetworkError::Timeout`] and
    /// [`NetworkError::HostUnreachable`] are reported distinctly; anything
    /// else is [`NetworkError::ConnectFailed`].  A failure to send the
    /// GREETING is [`NetworkError::Send`].
    pub async fn connect(
        &self,
        host: IpAddr,
        port: u16,
    ) -> Result<Arc<PeerConnection>, NetworkError> {
        let addr = SocketAddr::new(host, port);
        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
            Err(_) => return Err(NetworkError::Timeout { addr }),
            Ok(Err(source)) => return Err(classify_connect_error(addr, source)),
            Ok(Ok(stream)) => stream,
        };

        let conn = PeerConnection::spawn(stream, Direction::Outbound, self.conn_events.clone())
            .map_err(|source| NetworkError::ConnectFailed { addr, source })?;

        conn.send(&Envelope::greeting(self.local_name.as_str()))
            .await
            .map_err(|source| NetworkError::Send { addr, source })?;

        if self.insert(&conn) {
            self.active.store(true, Ordering::Release);
            info!("connected to peer at {addr}");
            Ok(conn)
        } else {
            conn.close().await;
            Err(NetworkError::ConnectFailed {
                addr,
                source: std::io::Error::new(
                    ErrorKind::ConnectionAborted,
                    "connection closed during handshake",
                ),
            })
        }
    }

    /// Sends `envelope` to every connection in the current snapshot.
    ///
    /// Individual failures are logged and skipped.  Returns the number of
    /// connections the envelope was written to.
    pub async fn broadcast(&self, envelope: &Envelope) -> usize {
        let mut delivered = 0;
        for conn in self.active_connections() {
            match conn.send(envelope).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("broadcast of {} skipped {}: {e}", envelope.kind(), conn.remote_addr()),
            }
        }
        delivered
    }

    /// Snapshot of the currently open connections.  An empty result means
    /// the opponent is gone.
    pub fn active_connections(&self) -> Vec<Arc<PeerConnection>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|c| !c.is_closed())
            .cloned()
            .collect()
    }

    /// Stops the accept loop and releases the listening port.  Open
    /// connections stay up.  Idempotent.
    pub async fn stop_accepting(&self) {
        let listening = self
            .listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listening) = listening {
            let _ = listening.stop.send(true);
            // Wait for the listener to drop so the port is free on return.
            let _ = listening.task.await;
            debug!("stopped accepting on {}", listening.addr);
        }
    }

    /// Stops accepting, releases the listening port and closes every
    /// connection.  Idempotent.
    ///
    /// Connections closed here do not produce
    /// [`ManagerEvent::PeerDisconnected`].
    pub async fn shutdown(&self) {
        let was_active = self.active.swap(false, Ordering::AcqRel);

        self.stop_accepting().await;

        let drained: Vec<_> = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, conn)| conn)
            .collect();
        for conn in drained {
            conn.close().await;
        }

        if was_active {
            info!("connection manager shut down");
        }
    }

    /// Adds `conn` unless it already closed, its endpoint is taken or the
    /// peer limit is reached.
    fn insert(&self, conn: &Arc<PeerConnection>) -> bool {
        let mut map = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if conn.is_closed() {
            return false;
        }
        if let Some(max) = self.config.max_peers {
            let open = map.values().filter(|c| !c.is_closed()).count();
            if open >= max {
                warn!("already have {open} peer(s); refusing {}", conn.remote_addr());
                return false;
            }
        }
        if map.values().any(|c| c.remote_addr() == conn.remote_addr()) {
            warn!("duplicate connection from {}; dropping", conn.remote_addr());
            return false;
        }
        map.insert(conn.id(), Arc::clone(conn));
        let _ = self.events.send(ManagerEvent::PeerConnected {
            id: conn.id(),
            addr: conn.remote_addr(),
            direction: conn.direction(),
        });
        true
    }

    fn remove(&self, id: ConnectionId) -> Option<Arc<PeerConnection>> {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }
}

fn classify_connect_error(addr: SocketAddr, source: std::io::Error) -> NetworkError {
    match source.kind() {
        ErrorKind::ConnectionRefused => NetworkError::ConnectionRefused { addr },
        ErrorKind::TimedOut => NetworkError::Timeout { addr },
        ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => {
            NetworkError::HostUnreachable { addr }
        }
        _ => NetworkError::ConnectFailed { addr, source },
    }
}

// ── Background tasks ──────────────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    manager: Weak<ConnectionManager>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => accepted,
        };

        let Some(mgr) = manager.upgrade() else { break };
        match accepted {
            Ok((stream, addr)) => {
                match PeerConnection::spawn(stream, Direction::Inbound, mgr.conn_events.clone()) {
                    Ok(conn) => {
                        if mgr.insert(&conn) {
                            info!("accepted peer connection from {addr}");
                        } else {
                            conn.close().await;
                        }
                    }
                    Err(e) => debug!("dropping connection from {addr}: {e}"),
                }
            }
            Err(e) => {
                // Transient (e.g. out of file descriptors); back off briefly.
                warn!("accept error: {e}");
                sleep(Duration::from_millis(100)).await;
            }
        }
    }
    debug!("accept loop stopped");
}

async fn dispatch_loop(
    manager: Weak<ConnectionManager>,
    mut conn_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    events: mpsc::UnboundedSender<ManagerEvent>,
) {
    while let Some(event) = conn_events.recv().await {
        let Some(mgr) = manager.upgrade() else { break };

        match event {
            ConnectionEvent::Received { conn, envelope } => {
                if *envelope.kind() == MessageKind::Greeting {
                    handle_greeting(&mgr, &conn, &envelope);
                }
                let _ = events.send(ManagerEvent::Message {
                    id: conn.id(),
                    envelope,
                });
            }
            ConnectionEvent::Closed { id } => {
                if let Some(conn) = mgr.remove(id) {
                    info!("peer {} disconnected", conn.remote_addr());
                    let _ = events.send(ManagerEvent::PeerDisconnected {
                        id,
                        addr: conn.remote_addr(),
                        remote_name: conn.remote_name(),
                    });
                }
            }
        }
    }
}

/// Records the remote name and, on an inbound connection, greets back once.
fn handle_greeting(mgr: &ConnectionManager, conn: &Arc<PeerConnection>, envelope: &Envelope) {
    if !conn.set_remote_name(envelope.sender()) {
        return;
    }
    debug!("{} identified as {:?}", conn.remote_addr(), envelope.sender());

    if conn.direction() == Direction::Inbound {
        let reply = Envelope::greeting(mgr.local_name());
        let conn = Arc::clone(conn);
        tokio::spawn(async move {
            if let Err(e) = conn.send(&reply).await {
                warn!("greeting reply to {} failed: {e}", conn.remote_addr());
            }
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
