//! SessionCoordinator: drives one session from discovery to a ready link.
//!
//! # Flow
//!
//! ```text
//! DISCOVERING ─ search ─▶ ROLE_DECIDED ─┬─ host ─▶ HOSTING ─ listen ──┐
//!                                        └─ join ─▶ JOINING ─ connect ─┤
//!                                                                     ▼
//!                      READY ◀─ START_SIGNAL ─ HANDSHAKING (GREETING exchange)
//! ```
//!
//! The host's `establish` returns once the joining player's GREETING has
//! arrived; the game layer then calls [`SessionCoordinator::release_client`]
//! to send START_SIGNAL.  The client's `establish` returns only after that
//! signal arrives.
//!
//! Every wait is bounded.  A timeout, an exhausted connect retry or a bind
//! failure moves the session to `FAILED` and releases every socket acquired
//! so far, so a fresh coordinator can retry immediately.
//!
//! # Signals
//!
//! One pump task consumes [`ManagerEvent`]s.  Handshake envelopes update two
//! set-once `watch` values (remote name, started); game envelopes and
//! disconnects become [`InboundEvent`]s on an unbounded channel that the
//! game layer drains with [`SessionCoordinator::take_events`] or
//! [`SessionCoordinator::spawn_event_pump`].

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use parlor_core::{
    decide_role, Arbitration, Envelope, LocalIdentity, MessageKind, Role, RoleDecision,
    SessionState,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::game_channel::{GameChannel, GameEventHandler, InboundEvent};
use crate::infrastructure::network::discovery::DiscoveryStrategy;
use crate::infrastructure::network::{
    request_match, ConnectionManager, DiscoveryConfig, DiscoveryError, DiscoveryService,
    ManagerConfig, ManagerEvent, NetworkError, RendezvousError,
};

/// How long `shutdown` keeps trying to deliver PEER_LEFT.
const LEAVE_GRACE: Duration = Duration::from_secs(1);

/// Error type for session establishment.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("no {waiting_for} from the opponent within {after:?}")]
    HandshakeTimeout {
        waiting_for: &'static str,
        after: Duration,
    },

    #[error("could not reach the host after {attempts} attempts: {last}")]
    ConnectExhausted {
        attempts: u32,
        #[source]
        last: NetworkError,
    },

    #[error("opponent disconnected before the session started")]
    PeerGone,

    #[error("invalid session transition {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("rendezvous failed: {0}")]
    Rendezvous(#[from] RendezvousError),

    #[error("only the host can release the client")]
    NotHost,
}

/// Identity and timing for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub player_name: String,
    /// Port the host listens on.
    pub p2p_port: u16,
    pub search_window: Duration,
    pub arbitration: Arbitration,
    /// Bound on waiting for the opponent's GREETING.
    pub name_timeout: Duration,
    /// Bound on the client waiting for START_SIGNAL.
    pub start_timeout: Duration,
    /// How often a blocked wait logs that it is still waiting.
    pub progress_interval: Duration,
    /// Pause before the client's first connect so the host can bind.
    pub settle_delay: Duration,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
    /// Bound on waiting for a rendezvous pairing.
    pub rendezvous_wait: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            player_name: "player".to_string(),
            p2p_port: 5000,
            search_window: Duration::from_secs(5),
            arbitration: Arbitration::Timestamp,
            name_timeout: Duration::from_secs(30),
            start_timeout: Duration::from_secs(60),
            progress_interval: Duration::from_secs(5),
            settle_delay: Duration::from_secs(1),
            connect_attempts: 3,
            connect_backoff: Duration::from_secs(2),
            rendezvous_wait: Duration::from_secs(120),
        }
    }
}

/// Where establishment goes once the role is known.
enum Plan {
    Host { port: u16 },
    Join { addr: SocketAddr },
}

/// Set-once values written by the pump task, awaited by the coordinator.
struct HandshakeSignals {
    remote_name: watch::Sender<Option<String>>,
    started: watch::Sender<bool>,
}

pub struct SessionCoordinator {
    config: SessionConfig,
    identity: LocalIdentity,
    manager: Arc<ConnectionManager>,
    discovery: DiscoveryService,
    state: watch::Sender<SessionState>,
    role: OnceLock<Role>,
    signals: Arc<HandshakeSignals>,
    events: Mutex<Option<mpsc::UnboundedReceiver<InboundEvent>>>,
    pump: JoinHandle<()>,
}

impl SessionCoordinator {
    /// Creates a coordinator with its own connection manager and the
    /// discovery strategy chosen by `discovery.strategy`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: SessionConfig, discovery: DiscoveryConfig, network: ManagerConfig) -> Self {
        let identity = LocalIdentity::new(config.player_name.clone(), config.p2p_port);
        let discovery = DiscoveryService::new(identity.clone(), discovery);
        Self::build(config, identity, discovery, network)
    }

    /// Like [`new`](Self::new) but with a caller-supplied discovery strategy.
    pub fn with_strategy(
        config: SessionConfig,
        strategy: Box<dyn DiscoveryStrategy>,
        network: ManagerConfig,
    ) -> Self {
        let identity = LocalIdentity::new(config.player_name.clone(), config.p2p_port);
        Self::build(config, identity, DiscoveryService::with_strategy(strategy), network)
    }

    fn build(
        config: SessionConfig,
        identity: LocalIdentity,
        discovery: DiscoveryService,
        network: ManagerConfig,
    ) -> Self {
        // A session is exactly two players.
        let network = ManagerConfig {
            max_peers: Some(1),
            ..network
        };
        let (manager, manager_events) = ConnectionManager::new(identity.name.clone(), network);
        let signals = Arc::new(HandshakeSignals {
            remote_name: watch::channel(None).0,
            started: watch::channel(false).0,
        });
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_manager_events(
            manager_events,
            Arc::clone(&signals),
            inbound_tx,
        ));

        Self {
            config,
            identity,
            manager,
            discovery,
            state: watch::channel(SessionState::Discovering).0,
            role: OnceLock::new(),
            signals,
            events: Mutex::new(Some(inbound_rx)),
            pump,
        }
    }

    // ── Establishment ─────────────────────────────────────────────────────────

    /// Discovers an opponent on the LAN, arbitrates roles and runs the
    /// handshake for the resulting role.
    ///
    /// # Errors
    ///
    /// Any [`SessionError`]; the session is then `FAILED` with every socket
    /// released.
    pub async fn establish(&self) -> Result<Role, SessionError> {
        self.expect_state(SessionState::Discovering)?;
        info!(
            "{} searching for an opponent for {:?}",
            self.identity.name, self.config.search_window
        );

        let found = match self.discover().await {
            Ok(found) => found,
            Err(e) => {
                self.fail().await;
                return Err(e.into());
            }
        };
        let decision = decide_role(&self.identity, &found, self.config.arbitration);
        self.establish_with_decision(decision).await
    }

    /// Runs the handshake for an already-made role decision.
    ///
    /// A decision without a peer always hosts.
    ///
    /// # Errors
    ///
    /// See [`establish`](Self::establish).
    pub async fn establish_with_decision(
        &self,
        decision: RoleDecision,
    ) -> Result<Role, SessionError> {
        let plan = match (decision.role, decision.peer) {
            (Role::Client, Some(peer)) => {
                info!("joining {:?} at {}", peer.name, peer.p2p_addr());
                Plan::Join {
                    addr: peer.p2p_addr(),
                }
            }
            (_, peer) => {
                if let Some(peer) = peer {
                    info!("hosting; expecting {:?}", peer.name);
                } else {
                    info!("no opponent found; hosting");
                }
                Plan::Host {
                    port: self.config.p2p_port,
                }
            }
        };
        self.proceed(plan).await
    }

    /// Asks the rendezvous server at `server` for an opponent, then runs the
    /// handshake for the assigned role.
    ///
    /// # Errors
    ///
    /// See [`establish`](Self::establish).
    pub async fn establish_via_rendezvous(&self, server: SocketAddr) -> Result<Role, SessionError> {
        self.expect_state(SessionState::Discovering)?;

        let matched =
            match request_match(server, &self.identity.name, self.config.rendezvous_wait).await {
                Ok(m) => m,
                Err(e) => {
                    self.fail().await;
                    return Err(e.into());
                }
            };
        info!(
            "rendezvous paired us with {:?} as {}",
            matched.peer_name, matched.role
        );

        let plan = match matched.role {
            Role::Host => Plan::Host {
                port: matched.peer_port,
            },
            _ => Plan::Join {
                addr: SocketAddr::new(matched.peer_ip, matched.peer_port),
            },
        };
        self.proceed(plan).await
    }

    /// Host only: sends START_SIGNAL and marks the session ready.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotHost`] on a client, [`SessionError::PeerGone`] if
    /// the joining player already left (the session then fails), or
    /// [`SessionError::InvalidTransition`] if the handshake is not complete.
    pub async fn release_client(&self) -> Result<(), SessionError> {
        if self.role() != Role::Host {
            return Err(SessionError::NotHost);
        }
        self.expect_state(SessionState::Handshaking)?;

        let signal = Envelope::start_signal(self.identity.name.as_str());
        if self.manager.broadcast(&signal).await == 0 {
            self.fail().await;
            return Err(SessionError::PeerGone);
        }
        self.transition(SessionState::Ready)?;
        info!("session ready; client released");
        Ok(())
    }

    /// Announces PEER_LEFT to the opponent, then closes every socket.
    /// Idempotent.  An opponent that stopped reading gets no announcement.
    pub async fn shutdown(&self) {
        if !self.manager.active_connections().is_empty()
            && timeout(LEAVE_GRACE, self.game_channel().send_leave())
                .await
                .is_err()
        {
            warn!("opponent is not reading; closing without PEER_LEFT");
        }
        self.discovery.stop_responding().await;
        self.manager.shutdown().await;
        if !self.state().is_terminal() {
            let _ = self.transition(SessionState::Failed);
        }
    }

    // ── Handshake waits ───────────────────────────────────────────────────────

    /// Waits up to the configured name timeout for the opponent's GREETING.
    /// Returns `None` on timeout.
    pub async fn await_remote_name(&self) -> Option<String> {
        bounded_wait(
            self.signals.remote_name.subscribe(),
            self.config.name_timeout,
            self.config.progress_interval,
            "the opponent's name",
            |name: &Option<String>| name.clone(),
        )
        .await
    }

    /// Waits up to the configured start timeout for START_SIGNAL.
    pub async fn await_start_signal(&self) -> bool {
        bounded_wait(
            self.signals.started.subscribe(),
            self.config.start_timeout,
            self.config.progress_interval,
            "the host to start",
            |started: &bool| started.then_some(()),
        )
        .await
        .is_some()
    }

    // ── Observers ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// `Undecided` until arbitration (or the rendezvous server) decides.
    pub fn role(&self) -> Role {
        self.role.get().copied().unwrap_or(Role::Undecided)
    }

    pub fn remote_name(&self) -> Option<String> {
        self.signals.remote_name.borrow().clone()
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Address the host is listening on, once hosting.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.manager.listen_addr()
    }

    pub fn game_channel(&self) -> GameChannel {
        GameChannel::new(Arc::clone(&self.manager))
    }

    /// Hands out the inbound event stream.  Only the first call gets it.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<InboundEvent>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Drives `handler` from the inbound event stream on a background task.
    /// Returns `None` if the stream was already taken.
    pub fn spawn_event_pump(&self, handler: Arc<dyn GameEventHandler>) -> Option<JoinHandle<()>> {
        let mut events = self.take_events()?;
        Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                event.dispatch(handler.as_ref());
            }
        }))
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    async fn discover(&self) -> Result<Vec<parlor_core::DiscoveredPeer>, DiscoveryError> {
        self.discovery.respond().await?;
        let found = self.discovery.search(self.config.search_window).await?;
        info!("discovery found {} candidate(s)", found.len());
        Ok(found)
    }

    async fn proceed(&self, plan: Plan) -> Result<Role, SessionError> {
        self.transition(SessionState::RoleDecided)?;
        let role = match plan {
            Plan::Host { .. } => Role::Host,
            Plan::Join { .. } => Role::Client,
        };
        let _ = self.role.set(role);
        info!("{} is {role}", self.identity.name);

        let outcome = match plan {
            Plan::Host { port } => self.host(port).await,
            Plan::Join { addr } => self.join(addr.ip(), addr.port()).await,
        };
        if outcome.is_err() {
            self.fail().await;
        }
        outcome.map(|()| role)
    }

    async fn host(&self, port: u16) -> Result<(), SessionError> {
        self.transition(SessionState::Hosting)?;
        self.manager.start_listening(port).await?;
        self.transition(SessionState::Handshaking)?;

        let name = self
            .await_remote_name()
            .await
            .ok_or(SessionError::HandshakeTimeout {
                waiting_for: "GREETING",
                after: self.config.name_timeout,
            })?;
        // A late searcher could still find us until now.
        self.discovery.stop_responding().await;
        self.manager.stop_accepting().await;
        info!("{name:?} joined; waiting for the host to start the game");
        Ok(())
    }

    async fn join(&self, ip: IpAddr, port: u16) -> Result<(), SessionError> {
        self.transition(SessionState::Joining)?;
        self.discovery.stop_responding().await;
        sleep(self.config.settle_delay).await;
        self.connect_with_retry(ip, port).await?;

        self.transition(SessionState::Handshaking)?;
        let name = self
            .await_remote_name()
            .await
            .ok_or(SessionError::HandshakeTimeout {
                waiting_for: "GREETING",
                after: self.config.name_timeout,
            })?;
        info!("connected to host {name:?}; waiting for start");

        if !self.await_start_signal().await {
            return Err(SessionError::HandshakeTimeout {
                waiting_for: "START_SIGNAL",
                after: self.config.start_timeout,
            });
        }
        self.transition(SessionState::Ready)?;
        info!("session ready");
        Ok(())
    }

    async fn connect_with_retry(&self, ip: IpAddr, port: u16) -> Result<(), SessionError> {
        let attempts = self.config.connect_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.manager.connect(ip, port).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt >= attempts => {
                    return Err(SessionError::ConnectExhausted { attempts, last: e });
                }
                Err(e) => {
                    warn!("connect attempt {attempt}/{attempts} to {ip}:{port} failed: {e}");
                    sleep(self.config.connect_backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Releases everything and marks the session failed.
    async fn fail(&self) {
        self.discovery.stop_responding().await;
        self.manager.shutdown().await;
        if self.transition(SessionState::Failed).is_ok() {
            warn!("session establishment failed");
        }
    }

    fn expect_state(&self, expected: SessionState) -> Result<(), SessionError> {
        let current = self.state();
        if current == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                from: current,
                to: expected,
            })
        }
    }

    fn transition(&self, to: SessionState) -> Result<(), SessionError> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            if state.can_transition_to(to) {
                debug!("session {state} -> {to}");
                *state = to;
                true
            } else {
                result = Err(SessionError::InvalidTransition { from: *state, to });
                false
            }
        });
        result
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Waits until `pick` extracts a value from `rx`, logging progress every
/// `every`, for at most `limit`.
async fn bounded_wait<T, R>(
    mut rx: watch::Receiver<T>,
    limit: Duration,
    every: Duration,
    what: &str,
    pick: impl Fn(&T) -> Option<R>,
) -> Option<R> {
    let started = Instant::now();
    let deadline = started + limit;
    let mut progress = interval_at(started + every, every);
    progress.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let current = pick(&*rx.borrow_and_update());
        if current.is_some() {
            return current;
        }
        tokio::select! {
            _ = sleep_until(deadline) => {
                warn!("gave up waiting for {what} after {limit:?}");
                return None;
            }
            _ = progress.tick() => {
                info!("still waiting for {what} ({}s elapsed)", started.elapsed().as_secs());
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    return None;
                }
            }
        }
    }
}

/// Turns connection-manager events into handshake signals and game events.
async fn pump_manager_events(
    mut events: mpsc::UnboundedReceiver<ManagerEvent>,
    signals: Arc<HandshakeSignals>,
    inbound: mpsc::UnboundedSender<InboundEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ManagerEvent::PeerConnected { addr, direction, .. } => {
                debug!("{direction:?} peer link with {addr}");
            }
            ManagerEvent::Message { envelope, .. } => match envelope.kind() {
                MessageKind::Greeting => {
                    let sender = envelope.sender();
                    signals.remote_name.send_if_modified(|name| {
                        if name.is_some() {
                            return false;
                        }
                        *name = Some(sender.to_string());
                        true
                    });
                }
                MessageKind::StartSignal => {
                    signals.started.send_if_modified(|started| !std::mem::replace(started, true));
                }
                _ => {
                    if let Some(event) = InboundEvent::from_envelope(&envelope) {
                        let _ = inbound.send(event);
                    }
                }
            },
            ManagerEvent::PeerDisconnected { addr, remote_name, .. } => {
                info!("opponent {remote_name:?} at {addr} disconnected");
                let _ = inbound.send(InboundEvent::PeerDisconnected { remote_name });
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parlor_core::DiscoveredPeer;
    use std::net::Ipv4Addr;

    /// Discovery double that "finds" a fixed list.
    struct FixedPeers(Vec<DiscoveredPeer>);

    #[async_trait]
    impl DiscoveryStrategy for FixedPeers {
        async fn respond(&self) -> Result<(), DiscoveryError> {
            Ok(())
        }
        async fn search(&self, _window: Duration) -> Result<Vec<DiscoveredPeer>, DiscoveryError> {
            Ok(self.0.clone())
        }
        async fn stop_responding(&self) {}
    }

    fn loopback() -> ManagerConfig {
        ManagerConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            connect_timeout: Duration::from_millis(500),
            max_peers: None,
        }
    }

    fn quick(name: &str) -> SessionConfig {
        SessionConfig {
            player_name: name.to_string(),
            p2p_port: 0,
            search_window: Duration::from_millis(10),
            name_timeout: Duration::from_millis(300),
            start_timeout: Duration::from_millis(300),
            progress_interval: Duration::from_millis(100),
            settle_delay: Duration::from_millis(10),
            connect_attempts: 2,
            connect_backoff: Duration::from_millis(20),
            ..SessionConfig::default()
        }
    }

    fn coordinator(config: SessionConfig, found: Vec<DiscoveredPeer>) -> SessionCoordinator {
        SessionCoordinator::with_strategy(config, Box::new(FixedPeers(found)), loopback())
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_remote_name_times_out_at_bound() {
        // Arrange
        let config = SessionConfig {
            name_timeout: Duration::from_secs(30),
            ..quick("ana")
        };
        let session = coordinator(config, Vec::new());
        let started = Instant::now();

        // Act
        let name = session.await_remote_name().await;

        // Assert
        assert_eq!(name, None);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(30));
        assert!(waited < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_start_signal_times_out_at_bound() {
        let config = SessionConfig {
            start_timeout: Duration::from_secs(60),
            ..quick("bo")
        };
        let session = coordinator(config, Vec::new());
        let started = Instant::now();

        assert!(!session.await_start_signal().await);
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_lonely_host_fails_and_releases_listener() {
        // Arrange
        let session = coordinator(quick("ana"), Vec::new());

        // Act
        let result = session.establish().await;

        // Assert
        assert!(matches!(
            result,
            Err(SessionError::HandshakeTimeout { waiting_for: "GREETING", .. })
        ));
        assert_eq!(session.role(), Role::Host);
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.listen_addr().is_none());
    }

    #[tokio::test]
    async fn test_client_gives_up_after_bounded_attempts() {
        // Arrange: a peer that wins arbitration but is not listening.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let host = DiscoveredPeer {
            name: "bo".to_string(),
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            p2p_port: port,
            timestamp: 0,
        };
        let session = coordinator(quick("ana"), vec![host]);

        // Act
        let result = session.establish().await;

        // Assert
        assert!(matches!(
            result,
            Err(SessionError::ConnectExhausted { attempts: 2, .. })
        ));
        assert_eq!(session.role(), Role::Client);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_establish_twice_is_rejected() {
        let session = coordinator(quick("ana"), Vec::new());
        let _ = session.establish().await;

        let again = session.establish().await;

        assert!(matches!(
            again,
            Err(SessionError::InvalidTransition { from: SessionState::Failed, .. })
        ));
    }

    #[tokio::test]
    async fn test_release_client_requires_host_role() {
        let session = coordinator(quick("ana"), Vec::new());
        assert!(matches!(
            session.release_client().await,
            Err(SessionError::NotHost)
        ));
    }

    #[tokio::test]
    async fn test_state_changes_are_observable() {
        let session = coordinator(quick("ana"), Vec::new());
        let mut states = session.subscribe_state();
        assert_eq!(*states.borrow_and_update(), SessionState::Discovering);

        let _ = session.establish().await;

        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_shutdown_does_not_wait_for_an_opponent_that_stopped_reading() {
        use tokio::io::AsyncWriteExt;

        // Arrange: a raw opponent greets, then never reads.
        let session = coordinator(quick("ana"), Vec::new());
        let addr = session.manager().start_listening(0).await.unwrap();
        let mut opponent = tokio::net::TcpStream::connect(addr).await.unwrap();
        opponent.write_all(b"1:GREETING:bo:\n").await.unwrap();
        while session.manager().active_connections().is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
        let channel = session.game_channel();
        let big = "q".repeat(32 * 1024 * 1024);
        let flood = tokio::spawn(async move { channel.send_chat(&big).await });
        sleep(Duration::from_millis(200)).await;

        // Act
        let stopped = timeout(Duration::from_secs(5), session.shutdown()).await;

        // Assert
        assert!(stopped.is_ok(), "shutdown hung on a full socket");
        assert_eq!(flood.await.unwrap(), 0);
        assert!(session.manager().active_connections().is_empty());
        drop(opponent);
    }

    #[tokio::test]
    async fn test_event_stream_is_handed_out_once() {
        let session = coordinator(quick("ana"), Vec::new());
        assert!(session.take_events().is_some());
        assert!(session.take_events().is_none());
    }
}
