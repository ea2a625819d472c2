//! UDP broadcast discovery.
//!
//! Every node binds the first free port of a small well-known range
//! (`broadcast_port_base ..+ broadcast_port_count`) so that several nodes can
//! share one machine.  Searching sends `SEARCH` datagrams to every port of
//! the range on the limited broadcast address, each interface's directed
//! broadcast, and loopback.  Responders reply with `AVAILABLE` straight to
//! the searcher's port.
//!
//! A SEARCH carries the searcher's own advertisement, so a responder learns
//! about the searcher too.  When both sides search at once they end up with
//! each other in their peer lists and arbitrate the same pair.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parlor_core::protocol::Advertisement;
use parlor_core::{DiscoveredPeer, DiscoveryMessage, LocalIdentity};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

use super::{DiscoveryConfig, DiscoveryError, DiscoveryStrategy, SharedPeers};
use crate::infrastructure::network::interfaces::local_ipv4_interfaces;

const MAX_DATAGRAM: usize = 1024;

struct Responder {
    socket: Arc<UdpSocket>,
    port: u16,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct BroadcastDiscovery {
    identity: LocalIdentity,
    config: DiscoveryConfig,
    peers: SharedPeers,
    responder: tokio::sync::Mutex<Option<Responder>>,
}

impl BroadcastDiscovery {
    pub fn new(identity: LocalIdentity, config: DiscoveryConfig) -> Self {
        Self {
            peers: SharedPeers::new(&identity.name),
            identity,
            config,
            responder: tokio::sync::Mutex::new(None),
        }
    }

    /// UDP port the responder is bound to, once responding.
    pub async fn bound_port(&self) -> Option<u16> {
        self.responder.lock().await.as_ref().map(|r| r.port)
    }

    fn port_range(&self) -> std::ops::Range<u16> {
        let first = self.config.broadcast_port_base;
        first..first.saturating_add(self.config.broadcast_port_count)
    }

    async fn bind_first_free(&self) -> Result<(UdpSocket, u16), DiscoveryError> {
        let range = self.port_range();
        for port in range.clone() {
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
            match UdpSocket::bind(addr).await {
                Ok(socket) => {
                    socket
                        .set_broadcast(true)
                        .map_err(|source| DiscoveryError::BindFailed { addr, source })?;
                    return Ok((socket, port));
                }
                Err(e) => trace!("discovery port {port} unavailable: {e}"),
            }
        }
        Err(DiscoveryError::NoFreePort {
            first: range.start,
            last: range.end.saturating_sub(1),
        })
    }

    /// Broadcast, directed-broadcast and loopback targets for every port of
    /// the range.
    fn targets(&self) -> Vec<SocketAddr> {
        let mut hosts = vec![Ipv4Addr::BROADCAST, Ipv4Addr::LOCALHOST];
        for iface in local_ipv4_interfaces() {
            let directed = iface.broadcast_addr();
            if !hosts.contains(&directed) {
                hosts.push(directed);
            }
        }

        let mut targets = Vec::with_capacity(hosts.len() * self.port_range().len());
        for host in hosts {
            targets.extend(self.port_range().map(|port| SocketAddr::from((host, port))));
        }
        targets
    }
}

#[async_trait]
impl DiscoveryStrategy for BroadcastDiscovery {
    async fn respond(&self) -> Result<(), DiscoveryError> {
        let mut slot = self.responder.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let (socket, port) = self.bind_first_free().await?;
        let socket = Arc::new(socket);
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(listen_loop(
            Arc::clone(&socket),
            self.identity.clone(),
            self.peers.clone(),
            stop_rx,
        ));
        *slot = Some(Responder {
            socket,
            port,
            stop,
            task,
        });
        info!("discovery responder listening on UDP {port}");
        Ok(())
    }

    async fn search(&self, window: Duration) -> Result<Vec<DiscoveredPeer>, DiscoveryError> {
        self.respond().await?;
        self.peers.clear();

        let (socket, port) = {
            let slot = self.responder.lock().await;
            match slot.as_ref() {
                Some(r) => (Arc::clone(&r.socket), r.port),
                None => return Ok(Vec::new()),
            }
        };

        let search = DiscoveryMessage::Search {
            name: self.identity.name.clone(),
            listen_port: port,
            advert: Some(Advertisement {
                p2p_port: self.identity.p2p_port,
                timestamp: self.identity.timestamp,
            }),
        }
        .encode();
        let targets = self.targets();
        debug!("searching for {window:?} across {} targets", targets.len());

        let deadline = Instant::now() + window;
        let mut rounds = interval(self.config.search_interval);
        rounds.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                _ = rounds.tick() => {
                    for target in &targets {
                        if let Err(e) = socket.send_to(search.as_bytes(), target).await {
                            trace!("SEARCH to {target} failed: {e}");
                        }
                    }
                }
            }
        }

        Ok(self.peers.snapshot())
    }

    async fn stop_responding(&self) {
        if let Some(responder) = self.responder.lock().await.take() {
            let _ = responder.stop.send(true);
            let _ = responder.task.await;
            debug!("discovery responder on UDP {} stopped", responder.port);
        }
    }
}

async fn listen_loop(
    socket: Arc<UdpSocket>,
    identity: LocalIdentity,
    peers: SharedPeers,
    mut stop: watch::Receiver<bool>,
) {
    let available = DiscoveryMessage::Available {
        name: identity.name.clone(),
        p2p_port: identity.p2p_port,
        timestamp: Some(identity.timestamp),
    }
    .encode();
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        let received = tokio::select! {
            _ = stop.changed() => break,
            received = socket.recv_from(&mut buf) => received,
        };
        let (len, from) = match received {
            Ok(r) => r,
            Err(e) => {
                trace!("discovery recv error: {e}");
                continue;
            }
        };
        let Ok(text) = std::str::from_utf8(&buf[..len]) else {
            trace!("non-UTF-8 datagram from {from}");
            continue;
        };
        let message = match DiscoveryMessage::decode(text) {
            Ok(m) => m,
            Err(e) => {
                trace!("ignoring datagram from {from}: {e}");
                continue;
            }
        };
        if message.name() == identity.name {
            continue;
        }

        match message {
            DiscoveryMessage::Search {
                name,
                listen_port,
                advert,
            } => {
                let reply_to = SocketAddr::new(from.ip(), listen_port);
                if let Err(e) = socket.send_to(available.as_bytes(), reply_to).await {
                    trace!("AVAILABLE to {reply_to} failed: {e}");
                }
                if let Some(advert) = advert {
                    peers.record(DiscoveredPeer {
                        name,
                        ip: from.ip(),
                        p2p_port: advert.p2p_port,
                        timestamp: advert.timestamp,
                    });
                }
            }
            DiscoveryMessage::Available {
                name,
                p2p_port,
                timestamp,
            } => {
                peers.record(DiscoveredPeer {
                    name,
                    ip: from.ip(),
                    p2p_port,
                    // Responders that omit a timestamp sort first.
                    timestamp: timestamp.unwrap_or(0),
                });
            }
            other => trace!("ignoring {other:?} from {from}"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn free_udp_range(count: u16) -> u16 {
        // Probe for a base with `count` consecutive free ports.
        for _ in 0..50 {
            let probe = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
            let base = probe.local_addr().unwrap().port();
            drop(probe);
            if base > u16::MAX - count {
                continue;
            }
            let all_free = (base..base + count)
                .all(|p| std::net::UdpSocket::bind(("0.0.0.0", p)).is_ok());
            if all_free {
                return base;
            }
        }
        panic!("no free UDP range");
    }

    fn config(base: u16) -> DiscoveryConfig {
        DiscoveryConfig {
            broadcast_port_base: base,
            broadcast_port_count: 3,
            search_interval: Duration::from_millis(100),
            ..DiscoveryConfig::default()
        }
    }

    fn identity(name: &str, ts: u64) -> LocalIdentity {
        LocalIdentity {
            name: name.to_string(),
            p2p_port: 5000,
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn test_two_nodes_on_one_host_bind_distinct_ports() {
        let base = free_udp_range(3);
        let a = BroadcastDiscovery::new(identity("ana", 1), config(base));
        let b = BroadcastDiscovery::new(identity("bo", 2), config(base));

        a.respond().await.unwrap();
        b.respond().await.unwrap();

        let (pa, pb) = (a.bound_port().await.unwrap(), b.bound_port().await.unwrap());
        assert_ne!(pa, pb);
        assert!((base..base + 3).contains(&pa));
        assert!((base..base + 3).contains(&pb));
        a.stop_responding().await;
        b.stop_responding().await;
    }

    #[tokio::test]
    async fn test_search_finds_responder_and_responder_learns_searcher() {
        // Arrange
        let base = free_udp_range(3);
        let responder = BroadcastDiscovery::new(identity("bo", 2), config(base));
        responder.respond().await.unwrap();
        let searcher = BroadcastDiscovery::new(identity("ana", 1), config(base));

        // Act
        let found = searcher.search(Duration::from_millis(800)).await.unwrap();

        // Assert
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "bo");
        assert_eq!(found[0].timestamp, 2);
        let learned = responder.peers.snapshot();
        assert_eq!(learned.len(), 1);
        assert_eq!(learned[0].name, "ana");
        assert_eq!(learned[0].timestamp, 1);

        responder.stop_responding().await;
        searcher.stop_responding().await;
    }

    #[tokio::test]
    async fn test_search_alone_returns_empty_after_window() {
        let base = free_udp_range(3);
        let lonely = BroadcastDiscovery::new(identity("ana", 1), config(base));

        let started = Instant::now();
        let found = lonely.search(Duration::from_millis(400)).await.unwrap();

        assert!(found.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(400));
        lonely.stop_responding().await;
    }

    #[tokio::test]
    async fn test_full_range_reports_no_free_port() {
        let base = free_udp_range(1);
        let _held = std::net::UdpSocket::bind(("0.0.0.0", base)).unwrap();
        let cfg = DiscoveryConfig {
            broadcast_port_count: 1,
            ..config(base)
        };
        let d = BroadcastDiscovery::new(identity("ana", 1), cfg);

        let err = d.respond().await.unwrap_err();

        assert!(matches!(err, DiscoveryError::NoFreePort { first, last } if first == base && last == base));
    }
}
