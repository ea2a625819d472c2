//! Active TCP subnet scan with PING/PONG.
//!
//! Responder: a TCP listener on `scan_port` that answers one `PING` line per
//! connection with a `PONG` line carrying our identity.
//!
//! Search: every host of every local /24 (own addresses skipped) is pushed
//! onto a shared queue drained by a fixed pool of workers.  Each probe is a
//! short-timeout connect, a PING line, and a bounded wait for the PONG.  A
//! countdown tracks finished probes so `search` returns as soon as the sweep
//! is done or the window elapses, whichever comes first.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use parlor_core::{DiscoveredPeer, DiscoveryMessage, LocalIdentity};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace};

use super::{DiscoveryConfig, DiscoveryError, DiscoveryStrategy, SharedPeers};
use crate::infrastructure::network::interfaces::{local_ipv4_interfaces, own_addresses};

struct Responder {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct SubnetScanDiscovery {
    identity: LocalIdentity,
    config: DiscoveryConfig,
    peers: SharedPeers,
    responder: tokio::sync::Mutex<Option<Responder>>,
}

impl SubnetScanDiscovery {
    pub fn new(identity: LocalIdentity, config: DiscoveryConfig) -> Self {
        Self {
            peers: SharedPeers::new(&identity.name),
            identity,
            config,
            responder: tokio::sync::Mutex::new(None),
        }
    }

    /// Hosts to probe: local /24 sweeps plus configured extras, own
    /// addresses removed, each host once.
    fn targets(&self) -> Vec<IpAddr> {
        let mut targets: Vec<IpAddr> = Vec::new();
        if self.config.sweep_subnets {
            let interfaces = local_ipv4_interfaces();
            let own = own_addresses(&interfaces);
            for iface in &interfaces {
                targets.extend(
                    iface
                        .subnet_hosts()
                        .map(IpAddr::V4)
                        .filter(|ip| !own.contains(ip)),
                );
            }
        }
        targets.extend(self.config.extra_hosts.iter().copied());

        let mut seen = std::collections::HashSet::new();
        targets.retain(|ip| seen.insert(*ip));
        targets
    }

    fn ping_line(&self) -> String {
        let ping = DiscoveryMessage::Ping {
            name: self.identity.name.clone(),
            p2p_port: self.identity.p2p_port,
            timestamp: self.identity.timestamp,
        };
        format!("{ping}\n")
    }
}

#[async_trait]
impl DiscoveryStrategy for SubnetScanDiscovery {
    async fn respond(&self) -> Result<(), DiscoveryError> {
        let mut slot = self.responder.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.scan_port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed { addr, source })?;

        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(responder_loop(
            listener,
            self.identity.clone(),
            self.config.reply_timeout,
            stop_rx,
        ));
        *slot = Some(Responder { stop, task });
        info!("ping responder listening on TCP {addr}");
        Ok(())
    }

    async fn search(&self, window: Duration) -> Result<Vec<DiscoveredPeer>, DiscoveryError> {
        self.peers.clear();
        let targets = self.targets();
        if targets.is_empty() {
            debug!("no hosts to scan");
            return Ok(Vec::new());
        }

        let total = targets.len();
        let queue = Arc::new(Mutex::new(VecDeque::from(targets)));
        let countdown = Arc::new(ProbeCountdown::new(total));
        let ping = Arc::new(self.ping_line());
        let workers = self.config.max_workers.clamp(1, total);
        debug!("scanning {total} hosts with {workers} workers");

        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let countdown = Arc::clone(&countdown);
            let ping = Arc::clone(&ping);
            let peers = self.peers.clone();
            let port = self.config.scan_port;
            let (connect_limit, reply_limit) = (self.config.probe_timeout, self.config.reply_timeout);

            pool.spawn(async move {
                loop {
                    let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
                    let Some(ip) = next else { break };
                    let addr = SocketAddr::new(ip, port);
                    if let Some(reply) = probe(addr, &ping, connect_limit, reply_limit).await {
                        record_pong(&peers, ip, reply);
                    }
                    countdown.done();
                }
            });
        }

        tokio::select! {
            _ = countdown.wait() => debug!("sweep finished"),
            _ = sleep(window) => debug!("scan window elapsed with {} probes pending", countdown.remaining()),
        }
        pool.abort_all();

        Ok(self.peers.snapshot())
    }

    async fn stop_responding(&self) {
        if let Some(responder) = self.responder.lock().await.take() {
            let _ = responder.stop.send(true);
            let _ = responder.task.await;
            debug!("ping responder stopped");
        }
    }
}

/// Wait-group over the expected number of probes.
struct ProbeCountdown {
    remaining: AtomicUsize,
    finished: Notify,
}

impl ProbeCountdown {
    fn new(total: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(total),
            finished: Notify::new(),
        }
    }

    fn done(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finished.notify_one();
        }
    }

    fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    async fn wait(&self) {
        while self.remaining() > 0 {
            self.finished.notified().await;
        }
    }
}

async fn probe(
    addr: SocketAddr,
    ping: &str,
    connect_limit: Duration,
    reply_limit: Duration,
) -> Option<DiscoveryMessage> {
    let mut stream = match timeout(connect_limit, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        _ => return None,
    };
    stream.write_all(ping.as_bytes()).await.ok()?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    match timeout(reply_limit, reader.read_line(&mut line)).await {
        Ok(Ok(n)) if n > 0 => {}
        _ => {
            trace!("no PONG from {addr}");
            return None;
        }
    }
    DiscoveryMessage::decode(&line).ok()
}

fn record_pong(peers: &SharedPeers, ip: IpAddr, reply: DiscoveryMessage) {
    match reply {
        DiscoveryMessage::Pong {
            name,
            p2p_port,
            timestamp,
        } => {
            peers.record(DiscoveredPeer {
                name,
                ip,
                p2p_port,
                timestamp,
            });
        }
        other => trace!("unexpected reply from {ip}: {other:?}"),
    }
}

async fn responder_loop(
    listener: TcpListener,
    identity: LocalIdentity,
    reply_timeout: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let identity = Arc::new(identity);
    loop {
        let accepted = tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, from)) => {
                let identity = Arc::clone(&identity);
                tokio::spawn(async move {
                    answer_ping(stream, from, &identity, reply_timeout).await;
                });
            }
            Err(e) => {
                debug!("ping responder accept error: {e}");
                sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn answer_ping(
    stream: TcpStream,
    from: SocketAddr,
    identity: &LocalIdentity,
    reply_timeout: Duration,
) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if !matches!(
        timeout(reply_timeout, reader.read_line(&mut line)).await,
        Ok(Ok(n)) if n > 0
    ) {
        return;
    }

    match DiscoveryMessage::decode(&line) {
        Ok(DiscoveryMessage::Ping { name, .. }) if name != identity.name => {
            let pong = DiscoveryMessage::Pong {
                name: identity.name.clone(),
                p2p_port: identity.p2p_port,
                timestamp: identity.timestamp,
            };
            let mut stream = reader.into_inner();
            if stream.write_all(format!("{pong}\n").as_bytes()).await.is_ok() {
                debug!("answered PING from {name:?} at {from}");
            }
            let _ = stream.shutdown().await;
        }
        Ok(_) => trace!("ignoring discovery line from {from}"),
        Err(e) => trace!("bad PING from {from}: {e}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
