//! LAN discovery: find a candidate opponent before any session link exists.
//!
//! Two interchangeable strategies implement [`DiscoveryStrategy`]:
//!
//! - [`BroadcastDiscovery`] (default): UDP SEARCH datagrams to a small range
//!   of well-known ports, answered with AVAILABLE.
//! - [`SubnetScanDiscovery`]: a bounded worker pool opens short TCP
//!   connections to every host of each local /24 and exchanges PING/PONG.
//!
//! Both record results in a [`PeerSet`], so the local identity is never
//! reported and the first response per name wins.  Unreachable or
//! firewalled hosts are silent non-responses.

mod broadcast;
mod subnet_scan;

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use parlor_core::{DiscoveredPeer, LocalIdentity, PeerSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use broadcast::BroadcastDiscovery;
pub use subnet_scan::SubnetScanDiscovery;

/// Error type for discovery operations.
///
/// Only failures to start the responder surface; probe failures never do.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("no free discovery port in {first}..={last}")]
    NoFreePort { first: u16, last: u16 },
}

/// Which discovery mechanism to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[default]
    Broadcast,
    SubnetScan,
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "broadcast" => Ok(StrategyKind::Broadcast),
            "subnet-scan" => Ok(StrategyKind::SubnetScan),
            other => Err(format!(
                "unknown discovery strategy {other:?} (expected \"broadcast\" or \"subnet-scan\")"
            )),
        }
    }
}

/// Discovery tunables shared by both strategies.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub strategy: StrategyKind,

    /// TCP port of the PING responder (subnet scan).
    pub scan_port: u16,
    /// Per-host connect timeout during the sweep.
    pub probe_timeout: Duration,
    /// How long a probe waits for the PONG line.
    pub reply_timeout: Duration,
    /// Worker pool size for the sweep.
    pub max_workers: usize,
    /// Sweep the /24 of every local interface.  Disable to probe only
    /// `extra_hosts`.
    pub sweep_subnets: bool,
    /// Hosts probed in addition to the sweep (e.g. peers on another subnet).
    pub extra_hosts: Vec<std::net::IpAddr>,

    /// First UDP port of the well-known broadcast range.
    pub broadcast_port_base: u16,
    /// Number of ports in the broadcast range.
    pub broadcast_port_count: u16,
    /// Interval between SEARCH rounds.
    pub search_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Broadcast,
            scan_port: 9999,
            probe_timeout: Duration::from_millis(500),
            reply_timeout: Duration::from_secs(1),
            max_workers: default_worker_count(),
            sweep_subnets: true,
            extra_hosts: Vec::new(),
            broadcast_port_base: 9999,
            broadcast_port_count: 5,
            search_interval: Duration::from_millis(500),
        }
    }
}

/// Available parallelism × 2, capped at 50.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(4)
        .min(50)
}

/// The external contract both strategies honour.
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    /// Starts answering discovery probes with our identity.  Calling it
    /// while already responding is a no-op.
    async fn respond(&self) -> Result<(), DiscoveryError>;

    /// Probes for `window` and returns the peers found, first response per
    /// name, never ourselves.
    async fn search(&self, window: Duration) -> Result<Vec<DiscoveredPeer>, DiscoveryError>;

    /// Stops the responder and releases its socket.  Idempotent.
    async fn stop_responding(&self);
}

/// Discovery handle owned by one session.
pub struct DiscoveryService {
    strategy: Box<dyn DiscoveryStrategy>,
}

impl DiscoveryService {
    /// Builds the strategy selected by `config.strategy`.
    pub fn new(identity: LocalIdentity, config: DiscoveryConfig) -> Self {
        let strategy: Box<dyn DiscoveryStrategy> = match config.strategy {
            StrategyKind::Broadcast => Box::new(BroadcastDiscovery::new(identity, config)),
            StrategyKind::SubnetScan => Box::new(SubnetScanDiscovery::new(identity, config)),
        };
        Self { strategy }
    }

    /// Wraps a caller-supplied strategy.
    pub fn with_strategy(strategy: Box<dyn DiscoveryStrategy>) -> Self {
        Self { strategy }
    }

    pub async fn respond(&self) -> Result<(), DiscoveryError> {
        self.strategy.respond().await
    }

    pub async fn search(&self, window: Duration) -> Result<Vec<DiscoveredPeer>, DiscoveryError> {
        self.strategy.search(window).await
    }

    pub async fn stop_responding(&self) {
        self.strategy.stop_responding().await
    }
}

/// `PeerSet` shared between concurrent probe / listener tasks.
#[derive(Clone)]
pub(crate) struct SharedPeers(Arc<Mutex<PeerSet>>);

impl SharedPeers {
    pub(crate) fn new(local_name: &str) -> Self {
        Self(Arc::new(Mutex::new(PeerSet::new(local_name))))
    }

    /// Dedup check and insert as one step.
    pub(crate) fn record(&self, peer: DiscoveredPeer) -> bool {
        let name = peer.name.clone();
        let ip = peer.ip;
        let added = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer);
        if added {
            tracing::info!("found peer {name:?} at {ip}");
        }
        added
    }

    pub(crate) fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub(crate) fn snapshot(&self) -> Vec<DiscoveredPeer> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }
}
