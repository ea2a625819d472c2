//! Deterministic host/client role arbitration.
//!
//! Both peers run [`decide_role`] on data they already hold after discovery
//! (their own identity plus the candidate's advertised identity) and must
//! arrive at complementary roles without exchanging another message.  The
//! comparison is therefore a total order on `(name, port, timestamp)` that
//! both sides evaluate identically; the side with the smaller key hosts.
//!
//! # Policies
//!
//! - [`Arbitration::Timestamp`]: earlier discovery session wins; ties fall
//!   back to the name hash, then port, then the name itself.
//! - [`Arbitration::NameHash`]: smaller FNV-1a hash of the display name wins;
//!   ties fall back to port, then timestamp, then the name itself.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::domain::peer::DiscoveredPeer;

/// The role a peer plays in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Undecided,
    Host,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Undecided => "undecided",
            Role::Host => "host",
            Role::Client => "client",
        })
    }
}

/// Which comparison decides the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Arbitration {
    #[default]
    Timestamp,
    NameHash,
}

impl FromStr for Arbitration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timestamp" => Ok(Arbitration::Timestamp),
            "name-hash" => Ok(Arbitration::NameHash),
            other => Err(format!(
                "unknown arbitration policy {other:?} (expected \"timestamp\" or \"name-hash\")"
            )),
        }
    }
}

/// What this process advertises about itself during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub name: String,
    pub p2p_port: u16,
    pub timestamp: u64,
}

impl LocalIdentity {
    /// Creates an identity stamped with the current time.
    pub fn new(name: impl Into<String>, p2p_port: u16) -> Self {
        Self {
            name: name.into(),
            p2p_port,
            timestamp: current_timestamp_ms(),
        }
    }
}

/// Outcome of arbitration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDecision {
    pub role: Role,
    /// The opponent chosen among the candidates, if any.
    pub peer: Option<DiscoveredPeer>,
}

/// Decides this process's role from the discovered candidates.
///
/// With no candidates the process hosts.  With several, the candidate with
/// the smallest arbitration key is treated as the opponent.
pub fn decide_role(
    local: &LocalIdentity,
    candidates: &[DiscoveredPeer],
    policy: Arbitration,
) -> RoleDecision {
    let Some(peer) = candidates
        .iter()
        .min_by(|a, b| {
            arbitration_key(policy, &a.name, a.p2p_port, a.timestamp).cmp(&arbitration_key(
                policy,
                &b.name,
                b.p2p_port,
                b.timestamp,
            ))
        })
        .cloned()
    else {
        return RoleDecision {
            role: Role::Host,
            peer: None,
        };
    };

    let ours = arbitration_key(policy, &local.name, local.p2p_port, local.timestamp);
    let theirs = arbitration_key(policy, &peer.name, peer.p2p_port, peer.timestamp);
    let role = if ours < theirs { Role::Host } else { Role::Client };

    RoleDecision {
        role,
        peer: Some(peer),
    }
}

fn arbitration_key(
    policy: Arbitration,
    name: &str,
    port: u16,
    timestamp: u64,
) -> (u64, u64, u64, &str) {
    let hash = name_hash(name);
    match policy {
        Arbitration::Timestamp => (timestamp, hash, u64::from(port), name),
        Arbitration::NameHash => (hash, u64::from(port), timestamp, name),
    }
}

/// 64-bit FNV-1a over the UTF-8 bytes of `name`.
///
/// Stable across processes and platforms, unlike `DefaultHasher`.
pub fn name_hash(name: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    name.bytes()
        .fold(OFFSET, |h, b| (h ^ u64::from(b)).wrapping_mul(PRIME))
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before 1970.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
