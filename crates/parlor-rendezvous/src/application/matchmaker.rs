//! Pairing rules.
//!
//! The first of two queued players hosts.  The host is told the port to
//! listen on; the client is told the host's address and that same port.
//! Each side also learns the other's name.

use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parlor_core::protocol::{decode_json_line, MatchRequest, MatchResponse};
use parlor_core::{ProtocolError, Role};
use thiserror::Error;

/// Longest accepted display name, in characters.
pub const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("malformed request: {0}")]
    Malformed(#[from] ProtocolError),

    #[error("player name must not be empty")]
    EmptyName,

    #[error("player name is longer than {} characters", MAX_NAME_LEN)]
    NameTooLong,
}

/// Parses a request line and returns the trimmed player name.
///
/// # Errors
///
/// [`RequestError`] if the line is not a `{"name":..}` object or the name
/// is blank or too long.
pub fn validate_request(line: &str) -> Result<String, RequestError> {
    let request: MatchRequest = decode_json_line(line)?;
    let name = request.name.trim();
    if name.is_empty() {
        return Err(RequestError::EmptyName);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(RequestError::NameTooLong);
    }
    Ok(name.to_string())
}

/// A queued player as seen by the pairing rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    pub name: String,
    pub ip: IpAddr,
}

/// Builds the replies for a pairing: `(to_host, to_client)`.
pub fn pair(host: &Seat, client: &Seat, port: u16) -> (MatchResponse, MatchResponse) {
    let to_host = MatchResponse {
        role: Role::Host,
        peer_name: client.name.clone(),
        peer_ip: client.ip,
        peer_port: port,
    };
    let to_client = MatchResponse {
        role: Role::Client,
        peer_name: host.name.clone(),
        peer_ip: host.ip,
        peer_port: port,
    };
    (to_host, to_client)
}

/// Hands out host ports by rotating through a fixed range.
///
/// The starting offset is seeded from the clock so that a restarted server
/// does not reuse the ports of its previous run first.
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    len: u64,
    next: AtomicU64,
}

impl PortAllocator {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::from(d.subsec_nanos()))
            .unwrap_or(0);
        Self::with_seed(range, seed)
    }

    pub fn with_seed(range: RangeInclusive<u16>, seed: u64) -> Self {
        let (first, last) = range.into_inner();
        let len = u64::from(last.saturating_sub(first)) + 1;
        Self {
            base: first,
            len,
            next: AtomicU64::new(seed % len),
        }
    }

    pub fn next_port(&self) -> u16 {
        let offset = self.next.fetch_add(1, Ordering::Relaxed) % self.len;
        // offset < len <= 65536 - base, so the sum stays within u16.
        self.base + offset as u16
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
