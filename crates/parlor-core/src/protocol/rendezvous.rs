//! JSON-line messages exchanged with the rendezvous server.
//!
//! A client opens one short-lived TCP connection, writes a single
//! [`MatchRequest`] line and reads back a single [`ServerReply`] line:
//!
//! ```text
//! → {"name":"ana"}
//! ← {"role":"host","peerName":"bo","peerIp":"192.168.1.20","peerPort":5417}
//! ```
//!
//! For the host, `peerPort` is the port it must listen on; for the client it
//! is the port to connect to on `peerIp`.

use std::net::IpAddr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::role::Role;
use crate::protocol::codec::{strip_line_ending, ProtocolError};

/// "Looking for a match" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub name: String,
}

/// Pairing result returned to each of the two matched requesters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResponse {
    pub role: Role,
    pub peer_name: String,
    pub peer_ip: IpAddr,
    pub peer_port: u16,
}

/// Everything the server may write back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerReply {
    Matched(MatchResponse),
    Rejected { error: String },
}

/// Serializes `value` as one newline-terminated JSON line.
///
/// # Errors
///
/// Returns [`ProtocolError::Json`] if serialization fails.
pub fn encode_json_line<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(value).map_err(|e| ProtocolError::Json(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Parses one JSON line.
///
/// # Errors
///
/// Returns [`ProtocolError::Empty`] for a blank line and
/// [`ProtocolError::Json`] for anything serde rejects.
pub fn decode_json_line<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    let line = strip_line_ending(line);
    if line.trim().is_empty() {
        return Err(ProtocolError::Empty);
    }
    serde_json::from_str(line).map_err(|e| ProtocolError::Json(e.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
