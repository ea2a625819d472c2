//! # parlor-core
//!
//! Shared library for Parlor LAN game sessions: the wire formats two peers
//! and the rendezvous server speak, plus the pure logic that decides who
//! hosts a session.
//!
//! This crate opens no sockets.  It is used by `parlor-node` (the peer) and
//! `parlor-rendezvous` (the optional matchmaking server).
//!
//! - **`protocol`** – session envelopes and their line codec, discovery
//!   PING/PONG/SEARCH/AVAILABLE lines, rendezvous JSON lines.
//! - **`domain`** – discovered-peer deduplication, deterministic role
//!   arbitration, and the session establishment state machine.

pub mod domain;
pub mod protocol;

pub use domain::{
    decide_role, Arbitration, DiscoveredPeer, LocalIdentity, PeerSet, Role, RoleDecision,
    SessionState,
};
pub use protocol::codec::{decode_envelope, encode_envelope, ProtocolError};
pub use protocol::discovery::DiscoveryMessage;
pub use protocol::messages::{Envelope, GameEvent, MessageKind, MovePayload, PayloadError};
