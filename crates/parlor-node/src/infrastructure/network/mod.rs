//! Network infrastructure for a node.
//!
//! # Sub-modules
//!
//! - **`discovery`** – Finds a candidate opponent on the LAN before any
//!   session link exists (UDP broadcast or TCP subnet scan).
//!
//! - **`connection_manager`** – Owns the session listener, the set of open
//!   peer links, greeting exchange and message fan-out.
//!
//! - **`peer_connection`** – One newline-framed TCP link with its own
//!   receive task.
//!
//! - **`interfaces`** – Local IPv4 interface enumeration used by discovery.
//!
//! - **`rendezvous_client`** – Asks a rendezvous server for a pairing when
//!   LAN discovery is not an option.

pub mod connection_manager;
pub mod discovery;
pub mod interfaces;
pub mod peer_connection;
pub mod rendezvous_client;

pub use connection_manager::{ConnectionManager, ManagerConfig, ManagerEvent, NetworkError};
pub use discovery::{DiscoveryConfig, DiscoveryError, DiscoveryService, StrategyKind};
pub use peer_connection::{ConnectionId, Direction, PeerConnection};
pub use rendezvous_client::{request_match, RendezvousError};
