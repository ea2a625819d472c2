//! Pure session logic: discovered peers, role arbitration, establishment states.

pub mod peer;
pub mod role;
pub mod session;

pub use peer::{DiscoveredPeer, PeerSet};
pub use role::{
    current_timestamp_ms, decide_role, name_hash, Arbitration, LocalIdentity, Role, RoleDecision,
};
pub use session::SessionState;
