//! Session establishment state machine.
//!
//! ```text
//! Discovering ─▶ RoleDecided ─┬─▶ Hosting ─┬─▶ Handshaking ─▶ Ready
//!                             └─▶ Joining ─┘
//!
//! any non-terminal state ─▶ Failed
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Discovering,
    RoleDecided,
    Hosting,
    Joining,
    Handshaking,
    Ready,
    Failed,
}

impl SessionState {
    /// `Ready` and `Failed` end establishment; nothing leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Failed)
    }

    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Discovering, RoleDecided) => true,
            (RoleDecided, Hosting | Joining) => true,
            (Hosting | Joining, Handshaking) => true,
            (Handshaking, Ready) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Discovering => "DISCOVERING",
            SessionState::RoleDecided => "ROLE_DECIDED",
            SessionState::Hosting => "HOSTING",
            SessionState::Joining => "JOINING",
            SessionState::Handshaking => "HANDSHAKING",
            SessionState::Ready => "READY",
            SessionState::Failed => "FAILED",
        })
    }
}
