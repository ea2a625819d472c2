//! The narrow interface game logic uses once a session is ready.
//!
//! Outbound: [`GameChannel`] formats game events into envelopes and
//! broadcasts them to the connected peer.  Identifiers are supplied by the
//! caller and never interpreted here.
//!
//! Inbound: session envelopes are turned into [`InboundEvent`]s, which are
//! either consumed as a stream or dispatched to a [`GameEventHandler`].  A
//! payload that does not parse is logged and skipped; it never closes the
//! connection.

use std::sync::Arc;

use parlor_core::{Envelope, GameEvent, MovePayload};
use tracing::{debug, warn};

use crate::infrastructure::network::ConnectionManager;

/// Callbacks into the game layer.
///
/// Invoked from the session's event pump task, one event at a time and in
/// arrival order.
#[cfg_attr(test, mockall::automock)]
pub trait GameEventHandler: Send + Sync {
    fn on_move_received(&self, sender: &str, mv: MovePayload);

    fn on_turn_changed(&self, sender: &str, next_player: u32);

    fn on_dice_rolled(&self, sender: &str, value: u8);

    fn on_chat_received(&self, sender: &str, text: &str);

    /// The socket to the opponent closed.  Called once per lost connection.
    fn on_peer_disconnected(&self, remote_name: Option<String>);

    /// The opponent announced an orderly exit (PEER_LEFT).  The socket
    /// usually closes right after, which is reported separately.
    fn on_peer_left(&self, _sender: &str) {}
}

/// A decoded game-level event from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Move { sender: String, mv: MovePayload },
    TurnChanged { sender: String, next_player: u32 },
    DiceRolled { sender: String, value: u8 },
    Chat { sender: String, text: String },
    PeerLeft { sender: String },
    PeerDisconnected { remote_name: Option<String> },
}

impl InboundEvent {
    /// Interprets a session envelope as a game event.
    ///
    /// Handshake kinds, unknown kinds and malformed payloads yield `None`;
    /// malformed payloads are logged.
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        let sender = envelope.sender().to_string();
        match GameEvent::from_envelope(envelope) {
            Ok(GameEvent::Move(mv)) => Some(InboundEvent::Move { sender, mv }),
            Ok(GameEvent::TurnChange { next_player }) => {
                Some(InboundEvent::TurnChanged { sender, next_player })
            }
            Ok(GameEvent::DiceRoll { value }) => Some(InboundEvent::DiceRolled { sender, value }),
            Ok(GameEvent::Chat { text }) => Some(InboundEvent::Chat { sender, text }),
            Ok(GameEvent::PeerLeft) => Some(InboundEvent::PeerLeft { sender }),
            Ok(GameEvent::Greeting | GameEvent::StartSignal) => None,
            Ok(GameEvent::Unknown { kind, .. }) => {
                debug!("ignoring unknown message kind {kind:?} from {sender:?}");
                None
            }
            Err(e) => {
                warn!("skipping {} from {sender:?}: {e}", envelope.kind());
                None
            }
        }
    }

    /// Invokes the matching callback on `handler`.
    pub fn dispatch(self, handler: &dyn GameEventHandler) {
        match self {
            InboundEvent::Move { sender, mv } => handler.on_move_received(&sender, mv),
            InboundEvent::TurnChanged {
                sender,
                next_player,
            } => handler.on_turn_changed(&sender, next_player),
            InboundEvent::DiceRolled { sender, value } => handler.on_dice_rolled(&sender, value),
            InboundEvent::Chat { sender, text } => handler.on_chat_received(&sender, &text),
            InboundEvent::PeerLeft { sender } => handler.on_peer_left(&sender),
            InboundEvent::PeerDisconnected { remote_name } => {
                handler.on_peer_disconnected(remote_name)
            }
        }
    }
}

/// Outbound half of the game interface.
///
/// Every `send_*` returns the number of peers the event was written to; `0`
/// means the opponent is gone.
#[derive(Clone)]
pub struct GameChannel {
    local_name: String,
    manager: Arc<ConnectionManager>,
}

impl GameChannel {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            local_name: manager.local_name().to_string(),
            manager,
        }
    }

    pub async fn send_move(&self, player_id: u32, piece_id: u32, die: u8) -> usize {
        let mv = MovePayload {
            player_id,
            piece_id,
            die,
        };
        self.send(Envelope::game_move(self.local_name.as_str(), mv)).await
    }

    pub async fn send_turn_change(&self, next_player: u32) -> usize {
        self.send(Envelope::turn_change(self.local_name.as_str(), next_player))
            .await
    }

    pub async fn send_dice_roll(&self, value: u8) -> usize {
        self.send(Envelope::dice_roll(self.local_name.as_str(), value))
            .await
    }

    pub async fn send_chat(&self, text: &str) -> usize {
        self.send(Envelope::chat(self.local_name.as_str(), text)).await
    }

    /// Announces an orderly exit.
    pub async fn send_leave(&self) -> usize {
        self.send(Envelope::peer_left(self.local_name.as_str())).await
    }

    /// `true` while at least one peer connection is open.
    pub fn is_connected(&self) -> bool {
        !self.manager.active_connections().is_empty()
    }

    async fn send(&self, envelope: Envelope) -> usize {
        let delivered = self.manager.broadcast(&envelope).await;
        if delivered == 0 {
            debug!("{} not delivered: no connected peer", envelope.kind());
        }
        delivered
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
