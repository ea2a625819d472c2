//! Session message types exchanged between two connected peers.
//!
//! Every message on an established peer connection is an [`Envelope`]: a
//! [`MessageKind`], the display name of the peer that sent it, and a single
//! text payload whose grammar is fixed per kind:
//!
//! | Kind           | Payload                               |
//! |----------------|---------------------------------------|
//! | `GREETING`     | empty                                 |
//! | `START_SIGNAL` | empty                                 |
//! | `MOVE`         | `player:<id>,piece:<id>,die:<value>`  |
//! | `TURN_CHANGE`  | bare integer (next player id)         |
//! | `DICE_ROLL`    | bare integer (die value)              |
//! | `CHAT`         | free text                             |
//! | `PEER_LEFT`    | empty                                 |
//!
//! Envelopes are deliberately dumb: the payload stays a string on the wire
//! and is only interpreted by [`GameEvent::from_envelope`], so a malformed
//! payload is a local [`PayloadError`], never a framing failure.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Current version of the envelope line format.
pub const PROTOCOL_VERSION: u8 = 1;

/// The kind of a session message.
///
/// Unrecognised kind tokens decode as [`MessageKind::Unknown`] carrying the
/// raw token, so a newer peer can introduce kinds without breaking older ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Identity announcement; `sender` carries the display name.
    Greeting,
    /// Host → client: the session may begin.
    StartSignal,
    /// A piece movement.
    Move,
    /// The turn passes to another player.
    TurnChange,
    /// A die was rolled.
    DiceRoll,
    /// Free-form chat text.
    Chat,
    /// The sender is leaving the session in an orderly way.
    PeerLeft,
    /// A kind this build does not know about.
    Unknown(String),
}

impl MessageKind {
    /// Returns the token used for this kind on the wire.
    pub fn as_wire(&self) -> &str {
        match self {
            MessageKind::Greeting => "GREETING",
            MessageKind::StartSignal => "START_SIGNAL",
            MessageKind::Move => "MOVE",
            MessageKind::TurnChange => "TURN_CHANGE",
            MessageKind::DiceRoll => "DICE_ROLL",
            MessageKind::Chat => "CHAT",
            MessageKind::PeerLeft => "PEER_LEFT",
            MessageKind::Unknown(token) => token,
        }
    }

    /// Maps a wire token back to a kind.  Never fails.
    pub fn from_wire(token: &str) -> Self {
        match token {
            "GREETING" => MessageKind::Greeting,
            "START_SIGNAL" => MessageKind::StartSignal,
            "MOVE" => MessageKind::Move,
            "TURN_CHANGE" => MessageKind::TurnChange,
            "DICE_ROLL" => MessageKind::DiceRoll,
            "CHAT" => MessageKind::Chat,
            "PEER_LEFT" => MessageKind::PeerLeft,
            other => MessageKind::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// An immutable session message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    kind: MessageKind,
    sender: String,
    payload: String,
}

impl Envelope {
    /// Builds an envelope from its raw parts.
    pub fn new(kind: MessageKind, sender: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind,
            sender: sender.into(),
            payload: payload.into(),
        }
    }

    pub fn greeting(sender: impl Into<String>) -> Self {
        Self::new(MessageKind::Greeting, sender, "")
    }

    pub fn start_signal(sender: impl Into<String>) -> Self {
        Self::new(MessageKind::StartSignal, sender, "")
    }

    pub fn game_move(sender: impl Into<String>, mv: MovePayload) -> Self {
        Self::new(MessageKind::Move, sender, mv.to_string())
    }

    pub fn turn_change(sender: impl Into<String>, next_player: u32) -> Self {
        Self::new(MessageKind::TurnChange, sender, next_player.to_string())
    }

    pub fn dice_roll(sender: impl Into<String>, value: u8) -> Self {
        Self::new(MessageKind::DiceRoll, sender, value.to_string())
    }

    pub fn chat(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(MessageKind::Chat, sender, text)
    }

    pub fn peer_left(sender: impl Into<String>) -> Self {
        Self::new(MessageKind::PeerLeft, sender, "")
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

// ── Payloads ──────────────────────────────────────────────────────────────────

/// Errors raised while interpreting the payload of a known message kind.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// The MOVE payload did not match `player:<id>,piece:<id>,die:<value>`.
    #[error("malformed MOVE payload: {0:?}")]
    MalformedMove(String),

    /// A bare-integer payload could not be parsed.
    #[error("{kind} payload is not an integer: {value:?}")]
    NotAnInteger { kind: &'static str, value: String },
}

/// The structured payload of a MOVE message.
///
/// Identifiers are opaque to this crate; the game layer owns their meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MovePayload {
    pub player_id: u32,
    pub piece_id: u32,
    pub die: u8,
}

impl fmt::Display for MovePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "player:{},piece:{},die:{}",
            self.player_id, self.piece_id, self.die
        )
    }
}

impl FromStr for MovePayload {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PayloadError::MalformedMove(s.to_string());

        let mut fields = s.split(',');
        let player = take_field(&mut fields, "player").ok_or_else(malformed)?;
        let piece = take_field(&mut fields, "piece").ok_or_else(malformed)?;
        let die = take_field(&mut fields, "die").ok_or_else(malformed)?;
        if fields.next().is_some() {
            return Err(malformed());
        }

        Ok(Self {
            player_id: player.parse().map_err(|_| malformed())?,
            piece_id: piece.parse().map_err(|_| malformed())?,
            die: die.parse().map_err(|_| malformed())?,
        })
    }
}

fn take_field<'a>(fields: &mut std::str::Split<'a, char>, key: &str) -> Option<&'a str> {
    fields.next()?.strip_prefix(key)?.strip_prefix(':')
}

/// The typed interpretation of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    Greeting,
    StartSignal,
    Move(MovePayload),
    TurnChange { next_player: u32 },
    DiceRoll { value: u8 },
    Chat { text: String },
    PeerLeft,
    /// A kind this build does not understand; passed through untouched.
    Unknown { kind: String, payload: String },
}

impl GameEvent {
    /// Interprets the payload of `envelope` according to its kind.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] if the payload does not follow the grammar
    /// of its kind.  Kinds with an empty payload ignore whatever was sent.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, PayloadError> {
        let payload = envelope.payload();
        Ok(match envelope.kind() {
            MessageKind::Greeting => GameEvent::Greeting,
            MessageKind::StartSignal => GameEvent::StartSignal,
            MessageKind::Move => GameEvent::Move(payload.parse()?),
            MessageKind::TurnChange => GameEvent::TurnChange {
                next_player: parse_integer("TURN_CHANGE", payload)?,
            },
            MessageKind::DiceRoll => GameEvent::DiceRoll {
                value: parse_integer("DICE_ROLL", payload)?,
            },
            MessageKind::Chat => GameEvent::Chat {
                text: payload.to_string(),
            },
            MessageKind::PeerLeft => GameEvent::PeerLeft,
            MessageKind::Unknown(kind) => GameEvent::Unknown {
                kind: kind.clone(),
                payload: payload.to_string(),
            },
        })
    }
}

fn parse_integer<T: FromStr>(kind: &'static str, value: &str) -> Result<T, PayloadError> {
    value.parse().map_err(|_| PayloadError::NotAnInteger {
        kind,
        value: value.to_string(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
