//! Application layer use cases for a node.
//!
//! # Sub-modules
//!
//! - **`session`** – Drives one establishment from discovery (or a
//!   rendezvous pairing) through role arbitration and handshake to a ready
//!   link, and tears it down again.
//!
//! - **`game_channel`** – Sends game events to the connected peer and
//!   delivers inbound ones to a [`GameEventHandler`](game_channel::GameEventHandler).

pub mod game_channel;
pub mod session;

pub use game_channel::{GameChannel, GameEventHandler, InboundEvent};
pub use session::{SessionConfig, SessionCoordinator, SessionError};
