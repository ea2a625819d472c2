//! Infrastructure layer for parlor-rendezvous: the TCP matchmaking server.

pub mod server;

pub use server::{RendezvousServer, ServerError};
