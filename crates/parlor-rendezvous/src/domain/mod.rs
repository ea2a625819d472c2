//! Domain layer for parlor-rendezvous: plain configuration, no I/O.

pub mod config;

pub use config::{ConfigError, RendezvousConfig};
