//! parlor-rendezvous library crate.
//!
//! A matchmaking server for players who cannot find each other by LAN
//! discovery.  Each player opens one short-lived TCP connection, sends a
//! `{"name":..}` line and waits; whenever two players are queued the server
//! pairs them, tells each one its role and the session coordinates, and
//! closes both connections.
//!
//! # Architecture
//!
//! ```text
//! [parlor-rendezvous]
//!   ├── domain/           RendezvousConfig
//!   ├── application/      Pairing rules and the host-port allocator
//!   └── infrastructure/
//!         └── server/     Accept loop, request handlers, pairing loop
//! ```
//!
//! `domain` and `application` do no I/O; everything that touches a socket
//! lives in `infrastructure`.

pub mod application;
pub mod domain;
pub mod infrastructure;
