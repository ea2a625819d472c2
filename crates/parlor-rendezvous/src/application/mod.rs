//! Application layer for parlor-rendezvous.
//!
//! Decides who hosts, what each side is told and which port the host
//! listens on.  Sockets stay in the infrastructure layer.

pub mod matchmaker;

pub use matchmaker::{pair, validate_request, PortAllocator, RequestError, Seat};
