//! Infrastructure layer for a node.
//!
//! Contains OS-facing adapters: sockets, LAN discovery, and file-system
//! storage.

pub mod network;
pub mod storage;
