//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML file from the platform config
//! directory, supplies defaults on first run, and converts the on-disk
//! sections into the runtime configs of the network and session layers.

pub mod config;
