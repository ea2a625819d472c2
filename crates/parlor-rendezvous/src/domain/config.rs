//! Rendezvous server configuration.
//!
//! [`RendezvousConfig`] is built once at startup from CLI arguments (or
//! defaults) and shared with every request task.

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("host port range is empty (span 0)")]
    EmptyPortRange,

    #[error("host port range {base} + {span} runs past 65535")]
    PortRangeOverflow { base: u16, span: u16 },
}

/// All runtime settings of the rendezvous server.
#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    /// Address the matchmaking listener binds to.
    pub bind_addr: SocketAddr,

    /// First port handed to hosts.
    pub port_base: u16,

    /// Number of ports in the host range, starting at `port_base`.
    pub port_span: u16,

    /// How long a new connection may take to send its request line.
    pub request_timeout: Duration,
}

impl RendezvousConfig {
    /// The inclusive range of ports assigned to hosts.
    ///
    /// # Errors
    ///
    /// [`ConfigError::EmptyPortRange`] for a zero span and
    /// [`ConfigError::PortRangeOverflow`] when the range leaves `u16`.
    pub fn host_ports(&self) -> Result<RangeInclusive<u16>, ConfigError> {
        if self.port_span == 0 {
            return Err(ConfigError::EmptyPortRange);
        }
        let last = self
            .port_base
            .checked_add(self.port_span - 1)
            .ok_or(ConfigError::PortRangeOverflow {
                base: self.port_base,
                span: self.port_span,
            })?;
        Ok(self.port_base..=last)
    }
}

impl Default for RendezvousConfig {
    /// | Field           | Default        |
    /// |-----------------|----------------|
    /// | bind_addr       | `0.0.0.0:9999` |
    /// | port_base       | `5000`         |
    /// | port_span       | `1000`         |
    /// | request_timeout | 10 seconds     |
    fn default() -> Self {
        Self {
            // Compile-time-known valid address.
            bind_addr: "0.0.0.0:9999".parse().unwrap(),
            port_base: 5000,
            port_span: 1000,
            request_timeout: Duration::from_secs(10),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
