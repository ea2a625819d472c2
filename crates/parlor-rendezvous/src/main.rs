//! Parlor rendezvous server: entry point.
//!
//! Pairs players that cannot find each other on the LAN.  Start it on a
//! host both players can reach, then run `parlor-node --rendezvous
//! <host>:<port>` on each side.
//!
//! # Usage
//!
//! ```text
//! parlor-rendezvous [OPTIONS]
//!
//! Options:
//!   --bind            <IP>    Address to listen on        [default: 0.0.0.0]
//!   --port            <PORT>  Matchmaking port            [default: 9999]
//!   --port-base       <PORT>  First port handed to hosts  [default: 5000]
//!   --port-span       <N>     Number of host ports        [default: 1000]
//!   --request-timeout <SECS>  Wait for the request line   [default: 10]
//! ```
//!
//! Every option can also be set through the matching `PARLOR_RV_*`
//! environment variable; the command line wins when both are present.

use std::net::{IpAddr, SocketAddr};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parlor_rendezvous::domain::RendezvousConfig;
use parlor_rendezvous::infrastructure::RendezvousServer;

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "parlor-rendezvous",
    about = "Pairs waiting Parlor players and tells them how to connect",
    version
)]
struct Cli {
    /// IP address to bind the matchmaking listener to.
    #[arg(long, default_value = "0.0.0.0", env = "PARLOR_RV_BIND")]
    bind: IpAddr,

    /// TCP port players connect to.
    #[arg(long, default_value_t = 9999, env = "PARLOR_RV_PORT")]
    port: u16,

    /// First port assigned to hosts.
    #[arg(long, default_value_t = 5000, env = "PARLOR_RV_PORT_BASE")]
    port_base: u16,

    /// Number of ports assigned to hosts, starting at `--port-base`.
    #[arg(long, default_value_t = 1000, env = "PARLOR_RV_PORT_SPAN")]
    port_span: u16,

    /// Seconds a connection may take to send its request.
    #[arg(long, default_value_t = 10, env = "PARLOR_RV_REQUEST_TIMEOUT")]
    request_timeout: u64,
}

impl Cli {
    fn into_config(self) -> RendezvousConfig {
        RendezvousConfig {
            bind_addr: SocketAddr::new(self.bind, self.port),
            port_base: self.port_base,
            port_span: self.port_span,
            request_timeout: Duration::from_secs(self.request_timeout),
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config();
    info!(
        "parlor rendezvous starting on {} (host ports {}+{})",
        config.bind_addr, config.port_base, config.port_span
    );

    let server = RendezvousServer::bind(config)
        .await
        .context("failed to start the rendezvous server")?;

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    server.run(running).await;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
