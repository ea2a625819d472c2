//! Matchmaking server: accept loop, request handlers and the pairing loop.
//!
//! Each accepted connection gets its own task that reads exactly one
//! request line.  Valid requests move the socket into a FIFO queue; a single
//! pairing task owns the receiving end, so pairing never races with
//! enqueueing.  Players that hung up while queued are skipped when their
//! turn comes.
//!
//! Shutdown follows the usual pattern here: the accept loop polls a shared
//! `running` flag every 200 ms, and queued sockets are dropped when the
//! pairing task is aborted.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use parlor_core::protocol::{encode_json_line, ServerReply};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::{pair, validate_request, PortAllocator, Seat};
use crate::domain::{ConfigError, RendezvousConfig};

/// Requests longer than this are cut off and rejected as malformed.
const MAX_REQUEST_BYTES: u64 = 4096;

/// Players that may sit in the queue before new requests wait for room.
const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind matchmaking listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// A validated requester waiting for an opponent.
struct WaitingPlayer {
    seat: Seat,
    stream: TcpStream,
}

// ── Public API ────────────────────────────────────────────────────────────────

pub struct RendezvousServer {
    listener: TcpListener,
    config: RendezvousConfig,
    ports: PortAllocator,
}

impl RendezvousServer {
    /// Validates `config` and binds the matchmaking listener.
    ///
    /// # Errors
    ///
    /// [`ServerError::Config`] for an unusable host port range and
    /// [`ServerError::Bind`] if the listener cannot be bound.
    pub async fn bind(config: RendezvousConfig) -> Result<Self, ServerError> {
        let ports = PortAllocator::new(config.host_ports()?);
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        Ok(Self {
            listener,
            config,
            ports,
        })
    }

    /// The address actually bound (useful when binding port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts and pairs players until `running` is cleared.
    pub async fn run(self, running: Arc<AtomicBool>) {
        let Self {
            listener,
            config,
            ports,
        } = self;
        let (queue, waiting) = mpsc::channel(QUEUE_CAPACITY);
        let pairing = tokio::spawn(pairing_loop(waiting, ports));

        match listener.local_addr() {
            Ok(addr) => info!("rendezvous server listening on {addr}"),
            Err(e) => warn!("rendezvous server listening (address unavailable: {e})"),
        }

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            // Short timeout so the flag is rechecked while idle.
            match timeout(Duration::from_millis(200), listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    debug!("connection from {addr}");
                    let queue = queue.clone();
                    let limit = config.request_timeout;
                    tokio::spawn(async move {
                        handle_request(stream, addr, queue, limit).await;
                    });
                }
                Ok(Err(e)) => error!("accept error: {e}"),
                Err(_) => {}
            }
        }

        pairing.abort();
        let _ = pairing.await;
        info!("rendezvous server stopped");
    }
}

// ── Per-request handler ───────────────────────────────────────────────────────

async fn handle_request(
    mut stream: TcpStream,
    addr: SocketAddr,
    queue: mpsc::Sender<WaitingPlayer>,
    limit: Duration,
) {
    let line = match timeout(limit, read_request_line(&mut stream)).await {
        Err(_) => {
            debug!("{addr} sent no request within {limit:?}; closing");
            return;
        }
        Ok(Err(e)) => {
            debug!("failed to read request from {addr}: {e}");
            return;
        }
        Ok(Ok(line)) => line,
    };

    match validate_request(&line) {
        Ok(name) => {
            info!("{name:?} at {addr} is looking for a match");
            let player = WaitingPlayer {
                seat: Seat {
                    name,
                    ip: addr.ip(),
                },
                stream,
            };
            if queue.send(player).await.is_err() {
                debug!("pairing loop stopped; dropping {addr}");
            }
        }
        Err(e) => {
            warn!("rejecting request from {addr}: {e}");
            let rejection = ServerReply::Rejected {
                error: e.to_string(),
            };
            send_reply(&mut stream, &rejection).await;
        }
    }
}

async fn read_request_line(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut reader = BufReader::new(stream.take(MAX_REQUEST_BYTES));
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    Ok(line)
}

/// Writes one reply line and closes the write half.  Returns `false` if the
/// reply could not be written.
async fn send_reply(stream: &mut TcpStream, reply: &ServerReply) -> bool {
    let line = match encode_json_line(reply) {
        Ok(line) => line,
        Err(e) => {
            error!("failed to encode reply: {e}");
            return false;
        }
    };
    let written = stream.write_all(line.as_bytes()).await;
    let _ = stream.shutdown().await;
    written.is_ok()
}

// ── Pairing loop ──────────────────────────────────────────────────────────────

async fn pairing_loop(mut queue: mpsc::Receiver<WaitingPlayer>, ports: PortAllocator) {
    let mut waiting: Option<WaitingPlayer> = None;

    while let Some(player) = queue.recv().await {
        let host = match waiting.take() {
            None => {
                waiting = Some(player);
                continue;
            }
            Some(host) if hung_up(&host.stream) => {
                info!("{:?} left the queue before being paired", host.seat.name);
                waiting = Some(player);
                continue;
            }
            Some(host) => host,
        };
        if hung_up(&player.stream) {
            info!("{:?} left the queue before being paired", player.seat.name);
            waiting = Some(host);
            continue;
        }

        deliver(host, player, ports.next_port()).await;
    }
    debug!("pairing loop stopped");
}

async fn deliver(mut host: WaitingPlayer, mut client: WaitingPlayer, port: u16) {
    let (to_host, to_client) = pair(&host.seat, &client.seat, port);
    info!(
        "paired {:?} (host on port {port}) with {:?}",
        host.seat.name, client.seat.name
    );

    if !send_reply(&mut host.stream, &ServerReply::Matched(to_host)).await {
        warn!("could not deliver the match to {:?}", host.seat.name);
    }
    if !send_reply(&mut client.stream, &ServerReply::Matched(to_client)).await {
        warn!("could not deliver the match to {:?}", client.seat.name);
    }
}

/// Non-blocking check for a requester that closed its socket.
fn hung_up(stream: &TcpStream) -> bool {
    let mut probe = [0u8; 1];
    match stream.try_read(&mut probe) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) if e.kind() == ErrorKind::WouldBlock => false,
        Err(_) => true,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_hung_up_false_while_peer_is_open() {
        let (_client, server_side) = connected_pair().await;
        assert!(!hung_up(&server_side));
    }

    #[tokio::test]
    async fn test_hung_up_true_after_peer_closes() {
        // Arrange
        let (client, server_side) = connected_pair().await;

        // Act
        drop(client);
        server_side.readable().await.unwrap();

        // Assert
        assert!(hung_up(&server_side));
    }

    #[tokio::test]
    async fn test_bind_rejects_empty_port_range() {
        let config = RendezvousConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            port_span: 0,
            ..RendezvousConfig::default()
        };

        let result = RendezvousServer::bind(config).await;

        assert!(matches!(
            result,
            Err(ServerError::Config(ConfigError::EmptyPortRange))
        ));
    }

    #[tokio::test]
    async fn test_read_request_line_stops_at_newline() {
        let (mut client, mut server_side) = connected_pair().await;
        client.write_all(b"{\"name\":\"ana\"}\n").await.unwrap();

        let line = read_request_line(&mut server_side).await.unwrap();

        assert_eq!(line, "{\"name\":\"ana\"}\n");
    }
}
