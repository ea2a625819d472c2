//! Client side of the rendezvous service.
//!
//! One short-lived TCP connection per request: write a [`MatchRequest`] line,
//! then block until the server pairs us with someone and writes back a
//! [`ServerReply`] line.  The connection carries nothing else.

use std::net::SocketAddr;
use std::time::Duration;

use parlor_core::protocol::{
    decode_json_line, encode_json_line, MatchRequest, MatchResponse, ServerReply,
};
use parlor_core::ProtocolError;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

/// Error type for [`request_match`].
#[derive(Debug, Error)]
pub enum RendezvousError {
    #[error("cannot reach rendezvous server at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("rendezvous I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no match within {0:?}")]
    Timeout(Duration),

    #[error("malformed rendezvous reply: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("rendezvous server rejected the request: {0}")]
    Rejected(String),

    #[error("rendezvous server closed the connection without a reply")]
    Closed,
}

/// Asks the server at `server` to pair `name` with another waiting player.
///
/// Waits up to `wait` for the pairing reply.
///
/// # Errors
///
/// See [`RendezvousError`]; a timeout while waiting is
/// [`RendezvousError::Timeout`].
pub async fn request_match(
    server: SocketAddr,
    name: &str,
    wait: Duration,
) -> Result<MatchResponse, RendezvousError> {
    let mut stream = TcpStream::connect(server)
        .await
        .map_err(|source| RendezvousError::Connect { addr: server, source })?;

    let request = encode_json_line(&MatchRequest {
        name: name.to_string(),
    })?;
    stream.write_all(request.as_bytes()).await?;
    info!("waiting for a match from {server}");

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = timeout(wait, reader.read_line(&mut line))
        .await
        .map_err(|_| RendezvousError::Timeout(wait))??;
    if read == 0 {
        return Err(RendezvousError::Closed);
    }

    match decode_json_line::<ServerReply>(&line)? {
        ServerReply::Matched(response) => {
            debug!(
                "matched with {:?} at {}:{} as {}",
                response.peer_name, response.peer_ip, response.peer_port, response.role
            );
            Ok(response)
        }
        ServerReply::Rejected { error } => Err(RendezvousError::Rejected(error)),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_core::Role;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::net::TcpListener;

    /// One-shot fake server that reads the request and writes `reply`.
    async fn fake_server(reply: &'static str) -> (SocketAddr, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut request = String::new();
            reader.read_line(&mut request).await.unwrap();
            reader.get_mut().write_all(reply.as_bytes()).await.unwrap();
            request
        });
        (addr, task)
    }

    #[tokio::test]
    async fn test_request_match_returns_matched_reply() {
        // Arrange
        let (addr, server) = fake_server(
            "{\"role\":\"client\",\"peerName\":\"bo\",\"peerIp\":\"10.0.0.2\",\"peerPort\":5417}\n",
        )
        .await;

        // Act
        let response = request_match(addr, "ana", Duration::from_secs(2)).await.unwrap();

        // Assert
        assert_eq!(response.role, Role::Client);
        assert_eq!(response.peer_name, "bo");
        assert_eq!(response.peer_ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(response.peer_port, 5417);
        assert_eq!(server.await.unwrap(), "{\"name\":\"ana\"}\n");
    }

    #[tokio::test]
    async fn test_rejected_reply_becomes_error() {
        let (addr, _server) = fake_server("{\"error\":\"missing name\"}\n").await;

        let err = request_match(addr, "ana", Duration::from_secs(2)).await.unwrap_err();

        assert!(matches!(err, RendezvousError::Rejected(msg) if msg == "missing name"));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let err = request_match(addr, "ana", Duration::from_millis(200)).await.unwrap_err();

        assert!(matches!(err, RendezvousError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connect_error() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

        let err = request_match(addr, "ana", Duration::from_secs(1)).await.unwrap_err();

        assert!(matches!(err, RendezvousError::Connect { .. }));
    }
}
