//! End-to-end session tests: two coordinators in one process talking over
//! loopback.
//!
//! Covered:
//! - Host/client handshake through `READY` on both sides.
//! - The host closes its listener once the guest is in.
//! - Game events in both directions after the handshake.
//! - Orderly leave: PEER_LEFT followed by a single disconnect.
//! - Full establishment through UDP broadcast discovery.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use parlor_core::{DiscoveredPeer, MovePayload, Role, RoleDecision, SessionState};
use parlor_node::application::{InboundEvent, SessionConfig, SessionCoordinator};
use parlor_node::infrastructure::network::{DiscoveryConfig, ManagerConfig, StrategyKind};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn free_tcp_port() -> u16 {
    let probe = std::net::TcpListener::bind((LOCALHOST, 0)).unwrap();
    probe.local_addr().unwrap().port()
}

fn free_udp_range(count: u16) -> u16 {
    for _ in 0..50 {
        let probe = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        let base = probe.local_addr().unwrap().port();
        drop(probe);
        if base > u16::MAX - count {
            continue;
        }
        if (base..base + count).all(|p| std::net::UdpSocket::bind(("0.0.0.0", p)).is_ok()) {
            return base;
        }
    }
    panic!("no free UDP range");
}

fn session_config(name: &str, p2p_port: u16) -> SessionConfig {
    SessionConfig {
        player_name: name.to_string(),
        p2p_port,
        search_window: Duration::from_millis(800),
        name_timeout: Duration::from_secs(3),
        start_timeout: Duration::from_secs(3),
        progress_interval: Duration::from_secs(1),
        settle_delay: Duration::from_millis(50),
        connect_attempts: 3,
        connect_backoff: Duration::from_millis(100),
        ..SessionConfig::default()
    }
}

fn loopback() -> ManagerConfig {
    ManagerConfig {
        bind_address: LOCALHOST,
        connect_timeout: Duration::from_secs(1),
        max_peers: None,
    }
}

fn coordinator(name: &str, p2p_port: u16, discovery: DiscoveryConfig) -> Arc<SessionCoordinator> {
    Arc::new(SessionCoordinator::new(
        session_config(name, p2p_port),
        discovery,
        loopback(),
    ))
}

async fn next_event(rx: &mut UnboundedReceiver<InboundEvent>) -> InboundEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event within 2s")
        .expect("event stream open")
}

/// Runs the handshake between a host named `ana` and a client named `bo`
/// using fixed role decisions, and returns both sessions in `READY`.
async fn ready_pair() -> (Arc<SessionCoordinator>, Arc<SessionCoordinator>) {
    let port = free_tcp_port();
    let host = coordinator("ana", port, DiscoveryConfig::default());
    let client = coordinator("bo", 0, DiscoveryConfig::default());

    let hosting = {
        let host = Arc::clone(&host);
        tokio::spawn(async move {
            host.establish_with_decision(RoleDecision {
                role: Role::Host,
                peer: None,
            })
            .await
        })
    };
    // Let the host bind before the client's first attempt.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let joining = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client
                .establish_with_decision(RoleDecision {
                    role: Role::Client,
                    peer: Some(DiscoveredPeer {
                        name: "ana".to_string(),
                        ip: LOCALHOST,
                        p2p_port: port,
                        timestamp: 0,
                    }),
                })
                .await
        })
    };

    let host_role = hosting.await.unwrap().expect("host establishes");
    assert_eq!(host_role, Role::Host);
    assert_eq!(host.state(), SessionState::Handshaking);
    host.release_client().await.expect("client released");

    let client_role = joining.await.unwrap().expect("client establishes");
    assert_eq!(client_role, Role::Client);
    (host, client)
}

// ── Handshake ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_host_and_client_reach_ready_with_names_exchanged() {
    // Arrange + Act
    let (host, client) = ready_pair().await;

    // Assert
    assert_eq!(host.state(), SessionState::Ready);
    assert_eq!(client.state(), SessionState::Ready);
    assert_eq!(host.role(), Role::Host);
    assert_eq!(client.role(), Role::Client);
    assert_eq!(host.remote_name().as_deref(), Some("bo"));
    assert_eq!(client.remote_name().as_deref(), Some("ana"));

    host.shutdown().await;
    client.shutdown().await;
}

#[tokio::test]
async fn test_host_stops_accepting_once_the_guest_has_greeted() {
    // Arrange
    let (host, client) = ready_pair().await;

    // Act
    let listening = host.listen_addr();

    // Assert: no listener for a third player, and the guest is still there.
    assert!(listening.is_none());
    assert_eq!(host.manager().active_connections().len(), 1);
    assert_eq!(client.manager().active_connections().len(), 1);

    host.shutdown().await;
    client.shutdown().await;
}

#[tokio::test]
async fn test_release_before_anyone_joined_is_rejected() {
    let host = coordinator("ana", free_tcp_port(), DiscoveryConfig::default());

    // Still DISCOVERING: nothing to release.
    let result = host.release_client().await;

    assert!(result.is_err());
    assert_eq!(host.state(), SessionState::Discovering);
}

// ── Game events ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_game_events_flow_both_ways() {
    // Arrange
    let (host, client) = ready_pair().await;
    let mut host_events = host.take_events().expect("host events");
    let mut client_events = client.take_events().expect("client events");

    // Act
    let host_channel = host.game_channel();
    let client_channel = client.game_channel();
    assert_eq!(host_channel.send_dice_roll(6).await, 1);
    assert_eq!(host_channel.send_move(0, 2, 6).await, 1);
    assert_eq!(client_channel.send_turn_change(1).await, 1);
    assert_eq!(client_channel.send_chat("nice roll").await, 1);

    // Assert: arrival order matches send order on each link.
    assert_eq!(
        next_event(&mut client_events).await,
        InboundEvent::DiceRolled {
            sender: "ana".to_string(),
            value: 6
        }
    );
    assert_eq!(
        next_event(&mut client_events).await,
        InboundEvent::Move {
            sender: "ana".to_string(),
            mv: MovePayload {
                player_id: 0,
                piece_id: 2,
                die: 6
            }
        }
    );
    assert_eq!(
        next_event(&mut host_events).await,
        InboundEvent::TurnChanged {
            sender: "bo".to_string(),
            next_player: 1
        }
    );
    assert_eq!(
        next_event(&mut host_events).await,
        InboundEvent::Chat {
            sender: "bo".to_string(),
            text: "nice roll".to_string()
        }
    );

    host.shutdown().await;
    client.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_announces_leave_then_disconnects() {
    // Arrange
    let (host, client) = ready_pair().await;
    let mut client_events = client.take_events().expect("client events");

    // Act
    host.shutdown().await;

    // Assert
    assert_eq!(
        next_event(&mut client_events).await,
        InboundEvent::PeerLeft {
            sender: "ana".to_string()
        }
    );
    assert_eq!(
        next_event(&mut client_events).await,
        InboundEvent::PeerDisconnected {
            remote_name: Some("ana".to_string())
        }
    );
    assert!(!client.game_channel().is_connected());
    assert_eq!(client.game_channel().send_chat("anyone?").await, 0);

    client.shutdown().await;
}

// ── Discovery end to end ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_two_nodes_find_each_other_by_broadcast_and_pair_up() {
    // Arrange: a private UDP range so parallel tests do not interfere.
    let base = free_udp_range(3);
    let discovery = DiscoveryConfig {
        strategy: StrategyKind::Broadcast,
        broadcast_port_base: base,
        broadcast_port_count: 3,
        search_interval: Duration::from_millis(100),
        ..DiscoveryConfig::default()
    };
    let ana = coordinator("ana", free_tcp_port(), discovery.clone());
    let bo = coordinator("bo", free_tcp_port(), discovery);

    // Act: both search concurrently; arbitration picks one host.
    let run = |node: Arc<SessionCoordinator>| {
        tokio::spawn(async move {
            let role = node.establish().await;
            (node, role)
        })
    };
    let ana_task = run(Arc::clone(&ana));
    let bo_task = run(Arc::clone(&bo));

    // The host's GREETING wait ends once the client has connected.
    let (host, client_task) = timeout(Duration::from_secs(5), async {
        loop {
            if ana.role() == Role::Host && ana.remote_name().is_some() {
                return (Arc::clone(&ana), bo_task);
            }
            if bo.role() == Role::Host && bo.remote_name().is_some() {
                return (Arc::clone(&bo), ana_task);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("one node hosts and sees its opponent");
    host.release_client().await.expect("client released");

    // Assert
    let (client, role) = client_task.await.unwrap();
    assert_eq!(role.expect("client establishes"), Role::Client);
    assert_eq!(client.state(), SessionState::Ready);
    assert_eq!(host.state(), SessionState::Ready);
    assert_eq!(host.remote_name().as_deref(), Some(client.identity().name.as_str()));
    assert_eq!(client.remote_name().as_deref(), Some(host.identity().name.as_str()));

    ana.shutdown().await;
    bo.shutdown().await;
}
