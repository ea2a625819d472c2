//! Parlor console peer.
//!
//! Finds an opponent on the LAN (or through a rendezvous server), runs the
//! handshake, then turns stdin lines into game events:
//!
//! ```text
//! parlor-node [OPTIONS]
//!
//!   <text>            chat
//!   /move P F D       move piece F of player P by die value D
//!   /dice N           announce a dice roll
//!   /turn N           pass the turn to player N
//!   /peers            list open peer links
//!   /quit             leave the session
//! ```
//!
//! CLI flags override the config file, which overrides built-in defaults.
//! The log level comes from `RUST_LOG`, falling back to `log_level` in the
//! config file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parlor_core::{Arbitration, MovePayload, Role};
use parlor_node::application::{GameEventHandler, SessionCoordinator};
use parlor_node::infrastructure::network::StrategyKind;
use parlor_node::infrastructure::storage::config::{
    load_config, load_config_from, ConfigError, NodeConfig,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "parlor-node",
    about = "Find an opponent on the LAN and exchange game events",
    version
)]
struct Cli {
    /// Display name shown to the opponent.
    #[arg(long, env = "PARLOR_NAME")]
    name: Option<String>,

    /// TCP port to listen on when hosting.
    #[arg(long, env = "PARLOR_PORT")]
    port: Option<u16>,

    /// Config file path (defaults to the platform config directory).
    #[arg(long, env = "PARLOR_CONFIG")]
    config: Option<PathBuf>,

    /// Discovery strategy: `broadcast` or `subnet-scan`.
    #[arg(long)]
    strategy: Option<StrategyKind>,

    /// Role arbitration policy: `timestamp` or `name-hash`.
    #[arg(long)]
    arbitration: Option<Arbitration>,

    /// Rendezvous server `host:port`; skips LAN discovery.
    #[arg(long, env = "PARLOR_RENDEZVOUS")]
    rendezvous: Option<String>,

    /// How long to search the LAN, in seconds.
    #[arg(long)]
    search_secs: Option<u64>,
}

impl Cli {
    fn apply(self, config: &mut NodeConfig) {
        if let Some(name) = self.name {
            config.player.name = name;
        }
        if let Some(port) = self.port {
            config.network.p2p_port = port;
        }
        if let Some(strategy) = self.strategy {
            config.discovery.strategy = strategy;
        }
        if let Some(arbitration) = self.arbitration {
            config.discovery.arbitration = arbitration;
        }
        if let Some(server) = self.rendezvous {
            config.rendezvous.server = Some(server);
        }
        if let Some(secs) = self.search_secs {
            config.discovery.search_secs = secs;
        }
    }
}

fn load(cli_path: Option<&PathBuf>) -> anyhow::Result<NodeConfig> {
    match cli_path {
        Some(path) => load_config_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => match load_config() {
            Ok(config) => Ok(config),
            Err(ConfigError::NoPlatformConfigDir) => Ok(NodeConfig::default()),
            Err(e) => Err(e).context("failed to load config"),
        },
    }
}

// ── Console commands ──────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Chat(String),
    Move(MovePayload),
    Dice(u8),
    Turn(u32),
    Peers,
    Quit,
    Invalid(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Chat(line.to_string()));
    };

    let mut words = rest.split_whitespace();
    let command = match (words.next(), words.collect::<Vec<_>>().as_slice()) {
        (Some("move"), [player, piece, die]) => {
            match (player.parse(), piece.parse(), die.parse()) {
                (Ok(player_id), Ok(piece_id), Ok(die)) => Command::Move(MovePayload {
                    player_id,
                    piece_id,
                    die,
                }),
                _ => Command::Invalid("usage: /move <player> <piece> <die>".to_string()),
            }
        }
        (Some("dice"), [value]) => match value.parse() {
            Ok(v) => Command::Dice(v),
            Err(_) => Command::Invalid("usage: /dice <0-255>".to_string()),
        },
        (Some("turn"), [player]) => match player.parse() {
            Ok(p) => Command::Turn(p),
            Err(_) => Command::Invalid("usage: /turn <player>".to_string()),
        },
        (Some("peers"), []) => Command::Peers,
        (Some("quit"), []) => Command::Quit,
        _ => Command::Invalid(format!("unknown command: {line}")),
    };
    Some(command)
}

/// Prints inbound events and flags when the opponent is gone.
struct ConsolePrinter {
    gone: watch::Sender<bool>,
}

impl GameEventHandler for ConsolePrinter {
    fn on_move_received(&self, sender: &str, mv: MovePayload) {
        println!(
            "[{sender}] moves piece {} of player {} by {}",
            mv.piece_id, mv.player_id, mv.die
        );
    }

    fn on_turn_changed(&self, sender: &str, next_player: u32) {
        println!("[{sender}] turn passes to player {next_player}");
    }

    fn on_dice_rolled(&self, sender: &str, value: u8) {
        println!("[{sender}] rolled {value}");
    }

    fn on_chat_received(&self, sender: &str, text: &str) {
        println!("[{sender}] {text}");
    }

    fn on_peer_disconnected(&self, remote_name: Option<String>) {
        println!(
            "{} disconnected",
            remote_name.as_deref().unwrap_or("opponent")
        );
        let _ = self.gone.send(true);
    }

    fn on_peer_left(&self, sender: &str) {
        println!("{sender} left the game");
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load(cli.config.as_ref())?;
    cli.apply(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .init();

    let name = config.player_name();
    info!("parlor node {name:?} starting");

    let session = SessionCoordinator::new(
        config.session_config(name.as_str()),
        config.discovery_config(),
        config.manager_config()?,
    );

    let established = tokio::select! {
        result = establish(&session, config.rendezvous.server.as_deref()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted during establishment");
            session.shutdown().await;
            return Ok(());
        }
    };
    let role = match established {
        Ok(role) => role,
        Err(e) => {
            session.shutdown().await;
            return Err(e);
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    if role == Role::Host {
        println!(
            "{} joined. Press Enter to start.",
            session.remote_name().unwrap_or_default()
        );
        tokio::select! {
            _ = lines.next_line() => {}
            _ = tokio::signal::ctrl_c() => {
                session.shutdown().await;
                return Ok(());
            }
        }
        session.release_client().await?;
    }
    println!("Game on. Type to chat, /quit to leave.");

    let (gone_tx, mut gone) = watch::channel(false);
    let _pump = session.spawn_event_pump(Arc::new(ConsolePrinter { gone: gone_tx }));
    let channel = session.game_channel();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = gone.changed() => break,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(line) = line else { break };

        match parse_command(&line) {
            None => {}
            Some(Command::Chat(text)) => {
                channel.send_chat(&text).await;
            }
            Some(Command::Move(mv)) => {
                channel.send_move(mv.player_id, mv.piece_id, mv.die).await;
            }
            Some(Command::Dice(value)) => {
                channel.send_dice_roll(value).await;
            }
            Some(Command::Turn(player)) => {
                channel.send_turn_change(player).await;
            }
            Some(Command::Peers) => {
                for conn in session.manager().active_connections() {
                    println!(
                        "{} ({:?}) {}",
                        conn.remote_name().unwrap_or_else(|| "?".to_string()),
                        conn.direction(),
                        conn.remote_addr()
                    );
                }
            }
            Some(Command::Quit) => break,
            Some(Command::Invalid(msg)) => println!("{msg}"),
        }
    }

    session.shutdown().await;
    info!("parlor node stopped");
    Ok(())
}

async fn establish(session: &SessionCoordinator, rendezvous: Option<&str>) -> anyhow::Result<Role> {
    let Some(server) = rendezvous else {
        return Ok(session.establish().await?);
    };
    let addr = tokio::net::lookup_host(server)
        .await
        .with_context(|| format!("cannot resolve rendezvous server {server:?}"))?
        .next()
        .with_context(|| format!("rendezvous server {server:?} has no address"))?;
    match session.establish_via_rendezvous(addr).await {
        Ok(role) => Ok(role),
        Err(e) => {
            warn!("rendezvous establishment failed");
            Err(e.into())
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_chat() {
        assert_eq!(
            parse_command("  good luck "),
            Some(Command::Chat("good luck".to_string()))
        );
    }

    #[test]
    fn test_blank_line_is_ignored() {
        assert_eq!(parse_command("   "), None);
    }

    #[test]
    fn test_move_command_parses_three_numbers() {
        assert_eq!(
            parse_command("/move 1 2 6"),
            Some(Command::Move(MovePayload {
                player_id: 1,
                piece_id: 2,
                die: 6
            }))
        );
    }

    #[test]
    fn test_move_command_with_bad_number_is_invalid() {
        assert!(matches!(parse_command("/move 1 x 6"), Some(Command::Invalid(_))));
        assert!(matches!(parse_command("/move 1 2"), Some(Command::Invalid(_))));
    }

    #[test]
    fn test_scalar_commands() {
        assert_eq!(parse_command("/dice 4"), Some(Command::Dice(4)));
        assert_eq!(parse_command("/turn 3"), Some(Command::Turn(3)));
        assert_eq!(parse_command("/peers"), Some(Command::Peers));
        assert_eq!(parse_command("/quit"), Some(Command::Quit));
        assert!(matches!(parse_command("/dice 300"), Some(Command::Invalid(_))));
        assert!(matches!(parse_command("/dance"), Some(Command::Invalid(_))));
    }

    #[test]
    fn test_cli_overrides_config_values() {
        // Arrange
        let cli = Cli::parse_from([
            "parlor-node",
            "--name",
            "ana",
            "--port",
            "6000",
            "--strategy",
            "subnet-scan",
            "--arbitration",
            "name-hash",
            "--search-secs",
            "9",
        ]);
        let mut config = NodeConfig::default();

        // Act
        cli.apply(&mut config);

        // Assert
        assert_eq!(config.player.name, "ana");
        assert_eq!(config.network.p2p_port, 6000);
        assert_eq!(config.discovery.strategy, StrategyKind::SubnetScan);
        assert_eq!(config.discovery.arbitration, Arbitration::NameHash);
        assert_eq!(config.discovery.search_secs, 9);
    }

    #[test]
    fn test_cli_rejects_unknown_strategy() {
        let result = Cli::try_parse_from(["parlor-node", "--strategy", "mdns"]);
        assert!(result.is_err());
    }
}
