//! TOML-based configuration for a node.
//!
//! Reads `NodeConfig` from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Parlor\config.toml`
//! - Linux:    `~/.config/parlor/config.toml`
//! - macOS:    `~/Library/Application Support/Parlor/config.toml`
//!
//! or from an explicit path.  Every field has a default, so a missing file,
//! a missing section and a missing key all behave the same:
//!
//! ```toml
//! log_level = "info"
//!
//! [player]
//! name = "ana"
//!
//! [network]
//! p2p_port = 5000
//!
//! [discovery]
//! strategy = "broadcast"      # or "subnet-scan"
//! arbitration = "timestamp"   # or "name-hash"
//! search_secs = 5
//!
//! [rendezvous]
//! server = "192.168.1.10:9999"
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parlor_core::Arbitration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::application::session::SessionConfig;
use crate::infrastructure::network::discovery::{default_worker_count, DiscoveryConfig, StrategyKind};
use crate::infrastructure::network::ManagerConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level node configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub rendezvous: RendezvousSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerConfig {
    /// Display name.  Empty means "generate one at startup".
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// TCP port the host listens on for the session link.
    #[serde(default = "default_p2p_port")]
    pub p2p_port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySection {
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default)]
    pub arbitration: Arbitration,
    #[serde(default = "default_search_secs")]
    pub search_secs: u64,
    #[serde(default = "default_discovery_port")]
    pub scan_port: u16,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    /// Sweep worker count; `0` sizes the pool from available parallelism.
    #[serde(default)]
    pub max_workers: usize,
    #[serde(default = "default_true")]
    pub sweep_subnets: bool,
    #[serde(default)]
    pub extra_hosts: Vec<IpAddr>,
    #[serde(default = "default_discovery_port")]
    pub broadcast_port_base: u16,
    #[serde(default = "default_broadcast_port_count")]
    pub broadcast_port_count: u16,
    #[serde(default = "default_search_interval_ms")]
    pub search_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    #[serde(default = "default_name_timeout_secs")]
    pub name_timeout_secs: u64,
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RendezvousSection {
    /// `host:port` of a rendezvous server.  When set, LAN discovery is
    /// skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default = "default_rendezvous_wait_secs")]
    pub wait_secs: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_p2p_port() -> u16 {
    5000
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_search_secs() -> u64 {
    5
}
fn default_discovery_port() -> u16 {
    9999
}
fn default_probe_timeout_ms() -> u64 {
    500
}
fn default_reply_timeout_ms() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}
fn default_broadcast_port_count() -> u16 {
    5
}
fn default_search_interval_ms() -> u64 {
    500
}
fn default_name_timeout_secs() -> u64 {
    30
}
fn default_start_timeout_secs() -> u64 {
    60
}
fn default_progress_interval_secs() -> u64 {
    5
}
fn default_settle_delay_ms() -> u64 {
    1000
}
fn default_connect_attempts() -> u32 {
    3
}
fn default_connect_backoff_ms() -> u64 {
    2000
}
fn default_rendezvous_wait_secs() -> u64 {
    120
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            player: PlayerConfig::default(),
            network: NetworkConfig::default(),
            discovery: DiscoverySection::default(),
            session: SessionSection::default(),
            rendezvous: RendezvousSection::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            p2p_port: default_p2p_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            bind_address: default_bind_address(),
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            arbitration: Arbitration::default(),
            search_secs: default_search_secs(),
            scan_port: default_discovery_port(),
            probe_timeout_ms: default_probe_timeout_ms(),
            reply_timeout_ms: default_reply_timeout_ms(),
            max_workers: 0,
            sweep_subnets: default_true(),
            extra_hosts: Vec::new(),
            broadcast_port_base: default_discovery_port(),
            broadcast_port_count: default_broadcast_port_count(),
            search_interval_ms: default_search_interval_ms(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            name_timeout_secs: default_name_timeout_secs(),
            start_timeout_secs: default_start_timeout_secs(),
            progress_interval_secs: default_progress_interval_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            connect_attempts: default_connect_attempts(),
            connect_backoff_ms: default_connect_backoff_ms(),
        }
    }
}

impl Default for RendezvousSection {
    fn default() -> Self {
        Self {
            server: None,
            wait_secs: default_rendezvous_wait_secs(),
        }
    }
}

// ── Runtime conversions ───────────────────────────────────────────────────────

impl NodeConfig {
    /// The configured display name, or a generated `player-xxxxxx`.
    pub fn player_name(&self) -> String {
        let name = self.player.name.trim();
        if name.is_empty() {
            let id = Uuid::new_v4().simple().to_string();
            format!("player-{}", &id[..6])
        } else {
            name.to_string()
        }
    }

    /// Session timing and identity for `player_name`.
    pub fn session_config(&self, player_name: impl Into<String>) -> SessionConfig {
        let s = &self.session;
        SessionConfig {
            player_name: player_name.into(),
            p2p_port: self.network.p2p_port,
            search_window: Duration::from_secs(self.discovery.search_secs),
            arbitration: self.discovery.arbitration,
            name_timeout: Duration::from_secs(s.name_timeout_secs),
            start_timeout: Duration::from_secs(s.start_timeout_secs),
            progress_interval: Duration::from_secs(s.progress_interval_secs.max(1)),
            settle_delay: Duration::from_millis(s.settle_delay_ms),
            connect_attempts: s.connect_attempts.max(1),
            connect_backoff: Duration::from_millis(s.connect_backoff_ms),
            rendezvous_wait: Duration::from_secs(self.rendezvous.wait_secs),
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        let d = &self.discovery;
        DiscoveryConfig {
            strategy: d.strategy,
            scan_port: d.scan_port,
            probe_timeout: Duration::from_millis(d.probe_timeout_ms),
            reply_timeout: Duration::from_millis(d.reply_timeout_ms),
            max_workers: if d.max_workers == 0 {
                default_worker_count()
            } else {
                d.max_workers
            },
            sweep_subnets: d.sweep_subnets,
            extra_hosts: d.extra_hosts.clone(),
            broadcast_port_base: d.broadcast_port_base,
            broadcast_port_count: d.broadcast_port_count.max(1),
            search_interval: Duration::from_millis(d.search_interval_ms.max(50)),
        }
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBindAddress`] if `network.bind_address`
    /// is not an IP address.
    pub fn manager_config(&self) -> Result<ManagerConfig, ConfigError> {
        let bind_address = self
            .network
            .bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.network.bind_address.clone()))?;
        Ok(ManagerConfig {
            bind_address,
            connect_timeout: Duration::from_millis(self.network.connect_timeout_ms),
            ..ManagerConfig::default()
        })
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot
/// be determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(platform_config_dir()
        .ok_or(ConfigError::NoPlatformConfigDir)?
        .join("config.toml"))
}

/// Loads the config from the default location.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<NodeConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `NodeConfig` from `path`, returning `NodeConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<NodeConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(NodeConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &NodeConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Parlor"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("parlor"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Parlor")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("parlor_test_{}", Uuid::new_v4()))
            .join("config.toml")
    }

    #[test]
    fn test_default_config_has_expected_ports_and_timeouts() {
        // Arrange / Act
        let cfg = NodeConfig::default();

        // Assert
        assert_eq!(cfg.network.p2p_port, 5000);
        assert_eq!(cfg.discovery.scan_port, 9999);
        assert_eq!(cfg.discovery.broadcast_port_base, 9999);
        assert_eq!(cfg.session.name_timeout_secs, 30);
        assert_eq!(cfg.session.start_timeout_secs, 60);
        assert_eq!(cfg.session.connect_attempts, 3);
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.rendezvous.server.is_none());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: NodeConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, NodeConfig::default());
    }

    #[test]
    fn test_partial_section_overrides_only_given_keys() {
        // Arrange
        let toml_str = r#"
[discovery]
strategy = "subnet-scan"
arbitration = "name-hash"
search_secs = 8

[session]
connect_attempts = 5
"#;

        // Act
        let cfg: NodeConfig = toml::from_str(toml_str).unwrap();

        // Assert
        assert_eq!(cfg.discovery.strategy, StrategyKind::SubnetScan);
        assert_eq!(cfg.discovery.arbitration, Arbitration::NameHash);
        assert_eq!(cfg.discovery.search_secs, 8);
        assert_eq!(cfg.discovery.probe_timeout_ms, 500);
        assert_eq!(cfg.session.connect_attempts, 5);
        assert_eq!(cfg.session.connect_backoff_ms, 2000);
    }

    #[test]
    fn test_unknown_strategy_is_a_parse_error() {
        let result: Result<NodeConfig, _> = toml::from_str("[discovery]\nstrategy = \"mdns\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_player_name_generated_when_blank() {
        let cfg = NodeConfig::default();
        let name = cfg.player_name();
        assert!(name.starts_with("player-"));
        assert_eq!(name.len(), "player-".len() + 6);
    }

    #[test]
    fn test_player_name_trimmed_when_configured() {
        let mut cfg = NodeConfig::default();
        cfg.player.name = "  ana ".to_string();
        assert_eq!(cfg.player_name(), "ana");
    }

    #[test]
    fn test_session_config_conversion() {
        let mut cfg = NodeConfig::default();
        cfg.session.settle_delay_ms = 250;
        cfg.session.connect_attempts = 0;

        let session = cfg.session_config("ana");

        assert_eq!(session.player_name, "ana");
        assert_eq!(session.p2p_port, 5000);
        assert_eq!(session.search_window, Duration::from_secs(5));
        assert_eq!(session.name_timeout, Duration::from_secs(30));
        assert_eq!(session.settle_delay, Duration::from_millis(250));
        // At least one attempt is always made.
        assert_eq!(session.connect_attempts, 1);
    }

    #[test]
    fn test_discovery_config_auto_sizes_workers() {
        let cfg = NodeConfig::default();
        let d = cfg.discovery_config();
        assert_eq!(d.max_workers, default_worker_count());
        assert_eq!(d.probe_timeout, Duration::from_millis(500));
        assert_eq!(d.broadcast_port_count, 5);
    }

    #[test]
    fn test_manager_config_rejects_bad_bind_address() {
        let mut cfg = NodeConfig::default();
        cfg.network.bind_address = "not-an-ip".to_string();
        assert!(matches!(
            cfg.manager_config(),
            Err(ConfigError::InvalidBindAddress(_))
        ));
    }

    #[test]
    fn test_load_config_from_missing_file_returns_default() {
        let cfg = load_config_from(&temp_config_path()).unwrap();
        assert_eq!(cfg, NodeConfig::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        // Arrange
        let path = temp_config_path();
        let mut cfg = NodeConfig::default();
        cfg.player.name = "ana".to_string();
        cfg.rendezvous.server = Some("10.0.0.1:9999".to_string());
        cfg.discovery.extra_hosts = vec!["10.0.1.7".parse().unwrap()];

        // Act
        save_config_to(&path, &cfg).unwrap();
        let loaded = load_config_from(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("config.toml"), "got {path:?}");
        }
    }
}
