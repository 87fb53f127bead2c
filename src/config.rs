//! Server configuration module
//!
//! Every server role reads the same YAML file; each one only looks at the
//! fields it needs. Uses serde_yaml for parsing, with defaults supplied by
//! `#[serde(default = ...)]` functions.
//!
//! `WorldConfig` also travels on the wire: the login server encodes it into
//! the world-connect message and the world coordinator decodes it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ServerError;
use crate::network::dispatch::Backoff;
use crate::network::packet::{Packet, PacketIterator};

/// Channel ids travel as a signed byte, so a world holds at most this many.
pub const MAX_CHANNELS_LIMIT: u8 = 127;

/// Operational parameters of one world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldConfig {
    pub name: String,

    /// Ribbon shown next to the world name (0 = none, 1 = event, 2 = new, 3 = hot)
    #[serde(default)]
    pub ribbon: u8,

    #[serde(default = "default_max_channels")]
    pub max_channels: u8,

    #[serde(default = "default_max_players")]
    pub max_players: u32,

    #[serde(default = "default_rate")]
    pub exp_rate: u32,

    #[serde(default = "default_rate")]
    pub meso_rate: u32,

    #[serde(default = "default_rate")]
    pub drop_rate: u32,

    #[serde(default)]
    pub event_message: String,

    #[serde(default)]
    pub scrolling_header: String,
}

impl WorldConfig {
    /// A world with default parameters.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ribbon: 0,
            max_channels: default_max_channels(),
            max_players: default_max_players(),
            exp_rate: default_rate(),
            meso_rate: default_rate(),
            drop_rate: default_rate(),
            event_message: String::new(),
            scrolling_header: String::new(),
        }
    }

    pub fn encode(&self, p: &mut Packet) {
        p.encode_string(&self.name);
        p.encode1(self.ribbon);
        p.encode1(self.max_channels);
        p.encode4(self.max_players);
        p.encode4(self.exp_rate);
        p.encode4(self.meso_rate);
        p.encode4(self.drop_rate);
        p.encode_string(&self.event_message);
        p.encode_string(&self.scrolling_header);
    }

    pub fn decode(it: &mut PacketIterator<'_>) -> Result<Self, ServerError> {
        Ok(Self {
            name: it.decode_string()?,
            ribbon: it.decode1()?,
            max_channels: it.decode1()?,
            max_players: it.decode4()?,
            exp_rate: it.decode4()?,
            meso_rate: it.decode4()?,
            drop_rate: it.decode4()?,
            event_message: it.decode_string()?,
            scrolling_header: it.decode_string()?,
        })
    }
}

/// A world the login server can hand out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldDefinition {
    pub id: u8,

    /// Port the world coordinator accepts channel workers on.
    pub port: u16,

    #[serde(flatten)]
    pub config: WorldConfig,
}

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    // ============================================
    // Cluster
    // ============================================
    /// Shared secret every interserver peer must present
    pub interserver_secret: String,

    /// Address listeners bind to
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,

    /// Address reported to the login server for our channels.
    /// Falls back to the address the channel connected from.
    #[serde(default)]
    pub external_ip: Option<String>,

    // ============================================
    // Login Server
    // ============================================
    #[serde(default = "default_login_ip")]
    pub login_ip: String,

    #[serde(default = "default_login_interserver_port")]
    pub login_interserver_port: u16,

    /// Worlds handed out to world coordinators, lowest id first
    #[serde(default)]
    pub worlds: Vec<WorldDefinition>,

    // ============================================
    // World Server
    // ============================================
    /// Where channel workers dial their world coordinator
    #[serde(default = "default_world_ip")]
    pub world_ip: String,

    #[serde(default = "default_world_port")]
    pub world_port: u16,

    // ============================================
    // Reconnect
    // ============================================
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

// ============================================
// Default value functions
// ============================================

fn default_max_channels() -> u8 {
    20
}

fn default_max_players() -> u32 {
    1000
}

fn default_rate() -> u32 {
    1
}

fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_login_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_login_interserver_port() -> u16 {
    8485
}

fn default_world_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_world_port() -> u16 {
    8585
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ServerConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_str(contents: &str) -> Result<Self> {
        let config: ServerConfig = serde_yaml::from_str(contents)
            .context("Failed to parse YAML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.interserver_secret.is_empty(),
            "interserver_secret cannot be empty"
        );
        anyhow::ensure!(!self.login_ip.is_empty(), "login_ip cannot be empty");
        anyhow::ensure!(!self.world_ip.is_empty(), "world_ip cannot be empty");
        anyhow::ensure!(
            self.reconnect_initial_ms <= self.reconnect_max_ms,
            "reconnect_initial_ms ({}) exceeds reconnect_max_ms ({})",
            self.reconnect_initial_ms,
            self.reconnect_max_ms
        );

        let mut seen = HashSet::new();
        for world in &self.worlds {
            // -1 on the wire means "no world"
            anyhow::ensure!(world.id <= i8::MAX as u8, "world id {} out of range", world.id);
            anyhow::ensure!(seen.insert(world.id), "Duplicate world id: {}", world.id);
            anyhow::ensure!(world.port != 0, "world {} has port 0", world.id);
            anyhow::ensure!(
                (1..=MAX_CHANNELS_LIMIT).contains(&world.config.max_channels),
                "world {} max_channels must be 1..={} (got {})",
                world.id,
                MAX_CHANNELS_LIMIT,
                world.config.max_channels
            );
        }
        Ok(())
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(&self)
            .context("Failed to serialize config to YAML")?;
        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write config to {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn reconnect_backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.reconnect_initial_ms),
            Duration::from_millis(self.reconnect_max_ms),
        )
    }

    pub fn login_interserver_addr(&self) -> String {
        format!("{}:{}", self.login_ip, self.login_interserver_port)
    }

    pub fn world_addr(&self) -> String {
        format!("{}:{}", self.world_ip, self.world_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> &'static str {
        r#"
interserver_secret: "hunter2"
"#
    }

    #[test]
    fn test_stale_client_version_key_ignored() {
        let config = ServerConfig::from_str("interserver_secret: x\nclient_version: 62\n").unwrap();
        assert_eq!(config.interserver_secret, "x");
        assert!(!serde_yaml::to_string(&config).unwrap().contains("client_version"));
    }

    #[test]
    fn test_default_values() {
        let config = ServerConfig::from_str(minimal_config()).unwrap();
        assert_eq!(config.interserver_secret, "hunter2");
        assert_eq!(config.bind_ip, "0.0.0.0");
        assert_eq!(config.login_interserver_port, 8485);
        assert_eq!(config.world_port, 8585);
        assert_eq!(config.reconnect_initial_ms, 500);
        assert_eq!(config.reconnect_max_ms, 30_000);
        assert!(config.external_ip.is_none());
        assert!(config.worlds.is_empty());
        assert_eq!(config.login_interserver_addr(), "127.0.0.1:8485");
    }

    #[test]
    fn test_worlds_list() {
        let config_str = r#"
interserver_secret: "hunter2"
worlds:
  - id: 0
    port: 8585
    name: Scania
    ribbon: 2
    exp_rate: 3
  - id: 1
    port: 8600
    name: Bera
    max_channels: 5
    event_message: "Double drops!"
"#;
        let config = ServerConfig::from_str(config_str).unwrap();
        assert_eq!(config.worlds.len(), 2);
        assert_eq!(config.worlds[0].config.name, "Scania");
        assert_eq!(config.worlds[0].config.ribbon, 2);
        assert_eq!(config.worlds[0].config.exp_rate, 3);
        assert_eq!(config.worlds[0].config.max_channels, 20);
        assert_eq!(config.worlds[1].port, 8600);
        assert_eq!(config.worlds[1].config.max_channels, 5);
        assert_eq!(config.worlds[1].config.event_message, "Double drops!");
    }

    #[test]
    fn test_missing_secret() {
        let result = ServerConfig::from_str("login_ip: \"127.0.0.1\"\n");
        let err_msg = format!("{:?}", result.unwrap_err());
        assert!(err_msg.contains("interserver_secret") || err_msg.contains("missing field"));
    }

    #[test]
    fn test_empty_secret_rejected() {
        let err = ServerConfig::from_str("interserver_secret: \"\"\n").unwrap_err();
        assert!(format!("{}", err).contains("interserver_secret"));
    }

    #[test]
    fn test_duplicate_world_ids() {
        let config_str = r#"
interserver_secret: "x"
worlds:
  - { id: 0, port: 8585, name: A }
  - { id: 0, port: 8600, name: B }
"#;
        let err = ServerConfig::from_str(config_str).unwrap_err();
        assert!(format!("{}", err).contains("Duplicate world id"));
    }

    #[test]
    fn test_max_channels_bounds() {
        let config_str = r#"
interserver_secret: "x"
worlds:
  - { id: 0, port: 8585, name: A, max_channels: 0 }
"#;
        assert!(ServerConfig::from_str(config_str).is_err());
    }

    #[test]
    fn test_backoff_bounds() {
        let config_str = r#"
interserver_secret: "x"
reconnect_initial_ms: 5000
reconnect_max_ms: 100
"#;
        assert!(ServerConfig::from_str(config_str).is_err());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(ServerConfig::from_str("interserver_secret: [oops\n").is_err());
    }

    #[test]
    fn test_world_config_wire_roundtrip() {
        let mut conf = WorldConfig::named("Scania");
        conf.event_message = "Hello".to_string();
        conf.drop_rate = 2;

        let mut p = Packet::new_enciphered(0x1001);
        conf.encode(&mut p);
        let mut it = p.begin();
        it.decode2().unwrap();
        assert_eq!(WorldConfig::decode(&mut it).unwrap(), conf);
    }

    #[test]
    fn test_world_config_truncated() {
        let mut p = Packet::new_plain(0x1001);
        WorldConfig::named("Scania").encode(&mut p);
        let body = &p.body()[..p.body().len() - 3];
        let mut it = PacketIterator::new(body);
        it.decode2().unwrap();
        assert!(WorldConfig::decode(&mut it).unwrap_err().is_underflow());
    }

    #[test]
    fn test_save_and_load() {
        let config = ServerConfig::from_str(minimal_config()).unwrap();
        let temp_file = std::env::temp_dir().join("shardlink_test_save_config.yaml");
        config.save(&temp_file).unwrap();
        let loaded = ServerConfig::from_file(&temp_file).unwrap();
        assert_eq!(config.interserver_secret, loaded.interserver_secret);
        assert_eq!(config.world_port, loaded.world_port);
        std::fs::remove_file(temp_file).ok();
    }
}
