//! Configuration system for Tessera.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TESSERA_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/tessera/config.toml
//!   3. ~/.config/tessera/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::address::{Address, TransportType};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    pub network: NetworkConfig,
    pub peer_group: PeerGroupConfig,
    pub peer_group_manager: PeerGroupManagerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Transport this node's peer group runs on.
    pub transport: TransportType,
    /// Seed node addresses as `host:port`.
    pub seed_nodes: Vec<String>,
    /// Directory for the persisted peer store.
    pub data_dir: PathBuf,
}

/// Connection-count policy of the peer group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerGroupConfig {
    pub min_num_connected_peers: usize,
    pub min_num_outbound_connected_peers: usize,
    pub max_num_connected_peers: usize,
    pub min_num_reported_peers: usize,
}

/// Housekeeping policy of the peer group manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerGroupManagerConfig {
    /// Grace period during which a new connection is never evicted.
    pub bootstrap_time_in_seconds: u64,
    pub house_keeping_interval_in_seconds: u64,
    /// Upper bound for the initial peer exchange.
    pub timeout_in_seconds: u64,
    pub max_age_in_hours: u64,
    pub max_persisted: usize,
    pub max_reported: usize,
    pub max_seeds: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            transport: TransportType::Clear,
            seed_nodes: Vec::new(),
            data_dir: data_dir(),
        }
    }
}

impl Default for PeerGroupConfig {
    fn default() -> Self {
        Self {
            min_num_connected_peers: 8,
            min_num_outbound_connected_peers: 3,
            max_num_connected_peers: 12,
            min_num_reported_peers: 1,
        }
    }
}

impl Default for PeerGroupManagerConfig {
    fn default() -> Self {
        Self {
            bootstrap_time_in_seconds: 20,
            house_keeping_interval_in_seconds: 60,
            timeout_in_seconds: 120,
            max_age_in_hours: 2,
            max_persisted: 100,
            max_reported: 500,
            max_seeds: 4,
        }
    }
}

impl PeerGroupManagerConfig {
    pub fn bootstrap_time(&self) -> Duration {
        Duration::from_secs(self.bootstrap_time_in_seconds)
    }

    pub fn house_keeping_interval(&self) -> Duration {
        Duration::from_secs(self.house_keeping_interval_in_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_in_seconds)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_in_hours.saturating_mul(3_600))
    }
}

impl NetworkConfig {
    /// Parsed seed addresses. Malformed entries are returned as errors
    /// alongside the valid ones so the caller decides how loud to be.
    pub fn seed_addresses(&self) -> (Vec<Address>, Vec<(String, crate::AddressError)>) {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        for entry in &self.seed_nodes {
            match entry.parse::<Address>() {
                Ok(address) => valid.push(address),
                Err(e) => invalid.push((entry.clone(), e)),
            }
        }
        (valid, invalid)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("tessera")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("tessera")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TesseraConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            TesseraConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TESSERA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&TesseraConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply TESSERA_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `TESSERA_<SECTION>__<KEY>` overrides from `lookup`.
    /// Values that fail to parse are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn set<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
            target: &mut T,
        ) {
            if let Some(v) = lookup(key).and_then(|v| v.parse().ok()) {
                *target = v;
            }
        }

        if let Some(v) = lookup("TESSERA_NETWORK__TRANSPORT") {
            match v.to_ascii_lowercase().as_str() {
                "tor" => self.network.transport = TransportType::Tor,
                "i2p" => self.network.transport = TransportType::I2p,
                "clear" => self.network.transport = TransportType::Clear,
                _ => {}
            }
        }
        if let Some(v) = lookup("TESSERA_NETWORK__SEED_NODES") {
            self.network.seed_nodes = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("TESSERA_NETWORK__DATA_DIR") {
            self.network.data_dir = PathBuf::from(v);
        }

        let pg = &mut self.peer_group;
        set(&lookup, "TESSERA_PEER_GROUP__MIN_NUM_CONNECTED_PEERS", &mut pg.min_num_connected_peers);
        set(
            &lookup,
            "TESSERA_PEER_GROUP__MIN_NUM_OUTBOUND_CONNECTED_PEERS",
            &mut pg.min_num_outbound_connected_peers,
        );
        set(&lookup, "TESSERA_PEER_GROUP__MAX_NUM_CONNECTED_PEERS", &mut pg.max_num_connected_peers);
        set(&lookup, "TESSERA_PEER_GROUP__MIN_NUM_REPORTED_PEERS", &mut pg.min_num_reported_peers);

        let m = &mut self.peer_group_manager;
        set(&lookup, "TESSERA_PEER_GROUP_MANAGER__BOOTSTRAP_TIME_IN_SECONDS", &mut m.bootstrap_time_in_seconds);
        set(
            &lookup,
            "TESSERA_PEER_GROUP_MANAGER__HOUSE_KEEPING_INTERVAL_IN_SECONDS",
            &mut m.house_keeping_interval_in_seconds,
        );
        set(&lookup, "TESSERA_PEER_GROUP_MANAGER__TIMEOUT_IN_SECONDS", &mut m.timeout_in_seconds);
        set(&lookup, "TESSERA_PEER_GROUP_MANAGER__MAX_AGE_IN_HOURS", &mut m.max_age_in_hours);
        set(&lookup, "TESSERA_PEER_GROUP_MANAGER__MAX_PERSISTED", &mut m.max_persisted);
        set(&lookup, "TESSERA_PEER_GROUP_MANAGER__MAX_REPORTED", &mut m.max_reported);
        set(&lookup, "TESSERA_PEER_GROUP_MANAGER__MAX_SEEDS", &mut m.max_seeds);
    }
}
