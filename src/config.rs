//! Node settings
//!
//! Settings are read from an optional JSON file whose sections mirror the
//! dotted keys `chain.difficulty`, `chain.reset.enable`, `database.folder`,
//! `rest.port`, `websocket.port`, `peers.file`, `mining.autostart`,
//! `mining.minerId` and `mining.address`. Every field has a default, so an
//! empty object is a valid settings file.

use crate::core::DEFAULT_DIFFICULTY;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_REST_PORT: u16 = 8080;
pub const DEFAULT_WEBSOCKET_PORT: u16 = 8181;
pub const DEFAULT_DATABASE_FOLDER: &str = ".ashchain";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chain: ChainSettings,
    pub database: DatabaseSettings,
    pub rest: RestSettings,
    pub websocket: WebSocketSettings,
    pub peers: PeerSettings,
    pub mining: MiningSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    /// Difficulty of the first mined block
    pub difficulty: u32,
    pub reset: ResetSettings,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            reset: ResetSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetSettings {
    /// Adopt peer chains with a different genesis block
    pub enable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub folder: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            folder: PathBuf::from(DEFAULT_DATABASE_FOLDER),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestSettings {
    pub port: u16,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_REST_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketSettings {
    pub port: u16,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_WEBSOCKET_PORT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerSettings {
    /// File listing peer addresses, one per line
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MiningSettings {
    pub autostart: bool,
    /// Recorded in every mined block; random when unset
    pub miner_id: Option<String>,
    /// Receives coinbase rewards; a fresh key is generated when unset
    pub address: Option<String>,
}

impl Settings {
    /// Read settings from `path`, or use defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Peer addresses from the configured peers file
    pub fn peer_addresses(&self) -> Result<Vec<String>, ConfigError> {
        match &self.peers.file {
            Some(path) => load_peers(path),
            None => Ok(Vec::new()),
        }
    }
}

/// Read a peers file: one address per line, blank lines and `#` comments
/// ignored
pub fn load_peers(path: &Path) -> Result<Vec<String>, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Random identifier for a node that has none configured
pub fn random_miner_id() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}
