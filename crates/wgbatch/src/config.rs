use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::keys;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/wgbatch/wgbatch.toml";

/// Contents of `wgbatch.toml`. Every table is optional; command line flags
/// fill in or override whatever the file leaves out.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub peers: Vec<StaticPeer>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Defaults {
    pub address: Option<String>,
    pub listen_port: Option<u16>,
    pub peer_allowed_ips: Option<String>,
    pub target_dir: Option<PathBuf>,
    pub peer_name: Option<String>,
    pub server_endpoint: Option<String>,
    pub peer_dns: Option<String>,
    pub endpoint_allowed_ips: Option<String>,
    pub peer_mtu: Option<u32>,
    pub peer_keepalive: Option<u32>,
    pub dashboard_url: Option<String>,
    pub dashboard_service: Option<String>,
}

/// Pauses around interface churn. The dashboard discovers interfaces with a
/// background scan whose interval is not documented, so these stay tunable.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timing {
    pub throttle_secs: u64,
    pub settle_secs: u64,
    pub restart_timeout_secs: u64,
    pub restart_grace_secs: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            throttle_secs: 3,
            settle_secs: 1,
            restart_timeout_secs: 15,
            restart_grace_secs: 2,
        }
    }
}

/// A peer appended verbatim to every generated interface, e.g. a site
/// router that all stations must accept.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StaticPeer {
    pub name: String,
    pub public_key: String,
    pub allowed_ips: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub keepalive: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("static peer {name}: {reason}")]
    InvalidPeer { name: String, reason: String },

    #[error("duplicate static peer public key: {0}")]
    DuplicatePeerKey(String),
}

pub async fn load(path: &Path) -> Result<FileConfig, ConfigError> {
    debug!(path = %path.display(), "loading config");

    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let config: FileConfig = toml::from_str(&contents)?;
            info!(
                path = %path.display(),
                static_peers = config.peers.len(),
                "loaded config"
            );
            for peer in &config.peers {
                debug!(peer = %peer.name, allowed_ips = %peer.allowed_ips, "registered static peer");
            }
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "config file not found, relying on command line flags");
            Ok(FileConfig::default())
        }
        Err(e) => Err(ConfigError::Read(e)),
    }
}

pub fn validate_static_peers(peers: &[StaticPeer]) -> Result<(), ConfigError> {
    for (i, peer) in peers.iter().enumerate() {
        let invalid = |reason: &str| ConfigError::InvalidPeer {
            name: peer.name.clone(),
            reason: reason.to_string(),
        };

        if peer.allowed_ips.trim().is_empty() {
            return Err(invalid("allowed_ips is required"));
        }
        if peer.public_key.trim().is_empty() {
            return Err(invalid("public_key is required"));
        }
        if let Err(e) = keys::decode_key(peer.public_key.trim()) {
            return Err(invalid(&e.to_string()));
        }
        if peers[..i].iter().any(|p| p.public_key == peer.public_key) {
            warn!(peer = %peer.name, "public key already used by another static peer");
            return Err(ConfigError::DuplicatePeerKey(peer.public_key.clone()));
        }
    }
    debug!(count = peers.len(), "static peers validated");
    Ok(())
}
