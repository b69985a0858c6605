//! Configuration for the ridge daemon.
//!
//! Loaded from a TOML file. The daemon's own secret key is the only mandatory
//! field; everything else has defaults tuned for a small site-to-site mesh.
//!
//! Peers declare how their address is discovered:
//!   - `address`            — static: pinned, handshakes only from there
//!   - `hostname` + `port`  — dynamic: re-resolved on demand
//!   - `float = true`       — floating: the address may be anything
//! A peer with no address information at all floats.

use std::net::SocketAddr;

use serde::Deserialize;

use crate::method::SessionTiming;

/// Largest usable reorder window (one 64-bit bitmap).
pub const REORDER_COUNT_MAX: u8 = 64;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Own identity secret key, hex. Mandatory.
    pub secret: String,

    /// UDP socket the daemon binds.
    pub bind: SocketAddr,

    /// Session lifetime, seconds.
    pub key_valid: u64,
    /// Rekey interval, seconds.
    pub key_refresh: u64,
    /// Random spread subtracted from the rekey interval, seconds.
    pub key_refresh_splay: u64,

    /// Maximum silence before reordered packets are dropped, milliseconds.
    pub reorder_time: u64,
    /// Reorder window size in packets, at most 64.
    pub reorder_count: u8,

    /// Keepalive interval, seconds.
    pub keepalive_interval: u64,

    pub peers: Vec<PeerEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PeerEntry {
    pub name: String,
    /// Peer identity public key, hex.
    pub key: String,
    /// Pinned address (static peer).
    pub address: Option<SocketAddr>,
    /// Re-resolvable hostname (dynamic peer).
    pub hostname: Option<String>,
    pub port: Option<u16>,
    /// Accept this peer from any address.
    pub float: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            secret: String::new(),
            bind: "0.0.0.0:6622".parse().expect("valid default bind"),
            key_valid: 3600,
            key_refresh: 3600,
            key_refresh_splay: 600,
            reorder_time: 10_000,
            reorder_count: 64,
            keepalive_interval: 10,
            peers: Vec::new(),
        }
    }
}

impl Config {
    /// Load and sanity-check a config file.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let mut config: Config =
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;

        if config.reorder_count > REORDER_COUNT_MAX {
            tracing::warn!(
                reorder_count = config.reorder_count,
                "reorder_count exceeds the window size, clamping to {REORDER_COUNT_MAX}"
            );
            config.reorder_count = REORDER_COUNT_MAX;
        }

        Ok(config)
    }

    /// The per-session timing knobs handed to the method.
    pub fn timing(&self) -> SessionTiming {
        SessionTiming {
            key_valid: self.key_valid,
            key_refresh: self.key_refresh,
            key_refresh_splay: self.key_refresh_splay,
            reorder_time: self.reorder_time,
            reorder_count: self.reorder_count,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(std::path::PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(std::path::PathBuf, toml::de::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
