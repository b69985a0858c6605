//! Peer configuration and runtime state.
//!
//! Configs are parsed once at startup into an append-only table; runtime
//! peers reference their config by index. A peer holds at most two live
//! sessions: the freshest one and the one it replaced, which stays around
//! until the fresh session has proven liveness.

use std::net::SocketAddr;

use crate::config::PeerEntry;
use crate::curve::PublicKey;
use crate::method::MethodSession;
use crate::time::Timestamp;

/// Index into the engine's peer tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub usize);

/// How a peer's address is discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    /// Pinned address; handshakes match only from there.
    Static,
    /// The address may be anything; the key alone identifies the peer.
    Floating,
    /// A hostname re-resolved on demand.
    Dynamic,
}

/// Immutable per-peer configuration (except `enabled`, which is cleared when
/// the key turns out to be unusable).
pub struct PeerConfig {
    pub name: String,
    pub key: PublicKey,
    pub enabled: bool,
    pub mode: AddressMode,
    /// Pinned address for static peers.
    pub address: Option<SocketAddr>,
    pub hostname: Option<String>,
    pub port: u16,
}

impl PeerConfig {
    /// Build from a config entry. `own_key` disables entries that would make
    /// the daemon talk to itself.
    pub fn from_entry(entry: &PeerEntry, own_key: &PublicKey) -> Self {
        let mode = if entry.address.is_some() {
            AddressMode::Static
        } else if entry.hostname.is_some() {
            AddressMode::Dynamic
        } else {
            AddressMode::Floating
        };

        let key = match PublicKey::from_hex(&entry.key) {
            Some(key) => key,
            None => {
                if entry.key.is_empty() {
                    tracing::warn!(peer = %entry.name, "no key configured, disabling peer");
                } else {
                    tracing::warn!(peer = %entry.name, "invalid key configured, disabling peer");
                }
                return PeerConfig::disabled(entry, mode);
            }
        };

        if key.ct_eq(own_key) {
            tracing::info!(peer = %entry.name, "found own key, ignoring peer");
            return PeerConfig::disabled(entry, mode);
        }

        PeerConfig {
            name: entry.name.clone(),
            key,
            enabled: true,
            mode,
            address: entry.address,
            hostname: entry.hostname.clone(),
            port: entry.port.unwrap_or(0),
        }
    }

    fn disabled(entry: &PeerEntry, mode: AddressMode) -> Self {
        PeerConfig {
            name: entry.name.clone(),
            key: PublicKey::default(),
            enabled: false,
            mode,
            address: entry.address,
            hostname: entry.hostname.clone(),
            port: entry.port.unwrap_or(0),
        }
    }
}

/// One installed session plus its handshake bookkeeping.
#[derive(Default)]
pub struct ProtocolSession {
    pub method_state: Option<Box<dyn MethodSession>>,
    /// True once a packet decrypted under this session and the leftover
    /// handshake tasks were cancelled.
    pub handshakes_cleaned: bool,
    /// True once a rekey handshake has been scheduled for this session.
    pub refreshing: bool,
}

impl ProtocolSession {
    pub fn is_valid(&self, now: Timestamp) -> bool {
        self.method_state
            .as_ref()
            .map_or(false, |state| state.is_valid(now))
    }

    pub fn is_initiator(&self) -> bool {
        self.method_state
            .as_ref()
            .map_or(false, |state| state.is_initiator())
    }
}

/// Runtime state for one configured peer.
pub struct Peer {
    pub config: PeerId,
    /// Where the peer currently is. Pre-filled for static peers, discovered
    /// by resolution or by an authenticated handshake otherwise.
    pub address: Option<SocketAddr>,
    pub established: bool,
    pub last_seen: Timestamp,
    /// The freshest session.
    pub session: ProtocolSession,
    /// The session it replaced, accepted for decryption until the fresh one
    /// proves liveness.
    pub old_session: ProtocolSession,
}

impl Peer {
    pub fn new(config: PeerId, address: Option<SocketAddr>) -> Self {
        Peer {
            config,
            address,
            established: false,
            last_seen: Timestamp::ZERO,
            session: ProtocolSession::default(),
            old_session: ProtocolSession::default(),
        }
    }
}
