//! The session core: handshake-key pool, peer table, FHMQV-C handshake and
//! the encrypted data path.
//!
//! [`Engine`] is the explicit protocol context threaded through every
//! operation. It is synchronous and single-threaded: each entry point runs to
//! completion against one `now` snapshot, and all side effects go through the
//! [`Transport`] and [`TaskScheduler`] collaborators the caller passes in.
//! The daemon wires those to a UDP socket and a timer queue; tests wire them
//! to mocks.

mod handshake;
mod peer;
mod pool;

pub use peer::{AddressMode, Peer, PeerConfig, PeerId, ProtocolSession};
pub use pool::{HandshakeKey, HandshakePool};

use std::net::SocketAddr;

use crate::config::Config;
use crate::curve::{Keypair, PublicKey, SecretKey};
use crate::method::Method;
use crate::records::PACKET_DATA;
use crate::time::Timestamp;

/// Delivers frames and address lookups. Implemented over UDP by the daemon.
pub trait Transport {
    /// Send a handshake datagram.
    fn send_handshake(&mut self, address: SocketAddr, datagram: Vec<u8>);

    /// Send a data datagram.
    fn send(&mut self, address: SocketAddr, datagram: Vec<u8>);

    /// Kick off hostname resolution for a dynamic peer. Completion is
    /// reported back through [`Engine::peer_resolved`].
    fn resolve_peer(&mut self, peer: PeerId);

    /// Deliver decrypted plaintext to the datapath.
    fn handle_receive(&mut self, peer: PeerId, plaintext: Vec<u8>);
}

/// Fires timers back into the engine. Implemented by the daemon's task queue.
pub trait TaskScheduler {
    fn schedule_handshake(&mut self, peer: PeerId, delay_ms: u64);
    fn delete_peer_handshakes(&mut self, peer: PeerId);
    fn schedule_keepalive(&mut self, peer: PeerId, delay_ms: u64);
    fn delete_peer_keepalives(&mut self, peer: PeerId);
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("no secret key configured")]
    MissingSecret,
    #[error("invalid secret key")]
    InvalidSecret,
}

/// The protocol context. Owns the identity, the peer tables, the ephemeral
/// handshake-key pool and the method driving the bulk cipher.
pub struct Engine {
    identity: Keypair,
    method: Box<dyn Method>,
    keepalive_interval_ms: u64,
    peer_configs: Vec<PeerConfig>,
    peers: Vec<Peer>,
    pool: HandshakePool,
}

impl Engine {
    pub fn new(config: &Config, method: Box<dyn Method>) -> Result<Self, StartupError> {
        if config.secret.is_empty() {
            return Err(StartupError::MissingSecret);
        }
        let secret = SecretKey::from_hex(&config.secret).ok_or(StartupError::InvalidSecret)?;
        let identity = Keypair::from_secret(secret);

        let peer_configs: Vec<PeerConfig> = config
            .peers
            .iter()
            .map(|entry| PeerConfig::from_entry(entry, &identity.public))
            .collect();
        let peers = peer_configs
            .iter()
            .enumerate()
            .map(|(index, config)| {
                // Static peers start out at their pinned address; everyone
                // else is located by resolution or an inbound handshake.
                let address = match config.mode {
                    AddressMode::Static => config.address,
                    _ => None,
                };
                Peer::new(PeerId(index), address)
            })
            .collect();

        Ok(Engine {
            identity,
            method,
            keepalive_interval_ms: config.keepalive_interval * 1000,
            peer_configs,
            peers,
            pool: HandshakePool::default(),
        })
    }

    pub fn identity_public(&self) -> PublicKey {
        self.identity.public
    }

    pub fn peer_ids(&self) -> impl Iterator<Item = PeerId> {
        (0..self.peers.len()).map(PeerId)
    }

    pub fn peer_config(&self, id: PeerId) -> &PeerConfig {
        &self.peer_configs[id.0]
    }

    pub fn peer_address(&self, id: PeerId) -> Option<SocketAddr> {
        self.peers[id.0].address
    }

    pub fn peer_established(&self, id: PeerId) -> bool {
        self.peers[id.0].established
    }

    /// The peer currently located at `address`, used as the handshake hint
    /// and for data-frame demultiplexing.
    pub fn find_peer_by_address(&self, address: SocketAddr) -> Option<PeerId> {
        self.peers
            .iter()
            .position(|peer| peer.address == Some(address))
            .map(PeerId)
    }

    /// Queue an initial handshake for every enabled peer.
    pub fn schedule_initial_handshakes(&self, tasks: &mut dyn TaskScheduler) {
        for id in self.peer_ids() {
            if self.peer_configs[id.0].enabled {
                tasks.schedule_handshake(id, 0);
            }
        }
    }

    /// Resolver completion for a dynamic peer.
    pub fn peer_resolved(
        &mut self,
        tasks: &mut dyn TaskScheduler,
        id: PeerId,
        result: Option<SocketAddr>,
    ) {
        let name = &self.peer_configs[id.0].name;
        let peer = &mut self.peers[id.0];
        match result {
            Some(address) => {
                if peer.address != Some(address) {
                    tracing::info!(peer = %name, %address, "peer address resolved");
                    peer.address = Some(address);
                }
                if !peer.established {
                    tasks.schedule_handshake(id, 0);
                }
            }
            None => tracing::warn!(peer = %name, "hostname resolution failed"),
        }
    }

    // ── Data path ─────────────────────────────────────────────────────────────

    /// Encrypt and transmit one payload. Empty payloads are keepalives.
    pub fn send(
        &mut self,
        transport: &mut dyn Transport,
        tasks: &mut dyn TaskScheduler,
        id: PeerId,
        plaintext: &[u8],
        now: Timestamp,
    ) {
        if !self.peers[id.0].session.is_valid(now) {
            return;
        }
        self.check_session_refresh(tasks, id, now);

        let keepalive_ms = self.keepalive_interval_ms;
        let name = &self.peer_configs[id.0].name;
        let peer = &mut self.peers[id.0];
        let Some(address) = peer.address else {
            return;
        };

        // Until the peer proves it switched, keep sending under the session
        // we know it accepts.
        let session = if peer.session.is_initiator() && peer.old_session.is_valid(now) {
            tracing::debug!(peer = %name, "sending packet for old session");
            &mut peer.old_session
        } else {
            &mut peer.session
        };
        let Some(state) = session.method_state.as_mut() else {
            return;
        };
        let Some(frame) = state.encrypt(plaintext) else {
            return;
        };

        let mut datagram = Vec::with_capacity(1 + frame.len());
        datagram.push(PACKET_DATA);
        datagram.extend_from_slice(&frame);
        transport.send(address, datagram);

        tasks.delete_peer_keepalives(id);
        tasks.schedule_keepalive(id, keepalive_ms);
    }

    /// Process one inbound data frame (datagram payload after the
    /// discriminator byte).
    pub fn handle_recv(
        &mut self,
        transport: &mut dyn Transport,
        tasks: &mut dyn TaskScheduler,
        id: PeerId,
        frame: &[u8],
        now: Timestamp,
    ) {
        let name = self.peer_configs[id.0].name.clone();
        let peer = &mut self.peers[id.0];

        if !peer.established || !peer.session.is_valid(now) {
            tracing::debug!(peer = %name, "unexpected data packet, scheduling handshake");
            tasks.schedule_handshake(id, 0);
            return;
        }

        let mut plaintext = None;
        if peer.old_session.is_valid(now) {
            if let Some(state) = peer.old_session.method_state.as_mut() {
                plaintext = state.decrypt(frame, now);
            }
        }

        let mut fresh_session = false;
        let mut announce_switch = false;
        if plaintext.is_none() {
            if let Some(state) = peer.session.method_state.as_mut() {
                if let Some(decrypted) = state.decrypt(frame, now) {
                    plaintext = Some(decrypted);
                    fresh_session = true;

                    if !peer.session.handshakes_cleaned {
                        tracing::debug!(peer = %name, "cleaning left handshakes");
                        tasks.delete_peer_handshakes(id);
                        peer.session.handshakes_cleaned = true;
                        if peer.session.is_initiator() {
                            announce_switch = true;
                        }
                    }
                    if peer.old_session.method_state.is_some() {
                        tracing::debug!(peer = %name, "invalidating old session");
                        peer.old_session = ProtocolSession::default();
                    }
                }
            }
        }

        let Some(plaintext) = plaintext else {
            tracing::debug!(peer = %name, "verification failed for received packet");
            return;
        };

        if announce_switch {
            // Tell the peer the fresh session is live.
            self.send(transport, tasks, id, &[], now);
        }
        if fresh_session {
            self.check_session_refresh(tasks, id, now);
        }

        self.peers[id.0].last_seen = now;

        if !plaintext.is_empty() {
            transport.handle_receive(id, plaintext);
        }
    }

    /// Kick off a rekey once the method says one is due. Only ever initiated
    /// by the side that initiated the current session.
    fn check_session_refresh(&mut self, tasks: &mut dyn TaskScheduler, id: PeerId, now: Timestamp) {
        let name = &self.peer_configs[id.0].name;
        let session = &mut self.peers[id.0].session;
        let refresh_due = session.is_initiator()
            && session
                .method_state
                .as_ref()
                .is_some_and(|state| state.want_refresh(now));
        if !session.refreshing && refresh_due {
            tracing::debug!(peer = %name, "refreshing session");
            session.refreshing = true;
            tasks.schedule_handshake(id, 0);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
