//! The three-message FHMQV-C handshake.
//!
//! Request:  A → B   carrying A and the ephemeral X
//! Reply:    B → A   carrying B, Y, X echoed, and the authenticator T_B
//! Finish:   A → B   carrying X, Y echoed, and the authenticator T_A
//!
//! With `d ‖ e = SHA-256(X ‖ Y ‖ A ‖ B)` (top bit of each half forced), the
//! responder computes `σ = (y + e·b) · (X + d·A)` and the initiator
//! `σ = (x + d·a) · (Y + e·B)`; both land on the same point. The MAC key is
//! `K = SHA-256(X ‖ Y ‖ A ‖ B ‖ σ)` and each side authenticates its own
//! identity-key/handshake-key pair under it. The session seed hashes the same
//! fields in establishment order, `SHA-256(A ‖ B ‖ X ‖ Y ‖ σ)`, so the seed
//! and the MAC key never coincide.

use std::net::SocketAddr;

use zeroize::Zeroizing;

use super::peer::{AddressMode, PeerId, ProtocolSession};
use super::{Engine, TaskScheduler, Transport};
use crate::curve::{
    hmac_sha256, hmac_sha256_verify, sha256, Point, PublicKey, Scalar, SecretKey, HASH_BYTES,
    TAG_BYTES,
};
use crate::records::{
    Frame, FrameBuilder, RecordType, ReplyCode, HANDSHAKE_FINISH, HANDSHAKE_REPLY,
    HANDSHAKE_REQUEST, MODE_TUN, PACKET_HANDSHAKE,
};
use crate::time::Timestamp;

pub(crate) const PROTOCOL_NAME: &[u8] = b"ec25519-fhmqvc";

/// Retry cadence for handshakes until a session is established.
const HANDSHAKE_RETRY_MS: u64 = 20_000;

/// Derive σ and the MAC key K from our side of the exchange.
///
/// `None` when a received key is not a valid curve point or when σ would be
/// the curve identity — both end the handshake silently.
fn fhmqv_secrets(
    initiator: bool,
    identity_secret: &SecretKey,
    handshake_secret: &SecretKey,
    x: &PublicKey,
    y: &PublicKey,
    a: &PublicKey,
    b: &PublicKey,
) -> Option<(Zeroizing<[u8; HASH_BYTES]>, Zeroizing<[u8; HASH_BYTES]>)> {
    let digest = sha256(&[x.as_bytes(), y.as_bytes(), a.as_bytes(), b.as_bytes()]);
    let d = Scalar::from_half_hash(&digest[..HASH_BYTES / 2]);
    let e = Scalar::from_half_hash(&digest[HASH_BYTES / 2..]);

    let (peer_identity, peer_handshake, own_coeff, peer_coeff) = if initiator {
        (b, y, &d, &e)
    } else {
        (a, x, &e, &d)
    };

    let s = handshake_secret
        .scalar()
        .add(&own_coeff.mult(&identity_secret.scalar()));
    let identity_point = Point::load(peer_identity)?;
    let handshake_point = Point::load(peer_handshake)?;
    let sigma = handshake_point.add(&identity_point.mult(peer_coeff)).mult(&s);
    if sigma.is_identity() {
        return None;
    }

    let sigma_bytes = Zeroizing::new(sigma.store().0);
    let mac_key = sha256(&[
        x.as_bytes(),
        y.as_bytes(),
        a.as_bytes(),
        b.as_bytes(),
        &*sigma_bytes,
    ]);
    Some((sigma_bytes, mac_key))
}

fn handshake_datagram(payload: Vec<u8>) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(1 + payload.len());
    datagram.push(PACKET_HANDSHAKE);
    datagram.extend_from_slice(&payload);
    datagram
}

impl Engine {
    /// Start (or retry) a handshake with a configured peer.
    pub fn handshake_init(
        &mut self,
        transport: &mut dyn Transport,
        tasks: &mut dyn TaskScheduler,
        id: PeerId,
        now: Timestamp,
    ) {
        if !self.peer_configs[id.0].enabled {
            return;
        }
        let peer_key = self.peer_configs[id.0].key;

        let Some(address) = self.peers[id.0].address else {
            tracing::debug!(peer = %self.peer_configs[id.0].name, "peer address unknown, resolving");
            transport.resolve_peer(id);
            tasks.schedule_handshake(id, HANDSHAKE_RETRY_MS);
            return;
        };

        self.pool.maintain(now);
        tracing::debug!(peer = %self.peer_configs[id.0].name, %address, "sending handshake");

        let mut builder = FrameBuilder::new(rand::random());
        builder
            .add(RecordType::HandshakeType, &[HANDSHAKE_REQUEST])
            .add(RecordType::Mode, &[MODE_TUN])
            .add(RecordType::ProtocolName, PROTOCOL_NAME)
            .add(RecordType::SenderKey, self.identity.public.as_bytes())
            .add(RecordType::RecipientKey, peer_key.as_bytes())
            .add(
                RecordType::SenderHandshakeKey,
                self.pool.current().public().as_bytes(),
            );
        transport.send_handshake(address, handshake_datagram(builder.finish()));

        // Retries run until the first packet decrypts under the session this
        // handshake produces; that cancels them.
        tasks.schedule_handshake(id, HANDSHAKE_RETRY_MS);
    }

    /// Process one inbound handshake frame (datagram payload after the
    /// discriminator byte). `hint` is the peer currently known at `address`.
    pub fn handshake_handle(
        &mut self,
        transport: &mut dyn Transport,
        tasks: &mut dyn TaskScheduler,
        address: SocketAddr,
        hint: Option<PeerId>,
        payload: &[u8],
        now: Timestamp,
    ) {
        self.pool.maintain(now);

        let Some(frame) = Frame::parse(payload) else {
            tracing::debug!(%address, "received malformed handshake");
            return;
        };
        if let Some(name) = frame.get(RecordType::ProtocolName) {
            if name != PROTOCOL_NAME {
                tracing::debug!(%address, "received handshake for wrong protocol");
                return;
            }
        }
        if let Some(mode) = frame.get(RecordType::Mode) {
            if mode != &[MODE_TUN][..] {
                tracing::debug!(%address, "received handshake with unacceptable mode");
                return;
            }
        }
        let Some(handshake_type) = frame.handshake_type() else {
            tracing::debug!(%address, "received handshake without type");
            return;
        };
        let Some(sender_key) = frame.get_key(RecordType::SenderKey) else {
            tracing::debug!(%address, "received handshake without sender key");
            return;
        };
        if sender_key.ct_eq(&self.identity.public) {
            tracing::debug!(%address, "received handshake with own key, dropping");
            return;
        }
        let Some(id) = self.match_sender_key(transport, address, hint, &sender_key) else {
            tracing::debug!(%address, "ignoring handshake (unknown key or unresolved host)");
            return;
        };

        match frame.get_key(RecordType::RecipientKey) {
            Some(key) if !key.ct_eq(&self.identity.public) => {
                tracing::debug!(%address, "received handshake with wrong recipient key");
                return;
            }
            Some(_) => {}
            None if handshake_type > HANDSHAKE_REQUEST => {
                tracing::debug!(%address, "received handshake reply without recipient key");
                return;
            }
            None => {}
        }

        let Some(sender_handshake_key) = frame.get_key(RecordType::SenderHandshakeKey) else {
            tracing::debug!(%address, "received handshake without sender handshake key");
            return;
        };

        match handshake_type {
            HANDSHAKE_REQUEST => {
                self.respond_handshake(transport, address, id, &sender_handshake_key, frame.req_id);
            }
            HANDSHAKE_REPLY | HANDSHAKE_FINISH => {
                let Some(recipient_handshake_key) =
                    frame.get_key(RecordType::RecipientHandshakeKey)
                else {
                    tracing::debug!(%address, "received handshake reply without recipient handshake key");
                    return;
                };
                let Some(tag) = frame
                    .get(RecordType::Tag)
                    .filter(|tag| tag.len() == TAG_BYTES)
                else {
                    tracing::debug!(%address, "received handshake reply without authenticator");
                    return;
                };

                // Only ever answer with a pool key that is still within its
                // validity window.
                let Some(key) = self.pool.find_valid(&recipient_handshake_key, now) else {
                    tracing::debug!(
                        %address,
                        "received handshake reply with unexpected recipient handshake key"
                    );
                    return;
                };
                let handshake_secret = key.secret().clone();
                let handshake_public = key.public();

                if handshake_type == HANDSHAKE_REPLY {
                    tracing::debug!(%address, "received handshake reply");
                    self.finish_handshake(
                        transport,
                        tasks,
                        address,
                        id,
                        &handshake_secret,
                        handshake_public,
                        &sender_handshake_key,
                        tag,
                        frame.req_id,
                        now,
                    );
                } else {
                    tracing::debug!(%address, "received handshake finish");
                    self.handle_finish_handshake(
                        transport,
                        tasks,
                        address,
                        id,
                        &handshake_secret,
                        handshake_public,
                        &sender_handshake_key,
                        tag,
                        now,
                    );
                }
            }
            other => {
                tracing::debug!(%address, handshake_type = other, "received handshake with unknown type");
            }
        }
    }

    /// Resolve which peer owns `sender_key`.
    fn match_sender_key(
        &mut self,
        transport: &mut dyn Transport,
        address: SocketAddr,
        hint: Option<PeerId>,
        sender_key: &PublicKey,
    ) -> Option<PeerId> {
        if let Some(id) = hint {
            let config = &self.peer_configs[id.0];
            if config.enabled && config.key.ct_eq(sender_key) {
                return Some(id);
            }
        }

        for (index, config) in self.peer_configs.iter().enumerate() {
            if !config.enabled {
                continue;
            }
            match config.mode {
                // Pinned peers only ever match through the address hint.
                AddressMode::Static => continue,
                AddressMode::Floating => {
                    if config.key.ct_eq(sender_key) {
                        return Some(PeerId(index));
                    }
                }
                AddressMode::Dynamic => {
                    if config.key.ct_eq(sender_key) {
                        if self.peers[index].address == Some(address) {
                            return Some(PeerId(index));
                        }
                        tracing::debug!(
                            peer = %config.name,
                            %address,
                            "handshake from unexpected address, re-resolving"
                        );
                        transport.resolve_peer(PeerId(index));
                        return None;
                    }
                }
            }
        }

        None
    }

    /// Responder side: answer a request with a reply carrying our
    /// authenticator.
    fn respond_handshake(
        &mut self,
        transport: &mut dyn Transport,
        address: SocketAddr,
        id: PeerId,
        peer_handshake_key: &PublicKey,
        req_id: u8,
    ) {
        tracing::debug!(%address, "responding to handshake");

        let handshake_secret = self.pool.current().secret().clone();
        let x = *peer_handshake_key;
        let y = self.pool.current().public();
        let a = self.peer_configs[id.0].key;
        let b = self.identity.public;

        let Some((_, mac_key)) =
            fhmqv_secrets(false, self.identity.secret(), &handshake_secret, &x, &y, &a, &b)
        else {
            tracing::debug!(%address, "handshake key exchange degenerated, dropping");
            return;
        };
        let tag = hmac_sha256(&mac_key, &[b.as_bytes(), y.as_bytes()]);

        let mut builder = FrameBuilder::new(req_id);
        builder
            .add(RecordType::HandshakeType, &[HANDSHAKE_REPLY])
            .add(RecordType::ReplyCode, &[ReplyCode::Success as u8])
            .add(RecordType::Mode, &[MODE_TUN])
            .add(RecordType::ProtocolName, PROTOCOL_NAME)
            .add(RecordType::SenderKey, b.as_bytes())
            .add(RecordType::RecipientKey, a.as_bytes())
            .add(RecordType::SenderHandshakeKey, y.as_bytes())
            .add(RecordType::RecipientHandshakeKey, x.as_bytes())
            .add(RecordType::Tag, &tag);
        transport.send_handshake(address, handshake_datagram(builder.finish()));
    }

    /// Initiator side: verify the responder's authenticator, send the finish
    /// message and establish the session.
    #[allow(clippy::too_many_arguments)]
    fn finish_handshake(
        &mut self,
        transport: &mut dyn Transport,
        tasks: &mut dyn TaskScheduler,
        address: SocketAddr,
        id: PeerId,
        handshake_secret: &SecretKey,
        handshake_public: PublicKey,
        peer_handshake_key: &PublicKey,
        tag: &[u8],
        req_id: u8,
        now: Timestamp,
    ) {
        tracing::debug!(%address, "finishing handshake");

        let x = handshake_public;
        let y = *peer_handshake_key;
        let a = self.identity.public;
        let b = self.peer_configs[id.0].key;

        let Some((sigma, mac_key)) =
            fhmqv_secrets(true, self.identity.secret(), handshake_secret, &x, &y, &a, &b)
        else {
            tracing::debug!(%address, "handshake key exchange degenerated, dropping");
            return;
        };

        if !hmac_sha256_verify(&mac_key, &[b.as_bytes(), y.as_bytes()], tag) {
            tracing::debug!(%address, "received invalid handshake response");
            return;
        }

        let own_tag = hmac_sha256(&mac_key, &[a.as_bytes(), x.as_bytes()]);
        let mut builder = FrameBuilder::new(req_id);
        builder
            .add(RecordType::HandshakeType, &[HANDSHAKE_FINISH])
            .add(RecordType::ReplyCode, &[ReplyCode::Success as u8])
            .add(RecordType::Mode, &[MODE_TUN])
            .add(RecordType::ProtocolName, PROTOCOL_NAME)
            .add(RecordType::SenderKey, a.as_bytes())
            .add(RecordType::RecipientKey, b.as_bytes())
            .add(RecordType::SenderHandshakeKey, x.as_bytes())
            .add(RecordType::RecipientHandshakeKey, y.as_bytes())
            .add(RecordType::Tag, &own_tag);
        transport.send_handshake(address, handshake_datagram(builder.finish()));

        self.establish(transport, tasks, id, address, true, &x, &y, &a, &b, &sigma, now);
    }

    /// Responder side: verify the initiator's authenticator and establish.
    #[allow(clippy::too_many_arguments)]
    fn handle_finish_handshake(
        &mut self,
        transport: &mut dyn Transport,
        tasks: &mut dyn TaskScheduler,
        address: SocketAddr,
        id: PeerId,
        handshake_secret: &SecretKey,
        handshake_public: PublicKey,
        peer_handshake_key: &PublicKey,
        tag: &[u8],
        now: Timestamp,
    ) {
        tracing::debug!(%address, "handling handshake finish");

        let x = *peer_handshake_key;
        let y = handshake_public;
        let a = self.peer_configs[id.0].key;
        let b = self.identity.public;

        let Some((sigma, mac_key)) =
            fhmqv_secrets(false, self.identity.secret(), handshake_secret, &x, &y, &a, &b)
        else {
            tracing::debug!(%address, "handshake key exchange degenerated, dropping");
            return;
        };

        if !hmac_sha256_verify(&mac_key, &[a.as_bytes(), x.as_bytes()], tag) {
            tracing::debug!(%address, "received invalid handshake finish");
            return;
        }

        self.establish(transport, tasks, id, address, false, &x, &y, &a, &b, &sigma, now);
    }

    /// Install the freshly negotiated session. Either everything below runs
    /// and the session is fully live, or nothing changed beforehand.
    #[allow(clippy::too_many_arguments)]
    fn establish(
        &mut self,
        transport: &mut dyn Transport,
        tasks: &mut dyn TaskScheduler,
        id: PeerId,
        address: SocketAddr,
        initiator: bool,
        x: &PublicKey,
        y: &PublicKey,
        a: &PublicKey,
        b: &PublicKey,
        sigma: &Zeroizing<[u8; HASH_BYTES]>,
        now: Timestamp,
    ) {
        let name = self.peer_configs[id.0].name.clone();
        tracing::info!(peer = %name, %address, "peer authorized");

        let secret = sha256(&[
            a.as_bytes(),
            b.as_bytes(),
            x.as_bytes(),
            y.as_bytes(),
            &**sigma,
        ]);
        let state = self.method.session_init(&secret, initiator, now);

        let keepalive_ms = self.keepalive_interval_ms;
        let peer = &mut self.peers[id.0];

        // Keep the superseded session around only if it is the sole proven
        // one; otherwise replace the fresh slot in place.
        if peer.session.is_valid(now) && !peer.old_session.is_valid(now) {
            peer.old_session = std::mem::take(&mut peer.session);
        } else {
            peer.session = ProtocolSession::default();
        }
        peer.session = ProtocolSession {
            method_state: Some(state),
            handshakes_cleaned: false,
            refreshing: false,
        };

        peer.last_seen = now;
        peer.address = Some(address);
        peer.established = true;

        tracing::info!(peer = %name, "new session established");
        tasks.schedule_keepalive(id, keepalive_ms);

        // The responder speaks first so the initiator learns the session is
        // live without waiting for payload.
        if !initiator {
            self.send(transport, tasks, id, &[], now);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
