//! Process-wide ephemeral handshake keys.
//!
//! One keypair is preferred for initiating handshakes; the one it replaced is
//! still accepted on incoming replies until it expires. The gap between the
//! two deadlines is the window in which a peer may still answer a handshake
//! we started under the previous key.

use crate::curve::{Keypair, PublicKey, SecretKey};
use crate::time::Timestamp;

/// How long a fresh key is used to initiate handshakes.
const PREFERRED_SECS: u64 = 15;
/// How long a key is accepted on incoming handshake replies.
const VALID_SECS: u64 = 30;

pub struct HandshakeKey {
    keys: Keypair,
    preferred_till: Timestamp,
    valid_till: Timestamp,
}

impl HandshakeKey {
    fn generate(now: Timestamp) -> Self {
        HandshakeKey {
            keys: Keypair::generate(),
            preferred_till: now.add_secs(PREFERRED_SECS),
            valid_till: now.add_secs(VALID_SECS),
        }
    }

    pub fn public(&self) -> PublicKey {
        self.keys.public
    }

    pub fn secret(&self) -> &SecretKey {
        self.keys.secret()
    }

    pub fn is_valid(&self, now: Timestamp) -> bool {
        now < self.valid_till
    }

    fn is_preferred(&self, now: Timestamp) -> bool {
        now < self.preferred_till
    }
}

#[derive(Default)]
pub struct HandshakePool {
    current: Option<HandshakeKey>,
    previous: Option<HandshakeKey>,
}

impl HandshakePool {
    /// Run at every handshake entry point: rotate in a fresh keypair once the
    /// current one is no longer preferred.
    pub fn maintain(&mut self, now: Timestamp) {
        let fresh_needed = match &self.current {
            Some(key) => !key.is_preferred(now),
            None => true,
        };
        if fresh_needed {
            tracing::debug!("generating new handshake key");
            self.previous = self.current.take();
            self.current = Some(HandshakeKey::generate(now));
        }
    }

    /// The key used for outgoing handshakes. Callers run [`Self::maintain`]
    /// first, so a preferred key always exists.
    pub fn current(&self) -> &HandshakeKey {
        self.current.as_ref().expect("maintain() ran before use")
    }

    /// Find the still-valid pool key a peer echoed back to us, if any.
    pub fn find_valid(&self, public: &PublicKey, now: Timestamp) -> Option<&HandshakeKey> {
        [self.current.as_ref(), self.previous.as_ref()]
            .into_iter()
            .flatten()
            .find(|key| key.is_valid(now) && key.public().ct_eq(public))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
