//! ChaCha20-Poly1305 bulk method.
//!
//! Wire format per data frame (after the packet discriminator):
//!
//!   [6-byte LE nonce] [ciphertext + 16-byte Poly1305 tag]
//!
//! The AEAD nonce is the 6-byte wire counter zero-padded to 12 bytes; the
//! counter never repeats within a session (the common state invalidates the
//! session before the counter could wrap), so nonce reuse cannot occur.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use super::common::{CommonState, NONCE_BYTES};
use super::{Method, MethodSession, SessionTiming};
use crate::time::Timestamp;

/// Poly1305 tag size.
const AEAD_TAG_BYTES: usize = 16;

pub struct ChaChaPoly {
    timing: SessionTiming,
}

impl ChaChaPoly {
    pub fn new(timing: SessionTiming) -> Self {
        ChaChaPoly { timing }
    }
}

impl Method for ChaChaPoly {
    fn session_init(
        &self,
        secret: &[u8; 32],
        initiator: bool,
        now: Timestamp,
    ) -> Box<dyn MethodSession> {
        Box::new(ChaChaPolySession {
            cipher: ChaCha20Poly1305::new(Key::from_slice(secret)),
            common: CommonState::new(&self.timing, initiator, now),
        })
    }

    fn min_encrypt_head_space(&self) -> usize {
        NONCE_BYTES
    }
}

struct ChaChaPolySession {
    cipher: ChaCha20Poly1305,
    common: CommonState,
}

fn aead_nonce(wire: &[u8; NONCE_BYTES]) -> Nonce {
    let mut full = [0u8; 12];
    full[..NONCE_BYTES].copy_from_slice(wire);
    *Nonce::from_slice(&full)
}

impl MethodSession for ChaChaPolySession {
    fn is_valid(&self, now: Timestamp) -> bool {
        self.common.is_valid(now)
    }

    fn is_initiator(&self) -> bool {
        self.common.is_initiator()
    }

    fn want_refresh(&self, now: Timestamp) -> bool {
        self.common.want_refresh(now)
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Option<Vec<u8>> {
        let wire_nonce = self.common.next_send_nonce()?;
        let ciphertext = self.cipher.encrypt(&aead_nonce(&wire_nonce), plaintext).ok()?;

        let mut frame = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        frame.extend_from_slice(&wire_nonce);
        frame.extend_from_slice(&ciphertext);
        Some(frame)
    }

    fn decrypt(&mut self, frame: &[u8], now: Timestamp) -> Option<Vec<u8>> {
        if frame.len() < NONCE_BYTES + AEAD_TAG_BYTES {
            return None;
        }
        let mut wire_nonce = [0u8; NONCE_BYTES];
        wire_nonce.copy_from_slice(&frame[..NONCE_BYTES]);

        let age = self.common.nonce_age(&wire_nonce, now)?;
        let plaintext = self
            .cipher
            .decrypt(&aead_nonce(&wire_nonce), &frame[NONCE_BYTES..])
            .ok()?;

        if !self.common.reorder_check(&wire_nonce, age, now) {
            return None;
        }
        Some(plaintext)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
