//! The bulk cipher plug-in layer.
//!
//! A method turns the 32-byte session secret produced by the handshake into
//! an opaque per-session cipher state. The protocol engine only ever talks to
//! these two traits; the concrete cipher is selected out of band. Dropping a
//! session IS freeing it — implementations zeroize their key material on drop.

pub mod chacha;
pub mod common;

use crate::time::Timestamp;

/// Timing knobs a method applies to every session it creates.
#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    /// Session lifetime, seconds.
    pub key_valid: u64,
    /// Rekey is due after this many seconds (initiator side).
    pub key_refresh: u64,
    /// Random backoff subtracted from `key_refresh`, seconds. Desynchronises
    /// fleet-wide rekeys.
    pub key_refresh_splay: u64,
    /// Maximum silence before reordered packets are no longer accepted, ms.
    pub reorder_time: u64,
    /// Reorder window size in packets, at most 64.
    pub reorder_count: u8,
}

/// A bulk cipher. Produces sessions from handshake-derived secrets.
pub trait Method: Send + Sync {
    /// Install a fresh session keyed by `secret`. The initiator flag fixes
    /// the send-nonce parity for the session's lifetime.
    fn session_init(
        &self,
        secret: &[u8; 32],
        initiator: bool,
        now: Timestamp,
    ) -> Box<dyn MethodSession>;

    /// Header bytes the method prepends to every encrypted frame.
    fn min_encrypt_head_space(&self) -> usize;
}

/// An installed per-session cipher state.
pub trait MethodSession: Send {
    /// False once the session expired or its nonce space is exhausted.
    fn is_valid(&self, now: Timestamp) -> bool;

    fn is_initiator(&self) -> bool;

    /// True when initiator-side policy says a rekey is due.
    fn want_refresh(&self, now: Timestamp) -> bool;

    /// Encrypt one frame. `None` when the session can no longer send.
    /// Empty plaintext is legal and produces a keepalive frame.
    fn encrypt(&mut self, plaintext: &[u8]) -> Option<Vec<u8>>;

    /// Authenticate and decrypt one frame, enforcing the replay window.
    /// A failed decrypt mutates no state.
    fn decrypt(&mut self, frame: &[u8], now: Timestamp) -> Option<Vec<u8>>;
}
