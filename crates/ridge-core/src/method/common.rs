//! Nonce and replay bookkeeping shared by every method.
//!
//! The nonce is a 6-byte little-endian counter whose lowest bit encodes the
//! sender's role: a responder sends even nonces starting at 2, an initiator
//! sends odd nonces starting at 3, and both advance by 2 per packet so the
//! parity never changes. The receive side tracks the highest accepted nonce
//! plus a 64-bit bitmap of which older nonces inside the reorder window have
//! already been seen.
//!
//! Validation is split in two on purpose: [`CommonState::nonce_age`] is a
//! cheap pre-authentication filter, [`CommonState::reorder_check`] is the
//! authoritative update run only after the frame authenticated. A frame that
//! fails to decrypt must leave both counters and the bitmap untouched.

use rand::Rng;

use super::SessionTiming;
use crate::time::Timestamp;

/// Wire size of the nonce header.
pub const NONCE_BYTES: usize = 6;

pub struct CommonState {
    initiator: bool,
    valid_till: Timestamp,
    refresh_after: Timestamp,
    send_nonce: [u8; NONCE_BYTES],
    send_exhausted: bool,
    receive_nonce: [u8; NONCE_BYTES],
    receive_last: Timestamp,
    reorder_seen: u64,
    reorder_time: u64,
    reorder_count: u8,
}

impl CommonState {
    pub fn new(timing: &SessionTiming, initiator: bool, now: Timestamp) -> Self {
        let mut send_nonce = [0u8; NONCE_BYTES];
        let mut receive_nonce = [0u8; NONCE_BYTES];
        if initiator {
            send_nonce[0] = 3;
        } else {
            send_nonce[0] = 2;
            receive_nonce[0] = 1;
        }

        let splay = if timing.key_refresh_splay > 0 {
            rand::thread_rng().gen_range(0..timing.key_refresh_splay)
        } else {
            0
        };

        CommonState {
            initiator,
            valid_till: now.add_secs(timing.key_valid),
            refresh_after: now.add_secs(timing.key_refresh.saturating_sub(splay)),
            send_nonce,
            send_exhausted: false,
            receive_nonce,
            receive_last: Timestamp::ZERO,
            reorder_seen: 0,
            reorder_time: timing.reorder_time,
            reorder_count: timing.reorder_count.min(64),
        }
    }

    pub fn is_valid(&self, now: Timestamp) -> bool {
        !self.send_exhausted && now < self.valid_till
    }

    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    pub fn want_refresh(&self, now: Timestamp) -> bool {
        now >= self.refresh_after
    }

    /// Take the next send nonce and advance the counter by 2, carrying
    /// through all bytes. `None` once the counter space is used up.
    pub fn next_send_nonce(&mut self) -> Option<[u8; NONCE_BYTES]> {
        if self.send_exhausted {
            return None;
        }
        let nonce = self.send_nonce;

        let mut carry = 2u16;
        for byte in self.send_nonce.iter_mut() {
            let sum = *byte as u16 + carry;
            *byte = sum as u8;
            carry = sum >> 8;
            if carry == 0 {
                break;
            }
        }
        if carry != 0 {
            self.send_exhausted = true;
        }

        Some(nonce)
    }

    /// Pre-authentication nonce filter.
    ///
    /// Returns the nonce's age in packets relative to the highest accepted
    /// nonce (negative = a new maximum), or `None` when the nonce cannot be
    /// accepted: wrong parity, older than the reorder window, or the last
    /// in-order reception is more than `reorder_time` ms in the past.
    pub fn nonce_age(&self, nonce: &[u8; NONCE_BYTES], now: Timestamp) -> Option<i64> {
        if nonce[0] & 1 != self.receive_nonce[0] & 1 {
            return None;
        }

        let mut age: i64 = 0;
        for i in (0..NONCE_BYTES).rev() {
            age = age * 256 + (self.receive_nonce[i] as i64 - nonce[i] as i64);
        }
        age /= 2;

        if age >= 0 {
            if now.millis_since(self.receive_last) > self.reorder_time {
                return None;
            }
            if age > self.reorder_count as i64 {
                return None;
            }
        }

        Some(age)
    }

    /// Authoritative post-authentication update.
    ///
    /// `age` must come from a [`Self::nonce_age`] call on the same nonce.
    /// Returns false on duplicates; true means the packet is fresh and the
    /// window has been updated.
    pub fn reorder_check(&mut self, nonce: &[u8; NONCE_BYTES], age: i64, now: Timestamp) -> bool {
        if age < 0 {
            // New maximum: existing bits move away from the maximum, then the
            // prior maximum's displaced position is recorded.
            let shift = age.unsigned_abs();
            self.reorder_seen = if shift >= 64 {
                0
            } else {
                self.reorder_seen << shift
            };
            if shift <= 64 {
                self.reorder_seen |= 1u64 << (shift - 1);
            }
            self.receive_nonce = *nonce;
            self.receive_last = now;
            true
        } else if age == 0 || self.reorder_seen & (1u64 << (age - 1)) != 0 {
            tracing::debug!(age, "dropping duplicate packet");
            false
        } else {
            tracing::trace!(age, "accepting reordered packet");
            self.reorder_seen |= 1u64 << (age - 1);
            true
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
