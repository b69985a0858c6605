//! Handshake wire format — the TLV record frames exchanged before a session
//! exists.
//!
//! These types ARE the protocol. Every record number and length is part of the
//! wire format; changing anything here is a breaking change.
//!
//! A datagram starts with a one-byte packet discriminator. Handshake payloads
//! then carry a `req_id` byte (copied from request into reply), two reserved
//! zero bytes, and a stream of records: 1-byte type, 2-byte little-endian
//! length, `length` value bytes.

use crate::curve::{PublicKey, KEY_BYTES};

/// Packet discriminators (datagram byte 0).
pub const PACKET_HANDSHAKE: u8 = 1;
pub const PACKET_DATA: u8 = 2;

/// Handshake message types carried in the [`RecordType::HandshakeType`] record.
pub const HANDSHAKE_REQUEST: u8 = 1;
pub const HANDSHAKE_REPLY: u8 = 2;
pub const HANDSHAKE_FINISH: u8 = 3;

/// TLV record types.
///
/// 0–5 is the generic record space; the key-exchange block occupies the
/// contiguous sub-range 16–20 so future generic records cannot collide
/// with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    HandshakeType = 0,
    ReplyCode = 1,
    ErrorDetail = 2,
    Flags = 3,
    Mode = 4,
    ProtocolName = 5,
    SenderKey = 16,
    RecipientKey = 17,
    SenderHandshakeKey = 18,
    RecipientHandshakeKey = 19,
    /// The HMAC authenticator `T`.
    Tag = 20,
}

/// One past the highest record type the parser retains.
const RECORD_SLOTS: usize = 21;

/// Reply codes carried in the [`RecordType::ReplyCode`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    Success = 0,
    MandatoryMissing = 1,
    UnacceptableValue = 2,
}

/// Tunnel modes carried in the [`RecordType::Mode`] record.
pub const MODE_TUN: u8 = 1;

// ── Building ──────────────────────────────────────────────────────────────────

/// Assembles a handshake payload (everything after the packet discriminator).
pub struct FrameBuilder {
    buf: Vec<u8>,
}

impl FrameBuilder {
    pub fn new(req_id: u8) -> Self {
        // req_id + two reserved zero bytes.
        FrameBuilder {
            buf: vec![req_id, 0, 0],
        }
    }

    pub fn add(&mut self, ty: RecordType, value: &[u8]) -> &mut Self {
        debug_assert!(value.len() <= u16::MAX as usize);
        self.buf.push(ty as u8);
        self.buf.extend_from_slice(&(value.len() as u16).to_le_bytes());
        self.buf.extend_from_slice(value);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// A parsed handshake payload. Borrowed views into the received datagram;
/// only the last occurrence of a repeated record type is retained.
pub struct Frame<'a> {
    pub req_id: u8,
    records: [Option<&'a [u8]>; RECORD_SLOTS],
}

impl<'a> Frame<'a> {
    /// Parse a handshake payload. `None` on truncated input, a non-zero
    /// reserved field, or a record running past the end of the datagram.
    pub fn parse(payload: &'a [u8]) -> Option<Frame<'a>> {
        if payload.len() < 3 || payload[1] != 0 || payload[2] != 0 {
            return None;
        }

        let mut records = [None; RECORD_SLOTS];
        let mut rest = &payload[3..];
        while !rest.is_empty() {
            if rest.len() < 3 {
                return None;
            }
            let ty = rest[0];
            let len = u16::from_le_bytes([rest[1], rest[2]]) as usize;
            rest = &rest[3..];
            if rest.len() < len {
                return None;
            }
            let (value, tail) = rest.split_at(len);
            // Unknown record types are skipped for forward compatibility.
            if let Some(slot) = records.get_mut(ty as usize) {
                *slot = Some(value);
            }
            rest = tail;
        }

        Some(Frame {
            req_id: payload[0],
            records,
        })
    }

    pub fn get(&self, ty: RecordType) -> Option<&'a [u8]> {
        self.records[ty as usize]
    }

    /// The record's value as a key, requiring the exact key length.
    pub fn get_key(&self, ty: RecordType) -> Option<PublicKey> {
        let value = self.get(ty)?;
        if value.len() != KEY_BYTES {
            return None;
        }
        let mut bytes = [0u8; KEY_BYTES];
        bytes.copy_from_slice(value);
        Some(PublicKey(bytes))
    }

    /// The handshake message type, if the record is present and well-formed.
    pub fn handshake_type(&self) -> Option<u8> {
        match self.get(RecordType::HandshakeType)? {
            [ty] => Some(*ty),
            _ => None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
