//! Cryptographic primitives for ridge.
//!
//! Provides the narrow interface the handshake is written against:
//!   1. Curve25519 scalar/point arithmetic (curve25519-dalek underneath)
//!   2. SHA-256 over concatenated 32-byte protocol fields
//!   3. HMAC-SHA-256 authenticator tags
//!
//! The handshake needs point addition and scalar arithmetic modulo the group
//! order, so this is Edwards arithmetic rather than the X25519 Montgomery
//! ladder. Nothing outside this module touches dalek types.
//!
//! All secret material derives ZeroizeOnDrop or lives in `Zeroizing` buffers —
//! wiped from memory when dropped. There is no unsafe code in this module.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar as DalekScalar;
use curve25519_dalek::traits::IsIdentity;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Identity, handshake and session keys are all 32 bytes.
pub const KEY_BYTES: usize = 32;

/// SHA-256 output size.
pub const HASH_BYTES: usize = 32;

/// HMAC-SHA-256 tag size.
pub const TAG_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

// ── Public keys ───────────────────────────────────────────────────────────────

/// An encoded curve point — identity key or handshake key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PublicKey(pub [u8; KEY_BYTES]);

impl PublicKey {
    /// Parse from a strict 64-character hex string.
    pub fn from_hex(hex_key: &str) -> Option<Self> {
        let bytes = parse_key_hex(hex_key)?;
        Some(PublicKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Constant-time equality. Used on every protocol path that compares
    /// received key material against known keys.
    pub fn ct_eq(&self, other: &PublicKey) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

fn parse_key_hex(hex_key: &str) -> Option<[u8; KEY_BYTES]> {
    if hex_key.len() != 2 * KEY_BYTES {
        return None;
    }
    let decoded = hex::decode(hex_key).ok()?;
    let mut bytes = [0u8; KEY_BYTES];
    bytes.copy_from_slice(&decoded);
    Some(bytes)
}

// ── Secret keys ───────────────────────────────────────────────────────────────

/// A Curve25519 secret key. The byte buffer is zeroized on drop.
#[derive(Clone)]
pub struct SecretKey(Zeroizing<[u8; KEY_BYTES]>);

impl SecretKey {
    /// Generate a fresh secret: 32 random bytes from the OS RNG, sanitized.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_BYTES]);
        OsRng.fill_bytes(&mut *bytes);
        sanitize_secret(&mut bytes);
        SecretKey(bytes)
    }

    /// Wrap stored secret bytes as-is (already sanitized at generation time).
    pub fn from_bytes(bytes: [u8; KEY_BYTES]) -> Self {
        SecretKey(Zeroizing::new(bytes))
    }

    /// Parse from a strict 64-character hex string.
    pub fn from_hex(hex_key: &str) -> Option<Self> {
        let bytes = parse_key_hex(hex_key)?;
        Some(SecretKey(Zeroizing::new(bytes)))
    }

    /// Derive the matching public key (base-point multiplication).
    pub fn public(&self) -> PublicKey {
        Point::base_mult(&self.scalar()).store()
    }

    /// The secret as a scalar modulo the group order.
    pub fn scalar(&self) -> Scalar {
        Scalar(DalekScalar::from_bytes_mod_order(*self.0))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }
}

/// Clamp a secret into the usable scalar range: clear bits 0–2 of byte 0,
/// clear bit 7 and set bit 6 of byte 31.
pub fn sanitize_secret(bytes: &mut [u8; KEY_BYTES]) {
    bytes[0] &= 0xf8;
    bytes[31] &= 0x7f;
    bytes[31] |= 0x40;
}

/// A long-term or ephemeral keypair.
pub struct Keypair {
    secret: SecretKey,
    pub public: PublicKey,
}

impl Keypair {
    pub fn generate() -> Self {
        Self::from_secret(SecretKey::generate())
    }

    pub fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public();
        Keypair { secret, public }
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

// ── Scalar and point arithmetic ───────────────────────────────────────────────

/// A scalar modulo the curve group order. Zeroized on drop — scalars in the
/// handshake are secret or derive from secrets.
#[derive(Clone)]
pub struct Scalar(DalekScalar);

impl Drop for Scalar {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.0.zeroize();
    }
}

impl Scalar {
    /// Build a scalar from one 128-bit half of a handshake digest, with the
    /// top bit (bit 7 of byte 15) forced to 1 so the scalar is never trivial.
    pub fn from_half_hash(half: &[u8]) -> Scalar {
        debug_assert_eq!(half.len(), HASH_BYTES / 2);
        let mut wide = Zeroizing::new([0u8; KEY_BYTES]);
        wide[..HASH_BYTES / 2].copy_from_slice(half);
        wide[15] |= 0x80;
        Scalar(DalekScalar::from_bytes_mod_order(*wide))
    }

    pub fn add(&self, other: &Scalar) -> Scalar {
        Scalar(self.0 + other.0)
    }

    pub fn mult(&self, other: &Scalar) -> Scalar {
        Scalar(self.0 * other.0)
    }
}

/// A curve point in working (decompressed) form. Zeroized on drop — the
/// shared point σ must not outlive its scope.
#[derive(Clone)]
pub struct Point(EdwardsPoint);

impl Drop for Point {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.0.zeroize();
    }
}

impl Point {
    /// Decompress an encoded key. `None` when the encoding is not a valid
    /// curve point; callers treat that as a malformed handshake.
    pub fn load(key: &PublicKey) -> Option<Point> {
        CompressedEdwardsY(key.0).decompress().map(Point)
    }

    pub fn store(&self) -> PublicKey {
        PublicKey(self.0.compress().to_bytes())
    }

    pub fn base_mult(scalar: &Scalar) -> Point {
        Point(EdwardsPoint::mul_base(&scalar.0))
    }

    pub fn mult(&self, scalar: &Scalar) -> Point {
        Point(self.0 * scalar.0)
    }

    pub fn add(&self, other: &Point) -> Point {
        Point(self.0 + other.0)
    }

    pub fn is_identity(&self) -> bool {
        self.0.is_identity()
    }
}

// ── Hashing and MACs ──────────────────────────────────────────────────────────

/// SHA-256 over the concatenation of `parts`. The output is zeroized on drop
/// since every digest in the handshake is or derives key material.
pub fn sha256(parts: &[&[u8]]) -> Zeroizing<[u8; HASH_BYTES]> {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = Zeroizing::new([0u8; HASH_BYTES]);
    out.copy_from_slice(&hasher.finalize());
    out
}

/// HMAC-SHA-256 of the concatenation of `parts`.
pub fn hmac_sha256(key: &[u8; HASH_BYTES], parts: &[&[u8]]) -> [u8; TAG_BYTES] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key size");
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; TAG_BYTES];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Constant-time verification of an HMAC-SHA-256 tag.
pub fn hmac_sha256_verify(key: &[u8; HASH_BYTES], parts: &[&[u8]], tag: &[u8]) -> bool {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key size");
    for part in parts {
        mac.update(part);
    }
    mac.verify_slice(tag).is_ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
