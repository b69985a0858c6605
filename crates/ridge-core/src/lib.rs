//! ridge-core — the cryptographic session core of the ridge tunnel daemon.
//!
//! Peers authenticate with long-term Curve25519 identity keys, agree on fresh
//! session keys through a three-message FHMQV-C handshake, and exchange data
//! under a bulk cipher with forward-secret rekeying and replay protection.
//! Packet I/O, the tunnel device and the timer wheel stay outside: the engine
//! talks to them through the [`protocol::Transport`] and
//! [`protocol::TaskScheduler`] traits.

pub mod config;
pub mod curve;
pub mod method;
pub mod protocol;
pub mod records;
pub mod time;
