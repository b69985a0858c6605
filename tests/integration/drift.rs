//! Dynamic peers: address drift forces re-resolution.

use crate::*;
use ridge_core::config::PeerEntry;
use ridge_core::curve::Keypair;
use ridge_core::time::Timestamp;

const ADDR_STALE: &str = "10.66.0.9:6622";

#[test]
fn dynamic_peer_address_drift_triggers_reresolution() {
    let identity_a = Keypair::generate();
    let identity_b = Keypair::generate();

    // A knows B by hostname; B pins A's address.
    let mut a = Node::new(
        &identity_a,
        ADDR_A,
        vec![PeerEntry {
            name: "b".into(),
            key: identity_b.public.to_hex(),
            hostname: Some("b.ridge.test".into()),
            port: Some(6622),
            ..PeerEntry::default()
        }],
    );
    let mut b = Node::new(
        &identity_b,
        ADDR_B,
        vec![PeerEntry {
            name: "a".into(),
            key: identity_a.public.to_hex(),
            address: Some(addr(ADDR_A)),
            ..PeerEntry::default()
        }],
    );

    let now = Timestamp::from_millis(1_000);

    // The resolver initially points at a stale address.
    let id = a.peer();
    a.engine
        .peer_resolved(&mut a.tasks, id, Some(addr(ADDR_STALE)));

    // B moved: its handshake arrives from its real address instead.
    b.init_handshake(now);
    let (_, request) = b.transport.handshakes.pop().unwrap();
    a.receive_handshake(addr(ADDR_B), &request, now);

    // The key matched but the address did not: drop plus re-resolution.
    assert!(a.transport.handshakes.is_empty());
    assert_eq!(a.transport.resolves, vec![a.peer()]);

    // Resolution catches up with the move; the same handshake now passes.
    a.engine.peer_resolved(&mut a.tasks, id, Some(addr(ADDR_B)));
    a.receive_handshake(addr(ADDR_B), &request, now);
    assert_eq!(a.transport.handshakes.len(), 1);
}

#[test]
fn unresolved_dynamic_peer_defers_handshake_to_resolver() {
    let identity_a = Keypair::generate();
    let identity_b = Keypair::generate();
    let mut a = Node::new(
        &identity_a,
        ADDR_A,
        vec![PeerEntry {
            name: "b".into(),
            key: identity_b.public.to_hex(),
            hostname: Some("b.ridge.test".into()),
            port: Some(6622),
            ..PeerEntry::default()
        }],
    );

    let now = Timestamp::from_millis(1_000);
    a.init_handshake(now);

    // Nothing went out; the resolver was asked and a retry is queued.
    assert!(a.transport.handshakes.is_empty());
    assert_eq!(a.transport.resolves, vec![a.peer()]);
    assert_eq!(a.tasks.handshakes.len(), 1);

    // Once resolved, an immediate handshake is scheduled.
    let id = a.peer();
    a.engine.peer_resolved(&mut a.tasks, id, Some(addr(ADDR_B)));
    assert!(a.tasks.handshakes.contains(&(id, 0)));
}
