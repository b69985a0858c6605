//! Handshake state-machine scenarios.

use crate::*;
use ridge_core::curve::{Keypair, TAG_BYTES};
use ridge_core::records::{
    FrameBuilder, RecordType, HANDSHAKE_REPLY, HANDSHAKE_REQUEST, PACKET_HANDSHAKE,
};
use ridge_core::time::Timestamp;

fn as_datagram(payload: Vec<u8>) -> Vec<u8> {
    let mut datagram = vec![PACKET_HANDSHAKE];
    datagram.extend_from_slice(&payload);
    datagram
}

#[test]
fn clean_handshake_establishes_both_sides() {
    let (mut a, mut b) = node_pair();
    let now = Timestamp::from_millis(1_000);

    complete_handshake(&mut a, &mut b, now);

    // The liveness exchange was keepalives only — nothing reached the datapath.
    assert!(a.transport.delivered.is_empty());
    assert!(b.transport.delivered.is_empty());

    // Both sides proved their session and cancelled leftover handshake timers.
    assert!(a.tasks.handshake_cancels >= 1);
    assert!(b.tasks.handshake_cancels >= 1);
    assert!(a.tasks.handshakes.is_empty());

    // Payload flows in both directions.
    a.send(b"uphill", now);
    deliver_data(&mut a, &mut b, now);
    assert_eq!(b.transport.delivered.last().unwrap().1, b"uphill");

    b.send(b"downhill", now);
    deliver_data(&mut b, &mut a, now);
    assert_eq!(a.transport.delivered.last().unwrap().1, b"downhill");
}

#[test]
fn reply_with_wrong_recipient_key_dropped() {
    let (mut a, _b) = node_pair();
    let now = Timestamp::from_millis(1_000);

    a.init_handshake(now);
    a.transport.handshakes.clear();

    // A reply claiming to come from B but addressed to a third party.
    let peer_key = a.engine.peer_config(a.peer()).key;
    let third_party = Keypair::generate();
    let bogus_handshake = Keypair::generate();

    let mut builder = FrameBuilder::new(0);
    builder
        .add(RecordType::HandshakeType, &[HANDSHAKE_REPLY])
        .add(RecordType::SenderKey, peer_key.as_bytes())
        .add(RecordType::RecipientKey, third_party.public.as_bytes())
        .add(RecordType::SenderHandshakeKey, bogus_handshake.public.as_bytes())
        .add(
            RecordType::RecipientHandshakeKey,
            bogus_handshake.public.as_bytes(),
        )
        .add(RecordType::Tag, &[0u8; TAG_BYTES]);
    a.receive_handshake(addr(ADDR_B), &as_datagram(builder.finish()), now);

    assert!(a.transport.handshakes.is_empty());
    assert!(!a.established());
}

#[test]
fn request_from_unknown_key_gets_no_reply() {
    let (_a, mut b) = node_pair();
    let now = Timestamp::from_millis(1_000);

    let stranger = Keypair::generate();
    let stranger_handshake = Keypair::generate();
    let mut builder = FrameBuilder::new(0);
    builder
        .add(RecordType::HandshakeType, &[HANDSHAKE_REQUEST])
        .add(RecordType::SenderKey, stranger.public.as_bytes())
        .add(
            RecordType::SenderHandshakeKey,
            stranger_handshake.public.as_bytes(),
        );
    b.receive_handshake(addr(ADDR_A), &as_datagram(builder.finish()), now);

    assert!(b.transport.handshakes.is_empty());
}

#[test]
fn own_key_as_sender_is_dropped() {
    let (_a, mut b) = node_pair();
    let now = Timestamp::from_millis(1_000);

    let own = b.engine.identity_public();
    let handshake = Keypair::generate();
    let mut builder = FrameBuilder::new(0);
    builder
        .add(RecordType::HandshakeType, &[HANDSHAKE_REQUEST])
        .add(RecordType::SenderKey, own.as_bytes())
        .add(RecordType::SenderHandshakeKey, handshake.public.as_bytes());
    b.receive_handshake(addr(ADDR_A), &as_datagram(builder.finish()), now);

    assert!(b.transport.handshakes.is_empty());
}

#[test]
fn request_without_handshake_key_dropped() {
    let (_a, mut b) = node_pair();
    let now = Timestamp::from_millis(1_000);

    // A request from the known peer, minus the sender handshake key record.
    let peer_key = b.engine.peer_config(b.peer()).key;
    let mut builder = FrameBuilder::new(0);
    builder
        .add(RecordType::HandshakeType, &[HANDSHAKE_REQUEST])
        .add(RecordType::SenderKey, peer_key.as_bytes());
    b.receive_handshake(addr(ADDR_A), &as_datagram(builder.finish()), now);

    assert!(b.transport.handshakes.is_empty());
}

#[test]
fn reply_after_pool_key_expiry_is_ignored() {
    let (mut a, mut b) = node_pair();
    let start = Timestamp::from_millis(1_000);

    a.init_handshake(start);
    deliver_handshakes(&mut a, &mut b, start);

    // The reply arrives after the handshake key's 30 s validity window.
    let late = start.add_secs(31);
    deliver_handshakes(&mut b, &mut a, late);

    assert!(!a.established());
    assert!(a.transport.handshakes.is_empty());
}

#[test]
fn reply_within_previous_key_window_is_accepted() {
    let (mut a, mut b) = node_pair();
    let start = Timestamp::from_millis(1_000);

    a.init_handshake(start);
    deliver_handshakes(&mut a, &mut b, start);

    // Past the preference window the pool rotates, but the old key is still
    // accepted for replies until its validity runs out.
    let later = start.add_secs(16);
    deliver_handshakes(&mut b, &mut a, later);

    assert!(a.established());
}

#[test]
fn data_before_establishment_schedules_handshake() {
    let (mut a, _b) = node_pair();
    let now = Timestamp::from_millis(1_000);

    let id = a.peer();
    a.engine
        .handle_recv(&mut a.transport, &mut a.tasks, id, &[0u8; 32], now);

    assert_eq!(a.tasks.handshakes, vec![(id, 0)]);
    assert!(a.transport.delivered.is_empty());
}
