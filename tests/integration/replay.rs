//! Replay and reordering behaviour on the established data path.

use crate::*;
use ridge_core::time::Timestamp;

#[test]
fn replayed_frame_delivered_exactly_once() {
    let (mut a, mut b) = node_pair();
    let now = Timestamp::from_millis(1_000);
    complete_handshake(&mut a, &mut b, now);

    a.send(b"only once", now);
    let (_, datagram) = a.transport.data.pop().unwrap();

    b.receive_data(a.addr, &datagram, now);
    b.receive_data(a.addr, &datagram, now);

    let deliveries: Vec<_> = b
        .transport
        .delivered
        .iter()
        .filter(|(_, payload)| payload == b"only once")
        .collect();
    assert_eq!(deliveries.len(), 1);
}

#[test]
fn reordered_frames_delivered_exactly_once_each() {
    let (mut a, mut b) = node_pair();
    let now = Timestamp::from_millis(1_000);
    complete_handshake(&mut a, &mut b, now);

    let mut frames = Vec::new();
    for payload in [&b"zero"[..], b"one", b"two", b"three", b"four"] {
        a.send(payload, now);
        frames.push(a.transport.data.pop().unwrap().1);
    }

    // Arrival order 2, 4, 3, 0, 1 — same parity, within the window.
    for index in [2usize, 4, 3, 0, 1] {
        b.receive_data(a.addr, &frames[index], now);
    }
    let payloads: Vec<_> = b
        .transport
        .delivered
        .iter()
        .map(|(_, payload)| payload.clone())
        .collect();
    assert_eq!(payloads, vec![b"two".to_vec(), b"four".to_vec(), b"three".to_vec(), b"zero".to_vec(), b"one".to_vec()]);

    // A retransmit of any of them is dropped.
    let count = b.transport.delivered.len();
    b.receive_data(a.addr, &frames[3], now);
    assert_eq!(b.transport.delivered.len(), count);
}

#[test]
fn reordering_goes_stale_after_reorder_time() {
    let (mut a, mut b) = node_pair();
    let now = Timestamp::from_millis(1_000);
    complete_handshake(&mut a, &mut b, now);

    a.send(b"early", now);
    let (_, early) = a.transport.data.pop().unwrap();
    a.send(b"late", now);
    let (_, late) = a.transport.data.pop().unwrap();

    b.receive_data(a.addr, &late, now);
    assert_eq!(b.transport.delivered.last().unwrap().1, b"late");

    // The default reorder_time is 10 s; one millisecond past it the older
    // frame is no longer acceptable.
    let stale = now.add_millis(10_001);
    b.receive_data(a.addr, &early, stale);
    assert_eq!(b.transport.delivered.last().unwrap().1, b"late");
    assert_eq!(b.transport.delivered.len(), 1);
}

#[test]
fn keepalives_never_reach_the_datapath() {
    let (mut a, mut b) = node_pair();
    let now = Timestamp::from_millis(1_000);
    complete_handshake(&mut a, &mut b, now);

    // An explicit keepalive (what the keepalive timer sends).
    a.send(&[], now);
    deliver_data(&mut a, &mut b, now);

    assert!(b.transport.delivered.is_empty());
}
