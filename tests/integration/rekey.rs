//! Rekeying: session rotation, old/new overlap and refresh scheduling.

use crate::*;
use ridge_core::time::Timestamp;

#[test]
fn rekey_overlaps_until_new_session_proven() {
    let (mut a, mut b) = node_pair();
    let start = Timestamp::from_millis(1_000);
    complete_handshake(&mut a, &mut b, start);

    a.send(b"before rekey", start);
    deliver_data(&mut a, &mut b, start);
    assert_eq!(b.transport.delivered.last().unwrap().1, b"before rekey");

    // A fresh handshake, as the refresh timer would fire it.
    let now = start.add_secs(60);
    a.init_handshake(now);
    deliver_handshakes(&mut a, &mut b, now); // request: B replies
    deliver_handshakes(&mut b, &mut a, now); // reply:   A installs the new session

    // A initiated the new session, so until B proves it switched, A keeps
    // sending under the old one — and B still accepts that traffic.
    a.send(b"overlap one", now);
    a.send(b"overlap two", now);
    let mut overlap: Vec<_> = a.transport.data.drain(..).map(|(_, f)| f).collect();
    let second = overlap.pop().unwrap();
    let first = overlap.pop().unwrap();

    b.receive_data(a.addr, &first, now);
    assert_eq!(b.transport.delivered.last().unwrap().1, b"overlap one");

    deliver_handshakes(&mut a, &mut b, now); // finish: B installs, sends keepalive
    deliver_data(&mut b, &mut a, now); //        A proves the new session, announces
    deliver_data(&mut a, &mut b, now); //        B proves it too and drops the old one

    // Old-session traffic is no longer accepted.
    let count = b.transport.delivered.len();
    b.receive_data(a.addr, &second, now);
    assert_eq!(b.transport.delivered.len(), count);

    // The new session carries data in both directions.
    a.send(b"fresh uphill", now);
    deliver_data(&mut a, &mut b, now);
    assert_eq!(b.transport.delivered.last().unwrap().1, b"fresh uphill");

    b.send(b"fresh downhill", now);
    deliver_data(&mut b, &mut a, now);
    assert_eq!(a.transport.delivered.last().unwrap().1, b"fresh downhill");
}

#[test]
fn refresh_scheduled_once_when_due() {
    let (mut a, mut b) = node_pair_tuned(|config| {
        config.key_refresh = 1;
        config.key_refresh_splay = 0;
    });
    let start = Timestamp::from_millis(1_000);
    complete_handshake(&mut a, &mut b, start);
    assert!(a.tasks.handshakes.is_empty());

    // Refresh is due; the first send schedules exactly one handshake.
    let now = start.add_secs(2);
    a.send(b"payload", now);
    assert_eq!(a.tasks.handshakes, vec![(a.peer(), 0)]);

    // Already refreshing: no further scheduling.
    a.send(b"payload", now);
    assert_eq!(a.tasks.handshakes.len(), 1);

    // The responder side never initiates a refresh.
    b.send(b"payload", now);
    assert!(b.tasks.handshakes.is_empty());
}

#[test]
fn renewed_handshake_cancels_retries_after_proof() {
    let (mut a, mut b) = node_pair();
    let start = Timestamp::from_millis(1_000);
    complete_handshake(&mut a, &mut b, start);

    let cancels_before = a.tasks.handshake_cancels;

    let now = start.add_secs(30);
    complete_handshake(&mut a, &mut b, now);

    // The second handshake's retry timers were cancelled once the new
    // session saw its first decrypt.
    assert!(a.tasks.handshake_cancels > cancels_before);
    assert!(a.tasks.handshakes.is_empty());
}
