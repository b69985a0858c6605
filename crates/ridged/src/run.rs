//! The daemon event loop.
//!
//! One task owns the engine. Each iteration takes a fresh `now` snapshot,
//! fires every due timer, then waits on whichever comes first: an inbound
//! datagram, a resolver completion, or the next timer deadline. Every engine
//! call runs to completion before the next event is looked at.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use ridge_core::config::Config;
use ridge_core::method::chacha::ChaChaPoly;
use ridge_core::protocol::{AddressMode, Engine, PeerId, TaskScheduler};
use ridge_core::records::{PACKET_DATA, PACKET_HANDSHAKE};
use ridge_core::time::Timestamp;

use crate::transport::UdpTransport;

// ── Timer queue ───────────────────────────────────────────────────────────────

enum Task {
    Handshake(PeerId),
    Keepalive(PeerId),
}

/// A small unsorted deadline queue. Peer counts are tiny, so linear scans
/// beat the bookkeeping of anything smarter.
struct TaskQueue {
    now: Timestamp,
    items: Vec<(Timestamp, Task)>,
}

impl TaskQueue {
    fn new() -> Self {
        TaskQueue {
            now: Timestamp::ZERO,
            items: Vec::new(),
        }
    }

    fn set_now(&mut self, now: Timestamp) {
        self.now = now;
    }

    fn next_due(&self) -> Option<Timestamp> {
        self.items.iter().map(|(due, _)| *due).min()
    }

    fn pop_due(&mut self) -> Option<Task> {
        let index = self.items.iter().position(|(due, _)| *due <= self.now)?;
        Some(self.items.swap_remove(index).1)
    }
}

impl TaskScheduler for TaskQueue {
    fn schedule_handshake(&mut self, peer: PeerId, delay_ms: u64) {
        self.items
            .push((self.now.add_millis(delay_ms), Task::Handshake(peer)));
    }

    fn delete_peer_handshakes(&mut self, peer: PeerId) {
        self.items
            .retain(|(_, task)| !matches!(task, Task::Handshake(p) if *p == peer));
    }

    fn schedule_keepalive(&mut self, peer: PeerId, delay_ms: u64) {
        self.items
            .push((self.now.add_millis(delay_ms), Task::Keepalive(peer)));
    }

    fn delete_peer_keepalives(&mut self, peer: PeerId) {
        self.items
            .retain(|(_, task)| !matches!(task, Task::Keepalive(p) if *p == peer));
    }
}

// ── Event loop ────────────────────────────────────────────────────────────────

pub async fn run(config: Config) -> Result<()> {
    let method = ChaChaPoly::new(config.timing());
    let mut engine =
        Engine::new(&config, Box::new(method)).context("failed to initialise protocol")?;

    let socket = Arc::new(
        UdpSocket::bind(config.bind)
            .await
            .with_context(|| format!("failed to bind {}", config.bind))?,
    );
    tracing::info!(
        bind = %config.bind,
        key = engine.identity_public().to_hex(),
        "ridged up"
    );

    // Dynamic peers get their hostname handed to the resolver offload.
    let mut resolve_targets = HashMap::new();
    for id in engine.peer_ids() {
        let peer_config = engine.peer_config(id);
        if peer_config.enabled && peer_config.mode == AddressMode::Dynamic {
            if let Some(hostname) = peer_config.hostname.clone() {
                resolve_targets.insert(id, (hostname, peer_config.port));
            }
        }
    }

    let (resolved_tx, mut resolved_rx) = mpsc::unbounded_channel();
    let mut transport = UdpTransport::new(socket.clone(), resolve_targets, resolved_tx);
    let mut tasks = TaskQueue::new();
    engine.schedule_initial_handshakes(&mut tasks);

    let start = Instant::now();
    let mut buf = vec![0u8; 65536];

    loop {
        let now = Timestamp::from_millis(start.elapsed().as_millis() as u64);
        tasks.set_now(now);
        while let Some(task) = tasks.pop_due() {
            match task {
                Task::Handshake(id) => engine.handshake_init(&mut transport, &mut tasks, id, now),
                Task::Keepalive(id) => engine.send(&mut transport, &mut tasks, id, &[], now),
            }
        }

        let sleep_for = tasks
            .next_due()
            .map(|due| Duration::from_millis(due.millis_since(now)))
            .unwrap_or(Duration::from_secs(3600));

        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, address) = received.context("udp receive failed")?;
                let now = Timestamp::from_millis(start.elapsed().as_millis() as u64);
                tasks.set_now(now);
                dispatch(&mut engine, &mut transport, &mut tasks, address, &buf[..len], now);
            }
            completion = resolved_rx.recv() => {
                if let Some((id, address)) = completion {
                    let now = Timestamp::from_millis(start.elapsed().as_millis() as u64);
                    tasks.set_now(now);
                    engine.peer_resolved(&mut tasks, id, address);
                }
            }
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}

fn dispatch(
    engine: &mut Engine,
    transport: &mut UdpTransport,
    tasks: &mut TaskQueue,
    address: std::net::SocketAddr,
    datagram: &[u8],
    now: Timestamp,
) {
    let Some((&packet_type, payload)) = datagram.split_first() else {
        return;
    };
    match packet_type {
        PACKET_HANDSHAKE => {
            let hint = engine.find_peer_by_address(address);
            engine.handshake_handle(transport, tasks, address, hint, payload, now);
        }
        PACKET_DATA => match engine.find_peer_by_address(address) {
            Some(id) => engine.handle_recv(transport, tasks, id, payload, now),
            None => tracing::debug!(%address, "data packet from unknown address"),
        },
        other => tracing::debug!(%address, packet_type = other, "unknown packet type"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
