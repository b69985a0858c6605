//! UDP transport and resolver offload for the daemon.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;

use ridge_core::protocol::{PeerId, Transport};

/// Resolver completions delivered back into the event loop.
pub type Resolution = (PeerId, Option<SocketAddr>);

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    /// Hostname and port per dynamic peer.
    resolve_targets: HashMap<PeerId, (String, u16)>,
    resolved_tx: mpsc::UnboundedSender<Resolution>,
    rx_packets: u64,
    rx_bytes: u64,
}

impl UdpTransport {
    pub fn new(
        socket: Arc<UdpSocket>,
        resolve_targets: HashMap<PeerId, (String, u16)>,
        resolved_tx: mpsc::UnboundedSender<Resolution>,
    ) -> Self {
        UdpTransport {
            socket,
            resolve_targets,
            resolved_tx,
            rx_packets: 0,
            rx_bytes: 0,
        }
    }

    fn transmit(&self, address: SocketAddr, datagram: &[u8]) {
        if let Err(error) = self.socket.try_send_to(datagram, address) {
            tracing::debug!(%address, %error, "udp send failed");
        }
    }
}

impl Transport for UdpTransport {
    fn send_handshake(&mut self, address: SocketAddr, datagram: Vec<u8>) {
        self.transmit(address, &datagram);
    }

    fn send(&mut self, address: SocketAddr, datagram: Vec<u8>) {
        self.transmit(address, &datagram);
    }

    fn resolve_peer(&mut self, peer: PeerId) {
        let Some((hostname, port)) = self.resolve_targets.get(&peer).cloned() else {
            return;
        };
        let tx = self.resolved_tx.clone();
        // Resolution happens off the event loop; the completion re-enters it
        // as a channel message.
        tokio::spawn(async move {
            let address = match lookup_host((hostname.as_str(), port)).await {
                Ok(mut addresses) => addresses.next(),
                Err(error) => {
                    tracing::debug!(%hostname, %error, "hostname lookup failed");
                    None
                }
            };
            let _ = tx.send((peer, address));
        });
    }

    fn handle_receive(&mut self, peer: PeerId, plaintext: Vec<u8>) {
        // The tunnel device is out of scope here; account for the payload and
        // drop it.
        self.rx_packets += 1;
        self.rx_bytes += plaintext.len() as u64;
        tracing::trace!(
            peer = peer.0,
            len = plaintext.len(),
            total_packets = self.rx_packets,
            total_bytes = self.rx_bytes,
            "datapath delivery"
        );
    }
}
