//! Radio-router and decoder boundaries — thin UDP glue around the engine.
//!
//! The radio RX/TX threads live in a separate router process; this module is
//! only the queue plumbing between them and the engine task. Nothing here
//! blocks the engine: full queues drop, slow sinks drop.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use skylink_core::wire::MAX_PACKET_TOTAL_SIZE;
use skylink_station::{DecoderSink, Outbound, OutboundPacket};

/// Receive raw packets from the radio router and feed the engine queue.
/// Oversized datagrams are dropped at this boundary, unread.
pub async fn ingest_loop(socket: Arc<UdpSocket>, inbound: mpsc::Sender<Vec<u8>>) -> Result<()> {
    let mut buf = vec![0u8; MAX_PACKET_TOTAL_SIZE + 256];
    loop {
        let (len, _peer) = socket.recv_from(&mut buf).await.context("radio recv failed")?;
        if len > MAX_PACKET_TOTAL_SIZE {
            tracing::trace!(len, "oversized radio packet dropped");
            continue;
        }
        // try_send: the engine owns its pace; backpressure means drop, the
        // retransmission path recovers what mattered.
        if inbound.try_send(buf[..len].to_vec()).is_err() {
            tracing::warn!("inbound queue full, dropping radio packet");
        }
    }
}

/// Drain the outbound queue onto the radio TX path.
pub async fn outbound_loop(
    socket: Arc<UdpSocket>,
    radio_peer: SocketAddr,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(packet) = outbound.recv().await {
        if let Err(e) = socket.send_to(&packet, radio_peer).await {
            tracing::warn!(error = %e, "radio send failed");
        }
    }
    tracing::info!("outbound queue closed, radio tx loop exiting");
}

/// Engine-side handle to the outbound queue. Attaches the common header and
/// never blocks.
pub struct RadioOutbound {
    controller_id: u32,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl RadioOutbound {
    pub fn new(controller_id: u32, tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { controller_id, tx }
    }
}

impl Outbound for RadioOutbound {
    fn enqueue(&mut self, packet: OutboundPacket) {
        let wire = packet.to_wire(self.controller_id);
        if self.tx.send(wire).is_err() {
            tracing::warn!("outbound queue closed, dropping packet");
        }
    }
}

/// Forwards ordered video payload to the local decoder/streamer socket.
/// Uses a non-blocking std socket: the engine must never wait on the sink.
pub struct UdpDecoderSink {
    socket: std::net::UdpSocket,
    decoder_addr: SocketAddr,
}

impl UdpDecoderSink {
    pub fn new(decoder_addr: SocketAddr) -> Result<Self> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0").context("binding decoder sink")?;
        socket
            .set_nonblocking(true)
            .context("decoder sink non-blocking")?;
        Ok(Self {
            socket,
            decoder_addr,
        })
    }
}

impl DecoderSink for UdpDecoderSink {
    fn send_to_decoder(&mut self, payload: &[u8], _width: u16, _height: u16, _stream_type: u8) {
        if let Err(e) = self.socket.send_to(payload, self.decoder_addr) {
            if e.kind() != std::io::ErrorKind::WouldBlock {
                tracing::trace!(error = %e, "decoder sink send failed");
            }
        }
    }
}
