//! Link-state context and the collaborator interfaces the engine drives.
//!
//! The engine never touches a socket or a queue directly: ordered video goes
//! to a `DecoderSink`, outbound control packets go to an `Outbound` queue,
//! and the caller describes the link state per call via `LinkContext`.

use skylink_core::wire::PacketHeader;
use zerocopy::AsBytes;

/// Snapshot of the radio-link state, supplied by the router on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkContext {
    /// Mutual pairing handshake has completed.
    pub paired: bool,
    /// Frequency search in progress; no requests may be sent.
    pub searching: bool,
    /// Vehicle firmware update in progress.
    pub updating: bool,
    /// Radio link parameters are being renegotiated.
    pub negotiating: bool,
    /// No packet from the vehicle within the configured window.
    pub link_lost: bool,
}

/// One packet queued for the radio TX path, common header not yet attached.
#[derive(Debug, Clone)]
pub struct OutboundPacket {
    pub packet_type: u8,
    pub vehicle_id_dest: u32,
    pub payload: Vec<u8>,
}

impl OutboundPacket {
    /// Serialize with the common header prepended, ready for the air.
    pub fn to_wire(&self, controller_id: u32) -> Vec<u8> {
        let header = PacketHeader {
            packet_type: self.packet_type,
            packet_flags: 0,
            vehicle_id_src: controller_id,
            vehicle_id_dest: self.vehicle_id_dest,
            total_length: (core::mem::size_of::<PacketHeader>() + self.payload.len()) as u16,
        };
        let mut out = Vec::with_capacity(self.payload.len() + core::mem::size_of::<PacketHeader>());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Non-blocking outbound queue (radio TX thread boundary).
pub trait Outbound {
    fn enqueue(&mut self, packet: OutboundPacket);
}

/// Final destination of ordered video payload (streamer/decoder boundary).
pub trait DecoderSink {
    fn send_to_decoder(&mut self, payload: &[u8], width: u16, height: u16, stream_type: u8);
}
