//! End-to-end pipeline tests: a simulated vehicle encoder on one side, the
//! stream processor on the other, and a channel in between that loses,
//! reorders, and duplicates packets on demand.

mod adaptive;
mod channel;
mod delivery;

use skylink_station::{DecoderSink, LinkContext, Outbound, OutboundPacket};

/// Decoder stand-in that records every delivered payload.
pub struct CollectSink(pub Vec<Vec<u8>>);

impl CollectSink {
    pub fn new() -> Self {
        Self(Vec::new())
    }
}

impl DecoderSink for CollectSink {
    fn send_to_decoder(&mut self, payload: &[u8], _width: u16, _height: u16, _stream_type: u8) {
        self.0.push(payload.to_vec());
    }
}

/// Outbound queue stand-in that records every enqueued packet.
pub struct CollectOutbound(pub Vec<OutboundPacket>);

impl CollectOutbound {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn drain_of_type(&mut self, packet_type: u8) -> Vec<OutboundPacket> {
        let (matching, rest) = std::mem::take(&mut self.0)
            .into_iter()
            .partition(|p| p.packet_type == packet_type);
        self.0 = rest;
        matching
    }
}

impl Outbound for CollectOutbound {
    fn enqueue(&mut self, packet: OutboundPacket) {
        self.0.push(packet);
    }
}

pub fn ready_link() -> LinkContext {
    LinkContext {
        paired: true,
        ..LinkContext::default()
    }
}
