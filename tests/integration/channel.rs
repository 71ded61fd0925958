//! Vehicle-side channel simulator: encodes video into FEC blocks, wraps them
//! in wire packets, remembers what it sent, and answers retransmission
//! requests the way the real vehicle does.

use std::collections::HashMap;

use skylink_core::wire::{
    PacketHeader, RetransmissionRequest, VideoSegmentHeader, FRAME_FLAG_END_OF_FRAME,
    PACKET_FLAG_RETRANSMITTED, PACKET_TYPE_VIDEO_DATA, STREAM_INFO_FLAG_NONE,
    STREAM_INFO_FLAG_RETRANSMISSION_ID, STREAM_TYPE_H264,
};
use skylink_station::fec;
use zerocopy::AsBytes;

pub const VEHICLE_ID: u32 = 7;
pub const CONTROLLER_ID: u32 = 100;

const PACKET_HEADER_LEN: usize = core::mem::size_of::<PacketHeader>();

/// Offsets of the stream_info fields inside a full wire packet.
const STREAM_INFO_FLAGS_AT: usize = PACKET_HEADER_LEN + 13;
const STREAM_INFO_AT: usize = PACKET_HEADER_LEN + 14;

pub struct VehicleEncoder {
    pub data_packets: u8,
    pub ec_packets: u8,
    pub packet_size: u16,
    pub profile: u8,
    pub keyframe_ms: u16,
    next_block: u32,
    sent: HashMap<(u32, u8), Vec<u8>>,
}

impl VehicleEncoder {
    pub fn new(data_packets: u8, ec_packets: u8, packet_size: u16) -> Self {
        Self {
            data_packets,
            ec_packets,
            packet_size,
            profile: 0,
            keyframe_ms: 5000,
            next_block: 0,
            sent: HashMap::new(),
        }
    }

    /// Simulate a vehicle reboot: the block counter starts over.
    pub fn restart_at(&mut self, block_index: u32) {
        self.next_block = block_index;
        self.sent.clear();
    }

    /// Encode one block. `videos` carries the video bytes of each data
    /// packet, one entry per data packet. Returns the raw wire packets,
    /// data first, parity after.
    pub fn encode_block(&mut self, videos: &[&[u8]]) -> Vec<Vec<u8>> {
        assert_eq!(videos.len(), self.data_packets as usize, "one entry per data packet");
        let block = self.next_block;
        self.next_block += 1;

        // FEC payload of each data packet: important sub-header + video,
        // zero-padded to the block packet size. Parity runs over the padding.
        let shards: Vec<Vec<u8>> = videos
            .iter()
            .enumerate()
            .map(|(i, video)| {
                assert!(video.len() + 3 <= self.packet_size as usize, "video too large");
                let mut shard = Vec::with_capacity(self.packet_size as usize);
                shard.extend_from_slice(&(video.len() as u16).to_le_bytes());
                let flags = if i == videos.len() - 1 {
                    FRAME_FLAG_END_OF_FRAME
                } else {
                    0
                };
                shard.push(flags);
                shard.extend_from_slice(video);
                shard.resize(self.packet_size as usize, 0);
                shard
            })
            .collect();

        let parity = if self.ec_packets > 0 {
            fec::encode(&shards, self.ec_packets as usize).expect("parity encode")
        } else {
            Vec::new()
        };

        let mut out = Vec::new();
        for (i, video) in videos.iter().enumerate() {
            // Data packets travel unpadded; the receiver re-pads.
            let trimmed = &shards[i][..3 + video.len()];
            out.push(self.wrap(block, i as u8, trimmed));
        }
        for (j, shard) in parity.iter().enumerate() {
            out.push(self.wrap(block, self.data_packets + j as u8, shard));
        }
        out
    }

    fn wrap(&mut self, block: u32, index: u8, payload: &[u8]) -> Vec<u8> {
        let vheader = VideoSegmentHeader {
            stream_index_and_type: STREAM_TYPE_H264 << 4,
            current_block_index: block,
            current_block_packet_index: index,
            current_block_data_packets: self.data_packets,
            current_block_ec_packets: self.ec_packets,
            current_block_packet_size: self.packet_size,
            video_profile: self.profile,
            keyframe_interval_ms: self.keyframe_ms,
            stream_info_flags: STREAM_INFO_FLAG_NONE,
            stream_info: 0,
        };
        let header = PacketHeader {
            packet_type: PACKET_TYPE_VIDEO_DATA,
            packet_flags: 0,
            vehicle_id_src: VEHICLE_ID,
            vehicle_id_dest: CONTROLLER_ID,
            total_length: (PACKET_HEADER_LEN + vheader.as_bytes().len() + payload.len()) as u16,
        };

        let mut raw = Vec::new();
        raw.extend_from_slice(header.as_bytes());
        raw.extend_from_slice(vheader.as_bytes());
        raw.extend_from_slice(payload);
        self.sent.insert((block, index), raw.clone());
        raw
    }

    /// Resend one packet, flagged as a retransmission and echoing the
    /// request id the way the vehicle does.
    pub fn retransmit(&self, block: u32, index: u8, echoed_request_id: u32) -> Option<Vec<u8>> {
        let mut raw = self.sent.get(&(block, index))?.clone();
        raw[1] |= PACKET_FLAG_RETRANSMITTED;
        raw[STREAM_INFO_FLAGS_AT] = STREAM_INFO_FLAG_RETRANSMISSION_ID;
        raw[STREAM_INFO_AT..STREAM_INFO_AT + 4].copy_from_slice(&echoed_request_id.to_le_bytes());
        Some(raw)
    }

    /// Answer a whole retransmission request.
    pub fn answer_request(&self, req: &RetransmissionRequest) -> Vec<Vec<u8>> {
        req.pairs
            .iter()
            .filter_map(|&(block, index)| self.retransmit(block, index, req.request_id))
            .collect()
    }
}

/// Patch a built packet's stream_info side channel (resolution, fps, ...).
pub fn with_stream_info(mut raw: Vec<u8>, flags: u8, info: u32) -> Vec<u8> {
    raw[STREAM_INFO_FLAGS_AT] = flags;
    raw[STREAM_INFO_AT..STREAM_INFO_AT + 4].copy_from_slice(&info.to_le_bytes());
    raw
}
