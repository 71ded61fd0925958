//! Skylink wire format — on-air types for the ground ↔ vehicle radio link.
//!
//! These types ARE the protocol. Every field, every size, every flag bit is
//! part of the wire format and must match what the vehicle transmits.
//! Changing anything here is a breaking change for paired vehicles.
//!
//! Fixed-size types are #[repr(C, packed)] for deterministic layout and use
//! zerocopy derives for safe, allocation-free serialization. Variable-size
//! messages (the retransmission request) are encoded with explicit checked
//! slicing. There is no unsafe code in this module.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Common Packet Header ─────────────────────────────────────────────────────

/// Precedes every packet on the radio link, in both directions.
///
/// The receiver can route a packet to the right subsystem before reading a
/// single payload byte.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct PacketHeader {
    /// One of the PACKET_TYPE_* constants.
    /// A receiver seeing an unknown type silently drops the packet.
    pub packet_type: u8,

    /// Bit flags:
    ///   bit 0: packet is a retransmission (resent on request)
    ///   bits 1-7: reserved, must be zero
    pub packet_flags: u8,

    /// Sender id. Vehicles use their paired vehicle id; the ground station
    /// uses its controller id.
    pub vehicle_id_src: u32,

    /// Intended recipient id, or 0 for broadcast (pairing announcements).
    pub vehicle_id_dest: u32,

    /// Total packet length in bytes, this header included.
    /// Maximum: MAX_PACKET_TOTAL_SIZE. Anything larger is dropped unread.
    pub total_length: u16,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(PacketHeader, [u8; 12]);

/// Set on packets resent in response to a retransmission request.
pub const PACKET_FLAG_RETRANSMITTED: u8 = 1 << 0;

// ── Packet Types ─────────────────────────────────────────────────────────────

/// Video data segment: PacketHeader + VideoSegmentHeader + FEC payload.
pub const PACKET_TYPE_VIDEO_DATA: u8 = 0x20;
/// Ground → vehicle: list of missing (block, packet) pairs to resend.
pub const PACKET_TYPE_RETRANSMISSION_REQUEST: u8 = 0x21;
/// Ground → vehicle: switch to a different video profile.
pub const PACKET_TYPE_PROFILE_SWITCH_REQUEST: u8 = 0x22;
/// Vehicle → ground: profile switch applied, echoes request id + profile.
pub const PACKET_TYPE_PROFILE_SWITCH_ACK: u8 = 0x23;
/// Ground → vehicle: change the encoder keyframe interval.
pub const PACKET_TYPE_KEYFRAME_SWITCH_REQUEST: u8 = 0x24;
/// Vehicle → ground: keyframe interval change applied.
pub const PACKET_TYPE_KEYFRAME_SWITCH_ACK: u8 = 0x25;

// ── Video Segment Header ─────────────────────────────────────────────────────

/// Follows the common header on every PACKET_TYPE_VIDEO_DATA packet.
///
/// Describes where this packet sits inside its FEC block and carries the
/// flag-multiplexed `stream_info` side channel the vehicle uses to announce
/// resolution, fps, encoding flags, and retransmission-id echoes without a
/// separate control packet.
///
/// Wire size: 18 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct VideoSegmentHeader {
    /// bits 0-3: video stream index; bits 4-7: stream type (STREAM_TYPE_*).
    pub stream_index_and_type: u8,

    /// Monotonic FEC block counter. Wraps only on vehicle restart.
    pub current_block_index: u32,

    /// Position of this packet inside the block.
    /// 0..data_packets are data; data_packets..data_packets+ec_packets are parity.
    pub current_block_packet_index: u8,

    /// Number of data packets in this block.
    pub current_block_data_packets: u8,

    /// Number of parity (EC) packets in this block.
    pub current_block_ec_packets: u8,

    /// FEC payload size of every packet in this block, in bytes.
    /// Parity runs over exactly this many bytes; short data packets are
    /// zero-padded to this size by the sender and the receiver alike.
    pub current_block_packet_size: u16,

    /// Profile the encoder is currently producing (VideoProfile id).
    pub video_profile: u8,

    /// Keyframe interval the encoder is currently using, in milliseconds.
    pub keyframe_interval_ms: u16,

    /// Which meaning `stream_info` carries. One of STREAM_INFO_FLAG_*.
    pub stream_info_flags: u8,

    /// Value dependent on `stream_info_flags`:
    ///   SIZE:              video width (low 16 bits) | height (high 16 bits)
    ///   FPS:               frames per second
    ///   FEC_TIME:          microseconds/second spent in FEC on the vehicle
    ///   ENCODING_FLAGS:    active profile encoding flags
    ///   RETRANSMISSION_ID: last retransmission request id the vehicle saw
    pub stream_info: u32,
}

assert_eq_size!(VideoSegmentHeader, [u8; 18]);

/// Values for `VideoSegmentHeader::stream_info_flags`.
pub const STREAM_INFO_FLAG_NONE: u8 = 0;
pub const STREAM_INFO_FLAG_SIZE: u8 = 1;
pub const STREAM_INFO_FLAG_FPS: u8 = 2;
pub const STREAM_INFO_FLAG_FEC_TIME: u8 = 3;
pub const STREAM_INFO_FLAG_ENCODING_FLAGS: u8 = 4;
pub const STREAM_INFO_FLAG_RETRANSMISSION_ID: u8 = 5;

/// Stream type nibble (high 4 bits of `stream_index_and_type`).
pub const STREAM_TYPE_H264: u8 = 0;
pub const STREAM_TYPE_H265: u8 = 1;

// ── Video Segment Important Sub-Header ───────────────────────────────────────

/// First 3 bytes of the FEC payload of every data packet.
///
/// Sits inside the parity-protected region so it is recovered together with
/// the video bytes when a packet is reconstructed. `video_data_length` is the
/// number of real video bytes that follow; the rest of the payload up to
/// `current_block_packet_size` is zero padding.
///
/// Wire size: 3 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct VideoSegmentImportant {
    /// Real video bytes following this sub-header.
    pub video_data_length: u16,

    /// Bit flags:
    ///   bits 0-1: packets until end of frame
    ///   bit  2:   this packet ends a frame
    ///   bit  3:   contains P-NAL data
    ///   bit  4:   contains I-NAL data
    ///   bit  5:   contains SPS/PPS or other NAL data
    pub frame_and_nal_flags: u8,
}

assert_eq_size!(VideoSegmentImportant, [u8; 3]);

pub const FRAME_FLAG_END_OF_FRAME: u8 = 1 << 2;
pub const FRAME_FLAG_HAS_P_NAL: u8 = 1 << 3;
pub const FRAME_FLAG_HAS_I_NAL: u8 = 1 << 4;
pub const FRAME_FLAG_HAS_OTHER_NAL: u8 = 1 << 5;

// ── Profile / Keyframe Negotiation ───────────────────────────────────────────

/// Ground → vehicle: request a video profile switch.
/// Wire size: 6 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ProfileSwitchRequest {
    /// Monotonic per-ground-station id, echoed back in the ack.
    pub request_id: u32,
    /// Target profile (VideoProfile id).
    pub profile: u8,
    /// Video stream the switch applies to.
    pub stream_index: u8,
}

assert_eq_size!(ProfileSwitchRequest, [u8; 6]);

/// Vehicle → ground: profile switch applied.
/// Both fields must match the pending request for the ack to take effect;
/// repeating the same ack is harmless.
/// Wire size: 5 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ProfileSwitchAck {
    pub request_id: u32,
    pub profile: u8,
}

assert_eq_size!(ProfileSwitchAck, [u8; 5]);

/// Ground → vehicle: change the encoder keyframe interval.
/// Wire size: 6 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct KeyframeSwitchRequest {
    pub request_id: u8,
    pub interval_ms: u32,
    pub stream_index: u8,
}

assert_eq_size!(KeyframeSwitchRequest, [u8; 6]);

/// Vehicle → ground: keyframe interval change applied.
/// Wire size: 5 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct KeyframeSwitchAck {
    pub request_id: u8,
    pub interval_ms: u32,
}

assert_eq_size!(KeyframeSwitchAck, [u8; 5]);

// ── Retransmission Request ───────────────────────────────────────────────────

/// Maximum (block, packet) pairs in one retransmission request.
/// Bounded so a full request fits one radio packet and the vehicle gets a
/// chance to answer before the next request goes out.
pub const MAX_RETRANS_PER_REQUEST: usize = 30;

/// Ground → vehicle: list of missing video packets to resend.
///
/// Wire layout after the common header:
///   request_id: u32, stream_index: u8, count: u8,
///   then count × (block_index: u32, packet_index: u8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmissionRequest {
    pub request_id: u32,
    pub stream_index: u8,
    pub pairs: Vec<(u32, u8)>,
}

/// Fixed prefix: request_id + stream_index + count.
const RETRANS_PREFIX: usize = 6;
/// Per-pair size: block_index + packet_index.
const RETRANS_PAIR: usize = 5;

impl RetransmissionRequest {
    /// Encoded size in bytes, common header excluded.
    pub fn encoded_len(&self) -> usize {
        RETRANS_PREFIX + self.pairs.len() * RETRANS_PAIR
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.request_id.to_le_bytes());
        out.push(self.stream_index);
        out.push(self.pairs.len() as u8);
        for &(block, packet) in &self.pairs {
            out.extend_from_slice(&block.to_le_bytes());
            out.push(packet);
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < RETRANS_PREFIX {
            return Err(WireError::Truncated {
                need: RETRANS_PREFIX,
                got: buf.len(),
            });
        }
        let request_id = u32::from_le_bytes(buf[0..4].try_into().expect("checked length"));
        let stream_index = buf[4];
        let count = buf[5] as usize;
        if count > MAX_RETRANS_PER_REQUEST {
            return Err(WireError::RetransmissionCountTooLarge(count));
        }
        let need = RETRANS_PREFIX + count * RETRANS_PAIR;
        if buf.len() < need {
            return Err(WireError::Truncated {
                need,
                got: buf.len(),
            });
        }
        let mut pairs = Vec::with_capacity(count);
        let mut at = RETRANS_PREFIX;
        for _ in 0..count {
            let block = u32::from_le_bytes(buf[at..at + 4].try_into().expect("checked length"));
            pairs.push((block, buf[at + 4]));
            at += RETRANS_PAIR;
        }
        Ok(Self {
            request_id,
            stream_index,
            pairs,
        })
    }
}

// ── Constants ────────────────────────────────────────────────────────────────

/// Largest packet either side ever puts on the air, headers included.
/// Matched to the radio MTU; anything larger is dropped at the boundary.
pub const MAX_PACKET_TOTAL_SIZE: usize = 1250;

/// Largest FEC payload a video packet may declare.
pub const MAX_VIDEO_PAYLOAD: usize = MAX_PACKET_TOTAL_SIZE
    - core::mem::size_of::<PacketHeader>()
    - core::mem::size_of::<VideoSegmentHeader>();

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("buffer truncated: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("unknown packet type: 0x{0:02x}")]
    UnknownPacketType(u8),

    #[error("retransmission request lists {0} pairs, max {}", MAX_RETRANS_PER_REQUEST)]
    RetransmissionCountTooLarge(usize),

    #[error("declared payload size {0} exceeds maximum {}", MAX_VIDEO_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("packet index {index} out of range for {data} data + {ec} ec packets")]
    PacketIndexOutOfRange { index: u8, data: u8, ec: u8 },
}

// ── Tests ────────────────────────────────────────────────────────────────────
