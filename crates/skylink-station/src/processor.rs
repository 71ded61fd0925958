//! Video stream processor — the per (vehicle, stream) entry point.
//!
//! Owns one reassembly buffer, one retransmission controller, and one
//! adaptive controller; ingests raw radio packets, keeps decode statistics,
//! and pushes ordered payload to the decoder sink. Everything runs on the
//! main-loop thread; the only I/O is non-blocking enqueues on the outbound
//! queue.

use std::time::{Duration, Instant};

use bytes::Bytes;
use zerocopy::{AsBytes, FromBytes};

use skylink_core::wire::{
    KeyframeSwitchAck, PacketHeader, ProfileSwitchAck, VideoSegmentHeader,
    FRAME_FLAG_END_OF_FRAME, FRAME_FLAG_HAS_I_NAL, MAX_VIDEO_PAYLOAD,
    PACKET_FLAG_RETRANSMITTED, PACKET_TYPE_KEYFRAME_SWITCH_ACK, PACKET_TYPE_KEYFRAME_SWITCH_REQUEST,
    PACKET_TYPE_PROFILE_SWITCH_ACK, PACKET_TYPE_PROFILE_SWITCH_REQUEST,
    PACKET_TYPE_RETRANSMISSION_REQUEST, PACKET_TYPE_VIDEO_DATA, STREAM_INFO_FLAG_ENCODING_FLAGS,
    STREAM_INFO_FLAG_FPS, STREAM_INFO_FLAG_RETRANSMISSION_ID, STREAM_INFO_FLAG_SIZE,
};
use skylink_core::Model;

use crate::adaptive::AdaptiveLinkController;
use crate::link::{DecoderSink, LinkContext, Outbound, OutboundPacket};
use crate::reassembly::{
    AddOutcome, FlushReason, VideoPacket, VideoReassemblyBuffer, MAX_PACKETS_PER_BLOCK,
};
use crate::retransmission::RetransmissionController;
use crate::runtime::RuntimeInfo;
use crate::stats::StreamStats;

const PACKET_HEADER_LEN: usize = core::mem::size_of::<PacketHeader>();
const VIDEO_HEADER_LEN: usize = core::mem::size_of::<VideoSegmentHeader>();

/// Retransmitted packets younger than the last parameter change are answers
/// to requests made against the old stream; they can only corrupt the new one.
const RETRANS_IGNORE_AFTER_CHANGE: Duration = Duration::from_millis(200);

/// What became of one ingested packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Accepted; `delivered` ordered packets went to the sink as a result.
    Processed { delivered: usize },
    Paused,
    NotPaired,
    /// Retransmission predating the last resolution/encoding change.
    StaleRetransmission,
    Malformed,
}

/// Per (vehicle, stream) receive pipeline.
pub struct VideoStreamProcessor {
    vehicle_id: u32,
    stream_index: u8,
    buffer: VideoReassemblyBuffer,
    retransmission: RetransmissionController,
    adaptive: AdaptiveLinkController,
    stats: StreamStats,
    paused: bool,
}

impl VideoStreamProcessor {
    pub fn new(vehicle_id: u32, stream_index: u8, model: &Model) -> Self {
        tracing::info!(vehicle_id, stream_index, "video stream processor created");
        Self {
            vehicle_id,
            stream_index,
            buffer: VideoReassemblyBuffer::new(),
            retransmission: RetransmissionController::new(stream_index),
            adaptive: AdaptiveLinkController::new(stream_index),
            stats: StreamStats::new(model.user_selected_profile),
            paused: false,
        }
    }

    pub fn vehicle_id(&self) -> u32 {
        self.vehicle_id
    }

    pub fn stream_index(&self) -> u8 {
        self.stream_index
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn adaptive(&self) -> &AdaptiveLinkController {
        &self.adaptive
    }

    pub fn adaptive_mut(&mut self) -> &mut AdaptiveLinkController {
        &mut self.adaptive
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    // ── Ingest ───────────────────────────────────────────────────────────

    /// Single entry point for raw PACKET_TYPE_VIDEO_DATA packets.
    /// `interface` names the radio interface the packet arrived on.
    #[allow(clippy::too_many_arguments)]
    pub fn on_video_packet(
        &mut self,
        interface: u8,
        raw: &[u8],
        now: Instant,
        link: &LinkContext,
        model: &Model,
        rt: &mut RuntimeInfo,
        sink: &mut dyn DecoderSink,
    ) -> Disposition {
        let Some((header, vheader, payload)) = parse_video_packet(raw) else {
            tracing::trace!(interface, len = raw.len(), "malformed video packet dropped");
            self.stats.discarded_packets += 1;
            return Disposition::Malformed;
        };
        let retransmitted = header.packet_flags & PACKET_FLAG_RETRANSMITTED != 0;

        if self.paused {
            self.stats.discarded_packets += 1;
            return Disposition::Paused;
        }
        if !link.paired {
            self.stats.discarded_packets += 1;
            return Disposition::NotPaired;
        }
        if retransmitted {
            if let Some(changed) = self.stats.last_params_change_at {
                if now.saturating_duration_since(changed) < RETRANS_IGNORE_AFTER_CHANGE {
                    self.stats.discarded_packets += 1;
                    return Disposition::StaleRetransmission;
                }
            }
        }

        self.absorb_stream_info(&vheader, retransmitted, now, rt);

        let pkt = VideoPacket {
            block_index: vheader.current_block_index,
            packet_index: vheader.current_block_packet_index,
            data_packets: vheader.current_block_data_packets,
            ec_packets: vheader.current_block_ec_packets,
            packet_size: vheader.current_block_packet_size,
            retransmitted,
            payload: Bytes::copy_from_slice(payload),
        };

        let restarts_before = rt.total_restarts_detected;
        let outcome = self.buffer.add_packet(&pkt, now, rt);
        if rt.total_restarts_detected != restarts_before {
            // The encoder that will answer any in-flight request no longer exists.
            self.adaptive.clear_pending();
        }

        match outcome {
            AddOutcome::NewestOnStream => self.retransmission.note_video_packet(now),
            AddOutcome::Stale => self.stats.discarded_packets += 1,
            AddOutcome::Stored => {}
        }

        let mut delivered = self.drain_ready(sink, rt);

        // With no repair path available, a stalled block would hold the
        // cursor forever; drop it and move on.
        if self.buffer.has_incomplete_blocks() && self.should_skip_stalled(link, model) {
            if let Some(target) = self.buffer.max_block_index_present() {
                self.buffer.advance_to_block(target, rt);
                delivered += self.drain_ready(sink, rt);
            }
        }

        Disposition::Processed { delivered }
    }

    /// Digest the flag-multiplexed stream_info side channel plus the always-
    /// present profile/keyframe fields.
    fn absorb_stream_info(
        &mut self,
        vheader: &VideoSegmentHeader,
        retransmitted: bool,
        now: Instant,
        rt: &mut RuntimeInfo,
    ) {
        self.stats.stream_type = vheader.stream_index_and_type >> 4;
        self.stats.observed_keyframe_ms = vheader.keyframe_interval_ms;

        if vheader.video_profile != self.stats.observed_profile {
            tracing::info!(
                from = self.stats.observed_profile,
                to = vheader.video_profile,
                "vehicle switched video profile"
            );
            self.stats.observed_profile = vheader.video_profile;
            self.stats.last_params_change_at = Some(now);
        }

        let info = vheader.stream_info;
        match vheader.stream_info_flags {
            STREAM_INFO_FLAG_SIZE => {
                let width = (info & 0xFFFF) as u16;
                let height = (info >> 16) as u16;
                if (width, height) != (self.stats.width, self.stats.height) {
                    if self.stats.width != 0 {
                        self.reset_stream("resolution change", now, rt);
                    }
                    self.stats.width = width;
                    self.stats.height = height;
                }
            }
            STREAM_INFO_FLAG_FPS => self.stats.fps = info as u8,
            STREAM_INFO_FLAG_ENCODING_FLAGS => {
                if info != self.stats.encoding_flags {
                    if self.stats.encoding_flags != 0 {
                        self.reset_stream("encoding flags change", now, rt);
                    }
                    self.stats.encoding_flags = info;
                }
            }
            STREAM_INFO_FLAG_RETRANSMISSION_ID => {
                if retransmitted {
                    self.retransmission.on_retransmitted_packet_echo(info, now, rt);
                }
            }
            _ => {}
        }
    }

    fn reset_stream(&mut self, what: &'static str, now: Instant, rt: &mut RuntimeInfo) {
        tracing::info!(change = what, "video parameters changed, resetting stream");
        self.buffer.flush(FlushReason::ParamsChange, rt);
        self.adaptive.clear_pending();
        self.stats.last_params_change_at = Some(now);
    }

    /// Explicit controller settings change: same reset, different label.
    pub fn reset_for_settings_change(&mut self, now: Instant, rt: &mut RuntimeInfo) {
        self.buffer.flush(FlushReason::SettingsChange, rt);
        self.adaptive.clear_pending();
        self.stats.last_params_change_at = Some(now);
    }

    fn drain_ready(&mut self, sink: &mut dyn DecoderSink, rt: &mut RuntimeInfo) -> usize {
        let mut delivered = 0;
        while let Some(p) = self.buffer.pop_first_packet() {
            sink.send_to_decoder(
                &p.payload,
                self.stats.width,
                self.stats.height,
                self.stats.stream_type,
            );
            self.stats.outputed_packets += 1;
            delivered += 1;

            if p.frame_flags & FRAME_FLAG_END_OF_FRAME != 0 {
                self.stats.frames_completed += 1;
                rt.current_mut().end_of_frame_packets += 1;
                if p.frame_flags & FRAME_FLAG_HAS_I_NAL != 0 {
                    self.stats.keyframes_seen += 1;
                }
            }
        }
        delivered
    }

    /// Repair via retransmission is pointless in these states; skipping is
    /// the only way forward.
    fn should_skip_stalled(&self, link: &LinkContext, model: &Model) -> bool {
        let no_retransmissions = model
            .profile(self.stats.observed_profile)
            .map_or(true, |p| !p.retransmissions_enabled() || p.one_way());
        no_retransmissions
            || model.spectator
            || link.searching
            || link.updating
            || link.negotiating
    }

    // ── Control packets ──────────────────────────────────────────────────

    /// Entry point for video control packets (profile ack, keyframe ack).
    /// Unknown or short packets are dropped without effect.
    pub fn on_control_packet(&mut self, raw: &[u8], now: Instant) {
        let Some(header) = PacketHeader::read_from_prefix(raw) else {
            return;
        };
        let body = &raw[PACKET_HEADER_LEN.min(raw.len())..];
        match header.packet_type {
            PACKET_TYPE_PROFILE_SWITCH_ACK => {
                if let Some(ack) = ProfileSwitchAck::read_from_prefix(body) {
                    let request_id = ack.request_id;
                    self.adaptive.on_profile_ack(request_id, ack.profile, now);
                }
            }
            PACKET_TYPE_KEYFRAME_SWITCH_ACK => {
                if let Some(ack) = KeyframeSwitchAck::read_from_prefix(body) {
                    let interval = ack.interval_ms;
                    tracing::debug!(interval_ms = interval, "keyframe switch acknowledged");
                }
            }
            _ => {}
        }
    }

    // ── Periodic work ────────────────────────────────────────────────────

    /// One cooperative tick: retransmission requests and adaptive
    /// negotiation. All output is enqueued, never sent inline.
    pub fn periodic_tick(
        &mut self,
        now: Instant,
        force_resync: bool,
        link: &LinkContext,
        model: &Model,
        rt: &mut RuntimeInfo,
        outbound: &mut dyn Outbound,
    ) {
        rt.advance_if_due(now);

        let Some(profile) = model.profile(self.stats.observed_profile) else {
            return;
        };

        if let Some(req) = self.retransmission.maybe_build_request(
            &mut self.buffer,
            link,
            model,
            profile,
            self.stats.last_params_change_at,
            force_resync,
            now,
            rt,
        ) {
            outbound.enqueue(OutboundPacket {
                packet_type: PACKET_TYPE_RETRANSMISSION_REQUEST,
                vehicle_id_dest: self.vehicle_id,
                payload: req.encode(),
            });
        }

        let uplink_usable = link.paired
            && !link.searching
            && !link.updating
            && !link.negotiating
            && !model.spectator
            && !profile.one_way();
        if !uplink_usable {
            return;
        }

        if let Some(req) = self.adaptive.evaluate_profile(model, rt, &self.stats, now) {
            outbound.enqueue(OutboundPacket {
                packet_type: PACKET_TYPE_PROFILE_SWITCH_REQUEST,
                vehicle_id_dest: self.vehicle_id,
                payload: req.as_bytes().to_vec(),
            });
        } else if let Some(req) = self.adaptive.maybe_resend_profile(now) {
            outbound.enqueue(OutboundPacket {
                packet_type: PACKET_TYPE_PROFILE_SWITCH_REQUEST,
                vehicle_id_dest: self.vehicle_id,
                payload: req.as_bytes().to_vec(),
            });
        }

        if let Some(req) = self.adaptive.evaluate_keyframe(&self.stats, now) {
            outbound.enqueue(OutboundPacket {
                packet_type: PACKET_TYPE_KEYFRAME_SWITCH_REQUEST,
                vehicle_id_dest: self.vehicle_id,
                payload: req.as_bytes().to_vec(),
            });
        }
    }
}

/// Boundary parse: split a raw video packet into headers + FEC payload and
/// reject anything malformed or oversized before it can reach the buffer.
fn parse_video_packet(raw: &[u8]) -> Option<(PacketHeader, VideoSegmentHeader, &[u8])> {
    let header = PacketHeader::read_from_prefix(raw)?;
    if header.packet_type != PACKET_TYPE_VIDEO_DATA {
        return None;
    }
    if raw.len() < PACKET_HEADER_LEN + VIDEO_HEADER_LEN {
        return None;
    }
    let vheader = VideoSegmentHeader::read_from_prefix(&raw[PACKET_HEADER_LEN..])?;
    let payload = &raw[PACKET_HEADER_LEN + VIDEO_HEADER_LEN..];

    let total =
        usize::from(vheader.current_block_data_packets) + usize::from(vheader.current_block_ec_packets);
    let packet_size = usize::from(vheader.current_block_packet_size);
    if total == 0
        || total > MAX_PACKETS_PER_BLOCK
        || usize::from(vheader.current_block_packet_index) >= total
        || packet_size > MAX_VIDEO_PAYLOAD
        || payload.len() > packet_size
    {
        return None;
    }
    Some((header, vheader, payload))
}

// ── Tests ────────────────────────────────────────────────────────────────────
