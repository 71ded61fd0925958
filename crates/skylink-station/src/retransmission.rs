//! Retransmission controller — asks the vehicle to resend missing packets.
//!
//! The half-duplex link makes every request expensive: each one steals air
//! time from the video itself. Requests are therefore rate-limited with a
//! growing interval, capped in size, and skipped entirely once the
//! retransmission window has passed and the buffer can only be abandoned.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use skylink_core::wire::{RetransmissionRequest, MAX_RETRANS_PER_REQUEST};
use skylink_core::{Model, VideoProfile};

use crate::link::LinkContext;
use crate::reassembly::{FlushReason, VideoReassemblyBuffer};
use crate::runtime::RuntimeInfo;

/// Minimum spacing between two requests; the starting backoff value.
const REQUEST_INTERVAL_MIN: Duration = Duration::from_millis(10);
/// Backoff ceiling.
const REQUEST_INTERVAL_MAX: Duration = Duration::from_millis(50);
/// Backoff growth per emitted request.
const REQUEST_INTERVAL_STEP: Duration = Duration::from_millis(5);

/// Hold off after a profile/encoding change; the pipeline is resettling and
/// any gap is likely a stale artifact of the switch.
const ENCODING_CHANGE_HOLDOFF: Duration = Duration::from_millis(200);

/// The topmost block is "actively receiving" within this margin of the last
/// packet; its holes are packets still in flight, not losses.
const TOP_BLOCK_ACTIVE_MARGIN: Duration = Duration::from_millis(20);

/// Subtracted from the retransmission window for the silence check, so the
/// flush fires just before the window would expire anyway.
const SILENCE_MARGIN: Duration = Duration::from_millis(10);

/// Sent requests remembered for round-trip measurement.
const SENT_RING: usize = 16;

/// Per (vehicle, stream) retransmission state.
#[derive(Debug)]
pub struct RetransmissionController {
    stream_index: u8,
    request_id: u32,
    last_request_at: Option<Instant>,
    next_request_interval: Duration,
    /// Last time a packet that advanced the stream arrived.
    last_video_packet_at: Option<Instant>,
    /// Recently sent requests, oldest first, for RTT lookup.
    sent: VecDeque<(u32, Instant)>,
}

impl RetransmissionController {
    pub fn new(stream_index: u8) -> Self {
        Self {
            stream_index,
            request_id: 0,
            last_request_at: None,
            next_request_interval: REQUEST_INTERVAL_MIN,
            last_video_packet_at: None,
            sent: VecDeque::with_capacity(SENT_RING),
        }
    }

    /// Called by the stream processor whenever a packet advances the stream.
    pub fn note_video_packet(&mut self, now: Instant) {
        self.last_video_packet_at = Some(now);
    }

    /// Inspect the buffer's gaps and maybe emit one bounded request.
    ///
    /// Flushes the buffer instead when the silence exceeds the profile's
    /// retransmission window: nothing in it can be repaired in time anymore.
    #[allow(clippy::too_many_arguments)]
    pub fn maybe_build_request(
        &mut self,
        buffer: &mut VideoReassemblyBuffer,
        link: &LinkContext,
        model: &Model,
        profile: &VideoProfile,
        last_params_change: Option<Instant>,
        force_resync: bool,
        now: Instant,
        rt: &mut RuntimeInfo,
    ) -> Option<RetransmissionRequest> {
        if !link.paired || link.searching || link.updating || link.negotiating || link.link_lost {
            return None;
        }
        if model.spectator || !profile.retransmissions_enabled() || profile.one_way() {
            return None;
        }
        let last_packet = self.last_video_packet_at?;
        if let Some(changed) = last_params_change {
            if now.saturating_duration_since(changed) < ENCODING_CHANGE_HOLDOFF {
                return None;
            }
        }

        let window = profile.retransmission_window();

        // Past the window with nothing new: the whole buffer is unrecoverable.
        if !window.is_zero()
            && now.saturating_duration_since(last_packet) + SILENCE_MARGIN >= window
        {
            if !buffer.is_empty() {
                tracing::debug!(
                    silent_ms = now.saturating_duration_since(last_packet).as_millis() as u64,
                    "video silence exceeded retransmission window"
                );
                buffer.flush(FlushReason::SilenceTimeout, rt);
            }
            self.last_video_packet_at = Some(now);
            self.next_request_interval = REQUEST_INTERVAL_MIN;
            return None;
        }

        if !buffer.has_incomplete_blocks() {
            return None;
        }

        if !force_resync {
            if let Some(last) = self.last_request_at {
                if now.saturating_duration_since(last) >= window {
                    self.next_request_interval = REQUEST_INTERVAL_MIN;
                } else if now.saturating_duration_since(last) < self.next_request_interval {
                    return None;
                }
            }
        }

        let pairs = self.collect_missing(buffer, now);
        if pairs.is_empty() {
            return None;
        }

        self.request_id = self.request_id.wrapping_add(1);
        self.last_request_at = Some(now);
        self.next_request_interval =
            (self.next_request_interval + REQUEST_INTERVAL_STEP).min(REQUEST_INTERVAL_MAX);

        if self.sent.len() == SENT_RING {
            self.sent.pop_front();
        }
        self.sent.push_back((self.request_id, now));

        let slice = rt.current_mut();
        slice.requested_retransmissions += 1;
        slice.requested_retransmission_packets += pairs.len() as u32;

        tracing::debug!(
            request_id = self.request_id,
            packets = pairs.len(),
            "requesting retransmission"
        );

        Some(RetransmissionRequest {
            request_id: self.request_id,
            stream_index: self.stream_index,
            pairs,
        })
    }

    /// Walk blocks oldest to newest collecting empty data slots, up to the
    /// per-request cap. The topmost block is included only when it is not
    /// actively receiving right now — its holes may still be in flight.
    fn collect_missing(&self, buffer: &VideoReassemblyBuffer, now: Instant) -> Vec<(u32, u8)> {
        let count = buffer.blocks_count();
        let mut pairs = Vec::new();

        'blocks: for offset in 0..count {
            let Some(block) = buffer.block_at(offset) else {
                break;
            };
            if block.data_packet_count() == 0 || block.is_repairable() {
                continue;
            }
            if offset == count - 1 {
                let active = self
                    .last_video_packet_at
                    .map_or(true, |t| now.saturating_duration_since(t) < TOP_BLOCK_ACTIVE_MARGIN);
                if active {
                    continue;
                }
            }
            for idx in block.missing_data_indices() {
                pairs.push((block.block_index(), idx));
                if pairs.len() >= MAX_RETRANS_PER_REQUEST {
                    break 'blocks;
                }
            }
        }
        pairs
    }

    /// A retransmitted packet carried the id of the last request the vehicle
    /// saw; resolving it against the sent ring is the engine's only latency
    /// measurement.
    pub fn on_retransmitted_packet_echo(&mut self, echoed_id: u32, now: Instant, rt: &mut RuntimeInfo) {
        let Some(at) = self.sent.iter().position(|&(id, _)| id == echoed_id) else {
            return;
        };
        let (_, sent_at) = self.sent[at];
        rt.record_retransmission_rtt(now.saturating_duration_since(sent_at));
        // This and anything older can no longer produce a first echo.
        self.sent.drain(..=at);
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
