//! Engine task — the single-threaded cooperative loop that owns every
//! per-vehicle stream processor.
//!
//! All engine state is exclusively owned by this task; the inbound and
//! outbound queues are the only cross-thread boundaries.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use zerocopy::{AsBytes, FromBytes};

use skylink_core::config::StationConfig;
use skylink_core::wire::{
    PacketHeader, PACKET_TYPE_KEYFRAME_SWITCH_ACK, PACKET_TYPE_KEYFRAME_SWITCH_REQUEST,
    PACKET_TYPE_PROFILE_SWITCH_ACK, PACKET_TYPE_VIDEO_DATA,
};
use skylink_core::Model;
use skylink_station::{
    DecoderSink, LinkContext, Outbound, OutboundPacket, RuntimeInfo, VideoStreamProcessor,
};

/// Main-loop cadence. Retransmission timing is the tightest constraint in
/// the engine; 5 ms keeps request spacing honest without busy-waiting.
const TICK_INTERVAL: Duration = Duration::from_millis(5);

/// Everything the engine tracks for one vehicle.
struct VehicleEntry {
    model: Model,
    runtime: RuntimeInfo,
    processor: VideoStreamProcessor,
    last_packet_at: Instant,
    paired: bool,
}

pub struct Engine<S: DecoderSink, O: Outbound> {
    config: StationConfig,
    vehicles: HashMap<u32, VehicleEntry>,
    sink: S,
    outbound: O,
}

impl<S: DecoderSink, O: Outbound> Engine<S, O> {
    pub fn new(config: StationConfig, sink: S, outbound: O) -> Self {
        Self {
            config,
            vehicles: HashMap::new(),
            sink,
            outbound,
        }
    }

    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Vec<u8>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("engine shutting down");
                    return;
                }
                maybe = inbound.recv() => {
                    let Some(raw) = maybe else {
                        tracing::info!("inbound queue closed, engine exiting");
                        return;
                    };
                    self.handle_packet(&raw, Instant::now());
                }
                _ = interval.tick() => {
                    self.tick(Instant::now());
                }
            }
        }
    }

    fn handle_packet(&mut self, raw: &[u8], now: Instant) {
        let Some(header) = PacketHeader::read_from_prefix(raw) else {
            tracing::trace!(len = raw.len(), "unparseable radio packet dropped");
            return;
        };
        let packet_type = header.packet_type;
        let vehicle_id = header.vehicle_id_src;

        if !self.vehicles.contains_key(&vehicle_id) {
            self.create_entry(vehicle_id, now);
        }
        let Some(entry) = self.vehicles.get_mut(&vehicle_id) else {
            return;
        };
        entry.last_packet_at = now;
        // Pairing proper lives in the session layer; here the first packet
        // from a vehicle stands in for a completed handshake.
        entry.paired = true;

        let link = link_context(entry, &self.config, now);

        match packet_type {
            PACKET_TYPE_VIDEO_DATA => {
                entry.processor.on_video_packet(
                    0,
                    raw,
                    now,
                    &link,
                    &entry.model,
                    &mut entry.runtime,
                    &mut self.sink,
                );
            }
            PACKET_TYPE_PROFILE_SWITCH_ACK | PACKET_TYPE_KEYFRAME_SWITCH_ACK => {
                entry.processor.on_control_packet(raw, now);
            }
            other => {
                tracing::trace!(packet_type = other, "ignoring non-video packet");
            }
        }
    }

    fn tick(&mut self, now: Instant) {
        for entry in self.vehicles.values_mut() {
            let link = link_context(entry, &self.config, now);
            entry.processor.periodic_tick(
                now,
                false,
                &link,
                &entry.model,
                &mut entry.runtime,
                &mut self.outbound,
            );
        }
    }

    fn create_entry(&mut self, vehicle_id: u32, now: Instant) {
        tracing::info!(vehicle_id, "first packet from vehicle, creating stream");
        let mut model = Model::new(vehicle_id);
        if self.config.video.adjustment_strength != 0 {
            model.adjustment_strength = self.config.video.adjustment_strength.clamp(1, 10);
        }
        let mut processor = VideoStreamProcessor::new(vehicle_id, 0, &model);

        // Negotiate the configured keyframe interval on connect.
        let interval_ms = self.config.video.requested_keyframe_interval_ms;
        if interval_ms != 0 {
            let req = processor
                .adaptive_mut()
                .request_keyframe_interval(interval_ms, now);
            self.outbound.enqueue(OutboundPacket {
                packet_type: PACKET_TYPE_KEYFRAME_SWITCH_REQUEST,
                vehicle_id_dest: vehicle_id,
                payload: req.as_bytes().to_vec(),
            });
        }

        self.vehicles.insert(
            vehicle_id,
            VehicleEntry {
                model,
                runtime: RuntimeInfo::new(),
                processor,
                last_packet_at: now,
                paired: false,
            },
        );
    }
}

fn link_context(entry: &VehicleEntry, config: &StationConfig, now: Instant) -> LinkContext {
    let lost = now.saturating_duration_since(entry.last_packet_at)
        > Duration::from_millis(u64::from(config.video.link_lost_ms));
    LinkContext {
        paired: entry.paired,
        searching: false,
        updating: false,
        negotiating: false,
        link_lost: lost,
    }
}
