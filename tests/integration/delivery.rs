//! Ordered-delivery pipeline tests: loss, reordering, duplication, repair,
//! retransmission, silence, and vehicle restart, all end to end through the
//! stream processor.

use std::time::{Duration, Instant};

use skylink_core::wire::{
    RetransmissionRequest, PACKET_TYPE_RETRANSMISSION_REQUEST, STREAM_INFO_FLAG_SIZE,
};
use skylink_core::Model;
use skylink_station::{RuntimeInfo, VideoStreamProcessor};

use crate::channel::{with_stream_info, VehicleEncoder, VEHICLE_ID};
use crate::{ready_link, CollectOutbound, CollectSink};

struct Pipeline {
    processor: VideoStreamProcessor,
    model: Model,
    rt: RuntimeInfo,
    sink: CollectSink,
    outbound: CollectOutbound,
}

impl Pipeline {
    fn new() -> Self {
        let model = Model::new(VEHICLE_ID);
        Self {
            processor: VideoStreamProcessor::new(VEHICLE_ID, 0, &model),
            model,
            rt: RuntimeInfo::new(),
            sink: CollectSink::new(),
            outbound: CollectOutbound::new(),
        }
    }

    fn feed(&mut self, raw: &[u8], now: Instant) {
        self.processor.on_video_packet(
            0,
            raw,
            now,
            &ready_link(),
            &self.model,
            &mut self.rt,
            &mut self.sink,
        );
    }

    fn tick(&mut self, now: Instant) {
        self.processor.periodic_tick(
            now,
            false,
            &ready_link(),
            &self.model,
            &mut self.rt,
            &mut self.outbound,
        );
    }

    fn retransmission_requests(&mut self) -> Vec<RetransmissionRequest> {
        self.outbound
            .drain_of_type(PACKET_TYPE_RETRANSMISSION_REQUEST)
            .iter()
            .map(|p| RetransmissionRequest::decode(&p.payload).expect("request decodes"))
            .collect()
    }
}

/// Deterministic per-block video payloads.
fn block_videos(block: u32, count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| format!("block-{block:04}-packet-{i:02}").into_bytes())
        .collect()
}

#[test]
fn clean_stream_delivers_everything_in_order() {
    let mut pipe = Pipeline::new();
    let mut encoder = VehicleEncoder::new(4, 2, 64);
    let now = Instant::now();

    let mut expected = Vec::new();
    for block in 0..5u32 {
        let videos = block_videos(block, 4);
        expected.extend(videos.clone());
        let refs: Vec<&[u8]> = videos.iter().map(|v| v.as_slice()).collect();
        for raw in encoder.encode_block(&refs) {
            pipe.feed(&raw, now);
        }
    }

    assert_eq!(pipe.sink.0, expected);
    assert_eq!(pipe.processor.stats().outputed_packets, 20);
    // One end-of-frame per block.
    assert_eq!(pipe.processor.stats().frames_completed, 5);
}

#[test]
fn losses_within_parity_budget_are_repaired_without_requests() {
    let mut pipe = Pipeline::new();
    let mut encoder = VehicleEncoder::new(4, 2, 64);
    let t0 = Instant::now();

    let mut expected = Vec::new();
    for block in 0..4u32 {
        let videos = block_videos(block, 4);
        expected.extend(videos.clone());
        let refs: Vec<&[u8]> = videos.iter().map(|v| v.as_slice()).collect();
        let packets = encoder.encode_block(&refs);
        // Drop two data packets per block, exactly the parity budget.
        for (i, raw) in packets.iter().enumerate() {
            if i == 1 || i == 2 {
                continue;
            }
            pipe.feed(raw, t0);
        }
    }

    assert_eq!(pipe.sink.0, expected, "parity must cover the losses");

    // Nothing left to request: the tick produces no retransmission request.
    pipe.tick(t0 + Duration::from_millis(30));
    assert!(pipe.retransmission_requests().is_empty());
}

#[test]
fn reordered_and_duplicated_packets_deliver_exactly_once() {
    let mut pipe = Pipeline::new();
    let mut encoder = VehicleEncoder::new(4, 1, 64);
    let now = Instant::now();

    let videos0 = block_videos(0, 4);
    let refs0: Vec<&[u8]> = videos0.iter().map(|v| v.as_slice()).collect();
    let block0 = encoder.encode_block(&refs0);
    let videos1 = block_videos(1, 4);
    let refs1: Vec<&[u8]> = videos1.iter().map(|v| v.as_slice()).collect();
    let block1 = encoder.encode_block(&refs1);

    // The leading packet must arrive first to anchor the stream; everything
    // after comes scrambled across blocks, with duplicates sprinkled in.
    pipe.feed(&block0[0], now);
    let order: [(usize, usize); 11] = [
        (1, 3),
        (0, 2),
        (1, 0),
        (0, 2), // dup
        (0, 1),
        (1, 2),
        (0, 3),
        (1, 1),
        (0, 0), // dup of the anchor
        (1, 3), // dup
        (0, 4), // parity, not needed but absorbed
    ];
    for (block, packet) in order {
        let raw = if block == 0 { &block0[packet] } else { &block1[packet] };
        pipe.feed(raw, now);
    }

    let mut expected = videos0;
    expected.extend(videos1);
    assert_eq!(pipe.sink.0, expected, "each packet exactly once, in order");
}

#[test]
fn retransmission_round_trip_completes_the_stream() {
    let mut pipe = Pipeline::new();
    // No parity: only retransmission can repair.
    let mut encoder = VehicleEncoder::new(4, 0, 64);
    let t0 = Instant::now();

    let videos0 = block_videos(0, 4);
    let refs0: Vec<&[u8]> = videos0.iter().map(|v| v.as_slice()).collect();
    let block0 = encoder.encode_block(&refs0);
    let videos1 = block_videos(1, 4);
    let refs1: Vec<&[u8]> = videos1.iter().map(|v| v.as_slice()).collect();
    let block1 = encoder.encode_block(&refs1);

    // Packet (0,2) is lost; block 1 arrives complete.
    for (i, raw) in block0.iter().enumerate() {
        if i != 2 {
            pipe.feed(raw, t0);
        }
    }
    for raw in &block1 {
        pipe.feed(raw, t0);
    }

    // Output stalls at the hole.
    assert_eq!(pipe.sink.0.len(), 2, "packets 0 and 1 only");

    // The periodic tick asks for the missing packet.
    let t1 = t0 + Duration::from_millis(30);
    pipe.tick(t1);
    let requests = pipe.retransmission_requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].pairs.contains(&(0, 2)));

    // The vehicle answers; the stream completes in order.
    let t2 = t1 + Duration::from_millis(15);
    for raw in encoder.answer_request(&requests[0]) {
        pipe.feed(&raw, t2);
    }

    let mut expected = videos0;
    expected.extend(videos1);
    assert_eq!(pipe.sink.0, expected);

    // The echoed request id produced a round-trip measurement.
    assert_eq!(
        pipe.rt.last_retransmission_rtt,
        Some(Duration::from_millis(15))
    );
}

#[test]
fn silence_past_the_window_flushes_instead_of_requesting() {
    let mut pipe = Pipeline::new();
    // Tighten the window to 100 ms for the test.
    pipe.model.profiles[0] = pipe.model.profiles[0]
        .clone()
        .with_retransmission_window_ms(100);

    let mut encoder = VehicleEncoder::new(4, 0, 64);
    let t0 = Instant::now();

    let videos = block_videos(0, 4);
    let refs: Vec<&[u8]> = videos.iter().map(|v| v.as_slice()).collect();
    let block0 = encoder.encode_block(&refs);
    let videos1 = block_videos(1, 4);
    let refs1: Vec<&[u8]> = videos1.iter().map(|v| v.as_slice()).collect();
    let block1 = encoder.encode_block(&refs1);

    // A hole in block 0, then silence.
    for (i, raw) in block0.iter().enumerate() {
        if i != 1 {
            pipe.feed(raw, t0);
        }
    }
    for raw in &block1 {
        pipe.feed(raw, t0);
    }

    let skipped_before = pipe.rt.total_skipped_blocks;

    // 100 ms of nothing: the whole buffer is past repair.
    pipe.tick(t0 + Duration::from_millis(100));
    assert!(
        pipe.retransmission_requests().is_empty(),
        "silence must flush, not request"
    );
    assert!(pipe.rt.total_skipped_blocks > skipped_before);

    // A fresh block after the flush anchors and flows normally.
    let videos2 = block_videos(2, 4);
    let refs2: Vec<&[u8]> = videos2.iter().map(|v| v.as_slice()).collect();
    let t1 = t0 + Duration::from_millis(150);
    for raw in encoder.encode_block(&refs2) {
        pipe.feed(&raw, t1);
    }
    assert!(pipe.sink.0.ends_with(&videos2[..]));
}

#[test]
fn resolution_announcement_updates_stats_and_change_resets_stream() {
    let mut pipe = Pipeline::new();
    let mut encoder = VehicleEncoder::new(2, 0, 64);
    let t0 = Instant::now();

    let videos = [b"aa".as_slice(), b"bb".as_slice()];
    let packets = encoder.encode_block(&videos);
    pipe.feed(
        &with_stream_info(packets[0].clone(), STREAM_INFO_FLAG_SIZE, (720 << 16) | 1280),
        t0,
    );
    pipe.feed(&packets[1], t0);
    assert_eq!(pipe.processor.stats().width, 1280);
    assert_eq!(pipe.processor.stats().height, 720);
    assert!(pipe.processor.stats().last_params_change_at.is_none());

    // The vehicle switches to 1080p mid-stream: the next announcement resets
    // the pipeline and stamps the change.
    let videos = [b"cc".as_slice(), b"dd".as_slice()];
    let packets = encoder.encode_block(&videos);
    let t1 = t0 + Duration::from_millis(20);
    pipe.feed(
        &with_stream_info(packets[0].clone(), STREAM_INFO_FLAG_SIZE, (1080 << 16) | 1920),
        t1,
    );
    pipe.feed(&packets[1], t1);

    assert_eq!(pipe.processor.stats().width, 1920);
    assert!(pipe.processor.stats().last_params_change_at.is_some());
    // The new block still flowed to the sink after the reset.
    assert!(pipe.sink.0.ends_with(&[b"cc".to_vec(), b"dd".to_vec()]));
}

#[test]
fn vehicle_restart_reanchors_the_stream() {
    let mut pipe = Pipeline::new();
    let mut encoder = VehicleEncoder::new(4, 1, 64);
    let t0 = Instant::now();

    encoder.restart_at(500);
    let videos_old = block_videos(500, 4);
    let refs: Vec<&[u8]> = videos_old.iter().map(|v| v.as_slice()).collect();
    for raw in encoder.encode_block(&refs) {
        pipe.feed(&raw, t0);
    }
    assert_eq!(pipe.sink.0.len(), 4);

    // Reboot: the block counter starts over at zero.
    encoder.restart_at(0);
    let videos_new = block_videos(0, 4);
    let refs: Vec<&[u8]> = videos_new.iter().map(|v| v.as_slice()).collect();
    let t1 = t0 + Duration::from_millis(40);
    for raw in encoder.encode_block(&refs) {
        pipe.feed(&raw, t1);
    }

    assert_eq!(pipe.rt.total_restarts_detected, 1);
    assert!(pipe.sink.0.ends_with(&videos_new[..]), "stream resumed from the new base");
}
