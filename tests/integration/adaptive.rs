//! Adaptive negotiation through the processor: profile lowering on a
//! degraded channel, ack idempotence over the wire, and keyframe-interval
//! renegotiation.

use std::time::{Duration, Instant};

use skylink_core::wire::{
    PacketHeader, ProfileSwitchAck, ProfileSwitchRequest, PACKET_TYPE_KEYFRAME_SWITCH_REQUEST,
    PACKET_TYPE_PROFILE_SWITCH_ACK, PACKET_TYPE_PROFILE_SWITCH_REQUEST,
};
use skylink_core::Model;
use skylink_station::runtime::SLICE_INTERVAL;
use skylink_station::{RuntimeInfo, VideoStreamProcessor};
use zerocopy::{AsBytes, FromBytes};

use crate::channel::{VehicleEncoder, VEHICLE_ID};
use crate::{ready_link, CollectOutbound, CollectSink};

fn ack_packet(request_id: u32, profile: u8) -> Vec<u8> {
    let ack = ProfileSwitchAck {
        request_id,
        profile,
    };
    let header = PacketHeader {
        packet_type: PACKET_TYPE_PROFILE_SWITCH_ACK,
        packet_flags: 0,
        vehicle_id_src: VEHICLE_ID,
        vehicle_id_dest: 100,
        total_length: (core::mem::size_of::<PacketHeader>() + ack.as_bytes().len()) as u16,
    };
    let mut raw = Vec::new();
    raw.extend_from_slice(header.as_bytes());
    raw.extend_from_slice(ack.as_bytes());
    raw
}

#[test]
fn degraded_channel_lowers_profile_once_until_acked() {
    let model = Model::new(VEHICLE_ID);
    let mut processor = VideoStreamProcessor::new(VEHICLE_ID, 0, &model);
    let mut rt = RuntimeInfo::new();
    let mut outbound = CollectOutbound::new();

    // Ten consecutive degraded slices: every interval skipped blocks.
    let t0 = Instant::now();
    rt.advance_if_due(t0);
    for i in 0..10u32 {
        rt.record_skipped_blocks(1);
        rt.advance_if_due(t0 + SLICE_INTERVAL * (i + 1));
    }

    let t1 = t0 + SLICE_INTERVAL * 10 + Duration::from_millis(1);
    processor.periodic_tick(t1, false, &ready_link(), &model, &mut rt, &mut outbound);

    let requests = outbound.drain_of_type(PACKET_TYPE_PROFILE_SWITCH_REQUEST);
    assert_eq!(requests.len(), 1, "exactly one lower-profile request");
    let req = ProfileSwitchRequest::read_from_prefix(&requests[0].payload).unwrap();
    assert_eq!(req.profile, 1, "one profile down from the top");

    // Further ticks inside the resend spacing produce no second request;
    // after the spacing they only resend the same request id.
    let t2 = t1 + Duration::from_millis(2);
    processor.periodic_tick(t2, false, &ready_link(), &model, &mut rt, &mut outbound);
    assert!(outbound
        .drain_of_type(PACKET_TYPE_PROFILE_SWITCH_REQUEST)
        .is_empty());

    let t3 = t1 + Duration::from_millis(15);
    processor.periodic_tick(t3, false, &ready_link(), &model, &mut rt, &mut outbound);
    let resent = outbound.drain_of_type(PACKET_TYPE_PROFILE_SWITCH_REQUEST);
    assert_eq!(resent.len(), 1);
    let resent_req = ProfileSwitchRequest::read_from_prefix(&resent[0].payload).unwrap();
    let (id_a, id_b) = (req.request_id, resent_req.request_id);
    assert_eq!(id_a, id_b, "resend, not a new request");

    // The ack clears the pending slot; resends stop.
    processor.on_control_packet(&ack_packet(id_a, 1), t3);
    assert!(!processor.adaptive().profile_pending().is_pending());

    let t4 = t3 + Duration::from_millis(20);
    processor.periodic_tick(t4, false, &ready_link(), &model, &mut rt, &mut outbound);
    assert!(outbound
        .drain_of_type(PACKET_TYPE_PROFILE_SWITCH_REQUEST)
        .is_empty());
}

#[test]
fn duplicate_and_stale_acks_are_no_ops() {
    let model = Model::new(VEHICLE_ID);
    let mut processor = VideoStreamProcessor::new(VEHICLE_ID, 0, &model);
    let now = Instant::now();

    let req = processor
        .adaptive_mut()
        .request_user_profile(model.profile(1).unwrap(), now);

    // A stale id does nothing.
    processor.on_control_packet(&ack_packet(req.request_id + 100, 1), now);
    assert!(processor.adaptive().profile_pending().is_pending());

    // The real ack applies; repeating it changes nothing further.
    processor.on_control_packet(&ack_packet(req.request_id, 1), now);
    assert!(!processor.adaptive().profile_pending().is_pending());
    processor.on_control_packet(&ack_packet(req.request_id, 1), now);
    assert!(!processor.adaptive().profile_pending().is_pending());
}

#[test]
fn keyframe_interval_renegotiates_until_observed() {
    let model = Model::new(VEHICLE_ID);
    let mut processor = VideoStreamProcessor::new(VEHICLE_ID, 0, &model);
    let mut rt = RuntimeInfo::new();
    let mut sink = CollectSink::new();
    let mut outbound = CollectOutbound::new();
    let t0 = Instant::now();

    processor
        .adaptive_mut()
        .request_keyframe_interval(2000, t0);

    // The vehicle still announces 5000 ms: the request is resent.
    let t1 = t0 + Duration::from_millis(15);
    processor.periodic_tick(t1, false, &ready_link(), &model, &mut rt, &mut outbound);
    let sent = outbound.drain_of_type(PACKET_TYPE_KEYFRAME_SWITCH_REQUEST);
    assert_eq!(sent.len(), 1);

    // The vehicle applies the new interval and announces it in the next
    // video packets; the pending slot clears and resends stop.
    let mut encoder = VehicleEncoder::new(2, 0, 64);
    encoder.keyframe_ms = 2000;
    let videos = [b"aa".as_slice(), b"bb".as_slice()];
    for raw in encoder.encode_block(&videos) {
        processor.on_video_packet(0, &raw, t1, &ready_link(), &model, &mut rt, &mut sink);
    }

    let t2 = t1 + Duration::from_millis(20);
    processor.periodic_tick(t2, false, &ready_link(), &model, &mut rt, &mut outbound);
    assert!(outbound
        .drain_of_type(PACKET_TYPE_KEYFRAME_SWITCH_REQUEST)
        .is_empty());
    assert!(!processor.adaptive().keyframe_pending().is_pending());
}
