//! Decode-side stream statistics, updated by the stream processor and read
//! by the adaptive controller and any status reporting.

use std::time::Instant;

/// What the ground station currently observes about one video stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamStats {
    /// Profile id the vehicle encoder says it is producing.
    pub observed_profile: u8,
    /// Keyframe interval the vehicle encoder says it is using.
    pub observed_keyframe_ms: u16,
    pub width: u16,
    pub height: u16,
    pub fps: u8,
    /// STREAM_TYPE_* nibble from the segment header.
    pub stream_type: u8,
    /// Active profile encoding flags as announced by the vehicle.
    pub encoding_flags: u32,
    /// Last time resolution/fps/encoding parameters changed.
    pub last_params_change_at: Option<Instant>,

    pub outputed_packets: u64,
    pub discarded_packets: u64,
    pub frames_completed: u64,
    pub keyframes_seen: u64,
}

impl StreamStats {
    pub fn new(initial_profile: u8) -> Self {
        Self {
            observed_profile: initial_profile,
            observed_keyframe_ms: 0,
            width: 0,
            height: 0,
            fps: 0,
            stream_type: 0,
            encoding_flags: 0,
            last_params_change_at: None,
            outputed_packets: 0,
            discarded_packets: 0,
            frames_completed: 0,
            keyframes_seen: 0,
        }
    }
}
