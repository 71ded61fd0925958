//! Per-vehicle model — the video profile table and link tuning knobs.
//!
//! A profile is one named bitrate/resolution/FEC configuration. Profiles are
//! ordered best-first; "one profile lower" always means the next table entry.
//! The ground station never edits a vehicle's table at runtime, it only
//! selects which entry the encoder should produce.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Encoding Flags ───────────────────────────────────────────────────────────

/// The vehicle answers retransmission requests while this profile is active.
pub const ENCODING_FLAG_ENABLE_RETRANSMISSIONS: u32 = 1 << 0;
/// The ground station may auto-switch away from this profile.
pub const ENCODING_FLAG_ENABLE_ADAPTIVE: u32 = 1 << 1;
/// Uplink unavailable (one-way link); no requests of any kind are sent.
pub const ENCODING_FLAG_ONE_WAY: u32 = 1 << 2;

/// Bits 8-15 of the encoding flags hold the retransmission window in 5 ms
/// units: the time budget a block has to get repaired before it is skipped.
pub const ENCODING_FLAGS_WINDOW_SHIFT: u32 = 8;
pub const ENCODING_FLAGS_WINDOW_MASK: u32 = 0xFF;

// ── Video Profile ────────────────────────────────────────────────────────────

/// One video bitrate/resolution/quality configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoProfile {
    /// Wire id, carried in every video segment header.
    pub id: u8,
    pub name: String,
    pub width: u16,
    pub height: u16,
    pub fps: u8,
    pub bitrate_bps: u32,
    pub keyframe_interval_ms: u16,
    /// FEC geometry: data packets per block.
    pub data_packets_per_block: u8,
    /// FEC geometry: parity packets per block.
    pub ec_packets_per_block: u8,
    /// ENCODING_FLAG_* bits plus the windowed fields above.
    pub encoding_flags: u32,
}

impl VideoProfile {
    pub fn retransmissions_enabled(&self) -> bool {
        self.encoding_flags & ENCODING_FLAG_ENABLE_RETRANSMISSIONS != 0
    }

    pub fn adaptive_enabled(&self) -> bool {
        self.encoding_flags & ENCODING_FLAG_ENABLE_ADAPTIVE != 0
    }

    pub fn one_way(&self) -> bool {
        self.encoding_flags & ENCODING_FLAG_ONE_WAY != 0
    }

    /// Retransmission window: how long a block may wait for repair.
    pub fn retransmission_window(&self) -> Duration {
        let units = (self.encoding_flags >> ENCODING_FLAGS_WINDOW_SHIFT) & ENCODING_FLAGS_WINDOW_MASK;
        Duration::from_millis(u64::from(units) * 5)
    }

    /// Pack a window duration into the encoding-flags field.
    pub fn with_retransmission_window_ms(mut self, window_ms: u32) -> Self {
        let units = (window_ms / 5).min(ENCODING_FLAGS_WINDOW_MASK);
        self.encoding_flags &= !(ENCODING_FLAGS_WINDOW_MASK << ENCODING_FLAGS_WINDOW_SHIFT);
        self.encoding_flags |= units << ENCODING_FLAGS_WINDOW_SHIFT;
        self
    }
}

// ── Model ────────────────────────────────────────────────────────────────────

/// Everything the ground station knows about one paired vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub vehicle_id: u32,

    /// Profile table, ordered best quality first.
    pub profiles: Vec<VideoProfile>,

    /// The profile the user picked. Auto-adjustment never goes above it.
    pub user_selected_profile: u8,

    /// How aggressively to auto-adjust the profile, 1 (cautious) to 10.
    pub adjustment_strength: u8,

    /// Spectator mode: receive-only, no requests are ever sent.
    pub spectator: bool,
}

impl Model {
    pub fn new(vehicle_id: u32) -> Self {
        let profiles = default_profile_table();
        Self {
            vehicle_id,
            user_selected_profile: profiles[0].id,
            profiles,
            adjustment_strength: 5,
            spectator: false,
        }
    }

    pub fn profile(&self, id: u8) -> Option<&VideoProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    fn position(&self, id: u8) -> Option<usize> {
        self.profiles.iter().position(|p| p.id == id)
    }

    /// Next profile down in quality, or None if already at the bottom.
    pub fn next_lower_profile(&self, id: u8) -> Option<&VideoProfile> {
        let at = self.position(id)?;
        self.profiles.get(at + 1)
    }

    /// Next profile up in quality, capped at the user-selected profile.
    pub fn next_higher_profile(&self, id: u8) -> Option<&VideoProfile> {
        let at = self.position(id)?;
        let ceiling = self.position(self.user_selected_profile)?;
        if at == 0 || at <= ceiling {
            return None;
        }
        self.profiles.get(at - 1)
    }
}

/// Built-in three-tier table. Real deployments overwrite this from config.
pub fn default_profile_table() -> Vec<VideoProfile> {
    vec![
        VideoProfile {
            id: 0,
            name: "high".into(),
            width: 1920,
            height: 1080,
            fps: 60,
            bitrate_bps: 12_000_000,
            keyframe_interval_ms: 5000,
            data_packets_per_block: 8,
            ec_packets_per_block: 4,
            encoding_flags: ENCODING_FLAG_ENABLE_RETRANSMISSIONS | ENCODING_FLAG_ENABLE_ADAPTIVE,
        }
        .with_retransmission_window_ms(180),
        VideoProfile {
            id: 1,
            name: "medium".into(),
            width: 1280,
            height: 720,
            fps: 60,
            bitrate_bps: 7_000_000,
            keyframe_interval_ms: 4000,
            data_packets_per_block: 8,
            ec_packets_per_block: 4,
            encoding_flags: ENCODING_FLAG_ENABLE_RETRANSMISSIONS | ENCODING_FLAG_ENABLE_ADAPTIVE,
        }
        .with_retransmission_window_ms(150),
        VideoProfile {
            id: 2,
            name: "low".into(),
            width: 1280,
            height: 720,
            fps: 30,
            bitrate_bps: 3_000_000,
            keyframe_interval_ms: 2000,
            data_packets_per_block: 6,
            ec_packets_per_block: 4,
            encoding_flags: ENCODING_FLAG_ENABLE_RETRANSMISSIONS | ENCODING_FLAG_ENABLE_ADAPTIVE,
        }
        .with_retransmission_window_ms(120),
    ]
}

// ── Tests ────────────────────────────────────────────────────────────────────
