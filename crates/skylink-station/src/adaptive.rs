//! Adaptive link controller — renegotiates the video profile and keyframe
//! interval to match channel quality.
//!
//! Not a strict state machine: two independent one-shot pending-change
//! slots (profile, keyframe), each going Idle → Requested → (Acked |
//! Superseded) → Idle. Requests are idempotent on the wire — repeating the
//! same (value, request_id) is harmless, and the newest pending value always
//! wins — so losing a request or an ack costs nothing but a resend.

use std::time::{Duration, Instant};

use skylink_core::wire::{KeyframeSwitchRequest, ProfileSwitchRequest};
use skylink_core::{Model, VideoProfile};

use crate::runtime::RuntimeInfo;
use crate::stats::StreamStats;

/// Minimum spacing between resends of an un-acked request.
const RESEND_SPACING: Duration = Duration::from_millis(10);

/// Who asked for a pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    User,
    AutoLower,
    AutoHigher,
}

/// One pending-change slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingChange<T> {
    Idle,
    Requested {
        value: T,
        request_id: u32,
        requested_at: Instant,
        last_sent_at: Instant,
        origin: RequestOrigin,
    },
}

impl<T> PendingChange<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, PendingChange::Requested { .. })
    }
}

/// Per-vehicle adaptive state.
#[derive(Debug)]
pub struct AdaptiveLinkController {
    stream_index: u8,
    profile: PendingChange<u8>,
    keyframe: PendingChange<u32>,
    profile_request_id: u32,
    keyframe_request_id: u8,
    pub last_profile_request_at: Option<Instant>,
    pub last_profile_ack_at: Option<Instant>,
    /// When the currently observed profile took effect; anchors the raise
    /// cool-down.
    profile_entered_at: Option<Instant>,
}

impl AdaptiveLinkController {
    pub fn new(stream_index: u8) -> Self {
        Self {
            stream_index,
            profile: PendingChange::Idle,
            keyframe: PendingChange::Idle,
            profile_request_id: 0,
            keyframe_request_id: 0,
            last_profile_request_at: None,
            last_profile_ack_at: None,
            profile_entered_at: None,
        }
    }

    // ── Profile slot ─────────────────────────────────────────────────────

    /// Judge recent channel quality and maybe request a profile change.
    /// Lowering takes priority over raising; at most one request fires per
    /// evaluation, and nothing fires while a request is already pending.
    pub fn evaluate_profile(
        &mut self,
        model: &Model,
        rt: &RuntimeInfo,
        stats: &StreamStats,
        now: Instant,
    ) -> Option<ProfileSwitchRequest> {
        let current = stats.observed_profile;
        let profile = model.profile(current)?;
        if model.spectator || !profile.adaptive_enabled() || self.profile.is_pending() {
            return None;
        }
        let entered = *self.profile_entered_at.get_or_insert(now);

        let strength = u32::from(model.adjustment_strength.clamp(1, 10));
        let ec_scheme = u16::from(profile.ec_packets_per_block);

        // Short lookback for lowering: react fast to a degrading channel.
        let lookback = strength as usize;
        let score = degraded_score(rt, lookback, ec_scheme);
        if score > (10 - strength) / 2 {
            let target = model.next_lower_profile(current)?;
            tracing::info!(
                from = current,
                to = target.id,
                score,
                "channel degraded, requesting lower profile"
            );
            return Some(self.request_profile(target, RequestOrigin::AutoLower, now));
        }

        // Long lookback and a cool-down for raising: only climb back after a
        // sustained clean stretch.
        let raise_score = degraded_score(rt, lookback * 10, ec_scheme);
        let raise_threshold = (10 - strength) / 3 + 1;
        let cooldown = Duration::from_millis(3000 + u64::from(10 - strength) * 400);
        if raise_score < raise_threshold && now.saturating_duration_since(entered) >= cooldown {
            let target = model.next_higher_profile(current)?;
            tracing::info!(
                from = current,
                to = target.id,
                raise_score,
                "channel clean, requesting higher profile"
            );
            return Some(self.request_profile(target, RequestOrigin::AutoHigher, now));
        }

        None
    }

    /// User-initiated switch. Overwrites any pending auto request; the
    /// newest pending value silently wins.
    pub fn request_user_profile(&mut self, profile: &VideoProfile, now: Instant) -> ProfileSwitchRequest {
        self.request_profile(profile, RequestOrigin::User, now)
    }

    fn request_profile(
        &mut self,
        target: &VideoProfile,
        origin: RequestOrigin,
        now: Instant,
    ) -> ProfileSwitchRequest {
        self.profile_request_id = self.profile_request_id.wrapping_add(1);
        self.profile = PendingChange::Requested {
            value: target.id,
            request_id: self.profile_request_id,
            requested_at: now,
            last_sent_at: now,
            origin,
        };
        self.last_profile_request_at = Some(now);
        ProfileSwitchRequest {
            request_id: self.profile_request_id,
            profile: target.id,
            stream_index: self.stream_index,
        }
    }

    /// Resend the pending profile request on the periodic tick. There is no
    /// distinct timeout path; an unanswered request is simply sent again,
    /// bounded by the evaluation guards.
    pub fn maybe_resend_profile(&mut self, now: Instant) -> Option<ProfileSwitchRequest> {
        let PendingChange::Requested {
            value,
            request_id,
            last_sent_at,
            ..
        } = self.profile
        else {
            return None;
        };
        if now.saturating_duration_since(last_sent_at) < RESEND_SPACING {
            return None;
        }
        if let PendingChange::Requested { last_sent_at, .. } = &mut self.profile {
            *last_sent_at = now;
        }
        Some(ProfileSwitchRequest {
            request_id,
            profile: value,
            stream_index: self.stream_index,
        })
    }

    /// Apply a profile ack. Only an exact (request id, profile) match clears
    /// the pending slot; an ack to a superseded request changes nothing but
    /// is still counted for round-trip bookkeeping. Idempotent.
    pub fn on_profile_ack(&mut self, ack_request_id: u32, ack_profile: u8, now: Instant) -> bool {
        let PendingChange::Requested {
            value, request_id, ..
        } = self.profile
        else {
            return false;
        };
        if request_id != ack_request_id {
            return false;
        }
        self.last_profile_ack_at = Some(now);
        if value != ack_profile {
            // Ack for a superseded value; the newer pending request stands.
            return false;
        }
        self.profile = PendingChange::Idle;
        self.profile_entered_at = Some(now);
        tracing::info!(profile = ack_profile, "profile switch acknowledged");
        true
    }

    // ── Keyframe slot ────────────────────────────────────────────────────

    /// Ask the vehicle for a new keyframe interval. Returns the first
    /// request; resends happen via `evaluate_keyframe`.
    pub fn request_keyframe_interval(&mut self, interval_ms: u32, now: Instant) -> KeyframeSwitchRequest {
        self.keyframe_request_id = self.keyframe_request_id.wrapping_add(1);
        self.keyframe = PendingChange::Requested {
            value: interval_ms,
            request_id: u32::from(self.keyframe_request_id),
            requested_at: now,
            last_sent_at: now,
            origin: RequestOrigin::User,
        };
        KeyframeSwitchRequest {
            request_id: self.keyframe_request_id,
            interval_ms,
            stream_index: self.stream_index,
        }
    }

    /// Clear the pending keyframe slot once the observed interval matches;
    /// resend while it differs.
    pub fn evaluate_keyframe(&mut self, stats: &StreamStats, now: Instant) -> Option<KeyframeSwitchRequest> {
        let PendingChange::Requested {
            value,
            request_id,
            last_sent_at,
            ..
        } = self.keyframe
        else {
            return None;
        };
        if u32::from(stats.observed_keyframe_ms) == value {
            self.keyframe = PendingChange::Idle;
            tracing::debug!(interval_ms = value, "keyframe interval took effect");
            return None;
        }
        if now.saturating_duration_since(last_sent_at) < RESEND_SPACING {
            return None;
        }
        if let PendingChange::Requested { last_sent_at, .. } = &mut self.keyframe {
            *last_sent_at = now;
        }
        Some(KeyframeSwitchRequest {
            request_id: request_id as u8,
            interval_ms: value,
            stream_index: self.stream_index,
        })
    }

    // ── Resets ───────────────────────────────────────────────────────────

    /// Drop both pending slots. Called on vehicle restart and buffer resets;
    /// whatever was in flight no longer applies to the rebooted encoder.
    pub fn clear_pending(&mut self) {
        self.profile = PendingChange::Idle;
        self.keyframe = PendingChange::Idle;
        self.profile_entered_at = None;
    }

    pub fn profile_pending(&self) -> &PendingChange<u8> {
        &self.profile
    }

    pub fn keyframe_pending(&self) -> &PendingChange<u32> {
        &self.keyframe
    }
}

/// Count degraded slices over the last `lookback` completed intervals:
/// +2 for any slice that skipped blocks outright, +1 for a slice whose block
/// repair consumed (nearly) the whole parity budget.
fn degraded_score(rt: &RuntimeInfo, lookback: usize, ec_scheme: u16) -> u32 {
    let mut score = 0;
    for slice in rt.completed_slices_back(lookback) {
        if slice.skipped_blocks > 0 {
            score += 2;
        } else if slice.max_ec_packets_used > 0
            && slice.max_ec_packets_used >= ec_scheme.saturating_sub(1)
        {
            score += 1;
        }
    }
    score
}

// ── Tests ────────────────────────────────────────────────────────────────────
