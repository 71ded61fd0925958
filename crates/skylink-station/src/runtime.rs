//! Per-vehicle runtime info — a fixed ring of per-interval link counters.
//!
//! The stream processor and retransmission controller write into the current
//! slice; the adaptive controller reads completed slices to judge channel
//! quality. One slice covers 100 ms; the ring holds 4 seconds of history.
//! Nothing here allocates after construction.

use std::time::{Duration, Instant};

/// Slices in the ring. One is always the in-progress current slice.
pub const RUNTIME_SLICES: usize = 40;

/// Wall time covered by one slice.
pub const SLICE_INTERVAL: Duration = Duration::from_millis(100);

/// Counters for one interval.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntervalCounters {
    pub recv_data_packets: u32,
    pub recv_ec_packets: u32,
    /// Highest number of parity packets consumed to repair one block.
    pub max_ec_packets_used: u16,
    /// Blocks dropped without being output (flushes and deliberate skips).
    pub skipped_blocks: u32,
    pub requested_retransmissions: u32,
    pub requested_retransmission_packets: u32,
    pub end_of_frame_packets: u32,
}

/// The ring itself, one per (vehicle, stream).
#[derive(Debug)]
pub struct RuntimeInfo {
    slices: [IntervalCounters; RUNTIME_SLICES],
    current: usize,
    slice_started_at: Option<Instant>,

    /// Lifetime totals, never reset.
    pub total_skipped_blocks: u64,
    pub total_restarts_detected: u32,

    /// Latest measured retransmission round trip.
    pub last_retransmission_rtt: Option<Duration>,
    pub min_retransmission_rtt: Option<Duration>,
    pub max_retransmission_rtt: Option<Duration>,
}

impl RuntimeInfo {
    pub fn new() -> Self {
        Self {
            slices: [IntervalCounters::default(); RUNTIME_SLICES],
            current: 0,
            slice_started_at: None,
            total_skipped_blocks: 0,
            total_restarts_detected: 0,
            last_retransmission_rtt: None,
            min_retransmission_rtt: None,
            max_retransmission_rtt: None,
        }
    }

    /// Rotate to a fresh slice if the current one has covered its interval.
    /// Cheap; called once per main-loop tick.
    pub fn advance_if_due(&mut self, now: Instant) {
        match self.slice_started_at {
            None => self.slice_started_at = Some(now),
            Some(started) => {
                let mut elapsed = now.saturating_duration_since(started);
                // Catch up over stalls: rotate once per whole interval missed.
                while elapsed >= SLICE_INTERVAL {
                    self.current = (self.current + 1) % RUNTIME_SLICES;
                    self.slices[self.current] = IntervalCounters::default();
                    elapsed -= SLICE_INTERVAL;
                }
                self.slice_started_at = Some(now - elapsed);
            }
        }
    }

    /// The in-progress slice.
    pub fn current_mut(&mut self) -> &mut IntervalCounters {
        &mut self.slices[self.current]
    }

    /// Record a block flush or deliberate skip of `count` blocks.
    pub fn record_skipped_blocks(&mut self, count: u32) {
        self.slices[self.current].skipped_blocks += count;
        self.total_skipped_blocks += u64::from(count);
    }

    /// Record that reconstruction of one block consumed `used` parity packets.
    pub fn record_ec_used(&mut self, used: u16) {
        let slice = &mut self.slices[self.current];
        if used > slice.max_ec_packets_used {
            slice.max_ec_packets_used = used;
        }
    }

    pub fn record_restart_detected(&mut self) {
        self.total_restarts_detected += 1;
    }

    pub fn record_retransmission_rtt(&mut self, rtt: Duration) {
        self.last_retransmission_rtt = Some(rtt);
        if self.min_retransmission_rtt.map_or(true, |m| rtt < m) {
            self.min_retransmission_rtt = Some(rtt);
        }
        if self.max_retransmission_rtt.map_or(true, |m| rtt > m) {
            self.max_retransmission_rtt = Some(rtt);
        }
    }

    /// The most recent `n` completed slices, newest first. The in-progress
    /// slice is excluded; `n` is capped at the ring size minus one.
    pub fn completed_slices_back(&self, n: usize) -> impl Iterator<Item = &IntervalCounters> {
        let n = n.min(RUNTIME_SLICES - 1);
        (1..=n).map(move |back| {
            let at = (self.current + RUNTIME_SLICES - back) % RUNTIME_SLICES;
            &self.slices[at]
        })
    }
}

impl Default for RuntimeInfo {
    fn default() -> Self {
        Self::new()
    }
}
