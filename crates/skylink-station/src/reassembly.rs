//! Video reassembly buffer — a fixed ring of FEC blocks between the radio
//! and the decoder.
//!
//! Packets arrive out of order, duplicated, and with holes; the decoder needs
//! a strict in-order stream. The ring absorbs disorder, repairs blocks with
//! parity as soon as enough packets are present, and exposes a single output
//! cursor that only ever moves forward. Every buffer is allocated lazily on
//! first use and reused for the life of the stream.

use std::time::Instant;

use bytes::Bytes;

use crate::fec;
use crate::runtime::RuntimeInfo;

/// Blocks held in the ring. At 8+4 packets per block and typical bitrates
/// this is several hundred milliseconds of video, comfortably more than the
/// largest retransmission window a profile can carry.
pub const RING_CAPACITY: usize = 60;

/// Slots per block. Bounds both data and parity packet counts; headers
/// declaring more are rejected at the wire boundary and re-checked here.
pub const MAX_PACKETS_PER_BLOCK: usize = 64;

/// A block index this far behind the buffer means the vehicle rebooted and
/// restarted its counter, not that the packet is merely late.
const RESTART_BLOCK_JUMP: u32 = 100;

/// Keep this many ring slots of headroom; a forward jump into the headroom
/// flushes instead of wrapping onto unconsumed blocks.
const RING_OVERFLOW_MARGIN: usize = 5;

// ── Input / output types ─────────────────────────────────────────────────────

/// One video packet after wire-boundary validation.
#[derive(Debug, Clone)]
pub struct VideoPacket {
    pub block_index: u32,
    pub packet_index: u8,
    pub data_packets: u8,
    pub ec_packets: u8,
    /// FEC payload size every packet in the block is padded to.
    pub packet_size: u16,
    pub retransmitted: bool,
    /// FEC payload: important sub-header + video bytes, possibly unpadded.
    pub payload: Bytes,
}

/// What happened to an added packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// At or before the output cursor, duplicate, or unusable as a base.
    Stale,
    /// Stored, but something newer was already seen.
    Stored,
    /// Stored and strictly advanced the highest (block, packet) ever seen.
    /// The only hook external stats/alarm code needs.
    NewestOnStream,
}

/// Why the buffer was emptied. Logged and counted, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Block index regressed by more than RESTART_BLOCK_JUMP.
    VehicleRestart,
    /// Incoming block would wrap the ring onto unconsumed blocks.
    RingOverflow,
    /// No new packet within the retransmission window.
    SilenceTimeout,
    /// Resolution or encoding parameters changed mid-stream.
    ParamsChange,
    /// Explicit controller settings change.
    SettingsChange,
}

impl FlushReason {
    fn as_str(self) -> &'static str {
        match self {
            FlushReason::VehicleRestart => "vehicle restart",
            FlushReason::RingOverflow => "ring overflow",
            FlushReason::SilenceTimeout => "silence timeout",
            FlushReason::ParamsChange => "params change",
            FlushReason::SettingsChange => "settings change",
        }
    }
}

/// One in-order packet handed to the decoder path.
#[derive(Debug, Clone)]
pub struct OrderedPacket {
    pub block_index: u32,
    pub packet_index: u8,
    /// Video bytes only; padding and the important sub-header are stripped.
    pub payload: Bytes,
    /// frame_and_nal_flags from the important sub-header.
    pub frame_flags: u8,
}

// ── Slots and blocks ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Empty,
    Received,
    Outputed,
}

#[derive(Debug)]
struct PacketSlot {
    state: SlotState,
    /// Lazily allocated, reused across blocks; cleared, never freed.
    raw: Option<Vec<u8>>,
    received_at: Option<Instant>,
}

impl PacketSlot {
    const fn new() -> Self {
        Self {
            state: SlotState::Empty,
            raw: None,
            received_at: None,
        }
    }

    fn reset(&mut self) {
        self.state = SlotState::Empty;
        self.received_at = None;
        // raw is kept allocated for reuse.
    }
}

/// One FEC group in the ring.
#[derive(Debug)]
pub struct VideoBlock {
    block_index: u32,
    data_packet_count: u16,
    ec_packet_count: u16,
    payload_size_per_packet: u32,
    received_data_count: u16,
    received_ec_count: u16,
    reconstructed_ec_used: u16,
    received_at: Option<Instant>,
    slots: Vec<PacketSlot>,
}

impl VideoBlock {
    fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_PACKETS_PER_BLOCK);
        slots.resize_with(MAX_PACKETS_PER_BLOCK, PacketSlot::new);
        Self {
            block_index: 0,
            data_packet_count: 0,
            ec_packet_count: 0,
            payload_size_per_packet: 0,
            received_data_count: 0,
            received_ec_count: 0,
            reconstructed_ec_used: 0,
            received_at: None,
            slots,
        }
    }

    fn reset(&mut self) {
        self.block_index = 0;
        self.data_packet_count = 0;
        self.ec_packet_count = 0;
        self.payload_size_per_packet = 0;
        self.received_data_count = 0;
        self.received_ec_count = 0;
        self.reconstructed_ec_used = 0;
        self.received_at = None;
        for slot in &mut self.slots {
            slot.reset();
        }
    }

    fn configure(&mut self, block_index: u32, pkt: &VideoPacket) {
        self.block_index = block_index;
        self.data_packet_count = u16::from(pkt.data_packets);
        self.ec_packet_count = u16::from(pkt.ec_packets);
        self.payload_size_per_packet = u32::from(pkt.packet_size);
    }

    pub fn block_index(&self) -> u32 {
        self.block_index
    }

    pub fn data_packet_count(&self) -> u16 {
        self.data_packet_count
    }

    pub fn ec_packet_count(&self) -> u16 {
        self.ec_packet_count
    }

    pub fn received_total(&self) -> u16 {
        self.received_data_count + self.received_ec_count
    }

    pub fn reconstructed_ec_used(&self) -> u16 {
        self.reconstructed_ec_used
    }

    /// Complete directly or repairable with what is already here.
    pub fn is_repairable(&self) -> bool {
        self.data_packet_count > 0 && self.received_total() >= self.data_packet_count
    }

    /// Data slot indices still missing, in position order.
    pub fn missing_data_indices(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.data_packet_count as usize)
            .filter(|&i| self.slots[i].state == SlotState::Empty)
            .map(|i| i as u8)
    }
}

// ── The ring ─────────────────────────────────────────────────────────────────

/// Fixed-capacity reassembly ring. One instance per (vehicle, stream).
#[derive(Debug)]
pub struct VideoReassemblyBuffer {
    blocks: Vec<VideoBlock>,
    /// Oldest not-fully-consumed block, None only before the first anchor
    /// and after a flush.
    first_block_cursor: Option<usize>,
    /// Next slot to output within the cursor block.
    first_packet_cursor: usize,
    /// Highest (block, packet) physically stored right now.
    max_present: Option<(u32, u8)>,
    /// Highest (block, packet) ever seen. Survives flushes; reset only on
    /// vehicle restart.
    max_ever: Option<(u32, u8)>,
}

impl VideoReassemblyBuffer {
    pub fn new() -> Self {
        let mut blocks = Vec::with_capacity(RING_CAPACITY);
        blocks.resize_with(RING_CAPACITY, VideoBlock::new);
        Self {
            blocks,
            first_block_cursor: None,
            first_packet_cursor: 0,
            max_present: None,
            max_ever: None,
        }
    }

    /// Absorb one validated packet. Never panics on adversarial indices; the
    /// worst outcome is `Stale` or a counted flush.
    pub fn add_packet(&mut self, pkt: &VideoPacket, now: Instant, rt: &mut RuntimeInfo) -> AddOutcome {
        let total = usize::from(pkt.data_packets) + usize::from(pkt.ec_packets);
        if total == 0
            || total > MAX_PACKETS_PER_BLOCK
            || usize::from(pkt.packet_index) >= total
            || pkt.payload.len() > pkt.packet_size as usize
        {
            return AddOutcome::Stale;
        }

        let Some(first) = self.first_block_cursor else {
            return self.anchor(pkt, now, rt);
        };

        let base = self.blocks[first].block_index;

        // Behind the buffer: either a late stale packet or a restarted vehicle.
        if pkt.block_index < base {
            if !pkt.retransmitted && (u64::from(pkt.block_index) + u64::from(RESTART_BLOCK_JUMP)) < u64::from(base) {
                tracing::warn!(
                    incoming = pkt.block_index,
                    base,
                    "block index regressed, vehicle restart assumed"
                );
                self.flush(FlushReason::VehicleRestart, rt);
                return self.anchor(pkt, now, rt);
            }
            return AddOutcome::Stale;
        }

        // At the cursor block but before the output cursor: already delivered.
        if pkt.block_index == base && usize::from(pkt.packet_index) < self.first_packet_cursor {
            return AddOutcome::Stale;
        }

        let delta = (pkt.block_index - base) as usize;

        // Too far ahead to fit: drop everything and restart from this packet.
        if delta >= RING_CAPACITY - RING_OVERFLOW_MARGIN {
            self.flush(FlushReason::RingOverflow, rt);
            return self.anchor(pkt, now, rt);
        }

        // Materialize any intermediate blocks so the walk from the cursor to
        // the top always sees configured geometry.
        for step in 1..=delta {
            let at = (first + step) % RING_CAPACITY;
            let expected = base + step as u32;
            if self.blocks[at].data_packet_count == 0 || self.blocks[at].block_index != expected {
                self.blocks[at].configure(expected, pkt);
            }
        }

        let target = (first + delta) % RING_CAPACITY;
        self.store(target, pkt, now, rt)
    }

    /// Seed an empty buffer. Only a block-leading packet may anchor; anything
    /// else would start output mid-block.
    fn anchor(&mut self, pkt: &VideoPacket, now: Instant, rt: &mut RuntimeInfo) -> AddOutcome {
        if pkt.packet_index != 0 {
            return AddOutcome::Stale;
        }
        self.first_block_cursor = Some(0);
        self.first_packet_cursor = 0;
        self.blocks[0].reset();
        self.store(0, pkt, now, rt)
    }

    fn store(&mut self, at: usize, pkt: &VideoPacket, now: Instant, rt: &mut RuntimeInfo) -> AddOutcome {
        let block = &mut self.blocks[at];
        block.configure(pkt.block_index, pkt);
        block.received_at = Some(now);

        let idx = usize::from(pkt.packet_index);
        let slot = &mut block.slots[idx];
        if slot.state != SlotState::Empty {
            return AddOutcome::Stale;
        }

        // Copy into the reused slot buffer and zero-pad to the block's packet
        // size; parity runs over the padded region.
        let buf = slot.raw.get_or_insert_with(Vec::new);
        buf.clear();
        buf.extend_from_slice(&pkt.payload);
        buf.resize(pkt.packet_size as usize, 0);
        slot.state = SlotState::Received;
        slot.received_at = Some(now);

        let is_data = u16::from(pkt.packet_index) < block.data_packet_count;
        if is_data {
            block.received_data_count += 1;
            rt.current_mut().recv_data_packets += 1;
        } else {
            block.received_ec_count += 1;
            rt.current_mut().recv_ec_packets += 1;
        }

        if self
            .max_present
            .map_or(true, |m| (pkt.block_index, pkt.packet_index) > m)
        {
            self.max_present = Some((pkt.block_index, pkt.packet_index));
        }

        let newest = self
            .max_ever
            .map_or(true, |m| (pkt.block_index, pkt.packet_index) > m);
        if newest {
            self.max_ever = Some((pkt.block_index, pkt.packet_index));
        }

        let block = &self.blocks[at];
        if block.ec_packet_count > 0
            && block.received_data_count < block.data_packet_count
            && block.received_total() >= block.data_packet_count
        {
            self.reconstruct_block(at, now, rt);
        }

        if newest {
            AddOutcome::NewestOnStream
        } else {
            AddOutcome::Stored
        }
    }

    /// Repair every missing data slot of the block from parity. On codec
    /// failure the block is left incomplete and the retransmission path is
    /// expected to fill the holes.
    fn reconstruct_block(&mut self, at: usize, now: Instant, rt: &mut RuntimeInfo) {
        let block = &mut self.blocks[at];
        let data = usize::from(block.data_packet_count);
        let ec = usize::from(block.ec_packet_count);

        let mut shards: Vec<Option<Vec<u8>>> = Vec::with_capacity(data + ec);
        for slot in block.slots.iter_mut().take(data + ec) {
            if slot.state == SlotState::Empty {
                shards.push(None);
            } else {
                shards.push(slot.raw.take());
            }
        }

        let recovered = match fec::reconstruct(data, ec, &mut shards) {
            Ok(recovered) => recovered,
            Err(e) => {
                tracing::warn!(block = block.block_index, error = %e, "block repair failed");
                // Hand the taken buffers back before bailing out.
                for (slot, shard) in block.slots.iter_mut().zip(shards.into_iter()) {
                    if let Some(buf) = shard {
                        slot.raw = Some(buf);
                    }
                }
                return;
            }
        };

        for (slot, shard) in block.slots.iter_mut().zip(shards.into_iter()) {
            if let Some(buf) = shard {
                slot.raw = Some(buf);
            }
        }
        for &idx in &recovered {
            let slot = &mut block.slots[idx];
            slot.state = SlotState::Received;
            slot.received_at = Some(now);
            block.received_data_count += 1;
        }
        block.reconstructed_ec_used = recovered.len() as u16;
        rt.record_ec_used(recovered.len() as u16);

        tracing::trace!(
            block = block.block_index,
            repaired = recovered.len(),
            "block reconstructed from parity"
        );
    }

    /// Empty everything. `max_ever` survives unless the vehicle restarted.
    pub fn flush(&mut self, reason: FlushReason, rt: &mut RuntimeInfo) {
        tracing::debug!(reason = reason.as_str(), "emptying reassembly buffer");
        for block in &mut self.blocks {
            block.reset();
        }
        self.first_block_cursor = None;
        self.first_packet_cursor = 0;
        self.max_present = None;
        rt.record_skipped_blocks(1);
        if reason == FlushReason::VehicleRestart {
            self.max_ever = None;
            rt.record_restart_detected();
        }
    }

    // ── Output cursor ────────────────────────────────────────────────────

    /// True when the next in-order packet is ready to pop.
    pub fn has_first_packet_in_buffer(&self) -> bool {
        let Some(first) = self.first_block_cursor else {
            return false;
        };
        let block = &self.blocks[first];
        block.data_packet_count > 0
            && self.first_packet_cursor < usize::from(block.data_packet_count)
            && block.slots[self.first_packet_cursor].state == SlotState::Received
    }

    /// Pop the next in-order packet, advancing the cursor one slot. Rotates
    /// to the next ring slot when the block's data slots are exhausted; EC
    /// slots are never output.
    pub fn pop_first_packet(&mut self) -> Option<OrderedPacket> {
        if !self.has_first_packet_in_buffer() {
            return None;
        }
        let first = self.first_block_cursor.expect("checked by has_first_packet");
        let block = &mut self.blocks[first];

        let slot = &mut block.slots[self.first_packet_cursor];
        slot.state = SlotState::Outputed;
        let raw = slot.raw.as_deref().unwrap_or(&[]);

        // Strip the important sub-header and padding: the first two bytes
        // give the real video length, the third carries the frame flags.
        let (payload, frame_flags) = if raw.len() >= 3 {
            let len = usize::from(u16::from_le_bytes([raw[0], raw[1]]));
            let end = (3 + len).min(raw.len());
            (Bytes::copy_from_slice(&raw[3..end]), raw[2])
        } else {
            (Bytes::new(), 0)
        };

        let out = OrderedPacket {
            block_index: block.block_index,
            packet_index: self.first_packet_cursor as u8,
            payload,
            frame_flags,
        };

        self.first_packet_cursor += 1;
        if self.first_packet_cursor >= usize::from(block.data_packet_count) {
            self.rotate_past_first_block();
        }
        Some(out)
    }

    /// Clear the consumed cursor block and move to the next ring slot,
    /// pre-labelling it so the buffer base stays monotonic even before the
    /// next packet arrives.
    fn rotate_past_first_block(&mut self) {
        let Some(first) = self.first_block_cursor else {
            return;
        };
        let next_index = self.blocks[first].block_index + 1;
        self.blocks[first].reset();
        let next = (first + 1) % RING_CAPACITY;
        if self.blocks[next].data_packet_count == 0 {
            self.blocks[next].block_index = next_index;
        }
        self.first_block_cursor = Some(next);
        self.first_packet_cursor = 0;
    }

    /// Deliberately drop stalled blocks up to (not including) `target`,
    /// stopping early at any block that is complete or repairable. Returns
    /// how many blocks were dropped so callers can account for the loss.
    pub fn advance_to_block(&mut self, target: u32, rt: &mut RuntimeInfo) -> usize {
        if self.first_block_cursor.is_none() {
            return 0;
        }
        let target = match self.max_present {
            Some((max_block, _)) => target.min(max_block),
            None => return 0,
        };

        let mut skipped = 0;
        while let Some(first) = self.first_block_cursor {
            let block = &self.blocks[first];
            if block.block_index >= target || block.is_repairable() {
                break;
            }
            skipped += 1;
            rt.record_skipped_blocks(1);
            self.first_packet_cursor = usize::from(block.data_packet_count);
            self.rotate_past_first_block();
        }
        skipped
    }

    // ── Introspection ────────────────────────────────────────────────────

    /// True when a newer block than the cursor block is present, i.e. there
    /// is a gap retransmissions could fill.
    pub fn has_incomplete_blocks(&self) -> bool {
        let Some(first) = self.first_block_cursor else {
            return false;
        };
        match self.max_present {
            Some((max_block, _)) => max_block > self.blocks[first].block_index,
            None => false,
        }
    }

    /// Blocks from the cursor to the newest present, inclusive.
    pub fn blocks_count(&self) -> usize {
        let Some(first) = self.first_block_cursor else {
            return 0;
        };
        match self.max_present {
            Some((max_block, _)) => {
                let base = self.blocks[first].block_index;
                if max_block < base {
                    0
                } else {
                    (max_block - base) as usize + 1
                }
            }
            None => 0,
        }
    }

    /// Block at `offset` ring positions after the cursor block.
    pub fn block_at(&self, offset: usize) -> Option<&VideoBlock> {
        let first = self.first_block_cursor?;
        if offset >= RING_CAPACITY {
            return None;
        }
        Some(&self.blocks[(first + offset) % RING_CAPACITY])
    }

    pub fn max_block_index_present(&self) -> Option<u32> {
        self.max_present.map(|(block, _)| block)
    }

    pub fn max_ever_received(&self) -> Option<(u32, u8)> {
        self.max_ever
    }

    pub fn is_empty(&self) -> bool {
        self.first_block_cursor.is_none()
    }
}

impl Default for VideoReassemblyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
