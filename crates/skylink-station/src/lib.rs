//! skylink-station — the reliable video delivery engine.
//!
//! Turns the lossy, reordering radio channel into an in-order byte stream
//! for the video decoder: erasure-coded reassembly, bounded retransmission
//! requests, and adaptive profile/keyframe negotiation. Single-threaded and
//! allocation-bounded; all I/O goes through the collaborator traits in
//! [`link`].

pub mod adaptive;
pub mod fec;
pub mod link;
pub mod processor;
pub mod reassembly;
pub mod retransmission;
pub mod runtime;
pub mod stats;

pub use adaptive::AdaptiveLinkController;
pub use link::{DecoderSink, LinkContext, Outbound, OutboundPacket};
pub use processor::{Disposition, VideoStreamProcessor};
pub use reassembly::{AddOutcome, FlushReason, VideoReassemblyBuffer};
pub use retransmission::RetransmissionController;
pub use runtime::RuntimeInfo;
pub use stats::StreamStats;
