//! Decoy packet-sequence rebuilder.
//!
//! Takes anchor packets and an optimizer's decision vector and produces a
//! timestamped sequence in which every anchor is preceded by layer-truncated,
//! randomly padded decoy copies of itself.

pub mod decision;
pub mod error;
pub mod features;
pub mod packet;
pub mod parallel;
pub mod payload;
pub mod pcap_reader;
pub mod pcap_writer;
pub mod pipeline;
pub mod rebuilder;

#[cfg(test)]
mod testutil;

pub use decision::{DecisionVector, DecoyPlan, GroupDecision};
pub use error::{CodecError, FeatureError, RebuildError};
pub use packet::{CapturedPacket, Layer, LayeredPacket, LinkKind, RawFrame};
pub use parallel::rebuild_parallel;
pub use payload::{FixedPayload, PayloadSource, PrintablePayload};
pub use rebuilder::{PacketGroup, TruncationLevel, rebuild};
