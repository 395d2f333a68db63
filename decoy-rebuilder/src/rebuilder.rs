use tracing::{debug, trace};

use crate::decision::{DecisionVector, DecoyPlan, GroupDecision, round_half_even};
use crate::error::{RebuildError, Result};
use crate::packet::{CapturedPacket, Layer, LayeredPacket, LinkKind, RawFrame};
use crate::payload::PayloadSource;

/// Which protocol layer of a decoy loses its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationLevel {
    Link = 1,
    Network = 2,
    Transport = 3,
}

impl TruncationLevel {
    /// Rounds the optimizer's continuous value; anything outside 1..=3 is `None`.
    pub fn from_value(value: f64) -> Option<Self> {
        let rounded = round_half_even(value);
        if rounded == 1.0 {
            Some(TruncationLevel::Link)
        } else if rounded == 2.0 {
            Some(TruncationLevel::Network)
        } else if rounded == 3.0 {
            Some(TruncationLevel::Transport)
        } else {
            None
        }
    }

    /// Layers probed in order; the first one present is truncated.
    pub fn probe_order(&self) -> &'static [Layer] {
        match self {
            TruncationLevel::Link => &[Layer::Link],
            TruncationLevel::Network => &[Layer::Ipv4, Layer::Ipv6, Layer::Arp],
            TruncationLevel::Transport => &[Layer::Icmp, Layer::Tcp, Layer::Udp],
        }
    }
}

/// Packets sharing one decision entry. Element 0 is the anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketGroup<P> {
    packets: Vec<P>,
}

impl<P> PacketGroup<P> {
    pub fn new(packets: Vec<P>) -> Self {
        Self { packets }
    }

    pub fn single(anchor: P) -> Self {
        Self {
            packets: vec![anchor],
        }
    }

    pub fn anchor(&self) -> Option<&P> {
        self.packets.first()
    }

    pub fn packets(&self) -> &[P] {
        &self.packets
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// Decodes captured frames and chunks them into groups of `group_size`
/// consecutive packets.
pub fn decode_groups(
    link: LinkKind,
    frames: Vec<RawFrame>,
    group_size: usize,
) -> Result<Vec<PacketGroup<CapturedPacket>>> {
    if group_size == 0 {
        return Err(RebuildError::InvalidArgument(
            "group size must be at least 1".to_string(),
        ));
    }

    let mut packets = Vec::with_capacity(frames.len());
    for frame in frames {
        packets.push(CapturedPacket::decode(link, frame.data, frame.timestamp)?);
    }

    let mut groups = Vec::with_capacity(packets.len().div_ceil(group_size));
    let mut packets = packets.into_iter().peekable();
    while packets.peek().is_some() {
        groups.push(PacketGroup::new(packets.by_ref().take(group_size).collect()));
    }
    Ok(groups)
}

/// Truncates `packet` at the first layer of `level` it carries.
/// Returns the truncated layer, or `None` when no probed layer is present.
pub fn truncate<P: LayeredPacket>(packet: &mut P, level: TruncationLevel) -> Option<Layer> {
    let layer = level
        .probe_order()
        .iter()
        .copied()
        .find(|layer| packet.has_layer(*layer))?;
    packet.remove_payload(layer);
    Some(layer)
}

/// Checks every precondition of [`rebuild`] without touching any packet.
pub fn validate<P>(
    group_count: usize,
    decision: &DecisionVector,
    groups: &[PacketGroup<P>],
) -> Result<()> {
    if group_count > groups.len() {
        return Err(RebuildError::InvalidArgument(format!(
            "group count {} exceeds {} packet groups",
            group_count,
            groups.len()
        )));
    }
    if group_count > decision.len() {
        return Err(RebuildError::IndexOutOfRange {
            what: "decision group",
            index: group_count - 1,
            len: decision.len(),
        });
    }

    for (index, (group, entry)) in groups.iter().zip(&decision.groups).take(group_count).enumerate() {
        if group.is_empty() {
            return Err(RebuildError::IndexOutOfRange {
                what: "anchor packet",
                index: 0,
                len: 0,
            });
        }
        if entry.decoy_count > entry.decoys.len() {
            debug!(
                "Group {} requests {} decoys but has {} plans",
                index,
                entry.decoy_count,
                entry.decoys.len()
            );
            return Err(RebuildError::IndexOutOfRange {
                what: "decoy plan",
                index: entry.decoy_count - 1,
                len: entry.decoys.len(),
            });
        }
    }

    Ok(())
}

/// Rebuilds the first `group_count` groups into one ordered sequence:
/// for each group its decoys, then the retimed anchor.
///
/// Nothing is emitted unless every group passes [`validate`].
pub fn rebuild<P, S>(
    group_count: usize,
    decision: &DecisionVector,
    groups: &[PacketGroup<P>],
    source: &mut S,
) -> Result<Vec<P>>
where
    P: LayeredPacket,
    S: PayloadSource + ?Sized,
{
    validate(group_count, decision, groups)?;

    let mut output = Vec::with_capacity(decision.expected_outputs(group_count));
    for (index, (group, entry)) in groups.iter().zip(&decision.groups).take(group_count).enumerate() {
        rebuild_group(index, entry, group, source, &mut output)?;
    }

    debug!("Rebuilt {} groups into {} packets", group_count, output.len());
    Ok(output)
}

pub(crate) fn rebuild_group<P, S>(
    index: usize,
    entry: &GroupDecision,
    group: &PacketGroup<P>,
    source: &mut S,
    output: &mut Vec<P>,
) -> Result<()>
where
    P: LayeredPacket,
    S: PayloadSource + ?Sized,
{
    let anchor = group.anchor().ok_or(RebuildError::IndexOutOfRange {
        what: "anchor packet",
        index: 0,
        len: 0,
    })?;
    debug!("Processing anchor {}: {}", index, anchor.summary());

    for j in 0..entry.decoy_count {
        let plan = entry.decoys.get(j).ok_or(RebuildError::IndexOutOfRange {
            what: "decoy plan",
            index: j,
            len: entry.decoys.len(),
        })?;
        output.push(craft_decoy(anchor, plan, entry.anchor_time, source));
    }

    let mut anchor_copy = anchor.clone();
    anchor_copy.set_timestamp(entry.anchor_time);
    output.push(anchor_copy);
    Ok(())
}

/// One decoy: clone, truncate, pad, retime.
pub fn craft_decoy<P, S>(anchor: &P, plan: &DecoyPlan, anchor_time: f64, source: &mut S) -> P
where
    P: LayeredPacket,
    S: PayloadSource + ?Sized,
{
    let mut decoy = anchor.clone();

    match TruncationLevel::from_value(plan.truncation_level) {
        Some(level) => {
            if truncate(&mut decoy, level).is_none() {
                debug!("No {:?} layer to truncate in {}", level, anchor.summary());
            }
        }
        None => debug!(
            "Truncation level {} not recognised, leaving decoy intact",
            plan.truncation_level
        ),
    }

    let padding = source.payload(plan.payload_bytes());
    decoy.append_payload(&padding);
    decoy.set_timestamp(anchor_time - plan.time_delta);

    trace!("Decoy {} at {}", decoy.summary(), decoy.timestamp());
    decoy
}
