use anyhow::{Context, Result};
use std::time::Instant;
use tracing::{info, warn};

use crate::decision::DecisionVector;
use crate::packet::{CapturedPacket, LinkKind};
use crate::parallel::{rebuild_parallel, resolve_workers};
use crate::payload::PrintablePayload;
use crate::pcap_reader::PcapReader;
use crate::pcap_writer::write_pcap;
use crate::rebuilder::{PacketGroup, decode_groups};

/// Knobs for a capture-to-capture rebuild.
#[derive(Debug, Clone)]
pub struct RebuildOptions {
    /// Groups to rebuild; `None` rebuilds every group the decision covers.
    pub group_count: Option<usize>,
    /// Consecutive captured packets per group; the first is the anchor.
    pub group_size: usize,
    /// Worker threads, 0 = one per CPU.
    pub workers: usize,
    /// Seed for payload bytes; worker `n` uses `seed + n`.
    pub seed: Option<u64>,
    /// Recompute length fields and checksums when writing.
    pub repair_lengths: bool,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        Self {
            group_count: None,
            group_size: 1,
            workers: 1,
            seed: None,
            repair_lengths: false,
        }
    }
}

#[derive(Debug)]
pub struct RebuildReport {
    pub groups: usize,
    pub anchors_read: usize,
    pub packets_written: usize,
    pub elapsed_seconds: f64,
}

/// Picks the group count: the requested one, or every group both inputs cover.
pub fn effective_group_count(
    requested: Option<usize>,
    decision: &DecisionVector,
    groups: &[PacketGroup<CapturedPacket>],
) -> usize {
    match requested {
        Some(count) => count,
        None => {
            if decision.len() != groups.len() {
                warn!(
                    "Decision covers {} groups but capture has {}; rebuilding {}",
                    decision.len(),
                    groups.len(),
                    decision.len().min(groups.len())
                );
            }
            decision.len().min(groups.len())
        }
    }
}

/// Rebuilds already-decoded groups with the payload sources `options` asks for.
pub fn rebuild_groups(
    decision: &DecisionVector,
    groups: &[PacketGroup<CapturedPacket>],
    options: &RebuildOptions,
) -> Result<Vec<CapturedPacket>> {
    let group_count = effective_group_count(options.group_count, decision, groups);
    let workers = resolve_workers(options.workers);

    let output = match options.seed {
        Some(seed) => rebuild_parallel(group_count, decision, groups, workers, |worker| {
            PrintablePayload::seeded(seed.wrapping_add(worker as u64))
        }),
        None => rebuild_parallel(group_count, decision, groups, workers, |_| {
            PrintablePayload::from_entropy()
        }),
    }
    .context("Rebuild failed")?;

    Ok(output)
}

/// Reads anchors from `input`, applies the decision table, writes `output`.
pub fn rebuild_capture(
    input: &str,
    decision_path: &str,
    output: &str,
    options: &RebuildOptions,
) -> Result<RebuildReport> {
    let start_time = Instant::now();

    let decision = DecisionVector::from_csv_path(decision_path)?;
    let mut reader = PcapReader::new(input)?;
    let link: LinkKind = reader.link();
    let frames = reader.read_all()?;
    let anchors_read = frames.len();

    let groups = decode_groups(link, frames, options.group_size)
        .with_context(|| format!("Failed to decode packets from {}", input))?;
    info!(
        "Decoded {} packets into {} groups of up to {}",
        anchors_read,
        groups.len(),
        options.group_size
    );

    let packets = rebuild_groups(&decision, &groups, options)?;
    let packets_written = write_pcap(output, link, &packets, options.repair_lengths)?;

    Ok(RebuildReport {
        groups: effective_group_count(options.group_count, &decision, &groups),
        anchors_read,
        packets_written,
        elapsed_seconds: start_time.elapsed().as_secs_f64(),
    })
}
