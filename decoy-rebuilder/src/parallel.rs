use crossbeam::thread;
use tracing::{debug, info};

use crate::decision::DecisionVector;
use crate::error::{RebuildError, Result};
use crate::packet::LayeredPacket;
use crate::payload::PayloadSource;
use crate::rebuilder::{PacketGroup, rebuild, rebuild_group, validate};

/// Worker count to use; zero means one per CPU.
pub fn resolve_workers(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get()
    } else {
        requested
    }
}

/// Same output as [`rebuild`], with groups sharded across worker threads.
///
/// Each worker takes a contiguous range of groups and its own payload source
/// from `make_source(worker_id)`; shards are concatenated in range order, so
/// group order and decoys-then-anchor order are preserved.
pub fn rebuild_parallel<P, S, F>(
    group_count: usize,
    decision: &DecisionVector,
    groups: &[PacketGroup<P>],
    workers: usize,
    make_source: F,
) -> Result<Vec<P>>
where
    P: LayeredPacket + Send + Sync,
    S: PayloadSource,
    F: Fn(usize) -> S + Sync,
{
    validate(group_count, decision, groups)?;

    let workers = resolve_workers(workers).min(group_count);
    if workers <= 1 {
        let mut source = make_source(0);
        return rebuild(group_count, decision, groups, &mut source);
    }

    let chunk = group_count.div_ceil(workers);
    let shards = group_count.div_ceil(chunk);
    info!(
        "Distributing {} groups across {} workers ({} groups each)",
        group_count, shards, chunk
    );

    let results: Vec<Result<Vec<P>>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..shards)
            .map(|worker_id| {
                let start = worker_id * chunk;
                let end = (start + chunk).min(group_count);
                let make_source = &make_source;

                scope.spawn(move |_| -> Result<Vec<P>> {
                    let mut source = make_source(worker_id);
                    let entries = &decision.groups[start..end];
                    let mut output =
                        Vec::with_capacity(entries.iter().map(|e| e.decoy_count + 1).sum());

                    for (offset, (group, entry)) in groups[start..end].iter().zip(entries).enumerate() {
                        rebuild_group(start + offset, entry, group, &mut source, &mut output)?;
                    }

                    debug!(
                        "Worker {} rebuilt groups {}..{} into {} packets",
                        worker_id,
                        start,
                        end,
                        output.len()
                    );
                    Ok(output)
                })
            })
            .collect();

        handles
            .into_iter()
            .enumerate()
            .map(|(worker_id, handle)| {
                handle
                    .join()
                    .unwrap_or(Err(RebuildError::WorkerPanicked(worker_id)))
            })
            .collect()
    })
    .map_err(|_| RebuildError::WorkerPanicked(shards))?;

    let mut output = Vec::with_capacity(decision.expected_outputs(group_count));
    for shard in results {
        output.extend(shard?);
    }
    Ok(output)
}
