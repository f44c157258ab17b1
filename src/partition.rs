use std::cmp::Reverse;

use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::graph::Program;
use crate::model::StreamId;
use crate::prelude::NodeIndex;
use crate::weights::WeightMap;

/// Side branches at or below this accumulated weight fold into the
/// partition that consumes them instead of getting their own. Heuristic
/// constant; tune with care.
pub const MIN_PARTITION_THRESHOLD: usize = 2;

/// One contiguous unit of scheduling work, assigned to a single stream.
#[derive(Debug, Default, Clone)]
pub struct Partition {
    pub weight: usize,
    pub instructions: Vec<NodeIndex>,
}

impl Partition {
    fn add(&mut self, ins: NodeIndex, weight: usize) {
        self.weight += weight;
        self.instructions.push(ins);
    }
}

/// The critical chain plus side partitions grouped by the instruction they
/// branch off of, in discovery order.
#[derive(Debug, Default)]
pub struct PartitionTree {
    pub critical: Partition,
    pub branches: Vec<(NodeIndex, Vec<Partition>)>,
}

impl PartitionTree {
    /// Split the dependency tree of `last` into a critical chain and a
    /// forest of side partitions.
    pub fn build(p: &Program, last: NodeIndex, wm: &WeightMap) -> PartitionTree {
        let mut tree = PartitionTree::default();
        // (attach point, branch root) pairs found while growing chains
        let mut pending: Vec<(NodeIndex, NodeIndex)> = Vec::new();
        tree.critical = grow(p, last, wm, &mut pending);
        let mut at = 0;
        while at < pending.len() {
            let (attach, root) = pending[at];
            let part = grow(p, root, wm, &mut pending);
            match tree.branches.iter_mut().find(|(ins, _)| *ins == attach) {
                Some((_, parts)) => parts.push(part),
                None => tree.branches.push((attach, vec![part])),
            }
            at += 1;
        }
        tree
    }
}

/// Grow one partition downward from `start`. The first maximal-weight input
/// continues the chain, negligible inputs fold in, and every other input is
/// pushed onto `pending` as a branch attached to the instruction consuming
/// it.
fn grow(
    p: &Program,
    start: NodeIndex,
    wm: &WeightMap,
    pending: &mut Vec<(NodeIndex, NodeIndex)>,
) -> Partition {
    let mut part = Partition::default();
    let mut stack = vec![start];
    while let Some(ins) = stack.pop() {
        // Zero accumulated weight terminates the chain
        if wm.weight(ins) == 0 {
            continue;
        }
        part.add(ins, wm.iweight(ins));
        let inputs = p.inputs(ins);
        let Some(&first) = inputs.first() else {
            continue;
        };
        let mut max_input = first;
        for &i in &inputs[1..] {
            if wm.weight(i) > wm.weight(max_input) {
                max_input = i;
            }
        }
        let mut chain = Vec::new();
        for &i in &inputs {
            if i == max_input || wm.weight(i) <= MIN_PARTITION_THRESHOLD {
                chain.push(i);
            } else {
                pending.push((ins, i));
            }
        }
        // Reversed so the chain is walked in input order
        stack.extend(chain.into_iter().rev());
    }
    part
}

/// Assign stream 0 to the critical partition, then pack every side
/// partition onto the least-loaded remaining stream, heaviest first. This
/// is greedy longest-processing-time-first bin packing, not an optimal
/// assignment.
pub fn assign_streams(
    tree: PartitionTree,
    wm: &WeightMap,
    concurrency: usize,
) -> FxHashMap<NodeIndex, StreamId> {
    assert!(concurrency > 0, "stream count must be positive");
    let mut streams = FxHashMap::default();
    set_stream(&mut streams, &tree.critical, 0, wm);
    let mut loads = vec![0usize; concurrency - 1];
    for (_, mut parts) in tree.branches {
        parts.sort_by_key(|part| Reverse((part.weight, part.instructions.len())));
        for part in parts {
            let stream = match loads.iter().position_min() {
                // Lowest-index least-loaded stream wins ties
                Some(s) => s + 1,
                // Single-stream target: no side streams to spread over
                None => 0,
            };
            if stream > 0 {
                loads[stream - 1] += part.weight;
            }
            set_stream(&mut streams, &part, stream, wm);
        }
    }
    streams
}

fn set_stream(
    streams: &mut FxHashMap<NodeIndex, StreamId>,
    part: &Partition,
    stream: StreamId,
    wm: &WeightMap,
) {
    for &ins in &part.instructions {
        // Zero-cost instructions never occupy a stream. An instruction
        // shared between partitions keeps its first assignment, so the
        // critical chain stays pinned to stream 0.
        if wm.iweight(ins) > 0 {
            streams.entry(ins).or_insert(stream);
        }
    }
}
