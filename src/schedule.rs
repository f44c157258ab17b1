use colored::Colorize;
use itertools::Itertools;
use petgraph::Direction;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::graph::Program;
use crate::model::{ScheduleModel, StreamId, WaitId};
use crate::op::Identity;
use crate::partition::{PartitionTree, assign_streams};
use crate::prelude::NodeIndex;
use crate::weights::WeightMap;

/// Scheduling pass options.
#[derive(Debug, Clone, Default)]
pub struct ScheduleConfig {
    /// Dump the annotated schedule to stdout. Debugging side channel only;
    /// the functional contract does not depend on it.
    pub trace: bool,
}

/// Assigns every costed instruction to an execution stream, reorders the
/// program to match, and inserts the synchronization the target needs to
/// keep cross-stream dependencies correct.
///
/// The pass is deterministic and meant to run exactly once per compilation.
/// It trusts its input: cycles or dangling references are precondition
/// violations and panic.
pub struct Scheduler<M> {
    model: M,
    config: ScheduleConfig,
}

impl<M: ScheduleModel> Scheduler<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            config: ScheduleConfig::default(),
        }
    }

    pub fn with_config(model: M, config: ScheduleConfig) -> Self {
        Self { model, config }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// Run the full pass: accumulate weights, partition and assign streams,
    /// reorder, then emit stream/record/wait directives and concurrency
    /// barriers through the model.
    ///
    /// Every decision is planned on immutable side tables first; the
    /// program is only mutated once planning is complete.
    #[tracing::instrument(skip_all)]
    pub fn apply(&mut self, p: &mut Program) {
        if p.is_empty() {
            return;
        }
        let last = p.last();
        let info = StreamInfo::build(p, last, &self.model);
        reorder(p, last, &info);

        if self.config.trace {
            println!("{}", "---- scheduled program ----".green());
            print!("{}", annotate_schedule(p, &info));
        }

        let sync = plan_sync(p, &info, self.model.concurrency());
        let barriers = plan_conflicts(p, &info);
        debug!(
            target: "braid::schedule",
            instructions = p.len(),
            streams = self.model.concurrency(),
            directives = sync.len(),
            barriers = barriers.len(),
            "schedule planned"
        );

        for directive in sync {
            match directive {
                Directive::Sched(ins, stream) => self.model.sched(p, ins, stream),
                Directive::Record(ins, event) => self.model.record(p, ins, event),
                Directive::Wait(ins, event) => self.model.wait(p, ins, event),
            }
        }
        for Barrier { anchor, args } in barriers {
            p.insert_op_after(anchor, Identity, &args);
        }
    }
}

/// Transient scheduling state: accumulated weights plus the stream map.
/// Discarded once directives have been emitted.
pub(crate) struct StreamInfo {
    pub weights: WeightMap,
    pub streams: FxHashMap<NodeIndex, StreamId>,
}

impl StreamInfo {
    pub(crate) fn build(p: &Program, last: NodeIndex, model: &impl ScheduleModel) -> StreamInfo {
        let weights = WeightMap::accumulate(p, last, model);
        let tree = PartitionTree::build(p, last, &weights);
        let streams = assign_streams(tree, &weights, model.concurrency());
        StreamInfo { weights, streams }
    }

    pub(crate) fn stream(&self, ins: NodeIndex) -> Option<StreamId> {
        self.streams.get(&ins).copied()
    }

    /// Visit the streams of `ins`'s neighbors in `dir`, looking through
    /// zero-cost instructions. Stops early and returns false as soon as `f`
    /// does.
    fn visit_streams(
        &self,
        p: &Program,
        ins: NodeIndex,
        dir: Direction,
        f: &mut impl FnMut(StreamId) -> bool,
    ) -> bool {
        let neighbors = match dir {
            Direction::Incoming => p.inputs(ins),
            Direction::Outgoing => p.outputs(ins),
        };
        for i in neighbors {
            if self.weights.iweight(i) == 0 {
                if !self.visit_streams(p, i, dir, f) {
                    return false;
                }
            } else if !f(self.streams[&i]) {
                return false;
            }
        }
        true
    }

    /// A merge point consumes at least one value produced on a different
    /// stream than its own.
    pub(crate) fn is_merge_point(&self, p: &Program, ins: NodeIndex, stream: StreamId) -> bool {
        !self.visit_streams(p, ins, Direction::Incoming, &mut |s| s == stream)
    }

    /// A split point feeds consumers that do not all run on one stream.
    pub(crate) fn is_split_point(&self, p: &Program, ins: NodeIndex) -> bool {
        let mut first = None;
        !self.visit_streams(p, ins, Direction::Outgoing, &mut |s| match first {
            None => {
                first = Some(s);
                true
            }
            Some(f) => f == s,
        })
    }

    /// Distinct streams feeding `ins`, looking through zero-cost ops.
    pub(crate) fn input_streams(&self, p: &Program, ins: NodeIndex) -> Vec<StreamId> {
        let mut result = Vec::new();
        self.visit_streams(p, ins, Direction::Incoming, &mut |s| {
            result.push(s);
            true
        });
        result.sort_unstable();
        result.dedup();
        result
    }

    /// Closest producer per distinct upstream stream: for each stream among
    /// `start`'s transitive zero-cost-skipping inputs, the representative
    /// latest in program order.
    fn recorded_inputs(
        &self,
        p: &Program,
        start: NodeIndex,
        pos: &FxHashMap<NodeIndex, usize>,
    ) -> Vec<NodeIndex> {
        fn walk(
            info: &StreamInfo,
            p: &Program,
            ins: NodeIndex,
            pos: &FxHashMap<NodeIndex, usize>,
            closest: &mut FxHashMap<StreamId, NodeIndex>,
        ) {
            for i in p.inputs(ins) {
                if info.weights.iweight(i) == 0 {
                    walk(info, p, i, pos, closest);
                    continue;
                }
                let stream = info.streams[&i];
                closest
                    .entry(stream)
                    .and_modify(|cur| {
                        if pos[&i] > pos[cur] {
                            *cur = i;
                        }
                    })
                    .or_insert(i);
            }
        }
        let mut closest = FxHashMap::default();
        walk(self, p, start, pos, &mut closest);
        // Emitted in stream order so wait ids are stable run to run
        closest
            .into_iter()
            .sorted_unstable()
            .map(|(_, ins)| ins)
            .collect()
    }
}

/// Re-linearize so cheaper subtrees come first, improving overlap for the
/// side streams. Every visited input is pulled to the front of the order
/// before its own subtree is walked, which keeps dependencies ahead of
/// dependents. Shared nodes are re-visited on purpose: the last pull wins,
/// and skipping it could leave a consumer ahead of a shared input.
fn reorder(p: &mut Program, last: NodeIndex, info: &StreamInfo) {
    fn visit(p: &Program, info: &StreamInfo, ins: NodeIndex, order: &mut Vec<NodeIndex>) {
        let args = p
            .inputs(ins)
            .into_iter()
            .sorted_by_key(|&i| (info.weights.weight(i), p.inputs(i).len()))
            .collect::<Vec<_>>();
        for i in args {
            let at = order.iter().position(|&x| x == i).unwrap();
            order.remove(at);
            order.insert(0, i);
            visit(p, info, i, order);
        }
    }
    let mut order = p.order().to_vec();
    visit(p, info, last, &mut order);
    p.set_order(order);
}

enum Directive {
    Sched(NodeIndex, StreamId),
    Record(NodeIndex, WaitId),
    Wait(NodeIndex, WaitId),
}

/// Plan stream and synchronization directives over the reordered program.
/// Nothing is mutated here; the plan is replayed through the model once
/// complete.
fn plan_sync(p: &Program, info: &StreamInfo, concurrency: usize) -> Vec<Directive> {
    let pos: FxHashMap<NodeIndex, usize> = p
        .order()
        .iter()
        .enumerate()
        .map(|(i, &ins)| (ins, i))
        .collect();
    let mut plan = Vec::new();
    let mut recorded: FxHashMap<NodeIndex, WaitId> = FxHashMap::default();
    let mut next_event: WaitId = 0;
    for &ins in p.order() {
        // Only instructions that carry a stream get directives
        let Some(stream) = info.stream(ins) else {
            continue;
        };
        assert!(info.weights.weight(ins) > 0);
        assert!(stream < concurrency, "stream index out of range");
        plan.push(Directive::Sched(ins, stream));
        if !info.is_merge_point(p, ins, stream) {
            continue;
        }
        for i in info.recorded_inputs(p, ins, &pos) {
            let Some(producer) = info.stream(i) else {
                continue;
            };
            if producer == stream {
                continue;
            }
            // One record per producer, reused by every later consumer
            let event = *recorded.entry(i).or_insert_with(|| {
                let event = next_event;
                next_event += 1;
                plan.push(Directive::Record(i, event));
                event
            });
            plan.push(Directive::Wait(ins, event));
        }
    }
    plan
}

/// A planned identity barrier: arguments spanning two concurrent streams,
/// anchored after the latest of them.
struct Barrier {
    anchor: NodeIndex,
    args: Vec<NodeIndex>,
}

/// Find instructions that may run concurrently on different streams below a
/// common split point and plan identity barriers that make their lifetimes
/// overlap for downstream liveness analysis. Conservative: a split point is
/// never pruned, even once control re-merges.
fn plan_conflicts(p: &Program, info: &StreamInfo) -> Vec<Barrier> {
    let pos: FxHashMap<NodeIndex, usize> = p
        .order()
        .iter()
        .enumerate()
        .map(|(i, &ins)| (ins, i))
        .collect();
    // Split point -> per-stream buckets of downstream instructions
    let mut buckets: FxHashMap<NodeIndex, Vec<Vec<NodeIndex>>> = FxHashMap::default();
    let mut bucket_order: Vec<NodeIndex> = Vec::new();
    let mut split_from: FxHashMap<NodeIndex, FxHashSet<NodeIndex>> = FxHashMap::default();
    for &ins in p.order() {
        if info.weights.iweights.get(&ins).copied().unwrap_or(0) == 0 {
            continue;
        }
        let mut splits = FxHashSet::default();
        for arg in p.inputs(ins) {
            if info.is_split_point(p, arg) {
                splits.insert(arg);
            }
            if let Some(upstream) = split_from.get(&arg) {
                splits.extend(upstream.iter().copied());
            }
        }
        let stream = info.streams[&ins];
        for &split in &splits {
            let streams = buckets.entry(split).or_insert_with(|| {
                bucket_order.push(split);
                Vec::new()
            });
            if streams.len() <= stream {
                streams.resize(stream + 1, Vec::new());
            }
            streams[stream].push(ins);
        }
        split_from.insert(ins, splits);
    }

    let mut barriers = Vec::new();
    for split in bucket_order {
        let streams = &buckets[&split];
        for i in 0..streams.len() {
            for j in 0..streams.len() {
                if i == j || streams[j].is_empty() {
                    continue;
                }
                for &ins in &streams[i] {
                    let mut args = vec![ins];
                    args.extend(streams[j].iter().copied());
                    let anchor = args.iter().copied().max_by_key(|&a| pos[&a]).unwrap();
                    barriers.push(Barrier { anchor, args });
                }
            }
        }
    }
    barriers
}

/// Per-instruction schedule dump: subtree weight, input stream set, and
/// assigned stream.
fn annotate_schedule(p: &Program, info: &StreamInfo) -> String {
    p.annotate(|ins| {
        let Some(&weight) = info.weights.weights.get(&ins) else {
            // Not reachable from the program output; never scheduled
            return String::new();
        };
        let inputs = info.input_streams(p, ins).iter().join(",");
        let mut note = format!("weight={weight} input={{{inputs}}}");
        if let Some(stream) = info.stream(ins) {
            note.push_str(&format!(" stream={}", stream.to_string().cyan()));
        }
        note
    })
}
