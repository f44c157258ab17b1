use rustc_hash::FxHashMap;

use crate::graph::Program;
use crate::op::{Op, Record, Wait};
use crate::prelude::NodeIndex;

/// Logical execution queue label. Instructions on different streams may run
/// concurrently absent explicit synchronization.
pub type StreamId = usize;

/// Handle for a cross-stream synchronization event.
pub type WaitId = usize;

/// The scheduler's view of the target: operation costs, how many streams the
/// target runs concurrently, and how scheduling directives are emitted into
/// the program.
pub trait ScheduleModel {
    /// Heuristic cost of an operation. Drives partitioning only; it has no
    /// runtime semantics.
    fn weight(&self, op: &dyn Op) -> usize;
    /// Number of concurrent streams the target supports. Must be positive.
    fn concurrency(&self) -> usize;
    /// Attach a stream annotation to `ins`.
    fn sched(&mut self, p: &mut Program, ins: NodeIndex, stream: StreamId);
    /// Mark completion of `ins` on its stream.
    fn record(&mut self, p: &mut Program, ins: NodeIndex, event: WaitId);
    /// Block `ins` until `event` has been recorded.
    fn wait(&mut self, p: &mut Program, ins: NodeIndex, event: WaitId);
}

/// Default model: costs come from a per-op-name table, synchronization is
/// emitted as `@record`/`@wait` instructions around producers and consumers.
///
/// The wait instruction takes the event's record instruction as input, so
/// the synchronization edge stays visible to later graph passes.
#[derive(Debug, Default)]
pub struct DirectiveModel {
    concurrency: usize,
    weights: FxHashMap<String, usize>,
    default_weight: usize,
    events: FxHashMap<WaitId, NodeIndex>,
}

impl DirectiveModel {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            weights: FxHashMap::default(),
            default_weight: 1,
            events: FxHashMap::default(),
        }
    }

    pub fn with_weight(mut self, name: impl ToString, weight: usize) -> Self {
        self.weights.insert(name.to_string(), weight);
        self
    }

    /// Cost assumed for ops missing from the table.
    pub fn with_default_weight(mut self, weight: usize) -> Self {
        self.default_weight = weight;
        self
    }

    /// The record instruction emitted for `event`, if any.
    pub fn event(&self, event: WaitId) -> Option<NodeIndex> {
        self.events.get(&event).copied()
    }
}

impl ScheduleModel for DirectiveModel {
    fn weight(&self, op: &dyn Op) -> usize {
        self.weights
            .get(op.name())
            .copied()
            .unwrap_or(self.default_weight)
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn sched(&mut self, p: &mut Program, ins: NodeIndex, stream: StreamId) {
        p.graph[ins].stream = Some(stream);
    }

    fn record(&mut self, p: &mut Program, ins: NodeIndex, event: WaitId) {
        let rec = p.insert_op_after(ins, Record { event }, &[ins]);
        self.events.insert(event, rec);
    }

    fn wait(&mut self, p: &mut Program, ins: NodeIndex, event: WaitId) {
        // A wait for an event that was never recorded is a scheduler bug
        let rec = self.events[&event];
        p.insert_op_before(ins, Wait { event }, &[rec]);
    }
}
