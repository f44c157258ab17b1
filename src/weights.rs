use rustc_hash::FxHashMap;

use crate::graph::Program;
use crate::model::ScheduleModel;
use crate::op::RESERVED_PREFIX;
use crate::prelude::NodeIndex;

/// Own and subtree costs for every instruction reachable from the program's
/// final instruction.
#[derive(Debug, Default)]
pub struct WeightMap {
    /// Cost of the instruction itself. Zero for meta and context-free ops.
    pub iweights: FxHashMap<NodeIndex, usize>,
    /// Cost of the instruction plus all of its transitive inputs.
    pub weights: FxHashMap<NodeIndex, usize>,
}

impl WeightMap {
    /// Walk the input DAG bottom-up from `last`, memoizing so every
    /// instruction is costed exactly once no matter how often it is shared.
    pub fn accumulate(p: &Program, last: NodeIndex, model: &impl ScheduleModel) -> WeightMap {
        let mut wm = WeightMap::default();
        // (instruction, inputs already expanded)
        let mut stack = vec![(last, false)];
        while let Some((ins, expanded)) = stack.pop() {
            if wm.weights.contains_key(&ins) {
                continue;
            }
            if expanded {
                let op = &*p.graph[ins].op;
                let iweight = if op.context_free() || op.name().starts_with(RESERVED_PREFIX) {
                    0
                } else {
                    model.weight(op)
                };
                let total = p.inputs(ins).iter().map(|i| wm.weights[i]).sum::<usize>() + iweight;
                wm.iweights.insert(ins, iweight);
                wm.weights.insert(ins, total);
            } else {
                stack.push((ins, true));
                for i in p.inputs(ins) {
                    if !wm.weights.contains_key(&i) {
                        stack.push((i, false));
                    }
                }
            }
        }
        wm
    }

    /// Subtree cost. Panics for instructions outside the accumulated set.
    pub fn weight(&self, ins: NodeIndex) -> usize {
        self.weights[&ins]
    }

    /// Own cost. Panics for instructions outside the accumulated set.
    pub fn iweight(&self, ins: NodeIndex) -> usize {
        self.iweights[&ins]
    }
}
