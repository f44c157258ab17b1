use std::ops::{Deref, DerefMut};

use as_any::AsAny;
use itertools::Itertools;
use petgraph::{
    Direction,
    stable_graph::StableGraph,
    visit::{EdgeRef, IntoEdgeReferences},
};
use rustc_hash::FxHashMap;

use crate::model::StreamId;
use crate::op::{Op, Param};
use crate::prelude::NodeIndex;

pub type SchedGraph = StableGraph<Instruction, ()>;

/// A single instruction: an operation plus the stream annotation the
/// scheduling pass attaches to it.
#[derive(Debug)]
pub struct Instruction {
    pub op: Box<dyn Op>,
    pub stream: Option<StreamId>,
}

impl Instruction {
    pub fn new(op: impl Op + 'static) -> Self {
        Self {
            op: Box::new(op),
            stream: None,
        }
    }
}

/// A program to be scheduled.
///
/// Computation is a directed acyclic dataflow graph of instructions, paired
/// with the linear order they are emitted in. Scheduling rewrites the order
/// and inserts directives; operator semantics are never touched.
#[derive(Debug, Default)]
pub struct Program {
    pub graph: SchedGraph,
    order: Vec<NodeIndex>,
}

impl Program {
    pub fn new() -> Program {
        Program::default()
    }

    /// Add a graph entry point with a display label.
    pub fn param(&mut self, label: impl ToString) -> NodeIndex {
        self.add_op(Param::new(label)).finish()
    }

    /// Add an op at the end of the program, and get back a NewOp
    ///
    /// ```rust
    /// # use braid::prelude::*;
    /// # #[derive(Debug)]
    /// # struct Gemm;
    /// # impl Op for Gemm {
    /// #     fn name(&self) -> &str { "gemm" }
    /// # }
    /// let mut p = Program::new();
    /// let a = p.param("a");
    /// let b = p.param("b");
    /// let c = p.add_op(Gemm).input(a).input(b).finish();
    /// ```
    pub fn add_op<O: Op + 'static>(&mut self, op: O) -> NewOp<'_> {
        let id = self.graph.add_node(Instruction::new(op));
        self.order.push(id);
        NewOp {
            new_op_id: id,
            program: self,
        }
    }

    /// Inputs of an instruction, in argument order.
    pub fn inputs(&self, ins: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .edges_directed(ins, Direction::Incoming)
            .sorted_by_key(|e| e.id())
            .map(|e| e.source())
            .collect()
    }

    /// Consumers of an instruction.
    pub fn outputs(&self, ins: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .edges_directed(ins, Direction::Outgoing)
            .sorted_by_key(|e| e.id())
            .map(|e| e.target())
            .collect()
    }

    /// The program's final instruction.
    pub fn last(&self) -> NodeIndex {
        *self.order.last().expect("empty program")
    }

    pub fn order(&self) -> &[NodeIndex] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Position of an instruction in program order.
    pub fn position(&self, ins: NodeIndex) -> usize {
        self.order
            .iter()
            .position(|&i| i == ins)
            .expect("instruction not in program")
    }

    /// Replace the program order. Must be a permutation of the current order
    /// that respects data dependencies.
    pub fn set_order(&mut self, order: Vec<NodeIndex>) {
        debug_assert_eq!(order.len(), self.order.len());
        self.order = order;
        debug_assert!(self.is_topologically_ordered());
    }

    /// Insert `op` immediately before `anchor` in program order.
    pub fn insert_op_before<O: Op + 'static>(
        &mut self,
        anchor: NodeIndex,
        op: O,
        inputs: &[NodeIndex],
    ) -> NodeIndex {
        self.insert_op_at(self.position(anchor), op, inputs)
    }

    /// Insert `op` immediately after `anchor` in program order.
    pub fn insert_op_after<O: Op + 'static>(
        &mut self,
        anchor: NodeIndex,
        op: O,
        inputs: &[NodeIndex],
    ) -> NodeIndex {
        self.insert_op_at(self.position(anchor) + 1, op, inputs)
    }

    fn insert_op_at<O: Op + 'static>(
        &mut self,
        at: usize,
        op: O,
        inputs: &[NodeIndex],
    ) -> NodeIndex {
        let id = self.graph.add_node(Instruction::new(op));
        for &i in inputs {
            self.graph.add_edge(i, id, ());
        }
        self.order.insert(at, id);
        id
    }

    pub fn try_get_op<T: Op + 'static>(&self, ins: NodeIndex) -> Option<&T> {
        self.graph
            .node_weight(ins)
            .unwrap()
            .op
            .as_any()
            .downcast_ref::<T>()
    }
    pub fn get_op<T: Op + 'static>(&self, ins: NodeIndex) -> &T {
        self.try_get_op(ins).unwrap()
    }

    /// Operator name of an instruction.
    pub fn name(&self, ins: NodeIndex) -> &str {
        self.graph[ins].op.name()
    }

    /// Stream annotation of an instruction, if scheduled.
    pub fn stream(&self, ins: NodeIndex) -> Option<StreamId> {
        self.graph[ins].stream
    }

    /// True when every instruction's inputs appear earlier in program order.
    pub fn is_topologically_ordered(&self) -> bool {
        let pos: FxHashMap<NodeIndex, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, &ins)| (ins, i))
            .collect();
        if pos.len() != self.graph.node_count() {
            return false;
        }
        self.graph
            .edge_references()
            .all(|e| pos[&e.source()] < pos[&e.target()])
    }

    /// Program listing, one instruction per line, each decorated by `f`.
    pub fn annotate(&self, mut f: impl FnMut(NodeIndex) -> String) -> String {
        let pos: FxHashMap<NodeIndex, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, &ins)| (ins, i))
            .collect();
        let mut out = String::new();
        for (i, &ins) in self.order.iter().enumerate() {
            let args = self.inputs(ins).iter().map(|x| format!("%{}", pos[x])).join(", ");
            let note = f(ins);
            if note.is_empty() {
                out.push_str(&format!("%{i} = {}({args})\n", self.name(ins)));
            } else {
                out.push_str(&format!("%{i} = {}({args}): {note}\n", self.name(ins)));
            }
        }
        out
    }
}

impl Deref for Program {
    type Target = SchedGraph;
    fn deref(&self) -> &Self::Target {
        &self.graph
    }
}

impl DerefMut for Program {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.graph
    }
}

pub struct NewOp<'a> {
    new_op_id: NodeIndex,
    program: &'a mut Program,
}

impl NewOp<'_> {
    pub fn finish(self) -> NodeIndex {
        self.new_op_id
    }

    pub fn input(self, id: NodeIndex) -> Self {
        self.program.graph.add_edge(id, self.new_op_id, ());
        self
    }
}
