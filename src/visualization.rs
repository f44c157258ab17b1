use std::fmt::{Debug, Write as _};
use std::io::Write;

use anyhow::Result;
use petgraph::dot::{Config, Dot};
use petgraph::stable_graph::StableGraph;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};

use crate::graph::Program;

pub trait ToDot {
    fn to_dot(&self) -> Result<String>;
}

impl<N, E> ToDot for StableGraph<N, E>
where
    N: Debug,
    E: Debug,
{
    fn to_dot(&self) -> Result<String> {
        Ok(format!(
            "{:?}",
            Dot::with_config(self, &[Config::EdgeNoLabel])
        ))
    }
}

const STREAM_COLORS: &[&str] = &[
    "lightblue",
    "lightyellow",
    "lightgreen",
    "lightpink",
    "lightsalmon",
    "lightcyan",
];

/// Scheduled-program dot output: one node per instruction labelled with its
/// program position, operator, and stream, filled per stream.
impl ToDot for Program {
    fn to_dot(&self) -> Result<String> {
        let mut out = String::from("digraph {\n");
        for (at, &ins) in self.order().iter().enumerate() {
            match self.stream(ins) {
                Some(stream) => writeln!(
                    out,
                    "  n{} [label=\"%{at} {} [s{stream}]\", style=filled, fillcolor={}]",
                    ins.index(),
                    self.name(ins),
                    STREAM_COLORS[stream % STREAM_COLORS.len()],
                )?,
                None => writeln!(out, "  n{} [label=\"%{at} {}\"]", ins.index(), self.name(ins))?,
            }
        }
        for e in self.graph.edge_references() {
            writeln!(out, "  n{} -> n{}", e.source().index(), e.target().index())?;
        }
        out.push_str("}\n");
        Ok(out)
    }
}

#[allow(unused)]
/// View a scheduled program in the browser
pub fn display_program(p: &Program, file_name: &str) {
    let mut file = std::fs::File::create(file_name).unwrap();
    file.write_all(display_program_text(p).as_bytes()).unwrap();
}

fn display_program_text(p: &Program) -> String {
    format!(
        "https://dreampuf.github.io/GraphvizOnline/#{}",
        urlencoding::encode(&p.to_dot().unwrap())
    )
}
