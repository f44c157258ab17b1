pub mod graph;
pub mod model;
pub mod op;
pub mod partition;
pub mod schedule;
pub mod trace;
pub mod visualization;
pub mod weights;


pub mod prelude {
    pub use crate::graph::*;
    pub use crate::model::*;
    pub use crate::op::*;
    pub use crate::partition::{MIN_PARTITION_THRESHOLD, Partition};
    pub use crate::schedule::*;
    pub use crate::visualization::ToDot;
    pub use petgraph;
    pub use petgraph::stable_graph::NodeIndex;
    pub use rustc_hash::{FxHashMap, FxHashSet};
    pub use tracing;
}
