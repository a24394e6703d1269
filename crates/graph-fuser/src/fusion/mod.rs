//! Elementwise fusion over the host graph.
//!
//! [`GraphFuser`] walks the body from tail to head and, for every node that may terminate a
//! fusion group, tries to pull its producers into that group. Splits standing between a
//! producer and its consumer are first pushed above the producer so the pieces can fuse.
//! All mutation goes through a [`FusionContext`] that owns the rank table.

mod chunk;
pub mod classify;
mod driver;
mod group;
pub mod topo;

pub use classify::{
    all_float_io, has_float_type, is_cuda, is_fusable, is_fusable_as_exit_node, is_simple_map,
};
pub use driver::GraphFuser;
pub use topo::{all_users_are_this_consumer, TopologicalIndex};

use crate::ir::{Graph, NodeId};
use crate::optimizer::PassResult;

/// Mutable state threaded through every fusion step.
pub struct FusionContext<'g> {
    graph: &'g mut Graph,
    ranks: TopologicalIndex,
    stats: PassResult,
}

impl<'g> FusionContext<'g> {
    /// Ranks the current body order of `graph`.
    pub fn new(graph: &'g mut Graph) -> Self {
        let ranks = TopologicalIndex::build(graph);
        Self {
            graph,
            ranks,
            stats: PassResult::default(),
        }
    }

    pub fn graph(&self) -> &Graph {
        &*self.graph
    }

    pub fn ranks(&self) -> &TopologicalIndex {
        &self.ranks
    }

    pub fn stats(&self) -> PassResult {
        self.stats
    }

    /// Links `node` after `*insertion_point`, gives it the same rank, and advances the point.
    fn insert_at(&mut self, insertion_point: &mut NodeId, node: NodeId) {
        self.graph.insert_after(node, *insertion_point);
        self.ranks.inherit(node, *insertion_point);
        *insertion_point = node;
    }

    fn destroy(&mut self, node: NodeId) {
        self.graph.destroy(node);
        self.stats.erased_nodes += 1;
    }
}
