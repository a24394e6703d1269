use crate::ir::{Graph, NodeId, ValueId};

/// Approximate node ordering used to pick fusion candidates.
///
/// Ranks are assigned once from the body order. Nodes created later copy the rank of the node
/// they were inserted next to, so ranks are neither unique nor dense after mutation, but a
/// strictly larger rank still means "occurs later".
#[derive(Debug, Clone, Default)]
pub struct TopologicalIndex {
    ranks: Vec<Option<usize>>,
}

impl TopologicalIndex {
    /// Param node gets 0, body nodes 1.. in order, the return node comes last.
    pub fn build(graph: &Graph) -> Self {
        let mut index = Self {
            ranks: vec![None; graph.node_capacity()],
        };
        index.set(graph.param_node(), 0);
        let mut next = 1;
        for node in graph.nodes() {
            index.set(node, next);
            next += 1;
        }
        index.set(graph.return_node(), next);
        index
    }

    /// Rank of `node`. Panics when the node was never ranked.
    pub fn rank(&self, node: NodeId) -> usize {
        self.ranks
            .get(node.index())
            .copied()
            .flatten()
            .unwrap_or_else(|| panic!("node #{} has no topological rank", node.0))
    }

    pub fn get(&self, node: NodeId) -> Option<usize> {
        self.ranks.get(node.index()).copied().flatten()
    }

    pub fn set(&mut self, node: NodeId, rank: usize) {
        let idx = node.index();
        if idx >= self.ranks.len() {
            self.ranks.resize(idx + 1, None);
        }
        self.ranks[idx] = Some(rank);
    }

    /// Gives `node` the rank of `anchor`.
    pub fn inherit(&mut self, node: NodeId, anchor: NodeId) {
        let rank = self.rank(anchor);
        self.set(node, rank);
    }

    /// True when every user of `producer` is `consumer` or ranked at or after it.
    pub fn all_users_are_this_consumer_or_occur_after_it(
        &self,
        graph: &Graph,
        consumer: NodeId,
        producer: ValueId,
    ) -> bool {
        let consumer_rank = self.rank(consumer);
        graph
            .uses(producer)
            .iter()
            .all(|u| u.user == consumer || self.rank(u.user) >= consumer_rank)
    }
}

pub fn all_users_are_this_consumer(graph: &Graph, consumer: NodeId, producer: ValueId) -> bool {
    graph.uses(producer).iter().all(|u| u.user == consumer)
}
