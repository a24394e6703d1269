use log::{debug, trace};

use crate::ir::{verify, Graph, NodeId};
use crate::optimizer::{FuserConfig, PassResult};

use super::classify::is_fusable_as_exit_node;
use super::FusionContext;

/// Fixed-point driver of the fusion pass.
pub struct GraphFuser<'g> {
    cx: FusionContext<'g>,
    config: FuserConfig,
}

impl<'g> GraphFuser<'g> {
    pub fn new(graph: &'g mut Graph, config: FuserConfig) -> Self {
        Self {
            cx: FusionContext::new(graph),
            config,
        }
    }

    pub fn context(&self) -> &FusionContext<'g> {
        &self.cx
    }

    /// Tries to grow a fusion group ending at `consumer`.
    ///
    /// Returns the node to scan next and whether the graph changed. After a split was moved
    /// the same consumer is scanned again; after a fusion the resulting group is; otherwise
    /// scanning continues with the previous body node.
    pub fn scan_node(&mut self, consumer: NodeId) -> (Option<NodeId>, bool) {
        let stage = self.cx.graph.node(consumer).stage();
        let saved = self.cx.graph.set_stage(stage);
        let outcome = self.scan_consumer(consumer, stage);
        self.cx.graph.set_stage(saved);
        outcome
    }

    fn scan_consumer(&mut self, consumer: NodeId, stage: usize) -> (Option<NodeId>, bool) {
        let graph = &*self.cx.graph;
        if !is_fusable_as_exit_node(graph, consumer) {
            trace!("node #{} ({}) cannot end a group", consumer.0, graph.kind(consumer));
            return (graph.prev_node(consumer), false);
        }

        // Latest producers first, so in f(a, a + b) the a + b edge is considered before a.
        let mut inputs = graph.node(consumer).inputs().to_vec();
        let ranks = &self.cx.ranks;
        inputs.sort_by(|a, b| {
            ranks
                .rank(graph.producer(*b))
                .cmp(&ranks.rank(graph.producer(*a)))
        });

        for producer in inputs {
            if self.cx.graph.value_stage(producer) != stage {
                trace!(
                    "skipping %{} for node #{}: stage boundary",
                    producer.0,
                    consumer.0
                );
                continue;
            }
            if self.cx.try_to_move_chunk(consumer, producer) {
                return (Some(consumer), true);
            }
            if self.cx.should_fuse(consumer, producer) {
                let group = self.cx.fuse(consumer, producer);
                return (Some(group), true);
            }
        }
        (self.cx.graph.prev_node(consumer), false)
    }

    /// Repeats reverse scans of the body until one makes no change or the pass cap is hit.
    pub fn run(mut self) -> PassResult {
        let mut passes = 0usize;
        while passes < self.config.max_passes {
            passes += 1;
            let before = self.cx.stats;
            let mut changed = false;
            let mut cursor = self.cx.graph.last_node();
            while let Some(node) = cursor {
                let (next, mutated) = self.scan_node(node);
                changed |= mutated;
                cursor = next;
            }

            let after = self.cx.stats;
            debug!(
                "fusion pass {passes}: {} fusion(s), {} split move(s)",
                after.rewrites_applied - before.rewrites_applied,
                after.chunks_distributed - before.chunks_distributed
            );
            if self.config.verify_each_pass {
                if let Err(err) = verify(self.cx.graph()) {
                    panic!("graph is malformed after fusion pass {passes}: {err}");
                }
            }
            if !changed {
                break;
            }
        }

        let mut result = self.cx.stats;
        result.iterations = passes;
        result.changed = result.rewrites_applied + result.chunks_distributed > 0;
        result
    }
}
