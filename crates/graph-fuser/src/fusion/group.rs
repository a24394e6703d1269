use std::collections::HashMap;

use log::debug;

use crate::ir::{NodeId, NodeKind, NodeTemplate, ValueId};

use super::classify::is_fusable;
use super::FusionContext;

/// Producer group turned back into plain nodes in the outer graph.
struct Unmerged {
    /// Clones of the subgraph body, linked before the group in subgraph order.
    temporaries: Vec<NodeId>,
    /// Group output paired with the clone value that now stands for it.
    redirections: Vec<(ValueId, ValueId)>,
}

impl FusionContext<'_> {
    /// `producer` may be pulled into `consumer`: its node is fusable and nothing reads it
    /// before `consumer` runs.
    ///
    /// A producing fusion group is checked on every output, since merging re-exposes all of
    /// its live results at the consumer's position. A group is also kept apart from a
    /// consumer that reads one of its `cat` results: a `cat` may only end a group.
    pub fn should_fuse(&self, consumer: NodeId, producer: ValueId) -> bool {
        let graph = &*self.graph;
        let node = graph.producer(producer);
        if !is_fusable(graph, node) {
            return false;
        }
        let is_group = graph.node(node).is_fusion_group();
        if is_group && self.reads_group_cat(consumer, node) {
            return false;
        }
        let outputs: &[ValueId] = if is_group {
            graph.node(node).outputs()
        } else {
            std::slice::from_ref(&producer)
        };
        outputs.iter().all(|output| {
            self.ranks
                .all_users_are_this_consumer_or_occur_after_it(graph, consumer, *output)
        })
    }

    fn reads_group_cat(&self, consumer: NodeId, group: NodeId) -> bool {
        let graph = &*self.graph;
        let subgraph = graph.subgraph(group);
        graph
            .node(consumer)
            .inputs()
            .iter()
            .filter(|input| graph.producer(**input) == group)
            .any(|input| {
                let inner = subgraph.outputs()[graph.value(*input).offset()];
                subgraph.kind(subgraph.producer(inner)) == NodeKind::Cat
            })
    }

    /// Wraps `node` in a new fusion group placed where `node` was. Uses of `node` are
    /// rewired to the group output and `node` is destroyed.
    pub fn create_singleton_fusion_group(&mut self, node: NodeId) -> NodeId {
        let group = self.graph.create_fusion_group();
        self.ranks.inherit(group, node);
        self.graph.insert_before(group, node);

        let merged = self.merge_node_into_group(group, node);
        let subgraph = self.graph.subgraph_mut(group);
        let inner = subgraph.node(merged).output();
        subgraph.register_output(inner);

        let output = self.graph.node(node).output();
        let ty = self.graph.value_type(output).cloned();
        self.graph.add_node_output(group, ty);
        self.graph.replace_node_uses_with(node, group);
        self.destroy(node);
        debug!("created fusion group #{} around node #{}", group.0, node.0);
        group
    }

    /// Clones `node` to the front of `group`'s subgraph and returns the clone.
    ///
    /// Inputs of `node` the group does not read yet become new group inputs. When the group
    /// already read `node`'s output, that input is dropped and its inner uses are rewired to
    /// the clone. The outer `node` is left in place for the caller to dispose of.
    pub fn merge_node_into_group(&mut self, group: NodeId, node: NodeId) -> NodeId {
        assert!(
            !self.graph.node(node).is_fusion_group(),
            "fusion group #{} cannot be merged as an ordinary node",
            node.0
        );
        let outer_inputs = self.graph.node(group).inputs().to_vec();
        let inner_inputs = self.graph.subgraph(group).inputs().to_vec();
        assert_eq!(
            outer_inputs.len(),
            inner_inputs.len(),
            "fusion group #{} and its subgraph disagree on input count",
            group.0
        );
        let mut inputs_map: HashMap<ValueId, ValueId> =
            outer_inputs.into_iter().zip(inner_inputs).collect();

        let template = self.graph.template(node);
        for input in &template.inputs {
            if inputs_map.contains_key(input) {
                continue;
            }
            let ty = self.graph.value_type(*input).cloned();
            let inner = self.graph.subgraph_mut(group).add_input(ty);
            inputs_map.insert(*input, inner);
            self.graph.add_node_input(group, *input);
        }

        let in_graph = self
            .graph
            .subgraph_mut(group)
            .create_clone(&template, |value| inputs_map[&value]);

        let produced = self.graph.node(node).output();
        let position = self
            .graph
            .node(group)
            .inputs()
            .iter()
            .position(|input| *input == produced);
        if let Some(position) = position {
            self.graph.remove_node_input(group, position);
            let subgraph = self.graph.subgraph_mut(group);
            let stale = subgraph.inputs()[position];
            let fresh = subgraph.node(in_graph).output();
            subgraph.replace_all_uses_with(stale, fresh);
            subgraph.erase_input(position);
        }

        self.graph.subgraph_mut(group).prepend(in_graph);
        in_graph
    }

    /// Folds `producer_group` into `consumer_group`.
    ///
    /// The producer's body is first cloned back into the outer graph and its outputs are
    /// redirected to the clones, which makes the producer dead. The clones are then merged
    /// into the consumer one at a time, last to first; results still read outside the
    /// consumer are exposed as extra consumer outputs.
    pub fn merge_fusion_groups(&mut self, consumer_group: NodeId, producer_group: NodeId) {
        let unmerged = self.unmerge_group(producer_group);
        for (from, to) in &unmerged.redirections {
            self.graph.replace_all_uses_with(*from, *to);
        }
        self.destroy(producer_group);

        for temporary in unmerged.temporaries.iter().rev().copied() {
            let merged = self.merge_node_into_group(consumer_group, temporary);
            let outputs = self.graph.node(temporary).outputs().to_vec();
            for (offset, output) in outputs.into_iter().enumerate() {
                if self.graph.uses(output).is_empty() {
                    continue;
                }
                let subgraph = self.graph.subgraph_mut(consumer_group);
                let inner = subgraph.node(merged).outputs()[offset];
                subgraph.register_output(inner);
                let ty = self.graph.value_type(output).cloned();
                let exposed = self.graph.add_node_output(consumer_group, ty);
                self.graph.replace_all_uses_with(output, exposed);
            }
            self.destroy(temporary);
        }
        debug!(
            "merged fusion group #{} into #{}",
            producer_group.0, consumer_group.0
        );
    }

    fn unmerge_group(&mut self, group: NodeId) -> Unmerged {
        let subgraph = self.graph.subgraph(group);
        let fragment: Vec<(NodeTemplate, Vec<ValueId>)> = subgraph
            .nodes()
            .map(|inner| (subgraph.template(inner), subgraph.node(inner).outputs().to_vec()))
            .collect();
        let inner_outputs = subgraph.outputs().to_vec();
        let mut inner_to_outer: HashMap<ValueId, ValueId> = subgraph
            .inputs()
            .iter()
            .copied()
            .zip(self.graph.node(group).inputs().iter().copied())
            .collect();

        let rank = self.ranks.rank(group);
        let mut temporaries = Vec::with_capacity(fragment.len());
        for (template, inner) in &fragment {
            let outer = self
                .graph
                .create_clone(template, |value| inner_to_outer[&value]);
            self.graph.insert_before(outer, group);
            self.ranks.set(outer, rank);
            let outer_outputs = self.graph.node(outer).outputs().to_vec();
            inner_to_outer.extend(inner.iter().copied().zip(outer_outputs));
            temporaries.push(outer);
        }

        let redirections = self
            .graph
            .node(group)
            .outputs()
            .iter()
            .zip(&inner_outputs)
            .map(|(outer, inner)| (*outer, inner_to_outer[inner]))
            .collect();
        Unmerged {
            temporaries,
            redirections,
        }
    }

    /// Pulls the node producing `producer` into `consumer`'s group, wrapping `consumer` in a
    /// singleton group first when needed. Returns the group.
    pub fn fuse(&mut self, consumer: NodeId, producer: ValueId) -> NodeId {
        let consumer_kind = self.graph.kind(consumer);
        let group = if self.graph.node(consumer).is_fusion_group() {
            consumer
        } else {
            self.create_singleton_fusion_group(consumer)
        };
        self.stats.rewrites_applied += 1;

        let producer_node = self.graph.producer(producer);
        if self.graph.node(producer_node).is_fusion_group() {
            self.merge_fusion_groups(group, producer_node);
            return group;
        }

        let producer_kind = self.graph.kind(producer_node);
        let merged = self.merge_node_into_group(group, producer_node);
        if !self.graph.uses(producer).is_empty() {
            let subgraph = self.graph.subgraph_mut(group);
            let inner = subgraph.node(merged).output();
            subgraph.register_output(inner);
            let ty = self.graph.value_type(producer).cloned();
            let exposed = self.graph.add_node_output(group, ty);
            self.graph.replace_all_uses_with(producer, exposed);
        }
        self.destroy(producer_node);
        debug!(
            "fused {producer_kind} #{} into {consumer_kind} #{} (group #{})",
            producer_node.0, consumer.0, group.0
        );
        group
    }
}
