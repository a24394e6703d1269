use smallvec::SmallVec;

use super::node::{
    Attributes, Node, NodeId, NodeKind, NodePayload, NodeTemplate, Use, Value, ValueId,
};
use super::types::TensorType;

/// Mutable dataflow graph with arena-allocated nodes and values.
///
/// Body nodes form a doubly linked list so insertion and removal never invalidate the
/// position of other nodes. Graph inputs are the outputs of a dedicated `param` node and
/// graph outputs are the inputs of a dedicated `return` node; neither belongs to the body.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    values: Vec<Option<Value>>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    param: NodeId,
    ret: NodeId,
    stage: usize,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Creates an empty graph with no inputs, outputs, or body nodes.
    pub fn new() -> Self {
        let mut graph = Graph {
            nodes: Vec::new(),
            values: Vec::new(),
            head: None,
            tail: None,
            param: NodeId(0),
            ret: NodeId(0),
            stage: 0,
        };
        graph.param = graph.alloc_node(NodeKind::Param, NodePayload::Op(Attributes::new()));
        graph.ret = graph.alloc_node(NodeKind::Return, NodePayload::Op(Attributes::new()));
        graph
    }

    pub fn param_node(&self) -> NodeId {
        self.param
    }

    pub fn return_node(&self) -> NodeId {
        self.ret
    }

    /// Graph inputs in declaration order.
    pub fn inputs(&self) -> &[ValueId] {
        &self.node(self.param).outputs
    }

    /// Graph outputs in return order.
    pub fn outputs(&self) -> &[ValueId] {
        &self.node(self.ret).inputs
    }

    /// Appends a graph input.
    pub fn add_input(&mut self, ty: Option<TensorType>) -> ValueId {
        self.add_node_output(self.param, ty)
    }

    /// Removes the graph input at `index`. The input must be unused.
    pub fn erase_input(&mut self, index: usize) {
        let param = self.param;
        let value = self.node(param).outputs[index];
        assert!(
            self.value(value).uses.is_empty(),
            "cannot erase graph input {index} while it still has uses"
        );
        self.node_mut(param).outputs.remove(index);
        let shifted = self.node(param).outputs[index..].to_vec();
        for later in shifted {
            self.value_mut(later).offset -= 1;
        }
        self.values[value.index()] = None;
    }

    /// Appends `value` to the graph outputs and returns its position.
    pub fn register_output(&mut self, value: ValueId) -> usize {
        self.add_node_input(self.ret, value)
    }

    /// Returns the node identified by `id`.
    pub fn node(&self, id: NodeId) -> &Node {
        self.try_node(id)
            .unwrap_or_else(|| panic!("node #{} was destroyed or never existed", id.0))
    }

    pub fn try_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(|slot| slot.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes
            .get_mut(id.index())
            .and_then(|slot| slot.as_mut())
            .unwrap_or_else(|| panic!("node #{} was destroyed or never existed", id.0))
    }

    /// Returns `true` while the node is alive.
    pub fn contains(&self, id: NodeId) -> bool {
        self.try_node(id).is_some()
    }

    /// Returns the value identified by `id`.
    pub fn value(&self, id: ValueId) -> &Value {
        self.values
            .get(id.index())
            .and_then(|slot| slot.as_ref())
            .unwrap_or_else(|| panic!("value %{} was destroyed or never existed", id.0))
    }

    fn value_mut(&mut self, id: ValueId) -> &mut Value {
        self.values
            .get_mut(id.index())
            .and_then(|slot| slot.as_mut())
            .unwrap_or_else(|| panic!("value %{} was destroyed or never existed", id.0))
    }

    pub fn contains_value(&self, id: ValueId) -> bool {
        self.values
            .get(id.index())
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    pub fn kind(&self, node: NodeId) -> NodeKind {
        self.node(node).kind
    }

    /// Node producing `value`.
    pub fn producer(&self, value: ValueId) -> NodeId {
        self.value(value).node
    }

    pub fn value_type(&self, value: ValueId) -> Option<&TensorType> {
        self.value(value).ty.as_ref()
    }

    pub fn set_type(&mut self, value: ValueId, ty: Option<TensorType>) {
        self.value_mut(value).ty = ty;
    }

    pub fn uses(&self, value: ValueId) -> &[Use] {
        &self.value(value).uses
    }

    /// Stage of the node producing `value`.
    pub fn value_stage(&self, value: ValueId) -> usize {
        self.node(self.producer(value)).stage
    }

    /// Upper bound (exclusive) of node ids handed out so far.
    pub fn node_capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Stage stamped on newly created nodes.
    pub fn stage(&self) -> usize {
        self.stage
    }

    /// Overrides the stage for new nodes, returning the previous one so the caller can
    /// restore it.
    pub fn set_stage(&mut self, stage: usize) -> usize {
        std::mem::replace(&mut self.stage, stage)
    }

    pub fn set_node_stage(&mut self, node: NodeId, stage: usize) {
        self.node_mut(node).stage = stage;
    }

    /// Creates an unlinked operator node.
    pub fn create(&mut self, kind: NodeKind, attrs: Attributes) -> NodeId {
        assert!(
            !matches!(
                kind,
                NodeKind::FusionGroup | NodeKind::Param | NodeKind::Return
            ),
            "{kind} nodes cannot be created as plain operators"
        );
        self.alloc_node(kind, NodePayload::Op(attrs))
    }

    /// Creates an unlinked fusion group with an empty subgraph.
    pub fn create_fusion_group(&mut self) -> NodeId {
        self.alloc_node(
            NodeKind::FusionGroup,
            NodePayload::FusionGroup(Box::new(Graph::new())),
        )
    }

    fn alloc_node(&mut self, kind: NodeKind, payload: NodePayload) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(Node {
            kind,
            payload,
            inputs: Vec::new(),
            outputs: Vec::new(),
            stage: self.stage,
            prev: None,
            next: None,
            linked: false,
        }));
        id
    }

    /// Snapshot of `node` that can be replayed into any graph with [`Graph::create_clone`].
    pub fn template(&self, node: NodeId) -> NodeTemplate {
        let node = self.node(node);
        NodeTemplate {
            kind: node.kind,
            payload: node.payload.clone(),
            inputs: node.inputs.clone(),
            output_types: node
                .outputs
                .iter()
                .map(|value| self.value(*value).ty.clone())
                .collect(),
        }
    }

    /// Creates an unlinked copy of `template`, translating its inputs through `map`.
    pub fn create_clone(
        &mut self,
        template: &NodeTemplate,
        mut map: impl FnMut(ValueId) -> ValueId,
    ) -> NodeId {
        let id = self.alloc_node(template.kind, template.payload.clone());
        for input in &template.inputs {
            let mapped = map(*input);
            self.add_node_input(id, mapped);
        }
        for ty in &template.output_types {
            self.add_node_output(id, ty.clone());
        }
        id
    }

    /// Appends `value` as the last input of `node` and returns its position.
    pub fn add_node_input(&mut self, node: NodeId, value: ValueId) -> usize {
        let offset = self.node(node).inputs.len();
        self.value_mut(value).uses.push(Use { user: node, offset });
        self.node_mut(node).inputs.push(value);
        offset
    }

    /// Removes the input at `index` from `node`, shifting later inputs down.
    pub fn remove_node_input(&mut self, node: NodeId, index: usize) {
        let removed = self.node_mut(node).inputs.remove(index);
        self.value_mut(removed)
            .uses
            .retain(|u| !(u.user == node && u.offset == index));
        let later = self.node(node).inputs[index..].to_vec();
        for (shift, value) in later.into_iter().enumerate() {
            let old_offset = index + shift + 1;
            for u in self.value_mut(value).uses.iter_mut() {
                if u.user == node && u.offset == old_offset {
                    u.offset = old_offset - 1;
                }
            }
        }
    }

    /// Appends a new output value to `node`.
    pub fn add_node_output(&mut self, node: NodeId, ty: Option<TensorType>) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        let offset = self.node(node).outputs.len();
        self.values.push(Some(Value {
            ty,
            node,
            offset,
            uses: SmallVec::new(),
        }));
        self.node_mut(node).outputs.push(id);
        id
    }

    /// Redirects every use of `from` to `to`.
    pub fn replace_all_uses_with(&mut self, from: ValueId, to: ValueId) {
        if from == to {
            return;
        }
        let uses = std::mem::take(&mut self.value_mut(from).uses);
        for u in &uses {
            self.node_mut(u.user).inputs[u.offset] = to;
        }
        self.value_mut(to).uses.extend(uses);
    }

    /// Redirects every use of each output of `old` to the matching output of `new`.
    pub fn replace_node_uses_with(&mut self, old: NodeId, new: NodeId) {
        let old_outputs = self.node(old).outputs.clone();
        let new_outputs = self.node(new).outputs.clone();
        assert_eq!(
            old_outputs.len(),
            new_outputs.len(),
            "replacement node must have the same number of outputs"
        );
        for (from, to) in old_outputs.into_iter().zip(new_outputs) {
            self.replace_all_uses_with(from, to);
        }
    }

    /// First body node.
    pub fn first_node(&self) -> Option<NodeId> {
        self.head
    }

    /// Last body node.
    pub fn last_node(&self) -> Option<NodeId> {
        self.tail
    }

    pub fn next_node(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).next
    }

    pub fn prev_node(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).prev
    }

    /// Returns `true` when `node` is part of the body list.
    pub fn is_linked(&self, node: NodeId) -> bool {
        self.try_node(node).map(|n| n.linked).unwrap_or(false)
    }

    /// Iterates body nodes in execution order.
    pub fn nodes(&self) -> NodeIter<'_> {
        NodeIter {
            graph: self,
            cursor: self.head,
        }
    }

    /// Body node ids in execution order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes().collect()
    }

    /// Number of body nodes.
    pub fn len(&self) -> usize {
        self.nodes().count()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Links `node` immediately before `at`. Inserting before the return node appends.
    pub fn insert_before(&mut self, node: NodeId, at: NodeId) {
        if at == self.ret {
            self.append(node);
            return;
        }
        assert!(self.is_linked(at), "insertion point #{} is not linked", at.0);
        let prev = self.node(at).prev;
        self.link_between(node, prev, Some(at));
    }

    /// Links `node` immediately after `at`. Inserting after the param node prepends.
    pub fn insert_after(&mut self, node: NodeId, at: NodeId) {
        if at == self.param {
            self.prepend(node);
            return;
        }
        assert!(self.is_linked(at), "insertion point #{} is not linked", at.0);
        let next = self.node(at).next;
        self.link_between(node, Some(at), next);
    }

    pub fn append(&mut self, node: NodeId) {
        let tail = self.tail;
        self.link_between(node, tail, None);
    }

    pub fn prepend(&mut self, node: NodeId) {
        let head = self.head;
        self.link_between(node, None, head);
    }

    fn link_between(&mut self, node: NodeId, prev: Option<NodeId>, next: Option<NodeId>) {
        assert!(
            node != self.param && node != self.ret,
            "param and return nodes never join the body"
        );
        {
            let entry = self.node_mut(node);
            assert!(!entry.linked, "node #{} is already linked", node.0);
            entry.prev = prev;
            entry.next = next;
            entry.linked = true;
        }
        match prev {
            Some(prev) => self.node_mut(prev).next = Some(node),
            None => self.head = Some(node),
        }
        match next {
            Some(next) => self.node_mut(next).prev = Some(node),
            None => self.tail = Some(node),
        }
    }

    fn unlink(&mut self, node: NodeId) {
        let (prev, next) = {
            let entry = self.node_mut(node);
            if !entry.linked {
                return;
            }
            entry.linked = false;
            (entry.prev.take(), entry.next.take())
        };
        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.tail = prev,
        }
    }

    /// Removes `node` from the graph. Every output must already be unused.
    pub fn destroy(&mut self, node: NodeId) {
        assert!(
            node != self.param && node != self.ret,
            "param and return nodes cannot be destroyed"
        );
        let outputs = self.node(node).outputs.clone();
        for output in &outputs {
            let uses = self.value(*output).uses.len();
            assert!(
                uses == 0,
                "cannot destroy {} node #{}: output %{} still has {uses} use(s)",
                self.node(node).kind,
                node.0,
                output.0
            );
        }
        let inputs = self.node(node).inputs.clone();
        for (offset, input) in inputs.into_iter().enumerate() {
            self.value_mut(input)
                .uses
                .retain(|u| !(u.user == node && u.offset == offset));
        }
        self.unlink(node);
        for output in outputs {
            self.values[output.index()] = None;
        }
        self.nodes[node.index()] = None;
    }

    /// Nested graph owned by the fusion group `node`.
    pub fn subgraph(&self, node: NodeId) -> &Graph {
        match &self.node(node).payload {
            NodePayload::FusionGroup(graph) => graph,
            NodePayload::Op(_) => panic!(
                "{} node #{} has no subgraph",
                self.node(node).kind,
                node.0
            ),
        }
    }

    pub fn subgraph_mut(&mut self, node: NodeId) -> &mut Graph {
        let kind = self.node(node).kind;
        match &mut self.node_mut(node).payload {
            NodePayload::FusionGroup(graph) => graph,
            NodePayload::Op(_) => panic!("{kind} node #{} has no subgraph", node.0),
        }
    }
}

/// Forward iterator over body nodes.
pub struct NodeIter<'a> {
    graph: &'a Graph,
    cursor: Option<NodeId>,
}

impl Iterator for NodeIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.cursor?;
        self.cursor = self.graph.node(current).next;
        Some(current)
    }
}
