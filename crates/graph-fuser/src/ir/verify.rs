use std::collections::HashSet;

use thiserror::Error;

use super::graph::Graph;
use super::node::{NodeId, NodeKind, Use, ValueId};

/// Structural defects detected by [`verify`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("value %{value} is used by node #{user} before it is defined")]
    UseBeforeDefinition { value: u32, user: u32 },
    #[error("node #{node} reads %{value} at input {offset} but the use list does not record it")]
    MissingUse { node: u32, value: u32, offset: usize },
    #[error("value %{value} records a use by node #{user} at input {offset} that does not exist")]
    DanglingUse { value: u32, user: u32, offset: usize },
    #[error("value %{value} does not point back to node #{node} output {offset}")]
    BadProducer { value: u32, node: u32, offset: usize },
    #[error("fusion group #{node} has {outer} {what} but its subgraph has {inner}")]
    GroupArity {
        node: u32,
        what: &'static str,
        outer: usize,
        inner: usize,
    },
    #[error("fusion group #{node} {what} {index} type differs from its subgraph")]
    GroupType {
        node: u32,
        what: &'static str,
        index: usize,
    },
    #[error("fusion group #{node} has an empty subgraph")]
    EmptyGroup { node: u32 },
    #[error("{kind} node #{node} is linked into the body")]
    MisplacedNode { node: u32, kind: NodeKind },
    #[error("inside fusion group #{group}: {source}")]
    Nested {
        group: u32,
        #[source]
        source: Box<GraphError>,
    },
}

/// Checks use lists, producer back-references, definition order, and the fusion-group
/// correspondence between outer slots and subgraph slots.
pub fn verify(graph: &Graph) -> Result<(), GraphError> {
    let mut defined: HashSet<ValueId> = graph.inputs().iter().copied().collect();
    check_outputs(graph, graph.param_node())?;

    for node_id in graph.nodes() {
        let node = graph.node(node_id);
        if matches!(node.kind(), NodeKind::Param | NodeKind::Return) {
            return Err(GraphError::MisplacedNode {
                node: node_id.0,
                kind: node.kind(),
            });
        }
        check_inputs(graph, node_id, &defined)?;
        check_outputs(graph, node_id)?;
        defined.extend(node.outputs().iter().copied());

        if node.kind() == NodeKind::FusionGroup {
            check_group(graph, node_id)?;
        }
    }

    check_inputs(graph, graph.return_node(), &defined)
}

fn check_inputs(
    graph: &Graph,
    node_id: NodeId,
    defined: &HashSet<ValueId>,
) -> Result<(), GraphError> {
    let node = graph.node(node_id);
    for (offset, input) in node.inputs().iter().enumerate() {
        if !graph.contains_value(*input) || !defined.contains(input) {
            return Err(GraphError::UseBeforeDefinition {
                value: input.0,
                user: node_id.0,
            });
        }
        let expected = Use {
            user: node_id,
            offset,
        };
        if !graph.uses(*input).contains(&expected) {
            return Err(GraphError::MissingUse {
                node: node_id.0,
                value: input.0,
                offset,
            });
        }
    }
    Ok(())
}

fn check_outputs(graph: &Graph, node_id: NodeId) -> Result<(), GraphError> {
    let node = graph.node(node_id);
    for (offset, output) in node.outputs().iter().enumerate() {
        let value = graph.value(*output);
        if value.node() != node_id || value.offset() != offset {
            return Err(GraphError::BadProducer {
                value: output.0,
                node: node_id.0,
                offset,
            });
        }
        for u in value.uses() {
            let real = graph
                .try_node(u.user)
                .and_then(|user| user.inputs().get(u.offset))
                .copied();
            if real != Some(*output) {
                return Err(GraphError::DanglingUse {
                    value: output.0,
                    user: u.user.0,
                    offset: u.offset,
                });
            }
        }
    }
    Ok(())
}

fn check_group(graph: &Graph, node_id: NodeId) -> Result<(), GraphError> {
    let node = graph.node(node_id);
    let subgraph = graph.subgraph(node_id);
    if subgraph.is_empty() {
        return Err(GraphError::EmptyGroup { node: node_id.0 });
    }
    let slots = [
        ("inputs", node.inputs(), subgraph.inputs()),
        ("outputs", node.outputs(), subgraph.outputs()),
    ];
    for (what, outer, inner) in slots {
        if outer.len() != inner.len() {
            return Err(GraphError::GroupArity {
                node: node_id.0,
                what,
                outer: outer.len(),
                inner: inner.len(),
            });
        }
        for (index, (outer, inner)) in outer.iter().zip(inner).enumerate() {
            if graph.value_type(*outer) != subgraph.value_type(*inner) {
                return Err(GraphError::GroupType {
                    node: node_id.0,
                    what,
                    index,
                });
            }
        }
    }
    verify(subgraph).map_err(|source| GraphError::Nested {
        group: node_id.0,
        source: Box::new(source),
    })
}
