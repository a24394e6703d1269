//! Predicates deciding which nodes may join a fusion group.

use crate::ir::{Graph, NodeId, NodeKind, ScalarType, ValueId};

/// Whether `node` is an elementwise map the fused kernel generator knows how to emit.
///
/// `min` and `max` only qualify in their binary form; the unary forms are reductions.
pub fn is_simple_map(graph: &Graph, node: NodeId) -> bool {
    let node = graph.node(node);
    match node.kind() {
        NodeKind::And
        | NodeKind::Lshift
        | NodeKind::Or
        | NodeKind::Rshift
        | NodeKind::Xor
        | NodeKind::Abs
        | NodeKind::Acos
        | NodeKind::Add
        | NodeKind::Asin
        | NodeKind::Atan
        | NodeKind::Atan2
        | NodeKind::Ceil
        | NodeKind::Clamp
        | NodeKind::Cos
        | NodeKind::Cosh
        | NodeKind::Div
        | NodeKind::Eq
        | NodeKind::Exp
        | NodeKind::Floor
        | NodeKind::Fmod
        | NodeKind::Frac
        | NodeKind::Ge
        | NodeKind::Gt
        | NodeKind::Le
        | NodeKind::Lerp
        | NodeKind::Lgamma
        | NodeKind::Log
        | NodeKind::Log1p
        | NodeKind::Lt
        | NodeKind::Mul
        | NodeKind::Ne
        | NodeKind::Neg
        | NodeKind::Ones
        | NodeKind::Pow
        | NodeKind::Reciprocal
        | NodeKind::Remainder
        | NodeKind::Round
        | NodeKind::Rsqrt
        | NodeKind::Sigmoid
        | NodeKind::Sin
        | NodeKind::Sinh
        | NodeKind::Sqrt
        | NodeKind::Sub
        | NodeKind::Tan
        | NodeKind::Tanh
        | NodeKind::Trunc
        | NodeKind::Zeros
        | NodeKind::SigmoidBackward
        | NodeKind::TanhBackward => true,
        NodeKind::Min | NodeKind::Max => node.inputs().len() == 2,
        NodeKind::Split
        | NodeKind::Cat
        | NodeKind::Mm
        | NodeKind::Sum
        | NodeKind::Transpose
        | NodeKind::View
        | NodeKind::Constant
        | NodeKind::FusionGroup
        | NodeKind::Param
        | NodeKind::Return => false,
    }
}

/// Typed as 32-bit float, the only scalar kind the kernel generator specializes for.
pub fn has_float_type(graph: &Graph, value: ValueId) -> bool {
    graph
        .value_type(value)
        .map(|ty| ty.scalar == ScalarType::Float)
        .unwrap_or(false)
}

pub fn all_float_io(graph: &Graph, node: NodeId) -> bool {
    let node = graph.node(node);
    node.outputs()
        .iter()
        .chain(node.inputs())
        .all(|value| has_float_type(graph, *value))
}

/// Whether the first output lives on an accelerator. Untyped outputs are not on a device.
pub fn is_cuda(graph: &Graph, node: NodeId) -> bool {
    graph
        .node(node)
        .outputs()
        .first()
        .and_then(|value| graph.value_type(*value))
        .map(|ty| ty.device.is_accelerator())
        .unwrap_or(false)
}

pub fn is_fusable(graph: &Graph, node: NodeId) -> bool {
    if graph.kind(node) == NodeKind::FusionGroup {
        return true;
    }
    is_simple_map(graph, node) && all_float_io(graph, node) && is_cuda(graph, node)
}

/// Whether `node` may produce an output of a fusion group.
///
/// Besides fusable nodes this admits `cat` on the accelerator when all of its inputs share
/// the same sizes, so the concatenated pieces can still be computed by a single map.
pub fn is_fusable_as_exit_node(graph: &Graph, node: NodeId) -> bool {
    if is_fusable(graph, node) {
        return true;
    }
    if graph.kind(node) != NodeKind::Cat || !is_cuda(graph, node) {
        return false;
    }
    let inputs = graph.node(node).inputs();
    let Some(first) = inputs.first() else {
        return false;
    };
    let Some(reference) = graph.value_type(*first) else {
        return false;
    };
    inputs.iter().all(|input| {
        graph
            .value_type(*input)
            .map(|ty| ty.sizes == reference.sizes)
            .unwrap_or(false)
    })
}
