use std::collections::BTreeMap;
use std::fmt;

use smallvec::SmallVec;

use super::graph::Graph;
use super::types::TensorType;

/// Arena identifier of a node inside one [`Graph`]. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Arena identifier of a value inside one [`Graph`]. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Operation tag of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    And,
    Lshift,
    Or,
    Rshift,
    Xor,
    Abs,
    Acos,
    Add,
    Asin,
    Atan,
    Atan2,
    Ceil,
    Clamp,
    Cos,
    Cosh,
    Div,
    Eq,
    Exp,
    Floor,
    Fmod,
    Frac,
    Ge,
    Gt,
    Le,
    Lerp,
    Lgamma,
    Log,
    Log1p,
    Lt,
    Max,
    Min,
    Mul,
    Ne,
    Neg,
    Ones,
    Pow,
    Reciprocal,
    Remainder,
    Round,
    Rsqrt,
    Sigmoid,
    Sin,
    Sinh,
    Sqrt,
    Sub,
    Tan,
    Tanh,
    Trunc,
    Zeros,
    SigmoidBackward,
    TanhBackward,
    Split,
    Cat,
    Mm,
    Sum,
    Transpose,
    View,
    Constant,
    FusionGroup,
    Param,
    Return,
}

const KIND_NAMES: &[(NodeKind, &str)] = &[
    (NodeKind::And, "__and__"),
    (NodeKind::Lshift, "__lshift__"),
    (NodeKind::Or, "__or__"),
    (NodeKind::Rshift, "__rshift__"),
    (NodeKind::Xor, "__xor__"),
    (NodeKind::Abs, "abs"),
    (NodeKind::Acos, "acos"),
    (NodeKind::Add, "add"),
    (NodeKind::Asin, "asin"),
    (NodeKind::Atan, "atan"),
    (NodeKind::Atan2, "atan2"),
    (NodeKind::Ceil, "ceil"),
    (NodeKind::Clamp, "clamp"),
    (NodeKind::Cos, "cos"),
    (NodeKind::Cosh, "cosh"),
    (NodeKind::Div, "div"),
    (NodeKind::Eq, "eq"),
    (NodeKind::Exp, "exp"),
    (NodeKind::Floor, "floor"),
    (NodeKind::Fmod, "fmod"),
    (NodeKind::Frac, "frac"),
    (NodeKind::Ge, "ge"),
    (NodeKind::Gt, "gt"),
    (NodeKind::Le, "le"),
    (NodeKind::Lerp, "lerp"),
    (NodeKind::Lgamma, "lgamma"),
    (NodeKind::Log, "log"),
    (NodeKind::Log1p, "log1p"),
    (NodeKind::Lt, "lt"),
    (NodeKind::Max, "max"),
    (NodeKind::Min, "min"),
    (NodeKind::Mul, "mul"),
    (NodeKind::Ne, "ne"),
    (NodeKind::Neg, "neg"),
    (NodeKind::Ones, "ones"),
    (NodeKind::Pow, "pow"),
    (NodeKind::Reciprocal, "reciprocal"),
    (NodeKind::Remainder, "remainder"),
    (NodeKind::Round, "round"),
    (NodeKind::Rsqrt, "rsqrt"),
    (NodeKind::Sigmoid, "sigmoid"),
    (NodeKind::Sin, "sin"),
    (NodeKind::Sinh, "sinh"),
    (NodeKind::Sqrt, "sqrt"),
    (NodeKind::Sub, "sub"),
    (NodeKind::Tan, "tan"),
    (NodeKind::Tanh, "tanh"),
    (NodeKind::Trunc, "trunc"),
    (NodeKind::Zeros, "zeros"),
    (NodeKind::SigmoidBackward, "_sigmoid_backward"),
    (NodeKind::TanhBackward, "_tanh_backward"),
    (NodeKind::Split, "split"),
    (NodeKind::Cat, "cat"),
    (NodeKind::Mm, "mm"),
    (NodeKind::Sum, "sum"),
    (NodeKind::Transpose, "transpose"),
    (NodeKind::View, "view"),
    (NodeKind::Constant, "constant"),
    (NodeKind::FusionGroup, "FusionGroup"),
    (NodeKind::Param, "param"),
    (NodeKind::Return, "return"),
];

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        KIND_NAMES
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, name)| *name)
            .unwrap_or("<unknown>")
    }

    pub fn from_name(name: &str) -> Option<Self> {
        KIND_NAMES
            .iter()
            .find(|(_, candidate)| *candidate == name)
            .map(|(kind, _)| *kind)
    }

    /// Every kind, in declaration order.
    pub fn all() -> impl Iterator<Item = NodeKind> {
        KIND_NAMES.iter().map(|(kind, _)| *kind)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute payload attached to ordinary operators.
#[derive(Debug, Clone, PartialEq)]
pub enum Attr {
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Str(String),
}

pub type Attributes = BTreeMap<String, Attr>;

/// What a node carries besides its kind and edges.
#[derive(Debug, Clone)]
pub enum NodePayload {
    /// Ordinary operator; attributes travel with clones and chunk replicas.
    Op(Attributes),
    /// Fusion group owning the nested subgraph. Subgraph inputs and outputs line up
    /// position-for-position with the node's inputs and outputs.
    FusionGroup(Box<Graph>),
}

impl NodePayload {
    pub fn attrs(&self) -> Option<&Attributes> {
        match self {
            NodePayload::Op(attrs) => Some(attrs),
            NodePayload::FusionGroup(_) => None,
        }
    }
}

/// Edge from a value to one of its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Use {
    pub user: NodeId,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct Value {
    pub(crate) ty: Option<TensorType>,
    pub(crate) node: NodeId,
    pub(crate) offset: usize,
    pub(crate) uses: SmallVec<[Use; 4]>,
}

impl Value {
    pub fn ty(&self) -> Option<&TensorType> {
        self.ty.as_ref()
    }

    /// Producing node.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Output position on the producing node.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn uses(&self) -> &[Use] {
        &self.uses
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) payload: NodePayload,
    pub(crate) inputs: Vec<ValueId>,
    pub(crate) outputs: Vec<ValueId>,
    pub(crate) stage: usize,
    pub(crate) prev: Option<NodeId>,
    pub(crate) next: Option<NodeId>,
    pub(crate) linked: bool,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn payload(&self) -> &NodePayload {
        &self.payload
    }

    pub fn attrs(&self) -> Option<&Attributes> {
        self.payload.attrs()
    }

    pub fn attr_int(&self, name: &str) -> Option<i64> {
        match self.attrs()?.get(name)? {
            Attr::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    pub fn input(&self, index: usize) -> ValueId {
        self.inputs[index]
    }

    /// Single output of the node. Panics when the node has a different arity.
    pub fn output(&self) -> ValueId {
        assert_eq!(
            self.outputs.len(),
            1,
            "{} node expected to have exactly one output",
            self.kind
        );
        self.outputs[0]
    }

    pub fn stage(&self) -> usize {
        self.stage
    }

    pub fn is_fusion_group(&self) -> bool {
        self.kind == NodeKind::FusionGroup
    }

    /// Nested graph of a fusion group.
    pub fn subgraph(&self) -> Option<&Graph> {
        match &self.payload {
            NodePayload::FusionGroup(graph) => Some(graph),
            NodePayload::Op(_) => None,
        }
    }
}

/// Detached description of a node, used to recreate it in another graph.
#[derive(Debug, Clone)]
pub struct NodeTemplate {
    pub kind: NodeKind,
    pub payload: NodePayload,
    pub inputs: Vec<ValueId>,
    pub output_types: Vec<Option<TensorType>>,
}
