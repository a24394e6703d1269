//! Host graph IR the fusion pass runs against.
//!
//! Graphs own their nodes and values in arenas; body order is a linked list so the pass can
//! insert and remove nodes while walking backwards. Fusion groups own a nested [`Graph`].

pub mod graph;
pub mod node;
pub mod text;
pub mod types;
pub mod verify;

pub use graph::{Graph, NodeIter};
pub use node::{
    Attr, Attributes, Node, NodeId, NodeKind, NodePayload, NodeTemplate, Use, Value, ValueId,
};
pub use text::{parse_graph, parse_graph_with_symbols, ParsedGraph, TextIrError};
pub use types::{contiguous_strides, cpu_f32, cuda_f32, Device, ScalarType, TensorType};
pub use verify::{verify, GraphError};
