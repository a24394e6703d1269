//! Elementwise operator fusion for tensor dataflow graphs.
//!
//! The crate ships a small arena-based graph IR ([`ir`]) and a pass that merges chains of
//! elementwise accelerator ops into fusion-group nodes, each owning the subgraph a kernel
//! generator would compile into a single kernel.
//!
//! ```
//! use graph_fuser::ir::parse_graph;
//!
//! let mut graph = parse_graph(r#"
//! graph(%a: f32[8]@cuda:0, %b: f32[8]@cuda:0, %c: f32[8]@cuda:0) {
//!   %t1 = add(%a, %b) : f32[8]@cuda:0
//!   %t2 = mul(%t1, %c) : f32[8]@cuda:0
//!   return(%t2)
//! }
//! "#).expect("valid graph");
//!
//! let result = graph_fuser::fuse_graph(&mut graph);
//! assert!(result.changed);
//! assert_eq!(graph.len(), 1);
//! ```

mod env;
pub mod fusion;
pub mod ir;
pub mod optimizer;
pub mod passes;

pub use fusion::GraphFuser;
pub use ir::{verify, Graph, GraphError, TextIrError};
pub use optimizer::{FuserConfig, GraphPass, PassResult};
pub use passes::GraphFusionPass;

/// Runs the fusion pass on `graph` with the configuration taken from the environment.
pub fn fuse_graph(graph: &mut Graph) -> PassResult {
    GraphFusionPass::new(FuserConfig::from_env()).run(graph)
}
