mod graph_fusion;

pub use graph_fusion::GraphFusionPass;
