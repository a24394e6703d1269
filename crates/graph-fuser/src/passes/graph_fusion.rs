use crate::fusion::GraphFuser;
use crate::ir::Graph;
use crate::optimizer::{FuserConfig, GraphPass, PassResult};

/// Groups chains of elementwise accelerator ops into fusion-group nodes.
#[derive(Debug, Clone, Default)]
pub struct GraphFusionPass {
    config: FuserConfig,
}

impl GraphFusionPass {
    pub fn new(config: FuserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FuserConfig {
        &self.config
    }
}

impl GraphPass for GraphFusionPass {
    fn name(&self) -> &'static str {
        "graph_fusion"
    }

    fn run(&self, graph: &mut Graph) -> PassResult {
        GraphFuser::new(graph, self.config.clone()).run()
    }
}
