//! Pass infrastructure shared by graph rewrites.

use crate::env;
use crate::ir::Graph;

/// Result returned by a [`GraphPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the graph.
    pub changed: bool,
    /// Number of full scans executed before reaching a fixed point.
    pub iterations: usize,
    /// Fusions and group merges performed.
    pub rewrites_applied: usize,
    /// Splits pushed above their producers.
    pub chunks_distributed: usize,
    /// Nodes destroyed after being absorbed or replaced.
    pub erased_nodes: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            chunks_distributed: self.chunks_distributed + other.chunks_distributed,
            erased_nodes: self.erased_nodes + other.erased_nodes,
        }
    }
}

/// Interface implemented by passes that rewrite a whole graph in place.
pub trait GraphPass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, graph: &mut Graph) -> PassResult;
}

/// Knobs of the fusion driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuserConfig {
    /// Upper bound on full scans; the driver normally stops at the first scan without
    /// mutations.
    pub max_passes: usize,
    /// Run the structural verifier after every scan and panic on failure.
    pub verify_each_pass: bool,
}

impl Default for FuserConfig {
    fn default() -> Self {
        Self {
            max_passes: usize::MAX,
            verify_each_pass: false,
        }
    }
}

impl FuserConfig {
    /// Reads `GRAPH_FUSER_MAX_PASSES` and `GRAPH_FUSER_VERIFY` once per process.
    pub fn from_env() -> Self {
        Self {
            max_passes: env::max_passes().unwrap_or(usize::MAX),
            verify_each_pass: env::verify_enabled(),
        }
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    pub fn with_verify_each_pass(mut self, verify: bool) -> Self {
        self.verify_each_pass = verify;
        self
    }
}
