//! Opcode-level rewrite passes.
//!
//! Every pass implements the uniform [`Pass`] contract and is run through a
//! [`PassManager`] in registration order. Passes mutate graphs in place --
//! they may rewrite opcodes, rewire edges, or append new nodes, but never
//! remove nodes.

mod platform;
mod quantum;
mod ssa;
mod tensor;

pub use platform::PlatformLowering;
pub use quantum::GateCancellation;
pub use ssa::{verify_mid_level, SsaConversion};
pub use tensor::MatmulReluFusion;

use crate::graph::Graph;

/// An in-place graph rewrite.
pub trait Pass {
    /// Human-readable pass name, used for logging.
    fn name(&self) -> &'static str;

    /// Applies the pass, returning `true` if the graph changed.
    fn run(&self, graph: &mut Graph) -> bool;
}

/// Runs registered passes in order.
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    pub fn new() -> Self {
        PassManager::default()
    }

    /// Appends a pass to the run order.
    pub fn register(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Runs every pass once, in registration order. Returns how many
    /// passes reported a change.
    pub fn run_all(&self, graph: &mut Graph) -> usize {
        let mut changed = 0;
        for pass in &self.passes {
            let did_change = pass.run(graph);
            tracing::debug!(
                pass = pass.name(),
                graph = %graph.function_name,
                changed = did_change,
                "pass applied"
            );
            if did_change {
                changed += 1;
            }
        }
        changed
    }
}
