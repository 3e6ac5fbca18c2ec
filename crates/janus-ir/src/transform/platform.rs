//! Per-tenancy platform lowering stubs.
//!
//! Each instance raises the level of every node of one tenancy to `Low`,
//! reserving room for future hardware-specific rewrites. No opcode
//! changes happen here yet.

use crate::graph::Graph;
use crate::transform::Pass;
use crate::types::{Level, Tenancy};

pub struct PlatformLowering {
    tenancy: Tenancy,
}

impl PlatformLowering {
    pub fn new(tenancy: Tenancy) -> Self {
        PlatformLowering { tenancy }
    }
}

impl Pass for PlatformLowering {
    fn name(&self) -> &'static str {
        match self.tenancy {
            Tenancy::CpuSerial => "platform-lowering-cpu-serial",
            Tenancy::CpuParallel => "platform-lowering-cpu-parallel",
            Tenancy::NpuTensor => "platform-lowering-npu",
            Tenancy::QpuQuantum => "platform-lowering-qpu",
        }
    }

    fn run(&self, graph: &mut Graph) -> bool {
        let targets: Vec<_> = graph
            .nodes()
            .iter()
            .filter(|n| n.tenancy == self.tenancy && n.level != Level::Low)
            .map(|n| n.id)
            .collect();
        let changed = !targets.is_empty();
        for id in targets {
            if graph.set_level(id, Level::Low).is_err() {
                break;
            }
        }
        changed
    }
}
