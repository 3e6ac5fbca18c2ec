//! Matmul + ReLU fusion.
//!
//! A `TensorRelu` whose sole input is a `TensorMatmul` in the same
//! `NPU_Tensor` tenancy is rewritten in place to `TensorFusedMatmulRelu`,
//! inheriting the matmul's inputs and propagating tensor metadata. The
//! bypassed matmul stays in the table (dead if unused). Cross-tenancy
//! cases are skipped.

use crate::graph::Graph;
use crate::id::NodeId;
use crate::ops::Opcode;
use crate::transform::Pass;
use crate::types::Tenancy;

pub struct MatmulReluFusion;

impl Pass for MatmulReluFusion {
    fn name(&self) -> &'static str {
        "matmul-relu-fusion"
    }

    fn run(&self, graph: &mut Graph) -> bool {
        let candidates: Vec<(NodeId, NodeId)> = graph
            .nodes()
            .iter()
            .filter_map(|relu| {
                if relu.op != Opcode::TensorRelu || relu.tenancy != Tenancy::NpuTensor {
                    return None;
                }
                let &[matmul_id] = relu.inputs.as_slice() else {
                    return None;
                };
                let matmul = graph.node(matmul_id)?;
                if matmul.op == Opcode::TensorMatmul && matmul.tenancy == Tenancy::NpuTensor {
                    Some((relu.id, matmul_id))
                } else {
                    None
                }
            })
            .collect();

        let changed = !candidates.is_empty();
        for (relu_id, matmul_id) in candidates {
            let matmul_inputs = graph.nodes()[matmul_id.index()].inputs.clone();
            let matmul_meta = graph.nodes()[matmul_id.index()].tensor.clone();
            // Ids come from this graph's own table, so the rewrites cannot
            // fail; bail defensively rather than panic if they somehow do.
            let Ok(node) = graph.node_mut(relu_id) else {
                return changed;
            };
            node.op = Opcode::TensorFusedMatmulRelu;
            node.inputs = matmul_inputs;
            if node.tensor.is_none() {
                node.tensor = matmul_meta;
            }
        }
        changed
    }
}
