//! Quantum gate cancellation.
//!
//! Two adjacent applications of a self-inverse gate (Hadamard, Pauli
//! X/Y/Z) on the same qubit are the identity. When a `QuantumGate` of such
//! a kind has a single consumer that is another `QuantumGate` of the same
//! kind targeting the same qubits, every consumer of the second gate is
//! rewired to the first gate's state input, bypassing both. Only applies
//! within `QPU_Quantum` tenancy; the dead pair stays in the node table.

use crate::graph::Graph;
use crate::id::NodeId;
use crate::ops::Opcode;
use crate::transform::Pass;
use crate::types::Tenancy;

pub struct GateCancellation;

impl Pass for GateCancellation {
    fn name(&self) -> &'static str {
        "quantum-gate-cancellation"
    }

    fn run(&self, graph: &mut Graph) -> bool {
        let mut changed = false;
        // Cancelling one pair can make another pair adjacent, so iterate
        // to a fixpoint; a rerun of the whole pass then finds nothing.
        loop {
            let Some((first, second)) = find_cancelling_pair(graph) else {
                break;
            };
            let bypass = graph.nodes()[first.index()].inputs[0];
            let consumers: Vec<NodeId> = graph
                .nodes()
                .iter()
                .filter(|n| n.inputs.contains(&second))
                .map(|n| n.id)
                .collect();
            for consumer in consumers {
                let mut inputs = graph.nodes()[consumer.index()].inputs.clone();
                for slot in inputs.iter_mut() {
                    if *slot == second {
                        *slot = bypass;
                    }
                }
                // The consumer id came from this graph's own table.
                if graph.set_inputs(consumer, inputs).is_err() {
                    return changed;
                }
            }
            changed = true;
        }
        changed
    }
}

/// Finds `(first, second)` where `second` is the sole consumer of `first`,
/// both are self-inverse `QuantumGate`s of the same kind on the same
/// qubits, and `first` has a state input to bypass to.
fn find_cancelling_pair(graph: &Graph) -> Option<(NodeId, NodeId)> {
    for node in graph.nodes() {
        if node.op != Opcode::QuantumGate || node.tenancy != Tenancy::QpuQuantum {
            continue;
        }
        if node.inputs.is_empty() {
            continue;
        }
        let Some(meta) = &node.quantum else {
            continue;
        };
        if !meta.gate.is_self_inverse() {
            continue;
        }
        let Some(consumer_id) = graph.sole_consumer(node.id) else {
            continue;
        };
        let consumer = &graph.nodes()[consumer_id.index()];
        if consumer.op != Opcode::QuantumGate || consumer.tenancy != Tenancy::QpuQuantum {
            continue;
        }
        let Some(consumer_meta) = &consumer.quantum else {
            continue;
        };
        if consumer_meta.gate == meta.gate && consumer_meta.qubits == meta.qubits {
            // The second gate must have downstream consumers to rewire,
            // otherwise the rewrite is a no-op and would loop forever.
            if graph.nodes().iter().any(|n| n.inputs.contains(&consumer_id)) {
                return Some((node.id, consumer_id));
            }
        }
    }
    None
}
