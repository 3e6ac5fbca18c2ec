//! Structural and semantic graph validation.
//!
//! [`validate`] is a pure analysis: it never mutates the graph and never
//! fails -- every finding becomes a [`Diagnostic`] in registration order,
//! so output is deterministic. Callers decide what to do with warnings;
//! the core never promotes them to errors.
//!
//! Checks, in order:
//! 1. edge well-formedness (dangling inputs) and cross-tenancy edges;
//! 2. acyclicity via three-color DFS, whitelisting back-edges into `Phi`;
//! 3. `Phi` arity;
//! 4. tensor shape laws;
//! 5. quantum metadata presence, gate arity, and parameter sanity;
//! 6. opcode/tenancy family consistency.
//!
//! The whole procedure is O(V+E).

use serde::{Deserialize, Serialize};

use crate::graph::Graph;
use crate::id::NodeId;
use crate::node::Node;
use crate::ops::Opcode;

/// Qubit indices above this bound are almost certainly a lowering bug and
/// draw a warning.
const QUBIT_SANITY_BOUND: usize = 64;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// The node the finding is anchored on.
    pub node: NodeId,
    /// A second involved node, e.g. the other end of a mismatched edge.
    pub related: Option<NodeId>,
    pub message: String,
}

/// Ordered diagnostic list produced by [`validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    /// Returns `true` if any diagnostic is an error.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Errors only, in registration order.
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    /// Warnings only, in registration order.
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    fn error(&mut self, node: NodeId, related: Option<NodeId>, message: String) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            node,
            related,
            message,
        });
    }

    fn warning(&mut self, node: NodeId, related: Option<NodeId>, message: String) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            node,
            related,
            message,
        });
    }
}

/// Validates a graph, returning the ordered diagnostic list.
pub fn validate(graph: &Graph) -> ValidationReport {
    let mut report = ValidationReport::default();

    check_edges(graph, &mut report);
    check_cycles(graph, &mut report);
    check_phi_arity(graph, &mut report);
    check_tensor_shapes(graph, &mut report);
    check_quantum(graph, &mut report);
    check_tenancy_families(graph, &mut report);

    report
}

// ---------------------------------------------------------------------------
// 1. Edge well-formedness + cross-tenancy edges
// ---------------------------------------------------------------------------

fn check_edges(graph: &Graph, report: &mut ValidationReport) {
    let count = graph.node_count() as u32;
    for node in graph.nodes() {
        for &input in &node.inputs {
            if input.0 >= count {
                report.error(
                    node.id,
                    None,
                    format!("dangling edge: input {} is out of range", input),
                );
                continue;
            }
            let producer = &graph.nodes()[input.index()];
            if producer.tenancy != node.tenancy {
                report.warning(
                    node.id,
                    Some(input),
                    format!(
                        "tenancy mismatch: node {} is {:?} but input {} is {:?}",
                        node.id, node.tenancy, input, producer.tenancy
                    ),
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Acyclicity (three-color DFS)
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Grey,
    Black,
}

fn check_cycles(graph: &Graph, report: &mut ValidationReport) {
    let count = graph.node_count();
    let mut color = vec![Color::White; count];

    for id in graph.node_ids() {
        if color[id.index()] == Color::White {
            dfs(graph, id, &mut color, report);
        }
    }
}

/// Iterative DFS over the use edges (consumer -> producer). A grey-to-grey
/// edge is a cycle. Back-edges into a `Phi` -- inputs whose id is strictly
/// greater than the phi's own id -- are whitelisted; they are the loop
/// construct, not a defect.
fn dfs(graph: &Graph, start: NodeId, color: &mut [Color], report: &mut ValidationReport) {
    // Stack entries are (node, next input position to visit).
    let mut stack: Vec<(NodeId, usize)> = vec![(start, 0)];
    color[start.index()] = Color::Grey;

    while let Some(frame) = stack.last_mut() {
        let (node_id, pos) = *frame;
        let node = &graph.nodes()[node_id.index()];
        if pos >= node.inputs.len() {
            color[node_id.index()] = Color::Black;
            stack.pop();
            continue;
        }
        frame.1 += 1;
        let input = node.inputs[pos];

        // Dangling inputs were already reported in the edge check.
        if input.index() >= graph.node_count() {
            continue;
        }
        // Whitelisted loop back-edge into a Phi.
        if node.op == Opcode::Phi && input > node_id {
            continue;
        }

        match color[input.index()] {
            Color::White => {
                color[input.index()] = Color::Grey;
                stack.push((input, 0));
            }
            Color::Grey => {
                report.error(node_id, Some(input), "Cycle detected".into());
            }
            Color::Black => {}
        }
    }
}

// ---------------------------------------------------------------------------
// 3. Phi arity
// ---------------------------------------------------------------------------

fn check_phi_arity(graph: &Graph, report: &mut ValidationReport) {
    for node in graph.nodes() {
        if node.op == Opcode::Phi && node.inputs.len() < 2 {
            report.error(
                node.id,
                None,
                format!("Phi requires at least 2 inputs, has {}", node.inputs.len()),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// 4. Tensor shape laws
// ---------------------------------------------------------------------------

fn check_tensor_shapes(graph: &Graph, report: &mut ValidationReport) {
    for node in graph.nodes() {
        let law = match node.op {
            Opcode::TensorMatmul | Opcode::TensorFusedMatmulRelu | Opcode::TensorFusedMatmulAdd => {
                ShapeLaw::Matmul
            }
            Opcode::TensorContract => ShapeLaw::Contract,
            Opcode::TensorScalarMul => ShapeLaw::ScalarMul,
            _ => continue,
        };
        if node.inputs.len() < 2 {
            continue;
        }
        let lhs = resolve(graph, node.inputs[0]);
        let rhs = resolve(graph, node.inputs[1]);
        let (Some(lhs), Some(rhs)) = (lhs, rhs) else {
            continue;
        };

        let (Some(a), Some(b)) = (&lhs.tensor, &rhs.tensor) else {
            report.warning(
                node.id,
                None,
                "tensor op operand is missing tensor metadata".into(),
            );
            continue;
        };

        match law {
            ShapeLaw::Matmul => {
                if a.rank() >= 2 && b.rank() >= 2 && a.shape[a.rank() - 1] != b.shape[0] {
                    report.error(
                        node.id,
                        Some(lhs.id),
                        format!(
                            "matmul shape mismatch: inner dims of {:?} and {:?} differ",
                            a.shape, b.shape
                        ),
                    );
                }
            }
            ShapeLaw::Contract => {
                if a.rank() == 0 || b.rank() == 0 {
                    report.error(
                        node.id,
                        Some(lhs.id),
                        format!(
                            "contract requires ranked operands, got {:?} and {:?}",
                            a.shape, b.shape
                        ),
                    );
                } else if a.shape[a.rank() - 1] != b.shape[0] {
                    report.error(
                        node.id,
                        Some(lhs.id),
                        format!(
                            "contract shape mismatch: {:?} does not contract with {:?}",
                            a.shape, b.shape
                        ),
                    );
                }
            }
            ShapeLaw::ScalarMul => {
                if a.rank() != 0 && b.rank() != 0 {
                    report.error(
                        node.id,
                        Some(lhs.id),
                        format!(
                            "scalar-mul requires one 0-rank operand, got {:?} and {:?}",
                            a.shape, b.shape
                        ),
                    );
                }
            }
        }
    }
}

enum ShapeLaw {
    Matmul,
    Contract,
    ScalarMul,
}

fn resolve(graph: &Graph, id: NodeId) -> Option<&Node> {
    graph.node(id)
}

// ---------------------------------------------------------------------------
// 5. Quantum metadata, gate arity, parameters
// ---------------------------------------------------------------------------

fn check_quantum(graph: &Graph, report: &mut ValidationReport) {
    for node in graph.nodes() {
        if !node.op.is_quantum() {
            continue;
        }
        let Some(meta) = &node.quantum else {
            report.error(node.id, None, "quantum op is missing quantum metadata".into());
            continue;
        };

        match node.op {
            Opcode::QuantumGate => {
                let expected = meta.gate.qubit_arity();
                if meta.qubits.len() != expected {
                    report.error(
                        node.id,
                        None,
                        format!(
                            "{:?} expects {} qubit(s), got {}",
                            meta.gate,
                            expected,
                            meta.qubits.len()
                        ),
                    );
                } else if expected > 1 && !all_distinct(&meta.qubits) {
                    report.error(
                        node.id,
                        None,
                        format!("{:?} requires distinct qubits, got {:?}", meta.gate, meta.qubits),
                    );
                }
                if meta.gate.is_rotation() && meta.parameters.len() != 1 {
                    report.error(
                        node.id,
                        None,
                        format!(
                            "{:?} requires exactly one parameter, got {}",
                            meta.gate,
                            meta.parameters.len()
                        ),
                    );
                }
            }
            Opcode::QuantumMeasure => {
                if meta.qubits.is_empty() {
                    report.error(node.id, None, "measurement names no qubit".into());
                }
            }
            _ => {}
        }

        for &q in &meta.qubits {
            if q > QUBIT_SANITY_BOUND {
                report.warning(
                    node.id,
                    None,
                    format!("qubit index {} exceeds sanity bound {}", q, QUBIT_SANITY_BOUND),
                );
            }
        }
        for &p in &meta.parameters {
            if !p.is_finite() {
                report.error(node.id, None, format!("non-finite gate parameter {}", p));
            }
        }
    }
}

fn all_distinct(qubits: &[usize]) -> bool {
    for (i, a) in qubits.iter().enumerate() {
        if qubits[i + 1..].contains(a) {
            return false;
        }
    }
    true
}

// ---------------------------------------------------------------------------
// 6. Opcode/tenancy family consistency
// ---------------------------------------------------------------------------

fn check_tenancy_families(graph: &Graph, report: &mut ValidationReport) {
    use crate::types::Tenancy;
    for node in graph.nodes() {
        if node.op.is_tensor() && node.tenancy != Tenancy::NpuTensor {
            report.warning(
                node.id,
                None,
                format!("{:?} node carries non-tensor tenancy {:?}", node.op, node.tenancy),
            );
        }
        if node.op.is_quantum() && node.tenancy != Tenancy::QpuQuantum {
            report.warning(
                node.id,
                None,
                format!("{:?} node carries non-quantum tenancy {:?}", node.op, node.tenancy),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::GateKind;
    use crate::types::{DataValue, Dtype, QuantumMeta, Tenancy, TensorMeta};
    use smallvec::smallvec;

    #[test]
    fn clean_straight_line_graph_has_no_diagnostics() {
        let mut g = Graph::new("main");
        let a = g.create_constant(DataValue::Integer(1));
        let b = g.create_constant(DataValue::Integer(2));
        let sum = g.create_node_with_inputs(Opcode::Add, &[a, b]);
        g.create_return(sum);

        let report = validate(&g);
        assert!(!report.has_errors());
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn dangling_edge_is_an_error() {
        let mut g = Graph::new("main");
        let a = g.create_constant(DataValue::Integer(1));
        let add = g.create_node_with_inputs(Opcode::Add, &[a, NodeId(99)]);

        let report = validate(&g);
        assert!(report.has_errors());
        let err = report.errors().next().unwrap();
        assert_eq!(err.node, add);
        assert!(err.message.contains("dangling"));
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let mut g = Graph::new("main");
        let a = g.create_node(Opcode::Add);
        g.set_inputs(a, smallvec![a]).unwrap();

        let report = validate(&g);
        let cycles: Vec<_> = report
            .errors()
            .filter(|d| d.message == "Cycle detected")
            .collect();
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn hand_built_cycle_yields_exactly_one_error() {
        // a -> b -> c -> a through non-Phi nodes.
        let mut g = Graph::new("main");
        let a = g.create_node(Opcode::Add);
        let b = g.create_node_with_inputs(Opcode::Mul, &[a]);
        let c = g.create_node_with_inputs(Opcode::Sub, &[b]);
        g.push_input(a, c).unwrap();

        let report = validate(&g);
        let cycles: Vec<_> = report
            .errors()
            .filter(|d| d.message == "Cycle detected")
            .collect();
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn phi_back_edge_is_not_a_cycle() {
        // Loop header phi: phi(init, next) where next = phi + 1.
        let mut g = Graph::new("loop");
        let init = g.create_constant(DataValue::Integer(0));
        let phi = g.create_node_with_inputs(Opcode::Phi, &[init]);
        let one = g.create_constant(DataValue::Integer(1));
        let next = g.create_node_with_inputs(Opcode::Add, &[phi, one]);
        g.push_input(phi, next).unwrap();
        g.create_return(phi);

        let report = validate(&g);
        assert!(!report.has_errors(), "{:?}", report.diagnostics);
    }

    #[test]
    fn acyclic_graph_without_branch_or_phi_reports_zero_errors() {
        let mut g = Graph::new("main");
        let mut prev = g.create_constant(DataValue::Integer(0));
        for i in 1..20 {
            let c = g.create_constant(DataValue::Integer(i));
            prev = g.create_node_with_inputs(Opcode::Add, &[prev, c]);
        }
        g.create_return(prev);

        let report = validate(&g);
        assert!(!report.has_errors());
    }

    #[test]
    fn single_input_phi_is_an_error() {
        let mut g = Graph::new("main");
        let a = g.create_constant(DataValue::Integer(1));
        let phi = g.create_node_with_inputs(Opcode::Phi, &[a]);

        let report = validate(&g);
        assert!(report.has_errors());
        assert!(report.errors().any(|d| d.node == phi && d.message.contains("Phi")));
    }

    #[test]
    fn tenancy_mismatch_is_a_warning_not_an_error() {
        let mut g = Graph::new("main");
        let a = g.create_constant(DataValue::Integer(1));
        g.set_current_tenancy(Tenancy::NpuTensor);
        let relu = g.create_node_with_inputs(Opcode::TensorRelu, &[a]);
        let _ = relu;

        let report = validate(&g);
        assert!(!report.has_errors());
        assert!(report.warnings().any(|d| d.message.contains("tenancy mismatch")));
    }

    #[test]
    fn matmul_inner_dim_mismatch_names_both_shapes() {
        let mut g = Graph::new("k");
        g.set_current_tenancy(Tenancy::NpuTensor);
        let a = g.create_node(Opcode::Constant);
        g.set_tensor_meta(a, TensorMeta::row_major(vec![2, 3], Dtype::F32))
            .unwrap();
        let b = g.create_node(Opcode::Constant);
        g.set_tensor_meta(b, TensorMeta::row_major(vec![4, 5], Dtype::F32))
            .unwrap();
        let mm = g.create_node_with_inputs(Opcode::TensorMatmul, &[a, b]);

        let report = validate(&g);
        assert!(report.has_errors());
        let err = report.errors().next().unwrap();
        assert_eq!(err.node, mm);
        assert!(err.message.contains("[2, 3]"));
        assert!(err.message.contains("[4, 5]"));
    }

    #[test]
    fn matmul_with_matching_inner_dims_is_clean() {
        let mut g = Graph::new("k");
        g.set_current_tenancy(Tenancy::NpuTensor);
        let a = g.create_node(Opcode::Constant);
        g.set_tensor_meta(a, TensorMeta::row_major(vec![2, 3], Dtype::F32))
            .unwrap();
        let b = g.create_node(Opcode::Constant);
        g.set_tensor_meta(b, TensorMeta::row_major(vec![3, 5], Dtype::F32))
            .unwrap();
        g.create_node_with_inputs(Opcode::TensorMatmul, &[a, b]);

        let report = validate(&g);
        assert!(!report.has_errors(), "{:?}", report.diagnostics);
    }

    #[test]
    fn matmul_missing_metadata_is_a_warning() {
        let mut g = Graph::new("k");
        g.set_current_tenancy(Tenancy::NpuTensor);
        let a = g.create_node(Opcode::Constant);
        let b = g.create_node(Opcode::Constant);
        g.create_node_with_inputs(Opcode::TensorMatmul, &[a, b]);

        let report = validate(&g);
        assert!(!report.has_errors());
        assert!(report
            .warnings()
            .any(|d| d.message.contains("missing tensor metadata")));
    }

    #[test]
    fn scalar_mul_requires_a_scalar_operand() {
        let mut g = Graph::new("k");
        g.set_current_tenancy(Tenancy::NpuTensor);
        let a = g.create_node(Opcode::Constant);
        g.set_tensor_meta(a, TensorMeta::row_major(vec![2, 2], Dtype::F32))
            .unwrap();
        let b = g.create_node(Opcode::Constant);
        g.set_tensor_meta(b, TensorMeta::row_major(vec![2, 2], Dtype::F32))
            .unwrap();
        g.create_node_with_inputs(Opcode::TensorScalarMul, &[a, b]);

        assert!(validate(&g).has_errors());

        // One 0-rank operand makes it legal.
        let mut g2 = Graph::new("k");
        g2.set_current_tenancy(Tenancy::NpuTensor);
        let s = g2.create_node(Opcode::Constant);
        g2.set_tensor_meta(s, TensorMeta::row_major(vec![], Dtype::F32))
            .unwrap();
        let m = g2.create_node(Opcode::Constant);
        g2.set_tensor_meta(m, TensorMeta::row_major(vec![2, 2], Dtype::F32))
            .unwrap();
        g2.create_node_with_inputs(Opcode::TensorScalarMul, &[s, m]);
        assert!(!validate(&g2).has_errors());
    }

    #[test]
    fn quantum_gate_without_metadata_is_an_error() {
        let mut g = Graph::new("q");
        g.set_current_tenancy(Tenancy::QpuQuantum);
        g.create_node(Opcode::QuantumGate);

        let report = validate(&g);
        assert!(report.has_errors());
        assert!(report
            .errors()
            .any(|d| d.message.contains("missing quantum metadata")));
    }

    #[test]
    fn cnot_requires_two_distinct_qubits() {
        let mut g = Graph::new("q");
        g.set_current_tenancy(Tenancy::QpuQuantum);
        let gate = g.create_node(Opcode::QuantumGate);
        g.set_quantum_meta(gate, QuantumMeta::gate(GateKind::Cnot, vec![1, 1]))
            .unwrap();

        let report = validate(&g);
        assert!(report.has_errors());
        assert!(report.errors().any(|d| d.message.contains("distinct")));
    }

    #[test]
    fn toffoli_arity_is_three() {
        let mut g = Graph::new("q");
        g.set_current_tenancy(Tenancy::QpuQuantum);
        let gate = g.create_node(Opcode::QuantumGate);
        g.set_quantum_meta(gate, QuantumMeta::gate(GateKind::Toffoli, vec![0, 1]))
            .unwrap();

        let report = validate(&g);
        assert!(report.has_errors());
        assert!(report.errors().any(|d| d.message.contains("3 qubit")));
    }

    #[test]
    fn rotation_gate_requires_one_finite_parameter() {
        let mut g = Graph::new("q");
        g.set_current_tenancy(Tenancy::QpuQuantum);
        let missing = g.create_node(Opcode::QuantumGate);
        g.set_quantum_meta(missing, QuantumMeta::gate(GateKind::Rx, vec![0]))
            .unwrap();
        let nan = g.create_node(Opcode::QuantumGate);
        g.set_quantum_meta(nan, QuantumMeta::rotation(GateKind::Rz, 1, f64::NAN))
            .unwrap();

        let report = validate(&g);
        let errs: Vec<_> = report.errors().collect();
        assert!(errs.iter().any(|d| d.node == missing));
        assert!(errs
            .iter()
            .any(|d| d.node == nan && d.message.contains("non-finite")));
    }

    #[test]
    fn absurd_qubit_index_is_a_warning() {
        let mut g = Graph::new("q");
        g.set_current_tenancy(Tenancy::QpuQuantum);
        let gate = g.create_node(Opcode::QuantumGate);
        g.set_quantum_meta(gate, QuantumMeta::gate(GateKind::Hadamard, vec![4096]))
            .unwrap();

        let report = validate(&g);
        assert!(!report.has_errors());
        assert!(report.warnings().any(|d| d.message.contains("4096")));
    }

    #[test]
    fn tensor_op_off_npu_is_a_warning() {
        let mut g = Graph::new("main");
        let a = g.create_node(Opcode::Constant);
        g.create_node_with_inputs(Opcode::TensorRelu, &[a]);

        let report = validate(&g);
        assert!(!report.has_errors());
        assert!(report
            .warnings()
            .any(|d| d.message.contains("non-tensor tenancy")));
    }

    #[test]
    fn diagnostics_preserve_registration_order() {
        let mut g = Graph::new("main");
        // Dangling edge (check 1) then a bad phi (check 3): the dangling
        // report must come first.
        let a = g.create_constant(DataValue::Integer(1));
        g.create_node_with_inputs(Opcode::Add, &[NodeId(50)]);
        g.create_node_with_inputs(Opcode::Phi, &[a]);

        let report = validate(&g);
        let errs: Vec<_> = report.errors().collect();
        assert_eq!(errs.len(), 2);
        assert!(errs[0].message.contains("dangling"));
        assert!(errs[1].message.contains("Phi"));
    }
}
