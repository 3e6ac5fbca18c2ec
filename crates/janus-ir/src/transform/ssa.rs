//! SSA conversion skeleton.
//!
//! Normalizes every node to the `Mid` abstraction level and inserts `Phi`
//! nodes at detected merge points. Detection is a heuristic, not a
//! dominator analysis: branch arms are scanned for stores to a common
//! `Alloca` slot, and loop back-edges are scanned for the load/add/store
//! update pattern. [`verify_mid_level`] is the follow-up check.

use std::collections::HashMap;

use crate::graph::Graph;
use crate::id::NodeId;
use crate::ops::Opcode;
use crate::transform::Pass;
use crate::types::Level;
use crate::validate::{Diagnostic, Severity, ValidationReport};

pub struct SsaConversion;

impl Pass for SsaConversion {
    fn name(&self) -> &'static str {
        "ssa-conversion"
    }

    fn run(&self, graph: &mut Graph) -> bool {
        let mut changed = insert_branch_merge_phis(graph);
        changed |= insert_loop_header_phis(graph);

        for id in graph.node_ids().collect::<Vec<_>>() {
            if graph.nodes()[id.index()].level != Level::Mid {
                // Id came from the graph's own table.
                if graph.set_level(id, Level::Mid).is_err() {
                    break;
                }
                changed = true;
            }
        }
        changed
    }
}

/// Follow-up validation: every node at `Mid` level and every `Phi` with at
/// least two inputs.
pub fn verify_mid_level(graph: &Graph) -> ValidationReport {
    let mut report = ValidationReport::default();
    for node in graph.nodes() {
        if node.level != Level::Mid {
            report.diagnostics.push(Diagnostic {
                severity: Severity::Error,
                node: node.id,
                related: None,
                message: format!("node is at {:?} level after SSA conversion", node.level),
            });
        }
        if node.op == Opcode::Phi && node.inputs.len() < 2 {
            report.diagnostics.push(Diagnostic {
                severity: Severity::Error,
                node: node.id,
                related: None,
                message: format!("Phi requires at least 2 inputs, has {}", node.inputs.len()),
            });
        }
    }
    report
}

// ---------------------------------------------------------------------------
// Branch-successor store scan
// ---------------------------------------------------------------------------

/// For each `Branch`, scans both arm regions for `Store`s to a common
/// `Alloca` slot and appends a merge `Phi` over the two stored values.
fn insert_branch_merge_phis(graph: &mut Graph) -> bool {
    let mut pending: Vec<(NodeId, NodeId)> = Vec::new();

    for node in graph.nodes() {
        if node.op != Opcode::Branch || node.inputs.len() < 3 {
            continue;
        }
        let then_stores = region_stores(graph, node.inputs[1]);
        let else_stores = region_stores(graph, node.inputs[2]);
        for (slot, then_val) in &then_stores {
            if let Some(else_val) = else_stores.get(slot) {
                if !has_phi_over(graph, *then_val, *else_val) {
                    pending.push((*then_val, *else_val));
                }
            }
        }
    }

    let changed = !pending.is_empty();
    for (a, b) in pending {
        graph.create_node_with_inputs(Opcode::Phi, &[a, b]);
    }
    changed
}

/// Stores in the straight-line region following a label, keyed by the
/// `Alloca` slot they write. The region ends at the next label or
/// terminator.
fn region_stores(graph: &Graph, label: NodeId) -> HashMap<NodeId, NodeId> {
    let mut stores = HashMap::new();
    let Some(label_node) = graph.node(label) else {
        return stores;
    };
    if label_node.op != Opcode::Label {
        return stores;
    }
    for node in &graph.nodes()[label.index() + 1..] {
        if node.op == Opcode::Label || node.op.is_terminator() {
            break;
        }
        if node.op == Opcode::Store && node.inputs.len() == 2 {
            let slot = node.inputs[0];
            if graph.node(slot).map(|n| n.op) == Some(Opcode::Alloca) {
                stores.insert(slot, node.inputs[1]);
            }
        }
    }
    stores
}

// ---------------------------------------------------------------------------
// Loop-header Add update pattern
// ---------------------------------------------------------------------------

/// For each back-edge `Jump` (target label id below the jump id), scans
/// the loop region for the load/add/store pattern against one slot and
/// appends a header `Phi` over the loaded and updated values.
fn insert_loop_header_phis(graph: &mut Graph) -> bool {
    let mut pending: Vec<(NodeId, NodeId)> = Vec::new();

    for node in graph.nodes() {
        if node.op != Opcode::Jump || node.inputs.len() != 1 {
            continue;
        }
        let header = node.inputs[0];
        if header >= node.id {
            continue; // forward jump, not a back-edge
        }
        if graph.node(header).map(|n| n.op) != Some(Opcode::Label) {
            continue;
        }

        // Region between the header label and the back-edge jump.
        let region = &graph.nodes()[header.index() + 1..node.id.index()];
        for add in region.iter().filter(|n| n.op == Opcode::Add) {
            let Some(load_id) = add.inputs.first().copied() else {
                continue;
            };
            let load = match graph.node(load_id) {
                Some(n) if n.op == Opcode::Load && n.inputs.len() == 1 => n,
                _ => continue,
            };
            let slot = load.inputs[0];
            let stored_back = region.iter().any(|n| {
                n.op == Opcode::Store && n.inputs.as_slice() == [slot, add.id]
            });
            if stored_back && !has_phi_over(graph, load_id, add.id) {
                pending.push((load_id, add.id));
            }
        }
    }

    let changed = !pending.is_empty();
    for (a, b) in pending {
        graph.create_node_with_inputs(Opcode::Phi, &[a, b]);
    }
    changed
}

fn has_phi_over(graph: &Graph, a: NodeId, b: NodeId) -> bool {
    graph
        .nodes()
        .iter()
        .any(|n| n.op == Opcode::Phi && n.inputs.as_slice() == [a, b])
}
