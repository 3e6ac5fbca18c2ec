//! The node record: a single-assignment value-or-effect in the hyper-graph.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::id::NodeId;
use crate::ops::Opcode;
use crate::types::{DataValue, Level, QuantumMeta, Tenancy, TensorMeta};

/// Ordered input list. Most nodes have at most four inputs, so the common
/// case stays inline.
pub type InputList = SmallVec<[NodeId; 4]>;

/// A node in a function graph.
///
/// Each node is identified by its position in the owning graph's node
/// table (`id == index`). Inputs reference nodes in the same graph; a
/// value operand always has a lower id than its consumer, with two
/// exceptions: back-edge inputs of a loop-header `Phi`, and `Label`
/// operands of `Branch`/`Jump` (a label's stream position marks where its
/// block begins, so branches to it come earlier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Position in the owning graph's node table.
    pub id: NodeId,
    /// The operation this node performs.
    pub op: Opcode,
    /// Abstraction tier; `High` at creation.
    pub level: Level,
    /// Execution-domain tag.
    pub tenancy: Tenancy,
    /// Ordered use edges.
    pub inputs: InputList,
    /// Optional per-opcode payload (constant, symbol, index, flag).
    pub data: Option<DataValue>,
    /// Tensor shape/dtype/layout, present on tensor-valued nodes.
    pub tensor: Option<TensorMeta>,
    /// Quantum gate/qubits/parameters, required on quantum nodes.
    pub quantum: Option<QuantumMeta>,
}

impl Node {
    /// Creates a node with the given opcode, `High` level, no inputs and
    /// no payload.
    pub fn new(id: NodeId, op: Opcode, tenancy: Tenancy) -> Self {
        Node {
            id,
            op,
            level: Level::High,
            tenancy,
            inputs: SmallVec::new(),
            data: None,
            tensor: None,
            quantum: None,
        }
    }

    /// Returns the symbol name carried in `data`, if any.
    pub fn symbol(&self) -> Option<&str> {
        self.data.as_ref().and_then(DataValue::as_str)
    }

    /// Returns the integer payload carried in `data`, if any.
    pub fn integer(&self) -> Option<i64> {
        self.data.as_ref().and_then(DataValue::as_integer)
    }
}
