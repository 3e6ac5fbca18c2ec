//! Shared value and metadata types of the IR.
//!
//! Every optional block on a node is a discriminated sum: the constant/
//! symbol payload ([`DataValue`]), the tensor metadata ([`TensorMeta`]),
//! and the quantum metadata ([`QuantumMeta`]). Absence is modeled with
//! `Option`, never with sentinel values.

use serde::{Deserialize, Serialize};

use crate::ops::GateKind;

// ---------------------------------------------------------------------------
// Abstraction level and tenancy
// ---------------------------------------------------------------------------

/// Abstraction tier of a node.
///
/// `High` as lowered from the AST, `Mid` after SSA normalization, `Low`
/// after platform-specific rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    High,
    Mid,
    Low,
}

/// Execution-domain tag: which hardware class must eventually run a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tenancy {
    CpuSerial,
    CpuParallel,
    NpuTensor,
    QpuQuantum,
}

// ---------------------------------------------------------------------------
// Node payload
// ---------------------------------------------------------------------------

/// Per-opcode payload carried on a node.
///
/// Used for: constant values, symbol names on `Call`/`FnRef`/
/// `ClosureCreate`/`VtableConstruct`, discriminants on union ops, argument
/// and capture indices, vtable slots, and the inclusive flag on `Range`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Str(String),
}

impl DataValue {
    /// Returns the integer payload, if this is an `Integer`.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            DataValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string payload, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean payload, if this is a `Boolean`.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            DataValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the float payload, if this is a `Float`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            DataValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tensor metadata
// ---------------------------------------------------------------------------

/// Element type of a tensor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum Dtype {
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Bool,
}

/// Memory layout of a tensor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    RowMajor,
    ColumnMajor,
    Strided,
}

/// Shape, element type, and layout of a tensor-valued node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorMeta {
    pub shape: Vec<usize>,
    pub dtype: Dtype,
    pub layout: Layout,
}

impl TensorMeta {
    /// Convenience constructor with row-major layout.
    pub fn row_major(shape: Vec<usize>, dtype: Dtype) -> Self {
        TensorMeta {
            shape,
            dtype,
            layout: Layout::RowMajor,
        }
    }

    /// Tensor rank (number of dimensions). A scalar tensor has rank 0.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

// ---------------------------------------------------------------------------
// Quantum metadata
// ---------------------------------------------------------------------------

/// Gate kind, target qubits, and angle parameters of a quantum node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantumMeta {
    pub gate: GateKind,
    pub qubits: Vec<usize>,
    pub parameters: Vec<f64>,
}

impl QuantumMeta {
    /// Metadata for a parameterless gate.
    pub fn gate(gate: GateKind, qubits: Vec<usize>) -> Self {
        QuantumMeta {
            gate,
            qubits,
            parameters: Vec::new(),
        }
    }

    /// Metadata for a rotation gate with one angle.
    pub fn rotation(gate: GateKind, qubit: usize, angle: f64) -> Self {
        QuantumMeta {
            gate,
            qubits: vec![qubit],
            parameters: vec![angle],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_value_accessors() {
        assert_eq!(DataValue::Integer(42).as_integer(), Some(42));
        assert_eq!(DataValue::Integer(42).as_str(), None);
        assert_eq!(DataValue::Str("main".into()).as_str(), Some("main"));
        assert_eq!(DataValue::Boolean(true).as_boolean(), Some(true));
        assert_eq!(DataValue::Float(1.5).as_float(), Some(1.5));
        assert_eq!(DataValue::Float(1.5).as_integer(), None);
    }

    #[test]
    fn tensor_meta_rank() {
        let scalar = TensorMeta::row_major(vec![], Dtype::F32);
        assert_eq!(scalar.rank(), 0);

        let matrix = TensorMeta::row_major(vec![4, 8], Dtype::F32);
        assert_eq!(matrix.rank(), 2);
        assert_eq!(matrix.layout, Layout::RowMajor);
    }

    #[test]
    fn quantum_meta_constructors() {
        let h = QuantumMeta::gate(GateKind::Hadamard, vec![0]);
        assert!(h.parameters.is_empty());
        assert_eq!(h.qubits, vec![0]);

        let rx = QuantumMeta::rotation(GateKind::Rx, 2, 0.5);
        assert_eq!(rx.qubits, vec![2]);
        assert_eq!(rx.parameters, vec![0.5]);
    }

    #[test]
    fn serde_roundtrip_data_value() {
        for v in [
            DataValue::Integer(-3),
            DataValue::Float(2.5),
            DataValue::Boolean(false),
            DataValue::Str("janus_print".into()),
        ] {
            let json = serde_json::to_string(&v).unwrap();
            let back: DataValue = serde_json::from_str(&json).unwrap();
            assert_eq!(v, back);
        }
    }

    #[test]
    fn serde_roundtrip_tensor_meta() {
        let meta = TensorMeta {
            shape: vec![2, 3],
            dtype: Dtype::I64,
            layout: Layout::Strided,
        };
        let json = serde_json::to_string(&meta).unwrap();
        let back: TensorMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(meta, back);
    }

    #[test]
    fn serde_roundtrip_quantum_meta() {
        let meta = QuantumMeta {
            gate: GateKind::Cnot,
            qubits: vec![0, 1],
            parameters: vec![],
        };
        let json = serde_json::to_string(&meta).unwrap();
        let back: QuantumMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(meta, back);
    }

    #[test]
    fn serde_roundtrip_level_and_tenancy() {
        for level in [Level::High, Level::Mid, Level::Low] {
            let json = serde_json::to_string(&level).unwrap();
            let back: Level = serde_json::from_str(&json).unwrap();
            assert_eq!(level, back);
        }
        for t in [
            Tenancy::CpuSerial,
            Tenancy::CpuParallel,
            Tenancy::NpuTensor,
            Tenancy::QpuQuantum,
        ] {
            let json = serde_json::to_string(&t).unwrap();
            let back: Tenancy = serde_json::from_str(&json).unwrap();
            assert_eq!(t, back);
        }
    }
}
