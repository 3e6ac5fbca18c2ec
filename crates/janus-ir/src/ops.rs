//! The opcode catalog shared by the lowerer, the passes, and the emitter.
//!
//! Opcodes are fieldless: per-node payloads (constant values, call targets,
//! discriminants, indices) live in [`Node::data`](crate::node::Node) and the
//! optional tensor/quantum metadata blocks. This keeps the catalog a flat,
//! stable vocabulary that every consumer can dispatch on with a single
//! `match`.
//!
//! # LLVM Lowering
//!
//! Every opcode has a documented lowering path in the emitter. Scalar ops
//! map to single LLVM instructions; aggregate and closure ops expand to
//! alloca/GEP sequences; tensor, quantum, and async ops lower to calls into
//! the runtime ABI (`npu_tensor_*`, `qpu_*`, `janus_*`).

use serde::{Deserialize, Serialize};

/// The complete operation vocabulary of the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // -- Data flow --
    /// Typed constant; the value lives in `Node::data`.
    Constant,
    /// Function parameter; `data.integer` is the parameter index.
    Argument,
    /// Stack slot allocation.
    Alloca,
    /// Load through a pointer produced by `Alloca`.
    Load,
    /// Store through a pointer; inputs are `[ptr, value]`.
    Store,
    /// Control-flow merge. At least two inputs; the second input of a
    /// loop-header phi is a back-edge and may have a higher id.
    Phi,

    // -- Scalar arithmetic --
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // -- Comparison --
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    // -- Bitwise --
    BitAnd,
    BitOr,
    Xor,
    Shl,
    Shr,
    BitNot,

    // -- Control --
    /// Direct call; `data.string` is the target symbol, inputs are the
    /// arguments.
    Call,
    /// Return; the single input is the returned value.
    Return,
    /// Conditional branch; inputs are `[cond, then_label, else_label]`.
    Branch,
    /// Unconditional jump; the single input is the target label.
    Jump,
    /// Basic-block marker. Has no inputs; its position in the id stream is
    /// where the block's content begins.
    Label,

    // -- Aggregates --
    ArrayConstruct,
    /// Element read; inputs are `[array, index]`.
    Index,
    /// Element write; inputs are `[array, index, value]`.
    IndexStore,
    StructConstruct,
    StructAlloca,
    /// Field read; `data.integer` is the field index.
    FieldAccess,
    /// Field write; `data.integer` is the field index.
    FieldStore,
    /// Range value; inputs are `[start, end]`, `data.boolean` is the
    /// inclusive flag.
    Range,

    // -- Closures --
    /// Reference to a zero-capture lifted closure; `data.string` names it.
    FnRef,
    /// Closure construction; `data.string` names the lifted function,
    /// inputs are the captured values in capture-index order.
    ClosureCreate,
    /// Environment read inside a lifted closure; `data.integer` is the
    /// capture index.
    ClosureEnvLoad,
    /// Closure invocation; inputs are `[closure, args...]`.
    ClosureCall,

    // -- Traits --
    /// Fat-pointer construction; `data.string` is the `Type_Trait` key,
    /// input is `[data_pointer]`.
    VtableConstruct,
    /// Dynamic dispatch; `data.integer` is the method slot, inputs are
    /// `[fat_pointer, args...]`.
    VtableLookup,

    // -- Unions --
    /// Tagged-union construction; `data.integer` is the variant index,
    /// inputs are the payload fields in declaration order.
    UnionConstruct,
    /// Tag comparison; `data.integer` is the tested variant index.
    UnionTagCheck,
    /// Payload field read; `data.integer` is the field index.
    UnionPayloadExtract,

    // -- Tensor (NPU) --
    TensorMatmul,
    TensorConv,
    TensorReduce,
    TensorScalarMul,
    TensorFusedMatmulRelu,
    TensorFusedMatmulAdd,
    TensorContract,
    TensorRelu,
    TensorSoftmax,

    // -- Quantum (QPU) --
    /// Gate application; requires quantum metadata.
    QuantumGate,
    /// Measurement; requires quantum metadata naming the measured qubit.
    QuantumMeasure,

    // -- Async --
    /// Asynchronous call producing a task handle; `data.string` is the
    /// target symbol.
    AsyncCall,
    /// Blocks the logical task until the input handle completes.
    Await,
    /// Child-task spawn inside a nursery; `data.string` is the target.
    Spawn,
    /// Opens a structured-concurrency scope.
    NurseryBegin,
    /// Closes a scope; the first input is the matching `NurseryBegin`.
    NurseryEnd,
}

impl Opcode {
    /// Returns `true` for opcodes in the tensor family.
    pub fn is_tensor(&self) -> bool {
        matches!(
            self,
            Opcode::TensorMatmul
                | Opcode::TensorConv
                | Opcode::TensorReduce
                | Opcode::TensorScalarMul
                | Opcode::TensorFusedMatmulRelu
                | Opcode::TensorFusedMatmulAdd
                | Opcode::TensorContract
                | Opcode::TensorRelu
                | Opcode::TensorSoftmax
        )
    }

    /// Returns `true` for opcodes in the quantum family.
    pub fn is_quantum(&self) -> bool {
        matches!(self, Opcode::QuantumGate | Opcode::QuantumMeasure)
    }

    /// Returns `true` for opcodes describing concurrency.
    pub fn is_async(&self) -> bool {
        matches!(
            self,
            Opcode::AsyncCall
                | Opcode::Await
                | Opcode::Spawn
                | Opcode::NurseryBegin
                | Opcode::NurseryEnd
        )
    }

    /// Returns `true` if this opcode ends a basic block.
    ///
    /// Terminators are: `Return`, `Branch`, `Jump`.
    pub fn is_terminator(&self) -> bool {
        matches!(self, Opcode::Return | Opcode::Branch | Opcode::Jump)
    }

    /// Returns `true` for binary comparison opcodes.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Opcode::Equal
                | Opcode::NotEqual
                | Opcode::Less
                | Opcode::LessEqual
                | Opcode::Greater
                | Opcode::GreaterEqual
        )
    }

    /// Returns `true` for binary scalar arithmetic opcodes.
    pub fn is_arith(&self) -> bool {
        matches!(
            self,
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod
        )
    }
}

// ---------------------------------------------------------------------------
// Quantum gate kinds
// ---------------------------------------------------------------------------

/// Quantum gate vocabulary carried in a node's quantum metadata.
///
/// The catalog ordinal doubles as the `gate_code` argument of the
/// `qpu_apply_gate` runtime call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateKind {
    Hadamard,
    PauliX,
    PauliY,
    PauliZ,
    Cnot,
    Swap,
    Toffoli,
    Rx,
    Ry,
    Rz,
    Phase,
}

impl GateKind {
    /// Number of qubit operands this gate requires.
    pub fn qubit_arity(&self) -> usize {
        match self {
            GateKind::Hadamard
            | GateKind::PauliX
            | GateKind::PauliY
            | GateKind::PauliZ
            | GateKind::Rx
            | GateKind::Ry
            | GateKind::Rz
            | GateKind::Phase => 1,
            GateKind::Cnot | GateKind::Swap => 2,
            GateKind::Toffoli => 3,
        }
    }

    /// Returns `true` for gates taking exactly one angle parameter.
    pub fn is_rotation(&self) -> bool {
        matches!(
            self,
            GateKind::Rx | GateKind::Ry | GateKind::Rz | GateKind::Phase
        )
    }

    /// Returns `true` for gates that are their own inverse. Two adjacent
    /// applications on the same qubit cancel.
    pub fn is_self_inverse(&self) -> bool {
        matches!(
            self,
            GateKind::Hadamard | GateKind::PauliX | GateKind::PauliY | GateKind::PauliZ
        )
    }

    /// The integer code passed to `qpu_apply_gate` (catalog ordinal).
    pub fn code(&self) -> u32 {
        match self {
            GateKind::Hadamard => 0,
            GateKind::PauliX => 1,
            GateKind::PauliY => 2,
            GateKind::PauliZ => 3,
            GateKind::Cnot => 4,
            GateKind::Swap => 5,
            GateKind::Toffoli => 6,
            GateKind::Rx => 7,
            GateKind::Ry => 8,
            GateKind::Rz => 9,
            GateKind::Phase => 10,
        }
    }
}
