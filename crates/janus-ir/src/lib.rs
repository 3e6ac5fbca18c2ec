//! Core data model of the janus compiler: the multi-level,
//! heterogeneous-tenancy IR, its validator, the extern registry, and the
//! opcode-level transform passes.
//!
//! The IR is a directed hyper-graph: each node is a single-assignment
//! value-or-effect with an opcode, ordered input edges, an execution-domain
//! tag (tenancy), an abstraction level, and optional per-opcode metadata.
//! One [`Graph`] owns every node of one function.

pub mod error;
pub mod externs;
pub mod graph;
pub mod id;
pub mod node;
pub mod ops;
pub mod transform;
pub mod types;
pub mod validate;

// Re-export commonly used types
pub use error::IrError;
pub use externs::{ExternRegistry, ExternSig};
pub use graph::{Capture, Graph, Parameter};
pub use id::NodeId;
pub use node::Node;
pub use ops::{GateKind, Opcode};
pub use transform::{
    GateCancellation, MatmulReluFusion, Pass, PassManager, PlatformLowering, SsaConversion,
};
pub use types::{DataValue, Dtype, Layout, Level, QuantumMeta, Tenancy, TensorMeta};
pub use validate::{validate, Diagnostic, Severity, ValidationReport};
