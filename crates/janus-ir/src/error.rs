//! Structural error types for the graph model.
//!
//! Uses `thiserror` for structured, matchable variants. Semantic lowering
//! errors live in the lowerer crate; module-verification errors live in the
//! emitter crate. Allocation failure is not modeled -- the global allocator
//! aborts the process, so no `OutOfMemory` path can be observed here.

use thiserror::Error;

use crate::id::NodeId;

/// Structural errors produced by the graph model and builder.
#[derive(Debug, Error)]
pub enum IrError {
    /// A node id does not exist in the graph it was used against.
    #[error("invalid node id: {id}")]
    InvalidNodeId { id: NodeId },

    /// A node's input list violates its opcode's arity or shape.
    #[error("invalid inputs on node {node}: {reason}")]
    InvalidNodeInputs { node: NodeId, reason: String },

    /// An opcode that requires a metadata block was built without one.
    #[error("missing metadata on node {node}")]
    MissingMetadata { node: NodeId },
}
