//! Emitter error types covering all emission failure modes.

use thiserror::Error;

/// Errors that can occur while emitting LLVM IR from lowered graphs.
#[derive(Debug, Error)]
pub enum EmitError {
    /// The LLVM verifier rejected the finished module; carries its
    /// message.
    #[error("invalid module: {0}")]
    InvalidModule(String),

    /// Graph structure issue preventing emission (unknown symbol, value
    /// not yet computed, malformed control operands).
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// Unsupported or unresolvable type name during LLVM type mapping.
    #[error("type mapping error: {0}")]
    TypeMapping(String),

    /// LLVM builder failure.
    #[error("LLVM error: {0}")]
    Llvm(String),
}
