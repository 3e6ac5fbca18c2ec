//! Lowering error types.
//!
//! The lowerer fails fast: the first semantic error aborts the unit and is
//! returned as a typed variant. Structural graph errors from the IR layer
//! are wrapped transparently.

use thiserror::Error;

use crate::ast::AstId;

/// Errors produced while lowering an AST snapshot to function graphs.
#[derive(Debug, Error)]
pub enum LowerError {
    /// A trait impl omits a method that has no default body.
    #[error("impl of trait '{trait_name}' for '{type_name}' is missing method '{method}'")]
    MissingTraitImpl {
        trait_name: String,
        type_name: String,
        method: String,
    },

    /// The same `(trait, type)` pair was implemented twice.
    #[error("duplicate impl of trait '{trait_name}' for '{type_name}'")]
    DuplicateTraitImpl {
        trait_name: String,
        type_name: String,
    },

    /// A name that resolves to no binding, function, extern, or type.
    #[error("undeclared identifier '{name}'")]
    UndeclaredIdentifier { name: String },

    /// A call with the wrong number of arguments for a known signature.
    #[error("arity mismatch calling '{callee}': expected {expected} argument(s), got {actual}")]
    ArityMismatch {
        callee: String,
        expected: usize,
        actual: usize,
    },

    /// The snapshot violates the AST contract (bad child shape, unparsable
    /// literal, unknown range operator).
    #[error("malformed AST at node {node:?}: {reason}")]
    MalformedAst { node: AstId, reason: String },

    /// Structural error bubbled up from the graph builder.
    #[error(transparent)]
    Ir(#[from] janus_ir::IrError),
}
