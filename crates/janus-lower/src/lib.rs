//! AST-to-IR lowering for the janus compiler.
//!
//! Consumes a read-only AST snapshot (the contract with the external
//! parser and AST database) and produces one function graph per top-level
//! function, impl method, and lifted closure, plus the per-unit side
//! tables (enums, unions, traits, impls, vtable specs) the emitter needs.
//!
//! The lowerer fails fast on semantic errors -- missing or duplicate trait
//! impls, undeclared identifiers, arity mismatches -- returning a typed
//! [`LowerError`].

pub mod ast;
pub mod error;
mod func;
pub mod lower;
pub mod scope;
pub mod unit;

// Re-export commonly used types
pub use ast::{AstId, AstKind, AstNode, AstSnapshot, SnapshotBuilder, UnitId};
pub use error::LowerError;
pub use lower::{lower_unit, FuncSig};
pub use unit::{
    impl_key, EnumInfo, ImplInfo, LoweredUnit, TraitInfo, TraitMethod, UnionField, UnionInfo,
    UnionVariant,
};
