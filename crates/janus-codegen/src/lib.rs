//! LLVM IR emission for lowered janus graphs.
//!
//! Consumes the function graphs and vtable specs a lowered unit carries
//! and produces one verified textual LLVM module. The LLVM context is
//! scoped to the emission call; nothing LLVM-typed escapes.
//!
//! # Modules
//!
//! - [`error`] -- emission failure modes (`InvalidModule` carries the
//!   verifier's message)
//! - [`types`] -- graph type names to LLVM types
//! - [`runtime`] -- runtime ABI declarations (`janus_*`, `npu_tensor_*`,
//!   `qpu_*`), synthesized on first use
//! - [`emit`] -- the per-graph emitter

pub mod emit;
pub mod error;
pub mod runtime;
pub mod types;

pub use emit::{emit_module, emit_unit};
pub use error::EmitError;
