//! Runtime ABI declarations.
//!
//! Tensor, quantum, and async opcodes lower to calls into the runtime
//! library; the symbols here are its link-time contract. Declarations are
//! synthesized at module scope on first use -- [`declare`] is idempotent.

use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::types::BasicMetadataTypeEnum;
use inkwell::values::FunctionValue;

use janus_ir::ExternSig;

use crate::types::{is_void, llvm_type};

/// Signatures of the runtime symbols that are not part of the caller's
/// extern registry: the tensor and quantum entry points.
pub fn runtime_signature(name: &str) -> Option<ExternSig> {
    let sig = match name {
        "npu_tensor_matmul" => ExternSig::new(&["ptr", "ptr", "i64", "i64", "i64"], "ptr"),
        "npu_tensor_fused_matmul_relu" => {
            ExternSig::new(&["ptr", "ptr", "i64", "i64", "i64"], "ptr")
        }
        "npu_tensor_fused_matmul_add" => {
            ExternSig::new(&["ptr", "ptr", "ptr", "i64", "i64", "i64"], "ptr")
        }
        "npu_tensor_conv" => ExternSig::new(&["ptr", "ptr"], "ptr"),
        "npu_tensor_reduce" => ExternSig::new(&["ptr"], "ptr"),
        "npu_tensor_scalar_mul" => ExternSig::new(&["ptr", "ptr"], "ptr"),
        "npu_tensor_contract" => ExternSig::new(&["ptr", "ptr"], "ptr"),
        "npu_tensor_relu" => ExternSig::new(&["ptr"], "ptr"),
        "npu_tensor_softmax" => ExternSig::new(&["ptr"], "ptr"),
        "qpu_apply_gate" => ExternSig::new(&["ptr", "i32", "ptr", "i64", "ptr", "i64"], "unit"),
        "qpu_measure" => ExternSig::new(&["ptr", "i64"], "i32"),
        _ => return None,
    };
    Some(sig)
}

/// Declares an external symbol in the module, reusing an existing
/// declaration when present.
pub fn declare<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    name: &str,
    sig: &ExternSig,
) -> FunctionValue<'ctx> {
    if let Some(existing) = module.get_function(name) {
        return existing;
    }
    let params: Vec<BasicMetadataTypeEnum<'ctx>> = sig
        .params
        .iter()
        .map(|p| llvm_type(context, p).into())
        .collect();
    let fn_type = if is_void(&sig.ret) {
        context.void_type().fn_type(&params, sig.variadic)
    } else {
        llvm_type(context, &sig.ret).fn_type(&params, sig.variadic)
    };
    module.add_function(name, fn_type, Some(Linkage::External))
}
