//! Mapping from graph type names to LLVM IR types.
//!
//! Graph parameters and return types carry plain type names. Scalars map
//! directly; `unit`/`void` returns map to LLVM void; anything nominal
//! (struct names, `str`, `ptr`, trait objects) maps to an opaque pointer.

use inkwell::context::Context;
use inkwell::types::BasicTypeEnum;
use inkwell::AddressSpace;

/// Returns `true` for type names that mean "no value".
pub fn is_void(name: &str) -> bool {
    matches!(name, "unit" | "void" | "()")
}

/// Converts a type name into an LLVM basic type.
pub fn llvm_type<'ctx>(context: &'ctx Context, name: &str) -> BasicTypeEnum<'ctx> {
    match name {
        "bool" => context.bool_type().into(),
        "i8" => context.i8_type().into(),
        "i16" => context.i16_type().into(),
        "i32" => context.i32_type().into(),
        "i64" => context.i64_type().into(),
        "f32" => context.f32_type().into(),
        "f64" => context.f64_type().into(),
        // str, ptr, handles, nominal record types, trait objects.
        _ => context.ptr_type(AddressSpace::default()).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_map_directly() {
        let context = Context::create();
        assert_eq!(
            llvm_type(&context, "bool").into_int_type().get_bit_width(),
            1
        );
        assert_eq!(
            llvm_type(&context, "i32").into_int_type().get_bit_width(),
            32
        );
        assert_eq!(
            llvm_type(&context, "i64").into_int_type().get_bit_width(),
            64
        );
        assert!(llvm_type(&context, "f64").is_float_type());
    }

    #[test]
    fn nominal_types_become_pointers() {
        let context = Context::create();
        assert!(llvm_type(&context, "str").is_pointer_type());
        assert!(llvm_type(&context, "ptr").is_pointer_type());
        assert!(llvm_type(&context, "Point").is_pointer_type());
    }

    #[test]
    fn void_names() {
        assert!(is_void("unit"));
        assert!(is_void("void"));
        assert!(!is_void("i32"));
    }
}
