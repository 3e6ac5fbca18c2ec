//! Per-unit side tables produced by the lowerer.
//!
//! All tables are insertion-ordered: enum and union variant order is
//! declaration order, trait method order is the vtable slot order, and the
//! vtable specs list slot-ordered qualified method names.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use janus_ir::graph::Graph;

use crate::ast::UnitId;

/// Enum table entry: variant name -> assigned discriminant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumInfo {
    pub variants: IndexMap<String, i64>,
}

/// One field of a union variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnionField {
    pub name: String,
    pub type_name: String,
}

/// One variant of a union, with its ordered payload fields. A unit
/// variant has no fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnionVariant {
    pub name: String,
    pub fields: Vec<UnionField>,
}

/// Union table entry: ordered variant list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnionInfo {
    pub variants: Vec<UnionVariant>,
}

impl UnionInfo {
    /// Index of a variant by name, which doubles as its tag value.
    pub fn variant_index(&self, name: &str) -> Option<usize> {
        self.variants.iter().position(|v| v.name == name)
    }

    /// Index of a field within a variant.
    pub fn field_index(&self, variant: &str, field: &str) -> Option<usize> {
        let v = self.variants.iter().find(|v| v.name == variant)?;
        v.fields.iter().position(|f| f.name == field)
    }
}

/// One method signature of a trait, in slot order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitMethod {
    pub name: String,
    /// Declared parameter count, including `self`.
    pub arity: usize,
    pub return_type: String,
    /// `true` iff the trait declaration carries a default body.
    pub has_default: bool,
}

/// Trait table entry: ordered method signatures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitInfo {
    pub methods: Vec<TraitMethod>,
}

impl TraitInfo {
    /// Vtable slot of a method (its index in the signature list).
    pub fn slot(&self, method: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.name == method)
    }
}

/// Impl table entry, keyed in the table by `Type` (inherent) or
/// `Type:Trait` (trait impl).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplInfo {
    pub trait_name: Option<String>,
    pub type_name: String,
    /// Method name -> graph (symbol) name.
    pub methods: IndexMap<String, String>,
}

/// Key of an impl in the impl table.
pub fn impl_key(trait_name: Option<&str>, type_name: &str) -> String {
    match trait_name {
        Some(t) => format!("{}:{}", type_name, t),
        None => type_name.to_string(),
    }
}

/// Everything `lower_unit` produces for one compilation unit: the
/// function graphs plus the trait/impl/vtable metadata the emitter
/// consumes.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LoweredUnit {
    pub unit: UnitId,
    /// One graph per top-level function, impl method, and lifted closure.
    pub graphs: Vec<Graph>,
    pub enums: IndexMap<String, EnumInfo>,
    pub unions: IndexMap<String, UnionInfo>,
    pub traits: IndexMap<String, TraitInfo>,
    pub impls: IndexMap<String, ImplInfo>,
    /// `Type_Trait` -> slot-ordered qualified method names.
    pub vtables: IndexMap<String, Vec<String>>,
}

impl LoweredUnit {
    /// Finds a produced graph by its symbol name.
    pub fn graph(&self, name: &str) -> Option<&Graph> {
        self.graphs.iter().find(|g| g.function_name == name)
    }
}
