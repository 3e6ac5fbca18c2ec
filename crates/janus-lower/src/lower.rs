//! Unit-level lowering: declaration collection, trait/impl processing,
//! and orchestration of per-function body lowering.
//!
//! [`lower_unit`] is the public contract: it walks a unit's AST snapshot
//! and produces one graph per top-level function, one per impl method
//! (including non-overridden trait defaults, so every vtable slot has a
//! target), and one per lifted closure, plus the per-unit side tables.
//!
//! Name mangling:
//! - `Type_method` for inherent impls,
//! - `Type_Trait_method` for trait impls,
//! - `__closure_N` for lifted closures,
//! - `__vtable_Type_Trait` for vtable globals (emitter side).

use std::collections::HashMap;

use indexmap::IndexMap;

use janus_ir::graph::{Graph, Parameter};
use janus_ir::ExternRegistry;

use crate::ast::{AstId, AstKind, AstSnapshot, UnitId};
use crate::error::LowerError;
use crate::func::lower_function;
use crate::unit::{
    impl_key, EnumInfo, ImplInfo, LoweredUnit, TraitInfo, TraitMethod, UnionField, UnionInfo,
    UnionVariant,
};

/// Signature of a locally lowered function, used for call classification
/// and arity checking.
#[derive(Debug, Clone)]
pub struct FuncSig {
    pub params: Vec<Parameter>,
    pub return_type: String,
}

/// Mutable per-unit lowering state shared by every function body.
pub(crate) struct UnitTables {
    pub enums: IndexMap<String, EnumInfo>,
    pub unions: IndexMap<String, UnionInfo>,
    pub traits: IndexMap<String, TraitInfo>,
    pub impls: IndexMap<String, ImplInfo>,
    pub functions: IndexMap<String, FuncSig>,
    pub externs: ExternRegistry,
    pub closure_counter: u32,
    /// Closures lifted while lowering the current function body.
    pub lifted: Vec<Graph>,
}

impl UnitTables {
    fn new() -> Self {
        UnitTables {
            enums: IndexMap::new(),
            unions: IndexMap::new(),
            traits: IndexMap::new(),
            impls: IndexMap::new(),
            functions: IndexMap::new(),
            externs: ExternRegistry::with_builtins(),
            closure_counter: 0,
            lifted: Vec::new(),
        }
    }

    /// Allocates the next `__closure_N` name.
    pub fn next_closure_name(&mut self) -> String {
        let name = format!("__closure_{}", self.closure_counter);
        self.closure_counter += 1;
        name
    }
}

/// A function body scheduled for lowering, with its resolved graph name.
struct PendingBody {
    graph_name: String,
    decl: AstId,
    self_type: Option<String>,
}

/// Lowers one compilation unit into function graphs plus side tables.
pub fn lower_unit(snapshot: &AstSnapshot, unit: UnitId) -> Result<LoweredUnit, LowerError> {
    let root = snapshot.root();
    let mut tables = UnitTables::new();

    // ---- Pass 1: type-level declarations ---------------------------------
    for &decl in snapshot.children(root) {
        match snapshot.kind(decl) {
            Some(AstKind::EnumDecl) => collect_enum(snapshot, decl, &mut tables)?,
            Some(AstKind::UnionDecl) => collect_union(snapshot, decl, &mut tables)?,
            Some(AstKind::TraitDecl) => collect_trait(snapshot, decl, &mut tables)?,
            _ => {}
        }
    }

    // ---- Pass 2: signatures, impl completeness, vtables ------------------
    // Default bodies live on the trait decl; key is (trait, method).
    let mut trait_defaults: HashMap<(String, String), AstId> = HashMap::new();
    for &decl in snapshot.children(root) {
        if snapshot.kind(decl) == Some(AstKind::TraitDecl) {
            let trait_name = require_text(snapshot, decl)?;
            for &m in snapshot.children(decl) {
                if snapshot.kind(m) == Some(AstKind::FuncDecl) && has_block(snapshot, m) {
                    let method = require_text(snapshot, m)?;
                    trait_defaults.insert((trait_name.clone(), method), m);
                }
            }
        }
    }

    let mut bodies: Vec<PendingBody> = Vec::new();
    for &decl in snapshot.children(root) {
        match snapshot.kind(decl) {
            Some(AstKind::FuncDecl) => {
                let name = require_text(snapshot, decl)?;
                let (params, ret, _) = func_signature(snapshot, decl, None)?;
                tables.functions.insert(
                    name.clone(),
                    FuncSig {
                        params,
                        return_type: ret,
                    },
                );
                bodies.push(PendingBody {
                    graph_name: name,
                    decl,
                    self_type: None,
                });
            }
            Some(AstKind::ImplDecl) => {
                collect_impl(snapshot, decl, &mut tables, &trait_defaults, &mut bodies)?;
            }
            _ => {}
        }
    }

    // ---- Pass 3: body lowering in declaration order ----------------------
    let mut graphs: Vec<Graph> = Vec::new();
    for body in &bodies {
        let (params, ret, block) =
            func_signature(snapshot, body.decl, body.self_type.as_deref())?;
        let graph = lower_function(
            snapshot,
            &mut tables,
            &body.graph_name,
            params,
            ret,
            Vec::new(),
            block,
        )?;
        graphs.push(graph);
        // Closures lifted inside this body follow it in the output.
        graphs.append(&mut tables.lifted);
    }

    let vtables = build_vtables(&tables);

    tracing::debug!(
        unit = unit.0,
        graphs = graphs.len(),
        enums = tables.enums.len(),
        unions = tables.unions.len(),
        traits = tables.traits.len(),
        impls = tables.impls.len(),
        "unit lowered"
    );

    Ok(LoweredUnit {
        unit,
        graphs,
        enums: tables.enums,
        unions: tables.unions,
        traits: tables.traits,
        impls: tables.impls,
        vtables,
    })
}

// ---------------------------------------------------------------------------
// Declaration collection
// ---------------------------------------------------------------------------

fn collect_enum(
    snapshot: &AstSnapshot,
    decl: AstId,
    tables: &mut UnitTables,
) -> Result<(), LowerError> {
    let name = require_text(snapshot, decl)?;
    let mut info = EnumInfo::default();
    // Implicit discriminants are 0-based; an explicit `=N` overrides and
    // subsequent implicit variants continue from N+1.
    let mut next = 0i64;
    for &v in snapshot.children(decl) {
        if snapshot.kind(v) != Some(AstKind::EnumVariant) {
            continue;
        }
        let vname = require_text(snapshot, v)?;
        let value = match snapshot.children(v).first() {
            Some(&lit) if snapshot.kind(lit) == Some(AstKind::LiteralInt) => {
                parse_int(snapshot, lit)?
            }
            _ => next,
        };
        next = value + 1;
        info.variants.insert(vname, value);
    }
    tables.enums.insert(name, info);
    Ok(())
}

fn collect_union(
    snapshot: &AstSnapshot,
    decl: AstId,
    tables: &mut UnitTables,
) -> Result<(), LowerError> {
    let name = require_text(snapshot, decl)?;
    let mut info = UnionInfo::default();
    for &v in snapshot.children(decl) {
        if snapshot.kind(v) != Some(AstKind::UnionVariant) {
            continue;
        }
        let vname = require_text(snapshot, v)?;
        let mut fields = Vec::new();
        for &f in snapshot.children(v) {
            if snapshot.kind(f) != Some(AstKind::Param) {
                continue;
            }
            fields.push(UnionField {
                name: require_text(snapshot, f)?,
                type_name: param_type(snapshot, f, None),
            });
        }
        info.variants.push(UnionVariant {
            name: vname,
            fields,
        });
    }
    tables.unions.insert(name, info);
    Ok(())
}

fn collect_trait(
    snapshot: &AstSnapshot,
    decl: AstId,
    tables: &mut UnitTables,
) -> Result<(), LowerError> {
    let name = require_text(snapshot, decl)?;
    let mut info = TraitInfo::default();
    for &m in snapshot.children(decl) {
        if snapshot.kind(m) != Some(AstKind::FuncDecl) {
            continue;
        }
        let method = require_text(snapshot, m)?;
        let (params, ret, _) = func_signature(snapshot, m, None)?;
        info.methods.push(TraitMethod {
            name: method,
            arity: params.len(),
            return_type: ret,
            has_default: has_block(snapshot, m),
        });
    }
    tables.traits.insert(name, info);
    Ok(())
}

fn collect_impl(
    snapshot: &AstSnapshot,
    decl: AstId,
    tables: &mut UnitTables,
    trait_defaults: &HashMap<(String, String), AstId>,
    bodies: &mut Vec<PendingBody>,
) -> Result<(), LowerError> {
    let type_name = require_text(snapshot, decl)?;
    let children = snapshot.children(decl);
    let trait_name = match children.first() {
        Some(&first) if snapshot.kind(first) == Some(AstKind::TypeRef) => {
            Some(require_text(snapshot, first)?)
        }
        _ => None,
    };

    // Method decls and their AST nodes, in source order.
    let mut declared: IndexMap<String, AstId> = IndexMap::new();
    for &m in children {
        if snapshot.kind(m) == Some(AstKind::FuncDecl) {
            declared.insert(require_text(snapshot, m)?, m);
        }
    }

    match trait_name {
        Some(trait_name) => {
            let trait_info = tables
                .traits
                .get(&trait_name)
                .ok_or_else(|| LowerError::UndeclaredIdentifier {
                    name: trait_name.clone(),
                })?
                .clone();

            let key = impl_key(Some(trait_name.as_str()), &type_name);
            if tables.impls.contains_key(&key) {
                return Err(LowerError::DuplicateTraitImpl {
                    trait_name,
                    type_name,
                });
            }

            // Completeness: every method without a default must be
            // overridden.
            for m in &trait_info.methods {
                if !m.has_default && !declared.contains_key(&m.name) {
                    return Err(LowerError::MissingTraitImpl {
                        trait_name: trait_name.clone(),
                        type_name: type_name.clone(),
                        method: m.name.clone(),
                    });
                }
            }

            // Every slot gets a graph: overrides from the impl body,
            // untouched defaults from the trait decl.
            let mut methods = IndexMap::new();
            for m in &trait_info.methods {
                let graph_name = format!("{}_{}_{}", type_name, trait_name, m.name);
                let src = match declared.get(&m.name) {
                    Some(&d) => d,
                    None => {
                        *trait_defaults
                            .get(&(trait_name.clone(), m.name.clone()))
                            .ok_or_else(|| LowerError::MissingTraitImpl {
                                trait_name: trait_name.clone(),
                                type_name: type_name.clone(),
                                method: m.name.clone(),
                            })?
                    }
                };
                let (params, ret, _) = func_signature(snapshot, src, Some(&type_name))?;
                tables.functions.insert(
                    graph_name.clone(),
                    FuncSig {
                        params,
                        return_type: ret,
                    },
                );
                bodies.push(PendingBody {
                    graph_name: graph_name.clone(),
                    decl: src,
                    self_type: Some(type_name.clone()),
                });
                methods.insert(m.name.clone(), graph_name);
            }

            tables.impls.insert(
                key,
                ImplInfo {
                    trait_name: Some(trait_name),
                    type_name,
                    methods,
                },
            );
        }
        None => {
            let key = impl_key(None, &type_name);
            let entry = tables.impls.entry(key).or_insert_with(|| ImplInfo {
                trait_name: None,
                type_name: type_name.clone(),
                methods: IndexMap::new(),
            });
            let mut pending = Vec::new();
            for (method, m_decl) in &declared {
                let graph_name = format!("{}_{}", type_name, method);
                entry.methods.insert(method.clone(), graph_name.clone());
                pending.push((graph_name, *m_decl));
            }
            for (graph_name, m_decl) in pending {
                let (params, ret, _) = func_signature(snapshot, m_decl, Some(&type_name))?;
                tables.functions.insert(
                    graph_name.clone(),
                    FuncSig {
                        params,
                        return_type: ret,
                    },
                );
                bodies.push(PendingBody {
                    graph_name,
                    decl: m_decl,
                    self_type: Some(type_name.clone()),
                });
            }
        }
    }
    Ok(())
}

/// Vtable specs: for each trait impl, the slot-ordered qualified method
/// names matching the trait's signature order.
fn build_vtables(tables: &UnitTables) -> IndexMap<String, Vec<String>> {
    let mut vtables = IndexMap::new();
    for info in tables.impls.values() {
        let Some(trait_name) = &info.trait_name else {
            continue;
        };
        let Some(trait_info) = tables.traits.get(trait_name) else {
            continue;
        };
        let slots: Vec<String> = trait_info
            .methods
            .iter()
            .filter_map(|m| info.methods.get(&m.name).cloned())
            .collect();
        vtables.insert(format!("{}_{}", info.type_name, trait_name), slots);
    }
    vtables
}

// ---------------------------------------------------------------------------
// Signature helpers
// ---------------------------------------------------------------------------

/// Extracts `(params, return type, body block)` from a `func_decl` or
/// `func_lit`. An untyped `self` parameter takes the impl type's name.
pub(crate) fn func_signature(
    snapshot: &AstSnapshot,
    decl: AstId,
    self_type: Option<&str>,
) -> Result<(Vec<Parameter>, String, Option<AstId>), LowerError> {
    let mut params = Vec::new();
    let mut ret = "i32".to_string();
    let mut block = None;

    for &child in snapshot.children(decl) {
        match snapshot.kind(child) {
            Some(AstKind::Param) => {
                let name = require_text(snapshot, child)?;
                let ty = param_type(snapshot, child, self_type);
                params.push(Parameter::new(name, ty));
            }
            Some(AstKind::TypeRef) => {
                if let Some(t) = snapshot.text(child) {
                    ret = t.to_string();
                }
            }
            Some(AstKind::Block) => block = Some(child),
            _ => {}
        }
    }
    Ok((params, ret, block))
}

/// A parameter's declared type, defaulting `self` to the impl type and
/// anything else untyped to `i32`.
fn param_type(snapshot: &AstSnapshot, param: AstId, self_type: Option<&str>) -> String {
    for &child in snapshot.children(param) {
        if snapshot.kind(child) == Some(AstKind::TypeRef) {
            if let Some(t) = snapshot.text(child) {
                return t.to_string();
            }
        }
    }
    match (snapshot.text(param), self_type) {
        (Some("self"), Some(t)) => t.to_string(),
        _ => "i32".to_string(),
    }
}

fn has_block(snapshot: &AstSnapshot, decl: AstId) -> bool {
    snapshot
        .children(decl)
        .iter()
        .any(|&c| snapshot.kind(c) == Some(AstKind::Block))
}

pub(crate) fn require_text(snapshot: &AstSnapshot, id: AstId) -> Result<String, LowerError> {
    snapshot
        .text(id)
        .map(str::to_string)
        .ok_or_else(|| LowerError::MalformedAst {
            node: id,
            reason: "node requires a text atom".into(),
        })
}

pub(crate) fn parse_int(snapshot: &AstSnapshot, id: AstId) -> Result<i64, LowerError> {
    let text = require_text(snapshot, id)?;
    text.parse::<i64>().map_err(|_| LowerError::MalformedAst {
        node: id,
        reason: format!("unparsable integer literal '{}'", text),
    })
}
