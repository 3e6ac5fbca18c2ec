//! Per-function body lowering.
//!
//! One [`FuncLowerer`] walks one function body and builds one graph.
//! Control flow lowers to `Label`/`Branch`/`Jump` nodes where a label's
//! position in the id stream marks the start of its basic block; branches
//! reference labels forward, so label operands are pushed onto the branch
//! as each label is created. Loop-carried values get header `Phi` nodes
//! whose back-edge input is pushed after the body is lowered.
//!
//! Closures are lifted here: a pre-pass computes the free identifiers of
//! the literal's body, each becomes a capture, and the lifted function is
//! lowered recursively with `ClosureEnvLoad` bindings standing in for the
//! captured names.

use std::collections::{HashMap, HashSet};

use janus_ir::graph::{Capture, Graph, Parameter};
use janus_ir::types::{DataValue, Tenancy};
use janus_ir::{NodeId, Opcode};

use crate::ast::{AstId, AstKind, AstSnapshot};
use crate::error::LowerError;
use crate::lower::{func_signature, parse_int, require_text, FuncSig, UnitTables};
use crate::scope::{Binding, BindingKind, ScopeStack};
use crate::unit::impl_key;

/// How one free identifier is captured by a lifted closure.
pub(crate) struct CaptureSpec {
    pub name: String,
    /// `true` when the capture holds a pointer to the original `var`
    /// slot (mutable capture); reads load through it, writes store
    /// through it.
    pub by_ptr: bool,
}

/// Lowers one function body into a graph.
///
/// `captures` is nonempty for lifted closures; the produced graph then
/// carries a leading `__env` parameter and a populated capture table.
pub(crate) fn lower_function(
    snapshot: &AstSnapshot,
    tables: &mut UnitTables,
    name: &str,
    params: Vec<Parameter>,
    return_type: String,
    captures: Vec<CaptureSpec>,
    body: Option<AstId>,
) -> Result<Graph, LowerError> {
    let mut graph = Graph::new(name);
    graph.return_type = return_type;
    if !captures.is_empty() {
        graph.parameters.push(Parameter::new("__env", "ptr"));
    }
    graph.parameters.extend(params);
    graph.captures = captures
        .iter()
        .enumerate()
        .map(|(i, c)| Capture {
            name: c.name.clone(),
            index: i as u32,
        })
        .collect();

    let mut lowerer = FuncLowerer {
        snapshot,
        tables,
        graph,
        scopes: ScopeStack::new(),
        records: HashMap::new(),
        trait_objects: HashMap::new(),
        closures: HashMap::new(),
        fn_refs: HashMap::new(),
    };

    // Parameter bindings: one Argument node per declared parameter, the
    // payload being its index in the parameter list (the `__env` slot
    // counts).
    let declared: Vec<(usize, Parameter)> = lowerer
        .graph
        .parameters
        .iter()
        .cloned()
        .enumerate()
        .filter(|(_, p)| p.name != "__env")
        .collect();
    for (index, param) in declared {
        let arg = lowerer.graph.create_node(Opcode::Argument);
        lowerer
            .graph
            .set_data(arg, DataValue::Integer(index as i64))?;
        let kind = if param.name == "self" {
            BindingKind::Record {
                type_name: param.type_name.clone(),
                fields: Vec::new(),
            }
        } else {
            BindingKind::Value
        };
        lowerer.scopes.declare(
            param.name.clone(),
            Binding {
                node: arg,
                kind,
                mutable: false,
            },
        );
    }

    // Capture bindings: references lower to ClosureEnvLoad at each use
    // site, so the binding node is never read.
    for (index, spec) in captures.iter().enumerate() {
        lowerer.scopes.declare(
            spec.name.clone(),
            Binding {
                node: NodeId(u32::MAX),
                kind: BindingKind::EnvCapture {
                    index: index as u32,
                    by_ptr: spec.by_ptr,
                },
                mutable: spec.by_ptr,
            },
        );
    }

    if let Some(block) = body {
        lowerer.lower_block(block)?;
    }

    // A function with no explicit trailing return implicitly returns 0.
    let terminated = lowerer
        .graph
        .nodes()
        .last()
        .map(|n| n.op == Opcode::Return)
        .unwrap_or(false);
    if !terminated {
        let zero = lowerer.graph.create_constant(DataValue::Integer(0));
        lowerer.graph.create_return(zero);
    }

    tracing::trace!(
        function = name,
        nodes = lowerer.graph.node_count(),
        captures = lowerer.graph.captures.len(),
        "function lowered"
    );

    Ok(lowerer.graph)
}

struct FuncLowerer<'a> {
    snapshot: &'a AstSnapshot,
    tables: &'a mut UnitTables,
    graph: Graph,
    scopes: ScopeStack,
    /// Struct-literal provenance: construct node -> (type path, field order).
    records: HashMap<NodeId, (String, Vec<String>)>,
    /// Fat-pointer provenance: VtableConstruct node -> trait name.
    trait_objects: HashMap<NodeId, String>,
    /// ClosureCreate node -> lifted function name.
    closures: HashMap<NodeId, String>,
    /// FnRef node -> function name.
    fn_refs: HashMap<NodeId, String>,
}

impl<'a> FuncLowerer<'a> {
    fn kind(&self, id: AstId) -> Option<AstKind> {
        self.snapshot.kind(id)
    }

    fn children(&self, id: AstId) -> &'a [AstId] {
        self.snapshot.children(id)
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn lower_block(&mut self, block: AstId) -> Result<(), LowerError> {
        self.scopes.push();
        for &stmt in self.children(block) {
            self.lower_stmt(stmt)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: AstId) -> Result<(), LowerError> {
        match self.kind(stmt) {
            Some(AstKind::ExprStmt) => {
                let Some(&expr) = self.children(stmt).first() else {
                    return Ok(());
                };
                if self.is_assignment(expr) {
                    let kids = self.children(expr);
                    self.lower_assign(kids[0], kids[1])
                } else {
                    self.lower_expr(expr).map(|_| ())
                }
            }
            Some(AstKind::LetStmt) => self.lower_let(stmt, false),
            Some(AstKind::VarStmt) => self.lower_let(stmt, true),
            Some(AstKind::ReturnStmt) => {
                let value = match self.children(stmt).first() {
                    Some(&e) => self.lower_expr(e)?,
                    None => self.graph.create_constant(DataValue::Integer(0)),
                };
                self.graph.create_return(value);
                Ok(())
            }
            Some(AstKind::IfStmt) => self.lower_if(stmt),
            Some(AstKind::WhileStmt) => self.lower_while(stmt),
            Some(AstKind::ForStmt) => self.lower_for(stmt),
            Some(AstKind::MatchStmt) => self.lower_match(stmt),
            Some(AstKind::NurseryStmt) => self.lower_nursery(stmt),
            // Bare expressions in statement position are tolerated.
            Some(_) => self.lower_expr(stmt).map(|_| ()),
            None => Err(LowerError::MalformedAst {
                node: stmt,
                reason: "statement id out of range".into(),
            }),
        }
    }

    fn is_assignment(&self, expr: AstId) -> bool {
        self.kind(expr) == Some(AstKind::BinaryExpr)
            && self.snapshot.text(expr) == Some("=")
            && self.children(expr).len() == 2
    }

    fn lower_let(&mut self, stmt: AstId, mutable: bool) -> Result<(), LowerError> {
        let name = require_text(self.snapshot, stmt)?;
        let Some(&init) = self.children(stmt).last() else {
            return Err(LowerError::MalformedAst {
                node: stmt,
                reason: "binding without initializer".into(),
            });
        };
        let value = self.lower_expr(init)?;

        if mutable {
            let slot = self.graph.create_node(Opcode::Alloca);
            self.graph
                .create_node_with_inputs(Opcode::Store, &[slot, value]);
            self.scopes.declare(
                name,
                Binding {
                    node: slot,
                    kind: BindingKind::Slot,
                    mutable: true,
                },
            );
        } else {
            let kind = self.provenance_of(value);
            self.scopes.declare(
                name,
                Binding {
                    node: value,
                    kind,
                    mutable: false,
                },
            );
        }
        Ok(())
    }

    fn lower_assign(&mut self, lhs: AstId, rhs: AstId) -> Result<(), LowerError> {
        let value = self.lower_expr(rhs)?;
        match self.kind(lhs) {
            Some(AstKind::Identifier) => {
                let name = require_text(self.snapshot, lhs)?;
                let binding = self
                    .scopes
                    .lookup(&name)
                    .cloned()
                    .ok_or_else(|| LowerError::UndeclaredIdentifier { name: name.clone() })?;
                match binding.kind {
                    BindingKind::Slot => {
                        self.graph
                            .create_node_with_inputs(Opcode::Store, &[binding.node, value]);
                    }
                    BindingKind::EnvCapture {
                        index,
                        by_ptr: true,
                    } => {
                        let env = self.graph.create_node(Opcode::ClosureEnvLoad);
                        self.graph.set_data(env, DataValue::Integer(index as i64))?;
                        self.graph
                            .create_node_with_inputs(Opcode::Store, &[env, value]);
                    }
                    _ => {
                        self.scopes.assign(&name, value);
                    }
                }
                Ok(())
            }
            Some(AstKind::IndexExpr) => {
                let kids = self.children(lhs);
                let obj = self.lower_expr(kids[0])?;
                let idx = self.lower_expr(kids[1])?;
                self.graph
                    .create_node_with_inputs(Opcode::IndexStore, &[obj, idx, value]);
                Ok(())
            }
            Some(AstKind::FieldExpr) => {
                let field = require_text(self.snapshot, lhs)?;
                let obj_ast = self.children(lhs)[0];
                let obj = self.lower_expr(obj_ast)?;
                let index = self.field_index(Some(obj_ast), obj, &field)?;
                let store = self
                    .graph
                    .create_node_with_inputs(Opcode::FieldStore, &[obj, value]);
                self.graph
                    .set_data(store, DataValue::Integer(index as i64))?;
                Ok(())
            }
            _ => Err(LowerError::MalformedAst {
                node: lhs,
                reason: "unsupported assignment target".into(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Control flow
    // -----------------------------------------------------------------------

    fn lower_if(&mut self, stmt: AstId) -> Result<(), LowerError> {
        let kids = self.children(stmt);
        if kids.len() < 2 {
            return Err(LowerError::MalformedAst {
                node: stmt,
                reason: "if requires a condition and a then-block".into(),
            });
        }
        let cond = self.lower_expr(kids[0])?;
        let branch = self.graph.create_node_with_inputs(Opcode::Branch, &[cond]);
        let before = self.scopes.flatten();

        let then_label = self.graph.create_node(Opcode::Label);
        self.graph.push_input(branch, then_label)?;
        self.lower_block(kids[1])?;
        let then_defs = self.scopes.flatten();
        let then_jump = self.graph.create_node(Opcode::Jump);
        self.scopes.restore(&before);

        let else_arm = match kids.get(2) {
            Some(&else_block) => {
                let else_label = self.graph.create_node(Opcode::Label);
                self.graph.push_input(branch, else_label)?;
                self.lower_block(else_block)?;
                let else_defs = self.scopes.flatten();
                let else_jump = self.graph.create_node(Opcode::Jump);
                self.scopes.restore(&before);
                Some((else_defs, else_jump))
            }
            None => None,
        };

        let join = self.graph.create_node(Opcode::Label);
        self.graph.push_input(then_jump, join)?;
        match &else_arm {
            Some((_, else_jump)) => self.graph.push_input(*else_jump, join)?,
            // Without an else arm the false edge of the branch falls
            // through to the join.
            None => self.graph.push_input(branch, join)?,
        }

        // Join-point Phis: a variable rebound by both arms merges here.
        if let Some((else_defs, _)) = else_arm {
            for (name, &old) in &before {
                let (Some(&t), Some(&e)) = (then_defs.get(name), else_defs.get(name)) else {
                    continue;
                };
                if t != old && e != old {
                    if t == e {
                        self.scopes.assign(name, t);
                    } else {
                        let phi = self.graph.create_node_with_inputs(Opcode::Phi, &[t, e]);
                        self.scopes.rebind(name, phi, BindingKind::Value);
                    }
                }
            }
        }
        Ok(())
    }

    fn lower_while(&mut self, stmt: AstId) -> Result<(), LowerError> {
        let kids = self.children(stmt);
        if kids.len() != 2 {
            return Err(LowerError::MalformedAst {
                node: stmt,
                reason: "while requires a condition and a body".into(),
            });
        }
        let carried = self.loop_carried_names(kids[1]);

        let header = self.graph.create_node(Opcode::Label);
        let mut phis: Vec<(String, NodeId)> = Vec::new();
        for name in carried {
            let init = self
                .scopes
                .lookup(&name)
                .map(|b| b.node)
                .ok_or_else(|| LowerError::UndeclaredIdentifier { name: name.clone() })?;
            let phi = self.graph.create_node_with_inputs(Opcode::Phi, &[init]);
            self.scopes.rebind(&name, phi, BindingKind::Value);
            phis.push((name, phi));
        }

        let cond = self.lower_expr(kids[0])?;
        let branch = self.graph.create_node_with_inputs(Opcode::Branch, &[cond]);

        let body_label = self.graph.create_node(Opcode::Label);
        self.graph.push_input(branch, body_label)?;
        self.lower_block(kids[1])?;

        // Close each back-edge with the body's final definition, then make
        // the phi the visible definition after the loop.
        for (name, phi) in &phis {
            let latest = self
                .scopes
                .lookup(name)
                .map(|b| b.node)
                .ok_or_else(|| LowerError::UndeclaredIdentifier { name: name.clone() })?;
            self.graph.push_input(*phi, latest)?;
            self.scopes.assign(name, *phi);
        }
        self.graph.create_node_with_inputs(Opcode::Jump, &[header]);

        let exit = self.graph.create_node(Opcode::Label);
        self.graph.push_input(branch, exit)?;
        Ok(())
    }

    fn lower_for(&mut self, stmt: AstId) -> Result<(), LowerError> {
        let var = require_text(self.snapshot, stmt)?;
        let kids = self.children(stmt);
        if kids.len() != 2 || self.kind(kids[0]) != Some(AstKind::RangeExpr) {
            return Err(LowerError::MalformedAst {
                node: stmt,
                reason: "for requires a range and a body".into(),
            });
        }
        let range_kids = self.children(kids[0]);
        let inclusive = match self.snapshot.text(kids[0]) {
            Some("..") => true,
            Some("..<") => false,
            _ => {
                return Err(LowerError::MalformedAst {
                    node: kids[0],
                    reason: "unknown range operator".into(),
                })
            }
        };
        let start = self.lower_expr(range_kids[0])?;
        let end = self.lower_expr(range_kids[1])?;

        let carried = self.loop_carried_names(kids[1]);

        let header = self.graph.create_node(Opcode::Label);
        let phi = self.graph.create_node_with_inputs(Opcode::Phi, &[start]);
        let mut carried_phis: Vec<(String, NodeId)> = Vec::new();
        for name in carried {
            let init = self
                .scopes
                .lookup(&name)
                .map(|b| b.node)
                .ok_or_else(|| LowerError::UndeclaredIdentifier { name: name.clone() })?;
            let c_phi = self.graph.create_node_with_inputs(Opcode::Phi, &[init]);
            self.scopes.rebind(&name, c_phi, BindingKind::Value);
            carried_phis.push((name, c_phi));
        }

        let cmp_op = if inclusive {
            Opcode::LessEqual
        } else {
            Opcode::Less
        };
        let cmp = self.graph.create_node_with_inputs(cmp_op, &[phi, end]);
        let branch = self.graph.create_node_with_inputs(Opcode::Branch, &[cmp]);

        let body_label = self.graph.create_node(Opcode::Label);
        self.graph.push_input(branch, body_label)?;

        self.scopes.push();
        self.scopes.declare(
            var,
            Binding {
                node: phi,
                kind: BindingKind::Value,
                mutable: false,
            },
        );
        self.lower_block(kids[1])?;
        self.scopes.pop();

        let one = self.graph.create_constant(DataValue::Integer(1));
        let next = self.graph.create_node_with_inputs(Opcode::Add, &[phi, one]);
        self.graph.push_input(phi, next)?;
        for (name, c_phi) in &carried_phis {
            let latest = self
                .scopes
                .lookup(name)
                .map(|b| b.node)
                .ok_or_else(|| LowerError::UndeclaredIdentifier { name: name.clone() })?;
            self.graph.push_input(*c_phi, latest)?;
            self.scopes.assign(name, *c_phi);
        }
        self.graph.create_node_with_inputs(Opcode::Jump, &[header]);

        let exit = self.graph.create_node(Opcode::Label);
        self.graph.push_input(branch, exit)?;
        Ok(())
    }

    fn lower_match(&mut self, stmt: AstId) -> Result<(), LowerError> {
        let kids = self.children(stmt);
        if kids.is_empty() {
            return Err(LowerError::MalformedAst {
                node: stmt,
                reason: "match requires a scrutinee".into(),
            });
        }
        let scrutinee = self.lower_expr(kids[0])?;
        let mut end_jumps: Vec<NodeId> = Vec::new();

        for &arm in &kids[1..] {
            if self.kind(arm) != Some(AstKind::MatchArm) {
                return Err(LowerError::MalformedAst {
                    node: arm,
                    reason: "match arm expected".into(),
                });
            }
            let path = require_text(self.snapshot, arm)?;
            let (union_name, variant_name) =
                path.split_once('.').ok_or_else(|| LowerError::MalformedAst {
                    node: arm,
                    reason: format!("arm pattern '{}' is not Union.Variant", path),
                })?;
            let union = self
                .tables
                .unions
                .get(union_name)
                .ok_or_else(|| LowerError::UndeclaredIdentifier {
                    name: union_name.to_string(),
                })?;
            let variant_index =
                union
                    .variant_index(variant_name)
                    .ok_or_else(|| LowerError::UndeclaredIdentifier {
                        name: path.clone(),
                    })?;
            let field_count = union.variants[variant_index].fields.len();

            let arm_kids = self.children(arm);
            let (binders, body) = match arm_kids.split_last() {
                Some((&body, binders)) => (binders, body),
                None => {
                    return Err(LowerError::MalformedAst {
                        node: arm,
                        reason: "match arm requires a body".into(),
                    })
                }
            };
            if binders.len() != field_count {
                return Err(LowerError::ArityMismatch {
                    callee: path,
                    expected: field_count,
                    actual: binders.len(),
                });
            }

            let check = self
                .graph
                .create_node_with_inputs(Opcode::UnionTagCheck, &[scrutinee]);
            self.graph
                .set_data(check, DataValue::Integer(variant_index as i64))?;
            let branch = self.graph.create_node_with_inputs(Opcode::Branch, &[check]);

            let arm_label = self.graph.create_node(Opcode::Label);
            self.graph.push_input(branch, arm_label)?;

            self.scopes.push();
            for (field_index, &binder) in binders.iter().enumerate() {
                let binder_name = require_text(self.snapshot, binder)?;
                let extract = self
                    .graph
                    .create_node_with_inputs(Opcode::UnionPayloadExtract, &[scrutinee]);
                self.graph
                    .set_data(extract, DataValue::Integer(field_index as i64))?;
                self.scopes.declare(
                    binder_name,
                    Binding {
                        node: extract,
                        kind: BindingKind::Value,
                        mutable: false,
                    },
                );
            }
            if self.kind(body) == Some(AstKind::Block) {
                self.lower_block(body)?;
            } else {
                self.lower_expr(body)?;
            }
            self.scopes.pop();

            let jump = self.graph.create_node(Opcode::Jump);
            end_jumps.push(jump);

            // Failed check falls to the next arm's test (or the end).
            let next_label = self.graph.create_node(Opcode::Label);
            self.graph.push_input(branch, next_label)?;
        }

        let end = self.graph.create_node(Opcode::Label);
        for jump in end_jumps {
            self.graph.push_input(jump, end)?;
        }
        Ok(())
    }

    fn lower_nursery(&mut self, stmt: AstId) -> Result<(), LowerError> {
        let Some(&block) = self.children(stmt).first() else {
            return Err(LowerError::MalformedAst {
                node: stmt,
                reason: "nursery requires a block".into(),
            });
        };
        let begin = self.graph.create_node(Opcode::NurseryBegin);
        self.lower_block(block)?;
        self.graph
            .create_node_with_inputs(Opcode::NurseryEnd, &[begin]);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn lower_expr(&mut self, expr: AstId) -> Result<NodeId, LowerError> {
        match self.kind(expr) {
            Some(AstKind::LiteralInt) => {
                let value = parse_int(self.snapshot, expr)?;
                Ok(self.graph.create_constant(DataValue::Integer(value)))
            }
            Some(AstKind::LiteralFloat) => {
                let text = require_text(self.snapshot, expr)?;
                let value = text.parse::<f64>().map_err(|_| LowerError::MalformedAst {
                    node: expr,
                    reason: format!("unparsable float literal '{}'", text),
                })?;
                Ok(self.graph.create_constant(DataValue::Float(value)))
            }
            Some(AstKind::LiteralString) => {
                let text = require_text(self.snapshot, expr)?;
                Ok(self.graph.create_constant(DataValue::Str(text)))
            }
            Some(AstKind::LiteralBool) => {
                let text = require_text(self.snapshot, expr)?;
                Ok(self
                    .graph
                    .create_constant(DataValue::Boolean(text == "true")))
            }
            Some(AstKind::Identifier) => {
                let name = require_text(self.snapshot, expr)?;
                self.lower_ident(&name)
            }
            Some(AstKind::BinaryExpr) => self.lower_binary(expr),
            Some(AstKind::UnaryExpr) => self.lower_unary(expr),
            Some(AstKind::CallExpr) => self.lower_call(expr),
            Some(AstKind::FieldExpr) => self.lower_field(expr),
            Some(AstKind::IndexExpr) => {
                let kids = self.children(expr);
                let obj = self.lower_expr(kids[0])?;
                let idx = self.lower_expr(kids[1])?;
                Ok(self.graph.create_node_with_inputs(Opcode::Index, &[obj, idx]))
            }
            Some(AstKind::RangeExpr) => {
                let inclusive = match self.snapshot.text(expr) {
                    Some("..") => true,
                    Some("..<") => false,
                    _ => {
                        return Err(LowerError::MalformedAst {
                            node: expr,
                            reason: "unknown range operator".into(),
                        })
                    }
                };
                let kids = self.children(expr);
                let start = self.lower_expr(kids[0])?;
                let end = self.lower_expr(kids[1])?;
                let range = self
                    .graph
                    .create_node_with_inputs(Opcode::Range, &[start, end]);
                self.graph.set_data(range, DataValue::Boolean(inclusive))?;
                Ok(range)
            }
            Some(AstKind::ArrayLiteral) => {
                let mut elements = Vec::new();
                for &e in self.children(expr) {
                    elements.push(self.lower_expr(e)?);
                }
                Ok(self
                    .graph
                    .create_node_with_inputs(Opcode::ArrayConstruct, &elements))
            }
            Some(AstKind::StructLiteral) => self.lower_struct_literal(expr),
            Some(AstKind::FuncLit) => self.lower_func_lit(expr),
            Some(AstKind::AwaitExpr) => {
                let inner = self.lower_expr(self.children(expr)[0])?;
                Ok(self.graph.create_node_with_inputs(Opcode::Await, &[inner]))
            }
            Some(AstKind::AsyncExpr) => self.lower_task(expr, Opcode::AsyncCall),
            Some(AstKind::SpawnExpr) => self.lower_task(expr, Opcode::Spawn),
            _ => Err(LowerError::MalformedAst {
                node: expr,
                reason: "expression expected".into(),
            }),
        }
    }

    fn lower_ident(&mut self, name: &str) -> Result<NodeId, LowerError> {
        if let Some(binding) = self.scopes.lookup(name).cloned() {
            return match binding.kind {
                BindingKind::Slot => Ok(self
                    .graph
                    .create_node_with_inputs(Opcode::Load, &[binding.node])),
                BindingKind::EnvCapture { index, by_ptr } => {
                    let env = self.graph.create_node(Opcode::ClosureEnvLoad);
                    self.graph.set_data(env, DataValue::Integer(index as i64))?;
                    if by_ptr {
                        Ok(self.graph.create_node_with_inputs(Opcode::Load, &[env]))
                    } else {
                        Ok(env)
                    }
                }
                _ => Ok(binding.node),
            };
        }
        // A bare function name is a reference to it.
        if self.tables.functions.contains_key(name) {
            let fn_ref = self.graph.create_node(Opcode::FnRef);
            self.graph.set_data(fn_ref, DataValue::Str(name.into()))?;
            self.fn_refs.insert(fn_ref, name.to_string());
            return Ok(fn_ref);
        }
        Err(LowerError::UndeclaredIdentifier { name: name.into() })
    }

    fn lower_binary(&mut self, expr: AstId) -> Result<NodeId, LowerError> {
        let op_text = require_text(self.snapshot, expr)?;
        let kids = self.children(expr);
        if kids.len() != 2 {
            return Err(LowerError::MalformedAst {
                node: expr,
                reason: "binary operator requires two operands".into(),
            });
        }
        let lhs = self.lower_expr(kids[0])?;
        let rhs = self.lower_expr(kids[1])?;

        // `@` is tensor contraction sugar and forces NPU tenancy on the
        // produced node.
        if op_text == "@" {
            let node = self
                .graph
                .create_node_with_inputs(Opcode::TensorMatmul, &[lhs, rhs]);
            self.graph.set_tenancy(node, Tenancy::NpuTensor)?;
            return Ok(node);
        }

        let op = match op_text.as_str() {
            "+" => Opcode::Add,
            "-" => Opcode::Sub,
            "*" => Opcode::Mul,
            "/" => Opcode::Div,
            "%" => Opcode::Mod,
            "==" => Opcode::Equal,
            "!=" => Opcode::NotEqual,
            "<" => Opcode::Less,
            "<=" => Opcode::LessEqual,
            ">" => Opcode::Greater,
            ">=" => Opcode::GreaterEqual,
            "&" => Opcode::BitAnd,
            "|" => Opcode::BitOr,
            "^" => Opcode::Xor,
            "<<" => Opcode::Shl,
            ">>" => Opcode::Shr,
            other => {
                return Err(LowerError::MalformedAst {
                    node: expr,
                    reason: format!("unknown binary operator '{}'", other),
                })
            }
        };
        Ok(self.graph.create_node_with_inputs(op, &[lhs, rhs]))
    }

    fn lower_unary(&mut self, expr: AstId) -> Result<NodeId, LowerError> {
        let op_text = require_text(self.snapshot, expr)?;
        let operand = self.lower_expr(self.children(expr)[0])?;
        match op_text.as_str() {
            "-" => {
                let zero = self.graph.create_constant(DataValue::Integer(0));
                Ok(self
                    .graph
                    .create_node_with_inputs(Opcode::Sub, &[zero, operand]))
            }
            "!" | "~" => Ok(self
                .graph
                .create_node_with_inputs(Opcode::BitNot, &[operand])),
            other => Err(LowerError::MalformedAst {
                node: expr,
                reason: format!("unknown unary operator '{}'", other),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    fn lower_call(&mut self, expr: AstId) -> Result<NodeId, LowerError> {
        let kids = self.children(expr);
        let callee = kids[0];
        let arg_asts = &kids[1..];

        match self.kind(callee) {
            Some(AstKind::Identifier) => {
                let name = require_text(self.snapshot, callee)?;
                self.lower_named_call(&name, arg_asts)
            }
            Some(AstKind::FieldExpr) => self.lower_method_call(callee, arg_asts),
            _ => {
                // Calling an arbitrary expression works only for closure
                // values.
                let value = self.lower_expr(callee)?;
                if self.closures.contains_key(&value) {
                    let args = self.lower_args(arg_asts)?;
                    let mut inputs = vec![value];
                    inputs.extend(args);
                    Ok(self
                        .graph
                        .create_node_with_inputs(Opcode::ClosureCall, &inputs))
                } else {
                    Err(LowerError::MalformedAst {
                        node: callee,
                        reason: "expression is not callable".into(),
                    })
                }
            }
        }
    }

    fn lower_named_call(
        &mut self,
        name: &str,
        arg_asts: &[AstId],
    ) -> Result<NodeId, LowerError> {
        if let Some(binding) = self.scopes.lookup(name).cloned() {
            match binding.kind {
                BindingKind::Closure { function } => {
                    self.check_arity(&function, arg_asts.len())?;
                    let args = self.lower_args(arg_asts)?;
                    let mut inputs = vec![binding.node];
                    inputs.extend(args);
                    return Ok(self
                        .graph
                        .create_node_with_inputs(Opcode::ClosureCall, &inputs));
                }
                BindingKind::FnRef { function } => {
                    self.check_arity(&function, arg_asts.len())?;
                    let args = self.lower_args(arg_asts)?;
                    let call = self.graph.create_call(&args);
                    self.graph.set_data(call, DataValue::Str(function))?;
                    return Ok(call);
                }
                _ => {
                    return Err(LowerError::UndeclaredIdentifier {
                        name: name.to_string(),
                    })
                }
            }
        }

        // Locally lowered function.
        if self.tables.functions.contains_key(name) {
            self.check_arity(name, arg_asts.len())?;
            let args = self.lower_args(arg_asts)?;
            let call = self.graph.create_call(&args);
            self.graph.set_data(call, DataValue::Str(name.into()))?;
            return Ok(call);
        }

        // Registered extern, or a builtin surfaced without its runtime
        // prefix (print -> janus_print).
        let extern_name = if self.tables.externs.contains(name) {
            Some(name.to_string())
        } else {
            let prefixed = format!("janus_{}", name);
            self.tables.externs.contains(&prefixed).then_some(prefixed)
        };
        if let Some(extern_name) = extern_name {
            if let Some(sig) = self.tables.externs.get(&extern_name) {
                if !sig.variadic && sig.params.len() != arg_asts.len() {
                    return Err(LowerError::ArityMismatch {
                        callee: extern_name,
                        expected: sig.params.len(),
                        actual: arg_asts.len(),
                    });
                }
            }
            let args = self.lower_args(arg_asts)?;
            let call = self.graph.create_call(&args);
            self.graph.set_data(call, DataValue::Str(extern_name))?;
            return Ok(call);
        }

        Err(LowerError::UndeclaredIdentifier {
            name: name.to_string(),
        })
    }

    fn lower_method_call(
        &mut self,
        callee: AstId,
        arg_asts: &[AstId],
    ) -> Result<NodeId, LowerError> {
        let method = require_text(self.snapshot, callee)?;
        let obj_ast = self.children(callee)[0];

        // `Type.Trait(expr)` constructs a trait object when (Trait, Type)
        // has an impl and `Type` is not shadowed by a local binding.
        if self.kind(obj_ast) == Some(AstKind::Identifier) {
            let base = require_text(self.snapshot, obj_ast)?;
            if self.scopes.lookup(&base).is_none()
                && self
                    .tables
                    .impls
                    .contains_key(&impl_key(Some(method.as_str()), &base))
            {
                if arg_asts.len() != 1 {
                    return Err(LowerError::ArityMismatch {
                        callee: format!("{}.{}", base, method),
                        expected: 1,
                        actual: arg_asts.len(),
                    });
                }
                let data = self.lower_expr(arg_asts[0])?;
                let fat = self
                    .graph
                    .create_node_with_inputs(Opcode::VtableConstruct, &[data]);
                self.graph
                    .set_data(fat, DataValue::Str(format!("{}_{}", base, method)))?;
                self.trait_objects.insert(fat, method);
                return Ok(fat);
            }
        }

        let obj = self.lower_expr(obj_ast)?;

        // Dynamic dispatch through a fat pointer.
        if let Some(trait_name) = self.node_trait(obj_ast, obj) {
            let trait_info = self.tables.traits.get(&trait_name).ok_or_else(|| {
                LowerError::UndeclaredIdentifier {
                    name: trait_name.clone(),
                }
            })?;
            let slot = trait_info
                .slot(&method)
                .ok_or_else(|| LowerError::UndeclaredIdentifier {
                    name: method.clone(),
                })?;
            let expected = trait_info.methods[slot].arity;
            if expected != arg_asts.len() + 1 {
                return Err(LowerError::ArityMismatch {
                    callee: method,
                    expected: expected.saturating_sub(1),
                    actual: arg_asts.len(),
                });
            }
            let args = self.lower_args(arg_asts)?;
            let mut inputs = vec![obj];
            inputs.extend(args);
            let lookup = self
                .graph
                .create_node_with_inputs(Opcode::VtableLookup, &inputs);
            self.graph
                .set_data(lookup, DataValue::Integer(slot as i64))?;
            return Ok(lookup);
        }

        // Static dispatch on a value with a known nominal type.
        if let Some(type_name) = self.node_record_type(obj_ast, obj) {
            let graph_name = self.resolve_static_method(&type_name, &method)?;
            self.check_arity(&graph_name, arg_asts.len() + 1)?;
            let args = self.lower_args(arg_asts)?;
            let mut inputs = vec![obj];
            inputs.extend(args);
            let call = self.graph.create_call(&inputs);
            self.graph.set_data(call, DataValue::Str(graph_name))?;
            return Ok(call);
        }

        Err(LowerError::UndeclaredIdentifier { name: method })
    }

    /// `Type_method` from an inherent impl, else the unique trait impl
    /// providing the method.
    fn resolve_static_method(
        &self,
        type_name: &str,
        method: &str,
    ) -> Result<String, LowerError> {
        if let Some(info) = self.tables.impls.get(&impl_key(None, type_name)) {
            if let Some(graph_name) = info.methods.get(method) {
                return Ok(graph_name.clone());
            }
        }
        for info in self.tables.impls.values() {
            if info.type_name == type_name {
                if let Some(graph_name) = info.methods.get(method) {
                    return Ok(graph_name.clone());
                }
            }
        }
        Err(LowerError::UndeclaredIdentifier {
            name: method.to_string(),
        })
    }

    fn lower_task(&mut self, expr: AstId, op: Opcode) -> Result<NodeId, LowerError> {
        let Some(&call) = self.children(expr).first() else {
            return Err(LowerError::MalformedAst {
                node: expr,
                reason: "async/spawn requires a call".into(),
            });
        };
        if self.kind(call) != Some(AstKind::CallExpr) {
            return Err(LowerError::MalformedAst {
                node: call,
                reason: "async/spawn target must be a call".into(),
            });
        }
        let kids = self.children(call);
        let callee = kids[0];
        if self.kind(callee) != Some(AstKind::Identifier) {
            return Err(LowerError::MalformedAst {
                node: callee,
                reason: "async/spawn target must be a named function".into(),
            });
        }
        let name = require_text(self.snapshot, callee)?;
        if !self.tables.functions.contains_key(&name) && !self.tables.externs.contains(&name) {
            return Err(LowerError::UndeclaredIdentifier { name });
        }
        if self.tables.functions.contains_key(&name) {
            self.check_arity(&name, kids.len() - 1)?;
        }
        let args = self.lower_args(&kids[1..])?;
        let task = self.graph.create_node_with_inputs(op, &args);
        self.graph.set_data(task, DataValue::Str(name))?;
        Ok(task)
    }

    fn lower_args(&mut self, arg_asts: &[AstId]) -> Result<Vec<NodeId>, LowerError> {
        let mut args = Vec::with_capacity(arg_asts.len());
        for &a in arg_asts {
            args.push(self.lower_expr(a)?);
        }
        Ok(args)
    }

    fn check_arity(&self, function: &str, actual: usize) -> Result<(), LowerError> {
        if let Some(sig) = self.tables.functions.get(function) {
            if sig.params.len() != actual {
                return Err(LowerError::ArityMismatch {
                    callee: function.to_string(),
                    expected: sig.params.len(),
                    actual,
                });
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Field access, enum constants, union constructs
    // -----------------------------------------------------------------------

    fn lower_field(&mut self, expr: AstId) -> Result<NodeId, LowerError> {
        let field = require_text(self.snapshot, expr)?;
        let obj_ast = self.children(expr)[0];

        if self.kind(obj_ast) == Some(AstKind::Identifier) {
            let base = require_text(self.snapshot, obj_ast)?;
            if self.scopes.lookup(&base).is_none() {
                // Enum constant: the variant's assigned discriminant.
                if let Some(info) = self.tables.enums.get(&base) {
                    let value = *info.variants.get(&field).ok_or_else(|| {
                        LowerError::UndeclaredIdentifier {
                            name: format!("{}.{}", base, field),
                        }
                    })?;
                    return Ok(self.graph.create_constant(DataValue::Integer(value)));
                }
                // Unit union variant.
                if let Some(info) = self.tables.unions.get(&base) {
                    let index = info.variant_index(&field).ok_or_else(|| {
                        LowerError::UndeclaredIdentifier {
                            name: format!("{}.{}", base, field),
                        }
                    })?;
                    let field_count = info.variants[index].fields.len();
                    if field_count != 0 {
                        return Err(LowerError::ArityMismatch {
                            callee: format!("{}.{}", base, field),
                            expected: field_count,
                            actual: 0,
                        });
                    }
                    let construct = self.graph.create_node(Opcode::UnionConstruct);
                    self.graph
                        .set_data(construct, DataValue::Integer(index as i64))?;
                    return Ok(construct);
                }
                return Err(LowerError::UndeclaredIdentifier { name: base });
            }
        }

        let obj = self.lower_expr(obj_ast)?;
        let index = self.field_index(Some(obj_ast), obj, &field)?;
        let access = self
            .graph
            .create_node_with_inputs(Opcode::FieldAccess, &[obj]);
        self.graph
            .set_data(access, DataValue::Integer(index as i64))?;
        Ok(access)
    }

    fn lower_struct_literal(&mut self, expr: AstId) -> Result<NodeId, LowerError> {
        let path = require_text(self.snapshot, expr)?;
        let kids = self.children(expr);

        // Field-wrapper children: field_expr(text = field name, child = value).
        let mut written: Vec<(String, AstId)> = Vec::with_capacity(kids.len());
        for &f in kids {
            if self.kind(f) != Some(AstKind::FieldExpr) {
                return Err(LowerError::MalformedAst {
                    node: f,
                    reason: "struct literal field expected".into(),
                });
            }
            let field_name = require_text(self.snapshot, f)?;
            let value = self.children(f)[0];
            written.push((field_name, value));
        }

        if let Some((union_name, variant_name)) = path.split_once('.') {
            let union = self
                .tables
                .unions
                .get(union_name)
                .ok_or_else(|| LowerError::UndeclaredIdentifier {
                    name: union_name.to_string(),
                })?;
            let index =
                union
                    .variant_index(variant_name)
                    .ok_or_else(|| LowerError::UndeclaredIdentifier {
                        name: path.clone(),
                    })?;
            let fields = union.variants[index].fields.clone();
            if written.len() != fields.len() {
                return Err(LowerError::ArityMismatch {
                    callee: path,
                    expected: fields.len(),
                    actual: written.len(),
                });
            }
            // Inputs follow the variant's declared field order.
            let mut inputs = Vec::with_capacity(fields.len());
            for f in &fields {
                let (_, value_ast) = written
                    .iter()
                    .find(|(name, _)| name == &f.name)
                    .ok_or_else(|| LowerError::UndeclaredIdentifier {
                        name: f.name.clone(),
                    })?;
                inputs.push(self.lower_expr(*value_ast)?);
            }
            let construct = self
                .graph
                .create_node_with_inputs(Opcode::UnionConstruct, &inputs);
            self.graph
                .set_data(construct, DataValue::Integer(index as i64))?;
            return Ok(construct);
        }

        // Plain record: fields in written order define the layout.
        let mut field_names = Vec::with_capacity(written.len());
        let mut inputs = Vec::with_capacity(written.len());
        for (name, value_ast) in written {
            field_names.push(name);
            inputs.push(self.lower_expr(value_ast)?);
        }
        let construct = self
            .graph
            .create_node_with_inputs(Opcode::StructConstruct, &inputs);
        self.records.insert(construct, (path, field_names));
        Ok(construct)
    }

    fn field_index(
        &self,
        obj_ast: Option<AstId>,
        obj: NodeId,
        field: &str,
    ) -> Result<usize, LowerError> {
        if let Some((_, fields)) = self.records.get(&obj) {
            return fields
                .iter()
                .position(|f| f == field)
                .ok_or_else(|| LowerError::UndeclaredIdentifier {
                    name: field.to_string(),
                });
        }
        if let Some(ast) = obj_ast {
            if self.kind(ast) == Some(AstKind::Identifier) {
                let name = require_text(self.snapshot, ast)?;
                if let Some(Binding {
                    kind: BindingKind::Record { fields, .. },
                    ..
                }) = self.scopes.lookup(&name)
                {
                    return fields
                        .iter()
                        .position(|f| f == field)
                        .ok_or_else(|| LowerError::UndeclaredIdentifier {
                            name: field.to_string(),
                        });
                }
            }
        }
        Err(LowerError::UndeclaredIdentifier {
            name: field.to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // Provenance helpers
    // -----------------------------------------------------------------------

    fn provenance_of(&self, node: NodeId) -> BindingKind {
        if let Some(function) = self.closures.get(&node) {
            return BindingKind::Closure {
                function: function.clone(),
            };
        }
        if let Some(function) = self.fn_refs.get(&node) {
            return BindingKind::FnRef {
                function: function.clone(),
            };
        }
        if let Some(trait_name) = self.trait_objects.get(&node) {
            return BindingKind::TraitObject {
                trait_name: trait_name.clone(),
            };
        }
        if let Some((type_name, fields)) = self.records.get(&node) {
            return BindingKind::Record {
                type_name: type_name.clone(),
                fields: fields.clone(),
            };
        }
        BindingKind::Value
    }

    fn node_trait(&self, obj_ast: AstId, node: NodeId) -> Option<String> {
        if let Some(t) = self.trait_objects.get(&node) {
            return Some(t.clone());
        }
        if self.kind(obj_ast) == Some(AstKind::Identifier) {
            let name = self.snapshot.text(obj_ast)?;
            if let Some(Binding {
                kind: BindingKind::TraitObject { trait_name },
                ..
            }) = self.scopes.lookup(name)
            {
                return Some(trait_name.clone());
            }
        }
        None
    }

    fn node_record_type(&self, obj_ast: AstId, node: NodeId) -> Option<String> {
        if let Some((type_name, _)) = self.records.get(&node) {
            return Some(type_name.clone());
        }
        if self.kind(obj_ast) == Some(AstKind::Identifier) {
            let name = self.snapshot.text(obj_ast)?;
            if let Some(Binding {
                kind: BindingKind::Record { type_name, .. },
                ..
            }) = self.scopes.lookup(name)
            {
                return Some(type_name.clone());
            }
        }
        None
    }

    // -----------------------------------------------------------------------
    // Closures
    // -----------------------------------------------------------------------

    fn lower_func_lit(&mut self, expr: AstId) -> Result<NodeId, LowerError> {
        let (params, return_type, block) = func_signature(self.snapshot, expr, None)?;
        let block = block.ok_or_else(|| LowerError::MalformedAst {
            node: expr,
            reason: "function literal requires a body".into(),
        })?;

        let free = self.free_identifiers(block, &params);
        let writes = self.assigned_names(block);

        let mut specs: Vec<CaptureSpec> = Vec::new();
        let mut inputs: Vec<NodeId> = Vec::new();
        for name in free {
            let binding = self
                .scopes
                .lookup(&name)
                .cloned()
                .ok_or_else(|| LowerError::UndeclaredIdentifier { name: name.clone() })?;
            let written = writes.contains(&name);
            let (input, by_ptr) = match binding.kind {
                // A mutable binding the body writes is captured as a
                // pointer to its slot; otherwise its current value.
                BindingKind::Slot => {
                    if written {
                        (binding.node, true)
                    } else {
                        let load = self
                            .graph
                            .create_node_with_inputs(Opcode::Load, &[binding.node]);
                        (load, false)
                    }
                }
                BindingKind::EnvCapture {
                    index,
                    by_ptr: true,
                } if written => {
                    let env = self.graph.create_node(Opcode::ClosureEnvLoad);
                    self.graph.set_data(env, DataValue::Integer(index as i64))?;
                    (env, true)
                }
                BindingKind::EnvCapture { .. } => (self.lower_ident(&name)?, false),
                _ => (binding.node, false),
            };
            specs.push(CaptureSpec { name, by_ptr });
            inputs.push(input);
        }

        let fn_name = self.tables.next_closure_name();
        self.tables.functions.insert(
            fn_name.clone(),
            FuncSig {
                params: params.clone(),
                return_type: return_type.clone(),
            },
        );

        let lifted = lower_function(
            self.snapshot,
            self.tables,
            &fn_name,
            params,
            return_type,
            specs,
            Some(block),
        )?;
        self.tables.lifted.push(lifted);

        if inputs.is_empty() {
            let fn_ref = self.graph.create_node(Opcode::FnRef);
            self.graph
                .set_data(fn_ref, DataValue::Str(fn_name.clone()))?;
            self.fn_refs.insert(fn_ref, fn_name);
            Ok(fn_ref)
        } else {
            let create = self
                .graph
                .create_node_with_inputs(Opcode::ClosureCreate, &inputs);
            self.graph
                .set_data(create, DataValue::Str(fn_name.clone()))?;
            self.closures.insert(create, fn_name);
            Ok(create)
        }
    }

    /// Free identifiers of a function literal's body: referenced names
    /// minus its parameters, its own local bindings, and unit-global
    /// names -- in first-reference order.
    fn free_identifiers(&self, block: AstId, params: &[Parameter]) -> Vec<String> {
        let mut declared: Vec<HashSet<String>> = vec![params
            .iter()
            .map(|p| p.name.clone())
            .collect()];
        let mut free: Vec<String> = Vec::new();
        self.walk_free(block, &mut declared, &mut free);
        free
    }

    fn is_global(&self, name: &str) -> bool {
        self.tables.functions.contains_key(name)
            || self.tables.externs.contains(name)
            || self.tables.externs.contains(&format!("janus_{}", name))
            || self.tables.enums.contains_key(name)
            || self.tables.unions.contains_key(name)
            || self.tables.traits.contains_key(name)
    }

    fn walk_free(
        &self,
        node: AstId,
        declared: &mut Vec<HashSet<String>>,
        free: &mut Vec<String>,
    ) {
        match self.kind(node) {
            Some(AstKind::Identifier) => {
                let Some(name) = self.snapshot.text(node) else {
                    return;
                };
                let bound = declared.iter().any(|s| s.contains(name));
                if !bound
                    && !self.is_global(name)
                    && self.scopes.lookup(name).is_some()
                    && !free.iter().any(|f| f == name)
                {
                    free.push(name.to_string());
                }
            }
            Some(AstKind::LetStmt) | Some(AstKind::VarStmt) => {
                for &c in self.children(node) {
                    self.walk_free(c, declared, free);
                }
                if let (Some(name), Some(scope)) = (self.snapshot.text(node), declared.last_mut())
                {
                    scope.insert(name.to_string());
                }
            }
            Some(AstKind::Block) => {
                declared.push(HashSet::new());
                for &c in self.children(node) {
                    self.walk_free(c, declared, free);
                }
                declared.pop();
            }
            Some(AstKind::ForStmt) => {
                let kids = self.children(node);
                if let Some(&range) = kids.first() {
                    self.walk_free(range, declared, free);
                }
                declared.push(HashSet::new());
                if let (Some(name), Some(scope)) = (self.snapshot.text(node), declared.last_mut())
                {
                    scope.insert(name.to_string());
                }
                if let Some(&body) = kids.get(1) {
                    self.walk_free(body, declared, free);
                }
                declared.pop();
            }
            Some(AstKind::MatchArm) => {
                declared.push(HashSet::new());
                let kids = self.children(node);
                if let Some((&body, binders)) = kids.split_last() {
                    for &b in binders {
                        if let (Some(name), Some(scope)) =
                            (self.snapshot.text(b), declared.last_mut())
                        {
                            scope.insert(name.to_string());
                        }
                    }
                    self.walk_free(body, declared, free);
                }
                declared.pop();
            }
            Some(AstKind::FuncLit) => {
                declared.push(HashSet::new());
                for &c in self.children(node) {
                    if self.kind(c) == Some(AstKind::Param) {
                        if let (Some(name), Some(scope)) =
                            (self.snapshot.text(c), declared.last_mut())
                        {
                            scope.insert(name.to_string());
                        }
                    }
                }
                for &c in self.children(node) {
                    if self.kind(c) == Some(AstKind::Block) {
                        self.walk_free(c, declared, free);
                    }
                }
                declared.pop();
            }
            _ => {
                for &c in self.children(node) {
                    self.walk_free(c, declared, free);
                }
            }
        }
    }

    /// Names assigned (`=`) somewhere in a statement subtree, excluding
    /// names the subtree itself declares. Drives both loop-carried Phi
    /// placement and the mutable-capture decision.
    fn assigned_names(&self, node: AstId) -> Vec<String> {
        let mut declared: Vec<HashSet<String>> = vec![HashSet::new()];
        let mut out: Vec<String> = Vec::new();
        self.walk_assigned(node, &mut declared, &mut out);
        out
    }

    fn walk_assigned(
        &self,
        node: AstId,
        declared: &mut Vec<HashSet<String>>,
        out: &mut Vec<String>,
    ) {
        match self.kind(node) {
            Some(AstKind::BinaryExpr) if self.snapshot.text(node) == Some("=") => {
                let kids = self.children(node);
                if let Some(&lhs) = kids.first() {
                    if self.kind(lhs) == Some(AstKind::Identifier) {
                        if let Some(name) = self.snapshot.text(lhs) {
                            let local = declared.iter().any(|s| s.contains(name));
                            if !local && !out.iter().any(|o| o == name) {
                                out.push(name.to_string());
                            }
                        }
                    }
                }
                if let Some(&rhs) = kids.get(1) {
                    self.walk_assigned(rhs, declared, out);
                }
            }
            Some(AstKind::LetStmt) | Some(AstKind::VarStmt) => {
                for &c in self.children(node) {
                    self.walk_assigned(c, declared, out);
                }
                if let (Some(name), Some(scope)) = (self.snapshot.text(node), declared.last_mut())
                {
                    scope.insert(name.to_string());
                }
            }
            Some(AstKind::Block) => {
                declared.push(HashSet::new());
                for &c in self.children(node) {
                    self.walk_assigned(c, declared, out);
                }
                declared.pop();
            }
            Some(AstKind::ForStmt) => {
                declared.push(HashSet::new());
                if let (Some(name), Some(scope)) = (self.snapshot.text(node), declared.last_mut())
                {
                    scope.insert(name.to_string());
                }
                for &c in self.children(node) {
                    self.walk_assigned(c, declared, out);
                }
                declared.pop();
            }
            _ => {
                for &c in self.children(node) {
                    self.walk_assigned(c, declared, out);
                }
            }
        }
    }

    /// Names the loop body assigns that resolve to a plain SSA binding in
    /// an enclosing scope; these need header Phis. `var` bindings flow
    /// through their slot and need none.
    fn loop_carried_names(&self, body: AstId) -> Vec<String> {
        self.assigned_names(body)
            .into_iter()
            .filter(|name| {
                matches!(
                    self.scopes.lookup(name),
                    Some(Binding {
                        kind: BindingKind::Value,
                        ..
                    })
                )
            })
            .collect()
    }
}
