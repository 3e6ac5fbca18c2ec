//! Lowering tests: source-shaped AST snapshots in, function graphs out.

use janus_ir::types::{DataValue, Tenancy};
use janus_ir::validate::validate;
use janus_ir::Opcode;
use janus_lower::ast::{AstId, AstKind, SnapshotBuilder, UnitId};
use janus_lower::{lower_unit, LowerError, LoweredUnit};

// ---------------------------------------------------------------------------
// Fixture helpers
// ---------------------------------------------------------------------------

fn func_decl(
    b: &mut SnapshotBuilder,
    name: &str,
    params: &[(&str, Option<&str>)],
    ret: Option<&str>,
    stmts: &[AstId],
) -> AstId {
    let mut kids = Vec::new();
    for (pname, ptype) in params {
        let tr: Vec<AstId> = ptype
            .map(|t| b.leaf(AstKind::TypeRef, Some(t)))
            .into_iter()
            .collect();
        kids.push(b.node(AstKind::Param, Some(pname), &tr));
    }
    if let Some(r) = ret {
        kids.push(b.leaf(AstKind::TypeRef, Some(r)));
    }
    let block = b.node(AstKind::Block, None, stmts);
    kids.push(block);
    b.node(AstKind::FuncDecl, Some(name), &kids)
}

fn ret(b: &mut SnapshotBuilder, expr: AstId) -> AstId {
    b.node(AstKind::ReturnStmt, None, &[expr])
}

fn binary(b: &mut SnapshotBuilder, op: &str, lhs: AstId, rhs: AstId) -> AstId {
    b.node(AstKind::BinaryExpr, Some(op), &[lhs, rhs])
}

fn field(b: &mut SnapshotBuilder, base: &str, member: &str) -> AstId {
    let obj = b.ident(base);
    b.node(AstKind::FieldExpr, Some(member), &[obj])
}

fn lower(b: SnapshotBuilder, root: AstId) -> LoweredUnit {
    lower_unit(&b.build(root), UnitId(0)).expect("lowering failed")
}

fn ops(unit: &LoweredUnit, graph: &str) -> Vec<Opcode> {
    unit.graph(graph)
        .unwrap_or_else(|| panic!("graph '{}' missing", graph))
        .nodes()
        .iter()
        .map(|n| n.op)
        .collect()
}

/// Every value operand must reference a lower id. Exemptions: Phi
/// back-edges and label operands of Branch/Jump.
fn assert_value_operands_precede(unit: &LoweredUnit) {
    for graph in &unit.graphs {
        for node in graph.nodes() {
            for (slot, &input) in node.inputs.iter().enumerate() {
                let is_label_operand = match node.op {
                    Opcode::Jump => slot == 0,
                    Opcode::Branch => slot >= 1,
                    _ => false,
                };
                if is_label_operand || (node.op == Opcode::Phi && input > node.id) {
                    continue;
                }
                assert!(
                    input < node.id,
                    "graph '{}': node {} ({:?}) has forward value operand {}",
                    graph.function_name,
                    node.id,
                    node.op,
                    input
                );
            }
        }
    }
}

fn assert_all_valid(unit: &LoweredUnit) {
    for graph in &unit.graphs {
        let report = validate(graph);
        assert!(
            !report.has_errors(),
            "graph '{}' has validation errors: {:?}",
            graph.function_name,
            report.diagnostics
        );
    }
}

// ---------------------------------------------------------------------------
// Scenario 1: constant folding fodder
// ---------------------------------------------------------------------------

#[test]
fn add_of_two_constants() {
    // func main() -> i32 do return 1 + 2 end
    let mut b = SnapshotBuilder::new();
    let one = b.int(1);
    let two = b.int(2);
    let sum = binary(&mut b, "+", one, two);
    let r = ret(&mut b, sum);
    let main = func_decl(&mut b, "main", &[], Some("i32"), &[r]);
    let file = b.node(AstKind::SourceFile, None, &[main]);
    let unit = lower(b, file);

    assert_eq!(unit.graphs.len(), 1);
    let graph = unit.graph("main").unwrap();
    assert_eq!(graph.return_type, "i32");

    let add = graph
        .nodes()
        .iter()
        .find(|n| n.op == Opcode::Add)
        .expect("no Add node");
    let lhs = graph.node(add.inputs[0]).unwrap();
    let rhs = graph.node(add.inputs[1]).unwrap();
    assert_eq!(lhs.op, Opcode::Constant);
    assert_eq!(lhs.data, Some(DataValue::Integer(1)));
    assert_eq!(rhs.data, Some(DataValue::Integer(2)));

    assert_value_operands_precede(&unit);
    assert_all_valid(&unit);
}

#[test]
fn function_without_return_returns_zero() {
    let mut b = SnapshotBuilder::new();
    let main = func_decl(&mut b, "main", &[], None, &[]);
    let file = b.node(AstKind::SourceFile, None, &[main]);
    let unit = lower(b, file);

    let graph = unit.graph("main").unwrap();
    let last = graph.nodes().last().unwrap();
    assert_eq!(last.op, Opcode::Return);
    let value = graph.node(last.inputs[0]).unwrap();
    assert_eq!(value.data, Some(DataValue::Integer(0)));
}

// ---------------------------------------------------------------------------
// Scenario 2: enums
// ---------------------------------------------------------------------------

fn color_enum(b: &mut SnapshotBuilder) -> AstId {
    let red = b.leaf(AstKind::EnumVariant, Some("Red"));
    let green = b.leaf(AstKind::EnumVariant, Some("Green"));
    let blue = b.leaf(AstKind::EnumVariant, Some("Blue"));
    b.node(AstKind::EnumDecl, Some("Color"), &[red, green, blue])
}

#[test]
fn enum_variant_lowers_to_its_discriminant() {
    // enum Color { Red, Green, Blue }  return Color.Green
    let mut b = SnapshotBuilder::new();
    let color = color_enum(&mut b);
    let green = field(&mut b, "Color", "Green");
    let r = ret(&mut b, green);
    let main = func_decl(&mut b, "main", &[], Some("i32"), &[r]);
    let file = b.node(AstKind::SourceFile, None, &[color, main]);
    let unit = lower(b, file);

    let graph = unit.graph("main").unwrap();
    assert!(graph
        .nodes()
        .iter()
        .any(|n| n.op == Opcode::Constant && n.data == Some(DataValue::Integer(1))));
    assert_eq!(unit.enums["Color"].variants["Blue"], 2);
}

proptest::proptest! {
    /// An explicit `=N` resets the discriminant counter; implicit
    /// variants continue from N+1 regardless of where the override sits.
    #[test]
    fn discriminants_continue_after_any_override(start in 0i64..10_000, tail in 1usize..6) {
        let mut b = SnapshotBuilder::new();
        let first = b.leaf(AstKind::EnumVariant, Some("V0"));
        let lit = b.int(start);
        let explicit = b.node(AstKind::EnumVariant, Some("V1"), &[lit]);
        let mut variants = vec![first, explicit];
        for i in 0..tail {
            let name = format!("T{}", i);
            variants.push(b.leaf(AstKind::EnumVariant, Some(name.as_str())));
        }
        let decl = b.node(AstKind::EnumDecl, Some("E"), &variants);
        let file = b.node(AstKind::SourceFile, None, &[decl]);
        let unit = lower_unit(&b.build(file), UnitId(0)).expect("lowering failed");

        let info = &unit.enums["E"];
        proptest::prop_assert_eq!(info.variants["V0"], 0);
        proptest::prop_assert_eq!(info.variants["V1"], start);
        for i in 0..tail {
            proptest::prop_assert_eq!(info.variants[&format!("T{}", i)], start + 1 + i as i64);
        }
    }
}

#[test]
fn explicit_discriminants_override_and_continue() {
    // enum Status { Ok, Failed = 10, Retry }  -- Retry continues at 11.
    let mut b = SnapshotBuilder::new();
    let ok = b.leaf(AstKind::EnumVariant, Some("Ok"));
    let ten = b.int(10);
    let failed = b.node(AstKind::EnumVariant, Some("Failed"), &[ten]);
    let retry = b.leaf(AstKind::EnumVariant, Some("Retry"));
    let decl = b.node(AstKind::EnumDecl, Some("Status"), &[ok, failed, retry]);
    let file = b.node(AstKind::SourceFile, None, &[decl]);
    let unit = lower(b, file);

    let info = &unit.enums["Status"];
    assert_eq!(info.variants["Ok"], 0);
    assert_eq!(info.variants["Failed"], 10);
    assert_eq!(info.variants["Retry"], 11);
}

// ---------------------------------------------------------------------------
// Scenario 3: unions and match
// ---------------------------------------------------------------------------

fn option_union(b: &mut SnapshotBuilder) -> AstId {
    let tr = b.leaf(AstKind::TypeRef, Some("i32"));
    let value_field = b.node(AstKind::Param, Some("value"), &[tr]);
    let some = b.node(AstKind::UnionVariant, Some("Some"), &[value_field]);
    let none = b.leaf(AstKind::UnionVariant, Some("None"));
    b.node(AstKind::UnionDecl, Some("Option"), &[some, none])
}

#[test]
fn union_construct_and_match() {
    // let x = Option.Some { value: 42 }
    // match x { Option.Some { value: v } => v, Option.None => 0 }
    let mut b = SnapshotBuilder::new();
    let option = option_union(&mut b);

    let forty_two = b.int(42);
    let value_init = b.node(AstKind::FieldExpr, Some("value"), &[forty_two]);
    let lit = b.node(AstKind::StructLiteral, Some("Option.Some"), &[value_init]);
    let let_x = b.node(AstKind::LetStmt, Some("x"), &[lit]);

    let scrut = b.ident("x");
    let binder = b.ident("v");
    let body_v = b.ident("v");
    let some_arm = b.node(AstKind::MatchArm, Some("Option.Some"), &[binder, body_v]);
    let zero = b.int(0);
    let none_arm = b.node(AstKind::MatchArm, Some("Option.None"), &[zero]);
    let m = b.node(AstKind::MatchStmt, None, &[scrut, some_arm, none_arm]);

    let z = b.int(0);
    let r = ret(&mut b, z);
    let main = func_decl(&mut b, "main", &[], Some("i32"), &[let_x, m, r]);
    let file = b.node(AstKind::SourceFile, None, &[option, main]);
    let unit = lower(b, file);

    let graph = unit.graph("main").unwrap();
    let construct = graph
        .nodes()
        .iter()
        .find(|n| n.op == Opcode::UnionConstruct)
        .expect("no UnionConstruct");
    assert_eq!(construct.data, Some(DataValue::Integer(0)));
    assert_eq!(construct.inputs.len(), 1);
    assert_eq!(
        graph.node(construct.inputs[0]).unwrap().data,
        Some(DataValue::Integer(42))
    );

    let tag_checks: Vec<_> = graph
        .nodes()
        .iter()
        .filter(|n| n.op == Opcode::UnionTagCheck)
        .collect();
    assert_eq!(tag_checks.len(), 2);
    assert_eq!(tag_checks[0].data, Some(DataValue::Integer(0)));
    assert_eq!(tag_checks[1].data, Some(DataValue::Integer(1)));

    let extract = graph
        .nodes()
        .iter()
        .find(|n| n.op == Opcode::UnionPayloadExtract)
        .expect("no UnionPayloadExtract");
    assert_eq!(extract.data, Some(DataValue::Integer(0)));

    assert_value_operands_precede(&unit);
    assert_all_valid(&unit);
}

// ---------------------------------------------------------------------------
// Scenario 4: for loops over ranges
// ---------------------------------------------------------------------------

fn for_loop_unit(range_op: &str) -> LoweredUnit {
    // for i in 0..10 do print_int(i) end
    let mut b = SnapshotBuilder::new();
    let zero = b.int(0);
    let ten = b.int(10);
    let range = b.node(AstKind::RangeExpr, Some(range_op), &[zero, ten]);
    let i_ref = b.ident("i");
    let callee = b.ident("print_int");
    let call = b.node(AstKind::CallExpr, None, &[callee, i_ref]);
    let stmt = b.node(AstKind::ExprStmt, None, &[call]);
    let body = b.node(AstKind::Block, None, &[stmt]);
    let f = b.node(AstKind::ForStmt, Some("i"), &[range, body]);
    let main = func_decl(&mut b, "main", &[], Some("i32"), &[f]);
    let file = b.node(AstKind::SourceFile, None, &[main]);
    lower(b, file)
}

#[test]
fn inclusive_for_loop_shape() {
    let unit = for_loop_unit("..");
    let main_ops = ops(&unit, "main");
    for expected in [
        Opcode::Phi,
        Opcode::LessEqual,
        Opcode::Branch,
        Opcode::Add,
        Opcode::Jump,
        Opcode::Label,
    ] {
        assert!(main_ops.contains(&expected), "missing {:?}", expected);
    }
    // Loop phi has init + back-edge.
    let graph = unit.graph("main").unwrap();
    let phi = graph.nodes().iter().find(|n| n.op == Opcode::Phi).unwrap();
    assert_eq!(phi.inputs.len(), 2);
    assert!(phi.inputs[1] > phi.id);

    // The call resolves to the runtime print symbol.
    let call = graph.nodes().iter().find(|n| n.op == Opcode::Call).unwrap();
    assert_eq!(call.symbol(), Some("janus_print_int"));

    assert_value_operands_precede(&unit);
    assert_all_valid(&unit);
}

#[test]
fn exclusive_range_swaps_the_comparison() {
    let unit = for_loop_unit("..<");
    let main_ops = ops(&unit, "main");
    assert!(main_ops.contains(&Opcode::Less));
    assert!(!main_ops.contains(&Opcode::LessEqual));
}

// ---------------------------------------------------------------------------
// While loops and join-point phis
// ---------------------------------------------------------------------------

#[test]
fn while_loop_carried_variable_gets_a_phi() {
    // let s = 0
    // while s < 10 do s = s + 1 end
    // return s
    let mut b = SnapshotBuilder::new();
    let zero = b.int(0);
    let let_s = b.node(AstKind::LetStmt, Some("s"), &[zero]);

    let s1 = b.ident("s");
    let ten = b.int(10);
    let cond = binary(&mut b, "<", s1, ten);

    let s2 = b.ident("s");
    let one = b.int(1);
    let sum = binary(&mut b, "+", s2, one);
    let s3 = b.ident("s");
    let assign = binary(&mut b, "=", s3, sum);
    let assign_stmt = b.node(AstKind::ExprStmt, None, &[assign]);
    let body = b.node(AstKind::Block, None, &[assign_stmt]);
    let w = b.node(AstKind::WhileStmt, None, &[cond, body]);

    let s4 = b.ident("s");
    let r = ret(&mut b, s4);
    let main = func_decl(&mut b, "main", &[], Some("i32"), &[let_s, w, r]);
    let file = b.node(AstKind::SourceFile, None, &[main]);
    let unit = lower(b, file);

    let graph = unit.graph("main").unwrap();
    let phi = graph
        .nodes()
        .iter()
        .find(|n| n.op == Opcode::Phi)
        .expect("no loop phi");
    assert_eq!(phi.inputs.len(), 2);
    assert!(phi.inputs[0] < phi.id, "first input is the initial def");
    assert!(phi.inputs[1] > phi.id, "second input is the back-edge");

    // The post-loop return reads the phi.
    let ret_node = graph.nodes().iter().find(|n| n.op == Opcode::Return).unwrap();
    assert_eq!(ret_node.inputs[0], phi.id);

    assert_value_operands_precede(&unit);
    assert_all_valid(&unit);
}

#[test]
fn if_else_rebinding_both_arms_merges_with_phi() {
    // let x = 1
    // if c do x = 2 else x = 3 end
    // return x
    let mut b = SnapshotBuilder::new();
    let one = b.int(1);
    let let_x = b.node(AstKind::LetStmt, Some("x"), &[one]);

    let c = b.ident("c");
    let two = b.int(2);
    let x1 = b.ident("x");
    let a1 = binary(&mut b, "=", x1, two);
    let s1 = b.node(AstKind::ExprStmt, None, &[a1]);
    let then_b = b.node(AstKind::Block, None, &[s1]);

    let three = b.int(3);
    let x2 = b.ident("x");
    let a2 = binary(&mut b, "=", x2, three);
    let s2 = b.node(AstKind::ExprStmt, None, &[a2]);
    let else_b = b.node(AstKind::Block, None, &[s2]);

    let if_stmt = b.node(AstKind::IfStmt, None, &[c, then_b, else_b]);
    let x3 = b.ident("x");
    let r = ret(&mut b, x3);
    let main = func_decl(&mut b, "main", &[("c", Some("bool"))], Some("i32"), &[let_x, if_stmt, r]);
    let file = b.node(AstKind::SourceFile, None, &[main]);
    let unit = lower(b, file);

    let graph = unit.graph("main").unwrap();
    let phi = graph
        .nodes()
        .iter()
        .find(|n| n.op == Opcode::Phi)
        .expect("no merge phi");
    assert_eq!(phi.inputs.len(), 2);
    let ret_node = graph.nodes().iter().find(|n| n.op == Opcode::Return).unwrap();
    assert_eq!(ret_node.inputs[0], phi.id);

    assert_value_operands_precede(&unit);
    assert_all_valid(&unit);
}

#[test]
fn var_bindings_flow_through_memory() {
    // var x = 1
    // x = x + 2
    // return x
    let mut b = SnapshotBuilder::new();
    let one = b.int(1);
    let var_x = b.node(AstKind::VarStmt, Some("x"), &[one]);
    let x1 = b.ident("x");
    let two = b.int(2);
    let sum = binary(&mut b, "+", x1, two);
    let x2 = b.ident("x");
    let assign = binary(&mut b, "=", x2, sum);
    let s = b.node(AstKind::ExprStmt, None, &[assign]);
    let x3 = b.ident("x");
    let r = ret(&mut b, x3);
    let main = func_decl(&mut b, "main", &[], Some("i32"), &[var_x, s, r]);
    let file = b.node(AstKind::SourceFile, None, &[main]);
    let unit = lower(b, file);

    let main_ops = ops(&unit, "main");
    assert!(main_ops.contains(&Opcode::Alloca));
    assert_eq!(main_ops.iter().filter(|o| **o == Opcode::Store).count(), 2);
    assert_eq!(main_ops.iter().filter(|o| **o == Opcode::Load).count(), 2);
    assert!(!main_ops.contains(&Opcode::Phi));
}

// ---------------------------------------------------------------------------
// Scenario 5: closures
// ---------------------------------------------------------------------------

#[test]
fn capturing_closure_lifts_with_env() {
    // let x = 42
    // let f = func(y: i32) -> i32 do return x + y end
    // let r = f(5)
    let mut b = SnapshotBuilder::new();
    let forty_two = b.int(42);
    let let_x = b.node(AstKind::LetStmt, Some("x"), &[forty_two]);

    let x_ref = b.ident("x");
    let y_ref = b.ident("y");
    let sum = binary(&mut b, "+", x_ref, y_ref);
    let body_ret = ret(&mut b, sum);
    let tr_y = b.leaf(AstKind::TypeRef, Some("i32"));
    let param_y = b.node(AstKind::Param, Some("y"), &[tr_y]);
    let tr_ret = b.leaf(AstKind::TypeRef, Some("i32"));
    let body = b.node(AstKind::Block, None, &[body_ret]);
    let lit = b.node(AstKind::FuncLit, None, &[param_y, tr_ret, body]);
    let let_f = b.node(AstKind::LetStmt, Some("f"), &[lit]);

    let f_ref = b.ident("f");
    let five = b.int(5);
    let call = b.node(AstKind::CallExpr, None, &[f_ref, five]);
    let let_r = b.node(AstKind::LetStmt, Some("r"), &[call]);

    let r_ref = b.ident("r");
    let r = ret(&mut b, r_ref);
    let main = func_decl(&mut b, "main", &[], Some("i32"), &[let_x, let_f, let_r, r]);
    let file = b.node(AstKind::SourceFile, None, &[main]);
    let unit = lower(b, file);

    assert_eq!(unit.graphs.len(), 2);

    let main_graph = unit.graph("main").unwrap();
    let create = main_graph
        .nodes()
        .iter()
        .find(|n| n.op == Opcode::ClosureCreate)
        .expect("no ClosureCreate");
    assert_eq!(create.symbol(), Some("__closure_0"));
    assert_eq!(create.inputs.len(), 1);
    assert_eq!(
        main_graph.node(create.inputs[0]).unwrap().data,
        Some(DataValue::Integer(42))
    );
    let call = main_graph
        .nodes()
        .iter()
        .find(|n| n.op == Opcode::ClosureCall)
        .expect("no ClosureCall");
    assert_eq!(call.inputs[0], create.id);

    let closure = unit.graph("__closure_0").unwrap();
    assert_eq!(closure.parameters[0].name, "__env");
    assert_eq!(closure.parameters[0].type_name, "ptr");
    assert_eq!(closure.captures.len(), 1);
    assert_eq!(closure.captures[0].name, "x");
    let env_load = closure
        .nodes()
        .iter()
        .find(|n| n.op == Opcode::ClosureEnvLoad)
        .expect("no ClosureEnvLoad");
    assert_eq!(env_load.data, Some(DataValue::Integer(0)));

    assert_value_operands_precede(&unit);
    assert_all_valid(&unit);
}

#[test]
fn zero_capture_closure_uses_fn_ref_and_plain_call() {
    // let f = func(y: i32) -> i32 do return y end
    // let r = f(5)
    let mut b = SnapshotBuilder::new();
    let y_ref = b.ident("y");
    let body_ret = ret(&mut b, y_ref);
    let tr_y = b.leaf(AstKind::TypeRef, Some("i32"));
    let param_y = b.node(AstKind::Param, Some("y"), &[tr_y]);
    let body = b.node(AstKind::Block, None, &[body_ret]);
    let lit = b.node(AstKind::FuncLit, None, &[param_y, body]);
    let let_f = b.node(AstKind::LetStmt, Some("f"), &[lit]);
    let f_ref = b.ident("f");
    let five = b.int(5);
    let call = b.node(AstKind::CallExpr, None, &[f_ref, five]);
    let stmt = b.node(AstKind::ExprStmt, None, &[call]);
    let main = func_decl(&mut b, "main", &[], Some("i32"), &[let_f, stmt]);
    let file = b.node(AstKind::SourceFile, None, &[main]);
    let unit = lower(b, file);

    let main_graph = unit.graph("main").unwrap();
    assert!(main_graph.nodes().iter().any(|n| n.op == Opcode::FnRef));
    assert!(!main_graph
        .nodes()
        .iter()
        .any(|n| n.op == Opcode::ClosureCreate));
    let call = main_graph
        .nodes()
        .iter()
        .find(|n| n.op == Opcode::Call)
        .expect("zero-capture invocation is a plain Call");
    assert_eq!(call.symbol(), Some("__closure_0"));

    // No __env on the lifted function.
    let closure = unit.graph("__closure_0").unwrap();
    assert!(closure.captures.is_empty());
    assert_eq!(closure.parameters[0].name, "y");
}

#[test]
fn mutable_capture_goes_through_a_pointer() {
    // var count = 0
    // let bump = func() -> i32 do count = count + 1 return count end
    let mut b = SnapshotBuilder::new();
    let zero = b.int(0);
    let var_count = b.node(AstKind::VarStmt, Some("count"), &[zero]);

    let c1 = b.ident("count");
    let one = b.int(1);
    let sum = binary(&mut b, "+", c1, one);
    let c2 = b.ident("count");
    let assign = binary(&mut b, "=", c2, sum);
    let s1 = b.node(AstKind::ExprStmt, None, &[assign]);
    let c3 = b.ident("count");
    let body_ret = ret(&mut b, c3);
    let body = b.node(AstKind::Block, None, &[s1, body_ret]);
    let lit = b.node(AstKind::FuncLit, None, &[body]);
    let let_bump = b.node(AstKind::LetStmt, Some("bump"), &[lit]);
    let main = func_decl(&mut b, "main", &[], Some("i32"), &[var_count, let_bump]);
    let file = b.node(AstKind::SourceFile, None, &[main]);
    let unit = lower(b, file);

    // The capture input is the Alloca slot itself, not a loaded value.
    let main_graph = unit.graph("main").unwrap();
    let create = main_graph
        .nodes()
        .iter()
        .find(|n| n.op == Opcode::ClosureCreate)
        .unwrap();
    let captured = main_graph.node(create.inputs[0]).unwrap();
    assert_eq!(captured.op, Opcode::Alloca);

    // Inside the closure: loads and stores go through the env pointer.
    let closure = unit.graph("__closure_0").unwrap();
    let env_loads: Vec<&janus_ir::Node> = closure
        .nodes()
        .iter()
        .filter(|n| n.op == Opcode::ClosureEnvLoad)
        .collect();
    assert!(!env_loads.is_empty());
    assert!(closure.nodes().iter().any(|n| n.op == Opcode::Store));
    assert!(closure.nodes().iter().any(|n| n.op == Opcode::Load));
}

// ---------------------------------------------------------------------------
// Scenario 6: traits, impls, vtables
// ---------------------------------------------------------------------------

fn drawable_fixture(b: &mut SnapshotBuilder) -> (AstId, AstId) {
    // trait Drawable { func draw(self) -> i32 }
    let self_param = b.leaf(AstKind::Param, Some("self"));
    let tr = b.leaf(AstKind::TypeRef, Some("i32"));
    let sig = b.node(AstKind::FuncDecl, Some("draw"), &[self_param, tr]);
    let trait_decl = b.node(AstKind::TraitDecl, Some("Drawable"), &[sig]);

    // impl Drawable for Point { func draw(self) -> i32 do return 42 end }
    let self_param2 = b.leaf(AstKind::Param, Some("self"));
    let tr2 = b.leaf(AstKind::TypeRef, Some("i32"));
    let forty_two = b.int(42);
    let body_ret = b.node(AstKind::ReturnStmt, None, &[forty_two]);
    let body = b.node(AstKind::Block, None, &[body_ret]);
    let draw_impl = b.node(AstKind::FuncDecl, Some("draw"), &[self_param2, tr2, body]);
    let trait_ref = b.leaf(AstKind::TypeRef, Some("Drawable"));
    let impl_decl = b.node(AstKind::ImplDecl, Some("Point"), &[trait_ref, draw_impl]);

    (trait_decl, impl_decl)
}

#[test]
fn trait_impl_produces_mangled_graph_and_vtable_spec() {
    let mut b = SnapshotBuilder::new();
    let (trait_decl, impl_decl) = drawable_fixture(&mut b);
    let file = b.node(AstKind::SourceFile, None, &[trait_decl, impl_decl]);
    let unit = lower(b, file);

    assert!(unit.graph("Point_Drawable_draw").is_some());
    assert_eq!(
        unit.vtables["Point_Drawable"],
        vec!["Point_Drawable_draw".to_string()]
    );
    // P5: slot count equals the trait's method count.
    assert_eq!(
        unit.vtables["Point_Drawable"].len(),
        unit.traits["Drawable"].methods.len()
    );
}

#[test]
fn trait_object_construction_and_dynamic_dispatch() {
    let mut b = SnapshotBuilder::new();
    let (trait_decl, impl_decl) = drawable_fixture(&mut b);

    // let p = Point { x: 1 }
    let one = b.int(1);
    let x_init = b.node(AstKind::FieldExpr, Some("x"), &[one]);
    let p_lit = b.node(AstKind::StructLiteral, Some("Point"), &[x_init]);
    let let_p = b.node(AstKind::LetStmt, Some("p"), &[p_lit]);

    // let d = Point.Drawable(p)
    let ctor = field(&mut b, "Point", "Drawable");
    let p_ref = b.ident("p");
    let construct = b.node(AstKind::CallExpr, None, &[ctor, p_ref]);
    let let_d = b.node(AstKind::LetStmt, Some("d"), &[construct]);

    // return d.draw()
    let method = field(&mut b, "d", "draw");
    let call = b.node(AstKind::CallExpr, None, &[method]);
    let r = ret(&mut b, call);

    let main = func_decl(&mut b, "main", &[], Some("i32"), &[let_p, let_d, r]);
    let file = b.node(AstKind::SourceFile, None, &[trait_decl, impl_decl, main]);
    let unit = lower(b, file);

    let graph = unit.graph("main").unwrap();
    let fat = graph
        .nodes()
        .iter()
        .find(|n| n.op == Opcode::VtableConstruct)
        .expect("no VtableConstruct");
    assert_eq!(fat.symbol(), Some("Point_Drawable"));
    assert_eq!(fat.inputs.len(), 1);

    let lookup = graph
        .nodes()
        .iter()
        .find(|n| n.op == Opcode::VtableLookup)
        .expect("no VtableLookup");
    assert_eq!(lookup.data, Some(DataValue::Integer(0)));
    assert_eq!(lookup.inputs[0], fat.id);

    assert_value_operands_precede(&unit);
    assert_all_valid(&unit);
}

#[test]
fn missing_trait_method_fails() {
    let mut b = SnapshotBuilder::new();
    let self_param = b.leaf(AstKind::Param, Some("self"));
    let sig = b.node(AstKind::FuncDecl, Some("draw"), &[self_param]);
    let trait_decl = b.node(AstKind::TraitDecl, Some("Drawable"), &[sig]);
    let trait_ref = b.leaf(AstKind::TypeRef, Some("Drawable"));
    let impl_decl = b.node(AstKind::ImplDecl, Some("Point"), &[trait_ref]);
    let file = b.node(AstKind::SourceFile, None, &[trait_decl, impl_decl]);
    let result = lower_unit(&b.build(file), UnitId(0));

    assert!(matches!(
        result,
        Err(LowerError::MissingTraitImpl { trait_name, type_name, method })
            if trait_name == "Drawable" && type_name == "Point" && method == "draw"
    ));
}

#[test]
fn duplicate_trait_impl_fails() {
    let mut b = SnapshotBuilder::new();
    let (trait_decl, impl_a) = drawable_fixture(&mut b);

    let self_param = b.leaf(AstKind::Param, Some("self"));
    let tr = b.leaf(AstKind::TypeRef, Some("i32"));
    let one = b.int(1);
    let body_ret = b.node(AstKind::ReturnStmt, None, &[one]);
    let body = b.node(AstKind::Block, None, &[body_ret]);
    let draw2 = b.node(AstKind::FuncDecl, Some("draw"), &[self_param, tr, body]);
    let trait_ref = b.leaf(AstKind::TypeRef, Some("Drawable"));
    let impl_b = b.node(AstKind::ImplDecl, Some("Point"), &[trait_ref, draw2]);

    let file = b.node(AstKind::SourceFile, None, &[trait_decl, impl_a, impl_b]);
    let result = lower_unit(&b.build(file), UnitId(0));

    assert!(matches!(
        result,
        Err(LowerError::DuplicateTraitImpl { .. })
    ));
}

#[test]
fn default_trait_method_is_lowered_for_the_impl() {
    // trait Shape { func sides(self) -> i32 do return 0 end }
    // impl Shape for Square {}  -- default body fills the slot.
    let mut b = SnapshotBuilder::new();
    let self_param = b.leaf(AstKind::Param, Some("self"));
    let tr = b.leaf(AstKind::TypeRef, Some("i32"));
    let zero = b.int(0);
    let body_ret = b.node(AstKind::ReturnStmt, None, &[zero]);
    let body = b.node(AstKind::Block, None, &[body_ret]);
    let sig = b.node(AstKind::FuncDecl, Some("sides"), &[self_param, tr, body]);
    let trait_decl = b.node(AstKind::TraitDecl, Some("Shape"), &[sig]);
    let trait_ref = b.leaf(AstKind::TypeRef, Some("Shape"));
    let impl_decl = b.node(AstKind::ImplDecl, Some("Square"), &[trait_ref]);
    let file = b.node(AstKind::SourceFile, None, &[trait_decl, impl_decl]);
    let unit = lower(b, file);

    assert!(unit.graph("Square_Shape_sides").is_some());
    assert_eq!(
        unit.vtables["Square_Shape"],
        vec!["Square_Shape_sides".to_string()]
    );
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[test]
fn undeclared_identifier_fails() {
    let mut b = SnapshotBuilder::new();
    let ghost = b.ident("ghost");
    let r = ret(&mut b, ghost);
    let main = func_decl(&mut b, "main", &[], Some("i32"), &[r]);
    let file = b.node(AstKind::SourceFile, None, &[main]);
    let result = lower_unit(&b.build(file), UnitId(0));

    assert!(matches!(
        result,
        Err(LowerError::UndeclaredIdentifier { name }) if name == "ghost"
    ));
}

#[test]
fn arity_mismatch_fails() {
    // func id(x: i32) -> i32 do return x end
    // func main() do id(1, 2) end
    let mut b = SnapshotBuilder::new();
    let x_ref = b.ident("x");
    let body_ret = ret(&mut b, x_ref);
    let id_fn = func_decl(&mut b, "id", &[("x", Some("i32"))], Some("i32"), &[body_ret]);

    let callee = b.ident("id");
    let one = b.int(1);
    let two = b.int(2);
    let call = b.node(AstKind::CallExpr, None, &[callee, one, two]);
    let stmt = b.node(AstKind::ExprStmt, None, &[call]);
    let main = func_decl(&mut b, "main", &[], None, &[stmt]);
    let file = b.node(AstKind::SourceFile, None, &[id_fn, main]);
    let result = lower_unit(&b.build(file), UnitId(0));

    assert!(matches!(
        result,
        Err(LowerError::ArityMismatch { callee, expected: 1, actual: 2 }) if callee == "id"
    ));
}

// ---------------------------------------------------------------------------
// Async + nurseries
// ---------------------------------------------------------------------------

#[test]
fn async_await_spawn_nursery_shape() {
    // func work() -> i32 do return 7 end
    // func main() -> i32 do
    //   nursery do spawn work() end
    //   let h = async work()
    //   return await h
    // end
    let mut b = SnapshotBuilder::new();
    let seven = b.int(7);
    let work_ret = ret(&mut b, seven);
    let work = func_decl(&mut b, "work", &[], Some("i32"), &[work_ret]);

    let callee1 = b.ident("work");
    let call1 = b.node(AstKind::CallExpr, None, &[callee1]);
    let spawn = b.node(AstKind::SpawnExpr, None, &[call1]);
    let spawn_stmt = b.node(AstKind::ExprStmt, None, &[spawn]);
    let nursery_block = b.node(AstKind::Block, None, &[spawn_stmt]);
    let nursery = b.node(AstKind::NurseryStmt, None, &[nursery_block]);

    let callee2 = b.ident("work");
    let call2 = b.node(AstKind::CallExpr, None, &[callee2]);
    let async_call = b.node(AstKind::AsyncExpr, None, &[call2]);
    let let_h = b.node(AstKind::LetStmt, Some("h"), &[async_call]);

    let h_ref = b.ident("h");
    let await_e = b.node(AstKind::AwaitExpr, None, &[h_ref]);
    let r = ret(&mut b, await_e);

    let main = func_decl(&mut b, "main", &[], Some("i32"), &[nursery, let_h, r]);
    let file = b.node(AstKind::SourceFile, None, &[work, main]);
    let unit = lower(b, file);

    let graph = unit.graph("main").unwrap();
    let begin = graph
        .nodes()
        .iter()
        .find(|n| n.op == Opcode::NurseryBegin)
        .expect("no NurseryBegin");
    let end = graph
        .nodes()
        .iter()
        .find(|n| n.op == Opcode::NurseryEnd)
        .expect("no NurseryEnd");
    assert_eq!(end.inputs[0], begin.id);

    let spawn = graph.nodes().iter().find(|n| n.op == Opcode::Spawn).unwrap();
    assert!(spawn.id > begin.id && spawn.id < end.id);
    assert_eq!(spawn.symbol(), Some("work"));

    let async_node = graph
        .nodes()
        .iter()
        .find(|n| n.op == Opcode::AsyncCall)
        .unwrap();
    assert_eq!(async_node.symbol(), Some("work"));
    let await_node = graph.nodes().iter().find(|n| n.op == Opcode::Await).unwrap();
    assert_eq!(await_node.inputs[0], async_node.id);

    assert_value_operands_precede(&unit);
    assert_all_valid(&unit);
}

// ---------------------------------------------------------------------------
// Tensor sugar
// ---------------------------------------------------------------------------

#[test]
fn matmul_operator_forces_npu_tenancy() {
    let mut b = SnapshotBuilder::new();
    let a = b.ident("a");
    let c = b.ident("c");
    let mm = binary(&mut b, "@", a, c);
    let r = ret(&mut b, mm);
    let main = func_decl(
        &mut b,
        "main",
        &[("a", Some("ptr")), ("c", Some("ptr"))],
        Some("ptr"),
        &[r],
    );
    let file = b.node(AstKind::SourceFile, None, &[main]);
    let unit = lower(b, file);

    let graph = unit.graph("main").unwrap();
    let mm_node = graph
        .nodes()
        .iter()
        .find(|n| n.op == Opcode::TensorMatmul)
        .expect("no TensorMatmul");
    assert_eq!(mm_node.tenancy, Tenancy::NpuTensor);
    assert_eq!(
        graph.node(mm_node.inputs[0]).unwrap().tenancy,
        Tenancy::CpuSerial
    );
}

// ---------------------------------------------------------------------------
// Serde round-trip of a lowered unit
// ---------------------------------------------------------------------------

#[test]
fn lowered_unit_survives_json_roundtrip() {
    let unit = for_loop_unit("..");
    let json = serde_json::to_string(&unit).unwrap();
    let back: LoweredUnit = serde_json::from_str(&json).unwrap();
    assert_eq!(back.graphs.len(), unit.graphs.len());
    assert_eq!(back.graph("main").unwrap(), unit.graph("main").unwrap());
}
