//! Per-graph LLVM IR emission.
//!
//! [`emit_module`] drives the whole pipeline: create a function-scoped
//! LLVM context, pre-declare every graph's function and every vtable
//! global, walk each graph's nodes in id order, verify the module, and
//! serialize it to text. No LLVM types escape this module.
//!
//! Node emission keys off three conventions the lowerer upholds:
//! - ids are topological except for Phi back-edges, which are wired with
//!   a two-pass protocol (emit the phi with the incomings that exist,
//!   attach back-edge incomings after the whole graph is walked);
//! - a `Label`'s position in the id stream marks the start of its basic
//!   block, with `Branch`/`Jump` referencing labels forward;
//! - predecessor blocks of a label are recorded in branch order, which
//!   matches the input order of any phi sitting at that label.

use std::collections::HashMap;

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, StructType};
use inkwell::values::{
    BasicMetadataValueEnum, BasicValueEnum, FunctionValue, IntValue, PhiValue, PointerValue,
};
use inkwell::{AddressSpace, FloatPredicate, IntPredicate};

use indexmap::IndexMap;

use janus_ir::graph::Graph;
use janus_ir::node::Node;
use janus_ir::types::DataValue;
use janus_ir::{ExternRegistry, NodeId, Opcode};
use janus_lower::LoweredUnit;

use crate::error::EmitError;
use crate::runtime;
use crate::types::{is_void, llvm_type};

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Emits a lowered unit with the default builtin extern catalog.
pub fn emit_unit(unit: &LoweredUnit) -> Result<String, EmitError> {
    let externs = ExternRegistry::with_builtins();
    emit_module(&unit.graphs, &unit.vtables, &externs, "janus_unit")
}

/// Emits a single textual LLVM module from lowered graphs and vtable
/// specs, verifying it before serialization.
pub fn emit_module(
    graphs: &[Graph],
    vtables: &IndexMap<String, Vec<String>>,
    externs: &ExternRegistry,
    module_name: &str,
) -> Result<String, EmitError> {
    let context = Context::create();
    let module = context.create_module(module_name);
    let builder = context.create_builder();

    // Pre-declaration pass: every graph's function, so calls and vtable
    // initializers can reference them in any order.
    for graph in graphs {
        declare_graph_function(&context, &module, graph);
    }

    let env_layouts = closure_env_layouts(&context, graphs);
    let vtable_globals = declare_vtable_globals(&context, &module, vtables)?;

    for graph in graphs {
        tracing::debug!(function = %graph.function_name, nodes = graph.node_count(), "emitting");
        FunctionEmitter::run(
            &context,
            &module,
            &builder,
            graph,
            externs,
            &env_layouts,
            &vtable_globals,
        )?;
    }

    module
        .verify()
        .map_err(|e| EmitError::InvalidModule(e.to_string()))?;
    Ok(module.print_to_string().to_string())
}

fn declare_graph_function<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    graph: &Graph,
) -> FunctionValue<'ctx> {
    if let Some(existing) = module.get_function(&graph.function_name) {
        return existing;
    }
    let params: Vec<BasicMetadataTypeEnum<'ctx>> = graph
        .parameters
        .iter()
        .map(|p| llvm_type(context, &p.type_name).into())
        .collect();
    let fn_type = if is_void(&graph.return_type) {
        context.void_type().fn_type(&params, false)
    } else {
        llvm_type(context, &graph.return_type).fn_type(&params, false)
    };
    let function = module.add_function(&graph.function_name, fn_type, None);
    // Keep the leading environment parameter recognizable in the IR.
    if graph
        .parameters
        .first()
        .map(|p| p.name == "__env")
        .unwrap_or(false)
    {
        if let Some(env) = function.get_nth_param(0) {
            env.into_pointer_value().set_name("__env");
        }
    }
    function
}

/// One private constant `[N x ptr]` per `(Type, Trait)` pair, slots
/// ordered by the trait's signature order.
fn declare_vtable_globals<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    vtables: &IndexMap<String, Vec<String>>,
) -> Result<HashMap<String, PointerValue<'ctx>>, EmitError> {
    let ptr_type = context.ptr_type(AddressSpace::default());
    let mut globals = HashMap::new();
    for (key, methods) in vtables {
        let mut slots: Vec<PointerValue<'ctx>> = Vec::with_capacity(methods.len());
        for method in methods {
            let function = module.get_function(method).ok_or_else(|| {
                EmitError::InvalidGraph(format!("vtable '{}' references unknown method '{}'", key, method))
            })?;
            slots.push(function.as_global_value().as_pointer_value());
        }
        let initializer = ptr_type.const_array(&slots);
        let global = module.add_global(
            ptr_type.array_type(methods.len() as u32),
            None,
            &format!("__vtable_{}", key),
        );
        global.set_initializer(&initializer);
        global.set_constant(true);
        global.set_linkage(Linkage::Private);
        globals.insert(key.clone(), global.as_pointer_value());
    }
    Ok(globals)
}

// ---------------------------------------------------------------------------
// Closure environment layouts
// ---------------------------------------------------------------------------

/// Field types of each lifted closure's environment struct, derived from
/// the `ClosureCreate` sites. The closure body reads its `__env` through
/// this layout.
fn closure_env_layouts<'ctx>(
    context: &'ctx Context,
    graphs: &[Graph],
) -> HashMap<String, Vec<BasicTypeEnum<'ctx>>> {
    let mut layouts = HashMap::new();
    for graph in graphs {
        for node in graph.nodes() {
            if node.op != Opcode::ClosureCreate {
                continue;
            }
            let Some(name) = node.symbol() else {
                continue;
            };
            let fields: Vec<BasicTypeEnum<'ctx>> = node
                .inputs
                .iter()
                .map(|&input| static_value_type(context, graph, input))
                .collect();
            layouts.insert(name.to_string(), fields);
        }
    }
    layouts
}

/// Coarse, pre-emission type of a node's value, judged from its opcode
/// alone. Used where a layout must be known across graph boundaries.
fn static_value_type<'ctx>(context: &'ctx Context, graph: &Graph, id: NodeId) -> BasicTypeEnum<'ctx> {
    let ptr = context.ptr_type(AddressSpace::default());
    let Some(node) = graph.node(id) else {
        return context.i32_type().into();
    };
    match node.op {
        Opcode::Constant => match &node.data {
            Some(DataValue::Float(_)) => context.f64_type().into(),
            Some(DataValue::Boolean(_)) => context.bool_type().into(),
            Some(DataValue::Str(_)) => ptr.into(),
            _ => context.i32_type().into(),
        },
        Opcode::Argument => {
            let index = node.integer().unwrap_or(0) as usize;
            match graph.parameters.get(index) {
                Some(p) => llvm_type(context, &p.type_name),
                None => context.i32_type().into(),
            }
        }
        Opcode::Alloca
        | Opcode::StructAlloca
        | Opcode::ArrayConstruct
        | Opcode::StructConstruct
        | Opcode::UnionConstruct
        | Opcode::ClosureCreate
        | Opcode::FnRef
        | Opcode::AsyncCall
        | Opcode::Spawn
        | Opcode::NurseryBegin => ptr.into(),
        op if op.is_tensor() => ptr.into(),
        Opcode::VtableConstruct => context
            .struct_type(&[ptr.into(), ptr.into()], false)
            .into(),
        op if op.is_comparison() => context.bool_type().into(),
        Opcode::UnionTagCheck => context.bool_type().into(),
        Opcode::Await => context.i64_type().into(),
        _ => context.i32_type().into(),
    }
}

// ---------------------------------------------------------------------------
// Per-function emitter
// ---------------------------------------------------------------------------

struct PendingPhi<'ctx> {
    phi: PhiValue<'ctx>,
    label: NodeId,
    input: NodeId,
    index: usize,
}

struct FunctionEmitter<'a, 'ctx> {
    context: &'ctx Context,
    module: &'a Module<'ctx>,
    builder: &'a Builder<'ctx>,
    graph: &'a Graph,
    externs: &'a ExternRegistry,
    env_layouts: &'a HashMap<String, Vec<BasicTypeEnum<'ctx>>>,
    vtable_globals: &'a HashMap<String, PointerValue<'ctx>>,
    function: FunctionValue<'ctx>,
    values: HashMap<NodeId, BasicValueEnum<'ctx>>,
    /// Label node -> its basic block.
    blocks: HashMap<NodeId, BasicBlock<'ctx>>,
    /// Label node -> predecessor blocks, in branch order. Matches the
    /// input order of phis at that label.
    preds: HashMap<NodeId, Vec<BasicBlock<'ctx>>>,
    pending_phis: Vec<PendingPhi<'ctx>>,
    /// Alloca slot -> element type inferred from the first store.
    slot_types: HashMap<NodeId, BasicTypeEnum<'ctx>>,
    /// ArrayConstruct -> its stack array type.
    array_types: HashMap<NodeId, inkwell::types::ArrayType<'ctx>>,
    /// StructConstruct -> its struct type.
    struct_layouts: HashMap<NodeId, StructType<'ctx>>,
    /// UnionConstruct -> absolute byte offset and type per payload field.
    union_layouts: HashMap<NodeId, Vec<(u64, BasicTypeEnum<'ctx>)>>,
    current_block: BasicBlock<'ctx>,
    current_label: Option<NodeId>,
    terminated: bool,
}

impl<'a, 'ctx> FunctionEmitter<'a, 'ctx> {
    #[allow(clippy::too_many_arguments)]
    fn run(
        context: &'ctx Context,
        module: &'a Module<'ctx>,
        builder: &'a Builder<'ctx>,
        graph: &'a Graph,
        externs: &'a ExternRegistry,
        env_layouts: &'a HashMap<String, Vec<BasicTypeEnum<'ctx>>>,
        vtable_globals: &'a HashMap<String, PointerValue<'ctx>>,
    ) -> Result<(), EmitError> {
        let function = module.get_function(&graph.function_name).ok_or_else(|| {
            EmitError::InvalidGraph(format!("function '{}' was not declared", graph.function_name))
        })?;
        let entry = context.append_basic_block(function, "entry");
        builder.position_at_end(entry);

        let mut emitter = FunctionEmitter {
            context,
            module,
            builder,
            graph,
            externs,
            env_layouts,
            vtable_globals,
            function,
            values: HashMap::new(),
            blocks: HashMap::new(),
            preds: HashMap::new(),
            pending_phis: Vec::new(),
            slot_types: HashMap::new(),
            array_types: HashMap::new(),
            struct_layouts: HashMap::new(),
            union_layouts: HashMap::new(),
            current_block: entry,
            current_label: None,
            terminated: false,
        };

        // Basic blocks exist before any branch references them.
        for node in graph.nodes() {
            if node.op == Opcode::Label {
                let bb = context.append_basic_block(function, &format!("bb_{}", node.id));
                emitter.blocks.insert(node.id, bb);
            }
        }

        for node in graph.nodes() {
            emitter.emit_node(node)?;
        }
        emitter.resolve_pending_phis()?;
        emitter.finish_open_block()?;
        Ok(())
    }

    // -- Small helpers ------------------------------------------------------

    fn err<T>(result: Result<T, inkwell::builder::BuilderError>) -> Result<T, EmitError> {
        result.map_err(|e| EmitError::Llvm(e.to_string()))
    }

    fn value(&self, id: NodeId) -> Result<BasicValueEnum<'ctx>, EmitError> {
        self.values
            .get(&id)
            .copied()
            .ok_or_else(|| EmitError::InvalidGraph(format!("value of node {} not yet computed", id)))
    }

    fn ptr_type(&self) -> inkwell::types::PointerType<'ctx> {
        self.context.ptr_type(AddressSpace::default())
    }

    fn label_block(&self, id: NodeId) -> Result<BasicBlock<'ctx>, EmitError> {
        self.blocks
            .get(&id)
            .copied()
            .ok_or_else(|| EmitError::InvalidGraph(format!("node {} is not a label", id)))
    }

    /// Pointer operand: pass pointers through, spill anything else to a
    /// stack slot.
    fn as_pointer(&mut self, value: BasicValueEnum<'ctx>) -> Result<PointerValue<'ctx>, EmitError> {
        if value.is_pointer_value() {
            return Ok(value.into_pointer_value());
        }
        let slot = Self::err(self.builder.build_alloca(value.get_type(), "spill"))?;
        Self::err(self.builder.build_store(slot, value))?;
        Ok(slot)
    }

    /// Boolean operand: reuse i1 values, otherwise compare against zero.
    fn as_bool(&self, value: BasicValueEnum<'ctx>) -> Result<IntValue<'ctx>, EmitError> {
        if !value.is_int_value() {
            return Err(EmitError::InvalidGraph(
                "branch condition is not an integer value".into(),
            ));
        }
        let int = value.into_int_value();
        if int.get_type().get_bit_width() == 1 {
            return Ok(int);
        }
        let zero = int.get_type().const_zero();
        Self::err(
            self.builder
                .build_int_compare(IntPredicate::NE, int, zero, "tobool"),
        )
    }

    /// Width-adjusts an integer argument to the expected parameter type.
    fn coerce_arg(
        &mut self,
        value: BasicValueEnum<'ctx>,
        expected: BasicMetadataTypeEnum<'ctx>,
    ) -> Result<BasicMetadataValueEnum<'ctx>, EmitError> {
        match expected {
            BasicMetadataTypeEnum::IntType(t) if value.is_int_value() => {
                let int = value.into_int_value();
                if int.get_type().get_bit_width() == t.get_bit_width() {
                    Ok(int.into())
                } else {
                    let cast =
                        Self::err(self.builder.build_int_cast_sign_flag(int, t, true, "argcast"))?;
                    Ok(cast.into())
                }
            }
            BasicMetadataTypeEnum::PointerType(_) if !value.is_pointer_value() => {
                Ok(self.as_pointer(value)?.into())
            }
            _ => Ok(value.into()),
        }
    }

    /// Resolves a call target: an already-declared function, a registered
    /// extern, or a runtime symbol -- declared on first use.
    fn resolve_callee(&self, symbol: &str) -> Result<FunctionValue<'ctx>, EmitError> {
        if let Some(f) = self.module.get_function(symbol) {
            return Ok(f);
        }
        let sig = self
            .externs
            .get(symbol)
            .cloned()
            .or_else(|| runtime::runtime_signature(symbol))
            .ok_or_else(|| EmitError::InvalidGraph(format!("unknown call target '{}'", symbol)))?;
        Ok(runtime::declare(self.context, self.module, symbol, &sig))
    }

    fn build_call_to(
        &mut self,
        callee: FunctionValue<'ctx>,
        args: &[NodeId],
        leading: Option<BasicValueEnum<'ctx>>,
        name: &str,
    ) -> Result<Option<BasicValueEnum<'ctx>>, EmitError> {
        let param_types = callee.get_type().get_param_types();
        let mut call_args: Vec<BasicMetadataValueEnum<'ctx>> = Vec::with_capacity(args.len() + 1);
        let mut slot = 0usize;
        if let Some(value) = leading {
            match param_types.get(slot) {
                Some(&expected) => call_args.push(self.coerce_arg(value, expected)?),
                None => call_args.push(value.into()),
            }
            slot += 1;
        }
        for &arg in args {
            let value = self.value(arg)?;
            match param_types.get(slot) {
                Some(&expected) => call_args.push(self.coerce_arg(value, expected)?),
                None => call_args.push(value.into()),
            }
            slot += 1;
        }
        let call = Self::err(self.builder.build_call(callee, &call_args, name))?;
        Ok(call.try_as_basic_value().basic())
    }

    /// Opens a fresh unreachable block for stream content that follows a
    /// terminator without an intervening label.
    fn reopen_dead(&mut self, id: NodeId) {
        let bb = self
            .context
            .append_basic_block(self.function, &format!("dead_{}", id));
        self.builder.position_at_end(bb);
        self.current_block = bb;
        self.current_label = None;
        self.terminated = false;
    }

    /// Terminates the finally-open block with a default return so every
    /// block in the function is well-formed.
    fn finish_open_block(&mut self) -> Result<(), EmitError> {
        if self.terminated {
            return Ok(());
        }
        if is_void(&self.graph.return_type) {
            Self::err(self.builder.build_return(None))?;
            return Ok(());
        }
        match llvm_type(self.context, &self.graph.return_type) {
            BasicTypeEnum::IntType(t) => {
                Self::err(self.builder.build_return(Some(&t.const_zero())))?;
            }
            BasicTypeEnum::FloatType(t) => {
                Self::err(self.builder.build_return(Some(&t.const_zero())))?;
            }
            BasicTypeEnum::PointerType(t) => {
                Self::err(self.builder.build_return(Some(&t.const_null())))?;
            }
            other => {
                Self::err(self.builder.build_return(Some(&other.const_zero())))?;
            }
        }
        self.terminated = true;
        Ok(())
    }

    // -- Node dispatch ------------------------------------------------------

    fn emit_node(&mut self, node: &Node) -> Result<(), EmitError> {
        if node.op == Opcode::Label {
            let bb = self.label_block(node.id)?;
            if !self.terminated {
                // Fallthrough into the labeled block.
                Self::err(self.builder.build_unconditional_branch(bb))?;
                self.preds.entry(node.id).or_default().push(self.current_block);
            }
            self.builder.position_at_end(bb);
            self.current_block = bb;
            self.current_label = Some(node.id);
            self.terminated = false;
            return Ok(());
        }
        if self.terminated {
            self.reopen_dead(node.id);
        }

        match node.op {
            Opcode::Constant => self.emit_constant(node)?,
            Opcode::Argument => {
                let index = node.integer().unwrap_or(0) as u32;
                let param = self.function.get_nth_param(index).ok_or_else(|| {
                    EmitError::InvalidGraph(format!(
                        "argument index {} out of range in '{}'",
                        index, self.graph.function_name
                    ))
                })?;
                self.values.insert(node.id, param);
            }
            Opcode::Alloca | Opcode::StructAlloca => self.emit_alloca(node)?,
            Opcode::Load => {
                let ptr = self.value(node.inputs[0])?;
                let ty = self
                    .slot_types
                    .get(&node.inputs[0])
                    .copied()
                    .unwrap_or_else(|| self.context.i32_type().into());
                let value = Self::err(self.builder.build_load(
                    ty,
                    ptr.into_pointer_value(),
                    &format!("load_{}", node.id),
                ))?;
                self.values.insert(node.id, value);
            }
            Opcode::Store => {
                let ptr = self.value(node.inputs[0])?;
                let value = self.value(node.inputs[1])?;
                Self::err(self.builder.build_store(ptr.into_pointer_value(), value))?;
            }
            Opcode::Phi => self.emit_phi(node)?,

            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                self.emit_arith(node)?
            }
            op if op.is_comparison() => self.emit_compare(node)?,
            Opcode::BitAnd | Opcode::BitOr | Opcode::Xor | Opcode::Shl | Opcode::Shr => {
                self.emit_bitwise(node)?
            }
            Opcode::BitNot => {
                let operand = self.value(node.inputs[0])?;
                let value = Self::err(
                    self.builder
                        .build_not(operand.into_int_value(), &format!("not_{}", node.id)),
                )?;
                self.values.insert(node.id, value.into());
            }

            Opcode::Call => {
                let symbol = node.symbol().ok_or_else(|| {
                    EmitError::InvalidGraph(format!("Call node {} has no target symbol", node.id))
                })?;
                let callee = self.resolve_callee(symbol)?;
                let inputs: Vec<NodeId> = node.inputs.to_vec();
                let result =
                    self.build_call_to(callee, &inputs, None, &format!("call_{}", node.id))?;
                if let Some(value) = result {
                    self.values.insert(node.id, value);
                }
            }
            Opcode::Return => self.emit_return(node)?,
            Opcode::Branch => self.emit_branch(node)?,
            Opcode::Jump => {
                let target = node.inputs.first().copied().ok_or_else(|| {
                    EmitError::InvalidGraph(format!("Jump node {} has no target", node.id))
                })?;
                let bb = self.label_block(target)?;
                self.preds.entry(target).or_default().push(self.current_block);
                Self::err(self.builder.build_unconditional_branch(bb))?;
                self.terminated = true;
            }

            Opcode::ArrayConstruct => self.emit_array_construct(node)?,
            Opcode::Index => self.emit_index(node, None)?,
            Opcode::IndexStore => {
                let value = self.value(node.inputs[2])?;
                self.emit_index(node, Some(value))?;
            }
            Opcode::StructConstruct => self.emit_struct_construct(node)?,
            Opcode::FieldAccess => self.emit_field(node, None)?,
            Opcode::FieldStore => {
                let value = self.value(node.inputs[1])?;
                self.emit_field(node, Some(value))?;
            }
            Opcode::Range => self.emit_range(node)?,

            Opcode::FnRef => {
                let symbol = node.symbol().ok_or_else(|| {
                    EmitError::InvalidGraph(format!("FnRef node {} has no symbol", node.id))
                })?;
                let function = self.resolve_callee(symbol)?;
                self.values
                    .insert(node.id, function.as_global_value().as_pointer_value().into());
            }
            Opcode::ClosureCreate => self.emit_closure_create(node)?,
            Opcode::ClosureEnvLoad => self.emit_closure_env_load(node)?,
            Opcode::ClosureCall => self.emit_closure_call(node)?,

            Opcode::VtableConstruct => self.emit_vtable_construct(node)?,
            Opcode::VtableLookup => self.emit_vtable_lookup(node)?,

            Opcode::UnionConstruct => self.emit_union_construct(node)?,
            Opcode::UnionTagCheck => self.emit_union_tag_check(node)?,
            Opcode::UnionPayloadExtract => self.emit_union_payload_extract(node)?,

            op if op.is_tensor() => self.emit_tensor(node)?,
            Opcode::QuantumGate => self.emit_quantum_gate(node)?,
            Opcode::QuantumMeasure => self.emit_quantum_measure(node)?,

            Opcode::AsyncCall | Opcode::Spawn => self.emit_task_spawn(node)?,
            Opcode::Await => {
                let handle = self.value(node.inputs[0])?;
                let handle_ptr = self.as_pointer(handle)?;
                let callee = self.resolve_callee("janus_async_await")?;
                let result = Self::err(self.builder.build_call(
                    callee,
                    &[handle_ptr.into()],
                    &format!("await_{}", node.id),
                ))?;
                if let Some(value) = result.try_as_basic_value().basic() {
                    self.values.insert(node.id, value);
                }
            }
            Opcode::NurseryBegin => {
                let callee = self.resolve_callee("janus_nursery_begin")?;
                let result = Self::err(self.builder.build_call(
                    callee,
                    &[],
                    &format!("nursery_{}", node.id),
                ))?;
                if let Some(value) = result.try_as_basic_value().basic() {
                    self.values.insert(node.id, value);
                }
            }
            Opcode::NurseryEnd => {
                let begin = self.value(node.inputs[0])?;
                let begin_ptr = self.as_pointer(begin)?;
                let callee = self.resolve_callee("janus_nursery_end")?;
                Self::err(self.builder.build_call(
                    callee,
                    &[begin_ptr.into()],
                    &format!("nursery_end_{}", node.id),
                ))?;
            }

            Opcode::Label => unreachable!("handled above"),
            other => {
                return Err(EmitError::InvalidGraph(format!(
                    "unhandled opcode {:?} on node {}",
                    other, node.id
                )))
            }
        }
        Ok(())
    }

    // -- Constants, memory --------------------------------------------------

    fn emit_constant(&mut self, node: &Node) -> Result<(), EmitError> {
        let value: BasicValueEnum<'ctx> = match &node.data {
            Some(DataValue::Integer(v)) => self
                .context
                .i32_type()
                .const_int(*v as u64, true)
                .into(),
            Some(DataValue::Float(v)) => self.context.f64_type().const_float(*v).into(),
            Some(DataValue::Boolean(v)) => self
                .context
                .bool_type()
                .const_int(*v as u64, false)
                .into(),
            Some(DataValue::Str(s)) => {
                let global = Self::err(
                    self.builder
                        .build_global_string_ptr(s, &format!("str_{}", node.id)),
                )?;
                global.as_pointer_value().into()
            }
            None => self.context.i32_type().const_zero().into(),
        };
        self.values.insert(node.id, value);
        Ok(())
    }

    fn emit_alloca(&mut self, node: &Node) -> Result<(), EmitError> {
        // Size the slot for the first value stored into it when that
        // value is already known; i32 otherwise.
        let elem: BasicTypeEnum<'ctx> = self
            .graph
            .nodes()
            .iter()
            .find(|n| n.op == Opcode::Store && n.inputs.first() == Some(&node.id))
            .and_then(|store| store.inputs.get(1))
            .and_then(|stored| self.values.get(stored))
            .map(|v| v.get_type())
            .unwrap_or_else(|| self.context.i32_type().into());
        let slot = Self::err(self.builder.build_alloca(elem, &format!("slot_{}", node.id)))?;
        self.slot_types.insert(node.id, elem);
        self.values.insert(node.id, slot.into());
        Ok(())
    }

    // -- Scalar ops ---------------------------------------------------------

    fn binary_int_operands(
        &mut self,
        node: &Node,
    ) -> Result<(IntValue<'ctx>, IntValue<'ctx>), EmitError> {
        let lhs = self.value(node.inputs[0])?.into_int_value();
        let mut rhs = self.value(node.inputs[1])?.into_int_value();
        if rhs.get_type().get_bit_width() != lhs.get_type().get_bit_width() {
            rhs = Self::err(self.builder.build_int_cast_sign_flag(
                rhs,
                lhs.get_type(),
                true,
                "widen",
            ))?;
        }
        Ok((lhs, rhs))
    }

    fn emit_arith(&mut self, node: &Node) -> Result<(), EmitError> {
        let lhs = self.value(node.inputs[0])?;
        let value: BasicValueEnum<'ctx> = if lhs.is_float_value() {
            let l = lhs.into_float_value();
            let r = self.value(node.inputs[1])?.into_float_value();
            match node.op {
                Opcode::Add => Self::err(self.builder.build_float_add(l, r, "fadd"))?.into(),
                Opcode::Sub => Self::err(self.builder.build_float_sub(l, r, "fsub"))?.into(),
                Opcode::Mul => Self::err(self.builder.build_float_mul(l, r, "fmul"))?.into(),
                Opcode::Div => Self::err(self.builder.build_float_div(l, r, "fdiv"))?.into(),
                _ => Self::err(self.builder.build_float_rem(l, r, "frem"))?.into(),
            }
        } else {
            let (l, r) = self.binary_int_operands(node)?;
            match node.op {
                Opcode::Add => Self::err(self.builder.build_int_add(l, r, "add"))?.into(),
                Opcode::Sub => Self::err(self.builder.build_int_sub(l, r, "sub"))?.into(),
                Opcode::Mul => Self::err(self.builder.build_int_mul(l, r, "mul"))?.into(),
                Opcode::Div => Self::err(self.builder.build_int_signed_div(l, r, "sdiv"))?.into(),
                _ => Self::err(self.builder.build_int_signed_rem(l, r, "srem"))?.into(),
            }
        };
        self.values.insert(node.id, value);
        Ok(())
    }

    fn emit_compare(&mut self, node: &Node) -> Result<(), EmitError> {
        let lhs = self.value(node.inputs[0])?;
        let value: BasicValueEnum<'ctx> = if lhs.is_float_value() {
            let l = lhs.into_float_value();
            let r = self.value(node.inputs[1])?.into_float_value();
            let predicate = match node.op {
                Opcode::Equal => FloatPredicate::OEQ,
                Opcode::NotEqual => FloatPredicate::UNE,
                Opcode::Less => FloatPredicate::OLT,
                Opcode::LessEqual => FloatPredicate::OLE,
                Opcode::Greater => FloatPredicate::OGT,
                _ => FloatPredicate::OGE,
            };
            Self::err(self.builder.build_float_compare(predicate, l, r, "fcmp"))?.into()
        } else {
            let (l, r) = self.binary_int_operands(node)?;
            let predicate = match node.op {
                Opcode::Equal => IntPredicate::EQ,
                Opcode::NotEqual => IntPredicate::NE,
                Opcode::Less => IntPredicate::SLT,
                Opcode::LessEqual => IntPredicate::SLE,
                Opcode::Greater => IntPredicate::SGT,
                _ => IntPredicate::SGE,
            };
            Self::err(self.builder.build_int_compare(predicate, l, r, "cmp"))?.into()
        };
        self.values.insert(node.id, value);
        Ok(())
    }

    fn emit_bitwise(&mut self, node: &Node) -> Result<(), EmitError> {
        let (l, r) = self.binary_int_operands(node)?;
        let value = match node.op {
            Opcode::BitAnd => Self::err(self.builder.build_and(l, r, "and"))?,
            Opcode::BitOr => Self::err(self.builder.build_or(l, r, "or"))?,
            Opcode::Xor => Self::err(self.builder.build_xor(l, r, "xor"))?,
            Opcode::Shl => Self::err(self.builder.build_left_shift(l, r, "shl"))?,
            _ => Self::err(self.builder.build_right_shift(l, r, true, "ashr"))?,
        };
        self.values.insert(node.id, value.into());
        Ok(())
    }

    // -- Control flow -------------------------------------------------------

    fn emit_return(&mut self, node: &Node) -> Result<(), EmitError> {
        if is_void(&self.graph.return_type) {
            Self::err(self.builder.build_return(None))?;
            self.terminated = true;
            return Ok(());
        }
        let value = self.value(node.inputs[0])?;
        let expected = llvm_type(self.context, &self.graph.return_type);
        let value = match (expected, value) {
            (BasicTypeEnum::IntType(t), BasicValueEnum::IntValue(v))
                if v.get_type().get_bit_width() != t.get_bit_width() =>
            {
                Self::err(self.builder.build_int_cast_sign_flag(v, t, true, "retcast"))?.into()
            }
            _ => value,
        };
        Self::err(self.builder.build_return(Some(&value)))?;
        self.terminated = true;
        Ok(())
    }

    fn emit_branch(&mut self, node: &Node) -> Result<(), EmitError> {
        if node.inputs.len() < 3 {
            return Err(EmitError::InvalidGraph(format!(
                "Branch node {} needs a condition and two labels",
                node.id
            )));
        }
        let cond = self.as_bool(self.value(node.inputs[0])?)?;
        let then_label = node.inputs[1];
        let else_label = node.inputs[2];
        let then_bb = self.label_block(then_label)?;
        let else_bb = self.label_block(else_label)?;
        // Predecessor recording order matches the lowerer's phi input
        // order at the target labels.
        self.preds
            .entry(then_label)
            .or_default()
            .push(self.current_block);
        self.preds
            .entry(else_label)
            .or_default()
            .push(self.current_block);
        Self::err(self.builder.build_conditional_branch(cond, then_bb, else_bb))?;
        self.terminated = true;
        Ok(())
    }

    fn emit_phi(&mut self, node: &Node) -> Result<(), EmitError> {
        let label = self.current_label.ok_or_else(|| {
            EmitError::InvalidGraph(format!("Phi node {} is not inside a labeled block", node.id))
        })?;
        let ty = node
            .inputs
            .first()
            .and_then(|first| self.values.get(first))
            .map(|v| v.get_type())
            .unwrap_or_else(|| self.context.i32_type().into());
        let phi = Self::err(self.builder.build_phi(ty, &format!("phi_{}", node.id)))?;

        for (index, &input) in node.inputs.iter().enumerate() {
            let ready = self.values.get(&input).copied();
            let pred = self.preds.get(&label).and_then(|p| p.get(index)).copied();
            match (ready, pred) {
                (Some(value), Some(block)) => phi.add_incoming(&[(&value, block)]),
                _ => self.pending_phis.push(PendingPhi {
                    phi,
                    label,
                    input,
                    index,
                }),
            }
        }
        self.values.insert(node.id, phi.as_basic_value());
        Ok(())
    }

    /// Second pass of the Phi-wiring protocol: attach back-edge incomings
    /// now that every producer and every predecessor branch exists.
    fn resolve_pending_phis(&mut self) -> Result<(), EmitError> {
        for pending in std::mem::take(&mut self.pending_phis) {
            let value = self.values.get(&pending.input).copied().ok_or_else(|| {
                EmitError::InvalidGraph(format!(
                    "phi back-edge input {} was never emitted",
                    pending.input
                ))
            })?;
            let block = self
                .preds
                .get(&pending.label)
                .and_then(|p| p.get(pending.index))
                .copied()
                .ok_or_else(|| {
                    EmitError::InvalidGraph(format!(
                        "label {} has no predecessor for phi input {}",
                        pending.label, pending.index
                    ))
                })?;
            pending.phi.add_incoming(&[(&value, block)]);
        }
        Ok(())
    }

    // -- Aggregates ---------------------------------------------------------

    fn emit_array_construct(&mut self, node: &Node) -> Result<(), EmitError> {
        let elem: BasicTypeEnum<'ctx> = node
            .inputs
            .first()
            .and_then(|first| self.values.get(first))
            .map(|v| v.get_type())
            .unwrap_or_else(|| self.context.i32_type().into());
        let arr_type = elem.array_type(node.inputs.len() as u32);
        let slot = Self::err(self.builder.build_alloca(arr_type, &format!("arr_{}", node.id)))?;
        let i32t = self.context.i32_type();
        for (i, &input) in node.inputs.iter().enumerate() {
            let value = self.value(input)?;
            let gep = unsafe {
                Self::err(self.builder.build_in_bounds_gep(
                    arr_type,
                    slot,
                    &[i32t.const_zero(), i32t.const_int(i as u64, false)],
                    &format!("arr_{}_{}", node.id, i),
                ))?
            };
            Self::err(self.builder.build_store(gep, value))?;
        }
        self.array_types.insert(node.id, arr_type);
        self.values.insert(node.id, slot.into());
        Ok(())
    }

    fn emit_index(
        &mut self,
        node: &Node,
        store: Option<BasicValueEnum<'ctx>>,
    ) -> Result<(), EmitError> {
        let base = self.value(node.inputs[0])?;
        if !base.is_pointer_value() {
            return Err(EmitError::InvalidGraph(format!(
                "Index node {} applied to a non-pointer value",
                node.id
            )));
        }
        let base_ptr = base.into_pointer_value();
        let index = self.value(node.inputs[1])?.into_int_value();
        let i32t = self.context.i32_type();

        let (gep, elem): (PointerValue<'ctx>, BasicTypeEnum<'ctx>) =
            match self.array_types.get(&node.inputs[0]).copied() {
                Some(arr_type) => {
                    let gep = unsafe {
                        Self::err(self.builder.build_in_bounds_gep(
                            arr_type,
                            base_ptr,
                            &[i32t.const_zero(), index],
                            &format!("idx_{}", node.id),
                        ))?
                    };
                    (gep, arr_type.get_element_type())
                }
                None => {
                    let elem: BasicTypeEnum<'ctx> = i32t.into();
                    let gep = unsafe {
                        Self::err(self.builder.build_in_bounds_gep(
                            elem,
                            base_ptr,
                            &[index],
                            &format!("idx_{}", node.id),
                        ))?
                    };
                    (gep, elem)
                }
            };

        match store {
            Some(value) => {
                Self::err(self.builder.build_store(gep, value))?;
            }
            None => {
                let value =
                    Self::err(self.builder.build_load(elem, gep, &format!("elem_{}", node.id)))?;
                self.values.insert(node.id, value);
            }
        }
        Ok(())
    }

    fn emit_struct_construct(&mut self, node: &Node) -> Result<(), EmitError> {
        let mut field_types = Vec::with_capacity(node.inputs.len());
        let mut field_values = Vec::with_capacity(node.inputs.len());
        for &input in &node.inputs {
            let value = self.value(input)?;
            field_types.push(value.get_type());
            field_values.push(value);
        }
        let struct_type = self.context.struct_type(&field_types, false);
        let slot = Self::err(
            self.builder
                .build_alloca(struct_type, &format!("struct_{}", node.id)),
        )?;
        for (i, value) in field_values.into_iter().enumerate() {
            let gep = Self::err(self.builder.build_struct_gep(
                struct_type,
                slot,
                i as u32,
                &format!("field_{}_{}", node.id, i),
            ))?;
            Self::err(self.builder.build_store(gep, value))?;
        }
        self.struct_layouts.insert(node.id, struct_type);
        self.values.insert(node.id, slot.into());
        Ok(())
    }

    fn emit_field(
        &mut self,
        node: &Node,
        store: Option<BasicValueEnum<'ctx>>,
    ) -> Result<(), EmitError> {
        let index = node.integer().unwrap_or(0) as u32;
        let base = self.value(node.inputs[0])?;
        let base_ptr = base.into_pointer_value();
        let struct_type = self
            .struct_layouts
            .get(&node.inputs[0])
            .copied()
            .ok_or_else(|| {
                EmitError::InvalidGraph(format!(
                    "field access on node {} with unknown record layout",
                    node.inputs[0]
                ))
            })?;
        let gep = Self::err(self.builder.build_struct_gep(
            struct_type,
            base_ptr,
            index,
            &format!("gep_{}", node.id),
        ))?;
        match store {
            Some(value) => {
                Self::err(self.builder.build_store(gep, value))?;
            }
            None => {
                let field_type = struct_type
                    .get_field_type_at_index(index)
                    .ok_or_else(|| {
                        EmitError::InvalidGraph(format!(
                            "field index {} out of range on node {}",
                            index, node.inputs[0]
                        ))
                    })?;
                let value = Self::err(self.builder.build_load(
                    field_type,
                    gep,
                    &format!("fld_{}", node.id),
                ))?;
                self.values.insert(node.id, value);
            }
        }
        Ok(())
    }

    fn emit_range(&mut self, node: &Node) -> Result<(), EmitError> {
        let start = self.value(node.inputs[0])?;
        let end = self.value(node.inputs[1])?;
        let inclusive = node
            .data
            .as_ref()
            .and_then(DataValue::as_boolean)
            .unwrap_or(true);
        let range_type = self.context.struct_type(
            &[
                start.get_type(),
                end.get_type(),
                self.context.bool_type().into(),
            ],
            false,
        );
        let mut agg = range_type.get_undef();
        agg = Self::err(self.builder.build_insert_value(agg, start, 0, "range_start"))?
            .into_struct_value();
        agg = Self::err(self.builder.build_insert_value(agg, end, 1, "range_end"))?
            .into_struct_value();
        let flag = self.context.bool_type().const_int(inclusive as u64, false);
        agg = Self::err(self.builder.build_insert_value(agg, flag, 2, "range_incl"))?
            .into_struct_value();
        self.values.insert(node.id, agg.into());
        Ok(())
    }

    // -- Closures -----------------------------------------------------------

    fn emit_closure_create(&mut self, node: &Node) -> Result<(), EmitError> {
        let mut field_types = Vec::with_capacity(node.inputs.len());
        let mut field_values = Vec::with_capacity(node.inputs.len());
        for &input in &node.inputs {
            let value = self.value(input)?;
            field_types.push(value.get_type());
            field_values.push(value);
        }
        let env_type = self.context.struct_type(&field_types, false);
        let env = Self::err(self.builder.build_alloca(env_type, &format!("env_{}", node.id)))?;
        for (i, value) in field_values.into_iter().enumerate() {
            let gep = Self::err(self.builder.build_struct_gep(
                env_type,
                env,
                i as u32,
                &format!("cap_{}_{}", node.id, i),
            ))?;
            Self::err(self.builder.build_store(gep, value))?;
        }
        self.values.insert(node.id, env.into());
        Ok(())
    }

    fn emit_closure_env_load(&mut self, node: &Node) -> Result<(), EmitError> {
        let index = node.integer().unwrap_or(0) as usize;
        let env_ptr = self
            .function
            .get_nth_param(0)
            .ok_or_else(|| {
                EmitError::InvalidGraph(format!(
                    "'{}' has no environment parameter",
                    self.graph.function_name
                ))
            })?
            .into_pointer_value();
        let layout = match self.env_layouts.get(&self.graph.function_name) {
            Some(layout) => layout.clone(),
            // Closure never constructed in this unit: assume word fields.
            None => vec![
                BasicTypeEnum::IntType(self.context.i32_type());
                self.graph.captures.len().max(index + 1)
            ],
        };
        let env_type = self.context.struct_type(&layout, false);
        let gep = Self::err(self.builder.build_struct_gep(
            env_type,
            env_ptr,
            index as u32,
            &format!("envgep_{}", node.id),
        ))?;
        let field_type = layout.get(index).copied().ok_or_else(|| {
            EmitError::InvalidGraph(format!("capture index {} out of range", index))
        })?;
        let value = Self::err(self.builder.build_load(
            field_type,
            gep,
            &format!("envload_{}", node.id),
        ))?;
        self.values.insert(node.id, value);
        Ok(())
    }

    fn emit_closure_call(&mut self, node: &Node) -> Result<(), EmitError> {
        let target_id = node.inputs[0];
        let (target_op, symbol) = {
            let target = self.graph.node(target_id).ok_or_else(|| {
                EmitError::InvalidGraph(format!("closure call target {} missing", target_id))
            })?;
            let symbol = target.symbol().ok_or_else(|| {
                EmitError::InvalidGraph(format!("closure call target {} has no symbol", target_id))
            })?;
            (target.op, symbol.to_string())
        };
        let callee = self.resolve_callee(&symbol)?;
        let args: Vec<NodeId> = node.inputs[1..].to_vec();
        let result = match target_op {
            // Environment pointer rides in front of the user arguments.
            Opcode::ClosureCreate => {
                let env = self.value(target_id)?;
                self.build_call_to(callee, &args, Some(env), &format!("ccall_{}", node.id))?
            }
            Opcode::FnRef => {
                self.build_call_to(callee, &args, None, &format!("ccall_{}", node.id))?
            }
            other => {
                return Err(EmitError::InvalidGraph(format!(
                    "closure call through unsupported node {:?}",
                    other
                )))
            }
        };
        if let Some(value) = result {
            self.values.insert(node.id, value);
        }
        Ok(())
    }

    // -- Traits -------------------------------------------------------------

    fn emit_vtable_construct(&mut self, node: &Node) -> Result<(), EmitError> {
        let key = node.symbol().ok_or_else(|| {
            EmitError::InvalidGraph(format!("VtableConstruct node {} has no key", node.id))
        })?;
        let vtable_ptr = self.vtable_globals.get(key).copied().ok_or_else(|| {
            EmitError::InvalidGraph(format!("no vtable registered for '{}'", key))
        })?;
        let data = self.value(node.inputs[0])?;
        let data_ptr = self.as_pointer(data)?;

        let ptr = self.ptr_type();
        let fat_type = self.context.struct_type(&[ptr.into(), ptr.into()], false);
        let mut fat = fat_type.get_undef();
        fat = Self::err(self.builder.build_insert_value(fat, data_ptr, 0, "fat_data"))?
            .into_struct_value();
        fat = Self::err(
            self.builder
                .build_insert_value(fat, vtable_ptr, 1, "fat_vtable"),
        )?
        .into_struct_value();
        self.values.insert(node.id, fat.into());
        Ok(())
    }

    fn emit_vtable_lookup(&mut self, node: &Node) -> Result<(), EmitError> {
        let fat = self.value(node.inputs[0])?;
        if !fat.is_struct_value() {
            return Err(EmitError::InvalidGraph(format!(
                "VtableLookup node {} expects a fat pointer",
                node.id
            )));
        }
        let fat = fat.into_struct_value();
        let data_ptr =
            Self::err(self.builder.build_extract_value(fat, 0, "obj_data"))?.into_pointer_value();
        let vtable_ptr =
            Self::err(self.builder.build_extract_value(fat, 1, "obj_vtable"))?.into_pointer_value();

        let slot = node.integer().unwrap_or(0) as u64;
        let ptr = self.ptr_type();
        let slot_ptr = unsafe {
            Self::err(self.builder.build_in_bounds_gep(
                ptr,
                vtable_ptr,
                &[self.context.i64_type().const_int(slot, false)],
                &format!("vtslot_{}", node.id),
            ))?
        };
        let fn_ptr = Self::err(self.builder.build_load(ptr, slot_ptr, "method"))?
            .into_pointer_value();

        // Implicit self first, then the remaining inputs. Methods return
        // i32 unless declared otherwise; the fat pointer erases that, so
        // i32 is the dispatch contract.
        let mut arg_types: Vec<BasicMetadataTypeEnum<'ctx>> = vec![ptr.into()];
        let mut args: Vec<BasicMetadataValueEnum<'ctx>> = vec![data_ptr.into()];
        for &input in &node.inputs[1..] {
            let value = self.value(input)?;
            arg_types.push(value.get_type().into());
            args.push(value.into());
        }
        let fn_type = self.context.i32_type().fn_type(&arg_types, false);
        let call = Self::err(self.builder.build_indirect_call(
            fn_type,
            fn_ptr,
            &args,
            &format!("dyn_{}", node.id),
        ))?;
        if let Some(value) = call.try_as_basic_value().basic() {
            self.values.insert(node.id, value);
        }
        Ok(())
    }

    // -- Unions -------------------------------------------------------------

    fn emit_union_construct(&mut self, node: &Node) -> Result<(), EmitError> {
        let tag = node.integer().unwrap_or(0);
        let mut fields: Vec<(u64, BasicValueEnum<'ctx>)> = Vec::with_capacity(node.inputs.len());
        // Payload fields pack consecutively after the i32 tag.
        let mut offset: u64 = 4;
        for &input in &node.inputs {
            let value = self.value(input)?;
            fields.push((offset, value));
            offset += type_size_bytes(self.context, value.get_type()) as u64;
        }
        let payload_bytes = (offset - 4) as u32;

        let i32t = self.context.i32_type();
        let union_type = if payload_bytes > 0 {
            self.context.struct_type(
                &[i32t.into(), self.context.i8_type().array_type(payload_bytes).into()],
                false,
            )
        } else {
            self.context.struct_type(&[i32t.into()], false)
        };
        let slot = Self::err(
            self.builder
                .build_alloca(union_type, &format!("union_{}", node.id)),
        )?;
        // Tag sits at offset zero.
        Self::err(
            self.builder
                .build_store(slot, i32t.const_int(tag as u64, true)),
        )?;

        let mut layout = Vec::with_capacity(fields.len());
        for (i, (field_offset, value)) in fields.into_iter().enumerate() {
            let gep = unsafe {
                Self::err(self.builder.build_in_bounds_gep(
                    self.context.i8_type(),
                    slot,
                    &[self.context.i64_type().const_int(field_offset, false)],
                    &format!("payload_{}_{}", node.id, i),
                ))?
            };
            Self::err(self.builder.build_store(gep, value))?;
            layout.push((field_offset, value.get_type()));
        }
        self.union_layouts.insert(node.id, layout);
        self.values.insert(node.id, slot.into());
        Ok(())
    }

    fn emit_union_tag_check(&mut self, node: &Node) -> Result<(), EmitError> {
        let expected = node.integer().unwrap_or(0);
        let scrutinee = self.value(node.inputs[0])?;
        let ptr = self.as_pointer(scrutinee)?;
        let i32t = self.context.i32_type();
        let tag = Self::err(self.builder.build_load(i32t, ptr, &format!("tag_{}", node.id)))?
            .into_int_value();
        let cmp = Self::err(self.builder.build_int_compare(
            IntPredicate::EQ,
            tag,
            i32t.const_int(expected as u64, true),
            &format!("istag_{}", node.id),
        ))?;
        self.values.insert(node.id, cmp.into());
        Ok(())
    }

    fn emit_union_payload_extract(&mut self, node: &Node) -> Result<(), EmitError> {
        let index = node.integer().unwrap_or(0) as usize;
        let scrutinee = self.value(node.inputs[0])?;
        let ptr = self.as_pointer(scrutinee)?;
        let (offset, field_type) = self
            .union_layouts
            .get(&node.inputs[0])
            .and_then(|layout| layout.get(index).copied())
            // Unknown construct site (e.g. a union passed in): assume
            // word-sized fields after the tag.
            .unwrap_or((4 + 4 * index as u64, self.context.i32_type().into()));
        let gep = unsafe {
            Self::err(self.builder.build_in_bounds_gep(
                self.context.i8_type(),
                ptr,
                &[self.context.i64_type().const_int(offset, false)],
                &format!("payloadptr_{}", node.id),
            ))?
        };
        let value = Self::err(self.builder.build_load(
            field_type,
            gep,
            &format!("payload_{}", node.id),
        ))?;
        self.values.insert(node.id, value);
        Ok(())
    }

    // -- Tensor / quantum / async runtime calls -----------------------------

    fn tensor_dims(&self, node: &Node) -> (u64, u64, u64) {
        let shape_of = |id: Option<&NodeId>| -> Vec<usize> {
            id.and_then(|&i| self.graph.node(i))
                .and_then(|n| n.tensor.as_ref())
                .map(|m| m.shape.clone())
                .unwrap_or_default()
        };
        let a = shape_of(node.inputs.first());
        let b = shape_of(node.inputs.get(1));
        let m = a.first().copied().unwrap_or(0) as u64;
        let k = a.get(1).copied().unwrap_or(0) as u64;
        let n = b.get(1).copied().unwrap_or(0) as u64;
        (m, n, k)
    }

    fn emit_tensor(&mut self, node: &Node) -> Result<(), EmitError> {
        let i64t = self.context.i64_type();
        let null = self.ptr_type().const_null();
        let operand = |emitter: &mut Self, index: usize| -> Result<PointerValue<'ctx>, EmitError> {
            match node.inputs.get(index) {
                Some(&input) => {
                    let value = emitter.value(input)?;
                    emitter.as_pointer(value)
                }
                None => Ok(null),
            }
        };

        let (symbol, args): (&str, Vec<BasicMetadataValueEnum<'ctx>>) = match node.op {
            Opcode::TensorMatmul | Opcode::TensorFusedMatmulRelu => {
                let a = operand(self, 0)?;
                let b = operand(self, 1)?;
                let (m, n, k) = self.tensor_dims(node);
                let symbol = if node.op == Opcode::TensorMatmul {
                    "npu_tensor_matmul"
                } else {
                    "npu_tensor_fused_matmul_relu"
                };
                (
                    symbol,
                    vec![
                        a.into(),
                        b.into(),
                        i64t.const_int(m, false).into(),
                        i64t.const_int(n, false).into(),
                        i64t.const_int(k, false).into(),
                    ],
                )
            }
            Opcode::TensorFusedMatmulAdd => {
                let a = operand(self, 0)?;
                let b = operand(self, 1)?;
                let bias = operand(self, 2)?;
                let (m, n, k) = self.tensor_dims(node);
                (
                    "npu_tensor_fused_matmul_add",
                    vec![
                        a.into(),
                        b.into(),
                        bias.into(),
                        i64t.const_int(m, false).into(),
                        i64t.const_int(n, false).into(),
                        i64t.const_int(k, false).into(),
                    ],
                )
            }
            Opcode::TensorConv => {
                let input = operand(self, 0)?;
                let kernel = operand(self, 1)?;
                ("npu_tensor_conv", vec![input.into(), kernel.into()])
            }
            Opcode::TensorScalarMul => {
                let a = operand(self, 0)?;
                let b = operand(self, 1)?;
                ("npu_tensor_scalar_mul", vec![a.into(), b.into()])
            }
            Opcode::TensorContract => {
                let a = operand(self, 0)?;
                let b = operand(self, 1)?;
                ("npu_tensor_contract", vec![a.into(), b.into()])
            }
            Opcode::TensorReduce => {
                let a = operand(self, 0)?;
                ("npu_tensor_reduce", vec![a.into()])
            }
            Opcode::TensorRelu => {
                let a = operand(self, 0)?;
                ("npu_tensor_relu", vec![a.into()])
            }
            Opcode::TensorSoftmax => {
                let a = operand(self, 0)?;
                ("npu_tensor_softmax", vec![a.into()])
            }
            other => {
                return Err(EmitError::InvalidGraph(format!(
                    "opcode {:?} is not a tensor op",
                    other
                )))
            }
        };

        let callee = self.resolve_callee(symbol)?;
        let call = Self::err(
            self.builder
                .build_call(callee, &args, &format!("tensor_{}", node.id)),
        )?;
        if let Some(value) = call.try_as_basic_value().basic() {
            self.values.insert(node.id, value);
        }
        Ok(())
    }

    fn emit_quantum_gate(&mut self, node: &Node) -> Result<(), EmitError> {
        let meta = node.quantum.clone().ok_or_else(|| {
            EmitError::InvalidGraph(format!("QuantumGate node {} has no metadata", node.id))
        })?;
        let state: BasicValueEnum<'ctx> = match node.inputs.first() {
            Some(&input) => {
                let value = self.value(input)?;
                self.as_pointer(value)?.into()
            }
            None => self.ptr_type().const_null().into(),
        };

        let i64t = self.context.i64_type();
        let qubit_count = meta.qubits.len();
        let qubit_arr_type = i64t.array_type(qubit_count as u32);
        let qubits = Self::err(
            self.builder
                .build_alloca(qubit_arr_type, &format!("qubits_{}", node.id)),
        )?;
        for (i, &q) in meta.qubits.iter().enumerate() {
            let gep = unsafe {
                Self::err(self.builder.build_in_bounds_gep(
                    qubit_arr_type,
                    qubits,
                    &[
                        self.context.i32_type().const_zero(),
                        self.context.i32_type().const_int(i as u64, false),
                    ],
                    &format!("qubit_{}_{}", node.id, i),
                ))?
            };
            Self::err(
                self.builder
                    .build_store(gep, i64t.const_int(q as u64, false)),
            )?;
        }

        let f64t = self.context.f64_type();
        let param_count = meta.parameters.len();
        let param_arr_type = f64t.array_type(param_count as u32);
        let params = Self::err(
            self.builder
                .build_alloca(param_arr_type, &format!("params_{}", node.id)),
        )?;
        for (i, &p) in meta.parameters.iter().enumerate() {
            let gep = unsafe {
                Self::err(self.builder.build_in_bounds_gep(
                    param_arr_type,
                    params,
                    &[
                        self.context.i32_type().const_zero(),
                        self.context.i32_type().const_int(i as u64, false),
                    ],
                    &format!("param_{}_{}", node.id, i),
                ))?
            };
            Self::err(self.builder.build_store(gep, f64t.const_float(p)))?;
        }

        let callee = self.resolve_callee("qpu_apply_gate")?;
        Self::err(self.builder.build_call(
            callee,
            &[
                state.into(),
                self.context
                    .i32_type()
                    .const_int(meta.gate.code() as u64, false)
                    .into(),
                qubits.into(),
                i64t.const_int(qubit_count as u64, false).into(),
                params.into(),
                i64t.const_int(param_count as u64, false).into(),
            ],
            &format!("gate_{}", node.id),
        ))?;

        // The runtime mutates the state in place; downstream consumers of
        // this node read the same state value.
        self.values.insert(node.id, state);
        Ok(())
    }

    fn emit_quantum_measure(&mut self, node: &Node) -> Result<(), EmitError> {
        let meta = node.quantum.clone().ok_or_else(|| {
            EmitError::InvalidGraph(format!("QuantumMeasure node {} has no metadata", node.id))
        })?;
        let state: BasicValueEnum<'ctx> = match node.inputs.first() {
            Some(&input) => {
                let value = self.value(input)?;
                self.as_pointer(value)?.into()
            }
            None => self.ptr_type().const_null().into(),
        };
        let qubit = meta.qubits.first().copied().unwrap_or(0);
        let callee = self.resolve_callee("qpu_measure")?;
        let call = Self::err(self.builder.build_call(
            callee,
            &[
                state.into(),
                self.context
                    .i64_type()
                    .const_int(qubit as u64, false)
                    .into(),
            ],
            &format!("measure_{}", node.id),
        ))?;
        if let Some(value) = call.try_as_basic_value().basic() {
            self.values.insert(node.id, value);
        }
        Ok(())
    }

    fn emit_task_spawn(&mut self, node: &Node) -> Result<(), EmitError> {
        let symbol = node.symbol().ok_or_else(|| {
            EmitError::InvalidGraph(format!("task node {} has no target symbol", node.id))
        })?;
        let target = self.resolve_callee(symbol)?;
        let fn_ptr = target.as_global_value().as_pointer_value();

        // Arguments travel in a stack context struct; a zero-argument
        // task gets a null context.
        let ctx_ptr: PointerValue<'ctx> = if node.inputs.is_empty() {
            self.ptr_type().const_null()
        } else {
            let mut field_types = Vec::with_capacity(node.inputs.len());
            let mut field_values = Vec::with_capacity(node.inputs.len());
            for &input in &node.inputs {
                let value = self.value(input)?;
                field_types.push(value.get_type());
                field_values.push(value);
            }
            let ctx_type = self.context.struct_type(&field_types, false);
            let slot = Self::err(
                self.builder
                    .build_alloca(ctx_type, &format!("taskctx_{}", node.id)),
            )?;
            for (i, value) in field_values.into_iter().enumerate() {
                let gep = Self::err(self.builder.build_struct_gep(
                    ctx_type,
                    slot,
                    i as u32,
                    &format!("taskarg_{}_{}", node.id, i),
                ))?;
                Self::err(self.builder.build_store(gep, value))?;
            }
            slot
        };

        let spawn = self.resolve_callee("janus_async_spawn")?;
        let call = Self::err(self.builder.build_call(
            spawn,
            &[fn_ptr.into(), ctx_ptr.into()],
            &format!("task_{}", node.id),
        ))?;
        if let Some(value) = call.try_as_basic_value().basic() {
            self.values.insert(node.id, value);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Size estimation for union payload layout
// ---------------------------------------------------------------------------

/// Compile-time byte-size estimate of an LLVM type, sufficient for the
/// tagged-union payload layout.
fn type_size_bytes(context: &Context, ty: BasicTypeEnum<'_>) -> u32 {
    match ty {
        BasicTypeEnum::IntType(t) => t.get_bit_width().div_ceil(8),
        BasicTypeEnum::FloatType(t) => {
            if t == context.f32_type() {
                4
            } else {
                8
            }
        }
        BasicTypeEnum::PointerType(_) => 8,
        BasicTypeEnum::ArrayType(t) => {
            type_size_bytes(context, t.get_element_type()) * t.len()
        }
        BasicTypeEnum::StructType(t) => {
            let mut total = 0;
            for i in 0..t.count_fields() {
                if let Some(f) = t.get_field_type_at_index(i) {
                    total += type_size_bytes(context, f);
                }
            }
            total
        }
        BasicTypeEnum::VectorType(_) | BasicTypeEnum::ScalableVectorType(_) => 16,
    }
}
