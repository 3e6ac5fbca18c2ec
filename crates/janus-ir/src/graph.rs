//! The function graph: owning container and builder for a set of nodes.
//!
//! One [`Graph`] owns every node of one function, including lifted
//! closures' parents' `ClosureCreate` sites. Node ids are strictly
//! monotonic -- a node's id equals its creation order, and this is the only
//! ordering consumers may rely on when topologically emitting a graph.
//!
//! The builder mutates the graph but never frees nodes; removal is not an
//! operation. Passes rewrite opcodes or rewire edges of existing nodes
//! instead.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::IrError;
use crate::id::NodeId;
use crate::node::{InputList, Node};
use crate::ops::Opcode;
use crate::types::{DataValue, Level, QuantumMeta, Tenancy, TensorMeta};

/// A named, typed function parameter. `Argument` nodes reference their
/// parameter by integer index stored in `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub type_name: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Parameter {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// A captured variable of a lifted closure, referenced by
/// `ClosureEnvLoad` nodes through its index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    pub name: String,
    pub index: u32,
}

/// Owning container for the nodes of one function.
///
/// `captures` is nonempty iff this graph is a lifted closure with a
/// leading `__env` parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// Emitted symbol name (`main`, `__closure_0`, `Point_Drawable_draw`).
    pub function_name: String,
    /// Ordered declared parameters.
    pub parameters: Vec<Parameter>,
    /// Return type name.
    pub return_type: String,
    /// Capture table for lifted closures; empty otherwise.
    pub captures: Vec<Capture>,
    /// The node table. A node's id equals its index here.
    nodes: Vec<Node>,
    /// Tenancy newly created nodes inherit.
    current_tenancy: Tenancy,
}

impl Graph {
    /// Creates an empty graph with the given function name, an `i32`
    /// return type, and `CpuSerial` builder tenancy.
    pub fn new(name: impl Into<String>) -> Self {
        Graph {
            function_name: name.into(),
            parameters: Vec::new(),
            return_type: "i32".into(),
            captures: Vec::new(),
            nodes: Vec::new(),
            current_tenancy: Tenancy::CpuSerial,
        }
    }

    /// Creates an empty unnamed graph.
    pub fn new_unnamed() -> Self {
        Graph::new("")
    }

    // -----------------------------------------------------------------------
    // Builder tenancy
    // -----------------------------------------------------------------------

    /// Tenancy that newly created nodes inherit.
    pub fn current_tenancy(&self) -> Tenancy {
        self.current_tenancy
    }

    /// Sets the tenancy newly created nodes inherit, returning the
    /// previous value so callers can scope the change.
    pub fn set_current_tenancy(&mut self, tenancy: Tenancy) -> Tenancy {
        std::mem::replace(&mut self.current_tenancy, tenancy)
    }

    // -----------------------------------------------------------------------
    // Node creation
    // -----------------------------------------------------------------------

    /// Allocates a node with the builder's current tenancy, `High` level,
    /// empty inputs and empty data. Returns its id.
    pub fn create_node(&mut self, op: Opcode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(id, op, self.current_tenancy));
        id
    }

    /// Convenience: `Constant` carrying the given payload.
    pub fn create_constant(&mut self, value: DataValue) -> NodeId {
        let id = self.create_node(Opcode::Constant);
        self.nodes[id.index()].data = Some(value);
        id
    }

    /// Convenience: `Call` with the given arguments as inputs. The caller
    /// sets the target symbol via [`set_data`](Self::set_data).
    pub fn create_call(&mut self, args: &[NodeId]) -> NodeId {
        let id = self.create_node(Opcode::Call);
        self.nodes[id.index()].inputs = SmallVec::from_slice(args);
        id
    }

    /// Convenience: `Return` whose single input is the returned value.
    pub fn create_return(&mut self, value: NodeId) -> NodeId {
        let id = self.create_node(Opcode::Return);
        self.nodes[id.index()].inputs.push(value);
        id
    }

    /// Creates a node with the given inputs.
    pub fn create_node_with_inputs(&mut self, op: Opcode, inputs: &[NodeId]) -> NodeId {
        let id = self.create_node(op);
        self.nodes[id.index()].inputs = SmallVec::from_slice(inputs);
        id
    }

    // -----------------------------------------------------------------------
    // Mutation primitives (used by the lowerer and passes)
    // -----------------------------------------------------------------------

    /// Appends an input edge to a node. Used by the lowerer to close Phi
    /// back-edges after the loop body is built.
    pub fn push_input(&mut self, node: NodeId, input: NodeId) -> Result<(), IrError> {
        self.node_mut(node)?.inputs.push(input);
        Ok(())
    }

    /// Replaces a node's entire input list.
    pub fn set_inputs(&mut self, node: NodeId, inputs: InputList) -> Result<(), IrError> {
        self.node_mut(node)?.inputs = inputs;
        Ok(())
    }

    /// Sets a node's payload.
    pub fn set_data(&mut self, node: NodeId, data: DataValue) -> Result<(), IrError> {
        self.node_mut(node)?.data = Some(data);
        Ok(())
    }

    /// Rewrites a node's opcode in place, returning the old one.
    pub fn set_op(&mut self, node: NodeId, op: Opcode) -> Result<Opcode, IrError> {
        let n = self.node_mut(node)?;
        Ok(std::mem::replace(&mut n.op, op))
    }

    /// Sets a node's abstraction level.
    pub fn set_level(&mut self, node: NodeId, level: Level) -> Result<(), IrError> {
        self.node_mut(node)?.level = level;
        Ok(())
    }

    /// Sets a node's tenancy.
    pub fn set_tenancy(&mut self, node: NodeId, tenancy: Tenancy) -> Result<(), IrError> {
        self.node_mut(node)?.tenancy = tenancy;
        Ok(())
    }

    /// Attaches tensor metadata.
    pub fn set_tensor_meta(&mut self, node: NodeId, meta: TensorMeta) -> Result<(), IrError> {
        self.node_mut(node)?.tensor = Some(meta);
        Ok(())
    }

    /// Attaches quantum metadata.
    pub fn set_quantum_meta(&mut self, node: NodeId, meta: QuantumMeta) -> Result<(), IrError> {
        self.node_mut(node)?.quantum = Some(meta);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Access
    // -----------------------------------------------------------------------

    /// Looks up a node by id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Mutable lookup, erroring on an unknown id.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, IrError> {
        self.nodes
            .get_mut(id.index())
            .ok_or(IrError::InvalidNodeId { id })
    }

    /// The full node table in id order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Iterates node ids in creation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Counts how many nodes use `id` as an input, and returns the sole
    /// consumer when that count is exactly one. Used by rewrite passes
    /// that only fire on single-use chains.
    pub fn sole_consumer(&self, id: NodeId) -> Option<NodeId> {
        let mut found = None;
        for n in &self.nodes {
            if n.inputs.contains(&id) {
                if found.is_some() {
                    return None;
                }
                found = Some(n.id);
            }
        }
        found
    }
}
