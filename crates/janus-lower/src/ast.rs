//! The AST snapshot contract.
//!
//! The parser and the AST-database service are external collaborators;
//! their only contract with the core is this read-only, unit-scoped node
//! table. Each node is `{id, kind, text, child range}` -- children are a
//! contiguous range into a flat child-id arena, so the whole snapshot is
//! two vectors and lookups never chase pointers.
//!
//! [`SnapshotBuilder`] constructs snapshots bottom-up (children before
//! parents), which is also how tests author source-shaped fixtures.

use serde::{Deserialize, Serialize};

/// Identifier of an AST node inside one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AstId(pub u32);

impl AstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Compilation-unit identifier, assigned by the AST database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitId(pub u32);

/// Node kinds the lowerer recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AstKind {
    SourceFile,
    FuncDecl,
    Param,
    TypeRef,
    Block,
    ExprStmt,
    LetStmt,
    VarStmt,
    ReturnStmt,
    IfStmt,
    WhileStmt,
    ForStmt,
    MatchStmt,
    MatchArm,
    NurseryStmt,
    LiteralInt,
    LiteralFloat,
    LiteralString,
    LiteralBool,
    Identifier,
    BinaryExpr,
    UnaryExpr,
    CallExpr,
    FieldExpr,
    IndexExpr,
    RangeExpr,
    ArrayLiteral,
    StructLiteral,
    EnumDecl,
    EnumVariant,
    UnionDecl,
    UnionVariant,
    TraitDecl,
    ImplDecl,
    FuncLit,
    AwaitExpr,
    AsyncExpr,
    SpawnExpr,
}

/// One row of the snapshot's node table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AstNode {
    pub kind: AstKind,
    /// Source atom: literal spelling, identifier name, operator, type
    /// path. `None` for purely structural nodes.
    pub text: Option<String>,
    /// `(start, len)` range into the snapshot's child arena.
    pub children: (u32, u32),
}

/// Read-only, unit-scoped AST node table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AstSnapshot {
    nodes: Vec<AstNode>,
    child_arena: Vec<AstId>,
    root: AstId,
}

impl AstSnapshot {
    /// Looks up a node by id.
    pub fn node(&self, id: AstId) -> Option<&AstNode> {
        self.nodes.get(id.index())
    }

    /// The node's kind; `None` for an out-of-range id.
    pub fn kind(&self, id: AstId) -> Option<AstKind> {
        self.node(id).map(|n| n.kind)
    }

    /// The node's text atom, if any.
    pub fn text(&self, id: AstId) -> Option<&str> {
        self.node(id).and_then(|n| n.text.as_deref())
    }

    /// The node's children, in source order. Empty for unknown ids.
    pub fn children(&self, id: AstId) -> &[AstId] {
        match self.node(id) {
            Some(n) => {
                let (start, len) = n.children;
                &self.child_arena[start as usize..(start + len) as usize]
            }
            None => &[],
        }
    }

    /// The snapshot's root, normally a `source_file`.
    pub fn root(&self) -> AstId {
        self.root
    }

    /// Number of nodes in the table.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the snapshot has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Bottom-up snapshot construction: children must exist before parents.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    nodes: Vec<AstNode>,
    child_arena: Vec<AstId>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        SnapshotBuilder::default()
    }

    /// Adds a node with children and an optional text atom.
    pub fn node(&mut self, kind: AstKind, text: Option<&str>, children: &[AstId]) -> AstId {
        let start = self.child_arena.len() as u32;
        self.child_arena.extend_from_slice(children);
        let id = AstId(self.nodes.len() as u32);
        self.nodes.push(AstNode {
            kind,
            text: text.map(str::to_string),
            children: (start, children.len() as u32),
        });
        id
    }

    /// Adds a childless node.
    pub fn leaf(&mut self, kind: AstKind, text: Option<&str>) -> AstId {
        self.node(kind, text, &[])
    }

    /// Convenience: an `identifier` leaf.
    pub fn ident(&mut self, name: &str) -> AstId {
        self.leaf(AstKind::Identifier, Some(name))
    }

    /// Convenience: a `literal_int` leaf.
    pub fn int(&mut self, value: i64) -> AstId {
        self.leaf(AstKind::LiteralInt, Some(&value.to_string()))
    }

    /// Finalizes the snapshot with the given root.
    pub fn build(self, root: AstId) -> AstSnapshot {
        AstSnapshot {
            nodes: self.nodes,
            child_arena: self.child_arena,
            root,
        }
    }
}
