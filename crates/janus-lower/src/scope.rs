//! Block-scoped symbol resolution for the function lowerer.
//!
//! Bindings carry provenance so later lookups can pick the right lowering:
//! plain SSA values, `var` slots (reads load, writes store), closure
//! values, trait objects (dynamic dispatch), nominally-typed struct values
//! (static dispatch), and captured names inside a lifted closure.

use indexmap::IndexMap;

use janus_ir::NodeId;

/// How a name was bound, which decides how references to it lower.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingKind {
    /// Plain single-assignment value.
    Value,
    /// `var` binding: the node is an `Alloca` slot.
    Slot,
    /// Bound to a `ClosureCreate`; calls become `ClosureCall`.
    Closure { function: String },
    /// Bound to a zero-capture `FnRef`; calls become plain `Call`s.
    FnRef { function: String },
    /// Bound to a `VtableConstruct` fat pointer.
    TraitObject { trait_name: String },
    /// Struct value with a known nominal type and field order.
    Record {
        type_name: String,
        fields: Vec<String>,
    },
    /// Captured name inside a lifted closure; references lower to
    /// `ClosureEnvLoad`. `by_ptr` captures hold a pointer to the
    /// original slot.
    EnvCapture { index: u32, by_ptr: bool },
}

/// One resolved binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub node: NodeId,
    pub kind: BindingKind,
    pub mutable: bool,
}

/// Stack of lexical scopes, innermost last.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<IndexMap<String, Binding>>,
}

impl ScopeStack {
    /// A stack with one root scope.
    pub fn new() -> Self {
        ScopeStack {
            scopes: vec![IndexMap::new()],
        }
    }

    pub fn push(&mut self) {
        self.scopes.push(IndexMap::new());
    }

    pub fn pop(&mut self) {
        self.scopes.pop();
    }

    /// Declares a name in the innermost scope, shadowing any outer
    /// binding of the same name.
    pub fn declare(&mut self, name: impl Into<String>, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), binding);
        }
    }

    /// Looks a name up, innermost scope first.
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    /// Rebinds the nearest binding of `name` to a new node, keeping its
    /// kind. Returns `false` if the name is unbound.
    pub fn assign(&mut self, name: &str, node: NodeId) -> bool {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(b) = scope.get_mut(name) {
                b.node = node;
                return true;
            }
        }
        false
    }

    /// Rebinds the nearest binding of `name`, replacing both node and
    /// kind. Used when a merge Phi takes over a definition.
    pub fn rebind(&mut self, name: &str, node: NodeId, kind: BindingKind) -> bool {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(b) = scope.get_mut(name) {
                b.node = node;
                b.kind = kind;
                return true;
            }
        }
        false
    }

    /// Flattened view of every visible binding's current definition.
    /// Inner scopes override outer ones.
    pub fn flatten(&self) -> IndexMap<String, NodeId> {
        let mut view = IndexMap::new();
        for scope in &self.scopes {
            for (name, b) in scope {
                view.insert(name.clone(), b.node);
            }
        }
        view
    }

    /// Restores bindings recorded by [`flatten`](Self::flatten). Names
    /// that no longer exist (they were scoped to a popped block) are
    /// ignored.
    pub fn restore(&mut self, view: &IndexMap<String, NodeId>) {
        for (name, node) in view {
            self.assign(name, *node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(node: u32) -> Binding {
        Binding {
            node: NodeId(node),
            kind: BindingKind::Value,
            mutable: false,
        }
    }

    #[test]
    fn inner_scopes_shadow_outer() {
        let mut s = ScopeStack::new();
        s.declare("x", value(1));
        s.push();
        s.declare("x", value(2));
        assert_eq!(s.lookup("x").unwrap().node, NodeId(2));
        s.pop();
        assert_eq!(s.lookup("x").unwrap().node, NodeId(1));
    }

    #[test]
    fn assign_updates_nearest_binding() {
        let mut s = ScopeStack::new();
        s.declare("x", value(1));
        s.push();
        assert!(s.assign("x", NodeId(9)));
        s.pop();
        assert_eq!(s.lookup("x").unwrap().node, NodeId(9));
        assert!(!s.assign("missing", NodeId(0)));
    }

    #[test]
    fn flatten_and_restore() {
        let mut s = ScopeStack::new();
        s.declare("x", value(1));
        s.declare("y", value(2));
        let before = s.flatten();

        s.assign("x", NodeId(7));
        assert_eq!(s.lookup("x").unwrap().node, NodeId(7));

        s.restore(&before);
        assert_eq!(s.lookup("x").unwrap().node, NodeId(1));
        assert_eq!(s.lookup("y").unwrap().node, NodeId(2));
    }

    #[test]
    fn rebind_replaces_kind() {
        let mut s = ScopeStack::new();
        s.declare("f", value(1));
        assert!(s.rebind(
            "f",
            NodeId(3),
            BindingKind::FnRef {
                function: "__closure_0".into()
            }
        ));
        let b = s.lookup("f").unwrap();
        assert_eq!(b.node, NodeId(3));
        assert!(matches!(b.kind, BindingKind::FnRef { .. }));
    }
}
