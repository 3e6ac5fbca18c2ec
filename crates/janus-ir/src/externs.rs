//! Extern registry and builtin catalog.
//!
//! Maps symbol names to signatures the lowerer and emitter treat as
//! predeclared. The lowerer consults it to ensure an unresolved call
//! target is either a locally lowered function, a registered extern, or a
//! predeclared builtin; the emitter consults it to synthesize a matching
//! external declaration at module scope on first use.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Signature of an external symbol, expressed with the same type names
/// the graph's parameter lists use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternSig {
    pub params: Vec<String>,
    pub ret: String,
    pub variadic: bool,
}

impl ExternSig {
    pub fn new(params: &[&str], ret: &str) -> Self {
        ExternSig {
            params: params.iter().map(|s| s.to_string()).collect(),
            ret: ret.to_string(),
            variadic: false,
        }
    }
}

/// Registry of external symbols, insertion-ordered so declaration output
/// is deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternRegistry {
    symbols: IndexMap<String, ExternSig>,
}

impl ExternRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        ExternRegistry::default()
    }

    /// A registry pre-populated with the runtime builtin catalog: console
    /// I/O, async primitives, and nursery scope management.
    pub fn with_builtins() -> Self {
        let mut reg = ExternRegistry::new();
        reg.register("janus_print", ExternSig::new(&["ptr"], "unit"));
        reg.register("janus_println", ExternSig::new(&["ptr"], "unit"));
        reg.register("janus_print_int", ExternSig::new(&["i64"], "unit"));
        reg.register("janus_async_spawn", ExternSig::new(&["ptr", "ptr"], "ptr"));
        reg.register("janus_async_await", ExternSig::new(&["ptr"], "i64"));
        reg.register("janus_task_is_cancelled", ExternSig::new(&[], "bool"));
        reg.register("janus_task_cancel", ExternSig::new(&["ptr"], "unit"));
        reg.register("janus_nursery_begin", ExternSig::new(&[], "ptr"));
        reg.register("janus_nursery_end", ExternSig::new(&["ptr"], "unit"));
        reg
    }

    /// Registers a symbol, replacing any previous signature under the
    /// same name.
    pub fn register(&mut self, name: impl Into<String>, sig: ExternSig) {
        self.symbols.insert(name.into(), sig);
    }

    /// Looks up a symbol's signature.
    pub fn get(&self, name: &str) -> Option<&ExternSig> {
        self.symbols.get(name)
    }

    /// Returns `true` if the symbol is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// Iterates `(name, signature)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExternSig)> {
        self.symbols.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of registered symbols.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Returns `true` if no symbols are registered.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
