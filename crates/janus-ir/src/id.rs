//! Stable ID newtype for graph nodes.
//!
//! A `NodeId` is a distinct newtype wrapper over `u32` equal to the node's
//! index in its owning graph's node table. Ids are assigned in creation
//! order and never reused -- nodes are never removed, passes rewrite them
//! in place.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable node identifier. Equals the node's index in the owning
/// [`Graph`](crate::graph::Graph)'s node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Returns the id as a `usize` index into the node table.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
