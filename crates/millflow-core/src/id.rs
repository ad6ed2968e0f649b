use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Identifies a node in a flattened graph. Only valid for one solve.
    pub struct FlatNodeId;

    /// Identifies a connection in a flattened graph. Only valid for one solve.
    pub struct FlatConnectionId;
}

/// Identifies a material in the registry. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MaterialId(pub u32);

/// Identifies a machine definition in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MachineId(pub u32);

/// Identifies a recipe in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecipeId(pub u32);

/// Identifies a blueprint template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlueprintId(pub u32);

/// A user-authored node id. Unique within one layout or one blueprint template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// A user-authored connection id. Unique within one layout or one blueprint template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

/// Stable identity of a physical node: the chain of blueprint instance ids
/// leading to it, followed by its own id.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodePath(pub Vec<NodeId>);

impl NodePath {
    /// Path of a top-level node.
    pub fn root(id: NodeId) -> Self {
        Self(vec![id])
    }

    /// Path of `id` inside the scope named by `self`.
    pub fn child(&self, id: NodeId) -> Self {
        let mut ids = Vec::with_capacity(self.0.len() + 1);
        ids.extend_from_slice(&self.0);
        ids.push(id);
        Self(ids)
    }

    /// The node's own (innermost) id.
    pub fn leaf(&self) -> Option<NodeId> {
        self.0.last().copied()
    }

    /// The enclosing scope, or `None` for the empty path.
    pub fn parent(&self) -> Option<NodePath> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Nesting depth: 1 for top-level nodes.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", id.0)?;
        }
        Ok(())
    }
}

impl From<NodeId> for NodePath {
    fn from(id: NodeId) -> Self {
        Self::root(id)
    }
}

/// Identifies an authored connection. `scope` is the blueprint instance the
/// connection lives in (empty for top-level connections).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionPath {
    pub scope: NodePath,
    pub id: ConnectionId,
}

impl ConnectionPath {
    pub fn top_level(id: ConnectionId) -> Self {
        Self {
            scope: NodePath::default(),
            id,
        }
    }
}

impl fmt::Display for ConnectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scope.is_empty() {
            write!(f, "#{}", self.id.0)
        } else {
            write!(f, "{}#{}", self.scope, self.id.0)
        }
    }
}
