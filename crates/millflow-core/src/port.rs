use crate::id::{MaterialId, NodePath};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag of the fuel input on heating devices.
pub const FUEL_PORT: &str = "fuel";

/// Addresses one port on a node. Ports are not stored; they are derived from
/// the node kind and its recipe.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PortKey {
    /// Positional port (recipe entry index, storage belt index, boundary index).
    Index(u32),
    /// Literal tag such as [`FUEL_PORT`].
    Named(String),
    /// One shared physical port per material, used by heating devices whose
    /// toppers each contribute flow of that material.
    Grouped(MaterialId),
}

impl PortKey {
    pub fn fuel() -> Self {
        PortKey::Named(FUEL_PORT.to_string())
    }

    pub fn is_fuel(&self) -> bool {
        matches!(self, PortKey::Named(tag) if tag == FUEL_PORT)
    }

    pub fn index(&self) -> Option<u32> {
        match self {
            PortKey::Index(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<u32> for PortKey {
    fn from(i: u32) -> Self {
        PortKey::Index(i)
    }
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKey::Index(i) => write!(f, "{i}"),
            PortKey::Named(tag) => f.write_str(tag),
            PortKey::Grouped(m) => write!(f, "group:{}", m.0),
        }
    }
}

/// Flow direction of a port relative to its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

/// Key of the published port map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortAddress {
    pub node: NodePath,
    pub direction: Direction,
    pub key: PortKey,
}

impl PortAddress {
    pub fn output(node: impl Into<NodePath>, key: impl Into<PortKey>) -> Self {
        Self {
            node: node.into(),
            direction: Direction::Output,
            key: key.into(),
        }
    }

    pub fn input(node: impl Into<NodePath>, key: impl Into<PortKey>) -> Self {
        Self {
            node: node.into(),
            direction: Direction::Input,
            key: key.into(),
        }
    }
}
