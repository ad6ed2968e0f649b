//! The authored production network: placed nodes, connections, and
//! blueprint templates.
//!
//! A [`Layout`] is what the user edits. It is never solved directly; the
//! flattener expands it (and every blueprint instance it contains) into a
//! [`FlatGraph`](crate::graph::FlatGraph) first.

use crate::id::*;
use crate::port::PortKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Structural problems in an authored layout or blueprint template.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("duplicate node id: {0:?}")]
    DuplicateNode(NodeId),
    #[error("duplicate connection id: {0:?}")]
    DuplicateConnection(ConnectionId),
    #[error("connection {connection:?} references unknown node {node:?}")]
    UnknownEndpoint {
        connection: ConnectionId,
        node: NodeId,
    },
    #[error("blueprint not found: {0:?}")]
    BlueprintNotFound(BlueprintId),
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// A machine sitting on a heating device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topper {
    pub machine: MachineId,
    pub recipe: Option<RecipeId>,
}

/// What a placed node is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// A standard machine running at most one recipe.
    Machine {
        machine: MachineId,
        recipe: Option<RecipeId>,
    },
    /// Buys `material` at conveyor speed.
    Portal { material: Option<MaterialId> },
    /// Grows `plant` from fertilizer. `fertilizer` is the preview selection
    /// used when no fertilizer is connected.
    Nursery {
        machine: MachineId,
        plant: Option<MaterialId>,
        fertilizer: Option<MaterialId>,
    },
    /// Buffers items; one belt per port. `inventory` is the manual stock.
    Storage {
        machine: MachineId,
        #[serde(default)]
        inventory: BTreeMap<MaterialId, u32>,
    },
    /// Planning sink with unlimited demand.
    Export,
    /// Burns fuel to run its toppers. `fuel` is the preview selection.
    Heating {
        machine: MachineId,
        toppers: Vec<Topper>,
        fuel: Option<MaterialId>,
    },
    /// An instance of a blueprint template.
    Blueprint { blueprint: BlueprintId },
}

impl NodeKind {
    /// The machine definition behind this node, if it has one.
    pub fn machine(&self) -> Option<MachineId> {
        match self {
            NodeKind::Machine { machine, .. }
            | NodeKind::Nursery { machine, .. }
            | NodeKind::Storage { machine, .. }
            | NodeKind::Heating { machine, .. } => Some(*machine),
            NodeKind::Portal { .. } | NodeKind::Export | NodeKind::Blueprint { .. } => None,
        }
    }
}

/// A node placed by the user, either on the canvas or inside a blueprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedNode {
    pub id: NodeId,
    /// Number of identical instances this node stands for. Zero reads as one.
    #[serde(default = "default_count")]
    pub count: u32,
    pub kind: NodeKind,
}

fn default_count() -> u32 {
    1
}

impl PlacedNode {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self { id, count: 1, kind }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn effective_count(&self) -> u32 {
        self.count.max(1)
    }
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// One end of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub node: NodeId,
    pub port: PortKey,
}

impl Endpoint {
    pub fn new(node: NodeId, port: impl Into<PortKey>) -> Self {
        Self {
            node,
            port: port.into(),
        }
    }
}

/// A conveyor from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub from: Endpoint,
    pub to: Endpoint,
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Nodes and connections at one level of the hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub nodes: Vec<PlacedNode>,
    pub connections: Vec<Connection>,
    #[serde(skip)]
    next_connection: u32,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a node. Returns its id for chaining into [`Layout::connect`].
    pub fn add_node(&mut self, node: PlacedNode) -> NodeId {
        let id = node.id;
        self.nodes.push(node);
        id
    }

    /// Connect `from` to `to` with a fresh connection id.
    pub fn connect(&mut self, from: Endpoint, to: Endpoint) -> ConnectionId {
        let used: HashSet<ConnectionId> = self.connections.iter().map(|c| c.id).collect();
        while used.contains(&ConnectionId(self.next_connection)) {
            self.next_connection += 1;
        }
        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;
        self.connections.push(Connection { id, from, to });
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&PlacedNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Check id uniqueness and endpoint references.
    pub fn validate(&self) -> Result<(), LayoutError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id) {
                return Err(LayoutError::DuplicateNode(node.id));
            }
        }
        let mut seen_conn = HashSet::new();
        for conn in &self.connections {
            if !seen_conn.insert(conn.id) {
                return Err(LayoutError::DuplicateConnection(conn.id));
            }
            for end in [&conn.from, &conn.to] {
                if !seen.contains(&end.node) {
                    return Err(LayoutError::UnknownEndpoint {
                        connection: conn.id,
                        node: end.node,
                    });
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Blueprints
// ---------------------------------------------------------------------------

/// Material carried by a blueprint boundary port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryMaterial {
    Material(MaterialId),
    /// Whatever fuel the internal heating device burns.
    Fuel,
}

/// A declared external input or output of a blueprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryPort {
    pub material: BoundaryMaterial,
    /// Declared rate in items/min, informational.
    pub rate: f64,
    /// Internal port this boundary port feeds. Resolved automatically when
    /// absent.
    #[serde(default)]
    pub target: Option<Endpoint>,
}

impl BoundaryPort {
    pub fn material(material: MaterialId, rate: f64) -> Self {
        Self {
            material: BoundaryMaterial::Material(material),
            rate,
            target: None,
        }
    }

    pub fn fuel(rate: f64) -> Self {
        Self {
            material: BoundaryMaterial::Fuel,
            rate,
            target: None,
        }
    }

    pub fn with_target(mut self, target: Endpoint) -> Self {
        self.target = Some(target);
        self
    }
}

/// A reusable sub-graph template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub id: BlueprintId,
    pub name: String,
    pub layout: Layout,
    #[serde(default)]
    pub inputs: Vec<BoundaryPort>,
    #[serde(default)]
    pub outputs: Vec<BoundaryPort>,
}

impl Blueprint {
    pub fn new(id: BlueprintId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            layout: Layout::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Blueprints directly instantiated inside this one, in template order.
    pub fn nested(&self) -> impl Iterator<Item = (BlueprintId, u32)> + '_ {
        self.layout.nodes.iter().filter_map(|n| match n.kind {
            NodeKind::Blueprint { blueprint } => Some((blueprint, n.effective_count())),
            _ => None,
        })
    }
}

/// All blueprint templates known to the calculator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlueprintLibrary {
    blueprints: BTreeMap<BlueprintId, Blueprint>,
}

impl BlueprintLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a template. Returns the previous definition.
    pub fn insert(&mut self, blueprint: Blueprint) -> Option<Blueprint> {
        self.blueprints.insert(blueprint.id, blueprint)
    }

    pub fn get(&self, id: BlueprintId) -> Option<&Blueprint> {
        self.blueprints.get(&id)
    }

    pub fn remove(&mut self, id: BlueprintId) -> Option<Blueprint> {
        self.blueprints.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BlueprintId, &Blueprint)> {
        self.blueprints.iter()
    }

    pub fn len(&self) -> usize {
        self.blueprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blueprints.is_empty()
    }

    /// Validate every template's layout and nested references.
    pub fn validate(&self) -> Result<(), LayoutError> {
        for bp in self.blueprints.values() {
            bp.layout.validate()?;
            for (nested, _) in bp.nested() {
                if !self.blueprints.contains_key(&nested) {
                    return Err(LayoutError::BlueprintNotFound(nested));
                }
            }
        }
        Ok(())
    }
}
