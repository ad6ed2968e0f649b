use crate::id::*;
use crate::layout::{NodeKind, Topper};
use crate::port::{Direction, PortKey};
use slotmap::{SecondaryMap, SlotMap};
use std::collections::{BTreeMap, HashMap};

// ---------------------------------------------------------------------------
// Core data structures
// ---------------------------------------------------------------------------

/// Physical node kinds after flattening. Blueprint instances are gone;
/// virtual sources and sinks exist only here.
#[derive(Debug, Clone, PartialEq)]
pub enum FlatKind {
    Machine {
        machine: MachineId,
        recipe: Option<RecipeId>,
    },
    Portal {
        material: Option<MaterialId>,
    },
    Nursery {
        machine: MachineId,
        plant: Option<MaterialId>,
        fertilizer: Option<MaterialId>,
    },
    Storage {
        machine: MachineId,
        inventory: BTreeMap<MaterialId, u32>,
    },
    /// `internal` is true for exports nested inside a blueprint.
    Export {
        internal: bool,
    },
    Heating {
        machine: MachineId,
        toppers: Vec<Topper>,
        fuel: Option<MaterialId>,
    },
    /// Unlimited supply of one material.
    VirtualSource {
        material: MaterialId,
    },
    /// Unlimited demand for anything.
    VirtualSink,
}

impl FlatKind {
    /// Convert a placed node kind. Returns `None` for blueprint instances,
    /// which have no physical counterpart.
    pub fn from_placed(kind: &NodeKind, nested: bool) -> Option<Self> {
        Some(match kind {
            NodeKind::Machine { machine, recipe } => FlatKind::Machine {
                machine: *machine,
                recipe: *recipe,
            },
            NodeKind::Portal { material } => FlatKind::Portal {
                material: *material,
            },
            NodeKind::Nursery {
                machine,
                plant,
                fertilizer,
            } => FlatKind::Nursery {
                machine: *machine,
                plant: *plant,
                fertilizer: *fertilizer,
            },
            NodeKind::Storage { machine, inventory } => FlatKind::Storage {
                machine: *machine,
                inventory: inventory.clone(),
            },
            NodeKind::Export => FlatKind::Export { internal: nested },
            NodeKind::Heating {
                machine,
                toppers,
                fuel,
            } => FlatKind::Heating {
                machine: *machine,
                toppers: toppers.clone(),
                fuel: *fuel,
            },
            NodeKind::Blueprint { .. } => return None,
        })
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, FlatKind::VirtualSource { .. } | FlatKind::VirtualSink)
    }

    /// Sinks with unlimited demand that only take surplus.
    pub fn is_sink(&self) -> bool {
        matches!(self, FlatKind::Export { .. } | FlatKind::VirtualSink)
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, FlatKind::Storage { .. })
    }

    /// Nodes whose throughput is throttled by downstream demand.
    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            FlatKind::Machine { .. }
                | FlatKind::Portal { .. }
                | FlatKind::Nursery { .. }
                | FlatKind::Heating { .. }
        )
    }
}

/// A physical node in the flattened graph.
#[derive(Debug, Clone)]
pub struct FlatNode {
    pub path: NodePath,
    pub kind: FlatKind,
    /// The node's own count.
    pub count: u32,
    /// Product of the counts of every enclosing blueprint instance.
    pub multiplier: u64,
    /// Index into [`FlatGraph::instances`] of the enclosing instance.
    pub parent: Option<usize>,
}

impl FlatNode {
    /// Number of physical machines this node stands for.
    pub fn effective_count(&self) -> f64 {
        f64::from(self.count.max(1)) * self.multiplier as f64
    }

    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }
}

/// A resolved port on a physical node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlatEndpoint {
    pub node: FlatNodeId,
    pub port: PortKey,
}

/// Records that a connection was authored against a blueprint instance's
/// boundary port and rewritten to the mapped child port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryLink {
    pub instance: usize,
    pub direction: Direction,
    pub index: u32,
}

/// A connection between two physical ports.
#[derive(Debug, Clone)]
pub struct FlatConnection {
    /// The authored connection, or `None` for virtual connections.
    pub origin: Option<ConnectionPath>,
    pub from: FlatEndpoint,
    pub to: FlatEndpoint,
    /// Boundary ports this connection crosses, outermost first.
    pub boundary: Vec<BoundaryLink>,
}

impl FlatConnection {
    pub fn is_virtual(&self) -> bool {
        self.origin.is_none()
    }
}

/// Where a blueprint boundary port resolves to, plus the nested boundaries
/// crossed on the way down.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryTarget {
    pub endpoint: FlatEndpoint,
    pub via: Vec<BoundaryLink>,
}

/// A flattened blueprint instance. Not a node: its ports resolve to child
/// ports through `inputs` / `outputs`.
#[derive(Debug, Clone)]
pub struct FlatInstance {
    pub path: NodePath,
    pub blueprint: BlueprintId,
    pub count: u32,
    /// Multiplier of the instance itself (product of its ancestors' counts).
    pub multiplier: u64,
    pub parent: Option<usize>,
    /// Child port each boundary input resolves to, by boundary index.
    pub inputs: Vec<Option<BoundaryTarget>>,
    /// Child port each boundary output resolves to, by boundary index.
    pub outputs: Vec<Option<BoundaryTarget>>,
}

/// Adjacency lists for a single node, tracking incoming and outgoing connections.
#[derive(Debug, Clone, Default)]
struct NodeAdjacency {
    inputs: Vec<FlatConnectionId>,
    outputs: Vec<FlatConnectionId>,
}

// ---------------------------------------------------------------------------
// FlatGraph
// ---------------------------------------------------------------------------

/// The physical graph one solve works on. Built by the flattener, read-only
/// afterwards.
///
/// Adjacency is stored in a `SecondaryMap` keyed by `FlatNodeId`, so it always
/// stays in sync with the primary `nodes` SlotMap. A freshly built SlotMap
/// iterates in insertion order, which keeps every solve deterministic.
#[derive(Debug, Clone, Default)]
pub struct FlatGraph {
    nodes: SlotMap<FlatNodeId, FlatNode>,
    connections: SlotMap<FlatConnectionId, FlatConnection>,
    adjacency: SecondaryMap<FlatNodeId, NodeAdjacency>,
    /// Node path -> physical node.
    by_path: HashMap<NodePath, FlatNodeId>,
    instances: Vec<FlatInstance>,
    virtual_sink: Option<FlatNodeId>,
    virtual_sources: BTreeMap<MaterialId, FlatNodeId>,
}

impl FlatGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Construction (flattener only)
    // -----------------------------------------------------------------------

    pub(crate) fn add_node(&mut self, node: FlatNode) -> FlatNodeId {
        let path = node.path.clone();
        let id = self.nodes.insert(node);
        self.adjacency.insert(id, NodeAdjacency::default());
        self.by_path.insert(path, id);
        id
    }

    pub(crate) fn connect(&mut self, connection: FlatConnection) -> FlatConnectionId {
        let from = connection.from.node;
        let to = connection.to.node;
        let id = self.connections.insert(connection);
        if let Some(adj) = self.adjacency.get_mut(from) {
            adj.outputs.push(id);
        }
        if let Some(adj) = self.adjacency.get_mut(to) {
            adj.inputs.push(id);
        }
        id
    }

    pub(crate) fn push_instance(&mut self, instance: FlatInstance) -> usize {
        self.instances.push(instance);
        self.instances.len() - 1
    }

    pub(crate) fn instance_mut(&mut self, idx: usize) -> Option<&mut FlatInstance> {
        self.instances.get_mut(idx)
    }

    /// The shared virtual sink, created on first use.
    pub(crate) fn virtual_sink(&mut self) -> FlatNodeId {
        if let Some(id) = self.virtual_sink {
            return id;
        }
        let id = self.add_virtual(FlatKind::VirtualSink);
        self.virtual_sink = Some(id);
        id
    }

    /// The virtual source for `material`, created on first use.
    pub(crate) fn virtual_source(&mut self, material: MaterialId) -> FlatNodeId {
        if let Some(&id) = self.virtual_sources.get(&material) {
            return id;
        }
        let id = self.add_virtual(FlatKind::VirtualSource { material });
        self.virtual_sources.insert(material, id);
        id
    }

    fn add_virtual(&mut self, kind: FlatKind) -> FlatNodeId {
        let id = self.nodes.insert(FlatNode {
            path: NodePath::default(),
            kind,
            count: 1,
            multiplier: 1,
            parent: None,
        });
        self.adjacency.insert(id, NodeAdjacency::default());
        id
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn node(&self, id: FlatNodeId) -> Option<&FlatNode> {
        self.nodes.get(id)
    }

    pub fn connection(&self, id: FlatConnectionId) -> Option<&FlatConnection> {
        self.connections.get(id)
    }

    /// Look up a physical node by its path.
    pub fn node_by_path(&self, path: &NodePath) -> Option<FlatNodeId> {
        self.by_path.get(path).copied()
    }

    /// Connections entering a node.
    pub fn inputs(&self, node: FlatNodeId) -> &[FlatConnectionId] {
        self.adjacency
            .get(node)
            .map(|adj| adj.inputs.as_slice())
            .unwrap_or(&[])
    }

    /// Connections leaving a node.
    pub fn outputs(&self, node: FlatNodeId) -> &[FlatConnectionId] {
        self.adjacency
            .get(node)
            .map(|adj| adj.outputs.as_slice())
            .unwrap_or(&[])
    }

    /// Connections entering one port of a node.
    pub fn inputs_on<'a>(
        &'a self,
        node: FlatNodeId,
        port: &'a PortKey,
    ) -> impl Iterator<Item = FlatConnectionId> + 'a {
        self.inputs(node).iter().copied().filter(move |&c| {
            self.connections
                .get(c)
                .is_some_and(|conn| conn.to.port == *port)
        })
    }

    /// Connections leaving one port of a node.
    pub fn outputs_on<'a>(
        &'a self,
        node: FlatNodeId,
        port: &'a PortKey,
    ) -> impl Iterator<Item = FlatConnectionId> + 'a {
        self.outputs(node).iter().copied().filter(move |&c| {
            self.connections
                .get(c)
                .is_some_and(|conn| conn.from.port == *port)
        })
    }

    pub fn has_input_on(&self, node: FlatNodeId, port: &PortKey) -> bool {
        self.inputs_on(node, port).next().is_some()
    }

    pub fn has_output_on(&self, node: FlatNodeId, port: &PortKey) -> bool {
        self.outputs_on(node, port).next().is_some()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (FlatNodeId, &FlatNode)> {
        self.nodes.iter()
    }

    pub fn connections(&self) -> impl Iterator<Item = (FlatConnectionId, &FlatConnection)> {
        self.connections.iter()
    }

    pub fn instances(&self) -> &[FlatInstance] {
        &self.instances
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn virtual_sink_id(&self) -> Option<FlatNodeId> {
        self.virtual_sink
    }

    // -----------------------------------------------------------------------
    // Cycle detection (three-colour DFS)
    // -----------------------------------------------------------------------

    /// Returns true if the subgraph of authored connections between nodes
    /// accepted by `include` contains a cycle. Self-loops count.
    pub fn has_cycle_where<F>(&self, include: F) -> bool
    where
        F: Fn(&FlatNode) -> bool,
    {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Colour {
            White,
            Grey,
            Black,
        }

        let starts: Vec<FlatNodeId> = self
            .nodes
            .iter()
            .filter(|&(_, node)| include(node))
            .map(|(id, _)| id)
            .collect();
        let mut colour: SecondaryMap<FlatNodeId, Colour> = SecondaryMap::new();
        for &id in &starts {
            colour.insert(id, Colour::White);
        }

        let successors = |id: FlatNodeId| -> Vec<FlatNodeId> {
            self.outputs(id)
                .iter()
                .filter_map(|&c| self.connections.get(c))
                .filter(|c| !c.is_virtual())
                .map(|c| c.to.node)
                .filter(|&to| self.nodes.get(to).is_some_and(&include))
                .collect()
        };

        for start in starts {
            if colour.get(start) != Some(&Colour::White) {
                continue;
            }
            // Iterative DFS: (node, successors, next successor index).
            let mut stack: Vec<(FlatNodeId, Vec<FlatNodeId>, usize)> =
                vec![(start, successors(start), 0)];
            colour.insert(start, Colour::Grey);

            while let Some((node, succ, idx)) = stack.last_mut() {
                if *idx < succ.len() {
                    let next = succ[*idx];
                    *idx += 1;
                    match colour.get(next) {
                        Some(Colour::Grey) => return true,
                        Some(Colour::White) => {
                            colour.insert(next, Colour::Grey);
                            let next_succ = successors(next);
                            stack.push((next, next_succ, 0));
                        }
                        _ => {}
                    }
                } else {
                    colour.insert(*node, Colour::Black);
                    stack.pop();
                }
            }
        }
        false
    }

    /// Every node, ordered so that each connection outside a cycle runs
    /// from an earlier node to a later one. Virtual connections count.
    ///
    /// Reverse DFS postorder; inside a cycle the edge that closes it is the
    /// one pointing backwards.
    pub fn topological_order(&self) -> Vec<FlatNodeId> {
        let mut visited: SecondaryMap<FlatNodeId, ()> = SecondaryMap::new();
        let mut postorder = Vec::with_capacity(self.nodes.len());

        let successors = |id: FlatNodeId| -> Vec<FlatNodeId> {
            self.outputs(id)
                .iter()
                .filter_map(|&c| self.connections.get(c))
                .map(|c| c.to.node)
                .filter(|&to| self.nodes.contains_key(to))
                .collect()
        };

        for start in self.nodes.keys() {
            if visited.contains_key(start) {
                continue;
            }
            visited.insert(start, ());
            let mut stack: Vec<(FlatNodeId, Vec<FlatNodeId>, usize)> =
                vec![(start, successors(start), 0)];

            while let Some((node, succ, idx)) = stack.last_mut() {
                if *idx < succ.len() {
                    let next = succ[*idx];
                    *idx += 1;
                    if !visited.contains_key(next) {
                        visited.insert(next, ());
                        let next_succ = successors(next);
                        stack.push((next, next_succ, 0));
                    }
                } else {
                    postorder.push(*node);
                    stack.pop();
                }
            }
        }
        postorder.reverse();
        postorder
    }
}
