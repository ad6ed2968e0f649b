//! Expands an authored layout and its blueprint instances into one
//! [`FlatGraph`] of physical nodes.
//!
//! Instances disappear: their children become ordinary nodes whose path is
//! the instance path plus the child's local id, and connections authored
//! against an instance's boundary ports are rewritten to the child port the
//! boundary resolves to. Malformed input (unknown blueprints, recursive
//! nesting, dangling endpoints) is logged and skipped.
//!
//! After expansion the flattener attaches virtual nodes: a shared sink for
//! every producing output nobody consumes, and (when auto-import is on) one
//! source per material for every required input nobody feeds.

use crate::config::CalculatorConfig;
use crate::graph::*;
use crate::id::*;
use crate::layout::{Blueprint, BlueprintLibrary, BoundaryMaterial, Endpoint, Layout, NodeKind};
use crate::port::{Direction, PortKey};
use crate::rates::{RateModel, declared_ports, static_port_material};
use crate::registry::Registry;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// What a local node id in one scope resolved to.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Physical(FlatNodeId),
    Instance(usize),
}

type ScopeTable = HashMap<NodeId, Slot>;

struct Flattener<'a> {
    library: &'a BlueprintLibrary,
    registry: &'a Registry,
    graph: FlatGraph,
    /// Blueprints currently being expanded, outermost first.
    stack: Vec<BlueprintId>,
}

/// Flatten `layout` into a physical graph with virtual nodes attached.
pub fn flatten(
    layout: &Layout,
    library: &BlueprintLibrary,
    registry: &Registry,
    config: &CalculatorConfig,
) -> FlatGraph {
    let mut flattener = Flattener {
        library,
        registry,
        graph: FlatGraph::new(),
        stack: Vec::new(),
    };
    flattener.expand(&NodePath::default(), layout, 1, None);
    let mut graph = flattener.graph;
    attach_virtual(&mut graph, registry, config);

    debug!(
        target: "millflow.flatten",
        nodes = graph.node_count(),
        connections = graph.connection_count(),
        instances = graph.instances().len(),
        "flattened layout"
    );
    graph
}

impl Flattener<'_> {
    fn expand(
        &mut self,
        scope: &NodePath,
        layout: &Layout,
        multiplier: u64,
        parent: Option<usize>,
    ) -> ScopeTable {
        let mut table = ScopeTable::new();

        for placed in &layout.nodes {
            let path = scope.child(placed.id);
            if table.contains_key(&placed.id) {
                warn!(target: "millflow.flatten", node = %path, "skipping duplicate node id");
                continue;
            }
            match &placed.kind {
                NodeKind::Blueprint { blueprint } => {
                    let count = placed.effective_count();
                    if let Some(idx) = self.expand_instance(path, *blueprint, count, multiplier, parent) {
                        table.insert(placed.id, Slot::Instance(idx));
                    }
                }
                kind => {
                    if let Some(kind) = FlatKind::from_placed(kind, parent.is_some()) {
                        let id = self.graph.add_node(FlatNode {
                            path,
                            kind,
                            count: placed.effective_count(),
                            multiplier,
                            parent,
                        });
                        table.insert(placed.id, Slot::Physical(id));
                    }
                }
            }
        }

        for conn in &layout.connections {
            let origin = ConnectionPath {
                scope: scope.clone(),
                id: conn.id,
            };
            let from = self.resolve(&table, &conn.from, Direction::Output);
            let to = self.resolve(&table, &conn.to, Direction::Input);
            match (from, to) {
                (Some((from, mut boundary)), Some((to, inner))) => {
                    boundary.extend(inner);
                    self.graph.connect(FlatConnection {
                        origin: Some(origin),
                        from,
                        to,
                        boundary,
                    });
                }
                _ => {
                    warn!(
                        target: "millflow.flatten",
                        connection = %origin,
                        "dropping connection with unresolvable endpoint"
                    );
                }
            }
        }

        table
    }

    fn expand_instance(
        &mut self,
        path: NodePath,
        blueprint: BlueprintId,
        count: u32,
        multiplier: u64,
        parent: Option<usize>,
    ) -> Option<usize> {
        let library = self.library;
        let Some(bp) = library.get(blueprint) else {
            warn!(target: "millflow.flatten", instance = %path, blueprint = blueprint.0, "unknown blueprint");
            return None;
        };
        if self.stack.contains(&blueprint) {
            warn!(target: "millflow.flatten", instance = %path, blueprint = blueprint.0, "recursive blueprint nesting");
            return None;
        }

        let idx = self.graph.push_instance(FlatInstance {
            path: path.clone(),
            blueprint,
            count,
            multiplier,
            parent,
            inputs: vec![None; bp.inputs.len()],
            outputs: vec![None; bp.outputs.len()],
        });

        self.stack.push(blueprint);
        let table = self.expand(&path, &bp.layout, multiplier.saturating_mul(u64::from(count)), Some(idx));
        self.stack.pop();

        let inputs = self.map_boundary(bp, &table, Direction::Input);
        let outputs = self.map_boundary(bp, &table, Direction::Output);
        let unmapped = inputs.iter().chain(&outputs).filter(|t| t.is_none()).count();
        if unmapped > 0 {
            debug!(target: "millflow.flatten", instance = %path, unmapped, "boundary ports left unmapped");
        }
        if let Some(instance) = self.graph.instance_mut(idx) {
            instance.inputs = inputs;
            instance.outputs = outputs;
        }
        Some(idx)
    }

    /// Resolve a local endpoint to a physical port. Endpoints on instances
    /// go through the instance's boundary mapping and record the crossing.
    fn resolve(
        &self,
        table: &ScopeTable,
        endpoint: &Endpoint,
        direction: Direction,
    ) -> Option<(FlatEndpoint, Vec<BoundaryLink>)> {
        match *table.get(&endpoint.node)? {
            Slot::Physical(node) => Some((
                FlatEndpoint {
                    node,
                    port: endpoint.port.clone(),
                },
                Vec::new(),
            )),
            Slot::Instance(instance) => {
                let index = endpoint.port.index()?;
                let inst = self.graph.instances().get(instance)?;
                let ports = match direction {
                    Direction::Input => &inst.inputs,
                    Direction::Output => &inst.outputs,
                };
                let target = ports.get(index as usize)?.as_ref()?;
                let mut links = vec![BoundaryLink {
                    instance,
                    direction,
                    index,
                }];
                links.extend(target.via.iter().copied());
                Some((target.endpoint.clone(), links))
            }
        }
    }

    /// Resolve every boundary port of one direction. Explicit targets claim
    /// their ports first; the rest take the first free matching child port.
    fn map_boundary(
        &self,
        bp: &Blueprint,
        table: &ScopeTable,
        direction: Direction,
    ) -> Vec<Option<BoundaryTarget>> {
        let ports = match direction {
            Direction::Input => &bp.inputs,
            Direction::Output => &bp.outputs,
        };
        let mut claimed: HashSet<(NodeId, PortKey)> = HashSet::new();
        let mut mapped = vec![None; ports.len()];

        for (i, port) in ports.iter().enumerate() {
            if let Some(target) = &port.target {
                claimed.insert((target.node, target.port.clone()));
                mapped[i] = self
                    .resolve(table, target, direction)
                    .map(|(endpoint, via)| BoundaryTarget { endpoint, via });
                if mapped[i].is_none() {
                    warn!(
                        target: "millflow.flatten",
                        blueprint = bp.id.0,
                        port = i,
                        "explicit boundary target does not resolve"
                    );
                }
            }
        }

        let connected: HashSet<(NodeId, PortKey)> = bp
            .layout
            .connections
            .iter()
            .map(|c| match direction {
                Direction::Input => (c.to.node, c.to.port.clone()),
                Direction::Output => (c.from.node, c.from.port.clone()),
            })
            .collect();

        for (i, port) in ports.iter().enumerate() {
            if port.target.is_none() {
                mapped[i] = self.auto_map(bp, table, direction, port.material, &connected, &mut claimed);
            }
        }
        mapped
    }

    fn auto_map(
        &self,
        bp: &Blueprint,
        table: &ScopeTable,
        direction: Direction,
        material: BoundaryMaterial,
        connected: &HashSet<(NodeId, PortKey)>,
        claimed: &mut HashSet<(NodeId, PortKey)>,
    ) -> Option<BoundaryTarget> {
        for placed in &bp.layout.nodes {
            let Some(slot) = table.get(&placed.id) else {
                continue;
            };
            for key in self.candidate_ports(*slot, direction, material) {
                let claim = (placed.id, key);
                if connected.contains(&claim) || claimed.contains(&claim) {
                    continue;
                }
                let local = Endpoint::new(claim.0, claim.1.clone());
                if let Some((endpoint, via)) = self.resolve(table, &local, direction) {
                    claimed.insert(claim);
                    return Some(BoundaryTarget { endpoint, via });
                }
            }
        }
        None
    }

    /// Ports on one child that carry `material` in `direction`.
    fn candidate_ports(&self, slot: Slot, direction: Direction, material: BoundaryMaterial) -> Vec<PortKey> {
        match slot {
            Slot::Physical(id) => {
                let Some(node) = self.graph.node(id) else {
                    return Vec::new();
                };
                match material {
                    BoundaryMaterial::Fuel => match (&node.kind, direction) {
                        (FlatKind::Heating { .. }, Direction::Input) => vec![PortKey::fuel()],
                        _ => Vec::new(),
                    },
                    BoundaryMaterial::Material(m) => declared_ports(self.registry, &node.kind, direction)
                        .into_iter()
                        .filter(|p| {
                            static_port_material(self.registry, &node.kind, direction, p) == Some(m)
                        })
                        .collect(),
                }
            }
            Slot::Instance(idx) => {
                let Some(nested) = self
                    .graph
                    .instances()
                    .get(idx)
                    .and_then(|inst| self.library.get(inst.blueprint))
                else {
                    return Vec::new();
                };
                let ports = match direction {
                    Direction::Input => &nested.inputs,
                    Direction::Output => &nested.outputs,
                };
                ports
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.material == material)
                    .map(|(i, _)| PortKey::Index(i as u32))
                    .collect()
            }
        }
    }
}

/// Connect virtual sources to unfed required inputs and the virtual sink to
/// unconsumed producing outputs.
fn attach_virtual(graph: &mut FlatGraph, registry: &Registry, config: &CalculatorConfig) {
    let ids: Vec<FlatNodeId> = graph.nodes().map(|(id, _)| id).collect();

    if config.solver.auto_import {
        let mut imports = Vec::new();
        {
            let model = RateModel::new(registry, graph, config);
            for &id in &ids {
                for port in model.required_inputs(id) {
                    if graph.has_input_on(id, &port) {
                        continue;
                    }
                    if let Some(material) = model.port_material(id, Direction::Input, &port) {
                        imports.push((id, port, material));
                    }
                }
            }
        }
        for (node, port, material) in imports {
            let source = graph.virtual_source(material);
            graph.connect(FlatConnection {
                origin: None,
                from: FlatEndpoint {
                    node: source,
                    port: PortKey::Index(0),
                },
                to: FlatEndpoint { node, port },
                boundary: Vec::new(),
            });
        }
    }

    let mut exports = Vec::new();
    {
        let model = RateModel::new(registry, graph, config);
        for &id in &ids {
            for port in model.producing_outputs(id) {
                if graph.has_output_on(id, &port) {
                    continue;
                }
                if model.port_material(id, Direction::Output, &port).is_some() {
                    exports.push((id, port));
                }
            }
        }
    }
    if !exports.is_empty() {
        let sink = graph.virtual_sink();
        for (node, port) in exports {
            graph.connect(FlatConnection {
                origin: None,
                from: FlatEndpoint { node, port },
                to: FlatEndpoint {
                    node: sink,
                    port: PortKey::Index(0),
                },
                boundary: Vec::new(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{BoundaryPort, PlacedNode};
    use crate::test_utils::*;

    fn flat(f: &Fixture, layout: &Layout, library: &BlueprintLibrary) -> FlatGraph {
        flatten(layout, library, &f.registry, &CalculatorConfig::default())
    }

    fn real_connections(graph: &FlatGraph) -> usize {
        graph.connections().filter(|(_, c)| !c.is_virtual()).count()
    }

    /// Blueprint: mill (1) feeding a bakery (2); input wheat, output bread.
    fn bread_line(f: &Fixture, id: u32) -> Blueprint {
        let mut bp = Blueprint::new(BlueprintId(id), "bread line");
        bp.layout.add_node(f.mill_node(1));
        bp.layout.add_node(f.bakery_node(2));
        link(&mut bp.layout, 1, 0, 2, 0);
        bp.inputs.push(BoundaryPort::material(f.wheat, 4.0));
        bp.outputs.push(BoundaryPort::material(f.bread, 2.0));
        bp
    }

    #[test]
    fn top_level_nodes_keep_their_ids() {
        let f = Fixture::new();
        let mut layout = Layout::new();
        layout.add_node(f.farm_node(1));
        layout.add_node(f.mill_node(2));
        link(&mut layout, 1, 0, 2, 0);
        let graph = flat(&f, &layout, &BlueprintLibrary::new());

        let farm = graph.node_by_path(&NodePath::root(NodeId(1))).unwrap();
        let mill = graph.node_by_path(&NodePath::root(NodeId(2))).unwrap();
        assert_eq!(real_connections(&graph), 1);
        let (_, conn) = graph.connections().find(|(_, c)| !c.is_virtual()).unwrap();
        assert_eq!(conn.from.node, farm);
        assert_eq!(conn.to.node, mill);
    }

    #[test]
    fn unconsumed_outputs_go_to_virtual_sink() {
        let f = Fixture::new();
        let mut layout = Layout::new();
        layout.add_node(f.farm_node(1));
        let graph = flat(&f, &layout, &BlueprintLibrary::new());
        let sink = graph.virtual_sink_id().unwrap();
        assert_eq!(graph.inputs(sink).len(), 1);
    }

    #[test]
    fn unfed_inputs_get_virtual_sources() {
        let f = Fixture::new();
        let mut layout = Layout::new();
        layout.add_node(f.mill_node(1));
        layout.add_node(f.mill_node(2));
        let graph = flat(&f, &layout, &BlueprintLibrary::new());
        // One shared source for wheat, one connection per mill.
        let sources: Vec<_> = graph
            .nodes()
            .filter(|(_, n)| matches!(n.kind, FlatKind::VirtualSource { .. }))
            .collect();
        assert_eq!(sources.len(), 1);
        assert_eq!(graph.outputs(sources[0].0).len(), 2);
    }

    #[test]
    fn auto_import_can_be_disabled() {
        let f = Fixture::new();
        let mut layout = Layout::new();
        layout.add_node(f.mill_node(1));
        let mut config = CalculatorConfig::default();
        config.solver.auto_import = false;
        let graph = flatten(&layout, &BlueprintLibrary::new(), &f.registry, &config);
        assert!(
            graph
                .nodes()
                .all(|(_, n)| !matches!(n.kind, FlatKind::VirtualSource { .. }))
        );
    }

    #[test]
    fn instance_children_get_scoped_paths_and_multiplier() {
        let f = Fixture::new();
        let mut library = BlueprintLibrary::new();
        library.insert(bread_line(&f, 1));
        let mut layout = Layout::new();
        layout.add_node(blueprint_node(5, 1).with_count(3));
        let graph = flat(&f, &layout, &library);

        let path = NodePath::root(NodeId(5)).child(NodeId(2));
        let bakery = graph.node(graph.node_by_path(&path).unwrap()).unwrap();
        assert_eq!(bakery.multiplier, 3);
        assert_eq!(bakery.effective_count(), 3.0);
        assert_eq!(bakery.parent, Some(0));
        assert_eq!(graph.instances()[0].path, NodePath::root(NodeId(5)));
    }

    #[test]
    fn nested_multipliers_compose() {
        let f = Fixture::new();
        let mut library = BlueprintLibrary::new();
        library.insert(bread_line(&f, 1));
        let mut outer = Blueprint::new(BlueprintId(2), "outer");
        outer.layout.add_node(blueprint_node(1, 1).with_count(2));
        library.insert(outer);

        let mut layout = Layout::new();
        layout.add_node(blueprint_node(9, 2).with_count(3));
        let graph = flat(&f, &layout, &library);
        let path = NodePath(vec![NodeId(9), NodeId(1), NodeId(1)]);
        let mill = graph.node(graph.node_by_path(&path).unwrap()).unwrap();
        assert_eq!(mill.multiplier, 6);
        assert_eq!(mill.parent, Some(1));
        assert_eq!(graph.instances()[1].parent, Some(0));
    }

    #[test]
    fn boundary_connections_are_rewritten() {
        let f = Fixture::new();
        let mut library = BlueprintLibrary::new();
        library.insert(bread_line(&f, 1));
        let mut layout = Layout::new();
        layout.add_node(f.farm_node(1));
        layout.add_node(blueprint_node(2, 1));
        layout.add_node(export_node(3));
        link(&mut layout, 1, 0, 2, 0);
        link(&mut layout, 2, 0, 3, 0);
        let graph = flat(&f, &layout, &library);

        let mill = graph
            .node_by_path(&NodePath::root(NodeId(2)).child(NodeId(1)))
            .unwrap();
        let bakery = graph
            .node_by_path(&NodePath::root(NodeId(2)).child(NodeId(2)))
            .unwrap();
        let into_mill: Vec<_> = graph
            .inputs(mill)
            .iter()
            .map(|&c| graph.connection(c).unwrap())
            .collect();
        assert_eq!(into_mill.len(), 1);
        assert_eq!(
            into_mill[0].boundary,
            vec![BoundaryLink {
                instance: 0,
                direction: Direction::Input,
                index: 0
            }]
        );
        // The bakery's bread goes to the export, not the virtual sink.
        let out = graph.connection(graph.outputs(bakery)[0]).unwrap();
        assert!(!out.is_virtual());
        assert_eq!(out.origin, Some(ConnectionPath::top_level(ConnectionId(1))));
    }

    #[test]
    fn explicit_target_wins_over_auto_mapping() {
        let f = Fixture::new();
        let mut bp = Blueprint::new(BlueprintId(1), "two mills");
        bp.layout.add_node(f.mill_node(1));
        bp.layout.add_node(f.mill_node(2));
        bp.inputs.push(BoundaryPort::material(f.wheat, 4.0).with_target(Endpoint::new(NodeId(2), 0u32)));
        bp.inputs.push(BoundaryPort::material(f.wheat, 4.0));
        let mut library = BlueprintLibrary::new();
        library.insert(bp);
        let mut layout = Layout::new();
        layout.add_node(blueprint_node(7, 1));
        let graph = flat(&f, &layout, &library);

        let inst = &graph.instances()[0];
        let first = inst.inputs[0].as_ref().unwrap();
        let second = inst.inputs[1].as_ref().unwrap();
        let scope = NodePath::root(NodeId(7));
        assert_eq!(Some(first.endpoint.node), graph.node_by_path(&scope.child(NodeId(2))));
        assert_eq!(Some(second.endpoint.node), graph.node_by_path(&scope.child(NodeId(1))));
    }

    #[test]
    fn fuel_marker_maps_to_heating_device() {
        let f = Fixture::new();
        let mut bp = Blueprint::new(BlueprintId(1), "oven");
        bp.layout.add_node(f.oven_node(1, None));
        bp.inputs.push(BoundaryPort::fuel(1.0));
        let mut library = BlueprintLibrary::new();
        library.insert(bp);
        let mut layout = Layout::new();
        layout.add_node(blueprint_node(1, 1));
        let graph = flat(&f, &layout, &library);
        let target = graph.instances()[0].inputs[0].as_ref().unwrap();
        assert!(target.endpoint.port.is_fuel());
    }

    #[test]
    fn unknown_and_recursive_blueprints_are_skipped() {
        let f = Fixture::new();
        let mut selfish = Blueprint::new(BlueprintId(1), "selfish");
        selfish.layout.add_node(f.mill_node(1));
        selfish.layout.add_node(blueprint_node(2, 1));
        let mut library = BlueprintLibrary::new();
        library.insert(selfish);

        let mut layout = Layout::new();
        layout.add_node(blueprint_node(1, 1));
        layout.add_node(blueprint_node(2, 42));
        layout.add_node(f.farm_node(3));
        link(&mut layout, 3, 0, 2, 0);
        let graph = flat(&f, &layout, &library);

        // Only the outer expansion of "selfish" happened.
        assert_eq!(graph.instances().len(), 1);
        assert!(graph.node_by_path(&NodePath(vec![NodeId(1), NodeId(1)])).is_some());
        assert_eq!(real_connections(&graph), 0);
    }

    #[test]
    fn dangling_connections_are_dropped() {
        let f = Fixture::new();
        let mut layout = Layout::new();
        layout.add_node(f.farm_node(1));
        link(&mut layout, 1, 0, 99, 0);
        let graph = flat(&f, &layout, &BlueprintLibrary::new());
        assert_eq!(real_connections(&graph), 0);
    }

    #[test]
    fn internal_exports_are_marked() {
        let f = Fixture::new();
        let mut bp = Blueprint::new(BlueprintId(1), "farm export");
        bp.layout.add_node(f.farm_node(1));
        bp.layout.add_node(export_node(2));
        link(&mut bp.layout, 1, 0, 2, 0);
        let mut library = BlueprintLibrary::new();
        library.insert(bp);
        let mut layout = Layout::new();
        layout.add_node(blueprint_node(1, 1));
        layout.add_node(PlacedNode::new(NodeId(2), NodeKind::Export));
        let graph = flat(&f, &layout, &library);

        let inner = graph
            .node(graph.node_by_path(&NodePath(vec![NodeId(1), NodeId(2)])).unwrap())
            .unwrap();
        let outer = graph
            .node(graph.node_by_path(&NodePath::root(NodeId(2))).unwrap())
            .unwrap();
        assert_eq!(inner.kind, FlatKind::Export { internal: true });
        assert_eq!(outer.kind, FlatKind::Export { internal: false });
    }
}
