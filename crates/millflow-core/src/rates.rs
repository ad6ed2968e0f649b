//! Capacity queries over a flattened graph.
//!
//! Every rate here is in items per minute at the node's full capacity:
//! counted by `count * multiplier` but never scaled by efficiency. Missing
//! registry references degrade to a zero rate instead of failing.

use crate::config::CalculatorConfig;
use crate::graph::{FlatGraph, FlatKind, FlatNode};
use crate::id::*;
use crate::layout::Topper;
use crate::port::{Direction, PortKey};
use crate::registry::{MachineKind, MaterialRole, Recipe, Registry};

/// Pass-through material lookups (storage feeding storage) stop here.
const MAX_MATERIAL_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// Static port listings (no graph required)
// ---------------------------------------------------------------------------

/// Ports a node kind exposes in one direction, in declaration order.
///
/// Export and virtual sink inputs are open-ended and not listed.
pub fn declared_ports(registry: &Registry, kind: &FlatKind, direction: Direction) -> Vec<PortKey> {
    match (kind, direction) {
        (FlatKind::Machine { recipe, .. }, dir) => recipe
            .and_then(|r| registry.recipe(r))
            .map(|r| {
                let entries = match dir {
                    Direction::Input => &r.inputs,
                    Direction::Output => &r.outputs,
                };
                (0..entries.len() as u32).map(PortKey::Index).collect()
            })
            .unwrap_or_default(),
        (FlatKind::Portal { .. }, Direction::Output)
        | (FlatKind::VirtualSource { .. }, Direction::Output)
        | (FlatKind::Nursery { .. }, _) => vec![PortKey::Index(0)],
        (FlatKind::Storage { machine, .. }, dir) => {
            let n = registry
                .machine(*machine)
                .map(|def| match dir {
                    Direction::Input => def.input_ports,
                    Direction::Output => def.output_ports,
                })
                .unwrap_or(0);
            (0..n).map(PortKey::Index).collect()
        }
        (FlatKind::Heating { toppers, .. }, dir) => {
            let mut ports = Vec::new();
            if dir == Direction::Input {
                ports.push(PortKey::fuel());
            }
            for m in topper_materials(registry, toppers, dir) {
                ports.push(PortKey::Grouped(m));
            }
            ports
        }
        _ => Vec::new(),
    }
}

/// Material on a port that is fixed by the node itself (recipe entries and
/// selections). Pass-through ports return `None`.
pub fn static_port_material(
    registry: &Registry,
    kind: &FlatKind,
    direction: Direction,
    port: &PortKey,
) -> Option<MaterialId> {
    match (kind, direction, port) {
        (FlatKind::Machine { recipe, .. }, dir, PortKey::Index(i)) => {
            let recipe = registry.recipe((*recipe)?)?;
            let entries = match dir {
                Direction::Input => &recipe.inputs,
                Direction::Output => &recipe.outputs,
            };
            entries.get(*i as usize).map(|e| e.material)
        }
        (FlatKind::Portal { material }, Direction::Output, PortKey::Index(0)) => *material,
        (FlatKind::VirtualSource { material }, Direction::Output, PortKey::Index(0)) => {
            Some(*material)
        }
        (FlatKind::Nursery { plant, .. }, Direction::Output, PortKey::Index(0)) => *plant,
        (FlatKind::Nursery { fertilizer, .. }, Direction::Input, PortKey::Index(0)) => *fertilizer,
        (FlatKind::Heating { fuel, .. }, Direction::Input, key) if key.is_fuel() => *fuel,
        (FlatKind::Heating { .. }, _, PortKey::Grouped(m)) => Some(*m),
        _ => None,
    }
}

/// Distinct materials the toppers' recipes consume (or produce), in first
/// appearance order.
fn topper_materials(registry: &Registry, toppers: &[Topper], direction: Direction) -> Vec<MaterialId> {
    let mut out = Vec::new();
    for recipe in toppers.iter().filter_map(|t| t.recipe.and_then(|r| registry.recipe(r))) {
        let entries = match direction {
            Direction::Input => &recipe.inputs,
            Direction::Output => &recipe.outputs,
        };
        for e in entries {
            if !out.contains(&e.material) {
                out.push(e.material);
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// RateModel
// ---------------------------------------------------------------------------

/// Read-only view combining the registry, the flattened graph and the
/// calculator configuration.
#[derive(Clone, Copy)]
pub struct RateModel<'a> {
    pub registry: &'a Registry,
    pub graph: &'a FlatGraph,
    pub config: &'a CalculatorConfig,
}

impl<'a> RateModel<'a> {
    pub fn new(registry: &'a Registry, graph: &'a FlatGraph, config: &'a CalculatorConfig) -> Self {
        Self {
            registry,
            graph,
            config,
        }
    }

    /// Skill-adjusted belt throughput.
    pub fn conveyor_speed(&self) -> f64 {
        self.config.conveyor_speed()
    }

    /// Items per minute one recipe entry moves on a single machine.
    fn recipe_rate(&self, recipe: &Recipe, quantity: f64) -> f64 {
        let time = self
            .config
            .skills
            .effective_processing_time(recipe.processing_time);
        if !(time > 0.0 && time.is_finite()) || !(quantity > 0.0 && quantity.is_finite()) {
            return 0.0;
        }
        quantity / time * 60.0
    }

    fn recipe_port_rate(&self, recipe: Option<RecipeId>, direction: Direction, port: &PortKey) -> f64 {
        let (Some(recipe), PortKey::Index(i)) = (recipe.and_then(|r| self.registry.recipe(r)), port)
        else {
            return 0.0;
        };
        let entries = match direction {
            Direction::Input => &recipe.inputs,
            Direction::Output => &recipe.outputs,
        };
        entries
            .get(*i as usize)
            .map(|e| self.recipe_rate(recipe, e.quantity))
            .unwrap_or(0.0)
    }

    /// Per-port belt cap of a storage node, zero for ports the machine lacks.
    fn storage_cap(&self, node: &FlatNode, machine: MachineId, direction: Direction, port: &PortKey) -> f64 {
        let ports = self
            .registry
            .machine(machine)
            .map(|def| match direction {
                Direction::Input => def.input_ports,
                Direction::Output => def.output_ports,
            })
            .unwrap_or(0);
        match port {
            PortKey::Index(i) if *i < ports => self.conveyor_speed() * node.effective_count(),
            _ => 0.0,
        }
    }

    /// Plants per minute and fertilizer items per minute of one nursery,
    /// or `None` when either material is missing or has the wrong role.
    fn nursery_rates(&self, id: FlatNodeId, plant: Option<MaterialId>) -> Option<(f64, f64)> {
        let fertilizer = self.port_material(id, Direction::Input, &PortKey::Index(0))?;
        let MaterialRole::Plant { required_nutrient } = self.registry.material(plant?)?.role else {
            return None;
        };
        let MaterialRole::Fertilizer {
            nutrient_value,
            max_fertility,
        } = self.registry.material(fertilizer)?.role
        else {
            return None;
        };
        let nutrient = nutrient_value * self.config.skills.fertilizer_value;
        if !(required_nutrient > 0.0 && nutrient > 0.0 && max_fertility > 0.0) {
            return None;
        }
        Some((max_fertility / required_nutrient, max_fertility / nutrient))
    }

    /// Heat units per minute a heating device and its toppers consume.
    pub fn heat_per_minute(&self, machine: MachineId, toppers: &[Topper]) -> f64 {
        let Some(MachineKind::HeatingDevice {
            base_heat_consumption,
            heating_area,
        }) = self.registry.machine(machine).map(|d| &d.kind)
        else {
            return 0.0;
        };
        let base = base_heat_consumption.max(0.0);
        let area = heating_area.area();
        if area <= 0.0 {
            return base;
        }
        let toppers: f64 = toppers
            .iter()
            .filter_map(|t| match self.registry.machine(t.machine).map(|d| &d.kind) {
                Some(MachineKind::Standard {
                    footprint: Some(fp),
                }) => Some(base * fp.area() / area),
                _ => None,
            })
            .sum();
        base + toppers
    }

    fn grouped_rate(&self, toppers: &[Topper], direction: Direction, material: MaterialId) -> f64 {
        toppers
            .iter()
            .filter_map(|t| t.recipe.and_then(|r| self.registry.recipe(r)))
            .map(|recipe| {
                let entries = match direction {
                    Direction::Input => &recipe.inputs,
                    Direction::Output => &recipe.outputs,
                };
                entries
                    .iter()
                    .filter(|e| e.material == material)
                    .map(|e| self.recipe_rate(recipe, e.quantity))
                    .sum::<f64>()
            })
            .sum()
    }

    /// Maximum output rate of `port` at full capacity.
    pub fn max_output_rate(&self, id: FlatNodeId, port: &PortKey) -> f64 {
        let Some(node) = self.graph.node(id) else {
            return 0.0;
        };
        let per_machine = match &node.kind {
            FlatKind::Machine { recipe, .. } => {
                self.recipe_port_rate(*recipe, Direction::Output, port)
            }
            FlatKind::Portal { material } => match (material, port) {
                (Some(_), PortKey::Index(0)) => self.conveyor_speed(),
                _ => 0.0,
            },
            FlatKind::Nursery { plant, .. } => match port {
                PortKey::Index(0) => self.nursery_rates(id, *plant).map_or(0.0, |(p, _)| p),
                _ => 0.0,
            },
            FlatKind::Storage { machine, .. } => {
                return self.storage_cap(node, *machine, Direction::Output, port);
            }
            FlatKind::Heating { toppers, .. } => match port {
                PortKey::Grouped(m) => self.grouped_rate(toppers, Direction::Output, *m),
                _ => 0.0,
            },
            FlatKind::VirtualSource { .. } => return f64::INFINITY,
            FlatKind::Export { .. } | FlatKind::VirtualSink => 0.0,
        };
        per_machine * node.effective_count()
    }

    /// Maximum input demand of `port` at full capacity.
    pub fn max_input_demand(&self, id: FlatNodeId, port: &PortKey) -> f64 {
        let Some(node) = self.graph.node(id) else {
            return 0.0;
        };
        let per_machine = match &node.kind {
            FlatKind::Machine { recipe, .. } => {
                self.recipe_port_rate(*recipe, Direction::Input, port)
            }
            FlatKind::Nursery { plant, .. } => match port {
                PortKey::Index(0) => self.nursery_rates(id, *plant).map_or(0.0, |(_, f)| f),
                _ => 0.0,
            },
            FlatKind::Storage { machine, .. } => {
                return self.storage_cap(node, *machine, Direction::Input, port);
            }
            FlatKind::Heating { machine, toppers, .. } => match port {
                key if key.is_fuel() => self.fuel_rate(id, *machine, toppers),
                PortKey::Grouped(m) => self.grouped_rate(toppers, Direction::Input, *m),
                _ => 0.0,
            },
            FlatKind::Export { .. } | FlatKind::VirtualSink => return f64::INFINITY,
            FlatKind::Portal { .. } | FlatKind::VirtualSource { .. } => 0.0,
        };
        per_machine * node.effective_count()
    }

    fn fuel_rate(&self, id: FlatNodeId, machine: MachineId, toppers: &[Topper]) -> f64 {
        let heat_value = self
            .port_material(id, Direction::Input, &PortKey::fuel())
            .and_then(|m| self.registry.material(m))
            .and_then(|m| m.heat_value())
            .map(|v| v * self.config.skills.fuel_value)
            .unwrap_or(0.0);
        if heat_value <= 0.0 {
            return 0.0;
        }
        self.heat_per_minute(machine, toppers) / heat_value
    }

    /// Storage output rate for one port given what currently flows in.
    ///
    /// `incoming_total` is the sum of all incoming connection rates,
    /// `connected_outputs` the number of output ports with at least one
    /// connection, and `downstream` the combined demand on this port.
    pub fn storage_port_rate(
        &self,
        id: FlatNodeId,
        port: &PortKey,
        incoming_total: f64,
        connected_outputs: usize,
        downstream: f64,
    ) -> f64 {
        let cap = self.max_output_rate(id, port);
        let downstream = downstream.max(0.0);
        if self.graph.inputs(id).is_empty() {
            return cap.min(downstream);
        }
        let share = incoming_total.max(0.0) / connected_outputs.max(1) as f64;
        share.min(downstream).min(cap)
    }

    // -----------------------------------------------------------------------
    // Materials and port listings
    // -----------------------------------------------------------------------

    /// Resolve the material on a port, following pass-through nodes upstream.
    pub fn port_material(&self, id: FlatNodeId, direction: Direction, port: &PortKey) -> Option<MaterialId> {
        self.port_material_at(id, direction, port, 0)
    }

    fn port_material_at(
        &self,
        id: FlatNodeId,
        direction: Direction,
        port: &PortKey,
        depth: usize,
    ) -> Option<MaterialId> {
        if depth > MAX_MATERIAL_DEPTH {
            return None;
        }
        let node = self.graph.node(id)?;
        match (&node.kind, direction) {
            (FlatKind::Nursery { .. }, Direction::Input)
            | (FlatKind::Heating { .. }, Direction::Input)
                if matches!(port, PortKey::Index(0)) || port.is_fuel() =>
            {
                self.upstream_material(id, Some(port), depth)
                    .or_else(|| static_port_material(self.registry, &node.kind, direction, port))
            }
            (FlatKind::Storage { inventory, .. }, Direction::Output) => self
                .upstream_material(id, None, depth)
                .or_else(|| inventory.keys().next().copied()),
            (FlatKind::Storage { .. }, Direction::Input)
            | (FlatKind::Export { .. }, Direction::Input)
            | (FlatKind::VirtualSink, Direction::Input) => {
                self.upstream_material(id, Some(port), depth)
            }
            (kind, dir) => static_port_material(self.registry, kind, dir, port),
        }
    }

    /// First resolvable source material among the connections entering
    /// `id` (restricted to `port` when given).
    fn upstream_material(&self, id: FlatNodeId, port: Option<&PortKey>, depth: usize) -> Option<MaterialId> {
        self.graph
            .inputs(id)
            .iter()
            .filter_map(|&c| self.graph.connection(c))
            .filter(|c| port.is_none_or(|p| c.to.port == *p))
            .find_map(|c| self.port_material_at(c.from.node, Direction::Output, &c.from.port, depth + 1))
    }

    /// Ports the node declares in `direction`.
    pub fn declared_ports(&self, id: FlatNodeId, direction: Direction) -> Vec<PortKey> {
        self.graph
            .node(id)
            .map(|n| declared_ports(self.registry, &n.kind, direction))
            .unwrap_or_default()
    }

    /// Input ports the node cannot run without.
    pub fn required_inputs(&self, id: FlatNodeId) -> Vec<PortKey> {
        let Some(node) = self.graph.node(id) else {
            return Vec::new();
        };
        match &node.kind {
            FlatKind::Machine { .. } | FlatKind::Nursery { .. } | FlatKind::Heating { .. } => self
                .declared_ports(id, Direction::Input)
                .into_iter()
                .filter(|p| self.max_input_demand(id, p) > 0.0 || self.is_selection_port(node, p))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Ports whose material can come from a preview selection.
    fn is_selection_port(&self, node: &FlatNode, port: &PortKey) -> bool {
        match &node.kind {
            FlatKind::Nursery { .. } => matches!(port, PortKey::Index(0)),
            FlatKind::Heating { .. } => port.is_fuel(),
            _ => false,
        }
    }

    /// True when a required input port has neither a connection nor a
    /// preview selection standing in for one.
    pub fn is_insufficient(&self, id: FlatNodeId) -> bool {
        let Some(node) = self.graph.node(id) else {
            return false;
        };
        self.required_inputs(id).iter().any(|port| {
            if self.graph.has_input_on(id, port) {
                return false;
            }
            let selected = match &node.kind {
                FlatKind::Nursery { fertilizer, .. } if self.is_selection_port(node, port) => {
                    fertilizer.is_some()
                }
                FlatKind::Heating { fuel, .. } if self.is_selection_port(node, port) => {
                    fuel.is_some()
                }
                _ => false,
            };
            !selected
        })
    }

    /// Output ports of producing nodes (machines, nurseries, heating
    /// devices) with a positive capacity.
    pub fn producing_outputs(&self, id: FlatNodeId) -> Vec<PortKey> {
        let Some(node) = self.graph.node(id) else {
            return Vec::new();
        };
        match node.kind {
            FlatKind::Machine { .. } | FlatKind::Nursery { .. } | FlatKind::Heating { .. } => self
                .declared_ports(id, Direction::Output)
                .into_iter()
                .filter(|p| self.max_output_rate(id, p) > 0.0)
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FlatConnection, FlatEndpoint};
    use crate::layout::Topper;
    use crate::test_utils::*;
    use std::collections::BTreeMap;

    fn node(id: u32, kind: FlatKind) -> FlatNode {
        FlatNode {
            path: NodePath::root(NodeId(id)),
            kind,
            count: 1,
            multiplier: 1,
            parent: None,
        }
    }

    fn wire(graph: &mut FlatGraph, from: FlatNodeId, fp: PortKey, to: FlatNodeId, tp: PortKey) {
        graph.connect(FlatConnection {
            origin: Some(ConnectionPath::top_level(ConnectionId(graph.connection_count() as u32))),
            from: FlatEndpoint { node: from, port: fp },
            to: FlatEndpoint { node: to, port: tp },
            boundary: Vec::new(),
        });
    }

    #[test]
    fn standard_machine_rates() {
        let f = Fixture::new();
        let mut graph = FlatGraph::new();
        let mut mill = node(1, f.machine_kind(f.mill, f.grind));
        mill.count = 2;
        mill.multiplier = 3;
        let id = graph.add_node(mill);
        let cfg = CalculatorConfig::default();
        let model = RateModel::new(&f.registry, &graph, &cfg);
        // grind: 15s, 1 wheat -> 1 flour = 4/min per machine.
        assert!((model.max_output_rate(id, &PortKey::Index(0)) - 24.0).abs() < 1e-9);
        assert!((model.max_input_demand(id, &PortKey::Index(0)) - 24.0).abs() < 1e-9);
        assert_eq!(model.max_output_rate(id, &PortKey::Index(1)), 0.0);
    }

    #[test]
    fn processing_skill_speeds_up_recipes() {
        let f = Fixture::new();
        let mut graph = FlatGraph::new();
        let id = graph.add_node(node(1, f.machine_kind(f.farm, f.grow_wheat)));
        let mut cfg = CalculatorConfig::default();
        cfg.skills.processing_time_reduction = 0.5;
        let model = RateModel::new(&f.registry, &graph, &cfg);
        assert!((model.max_output_rate(id, &PortKey::Index(0)) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn missing_recipe_is_zero() {
        let f = Fixture::new();
        let mut graph = FlatGraph::new();
        let id = graph.add_node(node(
            1,
            FlatKind::Machine {
                machine: f.mill,
                recipe: Some(RecipeId(999)),
            },
        ));
        let cfg = CalculatorConfig::default();
        let model = RateModel::new(&f.registry, &graph, &cfg);
        assert_eq!(model.max_output_rate(id, &PortKey::Index(0)), 0.0);
        assert!(model.required_inputs(id).is_empty());
    }

    #[test]
    fn portal_runs_at_conveyor_speed() {
        let f = Fixture::new();
        let mut graph = FlatGraph::new();
        let id = graph.add_node(node(
            1,
            FlatKind::Portal {
                material: Some(f.wheat),
            },
        ));
        let mut cfg = CalculatorConfig::default();
        cfg.skills.conveyor_speed = 2.0;
        let model = RateModel::new(&f.registry, &graph, &cfg);
        assert_eq!(model.max_output_rate(id, &PortKey::Index(0)), 120.0);
    }

    #[test]
    fn nursery_uses_preview_fertilizer() {
        let f = Fixture::new();
        let mut graph = FlatGraph::new();
        let with = graph.add_node(node(1, f.nursery_kind(Some(f.compost))));
        let without = graph.add_node(node(2, f.nursery_kind(None)));
        let cfg = CalculatorConfig::default();
        let model = RateModel::new(&f.registry, &graph, &cfg);
        // max_fertility 20 / required 4 = 5 plants, 20 / nutrient 5 = 4 compost.
        assert!((model.max_output_rate(with, &PortKey::Index(0)) - 5.0).abs() < 1e-9);
        assert!((model.max_input_demand(with, &PortKey::Index(0)) - 4.0).abs() < 1e-9);
        assert!(!model.is_insufficient(with));
        assert_eq!(model.max_output_rate(without, &PortKey::Index(0)), 0.0);
        assert!(model.is_insufficient(without));
    }

    #[test]
    fn nursery_prefers_connected_fertilizer() {
        let f = Fixture::new();
        let mut graph = FlatGraph::new();
        let portal = graph.add_node(node(
            1,
            FlatKind::Portal {
                material: Some(f.compost),
            },
        ));
        let nursery = graph.add_node(node(2, f.nursery_kind(None)));
        wire(&mut graph, portal, PortKey::Index(0), nursery, PortKey::Index(0));
        let cfg = CalculatorConfig::default();
        let model = RateModel::new(&f.registry, &graph, &cfg);
        assert_eq!(
            model.port_material(nursery, Direction::Input, &PortKey::Index(0)),
            Some(f.compost)
        );
        assert!((model.max_output_rate(nursery, &PortKey::Index(0)) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn heating_fuel_counts_toppers() {
        let f = Fixture::new();
        let mut graph = FlatGraph::new();
        let id = graph.add_node(node(
            1,
            FlatKind::Heating {
                machine: f.oven,
                toppers: vec![Topper {
                    machine: f.bakery,
                    recipe: Some(f.bake),
                }],
                fuel: Some(f.coal),
            },
        ));
        let cfg = CalculatorConfig::default();
        let model = RateModel::new(&f.registry, &graph, &cfg);
        // 30 base + 30 * 1/4 topper = 37.5 heat, coal is worth 30.
        assert!((model.max_input_demand(id, &PortKey::fuel()) - 1.25).abs() < 1e-9);
        // bake: 30s, 2 flour -> 1 bread.
        assert!((model.max_input_demand(id, &PortKey::Grouped(f.flour)) - 4.0).abs() < 1e-9);
        assert!((model.max_output_rate(id, &PortKey::Grouped(f.bread)) - 2.0).abs() < 1e-9);
        assert_eq!(
            model.declared_ports(id, Direction::Input),
            vec![PortKey::fuel(), PortKey::Grouped(f.flour)]
        );
    }

    #[test]
    fn grouped_ports_sum_over_toppers() {
        let f = Fixture::new();
        let bake = Topper {
            machine: f.bakery,
            recipe: Some(f.bake),
        };
        let grind = Topper {
            machine: f.mill,
            recipe: Some(f.grind),
        };
        let mut graph = FlatGraph::new();
        let id = graph.add_node(node(
            1,
            FlatKind::Heating {
                machine: f.oven,
                toppers: vec![bake.clone(), grind, bake],
                fuel: Some(f.coal),
            },
        ));
        let cfg = CalculatorConfig::default();
        let model = RateModel::new(&f.registry, &graph, &cfg);

        // One port per material, in order of first appearance.
        assert_eq!(
            model.declared_ports(id, Direction::Input),
            vec![PortKey::fuel(), PortKey::Grouped(f.flour), PortKey::Grouped(f.wheat)]
        );
        assert_eq!(
            model.declared_ports(id, Direction::Output),
            vec![PortKey::Grouped(f.bread), PortKey::Grouped(f.flour)]
        );
        // Both bakeries draw flour, only the mill draws wheat.
        assert!((model.max_input_demand(id, &PortKey::Grouped(f.flour)) - 8.0).abs() < 1e-9);
        assert!((model.max_input_demand(id, &PortKey::Grouped(f.wheat)) - 4.0).abs() < 1e-9);
        assert!((model.max_output_rate(id, &PortKey::Grouped(f.bread)) - 4.0).abs() < 1e-9);
        assert!((model.max_output_rate(id, &PortKey::Grouped(f.flour)) - 4.0).abs() < 1e-9);
        // The mill has no footprint: 30 + 2 * 7.5 heat over coal's 30.
        assert!((model.max_input_demand(id, &PortKey::fuel()) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn storage_ports_are_belt_capped() {
        let f = Fixture::new();
        let mut graph = FlatGraph::new();
        let silo = graph.add_node(node(
            1,
            FlatKind::Storage {
                machine: f.silo,
                inventory: BTreeMap::new(),
            },
        ));
        let cfg = CalculatorConfig::default();
        let model = RateModel::new(&f.registry, &graph, &cfg);
        assert_eq!(model.max_output_rate(silo, &PortKey::Index(1)), 60.0);
        assert_eq!(model.max_output_rate(silo, &PortKey::Index(2)), 0.0);
        // Manual mode: no incoming connections.
        assert_eq!(model.storage_port_rate(silo, &PortKey::Index(0), 0.0, 1, 25.0), 25.0);
        assert_eq!(model.storage_port_rate(silo, &PortKey::Index(0), 0.0, 1, 500.0), 60.0);
    }

    #[test]
    fn storage_shares_supply_between_outputs() {
        let f = Fixture::new();
        let mut graph = FlatGraph::new();
        let farm = graph.add_node(node(1, f.machine_kind(f.farm, f.grow_wheat)));
        let silo = graph.add_node(node(
            2,
            FlatKind::Storage {
                machine: f.silo,
                inventory: BTreeMap::new(),
            },
        ));
        wire(&mut graph, farm, PortKey::Index(0), silo, PortKey::Index(0));
        let cfg = CalculatorConfig::default();
        let model = RateModel::new(&f.registry, &graph, &cfg);
        assert_eq!(model.storage_port_rate(silo, &PortKey::Index(0), 10.0, 2, 100.0), 5.0);
        assert_eq!(model.storage_port_rate(silo, &PortKey::Index(0), 10.0, 1, 3.0), 3.0);
        assert_eq!(
            model.port_material(silo, Direction::Output, &PortKey::Index(1)),
            Some(f.wheat)
        );
    }

    #[test]
    fn storage_material_falls_back_to_inventory() {
        let f = Fixture::new();
        let mut graph = FlatGraph::new();
        let silo = graph.add_node(node(
            1,
            FlatKind::Storage {
                machine: f.silo,
                inventory: BTreeMap::from([(f.flour, 50)]),
            },
        ));
        let cfg = CalculatorConfig::default();
        let model = RateModel::new(&f.registry, &graph, &cfg);
        assert_eq!(
            model.port_material(silo, Direction::Output, &PortKey::Index(0)),
            Some(f.flour)
        );
    }

    #[test]
    fn sinks_and_sources_are_unbounded() {
        let f = Fixture::new();
        let mut graph = FlatGraph::new();
        let sink = graph.virtual_sink();
        let source = graph.virtual_source(f.wheat);
        let export = graph.add_node(node(1, FlatKind::Export { internal: false }));
        let cfg = CalculatorConfig::default();
        let model = RateModel::new(&f.registry, &graph, &cfg);
        assert!(model.max_input_demand(sink, &PortKey::Index(0)).is_infinite());
        assert!(model.max_input_demand(export, &PortKey::Index(3)).is_infinite());
        assert!(model.max_output_rate(source, &PortKey::Index(0)).is_infinite());
    }
}
