//! Fixed-point efficiency solver.
//!
//! Efficiencies depend on downstream demand and on the supply reaching each
//! node's inputs, and both depend on the efficiencies of the neighbours, so
//! a cyclic graph has no evaluation order. The solver iterates instead:
//! every round derives all candidate efficiencies from the previous round's
//! committed values, then commits them together. It stops once the largest
//! change drops below `SolverConfig::epsilon` or after
//! `SolverConfig::max_rounds` rounds.
//!
//! A node never runs faster than its connected required inputs are fed.
//! Rates start at zero and each pass visits sources in topological order,
//! so a loop only runs on supply that enters it from outside.
//!
//! Nothing is written back to the graph. A [`Solution`] carries the settled
//! efficiencies and connection rates as separate maps.

use crate::allocate::{AllocationTarget, AllocatorConfig, TargetClass, allocate};
use crate::graph::{FlatConnection, FlatGraph, FlatKind};
use crate::id::*;
use crate::port::{Direction, PortKey};
use crate::rates::RateModel;
use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;
use std::collections::BTreeMap;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// How the fixed-point iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveDiagnostics {
    pub converged: bool,
    /// Rounds executed, at most `max_rounds`.
    pub iterations: u32,
    /// Largest efficiency change in the last round.
    pub max_delta: f64,
}

impl Default for SolveDiagnostics {
    fn default() -> Self {
        Self {
            converged: true,
            iterations: 0,
            max_delta: 0.0,
        }
    }
}

/// Settled per-node and per-connection values of one solve.
#[derive(Debug, Clone, Default)]
pub struct Solution {
    pub efficiency: SecondaryMap<FlatNodeId, f64>,
    pub insufficient: SecondaryMap<FlatNodeId, bool>,
    pub rates: SecondaryMap<FlatConnectionId, f64>,
    pub diagnostics: SolveDiagnostics,
}

impl Solution {
    pub fn efficiency(&self, node: FlatNodeId) -> f64 {
        self.efficiency.get(node).copied().unwrap_or(0.0)
    }

    pub fn is_insufficient(&self, node: FlatNodeId) -> bool {
        self.insufficient.get(node).copied().unwrap_or(false)
    }

    pub fn rate(&self, connection: FlatConnectionId) -> f64 {
        self.rates.get(connection).copied().unwrap_or(0.0)
    }

    /// Sum of every settled connection rate.
    pub fn total_flow(&self) -> f64 {
        self.rates.values().sum()
    }
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

/// Connections leaving one output port.
#[derive(Debug, Clone)]
struct SourceGroup {
    node: FlatNodeId,
    port: PortKey,
    connections: Vec<FlatConnectionId>,
    /// Full-capacity output rate of the port.
    capacity: f64,
    material: Option<MaterialId>,
}

/// Precomputed, efficiency-independent view of one graph.
pub struct Solver<'a> {
    model: RateModel<'a>,
    allocator: AllocatorConfig,
    /// Source groups in topological order of their nodes.
    groups: Vec<SourceGroup>,
    /// Group indices per source node.
    node_groups: SecondaryMap<FlatNodeId, Vec<usize>>,
    /// Full-capacity demand per connection, already shared among the
    /// connections entering the same destination port.
    demand: SecondaryMap<FlatConnectionId, f64>,
    class: SecondaryMap<FlatConnectionId, TargetClass>,
    insufficient: SecondaryMap<FlatNodeId, bool>,
    /// Connected required input ports of processing nodes with their
    /// full-capacity demand.
    required: SecondaryMap<FlatNodeId, Vec<(PortKey, f64)>>,
}

/// Run the solver over `model`'s graph.
pub fn solve(model: &RateModel<'_>) -> Solution {
    Solver::new(*model).solve()
}

impl<'a> Solver<'a> {
    pub fn new(model: RateModel<'a>) -> Self {
        let graph = model.graph;
        let solver_cfg = &model.config.solver;
        let allocator = AllocatorConfig {
            tolerance: solver_cfg.allocation_tolerance,
            max_rounds: solver_cfg.allocation_rounds,
            conveyor_speed: model.conveyor_speed(),
        };

        let mut groups: Vec<SourceGroup> = Vec::new();
        for id in graph.topological_order() {
            let mut by_port: Vec<SourceGroup> = Vec::new();
            for &c in graph.outputs(id) {
                let Some(conn) = graph.connection(c) else {
                    continue;
                };
                match by_port.iter_mut().find(|g| g.port == conn.from.port) {
                    Some(group) => group.connections.push(c),
                    None => by_port.push(SourceGroup {
                        node: id,
                        port: conn.from.port.clone(),
                        connections: vec![c],
                        capacity: model.max_output_rate(id, &conn.from.port),
                        material: model.port_material(id, Direction::Output, &conn.from.port),
                    }),
                }
            }
            groups.extend(by_port);
        }

        let mut node_groups: SecondaryMap<FlatNodeId, Vec<usize>> = SecondaryMap::new();
        for (i, group) in groups.iter().enumerate() {
            match node_groups.get_mut(group.node) {
                Some(list) => list.push(i),
                None => {
                    node_groups.insert(group.node, vec![i]);
                }
            }
        }

        let mut demand = SecondaryMap::new();
        let mut class = SecondaryMap::new();
        for (c, conn) in graph.connections() {
            let sharing = graph.inputs_on(conn.to.node, &conn.to.port).count().max(1);
            demand.insert(c, model.max_input_demand(conn.to.node, &conn.to.port) / sharing as f64);
            class.insert(c, target_class(graph, conn));
        }

        let mut insufficient = SecondaryMap::new();
        let mut required = SecondaryMap::new();
        for (id, node) in graph.nodes() {
            insufficient.insert(id, model.is_insufficient(id));
            if !node.kind.is_processing() {
                continue;
            }
            // Auto-imported ports are unlimited and stay out of the cap.
            let ports: Vec<(PortKey, f64)> = model
                .required_inputs(id)
                .into_iter()
                .filter(|port| {
                    graph
                        .inputs_on(id, port)
                        .any(|c| graph.connection(c).is_some_and(|conn| !conn.is_virtual()))
                })
                .map(|port| {
                    let demand = model.max_input_demand(id, &port);
                    (port, demand)
                })
                .filter(|&(_, demand)| demand > 0.0 && demand.is_finite())
                .collect();
            if !ports.is_empty() {
                required.insert(id, ports);
            }
        }

        Self {
            model,
            allocator,
            groups,
            node_groups,
            demand,
            class,
            insufficient,
            required,
        }
    }

    pub fn solve(&self) -> Solution {
        let graph = self.model.graph;
        let cfg = &self.model.config.solver;

        let mut efficiency: SecondaryMap<FlatNodeId, f64> = SecondaryMap::new();
        for (id, _) in graph.nodes() {
            efficiency.insert(id, 1.0);
        }
        let mut rates: SecondaryMap<FlatConnectionId, f64> = SecondaryMap::new();
        for (c, _) in graph.connections() {
            rates.insert(c, 0.0);
        }

        let mut diagnostics = SolveDiagnostics {
            converged: false,
            iterations: 0,
            max_delta: 0.0,
        };
        for round in 1..=cfg.max_rounds.max(1) {
            let provisional = self.distribute(&efficiency, &rates);
            let candidate = self.candidates(&efficiency, &provisional);
            let max_delta = candidate
                .iter()
                .map(|(id, new)| (new - efficiency.get(id).copied().unwrap_or(1.0)).abs())
                .fold(0.0, f64::max);

            efficiency = candidate;
            rates = provisional;
            diagnostics.iterations = round;
            diagnostics.max_delta = max_delta;
            debug!(target: "millflow.solver", round, max_delta, "solver round");

            if max_delta < cfg.epsilon {
                diagnostics.converged = true;
                break;
            }
        }

        if !diagnostics.converged {
            warn!(
                target: "millflow.solver",
                rounds = diagnostics.iterations,
                max_delta = diagnostics.max_delta,
                "efficiency solver did not converge; using last values"
            );
        }

        // Settled rates from the final efficiencies.
        let rates = self.distribute(&efficiency, &rates);

        Solution {
            efficiency,
            insufficient: self.insufficient.clone(),
            rates,
            diagnostics,
        }
    }

    fn eff(&self, efficiency: &SecondaryMap<FlatNodeId, f64>, node: FlatNodeId) -> f64 {
        efficiency.get(node).copied().unwrap_or(1.0)
    }

    /// Allocation targets of one group under the given efficiencies.
    fn targets(&self, group: &SourceGroup, efficiency: &SecondaryMap<FlatNodeId, f64>) -> Vec<AllocationTarget> {
        let graph = self.model.graph;
        group
            .connections
            .iter()
            .map(|&c| {
                let scale = graph
                    .connection(c)
                    .and_then(|conn| graph.node(conn.to.node).map(|n| (conn.to.node, n)))
                    .map_or(1.0, |(id, node)| {
                        if node.kind.is_processing() {
                            self.eff(efficiency, id)
                        } else {
                            1.0
                        }
                    });
                let demand = self.demand.get(c).copied().unwrap_or(0.0);
                let class = self.class.get(c).copied().unwrap_or(TargetClass::Primary);
                // Infinite demand times a zero scale would be NaN.
                let demand = if demand.is_infinite() { demand } else { demand * scale };
                AllocationTarget::new(demand, class)
            })
            .collect()
    }

    /// Fraction of full-capacity demand that the node's connected required
    /// inputs receive, 1.0 when it has none. A connection's rate is taken
    /// from `current` when present, otherwise from `previous`.
    fn supply_factor(
        &self,
        node: FlatNodeId,
        current: &SecondaryMap<FlatConnectionId, f64>,
        previous: &SecondaryMap<FlatConnectionId, f64>,
    ) -> f64 {
        let graph = self.model.graph;
        let Some(ports) = self.required.get(node) else {
            return 1.0;
        };
        ports
            .iter()
            .map(|(port, demand)| {
                let incoming: f64 = graph
                    .inputs_on(node, port)
                    .map(|c| current.get(c).or_else(|| previous.get(c)).copied().unwrap_or(0.0))
                    .sum();
                incoming / demand
            })
            .fold(1.0, f64::min)
    }

    /// One allocation pass over every source group, in topological order.
    /// Incoming rates already settled in this pass are used; connections
    /// that close a cycle fall back to `previous`.
    fn distribute(
        &self,
        efficiency: &SecondaryMap<FlatNodeId, f64>,
        previous: &SecondaryMap<FlatConnectionId, f64>,
    ) -> SecondaryMap<FlatConnectionId, f64> {
        let graph = self.model.graph;
        let mut next: SecondaryMap<FlatConnectionId, f64> = SecondaryMap::new();
        // Per node, so every output port of one node sees the same supply.
        let mut supply: SecondaryMap<FlatNodeId, f64> = SecondaryMap::new();

        for group in &self.groups {
            let Some(node) = graph.node(group.node) else {
                continue;
            };
            let targets = self.targets(group, efficiency);
            let available = match node.kind {
                FlatKind::VirtualSource { .. } => f64::INFINITY,
                FlatKind::Storage { .. } => {
                    let incoming: f64 = graph
                        .inputs(group.node)
                        .iter()
                        .map(|&c| next.get(c).or_else(|| previous.get(c)).copied().unwrap_or(0.0))
                        .sum();
                    let connected = self.node_groups.get(group.node).map_or(0, Vec::len);
                    let downstream: f64 = targets.iter().map(|t| t.demand).sum();
                    self.model
                        .storage_port_rate(group.node, &group.port, incoming, connected, downstream)
                }
                _ => {
                    let factor = match supply.get(group.node) {
                        Some(&factor) => factor,
                        None => {
                            let factor = self.supply_factor(group.node, &next, previous);
                            supply.insert(group.node, factor);
                            factor
                        }
                    };
                    group.capacity * self.eff(efficiency, group.node).min(factor)
                }
            };
            let shares = allocate(available, &targets, &self.allocator);
            for (&c, share) in group.connections.iter().zip(shares) {
                next.insert(c, share);
            }
        }

        // Connections never reached by a group (dangling sources) carry nothing.
        for (c, _) in graph.connections() {
            if !next.contains_key(c) {
                next.insert(c, 0.0);
            }
        }
        next
    }

    /// Candidate efficiency of every node from the committed efficiencies
    /// and this round's provisional rates.
    ///
    /// Processing nodes take the lower of their demand- and supply-limited
    /// efficiencies. A portal with nothing connected to it idles.
    fn candidates(
        &self,
        efficiency: &SecondaryMap<FlatNodeId, f64>,
        rates: &SecondaryMap<FlatConnectionId, f64>,
    ) -> SecondaryMap<FlatNodeId, f64> {
        let graph = self.model.graph;
        let mut out = SecondaryMap::new();
        for (id, node) in graph.nodes() {
            let groups = self.node_groups.get(id).map(Vec::as_slice).unwrap_or(&[]);
            let value = match node.kind {
                FlatKind::Portal { .. } if groups.is_empty() => 0.0,
                _ if node.kind.is_processing() => {
                    if self.insufficient.get(id).copied().unwrap_or(false) {
                        0.0
                    } else {
                        self.demand_efficiency(groups, efficiency)
                            .min(self.supply_factor(id, rates, rates))
                    }
                }
                FlatKind::Storage { .. } => {
                    let (flow, cap) = groups.iter().fold((0.0, 0.0), |(flow, cap), &g| {
                        let group = &self.groups[g];
                        let flow: f64 = flow
                            + group
                                .connections
                                .iter()
                                .map(|&c| rates.get(c).copied().unwrap_or(0.0))
                                .sum::<f64>();
                        (flow, cap + group.capacity)
                    });
                    if cap > 0.0 { flow / cap } else { 1.0 }
                }
                _ => 1.0,
            };
            out.insert(id, sanitize_efficiency(value));
        }
        out
    }

    /// Minimum over output materials of downstream demand / capacity.
    fn demand_efficiency(&self, groups: &[usize], efficiency: &SecondaryMap<FlatNodeId, f64>) -> f64 {
        let mut per_material: BTreeMap<Option<MaterialId>, (f64, f64)> = BTreeMap::new();
        for &g in groups {
            let group = &self.groups[g];
            if !(group.capacity > 0.0 && group.capacity.is_finite()) {
                continue;
            }
            let targets = self.targets(group, efficiency);
            let taken: f64 = allocate(group.capacity, &targets, &self.allocator).iter().sum();
            let entry = per_material.entry(group.material).or_insert((0.0, 0.0));
            entry.0 += taken;
            entry.1 += group.capacity;
        }
        per_material
            .values()
            .map(|(taken, cap)| taken / cap)
            .fold(1.0, f64::min)
    }
}

fn sanitize_efficiency(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

fn target_class(graph: &FlatGraph, conn: &FlatConnection) -> TargetClass {
    match graph.node(conn.to.node).map(|n| &n.kind) {
        Some(FlatKind::Export { internal: true }) => TargetClass::InternalSink,
        Some(FlatKind::Export { internal: false }) | Some(FlatKind::VirtualSink) => {
            TargetClass::ExternalSink
        }
        Some(FlatKind::Storage { .. }) => TargetClass::Storage,
        _ => TargetClass::Primary,
    }
}

// ---------------------------------------------------------------------------
// Post-solve views
// ---------------------------------------------------------------------------

/// True when both ends of a real connection resolve to different materials.
pub fn is_type_mismatch(model: &RateModel<'_>, conn: &FlatConnection) -> bool {
    if conn.is_virtual() {
        return false;
    }
    let source = model.port_material(conn.from.node, Direction::Output, &conn.from.port);
    let dest = model.port_material(conn.to.node, Direction::Input, &conn.to.port);
    matches!((source, dest), (Some(a), Some(b)) if a != b)
}

/// External I/O utilization of every blueprint instance, for display.
///
/// Each externally connected boundary port compares the settled rate of the
/// connections crossing it with the capacity of the child port it maps to.
/// The boundary port's declared `rate` is not consulted. Outputs that feed
/// an internal export or the virtual sink count as fully used. Instances
/// without any such port report 1.0.
pub fn blueprint_utilization(model: &RateModel<'_>, solution: &Solution) -> BTreeMap<NodePath, f64> {
    let graph = model.graph;
    let mut out = BTreeMap::new();

    for (idx, instance) in graph.instances().iter().enumerate() {
        let mut utilization = f64::INFINITY;
        let crossing = |direction: Direction, index: usize| -> Option<f64> {
            let mut any = false;
            let mut flow = 0.0;
            for (c, conn) in graph.connections() {
                if conn.boundary.iter().any(|l| {
                    l.instance == idx && l.direction == direction && l.index as usize == index
                }) {
                    any = true;
                    flow += solution.rate(c);
                }
            }
            any.then_some(flow)
        };

        for (k, target) in instance.inputs.iter().enumerate() {
            let Some(target) = target else { continue };
            let Some(flow) = crossing(Direction::Input, k) else {
                continue;
            };
            let cap = model.max_input_demand(target.endpoint.node, &target.endpoint.port);
            if cap > 0.0 && cap.is_finite() {
                utilization = utilization.min(flow / cap);
            }
        }

        for (k, target) in instance.outputs.iter().enumerate() {
            let Some(target) = target else { continue };
            let endpoint = &target.endpoint;
            let feeds_sink = graph.outputs_on(endpoint.node, &endpoint.port).any(|c| {
                graph
                    .connection(c)
                    .and_then(|conn| graph.node(conn.to.node))
                    .is_some_and(|n| {
                        matches!(n.kind, FlatKind::Export { internal: true } | FlatKind::VirtualSink)
                    })
            });
            if feeds_sink {
                utilization = utilization.min(1.0);
                continue;
            }
            let Some(flow) = crossing(Direction::Output, k) else {
                continue;
            };
            let cap = model.max_output_rate(endpoint.node, &endpoint.port);
            if cap > 0.0 && cap.is_finite() {
                utilization = utilization.min(flow / cap);
            }
        }

        let value = if utilization.is_finite() {
            sanitize_efficiency(utilization)
        } else {
            1.0
        };
        out.insert(instance.path.clone(), value);
    }
    out
}
