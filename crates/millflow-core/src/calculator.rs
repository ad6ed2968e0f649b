//! Orchestrates one recalculation and owns the caches that outlive it.

use crate::blueprint::{BlueprintCounter, MachineCount};
use crate::config::CalculatorConfig;
use crate::cost::CostResolver;
use crate::flatten::flatten;
use crate::id::{BlueprintId, MaterialId};
use crate::layout::{BlueprintLibrary, Layout};
use crate::netflow::{net_flow, stability_warning};
use crate::port::{Direction, PortAddress};
use crate::rates::RateModel;
use crate::registry::Registry;
use crate::snapshot::{CalcSnapshot, ConnectionReport, NodeReport, PortReport};
use crate::solver::{blueprint_utilization, is_type_mismatch, solve};
use tracing::{debug, info};

/// Entry point of the crate.
///
/// A recalculation runs to completion and returns an owned
/// [`CalcSnapshot`]. The cost memo and the blueprint count cache persist
/// between calls and are dropped only through the `invalidate_*` methods.
#[derive(Debug, Default)]
pub struct Calculator {
    config: CalculatorConfig,
    costs: CostResolver,
    counter: BlueprintCounter,
    generation: u64,
}

impl Calculator {
    pub fn new(config: CalculatorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &CalculatorConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: CalculatorConfig) {
        self.config = config;
    }

    /// Generation of the most recent snapshot, 0 before the first solve.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Flatten, solve and aggregate `layout`.
    pub fn recalculate(
        &mut self,
        registry: &Registry,
        layout: &Layout,
        library: &BlueprintLibrary,
    ) -> CalcSnapshot {
        self.generation += 1;
        let generation = self.generation;

        let graph = flatten(layout, library, registry, &self.config);
        let model = RateModel::new(registry, &graph, &self.config);
        let solution = solve(&model);

        let mut snapshot = CalcSnapshot {
            generation,
            diagnostics: solution.diagnostics,
            ..CalcSnapshot::default()
        };

        for (id, node) in graph.nodes() {
            if node.kind.is_virtual() {
                continue;
            }
            snapshot.nodes.insert(
                node.path.clone(),
                NodeReport {
                    efficiency: solution.efficiency(id),
                    insufficient_input: solution.is_insufficient(id),
                    effective_count: node.effective_count(),
                },
            );

            for direction in [Direction::Input, Direction::Output] {
                let mut keys = model.declared_ports(id, direction);
                let wired = match direction {
                    Direction::Input => graph.inputs(id),
                    Direction::Output => graph.outputs(id),
                };
                for conn in wired.iter().filter_map(|&c| graph.connection(c)) {
                    let key = match direction {
                        Direction::Input => &conn.to.port,
                        Direction::Output => &conn.from.port,
                    };
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
                for key in keys {
                    let rate = match direction {
                        Direction::Input => model.max_input_demand(id, &key),
                        Direction::Output => model.max_output_rate(id, &key),
                    };
                    let material = model.port_material(id, direction, &key);
                    snapshot.ports.insert(
                        PortAddress {
                            node: node.path.clone(),
                            direction,
                            key,
                        },
                        PortReport { rate, material },
                    );
                }
            }
        }

        for (c, conn) in graph.connections() {
            let Some(origin) = &conn.origin else {
                continue;
            };
            snapshot.connections.insert(
                origin.clone(),
                ConnectionReport {
                    actual_rate: solution.rate(c),
                    type_mismatch: is_type_mismatch(&model, conn),
                    source_material: model.port_material(conn.from.node, Direction::Output, &conn.from.port),
                    generation,
                },
            );
        }

        snapshot.net = net_flow(&model, &solution, &mut self.costs);
        snapshot.stability_warning = stability_warning(&model, &solution);
        snapshot.blueprint_utilization = blueprint_utilization(&model, &solution);
        for instance in graph.instances() {
            let count = self
                .counter
                .machine_count(library, instance.blueprint)
                .scaled(u64::from(instance.count));
            snapshot.blueprint_counts.insert(instance.path.clone(), count);
        }

        if let Some(warning) = &snapshot.stability_warning {
            debug!(target: "millflow.calculator", generation, warning = %warning, "stability warning");
        }
        info!(
            target: "millflow.calculator",
            generation,
            nodes = snapshot.nodes.len(),
            connections = snapshot.connections.len(),
            converged = snapshot.diagnostics.converged,
            iterations = snapshot.diagnostics.iterations,
            "recalculated"
        );
        snapshot
    }

    /// Drop the cached count of `blueprint` and of every template that
    /// contains it. Call after editing a template.
    pub fn invalidate_blueprint(&mut self, library: &BlueprintLibrary, blueprint: BlueprintId) {
        self.counter.invalidate(library, blueprint);
    }

    /// Drop every memoized material cost. Call after the registry changes.
    pub fn invalidate_costs(&mut self) {
        self.costs.clear();
    }

    pub fn realized_cost(&mut self, registry: &Registry, material: MaterialId) -> f64 {
        self.costs.realized_cost(registry, material)
    }

    pub fn machine_count(&mut self, library: &BlueprintLibrary, blueprint: BlueprintId) -> MachineCount {
        self.counter.machine_count(library, blueprint)
    }
}
