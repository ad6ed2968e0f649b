//! Net imports, exports and money flows of a settled graph.

use crate::cost::CostResolver;
use crate::graph::FlatKind;
use crate::id::MaterialId;
use crate::port::Direction;
use crate::rates::RateModel;
use crate::solver::Solution;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate material and money flows. Imports and exports of the same
/// material are kept apart, never netted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetFlow {
    /// Items/min pulled from virtual sources.
    pub imports: BTreeMap<MaterialId, f64>,
    /// Items/min into top-level exports plus unconsumed production.
    pub exports: BTreeMap<MaterialId, f64>,
    /// Money/min spent at purchasing portals.
    pub purchasing_cost: f64,
    /// Money/min implicit imports would cost at their realized cost.
    pub import_cost: f64,
    /// Imported materials without a finite realized cost.
    pub uncosted_imports: Vec<MaterialId>,
    /// Money/min exports would earn at sell price.
    pub export_revenue: f64,
}

impl NetFlow {
    pub fn import_rate(&self, material: MaterialId) -> f64 {
        self.imports.get(&material).copied().unwrap_or(0.0)
    }

    pub fn export_rate(&self, material: MaterialId) -> f64 {
        self.exports.get(&material).copied().unwrap_or(0.0)
    }
}

fn add(map: &mut BTreeMap<MaterialId, f64>, material: MaterialId, rate: f64) {
    if rate.is_finite() && rate > 0.0 {
        *map.entry(material).or_insert(0.0) += rate;
    }
}

/// Aggregate the settled solution into a [`NetFlow`].
pub fn net_flow(model: &RateModel<'_>, solution: &Solution, costs: &mut CostResolver) -> NetFlow {
    let graph = model.graph;
    let registry = model.registry;
    let mut net = NetFlow::default();

    for (c, conn) in graph.connections() {
        let (Some(from), Some(to)) = (graph.node(conn.from.node), graph.node(conn.to.node)) else {
            continue;
        };
        match (&from.kind, &to.kind) {
            (FlatKind::VirtualSource { material }, _) => {
                let rate = model.max_input_demand(conn.to.node, &conn.to.port)
                    * solution.efficiency(conn.to.node);
                add(&mut net.imports, *material, rate);
            }
            (_, FlatKind::VirtualSink) => {
                let rate = model.max_output_rate(conn.from.node, &conn.from.port)
                    * solution.efficiency(conn.from.node);
                if let Some(m) = model.port_material(conn.from.node, Direction::Output, &conn.from.port) {
                    add(&mut net.exports, m, rate);
                }
            }
            (_, FlatKind::Export { internal: false }) => {
                if let Some(m) = model.port_material(conn.from.node, Direction::Output, &conn.from.port) {
                    add(&mut net.exports, m, solution.rate(c));
                }
            }
            _ => {}
        }
    }

    // Portals are billed for what actually leaves them.
    for (id, node) in graph.nodes() {
        if let FlatKind::Portal {
            material: Some(material),
        } = node.kind
        {
            let price = registry.material(material).and_then(|m| m.buy_price).unwrap_or(0.0);
            let rate: f64 = graph.outputs(id).iter().map(|&c| solution.rate(c)).sum();
            net.purchasing_cost += rate * price;
        }
    }

    for (&material, &rate) in &net.imports {
        let cost = costs.realized_cost(registry, material);
        if cost.is_finite() {
            net.import_cost += rate * cost;
        } else {
            net.uncosted_imports.push(material);
        }
    }

    let profit = model.config.skills.profit;
    net.export_revenue = net
        .exports
        .iter()
        .map(|(&m, &rate)| {
            let price = registry.material(m).and_then(|m| m.sell_price).unwrap_or(0.0);
            rate * price * profit
        })
        .sum();

    net
}

/// Explain a zero-throughput closed loop, or `None` when the graph is fine.
///
/// Fires only when all of these hold: something could produce, almost
/// nothing flows, the real connections between processing nodes form a
/// cycle, and the graph has no export, no storage and no unconsumed
/// producer that could absorb the loop's output.
pub fn stability_warning(model: &RateModel<'_>, solution: &Solution) -> Option<String> {
    let graph = model.graph;

    let mut producing = false;
    for (id, node) in graph.nodes() {
        match node.kind {
            FlatKind::Export { .. } | FlatKind::Storage { .. } => return None,
            FlatKind::VirtualSink if !graph.inputs(id).is_empty() => return None,
            _ => {}
        }
        if !node.kind.is_virtual() && !model.producing_outputs(id).is_empty() {
            producing = true;
        }
    }
    if !producing {
        return None;
    }

    let total = solution.total_flow();
    if total >= model.config.solver.flow_epsilon {
        return None;
    }

    let cyclic = graph.has_cycle_where(|n| {
        !matches!(
            n.kind,
            FlatKind::Storage { .. }
                | FlatKind::Export { .. }
                | FlatKind::Portal { .. }
                | FlatKind::VirtualSource { .. }
                | FlatKind::VirtualSink
        )
    });
    if !cyclic {
        return None;
    }

    Some(format!(
        "closed production loop without a buffer settles at {total:.4} items/min; \
         add storage or an export to let it run"
    ))
}
