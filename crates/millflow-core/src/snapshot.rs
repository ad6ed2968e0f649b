//! The read-only result of one recalculation.
//!
//! Everything is keyed by stable authored identities ([`NodePath`],
//! [`ConnectionPath`], [`PortAddress`]) so callers never see flattened slot
//! keys. Reading a snapshot never triggers a solve.

use crate::blueprint::MachineCount;
use crate::id::{ConnectionPath, MaterialId, NodePath};
use crate::netflow::NetFlow;
use crate::port::PortAddress;
use crate::solver::SolveDiagnostics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    /// Throttle factor in [0, 1].
    pub efficiency: f64,
    /// A required input has neither a connection nor a selection.
    pub insufficient_input: bool,
    /// `count * multiplier`.
    pub effective_count: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectionReport {
    /// Settled items/min.
    pub actual_rate: f64,
    /// Both ends resolve to different materials.
    pub type_mismatch: bool,
    pub source_material: Option<MaterialId>,
    /// Generation of the recalculation that produced this value.
    pub generation: u64,
}

/// Full-capacity rate of one port: max output for outputs, max demand for
/// inputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortReport {
    pub rate: f64,
    pub material: Option<MaterialId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalcSnapshot {
    /// Increments with every recalculation.
    pub generation: u64,
    pub nodes: BTreeMap<NodePath, NodeReport>,
    pub connections: BTreeMap<ConnectionPath, ConnectionReport>,
    pub ports: BTreeMap<PortAddress, PortReport>,
    pub net: NetFlow,
    pub stability_warning: Option<String>,
    /// External I/O utilization per blueprint instance.
    pub blueprint_utilization: BTreeMap<NodePath, f64>,
    /// Machines per blueprint instance, the instance's own count applied.
    pub blueprint_counts: BTreeMap<NodePath, MachineCount>,
    pub diagnostics: SolveDiagnostics,
}

impl CalcSnapshot {
    pub fn node(&self, path: &NodePath) -> Option<&NodeReport> {
        self.nodes.get(path)
    }

    pub fn efficiency(&self, path: &NodePath) -> Option<f64> {
        self.nodes.get(path).map(|n| n.efficiency)
    }

    pub fn is_insufficient(&self, path: &NodePath) -> bool {
        self.nodes.get(path).is_some_and(|n| n.insufficient_input)
    }

    pub fn connection(&self, path: &ConnectionPath) -> Option<&ConnectionReport> {
        self.connections.get(path)
    }

    pub fn actual_rate(&self, path: &ConnectionPath) -> Option<f64> {
        self.connections.get(path).map(|c| c.actual_rate)
    }

    pub fn port(&self, address: &PortAddress) -> Option<&PortReport> {
        self.ports.get(address)
    }

    pub fn machine_count(&self, instance: &NodePath) -> Option<&MachineCount> {
        self.blueprint_counts.get(instance)
    }

    pub fn utilization(&self, instance: &NodePath) -> Option<f64> {
        self.blueprint_utilization.get(instance).copied()
    }

    /// Sum of every reported connection rate.
    pub fn total_flow(&self) -> f64 {
        self.connections.values().map(|c| c.actual_rate).sum()
    }
}
