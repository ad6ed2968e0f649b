//! Solver tunables and global skill multipliers.
//!
//! Both structs deserialize with per-field defaults so a configuration file
//! only needs to name the values it overrides.

use serde::{Deserialize, Serialize};

/// Base throughput of one conveyor belt, in items per minute.
pub const DEFAULT_CONVEYOR_SPEED: f64 = 60.0;

/// Processing time can never be reduced by more than this fraction.
pub const MAX_PROCESSING_REDUCTION: f64 = 0.95;

/// Numerical parameters of the efficiency solver and the allocator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Largest per-node efficiency change that still counts as converged.
    pub epsilon: f64,
    /// Upper bound on fixed-point rounds.
    pub max_rounds: u32,
    /// A connection within this many items/min of its cap is satisfied.
    pub allocation_tolerance: f64,
    /// Upper bound on fair-share rounds per port.
    pub allocation_rounds: u32,
    /// Unskilled conveyor speed in items/min.
    pub conveyor_speed: f64,
    /// Total flow below this is treated as zero by the stability check.
    pub flow_epsilon: f64,
    /// Attach virtual sources to required inputs the user left unconnected.
    pub auto_import: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-4,
            max_rounds: 30,
            allocation_tolerance: 0.01,
            allocation_rounds: 10,
            conveyor_speed: DEFAULT_CONVEYOR_SPEED,
            flow_epsilon: 0.01,
            auto_import: true,
        }
    }
}

/// Global skill multipliers, applied uniformly to every node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Skills {
    /// Multiplier on conveyor speed.
    pub conveyor_speed: f64,
    /// Fraction of processing time removed; clamped to [0, 0.95].
    pub processing_time_reduction: f64,
    /// Multiplier on fuel heat value.
    pub fuel_value: f64,
    /// Multiplier on fertilizer nutrient value.
    pub fertilizer_value: f64,
    /// Multiplier on sell prices.
    pub profit: f64,
}

impl Default for Skills {
    fn default() -> Self {
        Self {
            conveyor_speed: 1.0,
            processing_time_reduction: 0.0,
            fuel_value: 1.0,
            fertilizer_value: 1.0,
            profit: 1.0,
        }
    }
}

impl Skills {
    /// Processing time after the skill reduction.
    pub fn effective_processing_time(&self, base: f64) -> f64 {
        let reduction = if self.processing_time_reduction.is_finite() {
            self.processing_time_reduction.clamp(0.0, MAX_PROCESSING_REDUCTION)
        } else {
            0.0
        };
        base * (1.0 - reduction)
    }
}

/// Everything the calculator reads besides the graph and the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculatorConfig {
    pub solver: SolverConfig,
    pub skills: Skills,
}

impl CalculatorConfig {
    /// Conveyor speed with the skill multiplier applied.
    pub fn conveyor_speed(&self) -> f64 {
        (self.solver.conveyor_speed * self.skills.conveyor_speed).max(0.0)
    }
}
