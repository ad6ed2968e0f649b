//! Splits the supply of one output port among the connections leaving it.

/// How the allocator treats a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetClass {
    /// Finite-demand consumer.
    Primary,
    /// Storage input; demand is additionally capped at one belt.
    Storage,
    /// Top-level export or the virtual sink. Takes surplus only.
    ExternalSink,
    /// Export nested inside a blueprint. Takes surplus only when no
    /// external sink shares the port.
    InternalSink,
}

impl TargetClass {
    pub fn is_sink(self) -> bool {
        matches!(self, TargetClass::ExternalSink | TargetClass::InternalSink)
    }
}

/// One connection competing for a port's supply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationTarget {
    pub demand: f64,
    pub class: TargetClass,
}

impl AllocationTarget {
    pub fn new(demand: f64, class: TargetClass) -> Self {
        Self { demand, class }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocatorConfig {
    /// A target within this distance of its cap counts as satisfied.
    pub tolerance: f64,
    /// Fair-share rounds before giving up.
    pub max_rounds: u32,
    /// Belt cap applied to storage targets.
    pub conveyor_speed: f64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
            max_rounds: 10,
            conveyor_speed: crate::config::DEFAULT_CONVEYOR_SPEED,
        }
    }
}

/// NaN and negative values read as zero; `+inf` is kept.
fn sanitize(x: f64) -> f64 {
    if x.is_nan() || x < 0.0 { 0.0 } else { x }
}

/// Distribute `total` among `targets`, returning one allocation per target
/// in input order.
///
/// Primary and storage targets share the supply fairly: every round each
/// unsatisfied target is offered an equal share of what is left and takes
/// at most its unmet demand. Whatever remains goes to sinks, split evenly,
/// with external sinks taking it exclusively when any are present.
///
/// The allocations never sum to more than `total` and no target receives
/// more than its demand.
pub fn allocate(total: f64, targets: &[AllocationTarget], config: &AllocatorConfig) -> Vec<f64> {
    let mut alloc = vec![0.0; targets.len()];
    if targets.is_empty() {
        return alloc;
    }

    let caps: Vec<f64> = targets
        .iter()
        .map(|t| {
            let demand = sanitize(t.demand);
            match t.class {
                TargetClass::Storage => demand.min(sanitize(config.conveyor_speed)),
                _ => demand,
            }
        })
        .collect();

    let mut remaining = sanitize(total);
    if remaining.is_infinite() {
        // Unlimited supply: every finite primary demand is met in full.
        remaining = targets
            .iter()
            .zip(&caps)
            .filter(|(t, cap)| !t.class.is_sink() && cap.is_finite())
            .map(|(_, cap)| *cap)
            .sum();
    }

    // Fair-share pass over primary and storage targets.
    let mut active: Vec<usize> = (0..targets.len())
        .filter(|&i| !targets[i].class.is_sink() && caps[i] > 0.0)
        .collect();
    for _ in 0..config.max_rounds {
        if active.is_empty() || remaining <= 0.0 {
            break;
        }
        let share = remaining / active.len() as f64;
        let mut granted = 0.0;
        for &i in &active {
            let grant = share.min(caps[i] - alloc[i]).max(0.0);
            alloc[i] += grant;
            granted += grant;
        }
        remaining = (remaining - granted).max(0.0);
        active.retain(|&i| caps[i] - alloc[i] > config.tolerance);
        if granted <= 0.0 {
            break;
        }
    }

    // Surplus to sinks.
    if remaining > 0.0 && remaining.is_finite() {
        let external: Vec<usize> = (0..targets.len())
            .filter(|&i| targets[i].class == TargetClass::ExternalSink)
            .collect();
        let receivers = if external.is_empty() {
            (0..targets.len())
                .filter(|&i| targets[i].class == TargetClass::InternalSink)
                .collect()
        } else {
            external
        };
        if !receivers.is_empty() {
            let share = remaining / receivers.len() as f64;
            for i in receivers {
                alloc[i] = share.min(caps[i]);
            }
        }
    }

    alloc
}
