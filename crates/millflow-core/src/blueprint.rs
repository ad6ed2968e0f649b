//! Physical machine counts per blueprint template, cached across solves.

use crate::id::{BlueprintId, MachineId};
use crate::layout::{BlueprintLibrary, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Machines inside one instance of a blueprint, nested instances included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineCount {
    pub total: u64,
    pub by_machine: BTreeMap<MachineId, u64>,
}

impl MachineCount {
    fn add(&mut self, machine: MachineId, n: u64) {
        self.total += n;
        *self.by_machine.entry(machine).or_insert(0) += n;
    }

    fn add_scaled(&mut self, other: &MachineCount, factor: u64) {
        self.total += other.total * factor;
        for (&machine, &n) in &other.by_machine {
            *self.by_machine.entry(machine).or_insert(0) += n * factor;
        }
    }

    /// The count for `factor` identical instances.
    pub fn scaled(&self, factor: u64) -> MachineCount {
        let mut out = MachineCount::default();
        out.add_scaled(self, factor);
        out
    }

    pub fn of(&self, machine: MachineId) -> u64 {
        self.by_machine.get(&machine).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// BlueprintCounter
// ---------------------------------------------------------------------------

/// Caches [`MachineCount`]s by blueprint id.
///
/// The cache is not tied to a library version. Call
/// [`BlueprintCounter::invalidate`] after editing a template so it and every
/// template containing it are recounted.
#[derive(Debug, Default)]
pub struct BlueprintCounter {
    cache: HashMap<BlueprintId, MachineCount>,
}

impl BlueprintCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Machines in a single instance of `blueprint`. Exports and portals
    /// are planning helpers and do not count; heating devices count along
    /// with each of their toppers.
    pub fn machine_count(&mut self, library: &BlueprintLibrary, blueprint: BlueprintId) -> MachineCount {
        let mut stack = Vec::new();
        self.count(library, blueprint, &mut stack).0
    }

    /// Returns the count and whether a recursion cut affected it.
    fn count(
        &mut self,
        library: &BlueprintLibrary,
        blueprint: BlueprintId,
        stack: &mut Vec<BlueprintId>,
    ) -> (MachineCount, bool) {
        if let Some(cached) = self.cache.get(&blueprint) {
            return (cached.clone(), false);
        }
        if stack.contains(&blueprint) {
            warn!(target: "millflow.blueprint", blueprint = blueprint.0, "recursive blueprint nesting");
            return (MachineCount::default(), true);
        }
        let Some(bp) = library.get(blueprint) else {
            warn!(target: "millflow.blueprint", blueprint = blueprint.0, "unknown blueprint");
            return (MachineCount::default(), false);
        };

        stack.push(blueprint);
        let mut count = MachineCount::default();
        let mut cut = false;
        for node in &bp.layout.nodes {
            let n = u64::from(node.effective_count());
            match &node.kind {
                NodeKind::Machine { machine, .. }
                | NodeKind::Nursery { machine, .. }
                | NodeKind::Storage { machine, .. } => count.add(*machine, n),
                NodeKind::Heating { machine, toppers, .. } => {
                    count.add(*machine, n);
                    for topper in toppers {
                        count.add(topper.machine, n);
                    }
                }
                NodeKind::Blueprint { blueprint: nested } => {
                    let (inner, inner_cut) = self.count(library, *nested, stack);
                    cut |= inner_cut;
                    count.add_scaled(&inner, n);
                }
                NodeKind::Export | NodeKind::Portal { .. } => {}
            }
        }
        stack.pop();

        if !cut {
            self.cache.insert(blueprint, count.clone());
        }
        (count, cut)
    }

    /// Forget `blueprint` and every template that transitively contains it.
    pub fn invalidate(&mut self, library: &BlueprintLibrary, blueprint: BlueprintId) {
        let mut seen = BTreeSet::new();
        let mut pending = vec![blueprint];
        while let Some(id) = pending.pop() {
            if !seen.insert(id) {
                continue;
            }
            self.cache.remove(&id);
            for (&parent, bp) in library.iter() {
                if bp.nested().any(|(nested, _)| nested == id) {
                    pending.push(parent);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn is_cached(&self, blueprint: BlueprintId) -> bool {
        self.cache.contains_key(&blueprint)
    }
}
