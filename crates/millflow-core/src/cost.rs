//! Realized per-unit material cost: the cheaper of buying a material and
//! producing it from its cheapest recipe, recursively.

use crate::id::MaterialId;
use crate::registry::{Recipe, Registry};
use std::collections::{BTreeSet, HashMap};

/// Recipe chains deeper than this are treated as uncomputable.
pub const MAX_COST_DEPTH: usize = 64;

/// Memoizing cost resolver. The memo outlives a single solve; call
/// [`CostResolver::clear`] whenever the registry changes.
#[derive(Debug, Default)]
pub struct CostResolver {
    memo: HashMap<MaterialId, f64>,
}

impl CostResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cheapest cost of one unit of `material`, or `f64::INFINITY` when it
    /// can be neither bought nor produced from costable inputs.
    pub fn realized_cost(&mut self, registry: &Registry, material: MaterialId) -> f64 {
        let mut path = Vec::new();
        self.resolve(registry, material, &mut path).0
    }

    /// Drop every memoized cost.
    pub fn clear(&mut self) {
        self.memo.clear();
    }

    pub fn cached(&self, material: MaterialId) -> Option<f64> {
        self.memo.get(&material).copied()
    }

    /// Returns the cost and the set of path materials whose cycle was cut
    /// somewhere below. A result is only memoized once that set is empty,
    /// since a cut value depends on where the walk entered the cycle.
    fn resolve(
        &mut self,
        registry: &Registry,
        material: MaterialId,
        path: &mut Vec<MaterialId>,
    ) -> (f64, BTreeSet<MaterialId>) {
        if let Some(&cost) = self.memo.get(&material) {
            return (cost, BTreeSet::new());
        }
        if path.contains(&material) {
            return (f64::INFINITY, BTreeSet::from([material]));
        }
        if path.len() >= MAX_COST_DEPTH {
            return (f64::INFINITY, BTreeSet::from([material]));
        }

        let Some(def) = registry.material(material) else {
            return (f64::INFINITY, BTreeSet::new());
        };

        let mut best = def
            .buy_price
            .filter(|p| p.is_finite() && *p >= 0.0)
            .unwrap_or(f64::INFINITY);
        let mut cuts = BTreeSet::new();

        path.push(material);
        for &recipe_id in registry.recipes_producing(material) {
            let Some(recipe) = registry.recipe(recipe_id) else {
                continue;
            };
            if let Some(cost) = self.recipe_cost(registry, recipe, material, path, &mut cuts) {
                best = best.min(cost);
            }
        }
        path.pop();

        cuts.remove(&material);
        if cuts.is_empty() {
            self.memo.insert(material, best);
        }
        (best, cuts)
    }

    /// Per-unit cost of `material` through `recipe`, or `None` when the
    /// recipe cannot be costed.
    fn recipe_cost(
        &mut self,
        registry: &Registry,
        recipe: &Recipe,
        material: MaterialId,
        path: &mut Vec<MaterialId>,
        cuts: &mut BTreeSet<MaterialId>,
    ) -> Option<f64> {
        let out_qty = recipe
            .outputs
            .iter()
            .find(|e| e.material == material)
            .map(|e| e.quantity)?;
        if !(out_qty > 0.0) || recipe.inputs.iter().any(|e| !(e.quantity > 0.0)) {
            return None;
        }

        let mut total = 0.0;
        for entry in &recipe.inputs {
            let (cost, below) = self.resolve(registry, entry.material, path);
            cuts.extend(below);
            if !cost.is_finite() {
                return None;
            }
            total += cost * entry.quantity;
        }
        let cost = total / out_qty;
        cost.is_finite().then_some(cost)
    }
}
