use crate::id::*;
use std::collections::HashMap;

/// Role-specific attributes of a material. A material plays at most one role.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MaterialRole {
    #[default]
    None,
    /// Burnable in heating devices. `heat_value` is heat units per item.
    Fuel { heat_value: f64 },
    /// Feeds nurseries. `nutrient_value` is nutrients per item, and
    /// `max_fertility` the nutrients per minute a nursery can absorb.
    Fertilizer {
        nutrient_value: f64,
        max_fertility: f64,
    },
    /// Grown in nurseries; each plant needs `required_nutrient` nutrients.
    Plant { required_nutrient: f64 },
}

/// A material definition in the registry.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub buy_price: Option<f64>,
    pub sell_price: Option<f64>,
    pub stack_size: u32,
    pub role: MaterialRole,
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            buy_price: None,
            sell_price: None,
            stack_size: 100,
            role: MaterialRole::None,
        }
    }

    pub fn with_buy_price(mut self, price: f64) -> Self {
        self.buy_price = Some(price);
        self
    }

    pub fn with_sell_price(mut self, price: f64) -> Self {
        self.sell_price = Some(price);
        self
    }

    pub fn with_role(mut self, role: MaterialRole) -> Self {
        self.role = role;
        self
    }

    pub fn heat_value(&self) -> Option<f64> {
        match self.role {
            MaterialRole::Fuel { heat_value } => Some(heat_value),
            _ => None,
        }
    }
}

/// Width x height of a machine or heating area, in tiles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Footprint {
    pub width: f64,
    pub height: f64,
}

impl Footprint {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// Kind-specific capacity attributes of a machine.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineKind {
    /// Runs one recipe. `footprint` is used when the machine sits on a
    /// heating device as a topper.
    Standard { footprint: Option<Footprint> },
    /// Burns fuel to heat the toppers placed within its heating area.
    HeatingDevice {
        base_heat_consumption: f64,
        heating_area: Footprint,
    },
    Storage { slots: u32 },
    Nursery,
}

/// A machine definition in the registry.
#[derive(Debug, Clone)]
pub struct MachineDef {
    pub name: String,
    pub kind: MachineKind,
    pub input_ports: u32,
    pub output_ports: u32,
}

/// A recipe input/output entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeEntry {
    pub material: MaterialId,
    pub quantity: f64,
}

impl RecipeEntry {
    pub fn new(material: MaterialId, quantity: f64) -> Self {
        Self { material, quantity }
    }
}

/// A recipe definition. `processing_time` is in seconds.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub name: String,
    pub machine: MachineId,
    pub processing_time: f64,
    pub inputs: Vec<RecipeEntry>,
    pub outputs: Vec<RecipeEntry>,
}

impl Recipe {
    pub fn consumes(&self, material: MaterialId) -> bool {
        self.inputs.iter().any(|e| e.material == material)
    }

    pub fn produces(&self, material: MaterialId) -> bool {
        self.outputs.iter().any(|e| e.material == material)
    }
}

/// Builder for constructing an immutable Registry.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    materials: Vec<Material>,
    material_name_to_id: HashMap<String, MaterialId>,
    machines: Vec<MachineDef>,
    machine_name_to_id: HashMap<String, MachineId>,
    recipes: Vec<Recipe>,
    recipe_name_to_id: HashMap<String, RecipeId>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a material. Returns its ID.
    pub fn register_material(&mut self, material: Material) -> MaterialId {
        let id = MaterialId(self.materials.len() as u32);
        self.material_name_to_id.insert(material.name.clone(), id);
        self.materials.push(material);
        id
    }

    /// Register a machine definition. Returns its ID.
    pub fn register_machine(
        &mut self,
        name: &str,
        kind: MachineKind,
        input_ports: u32,
        output_ports: u32,
    ) -> MachineId {
        let id = MachineId(self.machines.len() as u32);
        self.machines.push(MachineDef {
            name: name.to_string(),
            kind,
            input_ports,
            output_ports,
        });
        self.machine_name_to_id.insert(name.to_string(), id);
        id
    }

    /// Register a recipe. Returns its ID.
    pub fn register_recipe(
        &mut self,
        name: &str,
        machine: MachineId,
        processing_time: f64,
        inputs: Vec<RecipeEntry>,
        outputs: Vec<RecipeEntry>,
    ) -> RecipeId {
        let id = RecipeId(self.recipes.len() as u32);
        self.recipes.push(Recipe {
            name: name.to_string(),
            machine,
            processing_time,
            inputs,
            outputs,
        });
        self.recipe_name_to_id.insert(name.to_string(), id);
        id
    }

    /// Mutate an existing recipe by name.
    pub fn mutate_recipe<F>(&mut self, name: &str, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut Recipe),
    {
        let id = self
            .recipe_name_to_id
            .get(name)
            .ok_or(RegistryError::NotFound(name.to_string()))?;
        f(&mut self.recipes[id.0 as usize]);
        Ok(())
    }

    pub fn material_id(&self, name: &str) -> Option<MaterialId> {
        self.material_name_to_id.get(name).copied()
    }

    /// Finalize and build the immutable registry.
    pub fn build(self) -> Result<Registry, RegistryError> {
        for recipe in &self.recipes {
            if recipe.machine.0 as usize >= self.machines.len() {
                return Err(RegistryError::InvalidMachineRef(recipe.machine));
            }
            for entry in recipe.inputs.iter().chain(recipe.outputs.iter()) {
                if entry.material.0 as usize >= self.materials.len() {
                    return Err(RegistryError::InvalidMaterialRef(entry.material));
                }
            }
        }

        let mut producers: HashMap<MaterialId, Vec<RecipeId>> = HashMap::new();
        for (idx, recipe) in self.recipes.iter().enumerate() {
            for entry in &recipe.outputs {
                let list = producers.entry(entry.material).or_default();
                let id = RecipeId(idx as u32);
                if !list.contains(&id) {
                    list.push(id);
                }
            }
        }

        Ok(Registry {
            materials: self.materials,
            material_name_to_id: self.material_name_to_id,
            machines: self.machines,
            machine_name_to_id: self.machine_name_to_id,
            recipes: self.recipes,
            recipe_name_to_id: self.recipe_name_to_id,
            producers,
        })
    }
}

/// Immutable lookup tables for materials, machines and recipes.
/// The calculator never mutates it.
#[derive(Debug)]
pub struct Registry {
    materials: Vec<Material>,
    material_name_to_id: HashMap<String, MaterialId>,
    machines: Vec<MachineDef>,
    machine_name_to_id: HashMap<String, MachineId>,
    recipes: Vec<Recipe>,
    recipe_name_to_id: HashMap<String, RecipeId>,
    /// Recipes producing each material, in registration order.
    producers: HashMap<MaterialId, Vec<RecipeId>>,
}

impl Registry {
    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0 as usize)
    }

    pub fn machine(&self, id: MachineId) -> Option<&MachineDef> {
        self.machines.get(id.0 as usize)
    }

    pub fn recipe(&self, id: RecipeId) -> Option<&Recipe> {
        self.recipes.get(id.0 as usize)
    }

    pub fn material_id(&self, name: &str) -> Option<MaterialId> {
        self.material_name_to_id.get(name).copied()
    }

    pub fn machine_id(&self, name: &str) -> Option<MachineId> {
        self.machine_name_to_id.get(name).copied()
    }

    pub fn recipe_id(&self, name: &str) -> Option<RecipeId> {
        self.recipe_name_to_id.get(name).copied()
    }

    /// Recipes with `material` among their outputs, in registration order.
    pub fn recipes_producing(&self, material: MaterialId) -> &[RecipeId] {
        self.producers
            .get(&material)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    pub fn recipe_count(&self) -> usize {
        self.recipes.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid material reference: {0:?}")]
    InvalidMaterialRef(MaterialId),
    #[error("invalid machine reference: {0:?}")]
    InvalidMachineRef(MachineId),
}
