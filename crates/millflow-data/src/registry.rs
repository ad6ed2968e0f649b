//! Builds a [`Registry`] from `materials`, `machines` and `recipes` data
//! files in one directory.

use millflow_core::id::{MachineId, MaterialId, RecipeId};
use millflow_core::registry::{
    Footprint, MachineKind, Material, MaterialRole, RecipeEntry, Registry, RegistryBuilder,
};
use std::path::Path;
use tracing::debug;

use crate::loader::{DataFile, DataLoadError, NameTable};
use crate::schema::*;

fn footprint(data: FootprintData) -> Footprint {
    Footprint::new(data.width, data.height)
}

fn role(data: RoleData) -> MaterialRole {
    match data {
        RoleData::None => MaterialRole::None,
        RoleData::Fuel { heat_value } => MaterialRole::Fuel { heat_value },
        RoleData::Fertilizer {
            nutrient_value,
            max_fertility,
        } => MaterialRole::Fertilizer {
            nutrient_value,
            max_fertility,
        },
        RoleData::Plant { required_nutrient } => MaterialRole::Plant { required_nutrient },
    }
}

fn machine_kind(data: MachineKindData) -> MachineKind {
    match data {
        MachineKindData::Standard { footprint: fp } => MachineKind::Standard {
            footprint: fp.map(footprint),
        },
        MachineKindData::HeatingDevice {
            base_heat_consumption,
            heating_area,
        } => MachineKind::HeatingDevice {
            base_heat_consumption,
            heating_area: footprint(heating_area),
        },
        MachineKindData::Storage { slots } => MachineKind::Storage { slots },
        MachineKindData::Nursery => MachineKind::Nursery,
    }
}

fn entries(
    list: &[(String, f64)],
    names: &NameTable<MaterialId>,
    path: &Path,
) -> Result<Vec<RecipeEntry>, DataLoadError> {
    list.iter()
        .map(|(name, quantity)| {
            let id = names.resolve(name, path)?;
            Ok(RecipeEntry::new(id, *quantity))
        })
        .collect()
}

/// Load `materials.*`, `machines.*` and `recipes.*` from `dir` and build
/// the registry. All three files are required. TOML files hold their list
/// under the key matching the file name.
pub fn load_registry(dir: &Path) -> Result<Registry, DataLoadError> {
    let mut builder = RegistryBuilder::new();

    let file = DataFile::require(dir, "materials")?;
    let mut material_names: NameTable<MaterialId> = NameTable::new("material");
    for data in file.read_list::<MaterialData>("materials")? {
        material_names.claim(&data.name, &file.path)?;
        let mut material = Material::new(&data.name).with_role(role(data.role));
        material.buy_price = data.buy_price;
        material.sell_price = data.sell_price;
        material.stack_size = data.stack_size;
        let id = builder.register_material(material);
        material_names.insert(data.name, id);
    }

    let file = DataFile::require(dir, "machines")?;
    let mut machine_names: NameTable<MachineId> = NameTable::new("machine");
    for data in file.read_list::<MachineData>("machines")? {
        machine_names.claim(&data.name, &file.path)?;
        let id = builder.register_machine(
            &data.name,
            machine_kind(data.kind),
            data.input_ports,
            data.output_ports,
        );
        machine_names.insert(data.name, id);
    }

    let file = DataFile::require(dir, "recipes")?;
    let mut recipe_names: NameTable<RecipeId> = NameTable::new("recipe");
    for data in file.read_list::<RecipeData>("recipes")? {
        recipe_names.claim(&data.name, &file.path)?;
        let machine = machine_names.resolve(&data.machine, &file.path)?;
        let inputs = entries(&data.inputs, &material_names, &file.path)?;
        let outputs = entries(&data.outputs, &material_names, &file.path)?;
        let id = builder.register_recipe(&data.name, machine, data.processing_time, inputs, outputs);
        recipe_names.insert(data.name, id);
    }

    let registry = builder.build()?;
    debug!(
        target: "millflow.data",
        materials = registry.material_count(),
        machines = registry.machine_count(),
        recipes = registry.recipe_count(),
        dir = %dir.display(),
        "registry loaded"
    );
    Ok(registry)
}
