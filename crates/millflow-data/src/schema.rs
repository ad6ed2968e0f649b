//! Serde data file structs for the domain database.
//!
//! Materials, machines and recipes reference each other by name on disk.
//! The registry loader resolves those names into ids.

use serde::Deserialize;

// ===========================================================================
// Materials
// ===========================================================================

/// A material definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct MaterialData {
    pub name: String,
    #[serde(default)]
    pub buy_price: Option<f64>,
    #[serde(default)]
    pub sell_price: Option<f64>,
    #[serde(default = "default_stack_size")]
    pub stack_size: u32,
    #[serde(default)]
    pub role: RoleData,
}

fn default_stack_size() -> u32 {
    100
}

/// The role a material plays.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub enum RoleData {
    #[default]
    None,
    Fuel {
        heat_value: f64,
    },
    Fertilizer {
        nutrient_value: f64,
        max_fertility: f64,
    },
    Plant {
        required_nutrient: f64,
    },
}

// ===========================================================================
// Machines
// ===========================================================================

/// A machine definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineData {
    pub name: String,
    pub kind: MachineKindData,
    #[serde(default = "default_ports")]
    pub input_ports: u32,
    #[serde(default = "default_ports")]
    pub output_ports: u32,
}

fn default_ports() -> u32 {
    1
}

/// Width x height in tiles.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FootprintData {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub enum MachineKindData {
    Standard {
        #[serde(default)]
        footprint: Option<FootprintData>,
    },
    HeatingDevice {
        base_heat_consumption: f64,
        heating_area: FootprintData,
    },
    Storage {
        slots: u32,
    },
    Nursery,
}

// ===========================================================================
// Recipes
// ===========================================================================

/// A recipe definition in a data file. Entries are `(material, quantity)`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipeData {
    pub name: String,
    pub machine: String,
    /// Seconds per cycle.
    pub processing_time: f64,
    #[serde(default)]
    pub inputs: Vec<(String, f64)>,
    pub outputs: Vec<(String, f64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_defaults() {
        let m: MaterialData = ron::from_str(r#"(name: "wheat")"#).unwrap();
        assert_eq!(m.stack_size, 100);
        assert!(m.buy_price.is_none());
        assert!(matches!(m.role, RoleData::None));
    }

    #[test]
    fn material_role_from_json() {
        let m: MaterialData =
            serde_json::from_str(r#"{"name": "coal", "buy_price": 2.0, "role": {"Fuel": {"heat_value": 30.0}}}"#)
                .unwrap();
        assert!(matches!(m.role, RoleData::Fuel { heat_value } if heat_value == 30.0));
    }

    #[test]
    fn machine_kinds_from_ron() {
        let oven: MachineData = ron::from_str(
            r#"(name: "oven", kind: HeatingDevice(base_heat_consumption: 30.0, heating_area: (width: 2.0, height: 2.0)), output_ports: 0)"#,
        )
        .unwrap();
        assert!(matches!(oven.kind, MachineKindData::HeatingDevice { .. }));
        assert_eq!(oven.input_ports, 1);
        assert_eq!(oven.output_ports, 0);

        let greenhouse: MachineData = ron::from_str(r#"(name: "greenhouse", kind: Nursery)"#).unwrap();
        assert!(matches!(greenhouse.kind, MachineKindData::Nursery));
    }

    #[test]
    fn recipe_from_toml() {
        let r: RecipeData = toml::from_str(
            r#"
name = "bake"
machine = "bakery"
processing_time = 30.0
inputs = [["flour", 2.0]]
outputs = [["bread", 1.0]]
"#,
        )
        .unwrap();
        assert_eq!(r.inputs, vec![("flour".to_string(), 2.0)]);
        assert_eq!(r.outputs[0].0, "bread");
    }
}
