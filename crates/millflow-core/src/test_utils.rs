//! Shared test helpers for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).
//!
//! The fixture registry models a small bakery economy:
//!
//! | recipe       | machine  | time | in          | out        |
//! |--------------|----------|------|-------------|------------|
//! | `grow_wheat` | farm     | 6 s  | -           | 1 wheat    |
//! | `grind`      | mill     | 15 s | 1 wheat     | 1 flour    |
//! | `bake`       | bakery   | 30 s | 2 flour     | 1 bread    |
//! | `culture`    | vat      | 6 s  | 1 yeast     | 2 yeast    |
//!
//! So a farm makes 10 wheat/min and a mill wants 4 wheat/min.

use crate::graph::FlatKind;
use crate::id::*;
use crate::layout::{Endpoint, Layout, NodeKind, PlacedNode, Topper};
use crate::registry::*;

// ===========================================================================
// Fixture registry
// ===========================================================================

pub struct Fixture {
    pub registry: Registry,

    pub wheat: MaterialId,
    pub flour: MaterialId,
    pub bread: MaterialId,
    pub coal: MaterialId,
    pub compost: MaterialId,
    pub herb: MaterialId,
    pub yeast: MaterialId,

    pub farm: MachineId,
    pub mill: MachineId,
    pub bakery: MachineId,
    pub vat: MachineId,
    pub oven: MachineId,
    pub silo: MachineId,
    pub greenhouse: MachineId,

    pub grow_wheat: RecipeId,
    pub grind: RecipeId,
    pub bake: RecipeId,
    pub culture: RecipeId,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    pub fn new() -> Self {
        let mut b = RegistryBuilder::new();

        let wheat = b.register_material(Material::new("wheat").with_buy_price(1.0).with_sell_price(1.5));
        let flour = b.register_material(Material::new("flour").with_sell_price(4.0));
        let bread = b.register_material(Material::new("bread").with_sell_price(12.0));
        let coal = b.register_material(
            Material::new("coal")
                .with_buy_price(2.0)
                .with_role(MaterialRole::Fuel { heat_value: 30.0 }),
        );
        let compost = b.register_material(
            Material::new("compost")
                .with_buy_price(0.5)
                .with_role(MaterialRole::Fertilizer {
                    nutrient_value: 5.0,
                    max_fertility: 20.0,
                }),
        );
        let herb = b.register_material(
            Material::new("herb")
                .with_sell_price(3.0)
                .with_role(MaterialRole::Plant {
                    required_nutrient: 4.0,
                }),
        );
        let yeast = b.register_material(Material::new("yeast"));

        let standard = MachineKind::Standard { footprint: None };
        let farm = b.register_machine("farm", standard.clone(), 0, 1);
        let mill = b.register_machine("mill", standard.clone(), 1, 1);
        let bakery = b.register_machine(
            "bakery",
            MachineKind::Standard {
                footprint: Some(Footprint::new(1.0, 1.0)),
            },
            1,
            1,
        );
        let vat = b.register_machine("vat", standard, 1, 1);
        let oven = b.register_machine(
            "oven",
            MachineKind::HeatingDevice {
                base_heat_consumption: 30.0,
                heating_area: Footprint::new(2.0, 2.0),
            },
            1,
            0,
        );
        let silo = b.register_machine("silo", MachineKind::Storage { slots: 4 }, 2, 2);
        let greenhouse = b.register_machine("greenhouse", MachineKind::Nursery, 1, 1);

        let grow_wheat = b.register_recipe("grow_wheat", farm, 6.0, vec![], vec![RecipeEntry::new(wheat, 1.0)]);
        let grind = b.register_recipe(
            "grind",
            mill,
            15.0,
            vec![RecipeEntry::new(wheat, 1.0)],
            vec![RecipeEntry::new(flour, 1.0)],
        );
        let bake = b.register_recipe(
            "bake",
            bakery,
            30.0,
            vec![RecipeEntry::new(flour, 2.0)],
            vec![RecipeEntry::new(bread, 1.0)],
        );
        let culture = b.register_recipe(
            "culture",
            vat,
            6.0,
            vec![RecipeEntry::new(yeast, 1.0)],
            vec![RecipeEntry::new(yeast, 2.0)],
        );

        let registry = b.build().expect("fixture registry is valid");
        Self {
            registry,
            wheat,
            flour,
            bread,
            coal,
            compost,
            herb,
            yeast,
            farm,
            mill,
            bakery,
            vat,
            oven,
            silo,
            greenhouse,
            grow_wheat,
            grind,
            bake,
            culture,
        }
    }

    // -----------------------------------------------------------------------
    // Flat node kinds
    // -----------------------------------------------------------------------

    pub fn machine_kind(&self, machine: MachineId, recipe: RecipeId) -> FlatKind {
        FlatKind::Machine {
            machine,
            recipe: Some(recipe),
        }
    }

    /// A greenhouse growing herbs.
    pub fn nursery_kind(&self, fertilizer: Option<MaterialId>) -> FlatKind {
        FlatKind::Nursery {
            machine: self.greenhouse,
            plant: Some(self.herb),
            fertilizer,
        }
    }

    // -----------------------------------------------------------------------
    // Placed nodes
    // -----------------------------------------------------------------------

    pub fn machine_node(&self, id: u32, machine: MachineId, recipe: RecipeId) -> PlacedNode {
        PlacedNode::new(
            NodeId(id),
            NodeKind::Machine {
                machine,
                recipe: Some(recipe),
            },
        )
    }

    pub fn farm_node(&self, id: u32) -> PlacedNode {
        self.machine_node(id, self.farm, self.grow_wheat)
    }

    pub fn mill_node(&self, id: u32) -> PlacedNode {
        self.machine_node(id, self.mill, self.grind)
    }

    pub fn bakery_node(&self, id: u32) -> PlacedNode {
        self.machine_node(id, self.bakery, self.bake)
    }

    pub fn vat_node(&self, id: u32) -> PlacedNode {
        self.machine_node(id, self.vat, self.culture)
    }

    /// An oven with one baking topper.
    pub fn oven_node(&self, id: u32, fuel: Option<MaterialId>) -> PlacedNode {
        PlacedNode::new(
            NodeId(id),
            NodeKind::Heating {
                machine: self.oven,
                toppers: vec![Topper {
                    machine: self.bakery,
                    recipe: Some(self.bake),
                }],
                fuel,
            },
        )
    }

    pub fn silo_node(&self, id: u32) -> PlacedNode {
        PlacedNode::new(
            NodeId(id),
            NodeKind::Storage {
                machine: self.silo,
                inventory: Default::default(),
            },
        )
    }

    pub fn nursery_node(&self, id: u32, fertilizer: Option<MaterialId>) -> PlacedNode {
        PlacedNode::new(
            NodeId(id),
            NodeKind::Nursery {
                machine: self.greenhouse,
                plant: Some(self.herb),
                fertilizer,
            },
        )
    }
}

// ===========================================================================
// Layout helpers
// ===========================================================================

pub fn portal_node(id: u32, material: MaterialId) -> PlacedNode {
    PlacedNode::new(
        NodeId(id),
        NodeKind::Portal {
            material: Some(material),
        },
    )
}

pub fn export_node(id: u32) -> PlacedNode {
    PlacedNode::new(NodeId(id), NodeKind::Export)
}

pub fn blueprint_node(id: u32, blueprint: u32) -> PlacedNode {
    PlacedNode::new(
        NodeId(id),
        NodeKind::Blueprint {
            blueprint: BlueprintId(blueprint),
        },
    )
}

/// Connect output `from_port` of `from` to input `to_port` of `to`.
pub fn link(layout: &mut Layout, from: u32, from_port: u32, to: u32, to_port: u32) -> ConnectionId {
    layout.connect(
        Endpoint::new(NodeId(from), from_port),
        Endpoint::new(NodeId(to), to_port),
    )
}

/// `farm -> mill -> mill -> ...` with `len` mills, every mill also feeding
/// an export. Used by benchmarks and property tests.
pub fn mill_chain(f: &Fixture, len: u32) -> Layout {
    let mut layout = Layout::new();
    layout.add_node(f.farm_node(0));
    let export = len + 1;
    layout.add_node(export_node(export));
    for i in 1..=len {
        layout.add_node(f.mill_node(i));
        link(&mut layout, i - 1, 0, i, 0);
        link(&mut layout, i, 0, export, 0);
    }
    layout
}
