//! Integration test: full recalculations of small flat layouts.
//!
//! Each scenario builds a layout on the fixture registry, runs it through
//! [`Calculator::recalculate`], and reads the answer back from the snapshot
//! the way a UI would.

use millflow_core::calculator::Calculator;
use millflow_core::config::CalculatorConfig;
use millflow_core::id::{ConnectionId, ConnectionPath, NodeId, NodePath};
use millflow_core::layout::{BlueprintLibrary, Endpoint, Layout, NodeKind, PlacedNode};
use millflow_core::port::{PortAddress, PortKey};
use millflow_core::registry::{MachineKind, Material, RecipeEntry, RegistryBuilder};
use millflow_core::test_utils::*;

fn conn(id: u32) -> ConnectionPath {
    ConnectionPath::top_level(ConnectionId(id))
}

fn node(id: u32) -> NodePath {
    NodePath::root(NodeId(id))
}

#[test]
fn downstream_demand_throttles_producer() {
    let f = Fixture::new();
    let mut layout = Layout::new();
    layout.add_node(f.farm_node(1));
    layout.add_node(f.mill_node(2));
    let c = link(&mut layout, 1, 0, 2, 0);

    let snap = Calculator::default().recalculate(&f.registry, &layout, &BlueprintLibrary::new());

    // 10 wheat/min on offer, the mill only wants 4.
    assert!((snap.efficiency(&node(1)).unwrap() - 0.4).abs() < 1e-6);
    assert!((snap.efficiency(&node(2)).unwrap() - 1.0).abs() < 1e-6);
    assert!((snap.actual_rate(&ConnectionPath::top_level(c)).unwrap() - 4.0).abs() < 1e-6);
    assert!(snap.diagnostics.converged);
    assert!(snap.stability_warning.is_none());
}

#[test]
fn unconnected_producer_exports_at_full_rate() {
    let f = Fixture::new();
    let mut layout = Layout::new();
    layout.add_node(f.farm_node(1).with_count(3));

    let snap = Calculator::default().recalculate(&f.registry, &layout, &BlueprintLibrary::new());

    assert_eq!(snap.efficiency(&node(1)), Some(1.0));
    assert!((snap.net.export_rate(f.wheat) - 30.0).abs() < 1e-6);
    assert!(snap.net.imports.is_empty());
    assert!((snap.net.export_revenue - 45.0).abs() < 1e-6);
}

#[test]
fn self_feeding_loop_warns_and_stalls() {
    let f = Fixture::new();
    let mut layout = Layout::new();
    layout.add_node(f.vat_node(1));
    link(&mut layout, 1, 0, 1, 0);

    let snap = Calculator::default().recalculate(&f.registry, &layout, &BlueprintLibrary::new());

    assert!(snap.stability_warning.is_some());
    assert!(snap.total_flow() < 0.01);
    assert!(snap.efficiency(&node(1)).unwrap() < 1e-3);
}

#[test]
fn full_chain_conserves_flow() {
    let f = Fixture::new();
    let mut layout = Layout::new();
    layout.add_node(f.farm_node(1));
    layout.add_node(f.mill_node(2));
    layout.add_node(f.bakery_node(3));
    layout.add_node(export_node(4));
    link(&mut layout, 1, 0, 2, 0);
    link(&mut layout, 2, 0, 3, 0);
    link(&mut layout, 3, 0, 4, 0);

    let snap = Calculator::default().recalculate(&f.registry, &layout, &BlueprintLibrary::new());

    let wheat = snap.actual_rate(&conn(0)).unwrap();
    let flour = snap.actual_rate(&conn(1)).unwrap();
    let bread = snap.actual_rate(&conn(2)).unwrap();
    // grind is 1:1, bake is 2:1.
    assert!((wheat - 4.0).abs() < 1e-6);
    assert!((flour - wheat).abs() < 1e-6);
    assert!((bread - flour / 2.0).abs() < 1e-6);
    assert!((snap.net.export_rate(f.bread) - 2.0).abs() < 1e-6);
    assert!(snap.nodes.values().all(|n| !n.insufficient_input));
}

#[test]
fn heating_device_draws_fuel_from_a_portal() {
    let f = Fixture::new();
    let mut layout = Layout::new();
    layout.add_node(portal_node(1, f.coal));
    layout.add_node(f.oven_node(2, None));
    layout.connect(
        Endpoint::new(NodeId(1), 0u32),
        Endpoint::new(NodeId(2), PortKey::fuel()),
    );

    let snap = Calculator::default().recalculate(&f.registry, &layout, &BlueprintLibrary::new());

    // 30 base heat plus 7.5 for the 1x1 topper on a 2x2 area; coal burns for 30.
    assert!((snap.actual_rate(&conn(0)).unwrap() - 1.25).abs() < 1e-6);
    assert!((snap.net.purchasing_cost - 2.5).abs() < 1e-6);
    let fuel_port = snap
        .port(&PortAddress::input(node(2), PortKey::fuel()))
        .unwrap();
    assert_eq!(fuel_port.material, Some(f.coal));
    assert!(!snap.is_insufficient(&node(2)));
}

#[test]
fn mismatched_connection_is_flagged_and_still_carries_flow() {
    let f = Fixture::new();
    let mut layout = Layout::new();
    layout.add_node(f.farm_node(1));
    layout.add_node(f.bakery_node(2));
    link(&mut layout, 1, 0, 2, 0);

    let snap = Calculator::default().recalculate(&f.registry, &layout, &BlueprintLibrary::new());
    let report = snap.connection(&conn(0)).unwrap();
    assert!(report.type_mismatch);
    assert_eq!(report.source_material, Some(f.wheat));
    assert!(report.actual_rate > 0.0);
}

#[test]
fn loops_without_outside_supply_stall_whatever_the_recipe_ratio() {
    let mut b = RegistryBuilder::new();
    let x = b.register_material(Material::new("x"));
    let m = b.register_machine("churn", MachineKind::Standard { footprint: None }, 1, 1);
    let even = b.register_recipe("even", m, 6.0, vec![RecipeEntry::new(x, 1.0)], vec![RecipeEntry::new(x, 1.0)]);
    let lossy = b.register_recipe("lossy", m, 6.0, vec![RecipeEntry::new(x, 2.0)], vec![RecipeEntry::new(x, 1.0)]);
    let registry = b.build().unwrap();

    for recipe in [even, lossy] {
        let mut layout = Layout::new();
        layout.add_node(PlacedNode::new(
            NodeId(1),
            NodeKind::Machine {
                machine: m,
                recipe: Some(recipe),
            },
        ));
        link(&mut layout, 1, 0, 1, 0);

        let snap = Calculator::default().recalculate(&registry, &layout, &BlueprintLibrary::new());

        assert!(snap.stability_warning.is_some(), "{recipe:?}");
        assert!(snap.total_flow() < 0.01, "{recipe:?}");
        assert!(snap.efficiency(&node(1)).unwrap() < 1e-3, "{recipe:?}");
    }
}

#[test]
fn fan_out_conserves_material() {
    let f = Fixture::new();
    let mut layout = Layout::new();
    layout.add_node(f.farm_node(1));
    for id in 2..=4 {
        layout.add_node(f.mill_node(id));
        link(&mut layout, 1, 0, id, 0);
    }

    let snap = Calculator::default().recalculate(&f.registry, &layout, &BlueprintLibrary::new());

    // Three mills want 12 wheat/min, the farm grows 10; grind is 1:1.
    let wheat: f64 = (0..3).map(|c| snap.actual_rate(&conn(c)).unwrap()).sum();
    assert!((wheat - 10.0).abs() < 1e-6);
    assert!((snap.net.export_rate(f.flour) - 10.0).abs() < 1e-6);
    assert_eq!(snap.net.export_rate(f.wheat), 0.0);
    for id in 2..=4 {
        assert!((snap.efficiency(&node(id)).unwrap() - 10.0 / 12.0).abs() < 1e-6);
    }
}

#[test]
fn round_cap_yields_usable_result_with_diagnostics() {
    let f = Fixture::new();
    let mut layout = Layout::new();
    layout.add_node(f.farm_node(1));
    layout.add_node(f.mill_node(2));
    link(&mut layout, 1, 0, 2, 0);
    let mut config = CalculatorConfig::default();
    config.solver.max_rounds = 1;

    let snap = Calculator::new(config).recalculate(&f.registry, &layout, &BlueprintLibrary::new());

    assert!(!snap.diagnostics.converged);
    assert_eq!(snap.diagnostics.iterations, 1);
    // Rates still come from the last committed efficiencies.
    assert!((snap.efficiency(&node(1)).unwrap() - 0.4).abs() < 1e-6);
    assert!((snap.actual_rate(&conn(0)).unwrap() - 4.0).abs() < 1e-6);
}

#[test]
fn unconnected_portal_is_not_billed() {
    let f = Fixture::new();
    let mut layout = Layout::new();
    layout.add_node(portal_node(1, f.wheat));

    let snap = Calculator::default().recalculate(&f.registry, &layout, &BlueprintLibrary::new());

    assert_eq!(snap.efficiency(&node(1)), Some(0.0));
    assert_eq!(snap.net.purchasing_cost, 0.0);
    assert_eq!(snap.total_flow(), 0.0);
}

#[test]
fn unknown_recipe_degrades_to_zero() {
    let f = Fixture::new();
    let mut layout = Layout::new();
    layout.add_node(f.farm_node(1));
    layout.add_node(f.machine_node(2, f.mill, millflow_core::id::RecipeId(404)));
    link(&mut layout, 1, 0, 2, 0);

    let snap = Calculator::default().recalculate(&f.registry, &layout, &BlueprintLibrary::new());
    assert_eq!(snap.actual_rate(&conn(0)), Some(0.0));
    assert_eq!(snap.efficiency(&node(1)), Some(0.0));
}

#[test]
fn mutual_recipe_cycle_has_no_cost() {
    let mut b = RegistryBuilder::new();
    let a = b.register_material(Material::new("a"));
    let c = b.register_material(Material::new("b"));
    let m = b.register_machine("m", MachineKind::Standard { footprint: None }, 1, 1);
    b.register_recipe("a_from_b", m, 1.0, vec![RecipeEntry::new(c, 1.0)], vec![RecipeEntry::new(a, 1.0)]);
    b.register_recipe("b_from_a", m, 1.0, vec![RecipeEntry::new(a, 1.0)], vec![RecipeEntry::new(c, 1.0)]);
    let registry = b.build().unwrap();

    let mut calc = Calculator::default();
    assert!(!calc.realized_cost(&registry, a).is_finite());
    assert!(!calc.realized_cost(&registry, c).is_finite());
}

#[test]
fn repeated_recalculation_is_bit_identical() {
    let f = Fixture::new();
    let mut layout = Layout::new();
    layout.add_node(f.farm_node(1));
    layout.add_node(f.mill_node(2));
    layout.add_node(f.mill_node(3));
    layout.add_node(f.silo_node(4));
    link(&mut layout, 1, 0, 2, 0);
    link(&mut layout, 1, 0, 4, 0);
    link(&mut layout, 4, 0, 3, 0);
    link(&mut layout, 2, 0, 4, 1);

    let lib = BlueprintLibrary::new();
    let mut calc = Calculator::default();
    let first = calc.recalculate(&f.registry, &layout, &lib);
    let second = calc.recalculate(&f.registry, &layout, &lib);
    assert_eq!(first.nodes, second.nodes);
    for (path, report) in &first.connections {
        let other = &second.connections[path];
        assert_eq!(report.actual_rate.to_bits(), other.actual_rate.to_bits());
    }
    assert_eq!(second.generation, first.generation + 1);
}
