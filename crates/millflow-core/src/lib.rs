//! Millflow Core -- steady-state flow solver for production networks.
//!
//! Given an authored [`layout::Layout`] of machines, conveyors and nested
//! blueprint instances, this crate computes how much material each
//! connection actually carries once every machine has throttled itself to
//! what its downstream can absorb.
//!
//! # Recalculation Pipeline
//!
//! Each call to [`calculator::Calculator::recalculate`] runs to completion:
//!
//! 1. **Flatten** -- Expand blueprint instances into one [`graph::FlatGraph`],
//!    multiply counts down the hierarchy, attach virtual sources and sinks.
//! 2. **Solve** -- Iterate efficiencies to a fixed point, distributing each
//!    output port's supply over its connections with the allocator.
//! 3. **Settle** -- One final distribution pass at the converged efficiencies.
//! 4. **Aggregate** -- Net imports/exports, realized costs, blueprint
//!    utilization and machine counts.
//!
//! The result is an owned [`snapshot::CalcSnapshot`] keyed by authored paths.
//!
//! # Key Types
//!
//! - [`registry::Registry`] -- Immutable materials, machines and recipes.
//! - [`layout::Layout`] / [`layout::BlueprintLibrary`] -- The authored graph.
//! - [`rates::RateModel`] -- Full-capacity port rates and port materials.
//! - [`allocate::allocate`] -- Fair-share distribution of one port's supply.
//! - [`solver::solve`] -- The efficiency fixed point.
//! - [`cost::CostResolver`] / [`blueprint::BlueprintCounter`] -- Caches that
//!   outlive a single recalculation.

pub mod allocate;
pub mod blueprint;
pub mod calculator;
pub mod config;
pub mod cost;
pub mod flatten;
pub mod graph;
pub mod id;
pub mod layout;
pub mod netflow;
pub mod port;
pub mod rates;
pub mod registry;
pub mod snapshot;
pub mod solver;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
