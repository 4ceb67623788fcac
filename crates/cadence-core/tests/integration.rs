//! Integration tests for the Cadence planner.
//!
//! Each test builds a small supply network, solves it through the public
//! `Planner` API and checks the resulting plan end to end.

use cadence_core::buffer::Buffer;
use cadence_core::command::CommandManager;
use cadence_core::constraint::ConstraintKind;
use cadence_core::demand::Demand;
use cadence_core::item::Item;
use cadence_core::operation::SearchMode;
use cadence_core::plan::Plan;
use cadence_core::settings::SolverSettings;
use cadence_core::snapshot::PlanSnapshot;
use cadence_core::solver::{DemandOutcome, Planner};
use cadence_core::test_utils::*;
use cadence_core::validation::{check_buffers, check_resources, validate_determinism};

// ===========================================================================
// Test 1: Single step, unconstrained supply
// ===========================================================================

#[test]
fn single_demand_is_met_by_one_operationplan() {
    let net = single_step_network(0.0);
    let plan = solve(&net, constrained());

    assert_eq!(
        plans_of(&plan, &net, make_op(&net)),
        vec![(100.0, day(8), day(10))]
    );
    assert_eq!(plan.planned_quantity(&net, order(&net)), 100.0);
    assert!(
        plan.constraints(&net, order(&net))
            .is_none_or(|log| log.is_empty())
    );
}

// ===========================================================================
// Test 2: Bucketized capacity of 40 per day
// ===========================================================================

#[test]
fn capacity_shortage_moves_production_earlier() {
    let net = capacity_network(40.0);
    let plan = solve(&net, constrained());

    let makes = plans_of(&plan, &net, make_op(&net));
    let total: f64 = makes.iter().map(|(q, _, _)| q).sum();
    assert_eq!(total, 100.0);
    assert_eq!(makes.len(), 3);
    assert!(makes.iter().all(|(_, _, end)| *end <= day(10)));

    let deliveries = plan.deliveries(&net, order(&net));
    assert!(deliveries.iter().all(|d| d.end == day(10)));
    assert_eq!(plan.planned_quantity(&net, order(&net)), 100.0);
    assert!(check_resources(&net, &plan).is_empty());
}

#[test]
fn capacity_shortage_with_no_room_is_answered_late() {
    // 20 per day leaves room for only 60 in the buckets before day 3.
    let mut b = single_step_builder(0.0);
    b.mutate_demand("order", |d| d.due = day(4)).unwrap();
    let press = b.add_resource(cadence_core::resource::Resource::buckets(
        "press",
        cadence_core::calendar::BucketCalendar::uniform(day(0), days(1), 60, 20.0),
    ));
    let make = b.operation_id("make").unwrap();
    b.add_load(cadence_core::load::Load::new(make, press, 1.0));
    let net = b.build().unwrap();

    let plan = solve(&net, constrained());
    let log = plan.constraints(&net, order(&net)).unwrap();
    assert!(log.count(ConstraintKind::CapacityOverload) >= 1);
    assert!(
        plan.deliveries(&net, order(&net))
            .iter()
            .any(|d| d.end > day(4))
    );
    assert_eq!(plan.planned_quantity(&net, order(&net)), 100.0);
    assert!(check_resources(&net, &plan).is_empty());
}

// ===========================================================================
// Test 3: Safety stock above target
// ===========================================================================

#[test]
fn safety_stock_pass_leaves_healthy_buffer_alone() {
    let net = safety_stock_network(50.0, 20.0, 0.0);
    let plan = solve(&net, constrained());
    assert_eq!(plan.operationplan_count(), 0);
    assert!(check_buffers(&net, &plan).is_empty());
}

// ===========================================================================
// Test 4: Safety stock below target with a lot size minimum
// ===========================================================================

#[test]
fn safety_stock_replenishment_respects_lot_minimum() {
    let net = safety_stock_network(10.0, 20.0, 50.0);
    let plan = solve(&net, constrained());
    let makes = plans_of(&plan, &net, make_op(&net));
    assert_eq!(makes.len(), 1);
    assert_eq!(makes[0].0, 50.0);
}

// ===========================================================================
// Test 5: Alternate search by cost and penalty
// ===========================================================================

#[test]
fn cost_penalty_search_prefers_the_cheap_alternate() {
    let net = alternate_network(SearchMode::MinCostPenalty);
    let plan = solve(&net, constrained());
    let expensive = net.operation_id("expensive").unwrap();
    let cheap = net.operation_id("cheap").unwrap();

    assert!(plans_of(&plan, &net, expensive).is_empty());
    assert_eq!(plans_of(&plan, &net, cheap), vec![(100.0, day(9), day(10))]);
    assert_eq!(plan.planned_quantity(&net, order(&net)), 100.0);
}

#[test]
fn priority_search_keeps_declared_order() {
    let net = alternate_network(SearchMode::Priority);
    let plan = solve(&net, constrained());
    let expensive = net.operation_id("expensive").unwrap();
    assert_eq!(plan.planned_quantity(&net, order(&net)), 100.0);
    assert_eq!(plans_of(&plan, &net, expensive).len(), 1);
}

// ===========================================================================
// Test 6: Minimum shipment with a short supply
// ===========================================================================

#[test]
fn min_shipment_accepts_the_available_quantity_once() {
    let net = min_shipment_network();
    let mut plan = Plan::new(&net);
    let summary = Planner::new(constrained()).solve(&net, &mut plan).unwrap();

    assert_eq!(plan.planned_quantity(&net, order(&net)), 95.0);
    assert_eq!(plan.deliveries(&net, order(&net)).len(), 1);
    assert_eq!(summary.short(), 1);
    assert_eq!(summary.failed(), 0);
}

// ===========================================================================
// Test 7: Multi-level network
// ===========================================================================

#[test]
fn purchased_material_is_planned_upstream() {
    let net = two_level_network();
    let plan = solve(&net, constrained());
    let buy = net.operation_id("buy steel").unwrap();

    assert_eq!(plan.planned_quantity(&net, order(&net)), 10.0);
    assert_eq!(plans_of(&plan, &net, make_op(&net)), vec![(10.0, day(9), day(10))]);
    let buys = plans_of(&plan, &net, buy);
    let bought: f64 = buys.iter().map(|(q, _, _)| q).sum();
    assert_eq!(bought, 20.0);
    assert!(buys.iter().all(|(_, _, end)| *end <= day(9)));
    assert!(check_buffers(&net, &plan).is_empty());
}

// ===========================================================================
// Test 8: Determinism
// ===========================================================================

#[test]
fn repeated_runs_produce_identical_snapshots() {
    let net = two_level_network();
    let result = validate_determinism(&net, &constrained(), 5).unwrap();
    assert!(result.is_deterministic, "diverged at {:?}", result.divergent_run);
    assert!(result.sizes.iter().all(|s| *s == result.sizes[0]));
}

#[test]
fn parallel_and_sequential_solves_agree() {
    let mut b = single_step_builder(0.0);
    let gadget = b.add_item(Item::new("gadget"));
    let plant = b.location_id("plant").unwrap();
    b.add_buffer(Buffer::new("gadget@plant", gadget, plant).with_onhand(10.0));
    b.add_demand(Demand::new("gadgets", gadget, plant, 5.0, day(3)));
    let net = b.build().unwrap();

    let sequential = solve(&net, constrained());
    let parallel = solve(
        &net,
        SolverSettings {
            max_parallel: 4,
            ..SolverSettings::default()
        },
    );
    assert_eq!(
        sequential.snapshot_bytes().unwrap(),
        parallel.snapshot_bytes().unwrap()
    );
}

// ===========================================================================
// Test 9: Snapshot round trip
// ===========================================================================

#[test]
fn snapshot_survives_encoding() {
    let net = capacity_network(40.0);
    let plan = solve(&net, constrained());
    let bytes = plan.snapshot_bytes().unwrap();
    let decoded = PlanSnapshot::from_bytes(&bytes).unwrap();
    assert_eq!(decoded.quantity_of(make_op(&net)), 100.0);
    assert_eq!(decoded, plan.snapshot());
}

// ===========================================================================
// Test 10: Incremental planning and rollback
// ===========================================================================

#[test]
fn rolled_back_demand_leaves_no_trace() {
    let net = two_level_network();
    let mut plan = Plan::new(&net);
    let before = plan.snapshot();

    let mut commands = CommandManager::new();
    let planner = Planner::new(SolverSettings {
        autocommit: false,
        ..constrained()
    });
    let outcome = planner
        .solve_demand(&net, &mut plan, &mut commands, order(&net))
        .unwrap();
    assert_eq!(outcome, DemandOutcome::Planned);
    assert!(plan.operationplan_count() >= 3);

    commands.rollback_all(&mut plan).unwrap();
    assert_eq!(plan.operationplan_count(), 0);
    assert_eq!(plan.snapshot().operationplans, before.operationplans);
    assert_eq!(plan.onhand(&net, widget_buffer(&net), day(10)), 0.0);
}

#[test]
fn committed_demand_survives_a_later_rollback() {
    let net = single_step_network(0.0);
    let mut plan = Plan::new(&net);
    let mut commands = CommandManager::new();
    let planner = Planner::new(SolverSettings {
        autocommit: false,
        ..constrained()
    });
    planner
        .solve_demand(&net, &mut plan, &mut commands, order(&net))
        .unwrap();
    commands.commit(&mut plan).unwrap();
    let committed = plan.snapshot();

    commands.rollback_all(&mut plan).unwrap();
    assert_eq!(plan.snapshot(), committed);
}
