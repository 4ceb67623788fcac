//! Shared test helpers for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::buffer::{Buffer, ProcurePolicy};
use crate::calendar::{BucketCalendar, Envelope};
use crate::demand::Demand;
use crate::flow::Flow;
use crate::id::*;
use crate::item::{Item, Location};
use crate::load::Load;
use crate::network::{Network, NetworkBuilder};
use crate::operation::{Operation, SearchMode, SubOperation};
use crate::plan::Plan;
use crate::resource::Resource;
use crate::settings::SolverSettings;
use crate::solver::Planner;
use crate::time::{Date, Duration};

// ===========================================================================
// Dates and settings
// ===========================================================================

pub fn day(n: i64) -> Date {
    Date::from_days(n)
}

pub fn days(n: i64) -> Duration {
    Duration::from_days(n)
}

/// Default settings, run on a single thread.
pub fn constrained() -> SolverSettings {
    SolverSettings {
        max_parallel: 1,
        ..SolverSettings::default()
    }
}

pub fn unconstrained() -> SolverSettings {
    SolverSettings {
        constraints: 0,
        max_parallel: 1,
        ..SolverSettings::default()
    }
}

/// Solve a fresh plan for `net`.
pub fn solve(net: &Network, settings: SolverSettings) -> Plan {
    let mut plan = Plan::new(net);
    Planner::new(settings)
        .solve(net, &mut plan)
        .expect("solve should not fail");
    plan
}

// ===========================================================================
// Lookups
// ===========================================================================

pub fn make_op(net: &Network) -> OperationId {
    net.operation_id("make").expect("operation make")
}

pub fn widget_buffer(net: &Network) -> BufferId {
    net.buffer_id("widget@plant").expect("buffer widget@plant")
}

pub fn order(net: &Network) -> DemandId {
    net.demand_id("order").expect("demand order")
}

/// Active operationplans of `op` as `(quantity, start, end)`, in creation
/// order.
pub fn plans_of(plan: &Plan, net: &Network, op: OperationId) -> Vec<(f64, Date, Date)> {
    let Some(cp) = plan.cluster(net.operation(op).cluster()) else {
        return Vec::new();
    };
    cp.operationplans_of(op)
        .into_iter()
        .filter_map(|id| cp.get(id))
        .map(|o| (o.quantity, o.start, o.end))
        .collect()
}

// ===========================================================================
// Networks
// ===========================================================================

/// `widget` at `plant`, made by `make` (2 days, one widget per unit) and
/// ordered by `order` (100 due day 10).
pub fn single_step_builder(onhand: f64) -> NetworkBuilder {
    let mut b = NetworkBuilder::new(day(0));
    let widget = b.add_item(Item::new("widget"));
    let plant = b.add_location(Location::new("plant"));
    let fg = b.add_buffer(Buffer::new("widget@plant", widget, plant).with_onhand(onhand));
    let make = b.add_operation(Operation::fixed_time("make", days(2)));
    b.add_flow(Flow::produce(make, fg, 1.0));
    b.add_demand(Demand::new("order", widget, plant, 100.0, day(10)));
    b
}

pub fn single_step_network(onhand: f64) -> Network {
    single_step_builder(onhand).build().expect("valid network")
}

/// The single step network with `make` loading a daily bucketized press
/// of `per_day` capacity, one capacity unit per widget.
pub fn capacity_network(per_day: f64) -> Network {
    let mut b = single_step_builder(0.0);
    let press = b.add_resource(Resource::buckets(
        "press",
        BucketCalendar::uniform(day(0), days(1), 60, per_day),
    ));
    let make = b.operation_id("make").expect("make");
    b.add_load(Load::new(make, press, 1.0));
    b.build().expect("valid network")
}

/// A lone buffer with a safety stock target and a producing operation
/// with a minimum lot size. No demand.
pub fn safety_stock_network(onhand: f64, minimum: f64, lot_minimum: f64) -> Network {
    let mut b = NetworkBuilder::new(day(0));
    let widget = b.add_item(Item::new("widget"));
    let plant = b.add_location(Location::new("plant"));
    let fg = b.add_buffer(
        Buffer::new("widget@plant", widget, plant)
            .with_onhand(onhand)
            .with_minimum(Envelope::constant(minimum)),
    );
    let make = b.add_operation(
        Operation::fixed_time("make", days(1)).with_size(lot_minimum, 0.0, f64::INFINITY),
    );
    b.add_flow(Flow::produce(make, fg, 1.0));
    b.build().expect("valid network")
}

/// `make` is an alternate of `expensive` (priority 1, cost 10 per unit) and
/// `cheap` (priority 2, cost 2 per unit).
pub fn alternate_network(search: SearchMode) -> Network {
    let mut b = NetworkBuilder::new(day(0));
    let widget = b.add_item(Item::new("widget"));
    let plant = b.add_location(Location::new("plant"));
    let fg = b.add_buffer(Buffer::new("widget@plant", widget, plant));
    let expensive = b.add_operation(Operation::fixed_time("expensive", days(1)).with_cost(10.0));
    let cheap = b.add_operation(Operation::fixed_time("cheap", days(1)).with_cost(2.0));
    b.add_flow(Flow::produce(expensive, fg, 1.0));
    b.add_flow(Flow::produce(cheap, fg, 1.0));
    b.add_operation(
        Operation::alternate(
            "make",
            vec![SubOperation::new(expensive, 1), SubOperation::new(cheap, 2)],
        )
        .with_search(search),
    );
    b.add_demand(Demand::new("order", widget, plant, 100.0, day(10)));
    b.build().expect("valid network")
}

/// Only 95 widgets exist and nothing can make more. The order wants 100
/// with a minimum shipment of 10.
pub fn min_shipment_network() -> Network {
    let mut b = NetworkBuilder::new(day(0));
    let widget = b.add_item(Item::new("widget"));
    let plant = b.add_location(Location::new("plant"));
    b.add_buffer(Buffer::new("widget@plant", widget, plant).with_onhand(95.0));
    b.add_demand(Demand::new("order", widget, plant, 100.0, day(10)).with_min_shipment(10.0));
    b.build().expect("valid network")
}

/// `widget` assembled by `make` (1 day) from two `steel` each; steel is
/// bought from a supplier with a 3 day lead time.
pub fn two_level_builder() -> NetworkBuilder {
    let mut b = NetworkBuilder::new(day(0));
    let widget = b.add_item(Item::new("widget"));
    let steel = b.add_item(Item::new("steel").with_cost(1.5));
    let plant = b.add_location(Location::new("plant"));
    let fg = b.add_buffer(Buffer::new("widget@plant", widget, plant));
    let rm = b.add_buffer(Buffer::new("steel@plant", steel, plant));
    let make = b.add_operation(Operation::fixed_time("make", days(1)));
    b.add_flow(Flow::produce(make, fg, 1.0));
    b.add_flow(Flow::consume(make, rm, 2.0));
    let buy = b.add_operation(Operation::item_supplier("buy steel", days(3)));
    b.add_flow(Flow::produce(buy, rm, 1.0));
    b.add_demand(Demand::new("order", widget, plant, 10.0, day(10)));
    b
}

pub fn two_level_network() -> Network {
    two_level_builder().build().expect("valid network")
}

/// A buffer replenished by purchase orders, consumed by one order.
pub fn procure_network(onhand: f64, minimum: f64, maximum: f64) -> Network {
    let mut b = NetworkBuilder::new(day(0));
    let widget = b.add_item(Item::new("widget"));
    let plant = b.add_location(Location::new("plant"));
    b.add_buffer(
        Buffer::new("widget@plant", widget, plant)
            .with_onhand(onhand)
            .with_minimum(Envelope::constant(minimum))
            .with_maximum(Envelope::constant(maximum))
            .procure(ProcurePolicy {
                leadtime: days(2),
                ..ProcurePolicy::default()
            }),
    );
    b.add_demand(Demand::new("order", widget, plant, 30.0, day(10)));
    b.build().expect("valid network")
}
