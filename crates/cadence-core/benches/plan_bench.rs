use cadence_core::buffer::Buffer;
use cadence_core::calendar::BucketCalendar;
use cadence_core::demand::Demand;
use cadence_core::flow::Flow;
use cadence_core::item::{Item, Location};
use cadence_core::load::Load;
use cadence_core::network::{Network, NetworkBuilder};
use cadence_core::operation::Operation;
use cadence_core::plan::Plan;
use cadence_core::resource::Resource;
use cadence_core::settings::SolverSettings;
use cadence_core::solver::Planner;
use cadence_core::test_utils::*;
use criterion::{Criterion, criterion_group, criterion_main};

/// `products` independent two-level chains, each with its own press and
/// `orders` demands spread over the horizon.
fn build_network(products: usize, orders: usize) -> Network {
    let mut b = NetworkBuilder::new(day(0));
    let plant = b.add_location(Location::new("plant"));
    for p in 0..products {
        let fg_item = b.add_item(Item::new(&format!("product {p}")));
        let rm_item = b.add_item(Item::new(&format!("part {p}")).with_cost(1.0));
        let fg = b.add_buffer(Buffer::new(&format!("product {p}@plant"), fg_item, plant));
        let rm = b.add_buffer(Buffer::new(&format!("part {p}@plant"), rm_item, plant).with_onhand(50.0));
        let make = b.add_operation(Operation::fixed_time(&format!("make {p}"), days(1)));
        b.add_flow(Flow::produce(make, fg, 1.0));
        b.add_flow(Flow::consume(make, rm, 2.0));
        let buy = b.add_operation(Operation::item_supplier(&format!("buy {p}"), days(5)));
        b.add_flow(Flow::produce(buy, rm, 1.0));
        let press = b.add_resource(Resource::buckets(
            &format!("press {p}"),
            BucketCalendar::uniform(day(0), days(1), 365, 40.0),
        ));
        b.add_load(Load::new(make, press, 1.0));
        for o in 0..orders {
            let due = day(10 + (o as i64 * 7) % 300);
            let qty = 10.0 + ((o * 37) % 90) as f64;
            b.add_demand(
                Demand::new(&format!("order {p}/{o}"), fg_item, plant, qty, due)
                    .with_priority((o % 3) as i32),
            );
        }
    }
    b.build().expect("valid network")
}

fn bench_single_cluster(c: &mut Criterion) {
    let net = build_network(1, 200);
    let planner = Planner::new(constrained());
    c.bench_function("solve_1_cluster_200_orders", |b| {
        b.iter(|| {
            let mut plan = Plan::new(&net);
            planner.solve(&net, &mut plan).unwrap();
        });
    });
}

fn bench_many_clusters(c: &mut Criterion) {
    let net = build_network(50, 20);
    let mut group = c.benchmark_group("clusters");
    group.sample_size(10);

    let sequential = Planner::new(constrained());
    group.bench_function("solve_50_clusters_sequential", |b| {
        b.iter(|| {
            let mut plan = Plan::new(&net);
            sequential.solve(&net, &mut plan).unwrap();
        });
    });

    let parallel = Planner::new(SolverSettings {
        max_parallel: 8,
        ..SolverSettings::default()
    });
    group.bench_function("solve_50_clusters_parallel", |b| {
        b.iter(|| {
            let mut plan = Plan::new(&net);
            parallel.solve(&net, &mut plan).unwrap();
        });
    });

    group.finish();
}

fn bench_unconstrained(c: &mut Criterion) {
    let net = build_network(10, 50);
    let planner = Planner::new(unconstrained());
    c.bench_function("solve_unconstrained_10_clusters", |b| {
        b.iter(|| {
            let mut plan = Plan::new(&net);
            planner.solve(&net, &mut plan).unwrap();
        });
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let net = build_network(10, 50);
    let mut plan = Plan::new(&net);
    Planner::new(constrained()).solve(&net, &mut plan).unwrap();
    let mut group = c.benchmark_group("snapshot");

    group.bench_function("snapshot_bytes_10_clusters", |b| {
        b.iter(|| {
            plan.snapshot_bytes().unwrap();
        });
    });

    let bytes = plan.snapshot_bytes().unwrap();
    group.bench_function("snapshot_decode_10_clusters", |b| {
        b.iter(|| {
            cadence_core::snapshot::PlanSnapshot::from_bytes(&bytes).unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_cluster,
    bench_many_clusters,
    bench_unconstrained,
    bench_snapshot
);
criterion_main!(benches);
