//! Plan validation: determinism checks and invariant scans.

use crate::buffer::BufferKind;
use crate::constraint::{ConstraintEntity, ConstraintKind};
use crate::error::PlanError;
use crate::id::*;
use crate::network::Network;
use crate::plan::{ClusterPlan, Plan};
use crate::quantity::ROUNDING_ERROR;
use crate::resource::ResourceKind;
use crate::settings::SolverSettings;
use crate::snapshot::SnapshotError;
use crate::solver::Planner;
use crate::time::Date;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

// ---------------------------------------------------------------------------
// Determinism
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct DeterminismResult {
    pub is_deterministic: bool,
    /// First run whose snapshot differs from the first run's.
    pub divergent_run: Option<usize>,
    /// Snapshot size of each run, in bytes.
    pub sizes: Vec<usize>,
}

/// Solve `net` from scratch `runs` times and compare snapshot bytes.
pub fn validate_determinism(
    net: &Network,
    settings: &SolverSettings,
    runs: usize,
) -> Result<DeterminismResult, ValidationError> {
    let planner = Planner::new(settings.clone());
    let mut reference: Option<Vec<u8>> = None;
    let mut divergent_run = None;
    let mut sizes = Vec::with_capacity(runs);
    for run in 0..runs {
        let mut plan = Plan::new(net);
        planner.solve(net, &mut plan)?;
        let bytes = plan.snapshot_bytes()?;
        sizes.push(bytes.len());
        match &reference {
            None => reference = Some(bytes),
            Some(first) if *first != bytes && divergent_run.is_none() => divergent_run = Some(run),
            Some(_) => {}
        }
    }
    Ok(DeterminismResult {
        is_deterministic: divergent_run.is_none(),
        divergent_run,
        sizes,
    })
}

// ---------------------------------------------------------------------------
// Invariant scans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// Inventory below the minimum without a shortage logged against the
    /// buffer by any demand.
    BelowMinimum {
        buffer: BufferId,
        date: Date,
        onhand: f64,
        minimum: f64,
    },
    /// Continuous load above the resource maximum.
    OverCapacity {
        resource: ResourceId,
        date: Date,
        load: f64,
        maximum: f64,
    },
    /// Claims in a bucket above its capacity.
    BucketOverload {
        resource: ResourceId,
        bucket: Date,
        used: f64,
        capacity: f64,
    },
}

/// Scan every buffer from the current date on.
pub fn check_buffers(net: &Network, plan: &Plan) -> Vec<Violation> {
    let mut out = Vec::new();
    for (id, buffer) in net.buffers() {
        if buffer.kind == BufferKind::Infinite {
            continue;
        }
        let Some(cp) = plan.cluster(buffer.cluster()) else { continue };
        let Some(tl) = cp.buffer_timeline(id) else { continue };
        let now = net.current();
        let mut dates: Vec<Date> = tl.dates().into_iter().filter(|d| *d >= now).collect();
        dates.push(now);
        dates.extend(buffer.minimum.changes_between(now, Date::INFINITE_FUTURE));
        dates.sort();
        dates.dedup();
        for date in dates {
            let onhand = tl.onhand_at(date);
            let minimum = buffer.minimum.value_at(date);
            if onhand >= minimum - ROUNDING_ERROR || shortage_logged(net, cp, id, date) {
                continue;
            }
            out.push(Violation::BelowMinimum {
                buffer: id,
                date,
                onhand,
                minimum,
            });
        }
    }
    out
}

fn shortage_logged(net: &Network, cp: &ClusterPlan, buffer: BufferId, date: Date) -> bool {
    let Some(def) = net.cluster(cp.id()) else {
        return false;
    };
    def.demands.iter().any(|d| {
        cp.constraints(*d).is_some_and(|log| {
            log.iter().any(|c| {
                c.kind == ConstraintKind::MaterialShortage
                    && c.entity == ConstraintEntity::Buffer(buffer)
                    && c.start <= date
            })
        })
    })
}

/// Scan every leaf resource with finite capacity.
pub fn check_resources(net: &Network, plan: &Plan) -> Vec<Violation> {
    let mut out = Vec::new();
    for (id, resource) in net.resources() {
        if !resource.members().is_empty() {
            continue;
        }
        let Some(tl) = plan
            .cluster(resource.cluster())
            .and_then(|cp| cp.resource_timeline(id))
        else {
            continue;
        };
        match &resource.kind {
            ResourceKind::Infinite => {}
            ResourceKind::Default => {
                for date in tl.dates() {
                    let load = tl.onhand_at(date);
                    let maximum = resource.maximum.value_at(date);
                    if load > maximum + ROUNDING_ERROR {
                        out.push(Violation::OverCapacity {
                            resource: id,
                            date,
                            load,
                            maximum,
                        });
                    }
                }
            }
            ResourceKind::Buckets(cal) => {
                for i in 0..cal.len() {
                    let Some(bucket) = cal.bucket(i) else { break };
                    let used = tl.flow_between(bucket.start, bucket.end);
                    if used > bucket.capacity + ROUNDING_ERROR {
                        out.push(Violation::BucketOverload {
                            resource: id,
                            bucket: bucket.start,
                            used,
                            capacity: bucket.capacity,
                        });
                    }
                }
            }
        }
    }
    out
}
