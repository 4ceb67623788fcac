//! Bucketized resources: capacity is a quantity per bucket, consumed by the
//! bucket an operationplan starts in.

use super::Solver;
use crate::calendar::{Bucket, BucketCalendar};
use crate::constraint::{ConstraintEntity, ConstraintKind};
use crate::error::PlanError;
use crate::id::*;
use crate::quantity::{ROUNDING_ERROR, is_positive};
use crate::time::{Date, Duration};
use crate::timeline::EventOwner;

impl Solver<'_> {
    pub(crate) fn solve_buckets(
        &mut self,
        id: ResourceId,
        cal: &BucketCalendar,
        opplan: OperationPlanId,
        idx: usize,
    ) -> Result<(), PlanError> {
        let net = self.net;
        let st = self.top();
        let lp = self.loadplan(opplan, idx)?;
        let locked = self.plan.plan(opplan)?.is_locked();
        let per = net.load(lp.load).quantity;
        if !self.capacity_constrained() || locked || per <= 0.0 {
            self.accrue(id, opplan, idx, 0.0)?;
            self.reply(st.q_qty, st.q_date);
            return Ok(());
        }
        let (operation, qty, start, end) = {
            let o = self.plan.plan(opplan)?;
            (net.operation(o.operation), o.quantity, o.start, o.end)
        };
        let splits = self.settings.allow_splits;
        let fitting = |free: f64| -> f64 {
            if free >= lp.quantity - ROUNDING_ERROR {
                qty
            } else if splits {
                operation.size_quantity(free / per, true).min(qty)
            } else {
                0.0
            }
        };

        let current = cal.index_of(start);
        if let Some(b) = current
            && let Some(bucket) = cal.bucket(b)
        {
            let fit = fitting(self.bucket_free(id, bucket, opplan));
            if is_positive(fit) {
                if fit < qty - ROUNDING_ERROR {
                    self.plan.resize(net, self.commands, opplan, fit, true)?;
                }
                self.accrue(id, opplan, idx, 0.0)?;
                self.reply(st.q_qty, st.q_date);
                return Ok(());
            }
        }

        let mark = self.bookmark();
        let resource = net.resource(id);
        if !st.force_late
            && let Some(b) = current
        {
            let earliest = start - resource.max_early;
            let now = net.current();
            for j in (0..b).rev() {
                let Some(bucket) = cal.bucket(j) else { break };
                if bucket.end <= earliest {
                    break;
                }
                if self.leadtime_constrained() && bucket.end <= now {
                    break;
                }
                let fit = fitting(self.bucket_free(id, bucket, opplan));
                if !is_positive(fit) {
                    continue;
                }
                let at = (bucket.end - Duration::from_secs(1)).min(start);
                if self.leadtime_constrained() && at < now {
                    continue;
                }
                self.plan.move_start(net, self.commands, opplan, at)?;
                if fit < qty - ROUNDING_ERROR {
                    self.plan.resize(net, self.commands, opplan, fit, false)?;
                }
                self.accrue(id, opplan, idx, 0.0)?;
                tracing::trace!(resource = %resource.name, bucket = j, qty = fit, "pulled into earlier bucket");
                self.reply(st.q_qty, st.q_date);
                return Ok(());
            }
        }

        let first_later = current.map_or(0, |b| b + 1);
        for j in first_later..cal.len() {
            let Some(bucket) = cal.bucket(j) else { break };
            if bucket.start < start {
                continue;
            }
            let fit = fitting(self.bucket_free(id, bucket, opplan));
            if !is_positive(fit) {
                continue;
            }
            self.plan.move_start(net, self.commands, opplan, bucket.start)?;
            if fit < qty - ROUNDING_ERROR {
                self.plan.resize(net, self.commands, opplan, fit, false)?;
            }
            let new_end = self.plan.plan(opplan)?.end;
            if new_end <= st.q_date_max {
                self.accrue(id, opplan, idx, 0.0)?;
                self.reply(st.q_qty, st.q_date);
                return Ok(());
            }
            self.rollback(mark)?;
            self.log(ConstraintKind::CapacityOverload, ConstraintEntity::Resource(id), start, bucket.start, qty);
            self.reply(0.0, new_end.max(end));
            return Ok(());
        }

        self.rollback(mark)?;
        self.log(
            ConstraintKind::CapacityOverload,
            ConstraintEntity::Resource(id),
            start,
            Date::INFINITE_FUTURE,
            qty,
        );
        self.reply(0.0, Date::INFINITE_FUTURE);
        Ok(())
    }

    /// Capacity of a bucket not claimed by other operationplans.
    fn bucket_free(&self, id: ResourceId, bucket: Bucket, exclude: OperationPlanId) -> f64 {
        let used: f64 = self
            .plan
            .resource_timeline(id)
            .map(|tl| {
                tl.events_between(bucket.start, bucket.end)
                    .filter(|(k, _)| !matches!(k.owner, EventOwner::Plan(o, _) if o == exclude))
                    .map(|(_, q)| q)
                    .sum()
            })
            .unwrap_or(0.0);
        (bucket.capacity - used).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use crate::calendar::BucketCalendar;
    use crate::load::Load;
    use crate::resource::Resource;
    use crate::settings::SolverSettings;
    use crate::test_utils::*;

    /// `(bucket index, quantity)` of every `make` operationplan, sorted.
    fn bucket_usage(per_day: f64, settings: SolverSettings) -> Vec<(i64, f64)> {
        let net = capacity_network(per_day);
        let plan = solve(&net, settings);
        let mut out: Vec<(i64, f64)> = plans_of(&plan, &net, make_op(&net))
            .into_iter()
            .map(|(q, start, _)| (start.0.div_euclid(86_400), q))
            .collect();
        out.sort_by(|a, b| b.0.cmp(&a.0));
        out
    }

    #[test]
    fn enough_capacity_in_the_bucket() {
        assert_eq!(bucket_usage(200.0, constrained()), vec![(8, 100.0)]);
    }

    #[test]
    fn shortage_spreads_over_earlier_buckets() {
        assert_eq!(
            bucket_usage(40.0, constrained()),
            vec![(8, 40.0), (7, 40.0), (6, 20.0)]
        );
    }

    #[test]
    fn without_splits_the_whole_plan_moves() {
        let settings = SolverSettings {
            allow_splits: false,
            ..constrained()
        };
        // 100 never fits a 60 bucket, so nothing can be planned.
        assert!(bucket_usage(60.0, settings).is_empty());
    }

    #[test]
    fn full_early_buckets_push_later() {
        let mut b = single_step_builder(0.0);
        let mut cal = BucketCalendar::new();
        cal.add_bucket(day(0), 0.0);
        cal.add_bucket(day(9), 100.0);
        cal.add_bucket(day(10), 0.0);
        let press = b.add_resource(Resource::buckets("press", cal));
        let make = b.operation_id("make").unwrap();
        b.add_load(Load::new(make, press, 1.0));
        let net = b.build().unwrap();
        let plan = solve(&net, constrained());
        assert_eq!(plans_of(&plan, &net, make_op(&net)), vec![(100.0, day(9), day(11))]);
        let deliveries = plan.deliveries(&net, order(&net));
        assert_eq!(deliveries[0].end, day(11));
    }
}
