//! Purchasing buffers: a reorder-point policy replans the proposed
//! purchase orders of the buffer on every ask.

use super::Solver;
use super::buffer::{SAFETY_STOCK_ASK, net_profile};
use crate::buffer::{BufferKind, ProcurePolicy};
use crate::constraint::{ConstraintEntity, ConstraintKind};
use crate::error::PlanError;
use crate::id::*;
use crate::plan::NewPlan;
use crate::quantity::{ROUNDING_ERROR, is_positive};
use crate::time::Date;

/// Purchase orders proposed per replan.
const MAX_ORDERS: usize = 1_000;

impl Solver<'_> {
    pub(crate) fn solve_procure(&mut self, id: BufferId) -> Result<(), PlanError> {
        let net = self.net;
        let st = self.top();
        self.replan_procurement(id)?;
        if st.q_qty == SAFETY_STOCK_ASK {
            self.reply(0.0, Date::INFINITE_FUTURE);
            return Ok(());
        }
        let unit_cost = net.item(net.buffer(id).item).cost;
        let limited = self.material_constrained() || self.leadtime_constrained() || self.fence_constrained();
        if !limited {
            self.add_cost(unit_cost * st.q_qty, 0.0);
            self.reply(st.q_qty, st.q_date);
            return Ok(());
        }

        let answered = (st.q_qty - self.stockout_from(id, st.q_date)).clamp(0.0, st.q_qty);
        self.add_cost(unit_cost * answered, 0.0);
        if answered >= st.q_qty - ROUNDING_ERROR {
            self.reply(st.q_qty, st.q_date);
            return Ok(());
        }
        let earliest = self.earliest_arrival(id);
        let next = if earliest > st.q_date {
            earliest
        } else {
            self.next_supply_date(id, st.q_date)
        };
        self.log(
            ConstraintKind::MaterialShortage,
            ConstraintEntity::Buffer(id),
            st.q_date,
            earliest.max(st.q_date),
            st.q_qty - answered,
        );
        self.reply(answered, next);
        Ok(())
    }

    /// Replan purchasing on every procurement buffer of the list, outside of
    /// any demand.
    pub(crate) fn replan_purchases(&mut self, buffers: &[BufferId]) -> Result<(), PlanError> {
        for b in buffers {
            if matches!(self.net.buffer(*b).kind, BufferKind::Procure(_)) {
                self.replan_procurement(*b)?;
            }
        }
        Ok(())
    }

    /// Delete the proposed purchase orders of a buffer and propose new ones
    /// wherever inventory drops below the minimum: each order brings the
    /// inventory back up to the maximum, respecting lead time, fence, lot
    /// sizes and the spacing between orders.
    pub(crate) fn replan_procurement(&mut self, id: BufferId) -> Result<(), PlanError> {
        let net = self.net;
        let buffer = net.buffer(id);
        let BufferKind::Procure(policy) = &buffer.kind else {
            return Ok(());
        };
        let Some(op) = buffer.producing else {
            return Ok(());
        };
        let operation = net.operation(op);

        let mut last: Option<Date> = None;
        for po in self.plan.operationplans_of(op) {
            let Some(o) = self.plan.get(po) else { continue };
            if o.owner.is_some() {
                continue;
            }
            if o.is_locked() {
                last = last.max(Some(o.end));
            } else {
                self.plan.delete(self.commands, po)?;
            }
        }

        let earliest = self.earliest_arrival(id);
        let mut from = net.current();
        let mut created = 0;
        while created < MAX_ORDERS {
            let Some((date, net_onhand)) = net_profile(net, self.plan, id, from)
                .into_iter()
                .find(|(_, v)| *v < -ROUNDING_ERROR)
            else {
                break;
            };
            let arrival = order_date(policy, date, earliest, last);
            let onhand = net_onhand + buffer.minimum.value_at(date);
            let target = buffer.maximum.value_at(date).max(buffer.minimum.value_at(date));
            let qty = operation.size_quantity((target - onhand).max(-net_onhand), false);
            if !is_positive(qty) {
                break;
            }
            self.plan.create(net, self.commands, NewPlan::ending(op, qty, arrival))?;
            tracing::trace!(buffer = %buffer.name, qty, date = %arrival, "purchase order");
            created += 1;
            last = Some(arrival);
            if arrival > date {
                from = arrival;
            }
        }
        Ok(())
    }

    /// Earliest date a purchase order released now can be received.
    fn earliest_arrival(&self, id: BufferId) -> Date {
        let net = self.net;
        let current = net.current();
        let BufferKind::Procure(policy) = &net.buffer(id).kind else {
            return current;
        };
        let mut earliest = current;
        if self.leadtime_constrained() || !self.constrained {
            earliest = current + policy.leadtime;
        }
        if self.fence_constrained() {
            earliest = earliest.max(current + policy.fence + policy.leadtime);
        }
        earliest
    }
}

/// Receipt date of a purchase order covering a shortage on `shortage`.
fn order_date(policy: &ProcurePolicy, shortage: Date, earliest: Date, last: Option<Date>) -> Date {
    let mut at = shortage.max(earliest);
    if let Some(prev) = last {
        at = at.max(prev + policy.min_interval);
        at = at.min(prev + policy.max_interval).max(earliest);
    }
    at
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    fn purchases(plan: &crate::plan::Plan, net: &crate::network::Network) -> Vec<(f64, Date, Date)> {
        let op = net.operation_id("Procure widget@plant").unwrap();
        plans_of(plan, net, op)
    }

    #[test]
    fn order_date_respects_spacing() {
        let policy = ProcurePolicy {
            min_interval: days(3),
            max_interval: days(10),
            ..ProcurePolicy::default()
        };
        assert_eq!(order_date(&policy, day(5), day(2), None), day(5));
        assert_eq!(order_date(&policy, day(1), day(2), None), day(2));
        assert_eq!(order_date(&policy, day(5), day(2), Some(day(4))), day(7));
        assert_eq!(order_date(&policy, day(30), day(2), Some(day(4))), day(14));
    }

    #[test]
    fn shortage_gets_a_purchase_order() {
        let net = procure_network(0.0, 0.0, 0.0);
        let plan = solve(&net, constrained());
        assert_eq!(purchases(&plan, &net), vec![(30.0, day(8), day(10))]);
        assert_eq!(plan.planned_quantity(&net, order(&net)), 30.0);
    }

    #[test]
    fn orders_refill_to_maximum() {
        let net = procure_network(10.0, 20.0, 50.0);
        let plan = solve(&net, constrained());
        assert_eq!(purchases(&plan, &net), vec![(40.0, day(0), day(2))]);
        let widget = widget_buffer(&net);
        assert_eq!(plan.onhand(&net, widget, day(5)), 50.0);
        assert_eq!(plan.onhand(&net, widget, day(10)), 20.0);
        assert_eq!(plan.planned_quantity(&net, order(&net)), 30.0);
    }

    #[test]
    fn lead_time_delays_the_order() {
        let mut b = crate::network::NetworkBuilder::new(day(0));
        let widget = b.add_item(crate::item::Item::new("widget"));
        let plant = b.add_location(crate::item::Location::new("plant"));
        b.add_buffer(
            crate::buffer::Buffer::new("widget@plant", widget, plant).procure(ProcurePolicy {
                leadtime: days(5),
                ..ProcurePolicy::default()
            }),
        );
        b.add_demand(crate::demand::Demand::new("order", widget, plant, 30.0, day(2)));
        let net = b.build().unwrap();
        let plan = solve(&net, constrained());
        let deliveries = plan.deliveries(&net, order(&net));
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].end, day(5));
        assert_eq!(purchases(&plan, &net), vec![(30.0, day(0), day(5))]);
        let log = plan.constraints(&net, order(&net)).unwrap();
        assert!(log.count(ConstraintKind::MaterialShortage) >= 1);
    }

    #[test]
    fn unconstrained_ignores_lead_time_checks() {
        let net = procure_network(0.0, 0.0, 0.0);
        let plan = solve(&net, unconstrained());
        assert_eq!(plan.planned_quantity(&net, order(&net)), 30.0);
        assert_eq!(purchases(&plan, &net).len(), 1);
    }
}
