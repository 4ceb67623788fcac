//! Routings: steps planned back to back, last step first.

use super::{Solvable, Solver};
use crate::error::PlanError;
use crate::id::*;
use crate::operation::OperationKind;
use crate::plan::NewPlan;
use crate::quantity::{ROUNDING_ERROR, is_positive};
use crate::time::{Date, Duration};

impl Solver<'_> {
    pub(crate) fn solve_routing(&mut self, id: OperationId) -> Result<(), PlanError> {
        let net = self.net;
        let op = net.operation(id);
        let OperationKind::Routing { steps } = &op.kind else {
            return self.solve_plain(id);
        };
        let st = self.top();
        let rate = self.composite_rate(id, st.cur_buffer)?;
        let qty = op.size_quantity(rate.plan_qty(st.q_qty, op), false);
        let end = self.plan_end(op, st.q_date);
        let max_end = self.plan_end(op, st.q_date_max).max(end);
        if !is_positive(qty) {
            self.reply(0.0, Date::INFINITE_FUTURE);
            return Ok(());
        }

        let mark = self.bookmark();
        let log_mark = self.log_marker();
        let demand = if st.cur_owner.is_none() { st.cur_demand } else { None };
        let top = self.plan.create(
            net,
            self.commands,
            NewPlan::ending(id, qty, end)
                .with_owner(st.cur_owner)
                .for_demand(demand),
        )?;

        let mut step_end = end;
        let mut step_qty = qty;
        let mut delay = Duration::ZERO;
        let mut cost = 0.0;
        let mut penalty = 0.0;
        for step in steps.iter().rev() {
            let asked_end = step_end;
            let ans = self.ask(Solvable::Operation(*step), step_qty, asked_end, true, |s| {
                s.cur_owner = Some(top);
                s.cur_buffer = None;
                s.cur_demand = None;
                s.q_date_max = asked_end;
            })?;
            if !is_positive(ans.qty) {
                delay = if ans.date.is_infinite() {
                    Duration::MAX
                } else {
                    delay.max(ans.date - asked_end)
                };
                step_qty = 0.0;
                break;
            }
            cost += ans.cost;
            penalty += ans.penalty;
            if ans.qty < step_qty - ROUNDING_ERROR && !ans.date.is_infinite() && ans.date > asked_end {
                delay = delay.max(ans.date - asked_end);
            }
            step_qty = step_qty.min(ans.qty);
            let Some(child) = self.plan.plan(top)?.children.last().copied() else {
                break;
            };
            step_end = self.plan.plan(child)?.start;
        }

        if !is_positive(step_qty) {
            self.rollback(mark)?;
            let next = if delay == Duration::MAX { Date::INFINITE_FUTURE } else { st.q_date + delay };
            let next = self.later_than_asked(next, st.q_date);
            self.reply(0.0, next);
            return Ok(());
        }

        // Steps planned before a later one came up short are cut back.
        let children = self.plan.plan(top)?.children.clone();
        for child in children {
            if self.plan.plan(child)?.quantity > step_qty + ROUNDING_ERROR {
                self.plan.resize(net, self.commands, child, step_qty, true)?;
            }
        }
        self.plan.refresh_span(net, self.commands, top, Some(step_qty))?;

        let check = self.check_operation(top, max_end)?;
        let answered = rate.material(check.qty).min(st.q_qty);
        if !is_positive(answered) {
            self.rollback(mark)?;
            let next = self.later_than_asked(check.date + op.post_time, st.q_date);
            self.reply(0.0, next);
            return Ok(());
        }
        let mut next = check.date + op.post_time;
        if answered >= st.q_qty - ROUNDING_ERROR {
            self.log_pop(log_mark);
        } else if delay > Duration::ZERO {
            // The rest comes no sooner than the step that fell short.
            let step_date = st.q_date + delay;
            next = if next.is_infinite() { step_date } else { next.max(step_date) };
        }
        self.add_cost(cost + check.cost + op.cost * check.qty, penalty + check.penalty);
        self.reply(answered, next);
        Ok(())
    }

    /// A zero answer never points at or before the asked date.
    fn later_than_asked(&self, next: Date, asked: Date) -> Date {
        if next <= asked {
            asked + self.settings.lazy_delay
        } else {
            next
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::Buffer;
    use crate::command::CommandManager;
    use crate::demand::Demand;
    use crate::flow::Flow;
    use crate::item::{Item, Location};
    use crate::network::{Network, NetworkBuilder};
    use crate::id::ClusterId;
    use crate::operation::Operation;
    use crate::plan::{NewPlan, Plan, PlanStatus};
    use crate::settings::{SolverSettings, UserExits};
    use crate::solver::{Solvable, Solver};
    use crate::test_utils::*;

    /// `make` is a routing of `cut` (1 day) then `weld` (2 days); the
    /// routing itself produces the widget.
    fn routing_network(due: i64) -> Network {
        let mut b = NetworkBuilder::new(day(0));
        let widget = b.add_item(Item::new("widget"));
        let plant = b.add_location(Location::new("plant"));
        let fg = b.add_buffer(Buffer::new("widget@plant", widget, plant));
        let cut = b.add_operation(Operation::fixed_time("cut", days(1)));
        let weld = b.add_operation(Operation::fixed_time("weld", days(2)));
        let make = b.add_operation(Operation::routing("make", vec![cut, weld]));
        b.add_flow(Flow::produce(make, fg, 1.0));
        b.add_demand(Demand::new("order", widget, plant, 20.0, day(due)));
        b.build().unwrap()
    }

    #[test]
    fn steps_are_planned_back_to_back() {
        let net = routing_network(10);
        let plan = solve(&net, constrained());
        let cut = net.operation_id("cut").unwrap();
        let weld = net.operation_id("weld").unwrap();
        assert_eq!(plans_of(&plan, &net, weld), vec![(20.0, day(8), day(10))]);
        assert_eq!(plans_of(&plan, &net, cut), vec![(20.0, day(7), day(8))]);
        assert_eq!(plans_of(&plan, &net, make_op(&net)), vec![(20.0, day(7), day(10))]);
        assert_eq!(plan.planned_quantity(&net, order(&net)), 20.0);
    }

    #[test]
    fn first_step_before_today_delays_the_routing() {
        let net = routing_network(2);
        let plan = solve(&net, constrained());
        let cut = net.operation_id("cut").unwrap();
        assert_eq!(plans_of(&plan, &net, cut), vec![(20.0, day(0), day(1))]);
        let deliveries = plan.deliveries(&net, order(&net));
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].end, day(3));
    }

    #[test]
    fn short_step_delays_the_rest_of_the_routing() {
        let mut b = NetworkBuilder::new(day(0));
        let widget = b.add_item(Item::new("widget"));
        let steel = b.add_item(Item::new("steel"));
        let plant = b.add_location(Location::new("plant"));
        let fg = b.add_buffer(Buffer::new("widget@plant", widget, plant));
        let rm = b.add_buffer(Buffer::new("steel@plant", steel, plant).with_onhand(12.0));
        let cut = b.add_operation(Operation::fixed_time("cut", days(1)));
        let weld = b.add_operation(Operation::fixed_time("weld", days(2)));
        b.add_flow(Flow::consume(weld, rm, 1.0));
        let make = b.add_operation(Operation::routing("make", vec![cut, weld]));
        b.add_flow(Flow::produce(make, fg, 1.0));
        let buy = b.add_operation(Operation::fixed_time("buy steel", days(1)));
        b.add_flow(Flow::produce(buy, rm, 1.0));
        b.add_demand(Demand::new("order", widget, plant, 20.0, day(10)));
        let net = b.build().unwrap();

        let mut plan = Plan::new(&net);
        plan.add_operationplan(
            &net,
            NewPlan::ending(buy, 8.0, day(9)).with_status(PlanStatus::Confirmed),
        )
        .unwrap();
        let settings = SolverSettings {
            propagate: false,
            ..constrained()
        };
        let mut commands = CommandManager::new();
        let exits = UserExits::default();
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        let mut solver = Solver::new(&net, cp, &mut commands, &settings, &exits);
        let ans = solver
            .ask(Solvable::Operation(make), 20.0, day(10), false, |s| {
                s.cur_buffer = Some(fg);
            })
            .unwrap();
        // weld starts day 8 with 12 steel; the other 8 arrive a day later
        assert_eq!(ans.qty, 12.0);
        assert_eq!(ans.date, day(11));
        commands.commit(&mut plan).unwrap();
        assert_eq!(plans_of(&plan, &net, weld), vec![(12.0, day(8), day(10))]);
        assert_eq!(plans_of(&plan, &net, cut), vec![(12.0, day(7), day(8))]);
    }
}
