//! Alternate operations: pick among interchangeable suboperations by
//! priority or by cost.

use super::operation::Rate;
use super::{Answer, Solvable, Solver};
use crate::error::PlanError;
use crate::id::*;
use crate::operation::{OperationKind, SearchMode, SubOperation};
use crate::plan::NewPlan;
use crate::quantity::{ROUNDING_ERROR, approx_eq, is_positive};
use crate::time::Date;

impl Solver<'_> {
    pub(crate) fn solve_alternate(&mut self, id: OperationId) -> Result<(), PlanError> {
        let net = self.net;
        let op = net.operation(id);
        let OperationKind::Alternate { alternates } = &op.kind else {
            return self.solve_plain(id);
        };
        let st = self.top();
        let top_flow = st.cur_buffer.and_then(|b| net.producing_flow(id, b));
        self.check_flow_typing(id, st.cur_buffer, top_flow, alternates)?;
        let rate = self.composite_rate(id, st.cur_buffer)?;
        let end = self.plan_end(op, st.q_date);

        // Effective alternates first, expired ones as a fallback.
        let by_priority = |mut v: Vec<&SubOperation>| {
            v.sort_by_key(|a| (a.priority, a.operation));
            v.into_iter().map(|a| a.operation).collect::<Vec<_>>()
        };
        let effective = by_priority(alternates.iter().filter(|a| a.effective.contains(end)).collect());
        let expired = by_priority(
            alternates
                .iter()
                .filter(|a| a.effective.end <= end && a.effective.start <= end)
                .collect(),
        );
        if effective.is_empty() && expired.is_empty() {
            return Err(PlanError::MissingSuboperations(op.name.clone()));
        }

        let mut remaining = st.q_qty;
        let mut next = Date::INFINITE_FUTURE;
        let mut first: Option<OperationId> = None;
        let mut cost = 0.0;
        let mut penalty = 0.0;
        for mut pool in [effective, expired] {
            if !is_positive(remaining) {
                break;
            }
            if first.is_none() {
                first = pool.first().copied();
            }
            while is_positive(remaining) && !pool.is_empty() {
                let pick = if op.search == SearchMode::Priority {
                    0
                } else {
                    match self.cheapest(id, &pool, remaining, rate, top_flow.is_some(), &mut next)? {
                        Some(i) => i,
                        None => break,
                    }
                };
                let alt = pool.remove(pick);
                let ans = self.plan_alternate(id, alt, remaining, rate, top_flow.is_some())?;
                if is_positive(ans.qty) {
                    remaining -= ans.qty;
                    cost += ans.cost;
                    penalty += ans.penalty;
                } else {
                    next = next.min(ans.date);
                }
            }
        }

        if !self.constrained
            && is_positive(remaining)
            && let Some(alt) = first
        {
            let ans = self.plan_alternate(id, alt, remaining, rate, top_flow.is_some())?;
            remaining -= ans.qty;
            cost += ans.cost;
            penalty += ans.penalty;
        }

        self.add_cost(cost, penalty);
        let answered = st.q_qty - remaining.max(0.0);
        if is_positive(remaining) {
            self.reply(answered, next);
        } else {
            self.reply(st.q_qty, st.q_date);
        }
        Ok(())
    }

    /// Evaluate every alternate in `pool` without keeping its plan and
    /// return the index of the cheapest per unit. Ties go to the larger
    /// quantity.
    fn cheapest(
        &mut self,
        top_op: OperationId,
        pool: &[OperationId],
        qty: f64,
        rate: Rate,
        top_has_flow: bool,
        next: &mut Date,
    ) -> Result<Option<usize>, PlanError> {
        let search = self.net.operation(top_op).search;
        let mut best: Option<(f64, f64, usize)> = None;
        for (i, alt) in pool.iter().enumerate() {
            let mark = self.bookmark();
            let ans = self.silently(|s| s.plan_alternate(top_op, *alt, qty, rate, top_has_flow))?;
            self.rollback(mark)?;
            if !is_positive(ans.qty) {
                *next = (*next).min(ans.date);
                continue;
            }
            let score = search.score(ans.cost, ans.penalty) / ans.qty;
            let better = best.is_none_or(|(s, q, _)| {
                score < s - ROUNDING_ERROR || (approx_eq(score, s) && ans.qty > q + ROUNDING_ERROR)
            });
            if better {
                best = Some((score, ans.qty, i));
            }
        }
        Ok(best.map(|(_, _, i)| i))
    }

    /// Plan `qty` through one alternate under a new alternate
    /// operationplan.
    fn plan_alternate(
        &mut self,
        top_op: OperationId,
        alt: OperationId,
        qty: f64,
        rate: Rate,
        top_has_flow: bool,
    ) -> Result<Answer, PlanError> {
        let net = self.net;
        let op = net.operation(top_op);
        let st = self.top();
        let top_qty = rate.plan_qty(qty, op);
        let end = self.plan_end(op, st.q_date);
        let max_end = self.plan_end(op, st.q_date_max).max(end);

        let mark = self.bookmark();
        let demand = if st.cur_owner.is_none() { st.cur_demand } else { None };
        let top = self.plan.create(
            net,
            self.commands,
            NewPlan::ending(top_op, top_qty, end)
                .with_owner(st.cur_owner)
                .for_demand(demand),
        )?;
        let child_buffer = if top_has_flow { None } else { st.cur_buffer };
        let child_qty = if child_buffer.is_some() { qty } else { top_qty };
        let ans = self.ask(Solvable::Operation(alt), child_qty, end, true, |s| {
            s.cur_owner = Some(top);
            s.cur_buffer = child_buffer;
            s.cur_demand = None;
            s.q_date_max = max_end;
        })?;
        if !is_positive(ans.qty) {
            self.rollback(mark)?;
            return Ok(Answer::none(ans.date + op.post_time));
        }

        let planned = ans.qty;
        self.plan.refresh_span(net, self.commands, top, Some(planned))?;
        let check = self.check_operation(top, max_end)?;
        if !is_positive(check.qty) {
            self.rollback(mark)?;
            return Ok(Answer::none(check.date + op.post_time));
        }
        let material = if child_buffer.is_some() { planned } else { rate.material(planned) };
        let material = material * (check.qty / planned).min(1.0);
        Ok(Answer {
            qty: material.min(qty),
            date: ans.date + op.post_time,
            cost: ans.cost + check.cost + op.cost * check.qty,
            penalty: ans.penalty + check.penalty,
        })
    }

    /// A fixed producing flow on the alternate cannot be combined with a
    /// proportional one on a suboperation, or the other way around.
    fn check_flow_typing(
        &self,
        id: OperationId,
        buffer: Option<BufferId>,
        top_flow: Option<FlowId>,
        alternates: &[SubOperation],
    ) -> Result<(), PlanError> {
        let (Some(b), Some(tf)) = (buffer, top_flow) else {
            return Ok(());
        };
        let net = self.net;
        let fixed = net.flow(tf).kind.is_fixed();
        for alt in alternates {
            if let Some(cf) = net.producing_flow(alt.operation, b)
                && net.flow(cf).kind.is_fixed() != fixed
            {
                return Err(PlanError::MixedFlowTypes(net.operation(id).name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::Buffer;
    use crate::constraint::ConstraintKind;
    use crate::demand::Demand;
    use crate::flow::Flow;
    use crate::item::{Item, Location};
    use crate::network::NetworkBuilder;
    use crate::operation::{Operation, SearchMode, SubOperation};
    use crate::test_utils::*;

    #[test]
    fn priority_takes_first_alternate() {
        let net = alternate_network(SearchMode::Priority);
        let plan = solve(&net, constrained());
        let expensive = net.operation_id("expensive").unwrap();
        let cheap = net.operation_id("cheap").unwrap();
        assert_eq!(plans_of(&plan, &net, expensive), vec![(100.0, day(9), day(10))]);
        assert!(plans_of(&plan, &net, cheap).is_empty());
    }

    #[test]
    fn min_cost_takes_cheapest_alternate() {
        let net = alternate_network(SearchMode::MinCost);
        let plan = solve(&net, constrained());
        let expensive = net.operation_id("expensive").unwrap();
        let cheap = net.operation_id("cheap").unwrap();
        assert!(plans_of(&plan, &net, expensive).is_empty());
        assert_eq!(plans_of(&plan, &net, cheap), vec![(100.0, day(9), day(10))]);
        assert_eq!(plan.planned_quantity(&net, order(&net)), 100.0);
    }

    #[test]
    fn late_alternate_falls_through_to_next() {
        let mut b = NetworkBuilder::new(day(0));
        let widget = b.add_item(Item::new("widget"));
        let plant = b.add_location(Location::new("plant"));
        let fg = b.add_buffer(Buffer::new("widget@plant", widget, plant));
        let slow = b.add_operation(Operation::fixed_time("slow", days(20)));
        let fast = b.add_operation(Operation::fixed_time("fast", days(1)));
        b.add_flow(Flow::produce(slow, fg, 1.0));
        b.add_flow(Flow::produce(fast, fg, 1.0));
        b.add_operation(Operation::alternate(
            "make",
            vec![SubOperation::new(slow, 1), SubOperation::new(fast, 2)],
        ));
        b.add_demand(Demand::new("order", widget, plant, 100.0, day(10)));
        let net = b.build().unwrap();
        let plan = solve(&net, constrained());
        assert!(plans_of(&plan, &net, slow).is_empty());
        assert_eq!(plans_of(&plan, &net, fast), vec![(100.0, day(9), day(10))]);
    }

    #[test]
    fn mixed_flow_types_are_rejected() {
        let mut b = NetworkBuilder::new(day(0));
        let widget = b.add_item(Item::new("widget"));
        let plant = b.add_location(Location::new("plant"));
        let fg = b.add_buffer(Buffer::new("widget@plant", widget, plant));
        let sub = b.add_operation(Operation::fixed_time("sub", days(1)));
        b.add_flow(Flow::produce(sub, fg, 1.0).fixed());
        let make = b.add_operation(Operation::alternate("make", vec![SubOperation::new(sub, 1)]));
        b.add_flow(Flow::produce(make, fg, 1.0));
        b.add_demand(Demand::new("order", widget, plant, 10.0, day(10)));
        let net = b.build().unwrap();
        let plan = solve(&net, constrained());
        let d = order(&net);
        assert_eq!(plan.planned_quantity(&net, d), 0.0);
        let log = plan.constraints(&net, d).unwrap();
        assert_eq!(log.count(ConstraintKind::InvalidData), 1);
    }
}
