//! Split operations: the quantity is divided over all effective parts in
//! proportion to their weights.

use super::{Solvable, Solver};
use crate::error::PlanError;
use crate::id::*;
use crate::operation::{OperationKind, SubOperation};
use crate::plan::NewPlan;
use crate::quantity::{ROUNDING_ERROR, is_positive};
use crate::time::Date;

/// Rescaling rounds before a split that keeps coming up short gives up.
const MAX_SPLIT_ROUNDS: usize = 10;

impl Solver<'_> {
    pub(crate) fn solve_split(&mut self, id: OperationId) -> Result<(), PlanError> {
        let net = self.net;
        let op = net.operation(id);
        let OperationKind::Split { parts } = &op.kind else {
            return self.solve_plain(id);
        };
        let st = self.top();
        let rate = self.composite_rate(id, st.cur_buffer)?;
        let top_has_flow = st.cur_buffer.is_some_and(|b| net.producing_flow(id, b).is_some());
        let child_buffer = if top_has_flow { None } else { st.cur_buffer };
        let end = self.plan_end(op, st.q_date);
        let max_end = self.plan_end(op, st.q_date_max).max(end);

        let active: Vec<&SubOperation> = parts
            .iter()
            .filter(|p| p.priority > 0 && p.effective.contains(end))
            .collect();
        let total_weight: f64 = active.iter().map(|p| f64::from(p.priority)).sum();
        if active.is_empty() || total_weight <= 0.0 {
            return Err(PlanError::MissingSuboperations(op.name.clone()));
        }

        let mark = self.bookmark();
        let log_mark = self.log_marker();
        let demand = if st.cur_owner.is_none() { st.cur_demand } else { None };
        let mut total = st.q_qty;
        let mut next = Date::INFINITE_FUTURE;
        for _ in 0..MAX_SPLIT_ROUNDS {
            self.rollback(mark)?;
            let top_qty = rate.plan_qty(total, op);
            let top = self.plan.create(
                net,
                self.commands,
                NewPlan::ending(id, top_qty, end)
                    .with_owner(st.cur_owner)
                    .for_demand(demand),
            )?;

            let mut remaining = if child_buffer.is_some() { total } else { top_qty };
            let mut remaining_weight = total_weight;
            let mut ratio: f64 = 1.0;
            let mut cost = 0.0;
            let mut penalty = 0.0;
            for part in active.iter().rev() {
                let weight = f64::from(part.priority);
                let share = remaining * weight / remaining_weight;
                remaining -= share;
                remaining_weight -= weight;
                if !is_positive(share) {
                    continue;
                }
                let ans = self.ask(Solvable::Operation(part.operation), share, end, true, |s| {
                    s.cur_owner = Some(top);
                    s.cur_buffer = child_buffer;
                    s.cur_demand = None;
                    s.q_date_max = max_end;
                })?;
                cost += ans.cost;
                penalty += ans.penalty;
                if ans.qty < share - ROUNDING_ERROR {
                    ratio = ratio.min(ans.qty / share);
                    next = next.min(ans.date);
                }
            }

            if ratio < 1.0 - ROUNDING_ERROR {
                total *= ratio;
                if !is_positive(total) {
                    break;
                }
                continue;
            }

            self.plan.refresh_span(net, self.commands, top, Some(top_qty))?;
            let check = self.check_operation(top, max_end)?;
            let answered = rate.material(check.qty).min(st.q_qty);
            if !is_positive(answered) {
                next = next.min(check.date);
                break;
            }
            if answered >= st.q_qty - ROUNDING_ERROR {
                self.log_pop(log_mark);
            }
            self.add_cost(cost + check.cost + op.cost * check.qty, penalty + check.penalty);
            self.reply(answered, next + op.post_time);
            return Ok(());
        }

        self.rollback(mark)?;
        self.reply(0.0, next + op.post_time);
        Ok(())
    }
}
