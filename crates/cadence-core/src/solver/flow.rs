//! Consuming flows: forward the ask to the consumed buffer, trying the
//! alternates of a flow group in priority order.

use super::{Solvable, Solver};
use crate::error::PlanError;
use crate::id::*;
use crate::quantity::{ROUNDING_ERROR, is_positive};
use crate::time::Date;

impl Solver<'_> {
    pub(crate) fn solve_flow(&mut self, id: FlowId) -> Result<(), PlanError> {
        let net = self.net;
        let st = self.top();
        if let Some(exit) = &self.exits.flow
            && !exit(net, id, self.constrained)
        {
            self.reply(st.q_qty, st.q_date);
            return Ok(());
        }
        let flow = net.flow(id);
        if flow.group.is_some()
            && let (Some(opplan), Some(idx)) = (st.q_operationplan, st.q_flowplan)
        {
            return self.solve_flow_alternates(id, opplan, idx);
        }

        let ans = self.ask(Solvable::Buffer(flow.buffer), st.q_qty, st.q_date, false, |s| {
            s.q_operationplan = st.q_operationplan;
            s.q_flowplan = st.q_flowplan;
        })?;
        self.add_cost(ans.cost, ans.penalty);
        let next = if flow.effective.end > st.q_date {
            ans.date.min(flow.effective.end)
        } else {
            ans.date
        };
        self.reply(ans.qty, next);
        Ok(())
    }

    fn solve_flow_alternates(
        &mut self,
        id: FlowId,
        opplan: OperationPlanId,
        idx: usize,
    ) -> Result<(), PlanError> {
        let net = self.net;
        let st = self.top();
        let flow = net.flow(id);
        let mut alternates: Vec<FlowId> = net
            .operation(flow.operation)
            .flows()
            .iter()
            .copied()
            .filter(|f| {
                let alt = net.flow(*f);
                alt.group == flow.group && !alt.is_producer() && alt.effective.contains(st.q_date)
            })
            .collect();
        alternates.sort_by_key(|f| (net.flow(*f).priority, *f));
        if alternates.is_empty() {
            alternates.push(id);
        }

        let mut next = Date::INFINITE_FUTURE;
        for alt in &alternates {
            let mark = self.bookmark();
            self.plan.rebind_flow(net, self.commands, opplan, idx, *alt)?;
            let (qty, date) = self.flowplan_need(opplan, idx)?;
            let ans = self.ask(Solvable::Buffer(net.flow(*alt).buffer), qty, date, false, |s| {
                s.q_operationplan = Some(opplan);
                s.q_flowplan = Some(idx);
            })?;
            if is_positive(ans.qty) {
                self.add_cost(ans.cost, ans.penalty);
                let ratio = (ans.qty / qty).min(1.0);
                if ratio < 1.0 - ROUNDING_ERROR && !net.flow(*alt).kind.is_fixed() {
                    self.shrink_consumer(opplan, ratio)?;
                }
                self.reply(st.q_qty * ratio, ans.date);
                return Ok(());
            }
            next = next.min(ans.date);
            self.rollback(mark)?;
        }

        if !self.constrained {
            let first = alternates[0];
            self.plan.rebind_flow(net, self.commands, opplan, idx, first)?;
            let (qty, date) = self.flowplan_need(opplan, idx)?;
            let ans = self.ask(Solvable::Buffer(net.flow(first).buffer), qty, date, false, |s| {
                s.q_operationplan = Some(opplan);
                s.q_flowplan = Some(idx);
            })?;
            self.add_cost(ans.cost, ans.penalty);
            self.reply(st.q_qty, st.q_date);
            return Ok(());
        }
        self.reply(0.0, next);
        Ok(())
    }

    /// Cut the consuming operationplan down to the share of its material
    /// an alternate could supply.
    fn shrink_consumer(&mut self, opplan: OperationPlanId, ratio: f64) -> Result<(), PlanError> {
        if !self.settings.allow_splits {
            return Ok(());
        }
        let net = self.net;
        let (qty, operation) = {
            let o = self.plan.plan(opplan)?;
            (o.quantity, o.operation)
        };
        let smaller = net.operation(operation).size_quantity(qty * ratio, true);
        if is_positive(smaller) && smaller < qty - ROUNDING_ERROR {
            self.plan.resize(net, self.commands, opplan, smaller, true)?;
        }
        Ok(())
    }

    /// Material a consuming flowplan needs and when.
    fn flowplan_need(&self, opplan: OperationPlanId, idx: usize) -> Result<(f64, Date), PlanError> {
        let o = self.plan.plan(opplan)?;
        Ok(o.flowplans
            .get(idx)
            .map_or((0.0, o.start), |fp| (-fp.quantity, fp.date)))
    }
}
