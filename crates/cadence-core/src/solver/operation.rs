//! Plain operations, item suppliers and the dispatch over operation kinds.

use super::Solver;
use crate::error::PlanError;
use crate::id::*;
use crate::operation::{Operation, OperationKind};
use crate::plan::NewPlan;
use crate::quantity::{ROUNDING_ERROR, is_positive};
use crate::time::Date;

/// Conversion between the material a buffer asks for and the quantity of
/// the operationplan producing it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Rate {
    per: f64,
    fixed: f64,
}

impl Rate {
    pub(crate) const UNIT: Rate = Rate { per: 1.0, fixed: 0.0 };

    /// Operationplan quantity needed for `material`. A fixed flow produces
    /// its quantity once, whatever the size, so a single run is enough.
    pub(crate) fn plan_qty(self, material: f64, op: &Operation) -> f64 {
        if self.fixed > 0.0 {
            op.size_quantity(1.0, false)
        } else if self.per > 0.0 {
            material / self.per
        } else {
            material
        }
    }

    pub(crate) fn material(self, plan_qty: f64) -> f64 {
        if !is_positive(plan_qty) {
            0.0
        } else if self.fixed > 0.0 {
            self.fixed
        } else {
            plan_qty * self.per
        }
    }
}

impl Solver<'_> {
    pub(crate) fn solve_operation(&mut self, id: OperationId) -> Result<(), PlanError> {
        let net = self.net;
        if let Some(exit) = &self.exits.operation {
            exit(net, id, self.constrained);
        }
        match &net.operation(id).kind {
            OperationKind::Routing { .. } => self.solve_routing(id),
            OperationKind::Alternate { .. } => self.solve_alternate(id),
            OperationKind::Split { .. } => self.solve_split(id),
            OperationKind::ItemSupplier => self.solve_item_supplier(id),
            OperationKind::FixedTime | OperationKind::TimePer { .. } => self.solve_plain(id),
        }
    }

    /// Rate of the flow through which `op` produces into `buffer`. Asks
    /// without a buffer are in operationplan units.
    pub(crate) fn rate_for(&self, op: OperationId, buffer: Option<BufferId>) -> Result<Rate, PlanError> {
        let Some(b) = buffer else {
            return Ok(Rate::UNIT);
        };
        let net = self.net;
        match net.producing_flow(op, b) {
            Some(f) => {
                let flow = net.flow(f);
                Ok(if flow.kind.is_fixed() {
                    Rate {
                        per: 0.0,
                        fixed: flow.quantity,
                    }
                } else {
                    Rate {
                        per: flow.quantity,
                        fixed: 0.0,
                    }
                })
            }
            None => Err(PlanError::MissingProducingFlow {
                operation: net.operation(op).name.clone(),
                buffer: net.buffer(b).name.clone(),
            }),
        }
    }

    /// Rate of a composite operation. Composites producing through a
    /// suboperation work in material units and hand the buffer down.
    pub(crate) fn composite_rate(&self, op: OperationId, buffer: Option<BufferId>) -> Result<Rate, PlanError> {
        let Some(b) = buffer else {
            return Ok(Rate::UNIT);
        };
        let net = self.net;
        if net.producing_flow(op, b).is_some() {
            return self.rate_for(op, buffer);
        }
        if let OperationKind::Routing { steps } = &net.operation(op).kind {
            for step in steps.iter().rev() {
                if net.producing_flow(*step, b).is_some() {
                    return self.rate_for(*step, buffer);
                }
            }
        }
        if net.produces_into(op, b) {
            Ok(Rate::UNIT)
        } else {
            self.rate_for(op, buffer)
        }
    }

    /// End date of an operationplan whose output is needed at `date`.
    pub(crate) fn plan_end(&self, op: &Operation, date: Date) -> Date {
        let end = date - op.post_time;
        match self.net.alignment() {
            Some(step) => end.align_down(step),
            None => end,
        }
    }

    pub(crate) fn solve_plain(&mut self, id: OperationId) -> Result<(), PlanError> {
        let net = self.net;
        let op = net.operation(id);
        let st = self.top();
        let rate = self.rate_for(id, st.cur_buffer)?;
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
        let plan = self.plan.create(
            net,
            self.commands,
            NewPlan::ending(id, qty, end)
                .with_owner(st.cur_owner)
                .for_demand(demand),
        )?;
        let check = self.check_operation(plan, max_end)?;
        let answered = rate.material(check.qty).min(st.q_qty);
        if !is_positive(answered) {
            self.rollback(mark)?;
            self.reply(0.0, check.date + op.post_time);
            return Ok(());
        }
        if answered >= st.q_qty - ROUNDING_ERROR {
            self.log_pop(log_mark);
        }
        self.add_cost(check.cost + op.cost * check.qty, check.penalty);
        self.reply(answered, check.date + op.post_time);
        tracing::trace!(operation = %op.name, qty = check.qty, end = %end, "operationplan");
        Ok(())
    }

    /// Item suppliers refuse to buy a pooled item while the network as a
    /// whole holds more than its safety stock.
    fn solve_item_supplier(&mut self, id: OperationId) -> Result<(), PlanError> {
        let net = self.net;
        let st = self.top();
        if let Some(b) = st.cur_buffer {
            let item = net.buffer(b).item;
            if net.item(item).global_purchase {
                let cluster = self.plan.id();
                let (onhand, minimum) = net
                    .buffers_of_item(item)
                    .into_iter()
                    .filter(|x| net.buffer(*x).cluster() == cluster)
                    .fold((0.0, 0.0), |(o, m), x| {
                        (
                            o + self.plan.onhand(x, st.q_date),
                            m + net.buffer(x).minimum.value_at(st.q_date),
                        )
                    });
                if onhand > minimum + ROUNDING_ERROR {
                    tracing::debug!(
                        operation = %net.operation(id).name,
                        onhand,
                        minimum,
                        "pooled stock suffices, no purchase"
                    );
                    self.reply(0.0, Date::INFINITE_FUTURE);
                    return Ok(());
                }
            }
        }
        self.solve_plain(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandManager;
    use crate::plan::Plan;
    use crate::settings::{SolverSettings, UserExits};
    use crate::solver::{Answer, Solvable};
    use crate::test_utils::*;

    fn ask_make(settings: &SolverSettings, net: &crate::network::Network, qty: f64, at: Date) -> (Plan, Answer) {
        let mut plan = Plan::new(net);
        let mut commands = CommandManager::new();
        let exits = UserExits::default();
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        let mut solver = Solver::new(net, cp, &mut commands, settings, &exits);
        let b = widget_buffer(net);
        let ans = solver
            .ask(Solvable::Operation(make_op(net)), qty, at, false, |s| {
                s.cur_buffer = Some(b);
            })
            .unwrap();
        commands.commit(&mut plan).unwrap();
        (plan, ans)
    }

    #[test]
    fn plain_operation_ends_at_requested_date() {
        let net = single_step_network(0.0);
        let (plan, ans) = ask_make(&constrained(), &net, 30.0, day(10));
        assert_eq!(ans.qty, 30.0);
        assert_eq!(plans_of(&plan, &net, make_op(&net)), vec![(30.0, day(8), day(10))]);
    }

    #[test]
    fn lead_time_pushes_answer_later() {
        let net = single_step_network(0.0);
        let (plan, ans) = ask_make(&constrained(), &net, 30.0, day(1));
        assert_eq!(ans.qty, 0.0);
        assert_eq!(ans.date, day(2));
        assert!(plans_of(&plan, &net, make_op(&net)).is_empty());
    }

    #[test]
    fn unconstrained_ignores_lead_time() {
        let net = single_step_network(0.0);
        let (plan, ans) = ask_make(&unconstrained(), &net, 30.0, day(1));
        assert_eq!(ans.qty, 30.0);
        assert_eq!(plans_of(&plan, &net, make_op(&net)), vec![(30.0, day(-1), day(1))]);
    }

    #[test]
    fn rate_follows_flow_quantity() {
        let net = two_level_network();
        let mut plan = Plan::new(&net);
        let mut commands = CommandManager::new();
        let settings = constrained();
        let exits = UserExits::default();
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        let solver = Solver::new(&net, cp, &mut commands, &settings, &exits);
        let make = make_op(&net);
        let steel = net.buffer_id("steel@plant").unwrap();
        assert!(matches!(
            solver.rate_for(make, Some(steel)),
            Err(PlanError::MissingProducingFlow { .. })
        ));
        let rate = solver.rate_for(make, Some(widget_buffer(&net))).unwrap();
        assert_eq!(rate.material(4.0), 4.0);
    }
}
