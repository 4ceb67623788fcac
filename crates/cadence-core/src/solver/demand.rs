//! Demands: the outer retry loop of the solver.
//!
//! A demand asks its delivery operation for the open quantity at the due
//! date. Short answers are retried later, one round at a time, until the
//! demand is satisfied, the next answer date passes the deadline or the
//! round limit is reached. Each accepted round is cleaned of excess supply
//! and committed on its own.

use super::cleanup::Cleanup;
use super::{Answer, Solvable, Solver};
use crate::command::Bookmark;
use crate::constraint::ConstraintEntity;
use crate::demand::DemandStatus;
use crate::error::PlanError;
use crate::id::*;
use crate::quantity::{ROUNDING_ERROR, is_positive};
use crate::settings::PlanType;
use crate::time::Date;

/// Rounds per demand when the settings leave them unbounded.
const MAX_ROUNDS: u32 = 10_000;
/// Trial asks of the quantity search.
const MAX_SEARCH_STEPS: usize = 64;
/// Extra asks of the coordination pass.
const MAX_COORDINATION: usize = 10;

/// What planning a demand achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DemandOutcome {
    /// Closed, or nothing to plan.
    Skipped,
    Planned,
    /// Planned partially or not at all.
    Short,
    /// Aborted by a data error, recorded in the constraint log.
    Failed,
}

impl Solver<'_> {
    /// Plan a demand, recording any error in its constraint log instead of
    /// returning it. Commands of the failing round are rolled back.
    pub fn plan_demand(&mut self, id: DemandId) -> Result<DemandOutcome, PlanError> {
        if self.settings.autocommit {
            self.commands.commit(self.plan)?;
        }
        let depth = self.stack.depth();
        let mark = self.bookmark();
        let saved = (self.constrained, self.log_constraints, self.planning_demand);
        match self.plan_demand_strict(id) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.stack.unwind(depth);
                (self.constrained, self.log_constraints, self.planning_demand) = saved;
                self.rollback(mark)?;
                let Some(d) = self.net.get_demand(id) else {
                    return Err(e);
                };
                self.plan
                    .constraints_mut(id)
                    .push_invalid(ConstraintEntity::Demand(id), d.due, e.to_string());
                tracing::warn!(event = "demand_failed", demand = %d.name, error = %e, "demand skipped");
                Ok(DemandOutcome::Failed)
            }
        }
    }

    /// Plan a demand and hand any error back to the caller.
    pub fn plan_demand_strict(&mut self, id: DemandId) -> Result<DemandOutcome, PlanError> {
        let Some(d) = self.net.get_demand(id) else {
            return Err(PlanError::UnknownDemand(id));
        };
        if d.status == DemandStatus::Closed || !is_positive(d.quantity) {
            return Ok(DemandOutcome::Skipped);
        }
        self.ask(Solvable::Demand(id), d.quantity, d.due, false, |s| {
            s.cur_demand = Some(id);
        })?;
        let planned = self.plan.planned_quantity(id);
        let outcome = if planned >= d.quantity - ROUNDING_ERROR {
            DemandOutcome::Planned
        } else {
            DemandOutcome::Short
        };
        tracing::debug!(
            event = "demand_planned",
            demand = %d.name,
            quantity = d.quantity,
            planned,
            ?outcome,
        );
        Ok(outcome)
    }

    pub(crate) fn solve_demand(&mut self, id: DemandId) -> Result<(), PlanError> {
        let net = self.net;
        let d = net.demand(id);
        if let Some(exit) = &self.exits.demand {
            exit(net, id, self.constrained);
        }
        if d.status == DemandStatus::Closed {
            self.reply(0.0, Date::INFINITE_FUTURE);
            return Ok(());
        }
        let mut next = Date::INFINITE_FUTURE;
        if is_positive(d.quantity) {
            let saved = (self.constrained, self.log_constraints, self.planning_demand);
            self.planning_demand = Some(id);
            let result = self.plan_passes(id);
            (self.constrained, self.log_constraints, self.planning_demand) = saved;
            next = result?;
        }
        let planned = self.plan.planned_quantity(id);
        if planned >= d.quantity - ROUNDING_ERROR {
            self.reply(planned, d.due);
        } else {
            // A short answer never points back at the due date.
            let retry = if next <= d.due {
                d.due + self.settings.lazy_delay
            } else {
                next
            };
            self.reply(planned, retry);
        }
        Ok(())
    }

    /// Plan the demand in the passes of the plan type. Returns the date at
    /// which the last pass would have asked again.
    fn plan_passes(&mut self, id: DemandId) -> Result<Date, PlanError> {
        let net = self.net;
        let d = net.demand(id);
        self.plan.constraints_mut(id).clear();
        if self.settings.erase_previous_first {
            Cleanup::new(net, self.plan, self.commands).solve_demand(id)?;
        }
        let Some(delivery) = d.operation else {
            return Err(PlanError::MissingDeliveryOperation(d.name.clone()));
        };
        let constrained = self.settings.is_constrained();
        match self.settings.plan_type {
            PlanType::Constrained => self.plan_pass(id, delivery, d.deadline(), constrained, true),
            PlanType::UnconstrainedSearch => {
                if constrained {
                    self.plan_pass(id, delivery, d.due, true, false)?;
                }
                self.plan_pass(id, delivery, d.deadline(), false, false)
            }
            PlanType::Unconstrained => self.plan_pass(id, delivery, d.due, false, false),
        }
    }

    fn plan_pass(
        &mut self,
        id: DemandId,
        delivery: OperationId,
        deadline: Date,
        constrained: bool,
        logging: bool,
    ) -> Result<Date, PlanError> {
        self.constrained = constrained;
        self.set_logging(constrained && logging);
        let mut next = self.plan_at(id, delivery, deadline)?;

        let net = self.net;
        let d = net.demand(id);
        if !constrained || !net.item(d.item).global_purchase {
            return Ok(next);
        }
        for buffer in self.fallback_buffers(id) {
            if !is_positive(d.quantity - self.plan.planned_quantity(id)) {
                break;
            }
            if let Some(op) = net.delivery_operation(buffer)
                && op != delivery
            {
                tracing::debug!(demand = %d.name, buffer = %net.buffer(buffer).name, "trying other location");
                next = next.min(self.plan_at(id, op, deadline)?);
            }
        }
        Ok(next)
    }

    /// Other buffers of a pooled item in the cluster, most excess first.
    fn fallback_buffers(&self, id: DemandId) -> Vec<BufferId> {
        let net = self.net;
        let d = net.demand(id);
        let cluster = self.plan.id();
        let mut ranked: Vec<(f64, BufferId)> = net
            .buffers_of_item(d.item)
            .into_iter()
            .filter(|b| {
                let buffer = net.buffer(*b);
                buffer.cluster() == cluster && buffer.location != d.location
            })
            .map(|b| {
                let excess = self.plan.onhand(b, d.due) - net.buffer(b).minimum.value_at(d.due);
                (excess, b)
            })
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        ranked.into_iter().map(|(_, b)| b).collect()
    }

    /// The retry loop for one delivery operation. Returns the date of the
    /// round that would have come next.
    fn plan_at(&mut self, id: DemandId, delivery: OperationId, deadline: Date) -> Result<Date, PlanError> {
        let net = self.net;
        let d = net.demand(id);
        let settings = self.settings;
        let mut date = d.due - settings.administrative_leadtime;
        if date == Date::INFINITE_FUTURE || date == Date::INFINITE_PAST {
            return Ok(Date::INFINITE_FUTURE);
        }
        let limit = if settings.iteration_max == 0 {
            MAX_ROUNDS
        } else {
            settings.iteration_max
        };

        // Largest rejected answer, replanned when nothing better came along.
        let mut best: Option<(f64, Date)> = None;
        let mut rounds = 0;
        loop {
            let remaining = d.quantity - self.plan.planned_quantity(id);
            if !is_positive(remaining) || date > deadline || rounds >= limit {
                break;
            }
            rounds += 1;
            let floor = self.smallest_answer(id, remaining);
            // A shipment is never smaller than the minimum, even at the tail.
            let asked = remaining.max(d.min_shipment);

            let mark = self.bookmark();
            let mut ans = self.ask_delivery(id, delivery, asked, date)?;
            if !is_positive(ans.qty) && settings.allow_splits && d.min_shipment < remaining - ROUNDING_ERROR {
                self.rollback(mark)?;
                if let Some(q) = self.search_quantity(id, delivery, floor, remaining, date)? {
                    let found = self.ask_delivery(id, delivery, q, date)?;
                    ans = Answer { date: ans.date, ..found };
                }
            }

            let left = remaining - ans.qty;
            let accepted = ans.qty >= floor - ROUNDING_ERROR
                && (!is_positive(left) || left >= d.min_shipment - ROUNDING_ERROR);
            if accepted {
                if is_positive(left) {
                    self.coordinate(id, delivery, date)?;
                }
                self.finish_round(mark)?;
                best = None;
                tracing::trace!(demand = %d.name, qty = ans.qty, date = %date, "round accepted");
            } else {
                self.rollback(mark)?;
                if ans.qty >= floor - ROUNDING_ERROR && best.is_none_or(|(q, _)| ans.qty > q + ROUNDING_ERROR) {
                    best = Some((ans.qty, date));
                }
            }

            if ans.date == Date::INFINITE_FUTURE {
                date = Date::INFINITE_FUTURE;
                break;
            }
            date = if ans.date <= date {
                date + settings.lazy_delay
            } else {
                ans.date.max(date + settings.minimum_delay)
            };
        }

        if let Some((qty, at)) = best {
            let remaining = d.quantity - self.plan.planned_quantity(id);
            let mark = self.bookmark();
            let qty = qty.min(remaining);
            let ans = self.ask_delivery(id, delivery, qty, at)?;
            if ans.qty >= self.smallest_answer(id, qty) - ROUNDING_ERROR {
                self.finish_round(mark)?;
                tracing::trace!(demand = %d.name, qty = ans.qty, date = %at, "best answer replanned");
            } else {
                self.rollback(mark)?;
            }
        }
        Ok(date)
    }

    /// Smallest answer worth a delivery: the minimum shipment when the
    /// demand has one, the search threshold otherwise. Never more than
    /// what is still open.
    fn smallest_answer(&self, id: DemandId, remaining: f64) -> f64 {
        let d = self.net.demand(id);
        let floor = if is_positive(d.min_shipment) {
            d.min_shipment
        } else {
            self.settings.iteration_threshold
        };
        floor.max(ROUNDING_ERROR).min(remaining)
    }

    fn ask_delivery(&mut self, id: DemandId, delivery: OperationId, qty: f64, date: Date) -> Result<Answer, PlanError> {
        self.ask(Solvable::Operation(delivery), qty, date, false, |s| {
            s.cur_demand = Some(id);
        })
    }

    /// Largest quantity between `low` and `high` getting an answer of at
    /// least `low` at `date`. Trial asks are silent and rolled back.
    fn search_quantity(
        &mut self,
        id: DemandId,
        delivery: OperationId,
        low: f64,
        high: f64,
        date: Date,
    ) -> Result<Option<f64>, PlanError> {
        let settings = self.settings;
        let floor = low.max(ROUNDING_ERROR);
        let (mut low, mut high) = (floor, high);
        let mut found = None;
        for step in 0..MAX_SEARCH_STEPS {
            let q = if step == 0 { low } else { (low + high) / 2.0 };
            let mark = self.bookmark();
            let ans = self.silently(|s| s.ask_delivery(id, delivery, q, date))?;
            self.rollback(mark)?;
            if ans.qty >= floor - ROUNDING_ERROR {
                found = Some(q);
                low = q;
            } else if step == 0 {
                return Ok(None);
            } else {
                high = q;
            }
            let gap = high - low;
            if gap < settings.iteration_threshold.max(ROUNDING_ERROR)
                && gap < high * settings.iteration_accuracy / 100.0
            {
                break;
            }
        }
        Ok(found)
    }

    /// Re-ask for the remainder of a partially accepted round at the same
    /// date, keeping whatever more can be found.
    fn coordinate(&mut self, id: DemandId, delivery: OperationId, date: Date) -> Result<(), PlanError> {
        let d = self.net.demand(id);
        for _ in 0..MAX_COORDINATION {
            let remaining = d.quantity - self.plan.planned_quantity(id);
            if !is_positive(remaining) {
                break;
            }
            let mark = self.bookmark();
            let ans = self.silently(|s| s.ask_delivery(id, delivery, remaining, date))?;
            let left = remaining - ans.qty;
            let usable = ans.qty >= self.smallest_answer(id, remaining) - ROUNDING_ERROR
                && (!is_positive(left) || left >= d.min_shipment - ROUNDING_ERROR);
            if !usable {
                self.rollback(mark)?;
                break;
            }
        }
        Ok(())
    }

    /// Drop excess supply created by the round and commit it.
    fn finish_round(&mut self, mark: Bookmark) -> Result<(), PlanError> {
        let cluster = self.plan.id();
        let created: Vec<OperationPlanId> = self
            .commands
            .created_since(mark)
            .into_iter()
            .filter(|(c, _)| *c == cluster)
            .map(|(_, id)| id)
            .collect();
        Cleanup::new(self.net, self.plan, self.commands).deny_excess(&created)?;
        if self.settings.autocommit {
            self.commands.commit(self.plan)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandManager;
    use crate::constraint::ConstraintKind;
    use crate::demand::Demand;
    use crate::network::NetworkBuilder;
    use crate::plan::Plan;
    use crate::settings::{SolverSettings, UserExits};
    use crate::test_utils::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn plan_one(net: &crate::network::Network, settings: &SolverSettings) -> (Plan, DemandOutcome) {
        let mut plan = Plan::new(net);
        let mut commands = CommandManager::new();
        let exits = UserExits::default();
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        let mut solver = Solver::new(net, cp, &mut commands, settings, &exits);
        let outcome = solver.plan_demand(order(net)).unwrap();
        (plan, outcome)
    }

    #[test]
    fn single_step_demand_is_planned_on_time() {
        let net = single_step_network(0.0);
        let (plan, outcome) = plan_one(&net, &constrained());
        assert_eq!(outcome, DemandOutcome::Planned);
        assert_eq!(plans_of(&plan, &net, make_op(&net)), vec![(100.0, day(8), day(10))]);
        let deliveries = plan.deliveries(&net, order(&net));
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].end, day(10));
        assert!(plan.constraints(&net, order(&net)).is_none_or(|l| l.is_empty()));
    }

    #[test]
    fn remainder_below_min_shipment_takes_the_best_answer() {
        let net = min_shipment_network();
        let (plan, outcome) = plan_one(&net, &constrained());
        assert_eq!(outcome, DemandOutcome::Short);
        assert_eq!(plan.planned_quantity(&net, order(&net)), 95.0);
        assert_eq!(plan.deliveries(&net, order(&net)).len(), 1);
    }

    /// Ask the order directly and return the demand's own answer.
    fn ask_order(net: &crate::network::Network, settings: &SolverSettings) -> (Plan, Answer) {
        let mut plan = Plan::new(net);
        let mut commands = CommandManager::new();
        let exits = UserExits::default();
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        let mut solver = Solver::new(net, cp, &mut commands, settings, &exits);
        let d = net.demand(order(net));
        let ans = solver
            .ask(Solvable::Demand(order(net)), d.quantity, d.due, false, |s| {
                s.cur_demand = Some(order(net));
            })
            .unwrap();
        commands.commit(&mut plan).unwrap();
        (plan, ans)
    }

    /// Nothing can supply the order: no stock, no producing operation.
    fn unsupplied_network() -> crate::network::Network {
        let mut b = NetworkBuilder::new(day(0));
        let widget = b.add_item(crate::item::Item::new("widget"));
        let plant = b.add_location(crate::item::Location::new("plant"));
        b.add_buffer(crate::buffer::Buffer::new("widget@plant", widget, plant));
        b.add_demand(Demand::new("order", widget, plant, 100.0, day(10)));
        b.build().unwrap()
    }

    #[test]
    fn unsuppliable_order_leaves_no_operationplans() {
        let net = unsupplied_network();
        let (plan, outcome) = plan_one(&net, &constrained());
        assert_eq!(outcome, DemandOutcome::Short);
        assert_eq!(plan.planned_quantity(&net, order(&net)), 0.0);
        assert_eq!(plan.operationplan_count(), 0);
    }

    #[test]
    fn small_order_ships_the_minimum() {
        let mut b = single_step_builder(0.0);
        b.mutate_demand("order", |d| {
            d.quantity = 5.0;
            d.min_shipment = 10.0;
        })
        .unwrap();
        let net = b.build().unwrap();
        let (plan, outcome) = plan_one(&net, &constrained());
        assert_eq!(outcome, DemandOutcome::Planned);
        assert_eq!(plan.planned_quantity(&net, order(&net)), 10.0);
        assert_eq!(plans_of(&plan, &net, make_op(&net)), vec![(10.0, day(8), day(10))]);
    }

    #[test]
    fn short_answer_points_past_the_due_date() {
        let mut b = single_step_builder(0.0);
        b.mutate_demand("order", |d| {
            d.due = day(1);
            d.max_lateness = crate::time::Duration::ZERO;
        })
        .unwrap();
        let net = b.build().unwrap();
        let (plan, ans) = ask_order(&net, &constrained());
        assert_eq!(ans.qty, 0.0);
        assert!(ans.date > day(1), "got {}", ans.date);
        assert_eq!(plan.operationplan_count(), 0);

        let net = unsupplied_network();
        let (_, ans) = ask_order(&net, &constrained());
        assert_eq!(ans.qty, 0.0);
        assert_eq!(ans.date, Date::INFINITE_FUTURE);
    }

    #[test]
    fn closed_demand_is_skipped() {
        let mut b = single_step_builder(0.0);
        b.mutate_demand("order", |d| d.status = DemandStatus::Closed).unwrap();
        let net = b.build().unwrap();
        let (plan, outcome) = plan_one(&net, &constrained());
        assert_eq!(outcome, DemandOutcome::Skipped);
        assert_eq!(plan.operationplan_count(), 0);
    }

    #[test]
    fn lead_time_makes_the_demand_late() {
        let mut b = single_step_builder(0.0);
        b.mutate_demand("order", |d| d.due = day(1)).unwrap();
        let net = b.build().unwrap();
        let (plan, outcome) = plan_one(&net, &constrained());
        assert_eq!(outcome, DemandOutcome::Planned);
        let deliveries = plan.deliveries(&net, order(&net));
        assert_eq!(deliveries[0].end, day(2));
        let log = plan.constraints(&net, order(&net)).unwrap();
        assert!(log.count(ConstraintKind::BeforeCurrent) >= 1);
    }

    #[test]
    fn max_lateness_bounds_the_retries() {
        let mut b = single_step_builder(0.0);
        b.mutate_demand("order", |d| {
            d.due = day(1);
            d.max_lateness = crate::time::Duration::ZERO;
        })
        .unwrap();
        let net = b.build().unwrap();
        let (plan, outcome) = plan_one(&net, &constrained());
        assert_eq!(outcome, DemandOutcome::Short);
        assert_eq!(plan.operationplan_count(), 0);
    }

    #[test]
    fn unconstrained_search_fills_the_rest_without_constraints() {
        let mut b = single_step_builder(0.0);
        b.mutate_demand("order", |d| d.due = day(1)).unwrap();
        let net = b.build().unwrap();
        let settings = SolverSettings {
            plan_type: PlanType::UnconstrainedSearch,
            ..constrained()
        };
        let (plan, outcome) = plan_one(&net, &settings);
        assert_eq!(outcome, DemandOutcome::Planned);
        assert_eq!(plan.deliveries(&net, order(&net))[0].end, day(1));
        assert!(plan.constraints(&net, order(&net)).is_none_or(|l| l.is_empty()));
    }

    #[test]
    fn missing_delivery_operation_is_recorded() {
        let mut b = NetworkBuilder::new(day(0));
        let widget = b.add_item(crate::item::Item::new("widget"));
        let plant = b.add_location(crate::item::Location::new("plant"));
        b.add_demand(Demand::new("order", widget, plant, 5.0, day(3)));
        let net = b.build().unwrap();
        let (plan, outcome) = plan_one(&net, &constrained());
        assert_eq!(outcome, DemandOutcome::Failed);
        let log = plan.constraints(&net, order(&net)).unwrap();
        assert_eq!(log.count(ConstraintKind::InvalidData), 1);
        let detail = log.top().and_then(|c| c.detail.clone()).unwrap();
        assert!(detail.contains("order"), "got: {detail}");
    }

    #[test]
    fn strict_planning_returns_the_error() {
        let net = single_step_network(0.0);
        let mut plan = Plan::new(&net);
        let mut commands = CommandManager::new();
        let settings = constrained();
        let exits = UserExits::default();
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        let mut solver = Solver::new(&net, cp, &mut commands, &settings, &exits);
        assert_eq!(
            solver.plan_demand_strict(DemandId(7)),
            Err(PlanError::UnknownDemand(DemandId(7)))
        );
    }

    #[test]
    fn demand_exit_is_called() {
        let net = single_step_network(0.0);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let exits = UserExits {
            demand: Some(Arc::new(move |_, _, constrained| {
                assert!(constrained);
                seen.fetch_add(1, Ordering::SeqCst);
            })),
            ..UserExits::default()
        };
        let mut plan = Plan::new(&net);
        let mut commands = CommandManager::new();
        let settings = constrained();
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        let mut solver = Solver::new(&net, cp, &mut commands, &settings, &exits);
        solver.plan_demand(order(&net)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
