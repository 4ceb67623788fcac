//! Continuous resources: a loadplan fits when the capacity in use over its
//! whole span, changeover included, stays within the resource's maximum.
//!
//! A loadplan that does not fit is first shrunk into the free stretch
//! before its end, then pulled earlier (down to the resource's
//! `max_early`), then pushed later. Pushing later than the asker's latest
//! acceptable date is a rejection carrying the date at which capacity would
//! be available.
//!
//! Load of the operationplan's own family (its owners and their children)
//! never blocks it. Each operationplan takes one slot of the resource; a
//! resource with room for several runs at once takes the rest of a shrunk
//! plan as further operationplans when the asker comes back for it.

use super::Solver;
use crate::constraint::{ConstraintEntity, ConstraintKind};
use crate::error::PlanError;
use crate::id::*;
use crate::plan::LoadPlan;
use crate::quantity::{ROUNDING_ERROR, is_positive};
use crate::resource::ResourceKind;
use crate::time::{Date, Duration};
use crate::timeline::EventOwner;

impl Solver<'_> {
    pub(crate) fn solve_resource(&mut self, id: ResourceId) -> Result<(), PlanError> {
        let net = self.net;
        let resource = net.resource(id);
        if let Some(exit) = &self.exits.resource {
            exit(net, id, self.constrained);
        }
        let st = self.top();
        let (Some(opplan), Some(idx)) = (st.q_operationplan, st.q_loadplan) else {
            self.reply(st.q_qty, st.q_date);
            return Ok(());
        };
        match &resource.kind {
            ResourceKind::Infinite => {
                self.accrue(id, opplan, idx, 0.0)?;
                self.reply(st.q_qty, st.q_date);
                Ok(())
            }
            ResourceKind::Buckets(cal) => self.solve_buckets(id, cal, opplan, idx),
            ResourceKind::Default => self.solve_continuous(id, opplan, idx),
        }
    }

    fn solve_continuous(&mut self, id: ResourceId, opplan: OperationPlanId, idx: usize) -> Result<(), PlanError> {
        let net = self.net;
        let resource = net.resource(id);
        let st = self.top();
        let locked = self.plan.plan(opplan)?.is_locked();
        if !self.capacity_constrained() || locked {
            let setup_cost = self.apply_setup(id, opplan, idx)?.unwrap_or(0.0);
            self.accrue(id, opplan, idx, setup_cost)?;
            self.reply(st.q_qty, st.q_date);
            return Ok(());
        }

        let mark = self.bookmark();
        let (orig_start, orig_end) = self.span(opplan)?;
        let family = self.family(opplan);

        if !st.force_late {
            if let Some(setup_cost) = self.fits(id, opplan, idx, &family)? {
                self.accrue(id, opplan, idx, setup_cost)?;
                self.reply(st.q_qty, st.q_date);
                return Ok(());
            }
            if let Some(setup_cost) = self.shrink_to_fit(id, opplan, idx, &family, true)? {
                self.accrue(id, opplan, idx, setup_cost)?;
                tracing::trace!(resource = %resource.name, "resized into free window");
                self.reply(st.q_qty, st.q_date);
                return Ok(());
            }
            let lead = orig_end - self.loadplan(opplan, idx)?.setup_start;
            let mut lowest = orig_end - resource.max_early;
            if self.leadtime_constrained() {
                lowest = lowest.max(net.current() + lead);
            }
            for end in self.candidates(id, lowest, orig_end).into_iter().rev() {
                self.plan.move_end(net, self.commands, opplan, end)?;
                if let Some(setup_cost) = self.fits(id, opplan, idx, &family)? {
                    self.accrue(id, opplan, idx, setup_cost)?;
                    tracing::trace!(resource = %resource.name, end = %end, "pulled earlier");
                    self.reply(st.q_qty, st.q_date);
                    return Ok(());
                }
            }
            self.rollback(mark)?;
        }

        let later: Vec<Date> = self
            .candidates(id, orig_start, Date::INFINITE_FUTURE)
            .into_iter()
            .filter(|d| *d > orig_start)
            .collect();
        for start in later {
            self.plan.move_start(net, self.commands, opplan, start)?;
            let fitted = match self.fits(id, opplan, idx, &family)? {
                Some(cost) => Some(cost),
                None => self.shrink_to_fit(id, opplan, idx, &family, false)?,
            };
            let Some(setup_cost) = fitted else {
                continue;
            };
            let (_, end) = self.span(opplan)?;
            if end <= st.q_date_max {
                self.accrue(id, opplan, idx, setup_cost)?;
                self.reply(st.q_qty, st.q_date);
                return Ok(());
            }
            self.rollback(mark)?;
            self.log(
                ConstraintKind::CapacityOverload,
                ConstraintEntity::Resource(id),
                orig_start,
                start,
                st.q_qty,
            );
            self.reply(0.0, end);
            return Ok(());
        }

        self.rollback(mark)?;
        self.log(
            ConstraintKind::CapacityOverload,
            ConstraintEntity::Resource(id),
            orig_start,
            Date::INFINITE_FUTURE,
            st.q_qty,
        );
        self.reply(0.0, Date::INFINITE_FUTURE);
        Ok(())
    }

    /// The operationplan's top owner and everything under it.
    fn family(&self, opplan: OperationPlanId) -> Vec<OperationPlanId> {
        let mut top = opplan;
        while let Some(owner) = self.plan.get(top).and_then(|o| o.owner) {
            top = owner;
        }
        self.plan.descendants(top)
    }

    /// Capacity in use at `at` by operationplans outside `family`.
    fn used_by_others(&self, id: ResourceId, family: &[OperationPlanId], at: Date) -> f64 {
        self.plan.resource_timeline(id).map_or(0.0, |tl| {
            tl.onhand_filtered(at, |owner| {
                !matches!(owner, EventOwner::Plan(o, _) if family.contains(o))
            })
        })
    }

    /// Whether one more loadplan of `need` fits at `at`.
    fn room_at(&self, id: ResourceId, family: &[OperationPlanId], need: f64, at: Date) -> bool {
        let maximum = self.net.resource(id).maximum.value_at(at);
        self.used_by_others(id, family, at) + need <= maximum + ROUNDING_ERROR
    }

    /// Dates in `(from, to)` where capacity in use or available changes,
    /// `from` included.
    fn checkpoints(&self, id: ResourceId, from: Date, to: Date) -> Vec<Date> {
        let mut out = vec![from];
        out.extend(self.candidates(id, from, to).into_iter().filter(|d| *d > from));
        out
    }

    /// Whether loadplan `idx` fits at its current position. Returns the
    /// changeover cost when it does.
    fn fits(
        &mut self,
        id: ResourceId,
        opplan: OperationPlanId,
        idx: usize,
        family: &[OperationPlanId],
    ) -> Result<Option<f64>, PlanError> {
        let Some(setup_cost) = self.apply_setup(id, opplan, idx)? else {
            return Ok(None);
        };
        let lp = self.loadplan(opplan, idx)?;
        let Some(tl) = self.plan.resource_timeline(id) else {
            return Ok(Some(setup_cost));
        };
        let (from, to) = (lp.setup_start, lp.end);
        for at in self.checkpoints(id, from, to) {
            if !self.room_at(id, family, lp.quantity, at) {
                return Ok(None);
            }
        }

        if let Some(setup) = &lp.setup {
            for other in tl.owners() {
                if family.contains(&other) {
                    continue;
                }
                let Some(o) = self.plan.get(other) else { continue };
                let clash = o.loadplans.iter().any(|olp| {
                    olp.resource == id
                        && olp.setup.as_ref().is_some_and(|s| s != setup)
                        && olp.setup_start < to
                        && from < olp.end
                });
                if clash {
                    return Ok(None);
                }
            }
        }
        Ok(Some(setup_cost))
    }

    /// Shrink the operationplan into the free stretch ending at its end
    /// (`keep_end`) or starting at its changeover. Only operations whose
    /// duration depends on the quantity can shrink.
    fn shrink_to_fit(
        &mut self,
        id: ResourceId,
        opplan: OperationPlanId,
        idx: usize,
        family: &[OperationPlanId],
        keep_end: bool,
    ) -> Result<Option<f64>, PlanError> {
        let net = self.net;
        let (qty, operation, leaf) = {
            let o = self.plan.plan(opplan)?;
            (o.quantity, o.operation, o.children.is_empty())
        };
        if !self.settings.allow_splits || !leaf {
            return Ok(None);
        }
        let lp = self.loadplan(opplan, idx)?;
        let setup_lead = lp.start - lp.setup_start;
        let run = if keep_end {
            let mut free_from = lp.end;
            for at in self.checkpoints(id, lp.setup_start, lp.end).into_iter().rev() {
                if !self.room_at(id, family, lp.quantity, at) {
                    break;
                }
                free_from = at;
            }
            lp.end - free_from - setup_lead
        } else {
            let free_until = self
                .checkpoints(id, lp.setup_start, lp.end)
                .into_iter()
                .find(|at| !self.room_at(id, family, lp.quantity, *at))
                .unwrap_or(lp.end);
            free_until - lp.start
        };
        if run <= Duration::ZERO {
            return Ok(None);
        }
        let op = net.operation(operation);
        let fit = op.size_quantity(op.fit_quantity(run).min(qty), true);
        if !is_positive(fit) || fit >= qty - ROUNDING_ERROR {
            return Ok(None);
        }
        let mark = self.bookmark();
        self.plan.resize(net, self.commands, opplan, fit, keep_end)?;
        match self.fits(id, opplan, idx, family)? {
            Some(cost) => Ok(Some(cost)),
            None => {
                self.rollback(mark)?;
                Ok(None)
            }
        }
    }

    /// Put the changeover in front of loadplan `idx`. `None` when the setup
    /// matrix forbids the change.
    fn apply_setup(&mut self, id: ResourceId, opplan: OperationPlanId, idx: usize) -> Result<Option<f64>, PlanError> {
        let net = self.net;
        let resource = net.resource(id);
        let lp = self.loadplan(opplan, idx)?;
        let Some(target) = &lp.setup else {
            return Ok(Some(0.0));
        };
        let previous = self.previous_setup(id, opplan, lp.start);
        let from = previous.or_else(|| resource.initial_setup.clone());
        let Some((duration, cost)) = resource.changeover(from.as_deref(), target) else {
            return Ok(None);
        };
        self.plan
            .set_setup_start(net, self.commands, opplan, idx, lp.start - duration)?;
        Ok(Some(cost))
    }

    /// Setup left behind by the last loadplan on the resource that ends by
    /// `before`.
    fn previous_setup(&self, id: ResourceId, exclude: OperationPlanId, before: Date) -> Option<String> {
        let tl = self.plan.resource_timeline(id)?;
        tl.owners()
            .into_iter()
            .filter(|o| *o != exclude)
            .filter_map(|o| self.plan.get(o))
            .flat_map(|o| o.loadplans.iter())
            .filter(|lp| lp.resource == id && lp.end <= before && lp.setup.is_some())
            .max_by_key(|lp| lp.end)
            .and_then(|lp| lp.setup.clone())
    }

    /// Dates in `[from, to)` where capacity in use or available changes.
    fn candidates(&self, id: ResourceId, from: Date, to: Date) -> Vec<Date> {
        let mut out: Vec<Date> = self
            .plan
            .resource_timeline(id)
            .map(|tl| tl.dates_between(from, to))
            .unwrap_or_default();
        out.extend(self.net.resource(id).maximum.changes_between(from, to));
        out.sort();
        out.dedup();
        out
    }

    pub(crate) fn loadplan(&self, opplan: OperationPlanId, idx: usize) -> Result<LoadPlan, PlanError> {
        self.plan
            .plan(opplan)?
            .loadplans
            .get(idx)
            .cloned()
            .ok_or(PlanError::UnknownOperationPlan)
    }

    fn span(&self, opplan: OperationPlanId) -> Result<(Date, Date), PlanError> {
        let o = self.plan.plan(opplan)?;
        Ok((o.start, o.end))
    }

    /// Usage cost of a loadplan plus the changeover penalty.
    pub(crate) fn accrue(
        &mut self,
        id: ResourceId,
        opplan: OperationPlanId,
        idx: usize,
        setup_cost: f64,
    ) -> Result<(), PlanError> {
        let lp = self.loadplan(opplan, idx)?;
        let resource = self.net.resource(id);
        let cost = match resource.kind {
            ResourceKind::Buckets(_) => resource.cost * lp.quantity,
            _ => resource.cost * (lp.end - lp.setup_start).hours() * lp.quantity,
        };
        self.add_cost(cost, setup_cost);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::command::CommandManager;
    use crate::constraint::ConstraintKind;
    use crate::demand::Demand;
    use crate::id::*;
    use crate::load::Load;
    use crate::network::{Network, NetworkBuilder};
    use crate::operation::{Operation, OperationKind};
    use crate::plan::{NewPlan, Plan, PlanStatus};
    use crate::resource::{Resource, SetupMatrix};
    use crate::settings::UserExits;
    use crate::solver::{Answer, Solvable, Solver};
    use crate::test_utils::*;
    use crate::time::Duration;

    /// Two orders of 100 due day 10 competing for a press that runs one
    /// operationplan at a time.
    fn press_builder(max_early: Duration) -> NetworkBuilder {
        let mut b = single_step_builder(0.0);
        let press = b.add_resource(Resource::new("press", 1.0).with_max_early(max_early));
        let make = b.operation_id("make").unwrap();
        b.add_load(Load::new(make, press, 1.0));
        b.mutate_demand("order", |d| d.priority = 1).unwrap();
        let (widget, plant) = (b.item_id("widget").unwrap(), b.location_id("plant").unwrap());
        b.add_demand(Demand::new("second", widget, plant, 100.0, day(10)).with_priority(2));
        b
    }

    fn press_network(max_early: Duration) -> Network {
        press_builder(max_early).build().unwrap()
    }

    #[test]
    fn overlapping_plan_is_pulled_earlier() {
        let net = press_network(days(100));
        let plan = solve(&net, constrained());
        assert_eq!(
            plans_of(&plan, &net, make_op(&net)),
            vec![(100.0, day(8), day(10)), (100.0, day(6), day(8))]
        );
        let second = net.demand_id("second").unwrap();
        assert_eq!(plan.planned_quantity(&net, second), 100.0);
        assert_eq!(plan.deliveries(&net, second)[0].end, day(10));
    }

    #[test]
    fn without_early_window_the_plan_goes_late() {
        let net = press_network(Duration::ZERO);
        let plan = solve(&net, constrained());
        let second = net.demand_id("second").unwrap();
        let deliveries = plan.deliveries(&net, second);
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].end, day(12));
        let log = plan.constraints(&net, second).unwrap();
        assert!(log.count(ConstraintKind::CapacityOverload) >= 1);
        let press = net.resource_id("press").unwrap();
        for d in 0..14 {
            assert!(plan.load_at(&net, press, day(d)) <= 1.0);
        }
    }

    /// Ask `make` for `qty` widgets by `due` on top of an existing plan.
    fn ask_make(net: &Network, plan: &mut Plan, qty: f64, due: crate::time::Date) -> Answer {
        let mut commands = CommandManager::new();
        let settings = constrained();
        let exits = UserExits::default();
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        let mut solver = Solver::new(net, cp, &mut commands, &settings, &exits);
        let fg = widget_buffer(net);
        let ans = solver
            .ask(Solvable::Operation(make_op(net)), qty, due, false, |s| {
                s.cur_buffer = Some(fg);
            })
            .unwrap();
        commands.commit(plan).unwrap();
        ans
    }

    /// `make` takes an hour per widget and loads a press of `capacity`,
    /// which a confirmed `blocker` occupies with `blocked` units until day 9.
    fn time_per_network(capacity: f64, blocked: f64, quantity: f64) -> (Network, Plan) {
        let mut b = single_step_builder(0.0);
        b.mutate_operation("make", |op| {
            op.kind = OperationKind::TimePer {
                per_unit: Duration::from_hours(1),
            };
            op.duration = Duration::ZERO;
        })
        .unwrap();
        b.mutate_demand("order", |d| d.quantity = quantity).unwrap();
        let press = b.add_resource(Resource::new("press", capacity));
        let make = b.operation_id("make").unwrap();
        b.add_load(Load::new(make, press, 1.0));
        let blocker = b.add_operation(Operation::fixed_time("blocker", days(9)));
        b.add_load(Load::new(blocker, press, blocked));
        let net = b.build().unwrap();
        let mut plan = Plan::new(&net);
        plan.add_operationplan(
            &net,
            NewPlan::ending(blocker, 1.0, day(9)).with_status(PlanStatus::Confirmed),
        )
        .unwrap();
        (net, plan)
    }

    #[test]
    fn building_ahead_costs_a_share_of_the_capacity_cost() {
        let mut b = single_step_builder(0.0);
        let press = b.add_resource(Resource::new("press", 1.0).with_cost(1.0));
        let make = b.operation_id("make").unwrap();
        b.add_load(Load::new(make, press, 1.0));
        let net = b.build().unwrap();
        let mut plan = Plan::new(&net);
        plan.add_operationplan(&net, NewPlan::ending(make, 100.0, day(10)))
            .unwrap();

        let ans = ask_make(&net, &mut plan, 100.0, day(10));
        assert_eq!(ans.qty, 100.0);
        // two days on the press at 1 per hour, pulled from day 10 to day 8
        assert_eq!(ans.cost, 48.0);
        assert!((ans.penalty - 2.4).abs() < 1e-9, "penalty {}", ans.penalty);
        assert_eq!(plans_of(&plan, &net, make)[1], (100.0, day(6), day(8)));
    }

    #[test]
    fn on_time_capacity_has_no_penalty() {
        let mut b = single_step_builder(0.0);
        let press = b.add_resource(Resource::new("press", 1.0).with_cost(1.0));
        let make = b.operation_id("make").unwrap();
        b.add_load(Load::new(make, press, 1.0));
        let net = b.build().unwrap();
        let mut plan = Plan::new(&net);
        let ans = ask_make(&net, &mut plan, 100.0, day(10));
        assert_eq!(ans.cost, 48.0);
        assert_eq!(ans.penalty, 0.0);
    }

    #[test]
    fn time_per_plan_shrinks_into_the_free_window() {
        let (net, mut plan) = time_per_network(1.0, 1.0, 48.0);
        let ans = ask_make(&net, &mut plan, 48.0, day(10));
        // only day 9 to day 10 is free: 24 hours, 24 widgets
        assert_eq!(ans.qty, 24.0);
        assert_eq!(plans_of(&plan, &net, make_op(&net)), vec![(24.0, day(9), day(10))]);
        let press = net.resource_id("press").unwrap();
        assert_eq!(plan.load_at(&net, press, day(9)), 1.0);
    }

    #[test]
    fn parallel_slots_take_the_rest_of_a_shrunk_plan() {
        let (net, mut plan) = time_per_network(2.0, 2.0, 96.0);
        crate::solver::Planner::new(constrained())
            .solve(&net, &mut plan)
            .unwrap();
        let make = plans_of(&plan, &net, make_op(&net));
        let on_time: Vec<_> = make.iter().filter(|(_, _, end)| *end == day(10)).collect();
        assert_eq!(on_time.len(), 2);
        assert!(on_time.iter().all(|(q, start, _)| *q == 24.0 && *start == day(9)));
        let press = net.resource_id("press").unwrap();
        assert_eq!(plan.load_at(&net, press, day(9)), 2.0);
        assert_eq!(plan.planned_quantity(&net, order(&net)), 96.0);
    }

    #[test]
    fn routing_is_not_blocked_by_its_own_steps() {
        let mut b = NetworkBuilder::new(day(0));
        let widget = b.add_item(crate::item::Item::new("widget"));
        let plant = b.add_location(crate::item::Location::new("plant"));
        let fg = b.add_buffer(crate::buffer::Buffer::new("widget@plant", widget, plant));
        let cut = b.add_operation(Operation::fixed_time("cut", days(1)));
        let weld = b.add_operation(Operation::fixed_time("weld", days(2)));
        let make = b.add_operation(Operation::routing("make", vec![cut, weld]));
        b.add_flow(crate::flow::Flow::produce(make, fg, 1.0));
        let press = b.add_resource(Resource::new("press", 1.0));
        b.add_load(Load::new(make, press, 1.0));
        b.add_load(Load::new(weld, press, 1.0));
        b.add_demand(Demand::new("order", widget, plant, 20.0, day(10)));
        let net = b.build().unwrap();

        let plan = solve(&net, constrained());
        assert_eq!(plans_of(&plan, &net, weld), vec![(20.0, day(8), day(10))]);
        assert_eq!(plans_of(&plan, &net, make), vec![(20.0, day(7), day(10))]);
        assert_eq!(plan.deliveries(&net, order(&net))[0].end, day(10));
    }

    #[test]
    fn unconstrained_capacity_overloads() {
        let net = press_network(Duration::ZERO);
        let plan = solve(&net, unconstrained());
        let press = net.resource_id("press").unwrap();
        assert_eq!(plan.load_at(&net, press, day(9)), 2.0);
    }

    #[test]
    fn changeover_precedes_the_load() {
        let mut b = single_step_builder(0.0);
        let matrix = SetupMatrix::default().with_rule(Some("red"), Some("blue"), days(1), 5.0);
        let press = b.add_resource(Resource::new("press", 1.0).with_setups(matrix, Some("red")));
        let make = b.operation_id("make").unwrap();
        b.add_load(Load::new(make, press, 1.0).with_setup("blue"));
        let net = b.build().unwrap();
        let plan = solve(&net, constrained());
        let deliveries = plan.deliveries(&net, order(&net));
        assert_eq!(deliveries[0].end, day(10));
        assert_eq!(plan.load_at(&net, press, day(7)), 1.0);
        assert_eq!(plan.load_at(&net, press, day(6)), 0.0);
    }

    #[test]
    fn forbidden_changeover_is_never_planned() {
        let mut b = single_step_builder(0.0);
        let matrix = SetupMatrix::default().with_rule(Some("red"), Some("green"), days(1), 5.0);
        let press = b.add_resource(Resource::new("press", 1.0).with_setups(matrix, Some("red")));
        let make = b.operation_id("make").unwrap();
        b.add_load(Load::new(make, press, 1.0).with_setup("blue"));
        let net = b.build().unwrap();
        let plan = solve(&net, constrained());
        assert_eq!(plan.planned_quantity(&net, order(&net)), 0.0);
        assert!(plans_of(&plan, &net, make_op(&net)).is_empty());
    }
}
