//! Loads: pick the resource a loadplan goes to and ask it for capacity.
//!
//! A load may name an aggregate resource or require a skill, in which case
//! every qualified leaf resource is a candidate. Loads sharing a group on
//! the same operation are alternates of each other.

use super::{Answer, Solvable, Solver};
use crate::error::PlanError;
use crate::id::*;
use crate::operation::SearchMode;
use crate::quantity::{ROUNDING_ERROR, is_positive};
use crate::time::Date;

/// One way of satisfying a loadplan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadOption {
    /// The load on one specific resource.
    Resource(LoadId, ResourceId),
    /// An alternate load, resolving its own resource.
    Load(LoadId),
}

impl Solver<'_> {
    pub(crate) fn solve_load(&mut self, id: LoadId) -> Result<(), PlanError> {
        let net = self.net;
        let st = self.top();
        let (Some(opplan), Some(idx)) = (st.q_operationplan, st.q_loadplan) else {
            self.reply(st.q_qty, st.q_date);
            return Ok(());
        };
        let load = net.load(id);
        if load.group.is_some() {
            let start = self.plan.plan(opplan)?.start;
            let mut alternates: Vec<LoadId> = net
                .operation(load.operation)
                .loads()
                .iter()
                .copied()
                .filter(|l| {
                    let alt = net.load(*l);
                    alt.group == load.group && alt.effective.contains(start)
                })
                .collect();
            alternates.sort_by_key(|l| (net.load(*l).priority, *l));
            if alternates.len() > 1 {
                let options: Vec<LoadOption> = alternates.into_iter().map(LoadOption::Load).collect();
                return self.choose_among(opplan, idx, &options, load.search);
            }
        }
        let ans = self.plan_load(id, opplan, idx)?;
        self.add_cost(ans.cost, ans.penalty);
        self.reply(if is_positive(ans.qty) { st.q_qty } else { 0.0 }, ans.date);
        Ok(())
    }

    /// Bind the loadplan to `load` and find it a resource.
    fn plan_load(&mut self, load: LoadId, opplan: OperationPlanId, idx: usize) -> Result<Answer, PlanError> {
        let net = self.net;
        let l = net.load(load);
        if l.skill.is_some() || !net.resource(l.resource).members().is_empty() {
            return self.choose_resource(load, opplan, idx);
        }
        self.plan
            .rebind_load(net, self.commands, opplan, idx, load, l.resource)?;
        self.ask_resource(opplan, idx, l.resource)
    }

    fn ask_resource(&mut self, opplan: OperationPlanId, idx: usize, resource: ResourceId) -> Result<Answer, PlanError> {
        let st = self.top();
        let (qty, end) = {
            let o = self.plan.plan(opplan)?;
            (o.loadplans.get(idx).map_or(0.0, |lp| lp.quantity), o.end)
        };
        self.ask(Solvable::Resource(resource), qty, end, false, |s| {
            s.q_operationplan = Some(opplan);
            s.q_loadplan = Some(idx);
            s.q_date_max = st.q_date_max;
            s.force_late = st.force_late;
        })
    }

    /// Candidate leaf resources of a skilled or aggregate load, best skill
    /// priority first.
    fn choose_resource(&mut self, load: LoadId, opplan: OperationPlanId, idx: usize) -> Result<Answer, PlanError> {
        let net = self.net;
        let l = net.load(load);
        let start = self.plan.plan(opplan)?.start;
        let mut candidates: Vec<(i32, ResourceId)> = net
            .leaf_resources(l.resource)
            .into_iter()
            .filter_map(|r| match l.skill {
                Some(s) => net.resource(r).skill_priority(s, start).map(|p| (p, r)),
                None => Some((0, r)),
            })
            .collect();
        if let Some(s) = l.skill
            && candidates.is_empty()
        {
            return Err(PlanError::SkillUnsatisfiable {
                operation: net.operation(l.operation).name.clone(),
                resource: net.resource(l.resource).name.clone(),
                skill: net.skill(s).name.clone(),
            });
        }
        candidates.sort_by_key(|(p, _)| *p);
        let mut options: Vec<LoadOption> = candidates
            .into_iter()
            .map(|(_, r)| LoadOption::Resource(load, r))
            .collect();
        if self.settings.rotate_resources && options.len() > 1 {
            let slot = self.plan.rotation.entry(load).or_insert(0);
            let shift = *slot % options.len();
            *slot = slot.wrapping_add(1);
            options.rotate_left(shift);
        }

        self.pick(opplan, idx, &options, l.search)
    }

    fn choose_among(
        &mut self,
        opplan: OperationPlanId,
        idx: usize,
        options: &[LoadOption],
        search: SearchMode,
    ) -> Result<(), PlanError> {
        let st = self.top();
        let ans = self.pick(opplan, idx, options, search)?;
        self.add_cost(ans.cost, ans.penalty);
        self.reply(if is_positive(ans.qty) { st.q_qty } else { 0.0 }, ans.date);
        Ok(())
    }

    /// Try options in order (priority search) or evaluate all of them and
    /// keep the cheapest (cost searches).
    fn pick(
        &mut self,
        opplan: OperationPlanId,
        idx: usize,
        options: &[LoadOption],
        search: SearchMode,
    ) -> Result<Answer, PlanError> {
        let Some(first) = options.first().copied() else {
            return Ok(Answer::none(Date::INFINITE_FUTURE));
        };
        if !self.constrained || options.len() == 1 {
            return self.try_option(opplan, idx, first);
        }

        let mut next = Date::INFINITE_FUTURE;
        if search == SearchMode::Priority {
            for opt in options {
                let mark = self.bookmark();
                let ans = self.try_option(opplan, idx, *opt)?;
                if is_positive(ans.qty) {
                    return Ok(ans);
                }
                next = next.min(ans.date);
                self.rollback(mark)?;
            }
            return Ok(Answer::none(next));
        }

        let plan_qty = self.plan.plan(opplan)?.quantity.max(ROUNDING_ERROR);
        let mut best: Option<(f64, LoadOption)> = None;
        for opt in options {
            let mark = self.bookmark();
            let ans = self.silently(|s| s.try_option(opplan, idx, *opt))?;
            self.rollback(mark)?;
            if !is_positive(ans.qty) {
                next = next.min(ans.date);
                continue;
            }
            let score = search.score(ans.cost, ans.penalty) / plan_qty;
            if best.is_none_or(|(s, _)| score < s - ROUNDING_ERROR) {
                best = Some((score, *opt));
            }
        }
        match best {
            Some((_, opt)) => self.try_option(opplan, idx, opt),
            None => Ok(Answer::none(next)),
        }
    }

    fn try_option(&mut self, opplan: OperationPlanId, idx: usize, option: LoadOption) -> Result<Answer, PlanError> {
        match option {
            LoadOption::Resource(load, resource) => {
                self.plan
                    .rebind_load(self.net, self.commands, opplan, idx, load, resource)?;
                self.ask_resource(opplan, idx, resource)
            }
            LoadOption::Load(load) => self.plan_load(load, opplan, idx),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::constraint::ConstraintKind;
    use crate::demand::Demand;
    use crate::load::Load;
    use crate::network::{Network, NetworkBuilder};
    use crate::resource::Resource;
    use crate::settings::SolverSettings;
    use crate::test_utils::*;
    use crate::time::Duration;

    /// `make` loads the `crew` aggregate of `alice` (weld priority 2) and
    /// `bob` (weld priority 1).
    fn crew_builder(skill: &str) -> NetworkBuilder {
        let mut b = single_step_builder(0.0);
        let weld = b.add_skill("weld");
        let paint = b.add_skill("paint");
        let crew = b.add_resource(Resource::new("crew", 0.0));
        b.add_resource(Resource::new("alice", 1.0).with_owner(crew).with_skill(weld, 2));
        b.add_resource(Resource::new("bob", 1.0).with_owner(crew).with_skill(weld, 1));
        let make = b.operation_id("make").unwrap();
        let required = if skill == "weld" { weld } else { paint };
        b.add_load(Load::new(make, crew, 1.0).with_skill(required));
        b
    }

    fn busy(plan: &crate::plan::Plan, net: &Network, name: &str, d: i64) -> f64 {
        plan.load_at(net, net.resource_id(name).unwrap(), day(d))
    }

    #[test]
    fn best_skill_priority_wins() {
        let net = crew_builder("weld").build().unwrap();
        let plan = solve(&net, constrained());
        assert_eq!(busy(&plan, &net, "bob", 9), 1.0);
        assert_eq!(busy(&plan, &net, "alice", 9), 0.0);
    }

    #[test]
    fn busy_resource_hands_over_to_next_candidate() {
        let mut b = crew_builder("weld");
        let (widget, plant) = (b.item_id("widget").unwrap(), b.location_id("plant").unwrap());
        b.mutate_resource("bob", |r| r.max_early = Duration::ZERO).unwrap();
        b.mutate_resource("alice", |r| r.max_early = Duration::ZERO).unwrap();
        b.mutate_demand("order", |d| d.priority = 1).unwrap();
        b.add_demand(Demand::new("second", widget, plant, 100.0, day(10)).with_priority(2));
        let net = b.build().unwrap();
        let plan = solve(&net, constrained());
        assert_eq!(busy(&plan, &net, "bob", 9), 1.0);
        assert_eq!(busy(&plan, &net, "alice", 9), 1.0);
        assert_eq!(plan.planned_quantity(&net, net.demand_id("second").unwrap()), 100.0);
    }

    #[test]
    fn missing_skill_is_invalid_data() {
        let net = crew_builder("paint").build().unwrap();
        let plan = solve(&net, constrained());
        let d = order(&net);
        assert_eq!(plan.planned_quantity(&net, d), 0.0);
        let log = plan.constraints(&net, d).unwrap();
        assert_eq!(log.count(ConstraintKind::InvalidData), 1);
    }

    #[test]
    fn rotation_spreads_orders_over_resources() {
        let mut b = single_step_builder(0.0);
        let crew = b.add_resource(Resource::new("crew", 0.0));
        b.add_resource(Resource::new("alice", 1.0).with_owner(crew));
        b.add_resource(Resource::new("bob", 1.0).with_owner(crew));
        let make = b.operation_id("make").unwrap();
        b.add_load(Load::new(make, crew, 1.0));
        let (widget, plant) = (b.item_id("widget").unwrap(), b.location_id("plant").unwrap());
        b.add_demand(Demand::new("later", widget, plant, 100.0, day(20)));
        let net = b.build().unwrap();
        let settings = SolverSettings {
            rotate_resources: true,
            ..constrained()
        };
        let plan = solve(&net, settings);
        assert_eq!(busy(&plan, &net, "alice", 9), 1.0);
        assert_eq!(busy(&plan, &net, "bob", 19), 1.0);
        assert_eq!(busy(&plan, &net, "alice", 19), 0.0);
    }

    #[test]
    fn grouped_loads_are_alternates() {
        let mut b = single_step_builder(0.0);
        let old = b.add_resource(Resource::new("old", 1.0).with_max_early(Duration::ZERO));
        let new = b.add_resource(Resource::new("new", 1.0).with_max_early(Duration::ZERO));
        let make = b.operation_id("make").unwrap();
        b.add_load(Load::new(make, old, 1.0).with_group("machine", 2));
        b.add_load(Load::new(make, new, 1.0).with_group("machine", 1));
        let (widget, plant) = (b.item_id("widget").unwrap(), b.location_id("plant").unwrap());
        b.mutate_demand("order", |d| d.priority = 1).unwrap();
        b.add_demand(Demand::new("second", widget, plant, 100.0, day(10)).with_priority(2));
        let net = b.build().unwrap();
        let plan = solve(&net, constrained());
        assert_eq!(busy(&plan, &net, "new", 9), 1.0);
        assert_eq!(busy(&plan, &net, "old", 9), 1.0);
    }
}
