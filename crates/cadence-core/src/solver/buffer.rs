//! Buffers: answer from inventory, replenish from the producing operation
//! and keep safety stock.

use super::{Answer, Solvable, Solver};
use crate::buffer::BufferKind;
use crate::constraint::{ConstraintEntity, ConstraintKind};
use crate::error::PlanError;
use crate::id::*;
use crate::network::Network;
use crate::plan::ClusterPlan;
use crate::quantity::{ROUNDING_ERROR, is_positive};
use crate::time::Date;

/// Quantity asked of a buffer to make it plan its own safety stock.
pub(crate) const SAFETY_STOCK_ASK: f64 = -1.0;

/// Shortage dates resolved per ask before giving up.
const MAX_SHORTAGES: usize = 1_000;
/// Supply requests per shortage.
const MAX_SUPPLY_ROUNDS: usize = 64;

/// `(date, onhand - minimum)` at `from` and at every later date where
/// either inventory or the minimum changes.
pub(crate) fn net_profile(net: &Network, plan: &ClusterPlan, buffer: BufferId, from: Date) -> Vec<(Date, f64)> {
    let b = net.buffer(buffer);
    let Some(tl) = plan.buffer_timeline(buffer) else {
        return Vec::new();
    };
    let profile = tl.profile_from(from);
    let mut dates: Vec<Date> = profile
        .iter()
        .map(|(d, _)| *d)
        .chain(b.minimum.changes_between(from, Date::INFINITE_FUTURE))
        .collect();
    dates.sort();
    dates.dedup();

    let mut out = Vec::with_capacity(dates.len());
    let mut i = 0;
    let mut onhand = 0.0;
    for d in dates {
        while let Some((pd, q)) = profile.get(i)
            && *pd <= d
        {
            onhand = *q;
            i += 1;
        }
        out.push((d, onhand - b.minimum.value_at(d)));
    }
    out
}

impl Solver<'_> {
    pub(crate) fn solve_buffer(&mut self, id: BufferId) -> Result<(), PlanError> {
        let net = self.net;
        let buffer = net.buffer(id);
        if let Some(exit) = &self.exits.buffer {
            exit(net, id, self.constrained);
        }
        match &buffer.kind {
            BufferKind::Infinite => return self.solve_infinite_buffer(id),
            BufferKind::Procure(_) => return self.solve_procure(id),
            BufferKind::Default => {}
        }
        let st = self.top();
        if st.q_qty == SAFETY_STOCK_ASK {
            return self.solve_safety_stock(id);
        }

        let mark = self.bookmark();
        let mut carried = 0.0;
        let mut tried_requested = false;
        let mut next = Date::INFINITE_FUTURE;
        let mut cost = 0.0;
        let mut penalty = 0.0;
        for _ in 0..MAX_SHORTAGES {
            let Some((date, need)) = self.first_shortage(id, st.q_date, carried) else {
                break;
            };
            if date == st.q_date {
                tried_requested = true;
            }
            if let Some(wait) = self.autofence_wait(id, date) {
                carried += need;
                next = next.min(wait);
                continue;
            }
            if self.merge_batch(id, date, need)? {
                continue;
            }
            let supply = self.create_supply(id, date, need)?;
            cost += supply.cost;
            penalty += supply.penalty;
            if supply.qty >= need - ROUNDING_ERROR {
                continue;
            }
            let short = need - supply.qty;
            carried += short;
            next = next.min(supply.date);
            if self.material_constrained() {
                let recovery = self.recovery_date(id, date);
                self.log(ConstraintKind::MaterialShortage, ConstraintEntity::Buffer(id), date, recovery, short);
            }
        }
        if !tried_requested && is_positive(carried) {
            let supply = self.create_supply(id, st.q_date, carried)?;
            cost += supply.cost;
            penalty += supply.penalty;
        }

        if !self.material_constrained() {
            self.add_cost(cost, penalty);
            self.reply(st.q_qty, st.q_date);
            return Ok(());
        }
        let answered = (st.q_qty - self.stockout_from(id, st.q_date)).clamp(0.0, st.q_qty);
        if !is_positive(answered) {
            self.rollback(mark)?;
        } else {
            self.add_cost(cost, penalty);
        }
        // Retry at the earlier of new supply and existing stock covering
        // the whole ask.
        let next = if answered >= st.q_qty - ROUNDING_ERROR {
            next
        } else {
            next.min(self.extra_inventory_date(id, st.q_date))
        };
        self.reply(answered, next);
        Ok(())
    }

    fn solve_infinite_buffer(&mut self, id: BufferId) -> Result<(), PlanError> {
        let net = self.net;
        let st = self.top();
        let qty = st.q_qty.max(0.0);
        self.add_cost(net.item(net.buffer(id).item).cost * qty, 0.0);
        self.reply(qty, st.q_date);
        Ok(())
    }

    /// Bring the buffer up to its minimum from the current date on, retrying
    /// later where supply cannot arrive in time.
    fn solve_safety_stock(&mut self, id: BufferId) -> Result<(), PlanError> {
        let mut from = self.net.current();
        let mut carried = 0.0;
        for _ in 0..MAX_SHORTAGES {
            let Some((date, need)) = self.first_shortage(id, from, carried) else {
                break;
            };
            let mut at = date;
            let mut supplied = 0.0;
            for _ in 0..MAX_SUPPLY_ROUNDS {
                let supply = self.create_supply(id, at, need - supplied)?;
                supplied += supply.qty;
                if supplied >= need - ROUNDING_ERROR || supply.date.is_infinite() || supply.date <= at {
                    break;
                }
                at = supply.date;
            }
            if supplied < need - ROUNDING_ERROR {
                carried += need - supplied;
            }
            // The gap before the first possible receipt cannot be closed.
            from = at.max(date);
        }
        self.reply(0.0, Date::INFINITE_FUTURE);
        Ok(())
    }

    /// Plan safety stock on every buffer of the cluster with a minimum.
    pub(crate) fn plan_safety_stock(&mut self, buffers: &[BufferId]) -> Result<(), PlanError> {
        let net = self.net;
        self.planning_demand = None;
        for b in buffers {
            let buffer = net.buffer(*b);
            let wanted = match buffer.kind {
                BufferKind::Default => !buffer.minimum.is_zero(),
                BufferKind::Procure(_) => true,
                BufferKind::Infinite => false,
            };
            if !wanted {
                continue;
            }
            tracing::debug!(buffer = %buffer.name, "safety stock");
            self.ask(Solvable::Buffer(*b), SAFETY_STOCK_ASK, net.current(), false, |_| {})?;
        }
        Ok(())
    }

    /// First date at or after `from` where inventory, plus what is already
    /// known to be missing, drops below the minimum.
    fn first_shortage(&self, id: BufferId, from: Date, carried: f64) -> Option<(Date, f64)> {
        net_profile(self.net, self.plan, id, from)
            .into_iter()
            .find(|(_, v)| v + carried < -ROUNDING_ERROR)
            .map(|(d, v)| (d, -(v + carried)))
    }

    /// Deepest stockout at or after `from`.
    pub(crate) fn stockout_from(&self, id: BufferId, from: Date) -> f64 {
        let Some(tl) = self.plan.buffer_timeline(id) else {
            return 0.0;
        };
        let lowest = tl
            .profile_from(from)
            .into_iter()
            .map(|(_, q)| q)
            .fold(f64::INFINITY, f64::min);
        if lowest.is_finite() { (-lowest).max(0.0) } else { 0.0 }
    }

    /// First date after `date` where the buffer is back at its minimum.
    fn recovery_date(&self, id: BufferId, date: Date) -> Date {
        net_profile(self.net, self.plan, id, date)
            .into_iter()
            .find(|(d, v)| *d > date && *v >= -ROUNDING_ERROR)
            .map_or(Date::INFINITE_FUTURE, |(d, _)| d)
    }

    /// First date after `from` from which inventory never again drops
    /// below the minimum.
    fn extra_inventory_date(&self, id: BufferId, from: Date) -> Date {
        let mut date = Date::INFINITE_FUTURE;
        for (d, v) in net_profile(self.net, self.plan, id, from).into_iter().rev() {
            if v < -ROUNDING_ERROR {
                break;
            }
            date = d;
        }
        if date > from { date } else { Date::INFINITE_FUTURE }
    }

    /// First producing event after `from`.
    pub(crate) fn next_supply_date(&self, id: BufferId, from: Date) -> Date {
        self.plan
            .producers(id)
            .into_iter()
            .map(|(_, _, d, _)| d)
            .find(|d| *d > from)
            .unwrap_or(Date::INFINITE_FUTURE)
    }

    /// A locked receipt shortly after the shortage that brings the buffer
    /// back to its minimum is waited for instead of creating new supply.
    fn autofence_wait(&self, id: BufferId, date: Date) -> Option<Date> {
        let fence = self.settings.autofence;
        if fence.is_zero() {
            return None;
        }
        let limit = date + fence;
        let profile = net_profile(self.net, self.plan, id, date);
        self.plan
            .producers(id)
            .into_iter()
            .filter(|(_, _, d, _)| *d > date && *d <= limit)
            .filter(|(p, _, _, _)| self.plan.get(*p).is_some_and(|o| o.is_locked()))
            .map(|(_, _, d, _)| d)
            .find(|d| {
                profile
                    .iter()
                    .rev()
                    .find(|(pd, _)| pd <= d)
                    .is_some_and(|(_, v)| *v >= -ROUNDING_ERROR)
            })
    }

    /// Try to grow a nearby proposed supply instead of adding a new one.
    /// Earlier supplies are tried before later ones.
    fn merge_batch(&mut self, id: BufferId, date: Date, need: f64) -> Result<bool, PlanError> {
        let net = self.net;
        let buffer = net.buffer(id);
        let interval = buffer.min_batching_interval;
        if interval.is_zero() || !self.settings.propagate {
            return Ok(false);
        }
        let Some(producing) = buffer.producing else {
            return Ok(false);
        };
        let (lo, hi) = (date - interval, date + interval);
        let mut candidates: Vec<(OperationPlanId, Date, f64)> = self
            .plan
            .producers(id)
            .into_iter()
            .filter(|(_, _, d, _)| *d >= lo && *d <= hi)
            .filter(|(p, _, _, _)| {
                self.plan
                    .get(*p)
                    .is_some_and(|o| o.owner.is_none() && !o.is_locked() && o.operation == producing)
            })
            .map(|(p, _, d, q)| (p, d, q))
            .collect();
        // backward first, nearest first; then forward
        candidates.sort_by_key(|(_, d, _)| if *d <= date { (0, date - *d) } else { (1, *d - date) });

        for (opplan, at, qty) in candidates {
            let mark = self.bookmark();
            self.plan.delete(self.commands, opplan)?;
            let target = qty + need;
            let when = at.min(date);
            let ans = self.ask(Solvable::Operation(producing), target, when, false, |s| {
                s.cur_buffer = Some(id);
                s.q_date_max = when;
            })?;
            if ans.qty >= target - ROUNDING_ERROR {
                tracing::trace!(buffer = %buffer.name, qty = target, date = %when, "merged supply");
                return Ok(true);
            }
            self.rollback(mark)?;
        }
        Ok(false)
    }

    /// Ask the producing operation for `need` by `date`, repeatedly while
    /// partial supply keeps coming.
    fn create_supply(&mut self, id: BufferId, date: Date, need: f64) -> Result<Answer, PlanError> {
        let net = self.net;
        let mut result = Answer::none(Date::INFINITE_FUTURE);
        if !self.settings.propagate {
            return Ok(result);
        }
        let Some(producing) = net.buffer(id).producing else {
            return Ok(result);
        };
        let lot_limited = net.operation(producing).size_maximum.is_finite();
        for _ in 0..MAX_SUPPLY_ROUNDS {
            let remaining = need - result.qty;
            if !is_positive(remaining) {
                break;
            }
            let ans = self.ask(Solvable::Operation(producing), remaining, date, false, |s| {
                s.cur_buffer = Some(id);
                s.q_date_max = date;
            })?;
            result.cost += ans.cost;
            result.penalty += ans.penalty;
            if !is_positive(ans.qty) {
                result.date = ans.date;
                break;
            }
            result.qty += ans.qty;
            result.date = ans.date;
            if !(self.settings.allow_splits || lot_limited) {
                break;
            }
        }
        Ok(result)
    }
}
