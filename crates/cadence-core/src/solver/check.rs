//! Verification of a freshly created operationplan against lead time,
//! capacity and material, resizing or moving it until it fits.

use super::{Answer, Solvable, Solver};
use crate::constraint::{ConstraintEntity, ConstraintKind};
use crate::error::PlanError;
use crate::id::*;
use crate::quantity::{ROUNDING_ERROR, is_positive};
use crate::time::Date;

/// Passes before an operationplan that keeps moving is given up.
const MAX_PASSES: usize = 32;
/// Share of the capacity cost charged as penalty when capacity pulls an
/// operationplan earlier than asked.
const BUILD_AHEAD_PENALTY: f64 = 0.05;

pub(crate) struct CapacityCheck {
    pub ok: bool,
    pub next: Date,
    pub cost: f64,
    pub penalty: f64,
}

struct MaterialCheck {
    /// Smallest fraction of the asked material any consumer got.
    ratio: f64,
    /// End date at which the short material would be available.
    next_end: Date,
    cost: f64,
    penalty: f64,
}

impl Solver<'_> {
    /// Check operationplan `id`, allowed to end no later than `max_end`.
    ///
    /// Returns the quantity kept (zero when nothing fits) and, when short,
    /// the earliest end date at which a retry could succeed.
    pub(crate) fn check_operation(&mut self, id: OperationPlanId, max_end: Date) -> Result<Answer, PlanError> {
        let net = self.net;
        let orig_end = self.plan.plan(id)?.end;
        let mut next = Date::INFINITE_FUTURE;
        let mut pulled_earlier = false;

        for _ in 0..MAX_PASSES {
            let (qty, end, operation) = {
                let o = self.plan.plan(id)?;
                (o.quantity, o.end, o.operation)
            };
            if !is_positive(qty) {
                break;
            }
            let mark = self.bookmark();

            if let Some(retry) = self.check_lead_time(id)? {
                next = next.min(retry);
                break;
            }

            let cap = self.check_capacity(id, max_end, false)?;
            if !cap.ok {
                self.rollback(mark)?;
                if !cap.next.is_infinite() && cap.next > end && cap.next <= max_end {
                    self.plan.move_end(net, self.commands, id, cap.next)?;
                    continue;
                }
                next = next.min(cap.next);
                break;
            }
            if self.plan.plan(id)?.end < orig_end {
                pulled_earlier = true;
            }

            let mat = self.check_material(id)?;
            if mat.ratio >= 1.0 - ROUNDING_ERROR {
                return Ok(Answer {
                    qty: self.plan.plan(id)?.quantity,
                    date: next,
                    cost: cap.cost + mat.cost,
                    penalty: cap.penalty + mat.penalty,
                });
            }
            self.rollback(mark)?;
            next = next.min(mat.next_end);

            let op = net.operation(operation);
            if self.settings.allow_splits && mat.ratio > ROUNDING_ERROR {
                let smaller = op.size_quantity(qty * mat.ratio, true);
                if is_positive(smaller) && smaller < qty - ROUNDING_ERROR {
                    self.plan.resize(net, self.commands, id, smaller, true)?;
                    continue;
                }
            }
            if !mat.next_end.is_infinite() && mat.next_end > end && mat.next_end <= max_end {
                self.plan.move_end(net, self.commands, id, mat.next_end)?;
                continue;
            }
            break;
        }

        // Capacity may have pulled the plan earlier than material allows.
        // Check once more from the original date, searching only later.
        if pulled_earlier && next <= orig_end {
            next = self.late_recheck(id, orig_end)?;
        }
        Ok(Answer::none(next))
    }

    /// `Some(retry end)` when the operationplan would start before the
    /// current date or inside its release fence and cannot be shrunk to fit.
    fn check_lead_time(&mut self, id: OperationPlanId) -> Result<Option<Date>, PlanError> {
        if !(self.leadtime_constrained() || self.fence_constrained()) {
            return Ok(None);
        }
        let net = self.net;
        let (operation, qty, start, end, earliest, locked, leaf) = {
            let o = self.plan.plan(id)?;
            let earliest = o.loadplans.iter().map(|lp| lp.setup_start).fold(o.start, Date::min);
            (
                o.operation,
                o.quantity,
                o.start,
                o.end,
                earliest,
                o.is_locked(),
                o.children.is_empty(),
            )
        };
        if locked {
            return Ok(None);
        }
        let op = net.operation(operation);
        let now = net.current();
        let mut threshold = Date::INFINITE_PAST;
        if self.leadtime_constrained() {
            threshold = now;
        }
        if self.fence_constrained() {
            threshold = threshold.max(now + op.fence);
        }
        if earliest >= threshold {
            return Ok(None);
        }

        let setup_lead = start - earliest;
        if self.settings.allow_splits && leaf {
            let window = end - (threshold + setup_lead);
            let fit = op.size_quantity(op.fit_quantity(window).min(qty), true);
            if is_positive(fit) && fit < qty - ROUNDING_ERROR {
                self.plan.resize(net, self.commands, id, fit, true)?;
                return Ok(None);
            }
        }
        let kind = if threshold == now {
            ConstraintKind::BeforeCurrent
        } else {
            ConstraintKind::BeforeFence
        };
        self.log(kind, ConstraintEntity::Operation(operation), earliest, threshold, qty);
        Ok(Some(threshold + setup_lead + (end - start)))
    }

    /// Ask every load of the operationplan for capacity. Loads may move the
    /// operationplan; the check restarts whenever they do, and only the
    /// costs of the last pass count. Ending earlier than on entry adds the
    /// build-ahead penalty.
    pub(crate) fn check_capacity(
        &mut self,
        id: OperationPlanId,
        max_end: Date,
        force_late: bool,
    ) -> Result<CapacityCheck, PlanError> {
        let mut result = CapacityCheck {
            ok: true,
            next: Date::INFINITE_FUTURE,
            cost: 0.0,
            penalty: 0.0,
        };
        let asked_end = self.plan.plan(id)?.end;
        for _ in 0..MAX_PASSES {
            let before = self.dims(id)?;
            let count = self.plan.plan(id)?.loadplans.len();
            result.cost = 0.0;
            result.penalty = 0.0;
            let mut moved = false;
            for idx in 0..count {
                let (load, qty, end) = {
                    let o = self.plan.plan(id)?;
                    let Some(lp) = o.loadplans.get(idx) else { continue };
                    (lp.load, lp.quantity, o.end)
                };
                if !is_positive(qty) {
                    continue;
                }
                let ans = self.ask(Solvable::Load(load), qty, end, false, |s| {
                    s.q_operationplan = Some(id);
                    s.q_loadplan = Some(idx);
                    s.q_date_max = max_end;
                    s.force_late = force_late;
                })?;
                result.cost += ans.cost;
                result.penalty += ans.penalty;
                if !is_positive(ans.qty) {
                    result.ok = false;
                    result.next = ans.date;
                    return Ok(result);
                }
                if self.dims(id)? != before {
                    moved = true;
                    break;
                }
            }
            if !moved {
                break;
            }
        }
        if self.plan.plan(id)?.end < asked_end {
            result.penalty += BUILD_AHEAD_PENALTY * result.cost;
        }
        Ok(result)
    }

    fn check_material(&mut self, id: OperationPlanId) -> Result<MaterialCheck, PlanError> {
        let net = self.net;
        let (end, flowplans) = {
            let o = self.plan.plan(id)?;
            (o.end, o.flowplans.len())
        };
        let mut check = MaterialCheck {
            ratio: 1.0,
            next_end: Date::INFINITE_FUTURE,
            cost: 0.0,
            penalty: 0.0,
        };
        for idx in 0..flowplans {
            // Read the need at ask time: an earlier flow may have shrunk the plan.
            let Some((flow, qty, date)) = self.consumed(id, idx)? else {
                continue;
            };
            let ans = self.ask(Solvable::Flow(flow), qty, date, false, |s| {
                s.q_operationplan = Some(id);
                s.q_flowplan = Some(idx);
            })?;
            check.cost += ans.cost;
            check.penalty += ans.penalty;
            // A flow alternate may shrink the plan to what it could supply.
            let need = self.consumed(id, idx)?.map_or(0.0, |(_, q, _)| q.min(qty));
            if ans.qty >= need - ROUNDING_ERROR {
                continue;
            }
            let ratio = if net.flow(flow).kind.is_fixed() { 0.0 } else { ans.qty / qty };
            check.ratio = check.ratio.min(ratio);
            if !ans.date.is_infinite() && ans.date > date {
                check.next_end = check.next_end.min(end + (ans.date - date));
            }
            if check.ratio <= ROUNDING_ERROR {
                break;
            }
        }
        Ok(check)
    }

    /// Flow, quantity and date of flowplan `idx` if it consumes material.
    fn consumed(
        &self,
        id: OperationPlanId,
        idx: usize,
    ) -> Result<Option<(FlowId, f64, Date)>, PlanError> {
        let o = self.plan.plan(id)?;
        Ok(o.flowplans
            .get(idx)
            .filter(|fp| fp.quantity < -ROUNDING_ERROR)
            .map(|fp| (fp.flow, -fp.quantity, fp.date)))
    }

    /// Next feasible end when capacity is searched only after `orig_end`.
    fn late_recheck(&mut self, id: OperationPlanId, orig_end: Date) -> Result<Date, PlanError> {
        let net = self.net;
        let mark = self.bookmark();
        self.plan.move_end(net, self.commands, id, orig_end)?;
        let cap = self.silently(|s| s.check_capacity(id, Date::INFINITE_FUTURE, true))?;
        let end = self.plan.plan(id)?.end;
        self.rollback(mark)?;
        Ok(if cap.ok { end } else { cap.next })
    }

    fn dims(&self, id: OperationPlanId) -> Result<(f64, Date, Date), PlanError> {
        let o = self.plan.plan(id)?;
        Ok((o.quantity, o.start, o.end))
    }
}
