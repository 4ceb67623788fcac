//! Removal of excess supply.
//!
//! [`Cleanup`] deletes or shrinks proposed operationplans that produce more
//! than their buffer will ever consume, and cascades upstream: every buffer
//! an operationplan consumed from is revisited once it is gone. Buffers to
//! visit are kept on a stack without duplicates.

use super::buffer::net_profile;
use crate::buffer::BufferKind;
use crate::command::CommandManager;
use crate::error::PlanError;
use crate::id::*;
use crate::network::Network;
use crate::plan::ClusterPlan;
use crate::quantity::{ROUNDING_ERROR, is_positive};

/// Buffers visited per drain before giving up.
const MAX_VISITS: usize = 10_000;

pub struct Cleanup<'a> {
    net: &'a Network,
    plan: &'a mut ClusterPlan,
    commands: &'a mut CommandManager,
    pending: Vec<BufferId>,
    /// Also delete proposed consumers of buffers left below zero.
    resolve_shortages: bool,
    changed: usize,
}

impl<'a> Cleanup<'a> {
    pub fn new(net: &'a Network, plan: &'a mut ClusterPlan, commands: &'a mut CommandManager) -> Self {
        Self {
            net,
            plan,
            commands,
            pending: Vec::new(),
            resolve_shortages: true,
            changed: 0,
        }
    }

    /// Visit every buffer of the cluster. Returns the number of
    /// operationplans deleted or shrunk.
    pub fn solve_all(&mut self) -> Result<usize, PlanError> {
        let Some(def) = self.net.cluster(self.plan.id()) else {
            return Ok(0);
        };
        for b in def.buffers.iter().rev() {
            self.push(*b);
        }
        self.drain()
    }

    /// Delete the deliveries of a demand and whatever supply only they
    /// needed.
    pub fn solve_demand(&mut self, demand: DemandId) -> Result<usize, PlanError> {
        for id in self.plan.deliveries(demand).to_vec() {
            self.delete_tree(id)?;
        }
        self.drain()
    }

    pub fn solve_buffer(&mut self, buffer: BufferId) -> Result<usize, PlanError> {
        self.push(buffer);
        self.drain()
    }

    /// Revisit the buffers supplied by operationplans loading a resource.
    /// Nothing is deleted on the resource itself.
    pub fn solve_resource(&mut self, resource: ResourceId) -> Result<usize, PlanError> {
        let owners = self
            .plan
            .resource_timeline(resource)
            .map(|tl| tl.owners())
            .unwrap_or_default();
        for id in owners {
            let top = self.plan.top_of(id);
            for b in self.touched_buffers(top, true) {
                self.push(b);
            }
        }
        self.drain()
    }

    /// Delete an operationplan tree and cascade to the buffers it consumed
    /// from.
    pub fn delete_operationplan(&mut self, id: OperationPlanId) -> Result<usize, PlanError> {
        let top = self.plan.top_of(id);
        self.delete_tree(top)?;
        self.drain()
    }

    /// Delete the freshly created operationplans whose production is not
    /// needed by anything. Shortages are left alone.
    pub(crate) fn deny_excess(&mut self, created: &[OperationPlanId]) -> Result<usize, PlanError> {
        self.resolve_shortages = false;
        let mut buffers = Vec::new();
        for id in created {
            let Some(o) = self.plan.get(*id) else { continue };
            if o.owner.is_some() {
                continue;
            }
            for b in self.touched_buffers(*id, true) {
                if !buffers.contains(&b) {
                    buffers.push(b);
                }
            }
        }
        for b in buffers {
            self.push(b);
        }
        let result = self.drain();
        self.resolve_shortages = true;
        result
    }

    fn push(&mut self, buffer: BufferId) {
        if !self.pending.contains(&buffer) {
            self.pending.push(buffer);
        }
    }

    fn drain(&mut self) -> Result<usize, PlanError> {
        let mut visits = 0;
        while let Some(b) = self.pending.pop() {
            visits += 1;
            if visits > MAX_VISITS {
                tracing::warn!(event = "cleanup_aborted", visits, "cleanup did not converge");
                self.pending.clear();
                break;
            }
            self.visit(b)?;
        }
        Ok(std::mem::take(&mut self.changed))
    }

    fn visit(&mut self, buffer: BufferId) -> Result<(), PlanError> {
        let net = self.net;
        let b = net.buffer(buffer);
        if matches!(b.kind, BufferKind::Procure(_) | BufferKind::Infinite) {
            return Ok(());
        }

        let mut producers = self.plan.producers(buffer);
        producers.reverse();
        for (id, _, date, _) in producers {
            let top = self.plan.top_of(id);
            let Some(o) = self.plan.get(top) else { continue };
            if o.is_locked() || net.operation(o.operation).is_delivery() {
                continue;
            }
            let produced = self.plan.get(id).map_or(0.0, |p| p.produced_into(buffer));
            if !is_positive(produced) {
                continue;
            }
            let excess = net_profile(net, self.plan, buffer, date)
                .into_iter()
                .map(|(_, v)| v)
                .fold(f64::INFINITY, f64::min);
            if !excess.is_finite() || excess < ROUNDING_ERROR {
                continue;
            }
            if excess >= produced - ROUNDING_ERROR {
                tracing::trace!(buffer = %b.name, qty = produced, "deleting excess supply");
                self.delete_tree(top)?;
                continue;
            }
            let (qty, operation) = (o.quantity, o.operation);
            let wanted = net
                .operation(operation)
                .size_quantity(qty * (produced - excess) / produced, false);
            if wanted < qty - ROUNDING_ERROR {
                let upstream = self.touched_buffers(top, false);
                self.plan.resize(net, self.commands, top, wanted, true)?;
                self.changed += 1;
                for u in upstream {
                    self.push(u);
                }
            }
        }

        if self.resolve_shortages {
            for (id, _, date, _) in self.plan.consumers(buffer) {
                if self.plan.onhand(buffer, date) >= -ROUNDING_ERROR {
                    continue;
                }
                let top = self.plan.top_of(id);
                let Some(o) = self.plan.get(top) else { continue };
                if o.is_locked() || net.operation(o.operation).is_delivery() {
                    continue;
                }
                self.delete_tree(top)?;
            }
        }
        Ok(())
    }

    /// Buffers an operationplan tree consumes from, and with `produced`
    /// also the ones it produces into.
    fn touched_buffers(&self, top: OperationPlanId, produced: bool) -> Vec<BufferId> {
        let mut out = Vec::new();
        for id in self.plan.descendants(top) {
            let Some(o) = self.plan.get(id) else { continue };
            for fp in &o.flowplans {
                let wanted = fp.quantity < 0.0 || (produced && fp.quantity > 0.0);
                if wanted && !out.contains(&fp.buffer) {
                    out.push(fp.buffer);
                }
            }
        }
        out
    }

    fn delete_tree(&mut self, top: OperationPlanId) -> Result<(), PlanError> {
        let Some(o) = self.plan.get(top) else {
            return Ok(());
        };
        if o.is_locked() {
            return Ok(());
        }
        let upstream = self.touched_buffers(top, false);
        self.plan.delete(self.commands, top)?;
        self.changed += 1;
        for b in upstream {
            self.push(b);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{NewPlan, Plan};
    use crate::test_utils::*;

    #[test]
    fn unneeded_supply_is_deleted_with_its_upstream() {
        let net = two_level_network();
        let mut plan = Plan::new(&net);
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        let mut cmds = CommandManager::new();
        let make = make_op(&net);
        let buy = net.operation_id("buy steel").unwrap();
        cp.create(&net, &mut cmds, NewPlan::ending(make, 10.0, day(10))).unwrap();
        cp.create(&net, &mut cmds, NewPlan::ending(buy, 20.0, day(9))).unwrap();
        let deleted = Cleanup::new(&net, cp, &mut cmds).solve_buffer(widget_buffer(&net)).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(cp.operationplan_count(), 0);
    }

    #[test]
    fn partially_needed_supply_is_shrunk() {
        let net = single_step_network(0.0);
        let mut plan = Plan::new(&net);
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        let mut cmds = CommandManager::new();
        let ship = net.demand(order(&net)).operation.unwrap();
        let make = cp.create(&net, &mut cmds, NewPlan::ending(make_op(&net), 150.0, day(10))).unwrap();
        cp.create(&net, &mut cmds, NewPlan::ending(ship, 100.0, day(10))).unwrap();
        let changed = Cleanup::new(&net, cp, &mut cmds).solve_all().unwrap();
        assert_eq!(changed, 1);
        assert_eq!(cp.get(make).unwrap().quantity, 100.0);
    }

    #[test]
    fn cleanup_of_a_clean_plan_records_nothing() {
        let net = single_step_network(0.0);
        let mut plan = solve(&net, constrained());
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        let mut cmds = CommandManager::new();
        let changed = Cleanup::new(&net, cp, &mut cmds).solve_all().unwrap();
        assert_eq!(changed, 0);
        assert!(cmds.is_empty());
    }

    #[test]
    fn deleting_a_delivery_cascades_upstream() {
        let net = two_level_network();
        let mut plan = solve(&net, constrained());
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        assert!(cp.operationplan_count() >= 3);
        let mut cmds = CommandManager::new();
        Cleanup::new(&net, cp, &mut cmds).solve_demand(order(&net)).unwrap();
        assert_eq!(cp.operationplan_count(), 0);
    }

    #[test]
    fn locked_supply_survives() {
        let net = single_step_network(0.0);
        let mut plan = Plan::new(&net);
        plan.add_operationplan(
            &net,
            NewPlan::ending(make_op(&net), 50.0, day(3)).with_status(crate::plan::PlanStatus::Approved),
        )
        .unwrap();
        let cp = plan.cluster_mut(ClusterId(0)).unwrap();
        let mut cmds = CommandManager::new();
        assert_eq!(Cleanup::new(&net, cp, &mut cmds).solve_all().unwrap(), 0);
        assert_eq!(cp.operationplan_count(), 1);
    }
}
