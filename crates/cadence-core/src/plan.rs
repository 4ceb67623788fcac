//! Operationplans and the plan holding them.
//!
//! The plan is partitioned by cluster: each [`ClusterPlan`] owns the
//! operationplans, buffer and resource timelines, demand deliveries and
//! constraint logs of one cluster, so cluster workers never share mutable
//! state. Every change to an operationplan is recorded in a
//! [`CommandManager`] and can be rolled back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::command::{Command, CommandManager, PlanStore};
use crate::constraint::ConstraintLog;
use crate::error::PlanError;
use crate::id::*;
use crate::network::{ClusterDef, Network};
use crate::quantity::is_zero;
use crate::resource::ResourceKind;
use crate::time::{Date, Duration};
use crate::timeline::{
    EventKey, EventOwner, ORDER_CLAIM, ORDER_CONSUME, ORDER_PRODUCE, ORDER_RELEASE, Timeline,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanStatus {
    #[default]
    Proposed,
    Approved,
    Confirmed,
    Completed,
}

impl PlanStatus {
    /// Locked operationplans are never moved, resized or deleted by the
    /// solvers.
    pub fn is_locked(self) -> bool {
        self != PlanStatus::Proposed
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowPlan {
    pub flow: FlowId,
    pub buffer: BufferId,
    /// Negative consumes, positive produces.
    pub quantity: f64,
    pub date: Date,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadPlan {
    pub load: LoadId,
    pub resource: ResourceId,
    pub quantity: f64,
    pub start: Date,
    pub end: Date,
    pub setup: Option<String>,
    /// Start of the changeover preceding this loadplan. Equal to `start`
    /// when no changeover is needed.
    pub setup_start: Date,
    pub(crate) bucketed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationPlan {
    pub operation: OperationId,
    pub quantity: f64,
    pub start: Date,
    pub end: Date,
    pub status: PlanStatus,
    pub owner: Option<OperationPlanId>,
    pub children: Vec<OperationPlanId>,
    pub demand: Option<DemandId>,
    pub flowplans: Vec<FlowPlan>,
    pub loadplans: Vec<LoadPlan>,
    pub(crate) active: bool,
    pub(crate) serial: u64,
}

impl OperationPlan {
    pub fn is_locked(&self) -> bool {
        self.status.is_locked()
    }

    /// Creation order within the cluster.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Quantity this operationplan puts into `buffer`.
    pub fn produced_into(&self, buffer: BufferId) -> f64 {
        self.flowplans
            .iter()
            .filter(|fp| fp.buffer == buffer && fp.quantity > 0.0)
            .map(|fp| fp.quantity)
            .sum()
    }
}

/// Parameters of a new operationplan. When both dates are given the end
/// date wins.
#[derive(Debug, Clone)]
pub struct NewPlan {
    pub operation: OperationId,
    pub quantity: f64,
    pub start: Option<Date>,
    pub end: Option<Date>,
    pub owner: Option<OperationPlanId>,
    pub demand: Option<DemandId>,
    pub status: PlanStatus,
}

impl NewPlan {
    pub fn ending(operation: OperationId, quantity: f64, end: Date) -> Self {
        Self {
            operation,
            quantity,
            start: None,
            end: Some(end),
            owner: None,
            demand: None,
            status: PlanStatus::Proposed,
        }
    }

    pub fn starting(operation: OperationId, quantity: f64, start: Date) -> Self {
        Self {
            start: Some(start),
            end: None,
            ..Self::ending(operation, quantity, start)
        }
    }

    pub fn with_owner(mut self, owner: Option<OperationPlanId>) -> Self {
        self.owner = owner;
        self
    }

    pub fn for_demand(mut self, demand: Option<DemandId>) -> Self {
        self.demand = demand;
        self
    }

    pub fn with_status(mut self, status: PlanStatus) -> Self {
        self.status = status;
        self
    }
}

// ---------------------------------------------------------------------------
// ClusterPlan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ClusterPlan {
    id: ClusterId,
    operationplans: SlotMap<OperationPlanId, OperationPlan>,
    buffers: BTreeMap<BufferId, Timeline>,
    resources: BTreeMap<ResourceId, Timeline>,
    deliveries: BTreeMap<DemandId, Vec<OperationPlanId>>,
    constraints: BTreeMap<DemandId, ConstraintLog>,
    next_serial: u64,
    /// Next candidate offset per load when resources are rotated.
    pub(crate) rotation: BTreeMap<LoadId, usize>,
}

impl ClusterPlan {
    pub fn new(net: &Network, id: ClusterId, def: &ClusterDef) -> Self {
        let mut buffers = BTreeMap::new();
        for b in &def.buffers {
            let mut tl = Timeline::new();
            let onhand = net.buffer(*b).onhand;
            if !is_zero(onhand) {
                tl.insert(
                    EventKey {
                        date: Date::INFINITE_PAST,
                        order: ORDER_PRODUCE,
                        owner: EventOwner::Initial,
                    },
                    onhand,
                );
            }
            buffers.insert(*b, tl);
        }
        let resources = def.resources.iter().map(|r| (*r, Timeline::new())).collect();
        Self {
            id,
            operationplans: SlotMap::with_key(),
            buffers,
            resources,
            deliveries: BTreeMap::new(),
            constraints: BTreeMap::new(),
            next_serial: 0,
            rotation: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> ClusterId {
        self.id
    }

    /// An active operationplan.
    pub fn get(&self, id: OperationPlanId) -> Option<&OperationPlan> {
        self.operationplans.get(id).filter(|o| o.active)
    }

    pub(crate) fn plan(&self, id: OperationPlanId) -> Result<&OperationPlan, PlanError> {
        self.get(id).ok_or(PlanError::UnknownOperationPlan)
    }

    pub fn operationplan_count(&self) -> usize {
        self.operationplans.values().filter(|o| o.active).count()
    }

    /// Active operationplans in creation order.
    pub fn operationplans(&self) -> Vec<(OperationPlanId, &OperationPlan)> {
        let mut out: Vec<_> = self.operationplans.iter().filter(|(_, o)| o.active).collect();
        out.sort_by_key(|(_, o)| o.serial);
        out
    }

    pub fn buffer_timeline(&self, buffer: BufferId) -> Option<&Timeline> {
        self.buffers.get(&buffer)
    }

    pub fn resource_timeline(&self, resource: ResourceId) -> Option<&Timeline> {
        self.resources.get(&resource)
    }

    pub fn onhand(&self, buffer: BufferId, date: Date) -> f64 {
        self.buffers.get(&buffer).map_or(0.0, |t| t.onhand_at(date))
    }

    /// Capacity in use on a continuous resource at `date`.
    pub fn load_at(&self, resource: ResourceId, date: Date) -> f64 {
        self.resources.get(&resource).map_or(0.0, |t| t.onhand_at(date))
    }

    /// Delivery operationplans of a demand, in creation order.
    pub fn deliveries(&self, demand: DemandId) -> &[OperationPlanId] {
        self.deliveries.get(&demand).map_or(&[], Vec::as_slice)
    }

    pub fn planned_quantity(&self, demand: DemandId) -> f64 {
        self.deliveries(demand)
            .iter()
            .filter_map(|id| self.get(*id))
            .map(|o| o.quantity)
            .sum()
    }

    pub fn constraints(&self, demand: DemandId) -> Option<&ConstraintLog> {
        self.constraints.get(&demand)
    }

    /// Constraint logs of the cluster's demands, in demand id order.
    pub fn constraint_logs(&self) -> impl Iterator<Item = (DemandId, &ConstraintLog)> {
        self.constraints.iter().map(|(d, log)| (*d, log))
    }

    pub(crate) fn constraints_mut(&mut self, demand: DemandId) -> &mut ConstraintLog {
        self.constraints.entry(demand).or_default()
    }

    pub fn top_of(&self, id: OperationPlanId) -> OperationPlanId {
        let mut cur = id;
        while let Some(owner) = self.operationplans.get(cur).and_then(|o| o.owner) {
            cur = owner;
        }
        cur
    }

    /// `id` followed by all of its descendants, depth first.
    pub fn descendants(&self, id: OperationPlanId) -> Vec<OperationPlanId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            out.push(cur);
            if let Some(o) = self.operationplans.get(cur) {
                stack.extend(o.children.iter().rev().copied());
            }
        }
        out
    }

    /// Active operationplans of an operation, in creation order.
    pub fn operationplans_of(&self, operation: OperationId) -> Vec<OperationPlanId> {
        self.operationplans()
            .into_iter()
            .filter(|(_, o)| o.operation == operation)
            .map(|(id, _)| id)
            .collect()
    }

    /// Producing flowplans on a buffer as `(operationplan, flowplan index,
    /// date, quantity)`, ordered by date.
    pub fn producers(&self, buffer: BufferId) -> Vec<(OperationPlanId, usize, Date, f64)> {
        let Some(tl) = self.buffers.get(&buffer) else {
            return Vec::new();
        };
        tl.events()
            .filter(|(_, q)| *q > 0.0)
            .filter_map(|(k, q)| match k.owner {
                EventOwner::Plan(id, idx) => Some((id, idx as usize, k.date, q)),
                EventOwner::Initial => None,
            })
            .collect()
    }

    /// Consuming flowplans on a buffer, same shape as [`producers`](Self::producers).
    pub fn consumers(&self, buffer: BufferId) -> Vec<(OperationPlanId, usize, Date, f64)> {
        let Some(tl) = self.buffers.get(&buffer) else {
            return Vec::new();
        };
        tl.events()
            .filter(|(_, q)| *q < 0.0)
            .filter_map(|(k, q)| match k.owner {
                EventOwner::Plan(id, idx) => Some((id, idx as usize, k.date, q)),
                EventOwner::Initial => None,
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Recorded mutations
    // -----------------------------------------------------------------------

    pub fn create(
        &mut self,
        net: &Network,
        commands: &mut CommandManager,
        request: NewPlan,
    ) -> Result<OperationPlanId, PlanError> {
        if let Some(owner) = request.owner {
            self.plan(owner)?;
        }
        let op = net.operation(request.operation);
        let qty = request.quantity.max(0.0);
        let (start, end) = match (request.start, request.end) {
            (_, Some(e)) => op.dates_ending(qty, e),
            (Some(s), None) => op.dates_starting(qty, s),
            (None, None) => op.dates_starting(qty, net.current()),
        };
        let flowplans = build_flowplans(net, request.operation, qty, start, end);
        let loadplans = build_loadplans(net, request.operation, qty, start);
        let serial = self.next_serial;
        self.next_serial += 1;
        let mut plan = OperationPlan {
            operation: request.operation,
            quantity: qty,
            start,
            end,
            status: request.status,
            owner: request.owner,
            children: Vec::new(),
            demand: request.demand,
            flowplans,
            loadplans,
            active: true,
            serial,
        };
        for lp in &mut plan.loadplans {
            lp.end = end;
        }
        let id = self.operationplans.insert(plan);
        if let Some(owner) = request.owner
            && let Some(o) = self.operationplans.get_mut(owner)
        {
            o.children.push(id);
        }
        self.index(id);
        commands.record(Command::CreateOperationPlan {
            cluster: self.id,
            id,
        });
        Ok(id)
    }

    fn apply<F>(
        &mut self,
        net: &Network,
        commands: &mut CommandManager,
        id: OperationPlanId,
        f: F,
    ) -> Result<(), PlanError>
    where
        F: FnOnce(&Network, &mut OperationPlan),
    {
        let before = self.plan(id)?.clone();
        self.unindex(id);
        if let Some(op) = self.operationplans.get_mut(id) {
            f(net, op);
        }
        self.index(id);
        commands.record(Command::MoveOperationPlan {
            cluster: self.id,
            id,
            before: Box::new(before),
        });
        Ok(())
    }

    /// Set quantity and dates of a single operationplan, recomputing its
    /// flowplans and loadplans.
    pub fn set_dims(
        &mut self,
        net: &Network,
        commands: &mut CommandManager,
        id: OperationPlanId,
        quantity: f64,
        start: Date,
        end: Date,
    ) -> Result<(), PlanError> {
        self.apply(net, commands, id, |net, op| {
            op.quantity = quantity.max(0.0);
            op.start = start;
            op.end = end;
            refresh_details(net, op);
        })
    }

    /// Move so that the operationplan ends at `end`. Descendants shift along.
    pub fn move_end(
        &mut self,
        net: &Network,
        commands: &mut CommandManager,
        id: OperationPlanId,
        end: Date,
    ) -> Result<(), PlanError> {
        let op = self.plan(id)?;
        if op.children.is_empty() {
            let qty = op.quantity;
            let (s, e) = net.operation(op.operation).dates_ending(qty, end);
            self.set_dims(net, commands, id, qty, s, e)
        } else {
            let delta = end - op.end;
            self.shift_tree(net, commands, id, delta)
        }
    }

    /// Move so that the operationplan starts at `start`.
    pub fn move_start(
        &mut self,
        net: &Network,
        commands: &mut CommandManager,
        id: OperationPlanId,
        start: Date,
    ) -> Result<(), PlanError> {
        let op = self.plan(id)?;
        if op.children.is_empty() {
            let qty = op.quantity;
            let (s, e) = net.operation(op.operation).dates_starting(qty, start);
            self.set_dims(net, commands, id, qty, s, e)
        } else {
            let delta = start - op.start;
            self.shift_tree(net, commands, id, delta)
        }
    }

    pub fn shift_tree(
        &mut self,
        net: &Network,
        commands: &mut CommandManager,
        id: OperationPlanId,
        delta: Duration,
    ) -> Result<(), PlanError> {
        if delta.is_zero() {
            return Ok(());
        }
        let mark = commands.bookmark();
        for d in self.descendants(id) {
            let Some(o) = self.get(d) else { continue };
            let (qty, s, e) = (o.quantity, o.start + delta, o.end + delta);
            self.set_dims(net, commands, d, qty, s, e)?;
        }
        commands.group_since(mark);
        Ok(())
    }

    /// Change the quantity, keeping either the end or the start date.
    /// Descendants are scaled proportionally.
    pub fn resize(
        &mut self,
        net: &Network,
        commands: &mut CommandManager,
        id: OperationPlanId,
        quantity: f64,
        keep_end: bool,
    ) -> Result<(), PlanError> {
        let op = self.plan(id)?;
        let (old, start, end, operation) = (op.quantity, op.start, op.end, op.operation);
        let children = op.children.clone();
        if children.is_empty() {
            let o = net.operation(operation);
            let (s, e) = if keep_end {
                o.dates_ending(quantity, end)
            } else {
                o.dates_starting(quantity, start)
            };
            return self.set_dims(net, commands, id, quantity, s, e);
        }
        let mark = commands.bookmark();
        let ratio = if is_zero(old) { 1.0 } else { quantity / old };
        for c in children {
            let cq = self.plan(c)?.quantity * ratio;
            self.resize(net, commands, c, cq, keep_end)?;
        }
        self.refresh_span(net, commands, id, Some(quantity))?;
        commands.group_since(mark);
        Ok(())
    }

    /// Stretch a composite operationplan over its children. Leaves plans
    /// without children untouched unless a new quantity is given.
    pub fn refresh_span(
        &mut self,
        net: &Network,
        commands: &mut CommandManager,
        id: OperationPlanId,
        quantity: Option<f64>,
    ) -> Result<(), PlanError> {
        let op = self.plan(id)?;
        let qty = quantity.unwrap_or(op.quantity);
        let mut start = Date::INFINITE_FUTURE;
        let mut end = Date::INFINITE_PAST;
        for c in &op.children {
            if let Some(child) = self.get(*c) {
                start = start.min(child.start);
                end = end.max(child.end);
            }
        }
        if start > end {
            start = op.start;
            end = op.end;
        }
        if start != op.start || end != op.end || qty != op.quantity {
            self.set_dims(net, commands, id, qty, start, end)?;
        }
        Ok(())
    }

    /// Point flowplan `index` at another flow of the same operation.
    pub fn rebind_flow(
        &mut self,
        net: &Network,
        commands: &mut CommandManager,
        id: OperationPlanId,
        index: usize,
        flow: FlowId,
    ) -> Result<(), PlanError> {
        if self.plan(id)?.flowplans.get(index).map(|fp| fp.flow) == Some(flow) {
            return Ok(());
        }
        self.apply(net, commands, id, |net, op| {
            if let Some(fp) = op.flowplans.get_mut(index) {
                fp.flow = flow;
                fp.buffer = net.flow(flow).buffer;
            }
            refresh_details(net, op);
        })
    }

    /// Point loadplan `index` at another load and resource.
    pub fn rebind_load(
        &mut self,
        net: &Network,
        commands: &mut CommandManager,
        id: OperationPlanId,
        index: usize,
        load: LoadId,
        resource: ResourceId,
    ) -> Result<(), PlanError> {
        let current = self.plan(id)?.loadplans.get(index).map(|lp| (lp.load, lp.resource));
        if current == Some((load, resource)) {
            return Ok(());
        }
        self.apply(net, commands, id, |net, op| {
            if let Some(lp) = op.loadplans.get_mut(index) {
                lp.load = load;
                lp.resource = resource;
                lp.setup = net.load(load).setup.clone();
                lp.setup_start = lp.start;
                lp.bucketed = matches!(net.resource(resource).kind, ResourceKind::Buckets(_));
            }
            refresh_details(net, op);
        })
    }

    pub fn set_setup_start(
        &mut self,
        net: &Network,
        commands: &mut CommandManager,
        id: OperationPlanId,
        index: usize,
        setup_start: Date,
    ) -> Result<(), PlanError> {
        if self.plan(id)?.loadplans.get(index).map(|lp| lp.setup_start) == Some(setup_start) {
            return Ok(());
        }
        self.apply(net, commands, id, |_, op| {
            if let Some(lp) = op.loadplans.get_mut(index) {
                lp.setup_start = setup_start;
            }
        })
    }

    pub fn set_status(
        &mut self,
        net: &Network,
        commands: &mut CommandManager,
        id: OperationPlanId,
        status: PlanStatus,
    ) -> Result<(), PlanError> {
        self.apply(net, commands, id, |_, op| op.status = status)
    }

    /// Deactivate an operationplan and its descendants. Deleting an inactive
    /// or unknown operationplan does nothing.
    pub fn delete(&mut self, commands: &mut CommandManager, id: OperationPlanId) -> Result<(), PlanError> {
        if self.get(id).is_none() {
            return Ok(());
        }
        let ids = self.descendants(id);
        let owner = self.operationplans.get(id).and_then(|o| o.owner);
        let detached = owner.and_then(|o| {
            let parent = self.operationplans.get_mut(o)?;
            let pos = parent.children.iter().position(|c| *c == id)?;
            parent.children.remove(pos);
            Some((o, pos))
        });
        for d in &ids {
            self.unindex(*d);
            if let Some(o) = self.operationplans.get_mut(*d) {
                o.active = false;
            }
        }
        commands.record(Command::DeleteOperationPlan {
            cluster: self.id,
            ids,
            detached,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Undo and commit
    // -----------------------------------------------------------------------

    pub(crate) fn undo(&mut self, cmd: Command) -> Result<(), PlanError> {
        match cmd {
            Command::CreateOperationPlan { id, .. } => {
                self.unindex(id);
                if let Some(removed) = self.operationplans.remove(id)
                    && let Some(owner) = removed.owner
                    && let Some(o) = self.operationplans.get_mut(owner)
                {
                    o.children.retain(|c| *c != id);
                }
            }
            Command::MoveOperationPlan { id, before, .. } => {
                self.unindex(id);
                if let Some(o) = self.operationplans.get_mut(id) {
                    let children = std::mem::take(&mut o.children);
                    let (owner, serial, active) = (o.owner, o.serial, o.active);
                    *o = *before;
                    o.children = children;
                    o.owner = owner;
                    o.serial = serial;
                    o.active = active;
                }
                self.index(id);
            }
            Command::DeleteOperationPlan { ids, detached, .. } => {
                for id in &ids {
                    if let Some(o) = self.operationplans.get_mut(*id) {
                        o.active = true;
                    }
                    self.index(*id);
                }
                if let Some((owner, pos)) = detached
                    && let Some(root) = ids.first()
                    && let Some(o) = self.operationplans.get_mut(owner)
                {
                    let pos = pos.min(o.children.len());
                    o.children.insert(pos, *root);
                }
            }
            Command::List(cmds) => {
                for c in cmds.into_iter().rev() {
                    self.undo(c)?;
                }
            }
        }
        Ok(())
    }

    /// Physically remove deleted operationplans.
    pub(crate) fn purge(&mut self, ids: &[OperationPlanId]) {
        for id in ids {
            if self.operationplans.get(*id).is_some_and(|o| !o.active) {
                self.operationplans.remove(*id);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Timeline indexing
    // -----------------------------------------------------------------------

    fn index(&mut self, id: OperationPlanId) {
        let Some(op) = self.operationplans.get(id) else {
            return;
        };
        if !op.active {
            return;
        }
        for (i, fp) in op.flowplans.iter().enumerate() {
            if is_zero(fp.quantity) {
                continue;
            }
            self.buffers
                .entry(fp.buffer)
                .or_default()
                .insert(flow_key(id, i, fp), fp.quantity);
        }
        for (j, lp) in op.loadplans.iter().enumerate() {
            if is_zero(lp.quantity) {
                continue;
            }
            let tl = self.resources.entry(lp.resource).or_default();
            for (key, qty) in load_keys(id, j, lp) {
                tl.insert(key, qty);
            }
        }
        if op.owner.is_none()
            && let Some(d) = op.demand
        {
            let list = self.deliveries.entry(d).or_default();
            if !list.contains(&id) {
                list.push(id);
                let plans = &self.operationplans;
                list.sort_by_key(|x| plans.get(*x).map_or(u64::MAX, |o| o.serial));
            }
        }
    }

    fn unindex(&mut self, id: OperationPlanId) {
        let Some(op) = self.operationplans.get(id) else {
            return;
        };
        for (i, fp) in op.flowplans.iter().enumerate() {
            if let Some(tl) = self.buffers.get_mut(&fp.buffer) {
                tl.remove(&flow_key(id, i, fp));
            }
        }
        for (j, lp) in op.loadplans.iter().enumerate() {
            if let Some(tl) = self.resources.get_mut(&lp.resource) {
                for (key, _) in load_keys(id, j, lp) {
                    tl.remove(&key);
                }
            }
        }
        if let Some(d) = op.demand
            && let Some(list) = self.deliveries.get_mut(&d)
        {
            list.retain(|x| *x != id);
        }
    }
}

fn flow_key(id: OperationPlanId, index: usize, fp: &FlowPlan) -> EventKey {
    EventKey {
        date: fp.date,
        order: if fp.quantity > 0.0 { ORDER_PRODUCE } else { ORDER_CONSUME },
        owner: EventOwner::Plan(id, index as u16),
    }
}

fn load_keys(id: OperationPlanId, index: usize, lp: &LoadPlan) -> Vec<(EventKey, f64)> {
    let owner = EventOwner::Plan(id, index as u16);
    if lp.bucketed {
        vec![(
            EventKey {
                date: lp.start,
                order: ORDER_CLAIM,
                owner,
            },
            lp.quantity,
        )]
    } else {
        vec![
            (
                EventKey {
                    date: lp.setup_start,
                    order: ORDER_CLAIM,
                    owner,
                },
                lp.quantity,
            ),
            (
                EventKey {
                    date: lp.end,
                    order: ORDER_RELEASE,
                    owner,
                },
                -lp.quantity,
            ),
        ]
    }
}

/// Pick one flow per alternate group: the lowest priority number effective
/// at the flow's date.
fn build_flowplans(
    net: &Network,
    operation: OperationId,
    qty: f64,
    start: Date,
    end: Date,
) -> Vec<FlowPlan> {
    let op = net.operation(operation);
    let mut out = Vec::new();
    let mut seen_groups: Vec<&str> = Vec::new();
    for fid in op.flows() {
        let flow = net.flow(*fid);
        let date = if flow.kind.at_end() { end } else { start };
        if !flow.effective.contains(date) {
            continue;
        }
        let chosen = match &flow.group {
            None => *fid,
            Some(g) => {
                if seen_groups.contains(&g.as_str()) {
                    continue;
                }
                seen_groups.push(g.as_str());
                op.flows()
                    .iter()
                    .copied()
                    .filter(|f| {
                        let alt = net.flow(*f);
                        alt.group.as_deref() == Some(g.as_str()) && alt.effective.contains(date)
                    })
                    .min_by_key(|f| (net.flow(*f).priority, *f))
                    .unwrap_or(*fid)
            }
        };
        let flow = net.flow(chosen);
        out.push(FlowPlan {
            flow: chosen,
            buffer: flow.buffer,
            quantity: flow.quantity_for(qty),
            date,
        });
    }
    out
}

fn build_loadplans(net: &Network, operation: OperationId, qty: f64, start: Date) -> Vec<LoadPlan> {
    let op = net.operation(operation);
    let mut out = Vec::new();
    let mut seen_groups: Vec<&str> = Vec::new();
    for lid in op.loads() {
        let load = net.load(*lid);
        if !load.effective.contains(start) {
            continue;
        }
        let chosen = match &load.group {
            None => *lid,
            Some(g) => {
                if seen_groups.contains(&g.as_str()) {
                    continue;
                }
                seen_groups.push(g.as_str());
                op.loads()
                    .iter()
                    .copied()
                    .filter(|l| {
                        let alt = net.load(*l);
                        alt.group.as_deref() == Some(g.as_str()) && alt.effective.contains(start)
                    })
                    .min_by_key(|l| (net.load(*l).priority, *l))
                    .unwrap_or(*lid)
            }
        };
        let load = net.load(chosen);
        let resource = initial_resource(net, chosen, start);
        out.push(LoadPlan {
            load: chosen,
            resource,
            quantity: load_quantity(net, chosen, resource, qty),
            start,
            end: start,
            setup: load.setup.clone(),
            setup_start: start,
            bucketed: matches!(net.resource(resource).kind, ResourceKind::Buckets(_)),
        });
    }
    out
}

/// First qualified leaf resource of a load.
pub(crate) fn initial_resource(net: &Network, load: LoadId, at: Date) -> ResourceId {
    let l = net.load(load);
    net.leaf_resources(l.resource)
        .into_iter()
        .find(|r| l.skill.is_none_or(|s| net.resource(*r).skill_priority(s, at).is_some()))
        .unwrap_or(l.resource)
}

pub(crate) fn load_quantity(net: &Network, load: LoadId, resource: ResourceId, qty: f64) -> f64 {
    if is_zero(qty) {
        return 0.0;
    }
    let l = net.load(load);
    match net.resource(resource).kind {
        ResourceKind::Buckets(_) => l.quantity * qty,
        _ => l.quantity,
    }
}

fn refresh_details(net: &Network, op: &mut OperationPlan) {
    for fp in &mut op.flowplans {
        let flow = net.flow(fp.flow);
        fp.quantity = flow.quantity_for(op.quantity);
        fp.date = if flow.kind.at_end() { op.end } else { op.start };
    }
    for lp in &mut op.loadplans {
        let lead = lp.start - lp.setup_start;
        lp.start = op.start;
        lp.end = op.end;
        lp.setup_start = op.start - lead;
        lp.quantity = load_quantity(net, lp.load, lp.resource, op.quantity);
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// The complete plan: one [`ClusterPlan`] per network cluster.
#[derive(Debug, Clone)]
pub struct Plan {
    clusters: Vec<ClusterPlan>,
}

impl Plan {
    pub fn new(net: &Network) -> Self {
        Self {
            clusters: net
                .clusters()
                .map(|(id, def)| ClusterPlan::new(net, id, def))
                .collect(),
        }
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&ClusterPlan> {
        self.clusters.get(id.index())
    }

    pub fn cluster_mut(&mut self, id: ClusterId) -> Option<&mut ClusterPlan> {
        self.clusters.get_mut(id.index())
    }

    pub fn clusters(&self) -> &[ClusterPlan] {
        &self.clusters
    }

    pub fn clusters_mut(&mut self) -> &mut [ClusterPlan] {
        &mut self.clusters
    }

    pub fn operationplan_count(&self) -> usize {
        self.clusters.iter().map(ClusterPlan::operationplan_count).sum()
    }

    fn demand_cluster(&self, net: &Network, demand: DemandId) -> Option<&ClusterPlan> {
        net.get_demand(demand).and_then(|d| self.cluster(d.cluster()))
    }

    pub fn deliveries(&self, net: &Network, demand: DemandId) -> Vec<&OperationPlan> {
        self.demand_cluster(net, demand)
            .map(|c| c.deliveries(demand).iter().filter_map(|id| c.get(*id)).collect())
            .unwrap_or_default()
    }

    pub fn planned_quantity(&self, net: &Network, demand: DemandId) -> f64 {
        self.demand_cluster(net, demand)
            .map_or(0.0, |c| c.planned_quantity(demand))
    }

    pub fn constraints(&self, net: &Network, demand: DemandId) -> Option<&ConstraintLog> {
        self.demand_cluster(net, demand)
            .and_then(|c| c.constraints(demand))
    }

    pub fn onhand(&self, net: &Network, buffer: BufferId, date: Date) -> f64 {
        self.cluster(net.buffer(buffer).cluster())
            .map_or(0.0, |c| c.onhand(buffer, date))
    }

    pub fn load_at(&self, net: &Network, resource: ResourceId, date: Date) -> f64 {
        self.cluster(net.resource(resource).cluster())
            .map_or(0.0, |c| c.load_at(resource, date))
    }

    /// Insert an operationplan outside of any solve, typically a locked
    /// receipt or work order already released. Committed immediately.
    pub fn add_operationplan(
        &mut self,
        net: &Network,
        request: NewPlan,
    ) -> Result<(ClusterId, OperationPlanId), PlanError> {
        let cluster = net.operation(request.operation).cluster();
        let cp = self
            .cluster_mut(cluster)
            .ok_or(PlanError::UnknownCluster(cluster))?;
        let mut commands = CommandManager::new();
        let id = cp.create(net, &mut commands, request)?;
        commands.commit(cp)?;
        Ok((cluster, id))
    }
}

impl PlanStore for Plan {
    fn cluster_plan_mut(&mut self, id: ClusterId) -> Option<&mut ClusterPlan> {
        self.cluster_mut(id)
    }
}
