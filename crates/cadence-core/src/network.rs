//! The supply network: items, locations, buffers, operations, flows, loads,
//! resources, skills and demands.
//!
//! Built through [`NetworkBuilder`] in three phases: register entities,
//! optionally mutate them by name, then [`NetworkBuilder::build`] validates
//! references, derives the producing operation of every buffer, generates
//! delivery operations for demands and partitions everything into clusters.
//! The resulting [`Network`] is immutable and shared read-only by all
//! cluster workers.

use std::collections::HashMap;

use crate::buffer::{Buffer, BufferKind};
use crate::demand::Demand;
use crate::flow::Flow;
use crate::id::*;
use crate::item::{Item, Location};
use crate::load::Load;
use crate::operation::Operation;
use crate::resource::{Resource, Skill};
use crate::time::{Date, Duration};

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid {kind} reference {index} in {context}")]
    InvalidReference {
        kind: &'static str,
        index: u32,
        context: String,
    },
    #[error("flow of operation {0} has zero quantity")]
    ZeroFlow(String),
    #[error("operation {0} has no suboperations")]
    MissingSuboperations(String),
    #[error("operation {0} has invalid lot sizes")]
    InvalidLotSize(String),
    #[error("buffer {0} has more than one candidate producing operation")]
    AmbiguousProducer(String),
    #[error("operation {0} is nested inside itself")]
    CyclicOperation(String),
    #[error("resource {0} is a member of itself")]
    CyclicResource(String),
}

/// Entities belonging to one connected component of the network.
#[derive(Debug, Clone, Default)]
pub struct ClusterDef {
    pub buffers: Vec<BufferId>,
    pub operations: Vec<OperationId>,
    pub resources: Vec<ResourceId>,
    pub demands: Vec<DemandId>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for constructing an immutable [`Network`].
#[derive(Debug)]
pub struct NetworkBuilder {
    current: Date,
    alignment: Option<Duration>,
    items: Vec<Item>,
    item_names: HashMap<String, ItemId>,
    locations: Vec<Location>,
    location_names: HashMap<String, LocationId>,
    buffers: Vec<Buffer>,
    buffer_names: HashMap<String, BufferId>,
    operations: Vec<Operation>,
    operation_names: HashMap<String, OperationId>,
    flows: Vec<Flow>,
    loads: Vec<Load>,
    resources: Vec<Resource>,
    resource_names: HashMap<String, ResourceId>,
    skills: Vec<Skill>,
    skill_names: HashMap<String, SkillId>,
    demands: Vec<Demand>,
    demand_names: HashMap<String, DemandId>,
}

impl NetworkBuilder {
    /// `current` is the plan's "now": nothing may be planned to start
    /// before it when lead times are enforced.
    pub fn new(current: Date) -> Self {
        Self {
            current,
            alignment: None,
            items: Vec::new(),
            item_names: HashMap::new(),
            locations: Vec::new(),
            location_names: HashMap::new(),
            buffers: Vec::new(),
            buffer_names: HashMap::new(),
            operations: Vec::new(),
            operation_names: HashMap::new(),
            flows: Vec::new(),
            loads: Vec::new(),
            resources: Vec::new(),
            resource_names: HashMap::new(),
            skills: Vec::new(),
            skill_names: HashMap::new(),
            demands: Vec::new(),
            demand_names: HashMap::new(),
        }
    }

    /// Snap operationplan end dates down to multiples of `step`.
    pub fn set_alignment(&mut self, step: Duration) {
        self.alignment = Some(step);
    }

    pub fn add_item(&mut self, item: Item) -> ItemId {
        let id = ItemId(self.items.len() as u32);
        self.item_names.insert(item.name.clone(), id);
        self.items.push(item);
        id
    }

    pub fn add_location(&mut self, location: Location) -> LocationId {
        let id = LocationId(self.locations.len() as u32);
        self.location_names.insert(location.name.clone(), id);
        self.locations.push(location);
        id
    }

    pub fn add_buffer(&mut self, buffer: Buffer) -> BufferId {
        let id = BufferId(self.buffers.len() as u32);
        self.buffer_names.insert(buffer.name.clone(), id);
        self.buffers.push(buffer);
        id
    }

    pub fn add_operation(&mut self, operation: Operation) -> OperationId {
        let id = OperationId(self.operations.len() as u32);
        self.operation_names.insert(operation.name.clone(), id);
        self.operations.push(operation);
        id
    }

    pub fn add_flow(&mut self, flow: Flow) -> FlowId {
        let id = FlowId(self.flows.len() as u32);
        self.flows.push(flow);
        id
    }

    pub fn add_load(&mut self, load: Load) -> LoadId {
        let id = LoadId(self.loads.len() as u32);
        self.loads.push(load);
        id
    }

    pub fn add_resource(&mut self, resource: Resource) -> ResourceId {
        let id = ResourceId(self.resources.len() as u32);
        self.resource_names.insert(resource.name.clone(), id);
        self.resources.push(resource);
        id
    }

    pub fn add_skill(&mut self, name: &str) -> SkillId {
        let id = SkillId(self.skills.len() as u32);
        self.skill_names.insert(name.to_string(), id);
        self.skills.push(Skill {
            name: name.to_string(),
        });
        id
    }

    pub fn add_demand(&mut self, demand: Demand) -> DemandId {
        let id = DemandId(self.demands.len() as u32);
        self.demand_names.insert(demand.name.clone(), id);
        self.demands.push(demand);
        id
    }

    /// Phase 2: change a registered operation.
    pub fn mutate_operation<F>(&mut self, name: &str, f: F) -> Result<(), NetworkError>
    where
        F: FnOnce(&mut Operation),
    {
        let id = self
            .operation_names
            .get(name)
            .ok_or_else(|| NetworkError::NotFound(name.to_string()))?;
        f(&mut self.operations[id.index()]);
        Ok(())
    }

    pub fn mutate_buffer<F>(&mut self, name: &str, f: F) -> Result<(), NetworkError>
    where
        F: FnOnce(&mut Buffer),
    {
        let id = self
            .buffer_names
            .get(name)
            .ok_or_else(|| NetworkError::NotFound(name.to_string()))?;
        f(&mut self.buffers[id.index()]);
        Ok(())
    }

    pub fn mutate_resource<F>(&mut self, name: &str, f: F) -> Result<(), NetworkError>
    where
        F: FnOnce(&mut Resource),
    {
        let id = self
            .resource_names
            .get(name)
            .ok_or_else(|| NetworkError::NotFound(name.to_string()))?;
        f(&mut self.resources[id.index()]);
        Ok(())
    }

    pub fn mutate_demand<F>(&mut self, name: &str, f: F) -> Result<(), NetworkError>
    where
        F: FnOnce(&mut Demand),
    {
        let id = self
            .demand_names
            .get(name)
            .ok_or_else(|| NetworkError::NotFound(name.to_string()))?;
        f(&mut self.demands[id.index()]);
        Ok(())
    }

    pub fn buffer_id(&self, name: &str) -> Option<BufferId> {
        self.buffer_names.get(name).copied()
    }

    pub fn operation_id(&self, name: &str) -> Option<OperationId> {
        self.operation_names.get(name).copied()
    }

    pub fn item_id(&self, name: &str) -> Option<ItemId> {
        self.item_names.get(name).copied()
    }

    pub fn location_id(&self, name: &str) -> Option<LocationId> {
        self.location_names.get(name).copied()
    }

    pub fn resource_id(&self, name: &str) -> Option<ResourceId> {
        self.resource_names.get(name).copied()
    }

    // -----------------------------------------------------------------------
    // Phase 3
    // -----------------------------------------------------------------------

    /// Validate and freeze.
    pub fn build(mut self) -> Result<Network, NetworkError> {
        self.validate()?;

        for (i, flow) in self.flows.iter().enumerate() {
            let id = FlowId(i as u32);
            self.operations[flow.operation.index()].flows.push(id);
            self.buffers[flow.buffer.index()].flows.push(id);
        }
        for (i, load) in self.loads.iter().enumerate() {
            self.operations[load.operation.index()].loads.push(LoadId(i as u32));
        }
        for i in 0..self.operations.len() {
            for child in self.operations[i].children() {
                let c = &mut self.operations[child.index()];
                if c.owner.is_none() {
                    c.owner = Some(OperationId(i as u32));
                }
            }
        }
        self.check_nesting()?;
        for i in 0..self.resources.len() {
            if let Some(owner) = self.resources[i].owner {
                self.resources[owner.index()].members.push(ResourceId(i as u32));
            }
        }

        let delivery = self.generate_deliveries();
        self.generate_procurements();
        self.derive_producers()?;
        let clusters = self.assign_clusters();

        Ok(Network {
            current: self.current,
            alignment: self.alignment,
            items: self.items,
            item_names: self.item_names,
            locations: self.locations,
            location_names: self.location_names,
            buffers: self.buffers,
            buffer_names: self.buffer_names,
            operations: self.operations,
            operation_names: self.operation_names,
            flows: self.flows,
            loads: self.loads,
            resources: self.resources,
            resource_names: self.resource_names,
            skills: self.skills,
            skill_names: self.skill_names,
            demands: self.demands,
            demand_names: self.demand_names,
            delivery,
            clusters,
        })
    }

    fn validate(&self) -> Result<(), NetworkError> {
        let bad = |kind: &'static str, index: u32, context: &str| NetworkError::InvalidReference {
            kind,
            index,
            context: context.to_string(),
        };
        for b in &self.buffers {
            if b.item.index() >= self.items.len() {
                return Err(bad("item", b.item.0, &b.name));
            }
            if b.location.index() >= self.locations.len() {
                return Err(bad("location", b.location.0, &b.name));
            }
            if let Some(op) = b.producing
                && op.index() >= self.operations.len()
            {
                return Err(bad("operation", op.0, &b.name));
            }
        }
        for op in &self.operations {
            if op.size_minimum < 0.0
                || op.size_multiple < 0.0
                || op.size_maximum < op.size_minimum
            {
                return Err(NetworkError::InvalidLotSize(op.name.clone()));
            }
            let children = op.children();
            if op.is_composite() && children.is_empty() {
                return Err(NetworkError::MissingSuboperations(op.name.clone()));
            }
            for c in children {
                if c.index() >= self.operations.len() {
                    return Err(bad("operation", c.0, &op.name));
                }
            }
        }
        for f in &self.flows {
            if f.operation.index() >= self.operations.len() {
                return Err(bad("operation", f.operation.0, "flow"));
            }
            if f.buffer.index() >= self.buffers.len() {
                return Err(bad("buffer", f.buffer.0, "flow"));
            }
            if f.quantity == 0.0 {
                return Err(NetworkError::ZeroFlow(
                    self.operations[f.operation.index()].name.clone(),
                ));
            }
        }
        for l in &self.loads {
            if l.operation.index() >= self.operations.len() {
                return Err(bad("operation", l.operation.0, "load"));
            }
            if l.resource.index() >= self.resources.len() {
                return Err(bad("resource", l.resource.0, "load"));
            }
            if let Some(s) = l.skill
                && s.index() >= self.skills.len()
            {
                return Err(bad("skill", s.0, "load"));
            }
        }
        for r in &self.resources {
            if let Some(o) = r.owner
                && o.index() >= self.resources.len()
            {
                return Err(bad("resource", o.0, &r.name));
            }
        }
        for (i, r) in self.resources.iter().enumerate() {
            let mut cur = r.owner;
            let mut steps = 0;
            while let Some(o) = cur {
                if o.index() == i || steps > self.resources.len() {
                    return Err(NetworkError::CyclicResource(r.name.clone()));
                }
                cur = self.resources[o.index()].owner;
                steps += 1;
            }
        }
        for d in &self.demands {
            if d.item.index() >= self.items.len() {
                return Err(bad("item", d.item.0, &d.name));
            }
            if d.location.index() >= self.locations.len() {
                return Err(bad("location", d.location.0, &d.name));
            }
            if let Some(op) = d.operation
                && op.index() >= self.operations.len()
            {
                return Err(bad("operation", op.0, &d.name));
            }
        }
        Ok(())
    }

    fn check_nesting(&self) -> Result<(), NetworkError> {
        for (i, op) in self.operations.iter().enumerate() {
            let mut cur = op.owner;
            let mut steps = 0;
            while let Some(o) = cur {
                if o.index() == i || steps > self.operations.len() {
                    return Err(NetworkError::CyclicOperation(op.name.clone()));
                }
                cur = self.operations[o.index()].owner;
                steps += 1;
            }
        }
        Ok(())
    }

    /// Create a zero-duration shipping operation for every demand without
    /// one, plus one per location of pooled items.
    fn generate_deliveries(&mut self) -> HashMap<BufferId, OperationId> {
        let mut delivery = HashMap::new();
        for d in 0..self.demands.len() {
            if self.demands[d].operation.is_some() {
                continue;
            }
            let item = self.demands[d].item;
            let location = self.demands[d].location;
            let mut targets: Vec<BufferId> = Vec::new();
            if let Some(b) = self.find_buffer(item, location) {
                targets.push(b);
            }
            if self.items[item.index()].global_purchase {
                let others: Vec<BufferId> = (0..self.buffers.len())
                    .map(|i| BufferId(i as u32))
                    .filter(|b| self.buffers[b.index()].item == item && !targets.contains(b))
                    .collect();
                targets.extend(others);
            }
            for b in &targets {
                if !delivery.contains_key(b) {
                    let op = self.add_delivery(*b);
                    delivery.insert(*b, op);
                }
            }
            if let Some(b) = self.find_buffer(item, location) {
                self.demands[d].operation = delivery.get(&b).copied();
            }
        }
        delivery
    }

    fn add_delivery(&mut self, buffer: BufferId) -> OperationId {
        let name = format!("Ship {}", self.buffers[buffer.index()].name);
        let mut op = Operation::fixed_time(&name, Duration::ZERO);
        op.delivery = true;
        op.location = Some(self.buffers[buffer.index()].location);
        let id = self.add_operation(op);
        let flow = self.add_flow(Flow::consume(id, buffer, 1.0));
        self.operations[id.index()].flows.push(flow);
        self.buffers[buffer.index()].flows.push(flow);
        id
    }

    /// Give every purchasing buffer without an explicit producing operation
    /// a purchase operation carrying the policy's lead time and lot sizes.
    fn generate_procurements(&mut self) {
        for b in 0..self.buffers.len() {
            let BufferKind::Procure(policy) = &self.buffers[b].kind else {
                continue;
            };
            if self.buffers[b].producing.is_some() {
                continue;
            }
            let name = format!("Procure {}", self.buffers[b].name);
            let mut op = Operation::fixed_time(&name, policy.leadtime)
                .with_size(policy.size_minimum, policy.size_multiple, policy.size_maximum)
                .with_location(self.buffers[b].location);
            op.fence = policy.fence;
            let id = self.add_operation(op);
            let buffer = BufferId(b as u32);
            let flow = self.add_flow(Flow::produce(id, buffer, 1.0));
            self.operations[id.index()].flows.push(flow);
            self.buffers[b].flows.push(flow);
            self.buffers[b].producing = Some(id);
        }
    }

    fn find_buffer(&self, item: ItemId, location: LocationId) -> Option<BufferId> {
        self.buffers
            .iter()
            .position(|b| b.item == item && b.location == location)
            .map(|i| BufferId(i as u32))
    }

    fn produces_into(&self, op: OperationId, buffer: BufferId, depth: usize) -> bool {
        if depth > self.operations.len() {
            return false;
        }
        let o = &self.operations[op.index()];
        o.flows.iter().any(|f| {
            let flow = &self.flows[f.index()];
            flow.buffer == buffer && flow.is_producer()
        }) || o
            .children()
            .into_iter()
            .any(|c| self.produces_into(c, buffer, depth + 1))
    }

    fn derive_producers(&mut self) -> Result<(), NetworkError> {
        for b in 0..self.buffers.len() {
            if self.buffers[b].producing.is_some() {
                continue;
            }
            let buffer = BufferId(b as u32);
            let candidates: Vec<OperationId> = (0..self.operations.len())
                .map(|i| OperationId(i as u32))
                .filter(|op| {
                    let o = &self.operations[op.index()];
                    o.owner.is_none() && !o.delivery && self.produces_into(*op, buffer, 0)
                })
                .collect();
            match candidates.as_slice() {
                [] => {}
                [single] => self.buffers[b].producing = Some(*single),
                _ => return Err(NetworkError::AmbiguousProducer(self.buffers[b].name.clone())),
            }
        }
        Ok(())
    }

    /// Union-find over buffers, operations and resources.
    fn assign_clusters(&mut self) -> Vec<ClusterDef> {
        let nb = self.buffers.len();
        let no = self.operations.len();
        let nr = self.resources.len();
        let mut uf = UnionFind::new(nb + no + nr);
        let op_node = |o: OperationId| nb + o.index();
        let res_node = |r: ResourceId| nb + no + r.index();

        for f in &self.flows {
            uf.union(f.buffer.index(), op_node(f.operation));
        }
        for l in &self.loads {
            uf.union(op_node(l.operation), res_node(l.resource));
        }
        for (i, r) in self.resources.iter().enumerate() {
            if let Some(o) = r.owner {
                uf.union(nb + no + i, res_node(o));
            }
        }
        for (i, op) in self.operations.iter().enumerate() {
            for c in op.children() {
                uf.union(nb + i, op_node(c));
            }
        }
        for (i, b) in self.buffers.iter().enumerate() {
            if let Some(p) = b.producing {
                uf.union(i, op_node(p));
            }
        }
        let mut pooled: HashMap<ItemId, usize> = HashMap::new();
        for (i, b) in self.buffers.iter().enumerate() {
            if self.items[b.item.index()].global_purchase {
                let first = *pooled.entry(b.item).or_insert(i);
                uf.union(first, i);
            }
        }

        let mut root_to_cluster: HashMap<usize, ClusterId> = HashMap::new();
        let mut clusters: Vec<ClusterDef> = Vec::new();
        let mut cluster_of = |uf: &mut UnionFind, node: usize, clusters: &mut Vec<ClusterDef>| {
            let root = uf.find(node);
            *root_to_cluster.entry(root).or_insert_with(|| {
                clusters.push(ClusterDef::default());
                ClusterId((clusters.len() - 1) as u32)
            })
        };

        for i in 0..nb {
            let c = cluster_of(&mut uf, i, &mut clusters);
            self.buffers[i].cluster = c;
            clusters[c.index()].buffers.push(BufferId(i as u32));
        }
        for i in 0..no {
            let c = cluster_of(&mut uf, nb + i, &mut clusters);
            self.operations[i].cluster = c;
            clusters[c.index()].operations.push(OperationId(i as u32));
        }
        for i in 0..nr {
            let c = cluster_of(&mut uf, nb + no + i, &mut clusters);
            self.resources[i].cluster = c;
            clusters[c.index()].resources.push(ResourceId(i as u32));
        }
        for (i, d) in self.demands.iter_mut().enumerate() {
            let c = match d.operation {
                Some(op) => self.operations[op.index()].cluster,
                None => {
                    clusters.push(ClusterDef::default());
                    ClusterId((clusters.len() - 1) as u32)
                }
            };
            d.cluster = c;
            clusters[c.index()].demands.push(DemandId(i as u32));
        }
        clusters
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        // Keep the lowest index as root so cluster numbering follows
        // registration order.
        if ra < rb {
            self.parent[rb] = ra;
        } else if rb < ra {
            self.parent[ra] = rb;
        }
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Immutable supply network. Frozen after build(); safe to share between
/// cluster workers.
#[derive(Debug)]
pub struct Network {
    current: Date,
    alignment: Option<Duration>,
    items: Vec<Item>,
    item_names: HashMap<String, ItemId>,
    locations: Vec<Location>,
    location_names: HashMap<String, LocationId>,
    buffers: Vec<Buffer>,
    buffer_names: HashMap<String, BufferId>,
    operations: Vec<Operation>,
    operation_names: HashMap<String, OperationId>,
    flows: Vec<Flow>,
    loads: Vec<Load>,
    resources: Vec<Resource>,
    resource_names: HashMap<String, ResourceId>,
    skills: Vec<Skill>,
    skill_names: HashMap<String, SkillId>,
    demands: Vec<Demand>,
    demand_names: HashMap<String, DemandId>,
    delivery: HashMap<BufferId, OperationId>,
    clusters: Vec<ClusterDef>,
}

impl Network {
    /// The plan's "now".
    pub fn current(&self) -> Date {
        self.current
    }

    pub fn alignment(&self) -> Option<Duration> {
        self.alignment
    }

    // Ids handed out by the builder are always valid for the network it
    // built, so lookups by id index directly.

    pub fn item(&self, id: ItemId) -> &Item {
        &self.items[id.index()]
    }

    pub fn location(&self, id: LocationId) -> &Location {
        &self.locations[id.index()]
    }

    pub fn buffer(&self, id: BufferId) -> &Buffer {
        &self.buffers[id.index()]
    }

    pub fn operation(&self, id: OperationId) -> &Operation {
        &self.operations[id.index()]
    }

    pub fn flow(&self, id: FlowId) -> &Flow {
        &self.flows[id.index()]
    }

    pub fn load(&self, id: LoadId) -> &Load {
        &self.loads[id.index()]
    }

    pub fn resource(&self, id: ResourceId) -> &Resource {
        &self.resources[id.index()]
    }

    pub fn skill(&self, id: SkillId) -> &Skill {
        &self.skills[id.index()]
    }

    pub fn demand(&self, id: DemandId) -> &Demand {
        &self.demands[id.index()]
    }

    pub fn get_demand(&self, id: DemandId) -> Option<&Demand> {
        self.demands.get(id.index())
    }

    pub fn item_id(&self, name: &str) -> Option<ItemId> {
        self.item_names.get(name).copied()
    }

    pub fn location_id(&self, name: &str) -> Option<LocationId> {
        self.location_names.get(name).copied()
    }

    pub fn buffer_id(&self, name: &str) -> Option<BufferId> {
        self.buffer_names.get(name).copied()
    }

    pub fn operation_id(&self, name: &str) -> Option<OperationId> {
        self.operation_names.get(name).copied()
    }

    pub fn resource_id(&self, name: &str) -> Option<ResourceId> {
        self.resource_names.get(name).copied()
    }

    pub fn skill_id(&self, name: &str) -> Option<SkillId> {
        self.skill_names.get(name).copied()
    }

    pub fn demand_id(&self, name: &str) -> Option<DemandId> {
        self.demand_names.get(name).copied()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn demand_count(&self) -> usize {
        self.demands.len()
    }

    pub fn buffers(&self) -> impl Iterator<Item = (BufferId, &Buffer)> {
        self.buffers
            .iter()
            .enumerate()
            .map(|(i, b)| (BufferId(i as u32), b))
    }

    pub fn resources(&self) -> impl Iterator<Item = (ResourceId, &Resource)> {
        self.resources
            .iter()
            .enumerate()
            .map(|(i, r)| (ResourceId(i as u32), r))
    }

    pub fn demands(&self) -> impl Iterator<Item = (DemandId, &Demand)> {
        self.demands
            .iter()
            .enumerate()
            .map(|(i, d)| (DemandId(i as u32), d))
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&ClusterDef> {
        self.clusters.get(id.index())
    }

    pub fn clusters(&self) -> impl Iterator<Item = (ClusterId, &ClusterDef)> {
        self.clusters
            .iter()
            .enumerate()
            .map(|(i, c)| (ClusterId(i as u32), c))
    }

    /// The buffer stocking `item` at `location`.
    pub fn buffer_for(&self, item: ItemId, location: LocationId) -> Option<BufferId> {
        self.buffers
            .iter()
            .position(|b| b.item == item && b.location == location)
            .map(|i| BufferId(i as u32))
    }

    /// All buffers stocking `item`, in id order.
    pub fn buffers_of_item(&self, item: ItemId) -> Vec<BufferId> {
        self.buffers()
            .filter(|(_, b)| b.item == item)
            .map(|(id, _)| id)
            .collect()
    }

    /// The generated shipping operation of a buffer.
    pub fn delivery_operation(&self, buffer: BufferId) -> Option<OperationId> {
        self.delivery.get(&buffer).copied()
    }

    /// The producing flow of `op` into `buffer`, lowest priority first.
    pub fn producing_flow(&self, op: OperationId, buffer: BufferId) -> Option<FlowId> {
        self.operation(op)
            .flows
            .iter()
            .copied()
            .filter(|f| {
                let flow = self.flow(*f);
                flow.buffer == buffer && flow.is_producer()
            })
            .min_by_key(|f| (self.flow(*f).priority, *f))
    }

    /// True when `op` or any of its sub-operations produces into `buffer`.
    pub fn produces_into(&self, op: OperationId, buffer: BufferId) -> bool {
        self.produces_into_at(op, buffer, 0)
    }

    fn produces_into_at(&self, op: OperationId, buffer: BufferId, depth: usize) -> bool {
        if depth > self.operations.len() {
            return false;
        }
        self.producing_flow(op, buffer).is_some()
            || self
                .operation(op)
                .children()
                .into_iter()
                .any(|c| self.produces_into_at(c, buffer, depth + 1))
    }

    /// Buffers consumed by `op` itself, without sub-operations.
    pub fn consumed_buffers(&self, op: OperationId) -> Vec<BufferId> {
        let mut out: Vec<BufferId> = self
            .operation(op)
            .flows
            .iter()
            .map(|f| self.flow(*f))
            .filter(|f| !f.is_producer())
            .map(|f| f.buffer)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Leaf members of an aggregate resource, depth first. A resource without
    /// members is its own single leaf.
    pub fn leaf_resources(&self, root: ResourceId) -> Vec<ResourceId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(r) = stack.pop() {
            let members = &self.resource(r).members;
            if members.is_empty() {
                out.push(r);
            } else {
                stack.extend(members.iter().rev().copied());
            }
        }
        out
    }
}
