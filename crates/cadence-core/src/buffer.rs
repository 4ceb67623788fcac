//! Buffers: an item stocked at a location.

use serde::{Deserialize, Serialize};

use crate::calendar::Envelope;
use crate::id::*;
use crate::time::Duration;

/// Reorder policy of a purchasing buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcurePolicy {
    /// Supplier lead time of a purchase order.
    pub leadtime: Duration,
    /// No new purchase order may be released inside this fence.
    pub fence: Duration,
    pub size_minimum: f64,
    pub size_multiple: f64,
    pub size_maximum: f64,
    /// Minimum time between two consecutive purchase orders.
    pub min_interval: Duration,
    /// Maximum time between two consecutive purchase orders.
    pub max_interval: Duration,
}

impl Default for ProcurePolicy {
    fn default() -> Self {
        Self {
            leadtime: Duration::ZERO,
            fence: Duration::ZERO,
            size_minimum: 0.0,
            size_multiple: 0.0,
            size_maximum: f64::INFINITY,
            min_interval: Duration::ZERO,
            max_interval: Duration::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BufferKind {
    /// Replenished through its producing operation.
    Default,
    /// Never short. Asks are answered in full without propagating upstream.
    Infinite,
    /// Replenished by purchase orders following a reorder-point policy.
    Procure(ProcurePolicy),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buffer {
    pub name: String,
    pub item: ItemId,
    pub location: LocationId,
    pub kind: BufferKind,
    /// Initial inventory.
    pub onhand: f64,
    /// Safety stock target.
    pub minimum: Envelope,
    /// Upper inventory target, used by purchasing buffers.
    pub maximum: Envelope,
    /// Shortages within this interval of an existing proposed supply are
    /// merged into that supply rather than creating a new one.
    pub min_batching_interval: Duration,
    /// Explicit producing operation. Derived by the network builder when left
    /// empty.
    pub producing: Option<OperationId>,
    pub(crate) flows: Vec<FlowId>,
    pub(crate) cluster: ClusterId,
}

impl Buffer {
    pub fn new(name: &str, item: ItemId, location: LocationId) -> Self {
        Self {
            name: name.to_string(),
            item,
            location,
            kind: BufferKind::Default,
            onhand: 0.0,
            minimum: Envelope::constant(0.0),
            maximum: Envelope::constant(0.0),
            min_batching_interval: Duration::ZERO,
            producing: None,
            flows: Vec::new(),
            cluster: ClusterId(0),
        }
    }

    pub fn with_onhand(mut self, onhand: f64) -> Self {
        self.onhand = onhand;
        self
    }

    pub fn with_minimum(mut self, minimum: Envelope) -> Self {
        self.minimum = minimum;
        self
    }

    pub fn with_maximum(mut self, maximum: Envelope) -> Self {
        self.maximum = maximum;
        self
    }

    pub fn with_batching(mut self, interval: Duration) -> Self {
        self.min_batching_interval = interval;
        self
    }

    pub fn with_producing(mut self, op: OperationId) -> Self {
        self.producing = Some(op);
        self
    }

    pub fn infinite(mut self) -> Self {
        self.kind = BufferKind::Infinite;
        self
    }

    pub fn procure(mut self, policy: ProcurePolicy) -> Self {
        self.kind = BufferKind::Procure(policy);
        self
    }

    /// Flows (producing and consuming) attached to this buffer.
    pub fn flows(&self) -> &[FlowId] {
        &self.flows
    }

    pub fn cluster(&self) -> ClusterId {
        self.cluster
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self.kind, BufferKind::Infinite)
    }
}
