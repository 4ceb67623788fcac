use serde::{Deserialize, Serialize};

use crate::id::*;
use crate::time::{Date, Duration};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DemandStatus {
    #[default]
    Open,
    Quote,
    /// Not planned.
    Closed,
}

/// A customer order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Demand {
    pub name: String,
    pub item: ItemId,
    pub location: LocationId,
    pub quantity: f64,
    pub due: Date,
    /// Lower numbers are planned first.
    pub priority: i32,
    /// Smallest shipment accepted.
    pub min_shipment: f64,
    /// Latest acceptable delivery, relative to the due date.
    pub max_lateness: Duration,
    pub status: DemandStatus,
    /// Explicit delivery operation. The network builder generates one when
    /// absent.
    pub operation: Option<OperationId>,
    pub(crate) cluster: ClusterId,
}

impl Demand {
    pub fn new(name: &str, item: ItemId, location: LocationId, quantity: f64, due: Date) -> Self {
        Self {
            name: name.to_string(),
            item,
            location,
            quantity,
            due,
            priority: 10,
            min_shipment: 0.0,
            max_lateness: Duration::MAX,
            status: DemandStatus::Open,
            operation: None,
            cluster: ClusterId(0),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_min_shipment(mut self, min_shipment: f64) -> Self {
        self.min_shipment = min_shipment;
        self
    }

    pub fn with_max_lateness(mut self, max_lateness: Duration) -> Self {
        self.max_lateness = max_lateness;
        self
    }

    pub fn with_operation(mut self, operation: OperationId) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_status(mut self, status: DemandStatus) -> Self {
        self.status = status;
        self
    }

    pub fn cluster(&self) -> ClusterId {
        self.cluster
    }

    /// Latest date the solver keeps retrying at.
    pub fn deadline(&self) -> Date {
        self.due + self.max_lateness
    }
}
