//! Operations: templates describing how material is transformed, moved or
//! purchased, and how an operationplan's duration follows from its quantity.

use serde::{Deserialize, Serialize};

use crate::id::*;
use crate::quantity::ROUNDING_ERROR;
use crate::time::{Date, DateRange, Duration};

/// How a choice among alternates is made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchMode {
    /// Take the first alternate (lowest priority number) that replies.
    #[default]
    Priority,
    MinCost,
    MinPenalty,
    MinCostPenalty,
}

impl SearchMode {
    /// Value minimized by the cost based modes. Lower is better.
    pub fn score(self, cost: f64, penalty: f64) -> f64 {
        match self {
            SearchMode::Priority => 0.0,
            SearchMode::MinCost => cost,
            SearchMode::MinPenalty => penalty,
            SearchMode::MinCostPenalty => cost + penalty,
        }
    }
}

/// A child of an alternate or split operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubOperation {
    pub operation: OperationId,
    /// Ranking for alternates (lower is preferred), percentage weight for
    /// splits.
    pub priority: i32,
    pub effective: DateRange,
}

impl SubOperation {
    pub fn new(operation: OperationId, priority: i32) -> Self {
        Self {
            operation,
            priority,
            effective: DateRange::ALWAYS,
        }
    }

    pub fn with_effective(mut self, effective: DateRange) -> Self {
        self.effective = effective;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Duration independent of the quantity.
    FixedTime,
    /// Duration is the fixed part plus `per_unit` for every unit planned.
    TimePer { per_unit: Duration },
    /// Steps executed back to back.
    Routing { steps: Vec<OperationId> },
    /// One of several interchangeable operations.
    Alternate { alternates: Vec<SubOperation> },
    /// Quantity split over several operations by percentage.
    Split { parts: Vec<SubOperation> },
    /// Purchasing from a supplier, with the lead time as duration.
    ItemSupplier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    pub kind: OperationKind,
    pub duration: Duration,
    /// Safety time after the end of the operation before its output is used.
    pub post_time: Duration,
    /// Release fence: no proposed operationplan may start inside it.
    pub fence: Duration,
    pub size_minimum: f64,
    pub size_multiple: f64,
    pub size_maximum: f64,
    /// Cost per unit planned.
    pub cost: f64,
    pub location: Option<LocationId>,
    pub search: SearchMode,
    pub effective: DateRange,
    pub(crate) flows: Vec<FlowId>,
    pub(crate) loads: Vec<LoadId>,
    pub(crate) owner: Option<OperationId>,
    pub(crate) delivery: bool,
    pub(crate) cluster: ClusterId,
}

impl Operation {
    fn with_kind(name: &str, kind: OperationKind, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            kind,
            duration,
            post_time: Duration::ZERO,
            fence: Duration::ZERO,
            size_minimum: 0.0,
            size_multiple: 0.0,
            size_maximum: f64::INFINITY,
            cost: 0.0,
            location: None,
            search: SearchMode::Priority,
            effective: DateRange::ALWAYS,
            flows: Vec::new(),
            loads: Vec::new(),
            owner: None,
            delivery: false,
            cluster: ClusterId(0),
        }
    }

    pub fn fixed_time(name: &str, duration: Duration) -> Self {
        Self::with_kind(name, OperationKind::FixedTime, duration)
    }

    pub fn time_per(name: &str, fixed: Duration, per_unit: Duration) -> Self {
        Self::with_kind(name, OperationKind::TimePer { per_unit }, fixed)
    }

    pub fn routing(name: &str, steps: Vec<OperationId>) -> Self {
        Self::with_kind(name, OperationKind::Routing { steps }, Duration::ZERO)
    }

    pub fn alternate(name: &str, alternates: Vec<SubOperation>) -> Self {
        Self::with_kind(name, OperationKind::Alternate { alternates }, Duration::ZERO)
    }

    pub fn split(name: &str, parts: Vec<SubOperation>) -> Self {
        Self::with_kind(name, OperationKind::Split { parts }, Duration::ZERO)
    }

    pub fn item_supplier(name: &str, leadtime: Duration) -> Self {
        Self::with_kind(name, OperationKind::ItemSupplier, leadtime)
    }

    pub fn with_size(mut self, minimum: f64, multiple: f64, maximum: f64) -> Self {
        self.size_minimum = minimum;
        self.size_multiple = multiple;
        self.size_maximum = maximum;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_fence(mut self, fence: Duration) -> Self {
        self.fence = fence;
        self
    }

    pub fn with_post_time(mut self, post_time: Duration) -> Self {
        self.post_time = post_time;
        self
    }

    pub fn with_search(mut self, search: SearchMode) -> Self {
        self.search = search;
        self
    }

    pub fn with_location(mut self, location: LocationId) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_effective(mut self, effective: DateRange) -> Self {
        self.effective = effective;
        self
    }

    pub fn flows(&self) -> &[FlowId] {
        &self.flows
    }

    pub fn loads(&self) -> &[LoadId] {
        &self.loads
    }

    /// Composite operation this one is a step, alternate or part of.
    pub fn owner(&self) -> Option<OperationId> {
        self.owner
    }

    /// True for the shipping operations generated for demands.
    pub fn is_delivery(&self) -> bool {
        self.delivery
    }

    pub fn cluster(&self) -> ClusterId {
        self.cluster
    }

    pub fn is_composite(&self) -> bool {
        matches!(
            self.kind,
            OperationKind::Routing { .. } | OperationKind::Alternate { .. } | OperationKind::Split { .. }
        )
    }

    /// Sub-operations in declared order.
    pub fn children(&self) -> Vec<OperationId> {
        match &self.kind {
            OperationKind::Routing { steps } => steps.clone(),
            OperationKind::Alternate { alternates } => alternates.iter().map(|s| s.operation).collect(),
            OperationKind::Split { parts } => parts.iter().map(|s| s.operation).collect(),
            _ => Vec::new(),
        }
    }

    /// Apply the lot-size rules to a quantity.
    ///
    /// Rounds up to the minimum and the next multiple. With `round_down` a
    /// quantity below the minimum becomes zero and multiples round down.
    pub fn size_quantity(&self, qty: f64, round_down: bool) -> f64 {
        if qty < ROUNDING_ERROR {
            return 0.0;
        }
        let mut q = qty;
        if q < self.size_minimum - ROUNDING_ERROR {
            if round_down {
                return 0.0;
            }
            q = self.size_minimum;
        }
        if self.size_multiple > 0.0 {
            let m = self.size_multiple;
            let n = if round_down {
                (q / m + ROUNDING_ERROR).floor()
            } else {
                (q / m - ROUNDING_ERROR).ceil()
            };
            q = n * m;
            if q < self.size_minimum - ROUNDING_ERROR {
                if round_down {
                    return 0.0;
                }
                q = (self.size_minimum / m - ROUNDING_ERROR).ceil() * m;
            }
        }
        if q > self.size_maximum + ROUNDING_ERROR {
            q = self.size_maximum;
            if self.size_multiple > 0.0 {
                q = (q / self.size_multiple + ROUNDING_ERROR).floor() * self.size_multiple;
            }
        }
        q
    }

    /// Duration of an operationplan of the given quantity.
    pub fn duration_for(&self, qty: f64) -> Duration {
        match self.kind {
            OperationKind::TimePer { per_unit } => self.duration + per_unit.scale(qty),
            _ => self.duration,
        }
    }

    /// Largest quantity that fits in a window. Unbounded for fixed-time
    /// operations whose duration fits.
    pub fn fit_quantity(&self, window: Duration) -> f64 {
        if window < self.duration {
            return 0.0;
        }
        match self.kind {
            OperationKind::TimePer { per_unit } if per_unit.0 > 0 => {
                (window - self.duration).0 as f64 / per_unit.0 as f64
            }
            _ => f64::INFINITY,
        }
    }

    /// Start and end of an operationplan of `qty` that ends at `end`.
    pub fn dates_ending(&self, qty: f64, end: Date) -> (Date, Date) {
        (end - self.duration_for(qty), end)
    }

    /// Start and end of an operationplan of `qty` that starts at `start`.
    pub fn dates_starting(&self, qty: f64, start: Date) -> (Date, Date) {
        (start, start + self.duration_for(qty))
    }
}
