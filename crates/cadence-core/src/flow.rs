use serde::{Deserialize, Serialize};

use crate::id::*;
use crate::quantity::is_zero;
use crate::time::DateRange;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowKind {
    /// Proportional to the operationplan quantity, dated at its start.
    #[default]
    Start,
    /// Proportional, dated at the end.
    End,
    /// Fixed quantity per operationplan, dated at the start.
    FixedStart,
    /// Fixed quantity per operationplan, dated at the end.
    FixedEnd,
}

impl FlowKind {
    pub fn is_fixed(self) -> bool {
        matches!(self, FlowKind::FixedStart | FlowKind::FixedEnd)
    }

    pub fn at_end(self) -> bool {
        matches!(self, FlowKind::End | FlowKind::FixedEnd)
    }
}

/// Material link between an operation and a buffer. Negative quantities
/// consume, positive quantities produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub operation: OperationId,
    pub buffer: BufferId,
    pub quantity: f64,
    pub kind: FlowKind,
    pub effective: DateRange,
    /// Flows of one operation sharing a group name are alternates of each
    /// other; only one of them is instantiated on an operationplan.
    pub group: Option<String>,
    pub priority: i32,
}

impl Flow {
    /// Consume `qty` per unit at the start of the operation.
    pub fn consume(operation: OperationId, buffer: BufferId, qty: f64) -> Self {
        Self {
            operation,
            buffer,
            quantity: -qty.abs(),
            kind: FlowKind::Start,
            effective: DateRange::ALWAYS,
            group: None,
            priority: 1,
        }
    }

    /// Produce `qty` per unit at the end of the operation.
    pub fn produce(operation: OperationId, buffer: BufferId, qty: f64) -> Self {
        Self {
            operation,
            buffer,
            quantity: qty.abs(),
            kind: FlowKind::End,
            effective: DateRange::ALWAYS,
            group: None,
            priority: 1,
        }
    }

    pub fn fixed(mut self) -> Self {
        self.kind = if self.kind.at_end() { FlowKind::FixedEnd } else { FlowKind::FixedStart };
        self
    }

    pub fn with_kind(mut self, kind: FlowKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_group(mut self, group: &str, priority: i32) -> Self {
        self.group = Some(group.to_string());
        self.priority = priority;
        self
    }

    pub fn with_effective(mut self, effective: DateRange) -> Self {
        self.effective = effective;
        self
    }

    pub fn is_producer(&self) -> bool {
        self.quantity > 0.0
    }

    /// Signed flowplan quantity for an operationplan of `plan_qty`.
    pub fn quantity_for(&self, plan_qty: f64) -> f64 {
        if is_zero(plan_qty) {
            0.0
        } else if self.kind.is_fixed() {
            self.quantity
        } else {
            self.quantity * plan_qty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proportional_and_fixed_quantities() {
        let f = Flow::consume(OperationId(0), BufferId(0), 2.0);
        assert_eq!(f.quantity_for(5.0), -10.0);
        assert_eq!(f.quantity_for(0.0), 0.0);
        let g = Flow::produce(OperationId(0), BufferId(1), 7.0).fixed();
        assert_eq!(g.kind, FlowKind::FixedEnd);
        assert_eq!(g.quantity_for(3.0), 7.0);
        assert!(g.is_producer());
    }
}
