//! Per-demand record of why a demand could not be planned in full or on
//! time.

use serde::{Deserialize, Serialize};

use crate::id::*;
use crate::time::Date;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    MaterialShortage,
    CapacityOverload,
    BeforeFence,
    BeforeCurrent,
    InvalidData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintEntity {
    Buffer(BufferId),
    Resource(ResourceId),
    Operation(OperationId),
    Demand(DemandId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub entity: ConstraintEntity,
    pub start: Date,
    pub end: Date,
    pub quantity: f64,
    /// Error text for invalid-data entries.
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintLog {
    entries: Vec<Constraint>,
}

impl ConstraintLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a constraint. A repeat of the most recent entry (same kind,
    /// entity and interval) is dropped.
    pub fn push(
        &mut self,
        kind: ConstraintKind,
        entity: ConstraintEntity,
        start: Date,
        end: Date,
        quantity: f64,
    ) {
        if let Some(top) = self.entries.last()
            && top.kind == kind
            && top.entity == entity
            && top.start == start
            && top.end == end
        {
            return;
        }
        self.entries.push(Constraint {
            kind,
            entity,
            start,
            end,
            quantity,
            detail: None,
        });
    }

    pub fn push_invalid(&mut self, entity: ConstraintEntity, at: Date, detail: String) {
        self.entries.push(Constraint {
            kind: ConstraintKind::InvalidData,
            entity,
            start: at,
            end: at,
            quantity: 0.0,
            detail: Some(detail),
        });
    }

    /// Position to later truncate back to with [`pop_to`](Self::pop_to).
    pub fn marker(&self) -> usize {
        self.entries.len()
    }

    pub fn pop_to(&mut self, marker: usize) {
        self.entries.truncate(marker);
    }

    pub fn top(&self) -> Option<&Constraint> {
        self.entries.last()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.entries.iter()
    }

    /// True when an entry of `kind` on `entity` covers `date`.
    pub fn covers(&self, kind: ConstraintKind, entity: ConstraintEntity, date: Date) -> bool {
        self.entries
            .iter()
            .any(|c| c.kind == kind && c.entity == entity && c.start <= date && date <= c.end)
    }

    pub fn count(&self, kind: ConstraintKind) -> usize {
        self.entries.iter().filter(|c| c.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_duplicates_collapse() {
        let mut log = ConstraintLog::new();
        let e = ConstraintEntity::Buffer(BufferId(0));
        log.push(ConstraintKind::MaterialShortage, e, Date(0), Date(10), 5.0);
        log.push(ConstraintKind::MaterialShortage, e, Date(0), Date(10), 7.0);
        assert_eq!(log.len(), 1);
        log.push(ConstraintKind::CapacityOverload, ConstraintEntity::Resource(ResourceId(1)), Date(0), Date(10), 1.0);
        assert_eq!(log.len(), 2);
        assert_eq!(log.top().unwrap().kind, ConstraintKind::CapacityOverload);
    }

    #[test]
    fn marker_and_pop() {
        let mut log = ConstraintLog::new();
        let e = ConstraintEntity::Operation(OperationId(0));
        log.push(ConstraintKind::BeforeFence, e, Date(0), Date(5), 1.0);
        let m = log.marker();
        log.push(ConstraintKind::BeforeCurrent, e, Date(0), Date(5), 1.0);
        log.pop_to(m);
        assert_eq!(log.len(), 1);
        assert!(log.covers(ConstraintKind::BeforeFence, e, Date(3)));
        assert!(!log.covers(ConstraintKind::BeforeFence, e, Date(6)));
        log.clear();
        assert!(log.is_empty());
    }
}
