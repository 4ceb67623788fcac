//! Plan snapshots.
//!
//! A [`PlanSnapshot`] is a flat, ordered record of every active
//! operationplan and every demand's constraint log. Its binary form is a
//! `bitcode` encoding behind a magic/version header, so two plans are
//! identical exactly when their snapshot bytes are.

use serde::{Deserialize, Serialize};

use crate::constraint::Constraint;
use crate::id::*;
use crate::plan::{Plan, PlanStatus};
use crate::time::Date;

/// Magic number identifying a cadence plan snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0xCADE_0001;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SnapshotError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
}

impl Default for SnapshotHeader {
    fn default() -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
        }
    }
}

impl SnapshotHeader {
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic(self.magic));
        }
        if self.version != FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

/// One operationplan. `owner` is the position of the owning record within
/// the same cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationPlanRecord {
    pub cluster: ClusterId,
    pub operation: OperationId,
    pub quantity: f64,
    pub start: Date,
    pub end: Date,
    pub status: PlanStatus,
    pub demand: Option<DemandId>,
    pub owner: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub header: SnapshotHeader,
    /// Per cluster in id order, operationplans in creation order.
    pub operationplans: Vec<OperationPlanRecord>,
    /// Constraint logs in demand id order.
    pub constraints: Vec<(DemandId, Vec<Constraint>)>,
}

impl PlanSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        bitcode::serialize(self).map_err(|e| SnapshotError::Encode(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, SnapshotError> {
        let snapshot: PlanSnapshot =
            bitcode::deserialize(data).map_err(|e| SnapshotError::Decode(e.to_string()))?;
        snapshot.header.validate()?;
        Ok(snapshot)
    }

    /// Total planned quantity of the records of `operation`.
    pub fn quantity_of(&self, operation: OperationId) -> f64 {
        self.operationplans
            .iter()
            .filter(|r| r.operation == operation)
            .map(|r| r.quantity)
            .sum()
    }
}

impl Plan {
    pub fn snapshot(&self) -> PlanSnapshot {
        let mut operationplans = Vec::new();
        let mut constraints = Vec::new();
        for cp in self.clusters() {
            let plans = cp.operationplans();
            let position = |id: OperationPlanId| plans.iter().position(|(x, _)| *x == id).map(|p| p as u32);
            for (_, o) in &plans {
                operationplans.push(OperationPlanRecord {
                    cluster: cp.id(),
                    operation: o.operation,
                    quantity: o.quantity,
                    start: o.start,
                    end: o.end,
                    status: o.status,
                    demand: o.demand,
                    owner: o.owner.and_then(position),
                });
            }
            constraints.extend(
                cp.constraint_logs()
                    .filter(|(_, log)| !log.is_empty())
                    .map(|(d, log)| (d, log.iter().cloned().collect::<Vec<_>>())),
            );
        }
        constraints.sort_by_key(|(d, _)| *d);
        PlanSnapshot {
            header: SnapshotHeader::default(),
            operationplans,
            constraints,
        }
    }

    pub fn snapshot_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        self.snapshot().to_bytes()
    }
}
