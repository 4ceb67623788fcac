//! Solver configuration.
//!
//! Every field has a validating setter; [`SolverSettings::validate`] checks a
//! whole struct after deserialization. User exits live in [`UserExits`]
//! since callbacks cannot be deserialized.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::id::*;
use crate::network::Network;
use crate::time::Duration;

/// Constraint bits.
pub const LEADTIME: u32 = 1;
pub const MATERIAL: u32 = 2;
pub const CAPACITY: u32 = 4;
pub const FENCE: u32 = 8;
pub const ALL_CONSTRAINTS: u32 = LEADTIME | MATERIAL | CAPACITY | FENCE;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("constraint mask {0} has unknown bits")]
    InvalidConstraints(u32),
    #[error("plan type must be 1, 2 or 3, got {0}")]
    InvalidPlanType(u8),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: String },
}

/// How demands are planned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PlanType {
    /// Constrained planning with constraint logging.
    #[default]
    Constrained,
    /// Constrained up to the due date, the remainder unconstrained.
    UnconstrainedSearch,
    /// Everything planned unconstrained at the requested date.
    Unconstrained,
}

impl TryFrom<u8> for PlanType {
    type Error = ConfigError;

    fn try_from(v: u8) -> Result<Self, ConfigError> {
        match v {
            1 => Ok(PlanType::Constrained),
            2 => Ok(PlanType::UnconstrainedSearch),
            3 => Ok(PlanType::Unconstrained),
            other => Err(ConfigError::InvalidPlanType(other)),
        }
    }
}

impl From<PlanType> for u8 {
    fn from(p: PlanType) -> u8 {
        match p {
            PlanType::Constrained => 1,
            PlanType::UnconstrainedSearch => 2,
            PlanType::Unconstrained => 3,
        }
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// OR of [`LEADTIME`], [`MATERIAL`], [`CAPACITY`] and [`FENCE`].
    pub constraints: u32,
    pub plan_type: PlanType,
    /// Allow demands and operationplans to be planned in several parts.
    pub allow_splits: bool,
    /// Spread loads over the qualified resources in turn.
    pub rotate_resources: bool,
    /// Let buffers ask their producing operation for replenishment.
    pub propagate: bool,
    /// Cluster to plan, or -1 for all.
    pub cluster: i32,
    /// Retry step when an ask gives no usable next date.
    pub lazy_delay: Duration,
    /// Smallest retry step.
    pub minimum_delay: Duration,
    /// Wait for existing locked supply this close to a shortage instead of
    /// creating new supply.
    pub autofence: Duration,
    pub iteration_threshold: f64,
    /// Percentage.
    pub iteration_accuracy: f64,
    /// Maximum retries per demand. Zero is unbounded.
    pub iteration_max: u32,
    pub administrative_leadtime: Duration,
    pub plan_safety_stock_first: bool,
    pub erase_previous_first: bool,
    #[serde(default = "default_parallelism")]
    pub max_parallel: usize,
    pub log_level: u8,
    pub autocommit: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            constraints: ALL_CONSTRAINTS,
            plan_type: PlanType::Constrained,
            allow_splits: true,
            rotate_resources: false,
            propagate: true,
            cluster: -1,
            lazy_delay: Duration::from_days(1),
            minimum_delay: Duration::ZERO,
            autofence: Duration::ZERO,
            iteration_threshold: 1.0,
            iteration_accuracy: 1.0,
            iteration_max: 0,
            administrative_leadtime: Duration::ZERO,
            plan_safety_stock_first: false,
            erase_previous_first: false,
            max_parallel: default_parallelism(),
            log_level: 0,
            autocommit: true,
        }
    }
}

impl SolverSettings {
    pub fn has(&self, constraint: u32) -> bool {
        self.constraints & constraint != 0
    }

    pub fn is_constrained(&self) -> bool {
        self.constraints != 0
    }

    pub fn set_constraints(&mut self, mask: u32) -> Result<(), ConfigError> {
        if mask & !ALL_CONSTRAINTS != 0 {
            return Err(ConfigError::InvalidConstraints(mask));
        }
        self.constraints = mask;
        Ok(())
    }

    pub fn set_plan_type(&mut self, plan_type: u8) -> Result<(), ConfigError> {
        self.plan_type = PlanType::try_from(plan_type)?;
        Ok(())
    }

    pub fn set_cluster(&mut self, cluster: i32) -> Result<(), ConfigError> {
        if cluster < -1 {
            return Err(out_of_range("cluster", cluster));
        }
        self.cluster = cluster;
        Ok(())
    }

    pub fn set_lazy_delay(&mut self, delay: Duration) -> Result<(), ConfigError> {
        if delay.0 <= 0 {
            return Err(out_of_range("lazy_delay", delay.0));
        }
        self.lazy_delay = delay;
        Ok(())
    }

    pub fn set_minimum_delay(&mut self, delay: Duration) -> Result<(), ConfigError> {
        if delay.0 < 0 {
            return Err(out_of_range("minimum_delay", delay.0));
        }
        self.minimum_delay = delay;
        Ok(())
    }

    pub fn set_autofence(&mut self, fence: Duration) -> Result<(), ConfigError> {
        if fence.0 < 0 {
            return Err(out_of_range("autofence", fence.0));
        }
        self.autofence = fence;
        Ok(())
    }

    pub fn set_iteration_threshold(&mut self, threshold: f64) -> Result<(), ConfigError> {
        if threshold.is_nan() || threshold < 0.0 {
            return Err(out_of_range("iteration_threshold", threshold));
        }
        self.iteration_threshold = threshold;
        Ok(())
    }

    pub fn set_iteration_accuracy(&mut self, accuracy: f64) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&accuracy) {
            return Err(out_of_range("iteration_accuracy", accuracy));
        }
        self.iteration_accuracy = accuracy;
        Ok(())
    }

    pub fn set_iteration_max(&mut self, max: u32) {
        self.iteration_max = max;
    }

    pub fn set_administrative_leadtime(&mut self, leadtime: Duration) -> Result<(), ConfigError> {
        if leadtime.0 < 0 {
            return Err(out_of_range("administrative_leadtime", leadtime.0));
        }
        self.administrative_leadtime = leadtime;
        Ok(())
    }

    pub fn set_max_parallel(&mut self, workers: usize) -> Result<(), ConfigError> {
        if workers == 0 {
            return Err(out_of_range("max_parallel", workers));
        }
        self.max_parallel = workers;
        Ok(())
    }

    /// Check a whole settings struct, typically after loading it from a file.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut check = SolverSettings::default();
        check.set_constraints(self.constraints)?;
        check.set_cluster(self.cluster)?;
        check.set_lazy_delay(self.lazy_delay)?;
        check.set_minimum_delay(self.minimum_delay)?;
        check.set_autofence(self.autofence)?;
        check.set_iteration_threshold(self.iteration_threshold)?;
        check.set_iteration_accuracy(self.iteration_accuracy)?;
        check.set_administrative_leadtime(self.administrative_leadtime)?;
        check.set_max_parallel(self.max_parallel)?;
        Ok(())
    }
}

fn out_of_range(field: &'static str, value: impl fmt::Display) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        value: value.to_string(),
    }
}

// ---------------------------------------------------------------------------
// User exits
// ---------------------------------------------------------------------------

/// Called before a flow is solved. Returning `false` vetoes the ask, which
/// is then answered in full without planning.
pub type FlowExit = Arc<dyn Fn(&Network, FlowId, bool) -> bool + Send + Sync>;
pub type DemandExit = Arc<dyn Fn(&Network, DemandId, bool) + Send + Sync>;
pub type BufferExit = Arc<dyn Fn(&Network, BufferId, bool) + Send + Sync>;
pub type ResourceExit = Arc<dyn Fn(&Network, ResourceId, bool) + Send + Sync>;
pub type OperationExit = Arc<dyn Fn(&Network, OperationId, bool) + Send + Sync>;

/// Callbacks invoked synchronously before each entity is solved, with the
/// entity and whether the solve is constrained.
#[derive(Clone, Default)]
pub struct UserExits {
    pub flow: Option<FlowExit>,
    pub demand: Option<DemandExit>,
    pub buffer: Option<BufferExit>,
    pub resource: Option<ResourceExit>,
    pub operation: Option<OperationExit>,
}

impl fmt::Debug for UserExits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserExits")
            .field("flow", &self.flow.is_some())
            .field("demand", &self.demand.is_some())
            .field("buffer", &self.buffer.is_some())
            .field("resource", &self.resource.is_some())
            .field("operation", &self.operation.is_some())
            .finish()
    }
}
