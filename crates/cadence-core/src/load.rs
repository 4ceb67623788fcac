use serde::{Deserialize, Serialize};

use crate::id::*;
use crate::operation::SearchMode;
use crate::time::DateRange;

/// Capacity requirement of an operation on a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Load {
    pub operation: OperationId,
    /// The resource, or the aggregate whose members are candidates.
    pub resource: ResourceId,
    /// Capacity units occupied for the duration of the operationplan. On a
    /// bucketized resource, capacity consumed per unit planned.
    pub quantity: f64,
    pub skill: Option<SkillId>,
    /// Loads of one operation sharing a group name are alternates.
    pub group: Option<String>,
    pub priority: i32,
    pub search: SearchMode,
    /// Setup the resource must be in while executing this load.
    pub setup: Option<String>,
    pub effective: DateRange,
}

impl Load {
    pub fn new(operation: OperationId, resource: ResourceId, quantity: f64) -> Self {
        Self {
            operation,
            resource,
            quantity,
            skill: None,
            group: None,
            priority: 1,
            search: SearchMode::Priority,
            setup: None,
            effective: DateRange::ALWAYS,
        }
    }

    pub fn with_skill(mut self, skill: SkillId) -> Self {
        self.skill = Some(skill);
        self
    }

    pub fn with_group(mut self, group: &str, priority: i32) -> Self {
        self.group = Some(group.to_string());
        self.priority = priority;
        self
    }

    pub fn with_search(mut self, search: SearchMode) -> Self {
        self.search = search;
        self
    }

    pub fn with_setup(mut self, setup: &str) -> Self {
        self.setup = Some(setup.to_string());
        self
    }

    pub fn with_effective(mut self, effective: DateRange) -> Self {
        self.effective = effective;
        self
    }
}
