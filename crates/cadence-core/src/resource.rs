//! Resources, skills and setup matrices.

use serde::{Deserialize, Serialize};

use crate::calendar::{BucketCalendar, Envelope};
use crate::id::*;
use crate::time::{DateRange, Duration};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Continuous capacity bounded by the `maximum` envelope.
    Default,
    /// Unlimited capacity. Loads only accrue cost.
    Infinite,
    /// Capacity expressed as a quantity per time bucket.
    Buckets(BucketCalendar),
}

/// A skill carried by a resource, ranked by priority for selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSkill {
    pub skill: SkillId,
    pub priority: i32,
    pub effective: DateRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
}

/// A changeover rule. `None` on either side matches any setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupRule {
    pub from: Option<String>,
    pub to: Option<String>,
    pub duration: Duration,
    pub cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetupMatrix {
    /// Rules in priority order. The first matching rule applies.
    pub rules: Vec<SetupRule>,
}

impl SetupMatrix {
    pub fn with_rule(mut self, from: Option<&str>, to: Option<&str>, duration: Duration, cost: f64) -> Self {
        self.rules.push(SetupRule {
            from: from.map(str::to_string),
            to: to.map(str::to_string),
            duration,
            cost,
        });
        self
    }

    /// Duration and cost of switching from `from` to `to`, or `None` when
    /// the change is not allowed.
    pub fn changeover(&self, from: Option<&str>, to: &str) -> Option<(Duration, f64)> {
        if from == Some(to) {
            return Some((Duration::ZERO, 0.0));
        }
        self.rules
            .iter()
            .find(|r| {
                r.from.as_deref().is_none_or(|f| Some(f) == from)
                    && r.to.as_deref().is_none_or(|t| t == to)
            })
            .map(|r| (r.duration, r.cost))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub kind: ResourceKind,
    /// Available capacity over time.
    pub maximum: Envelope,
    /// Cost per hour of use.
    pub cost: f64,
    /// How far the capacity search may pull an operationplan earlier.
    pub max_early: Duration,
    pub location: Option<LocationId>,
    /// Aggregate this resource is a member of.
    pub owner: Option<ResourceId>,
    pub skills: Vec<ResourceSkill>,
    pub setup_matrix: Option<SetupMatrix>,
    pub initial_setup: Option<String>,
    pub(crate) members: Vec<ResourceId>,
    pub(crate) cluster: ClusterId,
}

impl Resource {
    pub fn new(name: &str, capacity: f64) -> Self {
        Self {
            name: name.to_string(),
            kind: ResourceKind::Default,
            maximum: Envelope::constant(capacity),
            cost: 0.0,
            max_early: Duration::from_days(100),
            location: None,
            owner: None,
            skills: Vec::new(),
            setup_matrix: None,
            initial_setup: None,
            members: Vec::new(),
            cluster: ClusterId(0),
        }
    }

    pub fn infinite(name: &str) -> Self {
        let mut r = Self::new(name, f64::INFINITY);
        r.kind = ResourceKind::Infinite;
        r
    }

    pub fn buckets(name: &str, calendar: BucketCalendar) -> Self {
        let mut r = Self::new(name, 0.0);
        r.kind = ResourceKind::Buckets(calendar);
        r
    }

    pub fn with_maximum(mut self, maximum: Envelope) -> Self {
        self.maximum = maximum;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_max_early(mut self, max_early: Duration) -> Self {
        self.max_early = max_early;
        self
    }

    pub fn with_owner(mut self, owner: ResourceId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_skill(mut self, skill: SkillId, priority: i32) -> Self {
        self.skills.push(ResourceSkill {
            skill,
            priority,
            effective: DateRange::ALWAYS,
        });
        self
    }

    pub fn with_setups(mut self, matrix: SetupMatrix, initial: Option<&str>) -> Self {
        self.setup_matrix = Some(matrix);
        self.initial_setup = initial.map(str::to_string);
        self
    }

    /// Direct members of an aggregate resource.
    pub fn members(&self) -> &[ResourceId] {
        &self.members
    }

    pub fn cluster(&self) -> ClusterId {
        self.cluster
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self.kind, ResourceKind::Infinite)
    }

    /// Priority of a skill on this resource, if it carries it.
    pub fn skill_priority(&self, skill: SkillId, at: crate::time::Date) -> Option<i32> {
        self.skills
            .iter()
            .filter(|s| s.skill == skill && s.effective.contains(at))
            .map(|s| s.priority)
            .min()
    }

    /// Changeover to `to`, starting from `from`. A resource without a matrix
    /// changes setups freely.
    pub fn changeover(&self, from: Option<&str>, to: &str) -> Option<(Duration, f64)> {
        match &self.setup_matrix {
            Some(m) => m.changeover(from, to),
            None => Some((Duration::ZERO, 0.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changeover_rules_match_in_order() {
        let m = SetupMatrix::default()
            .with_rule(Some("red"), Some("blue"), Duration::from_hours(2), 10.0)
            .with_rule(None, Some("blue"), Duration::from_hours(5), 1.0);
        assert_eq!(m.changeover(Some("red"), "blue"), Some((Duration::from_hours(2), 10.0)));
        assert_eq!(m.changeover(Some("green"), "blue"), Some((Duration::from_hours(5), 1.0)));
        assert_eq!(m.changeover(None, "blue"), Some((Duration::from_hours(5), 1.0)));
        assert_eq!(m.changeover(Some("blue"), "blue"), Some((Duration::ZERO, 0.0)));
        assert_eq!(m.changeover(Some("blue"), "red"), None);
    }

    #[test]
    fn skill_priority_lookup() {
        let r = Resource::new("op1", 1.0).with_skill(SkillId(3), 2);
        assert_eq!(r.skill_priority(SkillId(3), crate::time::Date(0)), Some(2));
        assert_eq!(r.skill_priority(SkillId(4), crate::time::Date(0)), None);
    }
}
