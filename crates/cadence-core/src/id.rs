use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies an operationplan inside the arena of one cluster plan.
    pub struct OperationPlanId;
}

macro_rules! dense_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

dense_id!(
    /// Identifies an item in the network. Cheap to copy and compare.
    ItemId
);
dense_id!(
    /// Identifies a location.
    LocationId
);
dense_id!(
    /// Identifies a buffer (an item stocked at a location).
    BufferId
);
dense_id!(
    /// Identifies an operation template.
    OperationId
);
dense_id!(
    /// Identifies a material flow between an operation and a buffer.
    FlowId
);
dense_id!(
    /// Identifies a capacity load of an operation on a resource.
    LoadId
);
dense_id!(
    /// Identifies a resource.
    ResourceId
);
dense_id!(
    /// Identifies a skill that resources may carry.
    SkillId
);
dense_id!(
    /// Identifies a customer demand.
    DemandId
);
dense_id!(
    /// Identifies a cluster: a connected component of the supply network.
    ClusterId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_ids_order_by_value() {
        let a = BufferId(1);
        let b = BufferId(2);
        assert!(a < b);
        assert_eq!(b.index(), 2);
    }

    #[test]
    fn demand_id_copy() {
        let a = DemandId(5);
        let b = a;
        assert_eq!(a, b);
    }

    #[test]
    fn operationplan_ids_are_distinct() {
        let mut map = slotmap::SlotMap::<OperationPlanId, u8>::with_key();
        let a = map.insert(1);
        let b = map.insert(2);
        assert_ne!(a, b);
    }
}
