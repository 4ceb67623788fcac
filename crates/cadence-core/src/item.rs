use serde::{Deserialize, Serialize};

/// A stocked article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    /// Unit cost, accrued when the item is drawn from an unconstrained buffer.
    pub cost: f64,
    /// Pool inventory across all locations stocking this item. Demands for
    /// a pooled item may be re-sourced from other locations and purchasing
    /// checks network-wide inventory.
    pub global_purchase: bool,
}

impl Item {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cost: 0.0,
            global_purchase: false,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn pooled(mut self) -> Self {
        self.global_purchase = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
}

impl Location {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}
