//! Cadence Core -- a constraint-based supply chain planner.
//!
//! This crate plans customer demands against a supply network of buffers,
//! operations and resources. Every entity negotiates through the same
//! ask/reply protocol: "can you deliver this quantity by this date?", and
//! every change to the plan is an undoable command, so the solver can try
//! alternatives and back out of the ones that do not work.
//!
//! # Planning Pipeline
//!
//! Each call to [`solver::Planner::solve`] runs the following steps for
//! every cluster of the network:
//!
//! 1. **Erase** -- Optionally delete the proposed operationplans of a
//!    previous run.
//! 2. **Sort** -- Order the cluster's demands by priority, due date and
//!    quantity.
//! 3. **Plan** -- Ask each demand's delivery operation, retrying later until
//!    the demand is satisfied or its deadline passes.
//! 4. **Clean** -- Delete supply created by a demand that nothing consumes.
//! 5. **Purchase** -- Recreate the purchase orders of procurement buffers.
//! 6. **Safety stock** -- Replenish buffers below their minimum.
//! 7. **Commit** -- Make the cluster's commands permanent.
//!
//! # Building a Network
//!
//! Networks are registered on a builder and frozen:
//!
//! ```rust,ignore
//! let mut b = NetworkBuilder::new(Date::from_days(0));
//! let widget = b.add_item(Item::new("widget"));
//! let plant = b.add_location(Location::new("plant"));
//! let fg = b.add_buffer(Buffer::new("widget@plant", widget, plant));
//! let make = b.add_operation(Operation::fixed_time("make", Duration::from_days(2)));
//! b.add_flow(Flow::produce(make, fg, 1.0));
//! b.add_demand(Demand::new("order", widget, plant, 100.0, Date::from_days(10)));
//! let net = b.build()?;
//!
//! let mut plan = Plan::new(&net);
//! Planner::new(SolverSettings::default()).solve(&net, &mut plan)?;
//! ```
//!
//! # Key Types
//!
//! - [`network::Network`] -- Immutable supply network, partitioned into
//!   independently planned clusters.
//! - [`plan::Plan`] -- Operationplans, timelines and constraint logs, one
//!   [`plan::ClusterPlan`] per cluster.
//! - [`command::CommandManager`] -- Undo log with bookmarks, rollback and
//!   commit.
//! - [`solver::Solver`] -- The ask/reply solver of one cluster.
//! - [`solver::Cleanup`] -- Removes excess supply.
//! - [`settings::SolverSettings`] -- Validated solver configuration.
//! - [`snapshot`] -- Versioned plan snapshots via bitcode.

pub mod buffer;
pub mod calendar;
pub mod command;
pub mod constraint;
pub mod demand;
pub mod error;
pub mod flow;
pub mod id;
pub mod item;
pub mod load;
pub mod network;
pub mod operation;
pub mod plan;
pub mod quantity;
pub mod resource;
pub mod settings;
pub mod snapshot;
pub mod solver;
pub mod time;
pub mod timeline;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
