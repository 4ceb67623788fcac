//! The constraint-based ask/reply solver.
//!
//! Every entity of the network has a solver method answering the same
//! question: "can you deliver `q_qty` by `q_date`?". The question and its
//! answer live in a [`State`] frame on a bounded [`StateStack`]; entity
//! solvers recurse into each other through [`Solver::ask`], which pushes a
//! frame, dispatches on the [`Solvable`] tag and pops the answer.
//!
//! ```text
//! Demand -> Operation -> Flow -> Buffer -> Operation -> ...
//!                \-> Load -> Resource
//! ```
//!
//! Side effects are operationplan changes recorded in a
//! [`CommandManager`], so any caller can roll back what an ask did.
//!
//! The [`Planner`] runs the whole loop: it sorts demands per cluster, plans
//! them one by one, replans purchasing and safety stock and commits.

mod alternate;
mod buckets;
mod buffer;
mod check;
pub mod cleanup;
mod demand;
mod flow;
mod load;
mod operation;
mod procure;
mod resource;
mod routing;
mod scheduler;
mod split;
pub mod state;

pub use cleanup::Cleanup;
pub use demand::DemandOutcome;
pub use scheduler::{ClusterOutcome, PlanSummary, Planner};
pub use state::{MAX_STATES, State, StateStack};

use crate::command::{Bookmark, CommandManager};
use crate::constraint::{ConstraintEntity, ConstraintKind};
use crate::error::PlanError;
use crate::id::*;
use crate::network::Network;
use crate::plan::ClusterPlan;
use crate::settings::{CAPACITY, FENCE, LEADTIME, MATERIAL, PlanType, SolverSettings, UserExits};
use crate::time::Date;

/// Anything an ask can be addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Solvable {
    Demand(DemandId),
    Operation(OperationId),
    Buffer(BufferId),
    Flow(FlowId),
    Load(LoadId),
    Resource(ResourceId),
}

/// The reply half of a popped frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Answer {
    pub qty: f64,
    pub date: Date,
    pub cost: f64,
    pub penalty: f64,
}

impl Answer {
    pub(crate) fn none(date: Date) -> Self {
        Self {
            qty: 0.0,
            date,
            cost: 0.0,
            penalty: 0.0,
        }
    }
}

/// Solver for one cluster. Holds the cluster's plan and a command manager
/// exclusively for the duration of a solve.
pub struct Solver<'a> {
    pub(crate) net: &'a Network,
    pub(crate) plan: &'a mut ClusterPlan,
    pub(crate) commands: &'a mut CommandManager,
    pub(crate) settings: &'a SolverSettings,
    pub(crate) exits: &'a UserExits,
    pub(crate) stack: StateStack,
    /// Whether constraints may reject or delay an ask in the current pass.
    pub(crate) constrained: bool,
    log_constraints: bool,
    /// Nesting of asks whose constraints must not be logged.
    pub(crate) silent: u32,
    pub(crate) planning_demand: Option<DemandId>,
}

impl<'a> Solver<'a> {
    pub fn new(
        net: &'a Network,
        plan: &'a mut ClusterPlan,
        commands: &'a mut CommandManager,
        settings: &'a SolverSettings,
        exits: &'a UserExits,
    ) -> Self {
        let constrained = settings.is_constrained();
        Self {
            net,
            plan,
            commands,
            settings,
            exits,
            stack: StateStack::new(),
            constrained,
            log_constraints: constrained && settings.plan_type == PlanType::Constrained,
            silent: 0,
            planning_demand: None,
        }
    }

    /// Solve the ask in the top frame.
    pub fn solve(&mut self, what: Solvable) -> Result<(), PlanError> {
        match what {
            Solvable::Demand(d) => self.solve_demand(d),
            Solvable::Operation(o) => self.solve_operation(o),
            Solvable::Buffer(b) => self.solve_buffer(b),
            Solvable::Flow(f) => self.solve_flow(f),
            Solvable::Load(l) => self.solve_load(l),
            Solvable::Resource(r) => self.solve_resource(r),
        }
    }

    pub fn stack(&self) -> &StateStack {
        &self.stack
    }

    /// Push a frame, let `setup` fill in the context, solve and pop.
    pub(crate) fn ask<F>(
        &mut self,
        what: Solvable,
        q_qty: f64,
        q_date: Date,
        full: bool,
        setup: F,
    ) -> Result<Answer, PlanError>
    where
        F: FnOnce(&mut State),
    {
        self.stack.push(q_qty, q_date, full)?;
        setup(self.stack.top_mut());
        let depth = self.stack.depth();
        tracing::trace!(depth, ?what, q_qty, q_date = %q_date, "ask");
        let result = self.solve(what);
        let frame = self.stack.pop();
        result?;
        let qty = frame.a_qty.clamp(0.0, q_qty.max(0.0));
        tracing::trace!(depth, ?what, a_qty = qty, a_date = %frame.a_date, "answer");
        Ok(Answer {
            qty,
            date: frame.a_date,
            cost: frame.a_cost,
            penalty: frame.a_penalty,
        })
    }

    pub(crate) fn top(&self) -> State {
        *self.stack.top()
    }

    pub(crate) fn reply(&mut self, qty: f64, date: Date) {
        let top = self.stack.top_mut();
        top.a_qty = qty;
        top.a_date = date;
    }

    pub(crate) fn add_cost(&mut self, cost: f64, penalty: f64) {
        let top = self.stack.top_mut();
        top.a_cost += cost;
        top.a_penalty += penalty;
    }

    pub(crate) fn material_constrained(&self) -> bool {
        self.constrained && self.settings.has(MATERIAL)
    }

    pub(crate) fn capacity_constrained(&self) -> bool {
        self.constrained && self.settings.has(CAPACITY)
    }

    pub(crate) fn leadtime_constrained(&self) -> bool {
        self.constrained && self.settings.has(LEADTIME)
    }

    pub(crate) fn fence_constrained(&self) -> bool {
        self.constrained && self.settings.has(FENCE)
    }

    pub(crate) fn bookmark(&self) -> Bookmark {
        self.commands.bookmark()
    }

    pub(crate) fn rollback(&mut self, mark: Bookmark) -> Result<(), PlanError> {
        self.commands.rollback(self.plan, mark)
    }

    /// Record a constraint against the demand being planned.
    pub(crate) fn log(
        &mut self,
        kind: ConstraintKind,
        entity: ConstraintEntity,
        start: Date,
        end: Date,
        quantity: f64,
    ) {
        if !self.log_constraints || self.silent > 0 {
            return;
        }
        if let Some(d) = self.planning_demand {
            self.plan.constraints_mut(d).push(kind, entity, start, end, quantity);
        }
    }

    pub(crate) fn log_marker(&mut self) -> Option<usize> {
        let d = self.planning_demand?;
        Some(self.plan.constraints_mut(d).marker())
    }

    pub(crate) fn log_pop(&mut self, marker: Option<usize>) {
        if let (Some(d), Some(m)) = (self.planning_demand, marker) {
            self.plan.constraints_mut(d).pop_to(m);
        }
    }

    /// Run `f` with constraint logging suppressed.
    pub(crate) fn silently<T, F>(&mut self, f: F) -> Result<T, PlanError>
    where
        F: FnOnce(&mut Self) -> Result<T, PlanError>,
    {
        self.silent += 1;
        let result = f(self);
        self.silent -= 1;
        result
    }

    pub(crate) fn set_logging(&mut self, on: bool) {
        self.log_constraints = on;
    }
}
