//! The top-level scheduling loop.
//!
//! [`Planner::solve`] plans every selected cluster on its own worker: sort
//! the cluster's demands, plan them one by one, recreate purchasing and
//! safety stock, commit. Clusters share nothing but the immutable network,
//! so with the `parallel` feature they run on a dedicated rayon pool.
//!
//! Errors stay as local as possible. A failing demand is recorded in its
//! constraint log and the loop moves on; a failure outside of any demand
//! wipes the cluster's proposed plan and is reported in its
//! [`ClusterOutcome`], leaving the other clusters untouched.

use std::time::Instant;

use super::Solver;
use super::demand::DemandOutcome;
use crate::command::CommandManager;
use crate::error::PlanError;
use crate::id::*;
use crate::network::Network;
use crate::plan::{ClusterPlan, Plan};
use crate::settings::{SolverSettings, UserExits};

/// What happened to one cluster during a solve.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterOutcome {
    pub cluster: ClusterId,
    pub planned: usize,
    pub short: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Set when the cluster as a whole failed and its plan was erased.
    pub error: Option<PlanError>,
}

impl Default for ClusterOutcome {
    fn default() -> Self {
        Self {
            cluster: ClusterId(0),
            planned: 0,
            short: 0,
            failed: 0,
            skipped: 0,
            error: None,
        }
    }
}

impl ClusterOutcome {
    fn count(&mut self, outcome: DemandOutcome) {
        match outcome {
            DemandOutcome::Planned => self.planned += 1,
            DemandOutcome::Short => self.short += 1,
            DemandOutcome::Failed => self.failed += 1,
            DemandOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Outcome of a full solve, one entry per solved cluster in id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanSummary {
    pub clusters: Vec<ClusterOutcome>,
}

impl PlanSummary {
    pub fn planned(&self) -> usize {
        self.clusters.iter().map(|c| c.planned).sum()
    }

    pub fn short(&self) -> usize {
        self.clusters.iter().map(|c| c.short).sum()
    }

    pub fn failed(&self) -> usize {
        self.clusters.iter().map(|c| c.failed).sum()
    }

    /// Clusters that failed as a whole.
    pub fn errors(&self) -> impl Iterator<Item = &PlanError> {
        self.clusters.iter().filter_map(|c| c.error.as_ref())
    }
}

/// Runs the solver over a plan.
#[derive(Debug, Clone, Default)]
pub struct Planner {
    settings: SolverSettings,
    exits: UserExits,
}

impl Planner {
    pub fn new(settings: SolverSettings) -> Self {
        Self {
            settings,
            exits: UserExits::default(),
        }
    }

    pub fn with_exits(mut self, exits: UserExits) -> Self {
        self.exits = exits;
        self
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    /// Number of cluster workers. Verbose logging, manual commits and a
    /// single selected cluster run on the calling thread.
    pub fn parallelism(&self, clusters: usize) -> usize {
        let s = &self.settings;
        if s.log_level > 0 || !s.autocommit || s.cluster >= 0 {
            return 1;
        }
        s.max_parallel.max(1).min(clusters.max(1))
    }

    /// Replan all clusters, or the one selected in the settings.
    pub fn solve(&self, net: &Network, plan: &mut Plan) -> Result<PlanSummary, PlanError> {
        let started = Instant::now();
        let selected: Vec<&mut ClusterPlan> = if self.settings.cluster >= 0 {
            let id = ClusterId(self.settings.cluster as u32);
            let cp = plan.cluster_mut(id).ok_or(PlanError::UnknownCluster(id))?;
            vec![cp]
        } else {
            plan.clusters_mut().iter_mut().collect()
        };
        let count = selected.len();
        let clusters = self.run(net, selected)?;
        let summary = PlanSummary { clusters };
        tracing::info!(
            event = "solve_finished",
            clusters = count,
            planned = summary.planned(),
            short = summary.short(),
            failed = summary.failed(),
            elapsed_ms = started.elapsed().as_millis() as u64,
        );
        Ok(summary)
    }

    /// Plan a single demand with a caller-owned command manager. Errors are
    /// returned rather than recorded. Without autocommit the caller decides
    /// whether to commit or roll back.
    pub fn solve_demand(
        &self,
        net: &Network,
        plan: &mut Plan,
        commands: &mut CommandManager,
        demand: DemandId,
    ) -> Result<DemandOutcome, PlanError> {
        let d = net.get_demand(demand).ok_or(PlanError::UnknownDemand(demand))?;
        let cluster = d.cluster();
        let cp = plan
            .cluster_mut(cluster)
            .ok_or(PlanError::UnknownCluster(cluster))?;
        let mut solver = Solver::new(net, cp, commands, &self.settings, &self.exits);
        solver.plan_demand_strict(demand)
    }

    fn run(&self, net: &Network, clusters: Vec<&mut ClusterPlan>) -> Result<Vec<ClusterOutcome>, PlanError> {
        #[cfg(feature = "parallel")]
        {
            let threads = self.parallelism(clusters.len());
            if threads > 1 {
                use rayon::prelude::*;
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| PlanError::ThreadPool(e.to_string()))?;
                return Ok(pool.install(|| {
                    clusters
                        .into_par_iter()
                        .map(|cp| self.solve_cluster(net, cp))
                        .collect()
                }));
            }
        }
        Ok(clusters
            .into_iter()
            .map(|cp| self.solve_cluster(net, cp))
            .collect())
    }

    fn solve_cluster(&self, net: &Network, cp: &mut ClusterPlan) -> ClusterOutcome {
        let started = Instant::now();
        let mut outcome = ClusterOutcome {
            cluster: cp.id(),
            ..ClusterOutcome::default()
        };
        let mut commands = CommandManager::new();
        if let Err(e) = self.plan_cluster(net, cp, &mut commands, &mut outcome) {
            tracing::error!(event = "cluster_failed", cluster = cp.id().0, error = %e);
            if let Err(undo) = erase_cluster(cp, &mut commands) {
                tracing::error!(event = "cluster_erase_failed", cluster = cp.id().0, error = %undo);
            }
            outcome.error = Some(PlanError::ClusterFailure {
                cluster: cp.id(),
                reason: e.to_string(),
            });
        }
        tracing::info!(
            event = "cluster_finished",
            cluster = cp.id().0,
            planned = outcome.planned,
            short = outcome.short,
            failed = outcome.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
        );
        outcome
    }

    fn plan_cluster(
        &self,
        net: &Network,
        cp: &mut ClusterPlan,
        commands: &mut CommandManager,
        outcome: &mut ClusterOutcome,
    ) -> Result<(), PlanError> {
        let id = cp.id();
        let def = net.cluster(id).ok_or(PlanError::UnknownCluster(id))?;
        if self.settings.erase_previous_first {
            erase_proposed(cp, commands)?;
            commands.commit(cp)?;
        }

        let mut demands = def.demands.clone();
        demands.sort_by(|a, b| {
            let (x, y) = (net.demand(*a), net.demand(*b));
            x.priority
                .cmp(&y.priority)
                .then(x.due.cmp(&y.due))
                .then(x.quantity.total_cmp(&y.quantity))
                .then(a.cmp(b))
        });
        tracing::info!(event = "cluster_started", cluster = id.0, demands = demands.len());

        let mut solver = Solver::new(net, cp, commands, &self.settings, &self.exits);
        if self.settings.plan_safety_stock_first {
            solver.plan_safety_stock(&def.buffers)?;
            solver.commit()?;
        }
        for d in demands {
            outcome.count(solver.plan_demand(d)?);
        }
        solver.replan_purchases(&def.buffers)?;
        if !self.settings.plan_safety_stock_first {
            solver.plan_safety_stock(&def.buffers)?;
        }
        solver.commit()
    }
}

impl Solver<'_> {
    pub(crate) fn commit(&mut self) -> Result<(), PlanError> {
        self.commands.commit(self.plan)
    }
}

/// Delete every proposed top-level operationplan of a cluster.
fn erase_proposed(cp: &mut ClusterPlan, commands: &mut CommandManager) -> Result<(), PlanError> {
    let tops: Vec<OperationPlanId> = cp
        .operationplans()
        .into_iter()
        .filter(|(_, o)| o.owner.is_none() && !o.is_locked())
        .map(|(id, _)| id)
        .collect();
    for id in tops {
        cp.delete(commands, id)?;
    }
    Ok(())
}

fn erase_cluster(cp: &mut ClusterPlan, commands: &mut CommandManager) -> Result<(), PlanError> {
    commands.rollback_all(cp)?;
    erase_proposed(cp, commands)?;
    commands.commit(cp)
}
